//! Live smoke test against a real dnsdist instance.
//!
//! Run with `DNSDIST_HOST=... DNSDIST_API_KEY=... cargo test --test interactive -- --ignored`.

use std::env;

use dnsdist_monitor::{DnsdistMonitor, SourceConfig};

#[tokio::test]
#[ignore = "needs a reachable dnsdist instance"]
async fn polls_live_instance() {
    let Ok(host) = env::var("DNSDIST_HOST") else {
        eprintln!("DNSDIST_HOST not set, skipping");
        return;
    };

    let mut source = SourceConfig::new("live", host);
    if let Ok(port) = env::var("DNSDIST_PORT") {
        source = source.with_port(port.parse().expect("DNSDIST_PORT must be a port number"));
    }
    if let Ok(key) = env::var("DNSDIST_API_KEY") {
        source = source.with_api_key(key);
    }

    let mut monitor = DnsdistMonitor::builder().with_source(source).build().expect("valid config");
    let record = monitor.refresh("live").await.expect("known source");
    println!("{}", serde_json::to_string_pretty(&record).expect("serializable record"));

    let diagnostics = monitor.diagnostics_for("live").expect("known source");
    assert!(diagnostics.last_update_success, "statistics fetch failed");
}
