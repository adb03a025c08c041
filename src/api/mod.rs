//! dnsdist HTTP API transport and control plane.

pub mod client;
pub mod control;
pub mod reqwest_client;

pub use client::{
    API_KEY_HEADER, ApiClientError, ApiResponse, DYNAMIC_RULES_PATH, DnsdistApi,
    FILTERING_RULES_PATH, STATISTICS_PATH,
};
pub use control::{ControlCommand, ControlError, ControlOutcome, send_command};
pub use reqwest_client::ReqwestDnsdistClient;
