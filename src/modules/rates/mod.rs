//! Rolling-window request rates.
//!
//! Turns a sample history of a monotonic counter into "requests seen in the
//! last hour / day", interpolating the counter at the window boundary.

use crate::modules::history::Sample;

pub const HOUR_SECS: u64 = 3_600;
pub const DAY_SECS: u64 = 86_400;

/// How rates are derived while the history is shorter than the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    /// Only count what was observed; short histories under-count.
    Observed,
    /// Scale the observed delta up to the full window until enough history
    /// exists, then switch to [`RateMode::Observed`].
    Extrapolated,
}

/// Requests per trailing hour and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateWindows {
    pub per_hour: u64,
    pub per_day: u64,
}

/// Counter delta observed inside `[now - window_secs, now]`.
///
/// The baseline is the counter value at the window horizon: the earliest
/// sample when history does not reach that far back, an exact or linearly
/// interpolated value when two samples bracket the horizon, and the newest
/// sample when every sample predates it. Never negative.
pub fn window_total<'a, I>(history: I, now: f64, window_secs: u64, current_total: u64) -> u64
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut samples = history.into_iter();
    let Some(first) = samples.next() else {
        return 0;
    };

    let horizon = now - window_secs as f64;
    let baseline = if first.timestamp >= horizon {
        first.counter as f64
    } else {
        let mut prev = first;
        let mut bracketed = None;
        for sample in samples {
            if sample.timestamp < horizon {
                prev = sample;
                continue;
            }
            bracketed = Some(interpolate(prev, sample, horizon));
            break;
        }
        // exhausted: `prev` is the newest sample
        bracketed.unwrap_or(prev.counter as f64)
    };

    current_total.saturating_sub(baseline.floor().max(0.0) as u64)
}

fn interpolate(before: &Sample, after: &Sample, horizon: f64) -> f64 {
    if after.timestamp == horizon {
        return after.counter as f64;
    }
    let span = after.timestamp - before.timestamp;
    if span <= 0.0 {
        return before.counter as f64;
    }
    let fraction = ((horizon - before.timestamp) / span).clamp(0.0, 1.0);
    let before_value = before.counter as f64;
    before_value + (after.counter as f64 - before_value) * fraction
}

/// Linear extrapolation of the delta since the oldest sample to a full window.
pub fn extrapolated_total(first: &Sample, now: f64, window_secs: u64, current_total: u64) -> u64 {
    let span = now - first.timestamp;
    if span <= 0.0 {
        return 0;
    }
    let observed = current_total.saturating_sub(first.counter) as f64;
    (observed / span * window_secs as f64) as u64
}

/// Hourly and daily rates for `history` under the given mode.
pub fn compute_rates(history: &[Sample], now: f64, current_total: u64, mode: RateMode) -> RateWindows {
    let Some(first) = history.first() else {
        return RateWindows::default();
    };

    let rate = |window_secs: u64| match mode {
        RateMode::Observed => window_total(history, now, window_secs, current_total),
        RateMode::Extrapolated => {
            if now - first.timestamp >= window_secs as f64 {
                window_total(history, now, window_secs, current_total)
            } else {
                extrapolated_total(first, now, window_secs, current_total)
            }
        }
    };

    RateWindows {
        per_hour: rate(HOUR_SECS),
        per_day: rate(DAY_SECS),
    }
}
