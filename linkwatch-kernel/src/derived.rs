//! Derived statistics over latency and byte-counter windows.
//!
//! All functions are pure; callers pass the window in oldest-first order.

/// Default window for moving average and rate of change.
pub const DEFAULT_WINDOW: usize = 5;

/// One-way latency in milliseconds. Negative values mean the producer clock
/// runs ahead of ours and are passed through unchanged.
pub fn latency_ms(receive_time: f64, publish_time: f64) -> f64 {
    (receive_time - publish_time) * 1000.0
}

/// Mean absolute difference between consecutive samples.
pub fn jitter(latencies: &[f64]) -> f64 {
    if latencies.len() < 2 {
        return 0.0;
    }
    let total: f64 = latencies.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / (latencies.len() - 1) as f64
}

fn tail(values: &[f64], window: usize) -> &[f64] {
    &values[values.len().saturating_sub(window)..]
}

/// Mean of the last `window` values (or all of them if fewer).
pub fn moving_average(values: &[f64], window: usize) -> f64 {
    let recent = tail(values, window);
    if recent.is_empty() {
        return 0.0;
    }
    recent.iter().sum::<f64>() / recent.len() as f64
}

/// `(last - first) / count` over the last `window` values.
pub fn rate_of_change(values: &[f64], window: usize) -> f64 {
    let recent = tail(values, window);
    if recent.len() < 2 {
        return 0.0;
    }
    (recent[recent.len() - 1] - recent[0]) / recent.len() as f64
}

/// Bytes per second between two cumulative counter readings; 0 when
/// `dt_secs` is not positive.
pub fn throughput(prev_bytes: u64, curr_bytes: u64, dt_secs: f64) -> f64 {
    if dt_secs <= 0.0 {
        return 0.0;
    }
    (curr_bytes as f64 - prev_bytes as f64) / dt_secs
}
