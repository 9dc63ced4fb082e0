//! Metrics source interface.
//!
//! The sampler and the emitter only see primitive numbers through
//! [`MetricsSource`]; how a platform obtains them lives in the implementation
//! (see `host::SystemMetricsSource`). Every method may fail independently and
//! callers fall back to the documented defaults below.

use async_trait::async_trait;

/// Link speed assumed when the interface does not report one.
pub const DEFAULT_LINK_SPEED_MBPS: u64 = 1000;
/// Interface error count assumed when the counters are unavailable.
pub const DEFAULT_INTERFACE_ERRORS: u64 = 0;
/// Buffer pressure assumed before the first successful estimate.
pub const DEFAULT_BUFFER_STATUS: f64 = 50.0;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("metric not supported on this platform: {0}")]
    Unsupported(&'static str),
    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("could not parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    #[error("probe timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error counter and link speed of the monitored interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceStats {
    pub errors: u64,
    pub link_speed_mbps: u64,
}

impl Default for InterfaceStats {
    fn default() -> Self {
        Self {
            errors: DEFAULT_INTERFACE_ERRORS,
            link_speed_mbps: DEFAULT_LINK_SPEED_MBPS,
        }
    }
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Host CPU utilisation, 0-100.
    fn cpu_percent(&self) -> Result<f64, ProbeError>;

    /// Host memory utilisation, 0-100.
    fn memory_percent(&self) -> Result<f64, ProbeError>;

    /// One-minute load average (or an equivalent).
    fn system_load(&self) -> Result<f64, ProbeError>;

    fn interface_stats(&self) -> Result<InterfaceStats, ProbeError>;

    /// Cumulative TCP retransmitted segments.
    fn retransmissions(&self) -> Result<u64, ProbeError>;

    /// Cumulative bytes sent + received over all interfaces.
    fn bytes_total(&self) -> Result<u64, ProbeError>;

    /// Round-trip probe to `host`. `Ok(None)` means the probe ran but its
    /// result could not be read; the caller then uses its own timing.
    async fn probe_rtt(&self, host: &str) -> Result<Option<f64>, ProbeError>;
}

/// Weighted CPU/memory blend used as a proxy for network buffer pressure,
/// clamped to 0-100.
pub fn buffer_pressure(cpu_percent: f64, memory_percent: f64) -> f64 {
    (cpu_percent * 0.7 + memory_percent * 0.3).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pressure_blend() {
        assert!((buffer_pressure(50.0, 50.0) - 50.0).abs() < 1e-9);
        assert!((buffer_pressure(100.0, 0.0) - 70.0).abs() < 1e-9);
        assert!((buffer_pressure(10.0, 40.0) - 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_pressure_clamped() {
        assert_eq!(buffer_pressure(150.0, 150.0), 100.0);
        assert_eq!(buffer_pressure(-10.0, -10.0), 0.0);
    }

    #[test]
    fn test_interface_defaults() {
        let stats = InterfaceStats::default();
        assert_eq!(stats.link_speed_mbps, 1000);
        assert_eq!(stats.errors, 0);
    }
}
