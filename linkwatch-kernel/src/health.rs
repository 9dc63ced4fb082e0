use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::ConnectionState;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub sources_tracked: usize,
    pub records_emitted: u64,
    pub sink_failures: u64,
}

/// Transport and emission status shared by the listener, the emitter and the
/// HTTP API.
#[derive(Clone)]
pub struct LinkStatus {
    start_time: Instant,
    state: Arc<parking_lot::Mutex<ConnectionState>>,
    reconnects: Arc<AtomicU32>,
    records_emitted: Arc<AtomicU64>,
    sink_failures: Arc<AtomicU64>,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::with_state(ConnectionState::Connecting)
    }

    pub fn with_state(state: ConnectionState) -> Self {
        Self {
            start_time: Instant::now(),
            state: Arc::new(parking_lot::Mutex::new(state)),
            reconnects: Arc::new(AtomicU32::new(0)),
            records_emitted: Arc::new(AtomicU64::new(0)),
            sink_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn mark_connected(&self) {
        *self.state.lock() = ConnectionState::Connected;
    }

    pub fn mark_disconnected(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        *self.state.lock() = ConnectionState::Reconnecting;
    }

    pub fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, sources_tracked: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: self.state().label().to_string(),
            mqtt_reconnects: self.reconnects(),
            sources_tracked,
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let status = LinkStatus::new();
        assert_eq!(status.state(), ConnectionState::Connecting);
        status.mark_connected();
        assert_eq!(status.state(), ConnectionState::Connected);
        status.increment_reconnects();
        assert_eq!(status.state(), ConnectionState::Reconnecting);
        assert_eq!(status.reconnects(), 1);
        status.mark_disconnected();
        assert_eq!(status.get_health(0).mqtt_status, "Disconnected");
    }

    #[test]
    fn test_counters_shared_between_clones() {
        let status = LinkStatus::new();
        let clone = status.clone();
        clone.record_emitted();
        clone.record_emitted();
        clone.record_sink_failure();
        let health = status.get_health(3);
        assert_eq!(health.records_emitted, 2);
        assert_eq!(health.sink_failures, 1);
        assert_eq!(health.sources_tracked, 3);
    }
}
