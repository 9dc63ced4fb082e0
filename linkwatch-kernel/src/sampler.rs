//! Network sampler.
//!
//! A single periodic task that refreshes the process-wide [`NetworkSnapshot`]:
//! RTT probe, interface counters, retransmissions, throughput and buffer
//! pressure. Each sub-probe fails on its own and keeps the last committed
//! value; a tick never aborts and the task only stops on cancellation.
//!
//! Readers get a consistent snapshot: the sampler builds the next value off to
//! the side and swaps it in under the write lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::derived::{self, DEFAULT_WINDOW};
use crate::source::{
    buffer_pressure, MetricsSource, ProbeError, DEFAULT_BUFFER_STATUS, DEFAULT_INTERFACE_ERRORS,
    DEFAULT_LINK_SPEED_MBPS,
};
use crate::state::{new_published, Published};

/// RTT samples retained.
pub const RTT_WINDOW: usize = 10;
/// Minimum spacing between committed throughput values.
pub const MIN_THROUGHPUT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    /// Oldest first, at most `RTT_WINDOW` entries.
    pub rtt_history: VecDeque<f64>,
    pub throughput_bps: f64,
    pub interface_errors: u64,
    pub link_speed_mbps: u64,
    pub retransmissions: u64,
    /// 0-100.
    pub buffer_status: f64,
}

impl Default for NetworkSnapshot {
    fn default() -> Self {
        Self {
            rtt_history: VecDeque::with_capacity(RTT_WINDOW),
            throughput_bps: 0.0,
            interface_errors: DEFAULT_INTERFACE_ERRORS,
            link_speed_mbps: DEFAULT_LINK_SPEED_MBPS,
            retransmissions: 0,
            buffer_status: DEFAULT_BUFFER_STATUS,
        }
    }
}

impl NetworkSnapshot {
    pub fn push_rtt(&mut self, rtt_ms: f64) {
        self.rtt_history.push_back(rtt_ms);
        while self.rtt_history.len() > RTT_WINDOW {
            self.rtt_history.pop_front();
        }
    }

    /// Moving average over the most recent RTT samples.
    pub fn rtt_ms(&self) -> f64 {
        let samples: Vec<f64> = self.rtt_history.iter().copied().collect();
        derived::moving_average(&samples, DEFAULT_WINDOW)
    }
}

/// Handle to the committed snapshot.
#[derive(Debug, Clone, Default)]
pub struct NetworkState {
    inner: Published<NetworkSnapshot>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self {
            inner: new_published(NetworkSnapshot::default()),
        }
    }

    /// Copy of the currently committed snapshot.
    pub fn current(&self) -> NetworkSnapshot {
        self.inner.read().clone()
    }

    pub fn publish(&self, snapshot: NetworkSnapshot) {
        *self.inner.write() = snapshot;
    }
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub probe_host: String,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            probe_host: "localhost".to_string(),
        }
    }
}

/// Baseline for throughput deltas.
#[derive(Debug, Clone, Copy)]
struct ByteBaseline {
    bytes: u64,
    at: Instant,
}

pub struct NetworkSampler {
    source: Arc<dyn MetricsSource>,
    state: NetworkState,
    settings: SamplerSettings,
    last_check: Instant,
    baseline: Option<ByteBaseline>,
}

impl NetworkSampler {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        state: NetworkState,
        settings: SamplerSettings,
    ) -> Self {
        Self {
            source,
            state,
            settings,
            last_check: Instant::now(),
            baseline: None,
        }
    }

    /// Run one sampling pass and publish the result.
    pub async fn tick(&mut self) {
        self.tick_at(Instant::now()).await
    }

    /// Sampling pass with an explicit clock reading for the throughput step.
    pub async fn tick_at(&mut self, now: Instant) {
        let mut next = self.state.current();

        if let Some(rtt) = self.measure_rtt().await {
            next.push_rtt(rtt);
        }

        match self.source.interface_stats() {
            Ok(stats) => {
                next.interface_errors = stats.errors;
                next.link_speed_mbps = stats.link_speed_mbps;
            }
            Err(e) => warn!(error = %e, "interface stats unavailable, keeping last values"),
        }

        match self.source.retransmissions() {
            Ok(count) => next.retransmissions = count,
            Err(e) => debug!(error = %e, "retransmission counter unavailable"),
        }

        if let Some(bps) = self.update_throughput(now) {
            next.throughput_bps = bps;
        }

        match (self.source.cpu_percent(), self.source.memory_percent()) {
            (Ok(cpu), Ok(mem)) => next.buffer_status = buffer_pressure(cpu, mem),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "buffer estimate unavailable, keeping last value")
            }
        }

        debug!(
            rtt_ms = next.rtt_ms(),
            throughput_bps = next.throughput_bps,
            errors = next.interface_errors,
            retrans = next.retransmissions,
            buffer = next.buffer_status,
            "network sample"
        );
        self.state.publish(next);
    }

    async fn measure_rtt(&self) -> Option<f64> {
        let started = Instant::now();
        let probe = tokio::time::timeout(
            self.settings.probe_timeout,
            self.source.probe_rtt(&self.settings.probe_host),
        )
        .await
        .unwrap_or(Err(ProbeError::Timeout(self.settings.probe_timeout)));

        match probe {
            Ok(Some(rtt)) if rtt > 0.0 => Some(rtt),
            Ok(_) => Some(started.elapsed().as_secs_f64() * 1000.0),
            Err(e) => {
                warn!(host = %self.settings.probe_host, error = %e, "RTT probe failed");
                None
            }
        }
    }

    /// Returns a value to commit only when at least a second has passed since
    /// the last check and a baseline exists.
    fn update_throughput(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_check);
        if elapsed < MIN_THROUGHPUT_INTERVAL {
            return None;
        }

        let bytes = match self.source.bytes_total() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "byte counters unavailable, keeping last throughput");
                return None;
            }
        };
        self.last_check = now;

        let previous = self.baseline.replace(ByteBaseline { bytes, at: now });
        let previous = previous?;
        if bytes < previous.bytes {
            debug!("byte counter went backwards, re-baselining");
            return None;
        }
        let dt = now.saturating_duration_since(previous.at).as_secs_f64();
        Some(derived::throughput(previous.bytes, bytes, dt))
    }

    /// Tick on the configured interval until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            host = %self.settings.probe_host,
            "network sampler started"
        );
        let mut interval = tokio::time::interval(self.settings.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        info!("network sampler stopped");
    }
}

/// Spawn the sampler loop on the runtime.
pub fn spawn_sampler(sampler: NetworkSampler, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(sampler.run(cancel))
}
