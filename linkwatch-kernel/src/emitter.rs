//! Record emission pipeline.
//!
//! For each inbound reading, in order:
//! 1. update the source history (count + latency sample)
//! 2. derive jitter / moving average / rate of change from the updated window
//! 3. classify against the current network snapshot and a fresh host sample
//! 4. build the immutable [`Record`]
//! 5. append it to the sink
//!
//! Sink failures are logged and counted; they never reach the transport.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::classifier::{classify, ClassifierInput};
use crate::decoder::{self, now_secs};
use crate::derived::{self, DEFAULT_WINDOW};
use crate::health::LinkStatus;
use crate::history::HistoryStore;
use crate::models::{InboundMessage, Reading, Record};
use crate::sampler::NetworkState;
use crate::sink::{RecordSink, SinkError};
use crate::source::MetricsSource;

/// Packet loss reported for every reading. Payloads carry no sequence
/// numbers, so loss is unmeasured and assumed zero until a field supplies it.
pub const UNMEASURED_PACKET_LOSS_PERCENT: f64 = 0.0;

/// Queue size column; the client does not expose its request queue depth.
const QUEUE_SIZE_PLACEHOLDER: u64 = 0;

pub fn packet_loss_percent(_reading: &Reading) -> f64 {
    UNMEASURED_PACKET_LOSS_PERCENT
}

/// Local wall-clock `HH:MM:SS` of an epoch timestamp.
pub fn time_of_day(timestamp: f64) -> String {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
        .map(|utc| utc.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "00:00:00".to_string())
}

/// Host utilisation sampled for one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub system_load: f64,
}

/// Result of processing one reading.
#[derive(Debug, Clone)]
pub struct Emission {
    pub record: Record,
    /// False when the sink rejected the record.
    pub stored: bool,
}

/// Owns the aggregation state and runs the per-reading pipeline. Shared by
/// handle (`Arc`) between the transport listener and the HTTP API; the
/// network sampler writes the same `NetworkState`.
pub struct Aggregator {
    history: HistoryStore,
    network: NetworkState,
    source: Arc<dyn MetricsSource>,
    sink: Arc<dyn RecordSink>,
    status: LinkStatus,
}

impl Aggregator {
    pub fn new(
        network: NetworkState,
        source: Arc<dyn MetricsSource>,
        sink: Arc<dyn RecordSink>,
        status: LinkStatus,
    ) -> Self {
        Self {
            history: HistoryStore::new(),
            network,
            source,
            sink,
            status,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn network(&self) -> &NetworkState {
        &self.network
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    /// Decode and emit one inbound message received now.
    pub fn handle(&self, msg: &InboundMessage) -> Emission {
        self.handle_at(msg, now_secs())
    }

    /// Decode and emit one inbound message received at `received_at`.
    pub fn handle_at(&self, msg: &InboundMessage, received_at: f64) -> Emission {
        let raw = msg.payload_text();
        let reading = decoder::decode_at(&raw, received_at);
        self.emit(&reading, msg, &raw, received_at)
    }

    /// Run the pipeline for an already decoded reading.
    pub fn emit(
        &self,
        reading: &Reading,
        msg: &InboundMessage,
        raw: &str,
        received_at: f64,
    ) -> Emission {
        let latency_ms = derived::latency_ms(received_at, reading.timestamp);
        let history = self.history.observe(&msg.topic, latency_ms);

        let jitter_ms = derived::jitter(&history.latencies);
        let moving_avg_latency_ms = derived::moving_average(&history.latencies, DEFAULT_WINDOW);
        let latency_rate_of_change = derived::rate_of_change(&history.latencies, DEFAULT_WINDOW);

        let network = self.network.current();
        let host = self.sample_host();
        let packet_loss = packet_loss_percent(reading);
        let connection = self.status.state();

        let issue = classify(&ClassifierInput {
            connection,
            packet_loss_percent: packet_loss,
            latency_ms,
            throughput_bps: network.throughput_bps,
            cpu_percent: host.cpu_percent,
            memory_percent: host.memory_percent,
        });

        let record = Record {
            timestamp: received_at,
            time_of_day: time_of_day(received_at),
            sensor_id: reading.source_id.clone(),
            message_id: reading.message_id.clone(),
            sensor_value: reading.value,
            raw_payload: raw.to_string(),
            payload_bytes: msg.payload.len(),
            latency_ms,
            jitter_ms,
            packet_loss_percent: packet_loss,
            rtt_ms: network.rtt_ms(),
            throughput_bps: network.throughput_bps,
            retransmissions: network.retransmissions,
            interface_errors: network.interface_errors,
            link_speed_mbps: network.link_speed_mbps,
            connection_state: connection.label().to_string(),
            queue_size: QUEUE_SIZE_PLACEHOLDER,
            qos_level: msg.qos,
            qos_success_rate: 100.0 - packet_loss,
            messages_per_minute: history.message_count,
            failed_deliveries: history.failed_deliveries,
            cpu_percent: host.cpu_percent,
            memory_percent: host.memory_percent,
            system_load: host.system_load,
            buffer_status: network.buffer_status,
            network_condition: reading.network_condition.clone(),
            moving_avg_latency_ms,
            latency_rate_of_change,
            sender_cpu_freq: reading.cpu_freq,
            sender_memory_percent: reading.memory_percent,
            sender_reset_cause: reading.reset_cause,
            issue,
            topic: msg.topic.clone(),
        };

        let stored = match self.sink.append(&record) {
            Ok(()) => {
                self.status.record_emitted();
                true
            }
            Err(e) => {
                self.on_sink_failure(&msg.topic, &e);
                false
            }
        };

        info!(
            "message from {}: value={:.2}, latency={:.2}ms, condition={}",
            record.sensor_id, record.sensor_value, record.latency_ms, record.network_condition
        );
        debug!(
            topic = %record.topic,
            count = record.messages_per_minute,
            issue = ?issue,
            "record emitted"
        );

        Emission { record, stored }
    }

    fn on_sink_failure(&self, topic: &str, error: &SinkError) {
        let failed = self.history.record_failed_delivery(topic);
        self.status.record_sink_failure();
        warn!(
            sink = self.sink.name(),
            topic = %topic,
            failed_deliveries = failed,
            error = %error,
            "record dropped"
        );
    }

    fn sample_host(&self) -> HostSample {
        let cpu_percent = self.source.cpu_percent().unwrap_or_else(|e| {
            debug!(error = %e, "cpu sample unavailable");
            0.0
        });
        let memory_percent = self.source.memory_percent().unwrap_or_else(|e| {
            debug!(error = %e, "memory sample unavailable");
            0.0
        });
        let system_load = self.source.system_load().unwrap_or(cpu_percent);
        HostSample {
            cpu_percent,
            memory_percent,
            system_load,
        }
    }

    /// Flush the sink once no more readings will arrive.
    pub fn flush(&self) -> Result<(), SinkError> {
        self.sink.flush()
    }
}
