//! Core data model shared by the aggregation pipeline.
//!
//! - `InboundMessage`: what the transport hands over for one publish
//! - `Reading`: a decoded sensor observation with producer-side context
//! - `IssueCategory`: the single diagnosed communication issue of a reading
//! - `Record`: the immutable output row handed to the sink

use serde::Serialize;

/// Source identifier used when a payload cannot be decoded.
pub const UNKNOWN: &str = "unknown";

/// One publish delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the reading arrived on; also the per-source history key.
    pub topic: String,
    pub payload: Vec<u8>,
    /// Delivery QoS (0, 1 or 2).
    pub qos: u8,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: u8) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        }
    }

    /// Payload as text. Invalid UTF-8 is replaced so decoding stays total.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Decoded sensor observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Publish time on the producer clock, seconds since epoch.
    pub timestamp: f64,
    pub source_id: String,
    pub message_id: String,
    pub value: f64,
    pub wifi_rssi: i64,
    pub link_quality: i64,
    pub memory_percent: i64,
    pub cpu_freq: i64,
    pub reset_cause: i64,
    /// QoS the producer claims to have published with (full layout only).
    pub qos: Option<i64>,
    /// Network-condition tag set by the producer, `"unknown"` when absent.
    pub network_condition: String,
}

impl Reading {
    /// Reading returned for payloads that cannot be decoded.
    pub fn degraded(now: f64) -> Self {
        Self {
            timestamp: now,
            source_id: UNKNOWN.to_string(),
            message_id: UNKNOWN.to_string(),
            value: 0.0,
            wifi_rssi: 0,
            link_quality: 0,
            memory_percent: 0,
            cpu_freq: 0,
            reset_cause: 0,
            qos: None,
            network_condition: UNKNOWN.to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.source_id == UNKNOWN
    }
}

/// Communication issue diagnosed for a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueCategory {
    Normal,
    Latency,
    PacketLoss,
    Throughput,
    Connection,
    ResourceConstraint,
}

impl IssueCategory {
    /// Integer code written to the dataset (0-5).
    pub fn code(self) -> u8 {
        match self {
            IssueCategory::Normal => 0,
            IssueCategory::Latency => 1,
            IssueCategory::PacketLoss => 2,
            IssueCategory::Throughput => 3,
            IssueCategory::Connection => 4,
            IssueCategory::ResourceConstraint => 5,
        }
    }
}

/// Transport connection state as seen by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

/// One output row. Field order is the column order; serde names are the
/// dataset header names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
    #[serde(rename = "Time_of_Day")]
    pub time_of_day: String,
    #[serde(rename = "Sensor_ID")]
    pub sensor_id: String,
    #[serde(rename = "Message_ID")]
    pub message_id: String,
    // header kept for compatibility with existing datasets
    #[serde(rename = "Published_Payload")]
    pub sensor_value: f64,
    #[serde(rename = "Received_Payload")]
    pub raw_payload: String,
    #[serde(rename = "Message_Size_Bytes")]
    pub payload_bytes: usize,
    #[serde(rename = "Latency_ms")]
    pub latency_ms: f64,
    #[serde(rename = "Jitter_ms")]
    pub jitter_ms: f64,
    #[serde(rename = "Packet_Loss_Percent")]
    pub packet_loss_percent: f64,
    #[serde(rename = "RTT_ms")]
    pub rtt_ms: f64,
    #[serde(rename = "Throughput_BytesPerSec")]
    pub throughput_bps: f64,
    #[serde(rename = "TCP_Retransmissions")]
    pub retransmissions: u64,
    #[serde(rename = "Interface_Errors")]
    pub interface_errors: u64,
    #[serde(rename = "Link_Speed_Mbps")]
    pub link_speed_mbps: u64,
    #[serde(rename = "MQTT_Connection_State")]
    pub connection_state: String,
    #[serde(rename = "MQTT_Message_Queue_Size")]
    pub queue_size: u64,
    #[serde(rename = "QoS_Level")]
    pub qos_level: u8,
    #[serde(rename = "QoS_Success_Rate")]
    pub qos_success_rate: f64,
    #[serde(rename = "Messages_Per_Minute")]
    pub messages_per_minute: u64,
    #[serde(rename = "Failed_Delivery_Count")]
    pub failed_deliveries: u64,
    #[serde(rename = "CPU_Utilization_Percent")]
    pub cpu_percent: f64,
    #[serde(rename = "Memory_Usage_Percent")]
    pub memory_percent: f64,
    #[serde(rename = "System_Load")]
    pub system_load: f64,
    #[serde(rename = "Network_Buffer_Status")]
    pub buffer_status: f64,
    #[serde(rename = "Network_Condition")]
    pub network_condition: String,
    #[serde(rename = "Moving_Avg_Latency_ms")]
    pub moving_avg_latency_ms: f64,
    #[serde(rename = "Rate_of_Change_Latency")]
    pub latency_rate_of_change: f64,
    #[serde(rename = "Sender_CPU_Freq")]
    pub sender_cpu_freq: i64,
    #[serde(rename = "Sender_Memory_Percent")]
    pub sender_memory_percent: i64,
    #[serde(rename = "Sender_Reset_Cause")]
    pub sender_reset_cause: i64,
    #[serde(rename = "Communication_Issue_Type", serialize_with = "issue_code")]
    pub issue: IssueCategory,
    #[serde(rename = "Topic")]
    pub topic: String,
}

fn issue_code<S: serde::Serializer>(issue: &IssueCategory, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(issue.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_codes() {
        let ordered = [
            IssueCategory::Normal,
            IssueCategory::Latency,
            IssueCategory::PacketLoss,
            IssueCategory::Throughput,
            IssueCategory::Connection,
            IssueCategory::ResourceConstraint,
        ];
        let codes: Vec<u8> = ordered.iter().map(|i| i.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_degraded_reading() {
        let r = Reading::degraded(12.5);
        assert!(r.is_degraded());
        assert_eq!(r.timestamp, 12.5);
        assert_eq!(r.message_id, "unknown");
        assert_eq!(r.value, 0.0);
        assert_eq!(r.qos, None);
    }

    #[test]
    fn test_lossy_payload_text() {
        let msg = InboundMessage::new("t", vec![b'1', 0xFF, b'2'], 1);
        assert_eq!(msg.payload_text(), "1\u{FFFD}2");
    }
}
