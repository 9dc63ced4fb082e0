//! Wire payload decoding.
//!
//! Two comma-separated layouts are accepted:
//! - full (10+ fields): `timestamp,sensor_id,message_id,value,wifi_rssi,
//!   link_quality,memory_percent,cpu_freq,reset_cause,qos[,network_condition]`
//! - legacy (4-9 fields): `timestamp,sensor_id,message_id,value[,wifi_rssi]`
//!
//! Decoding never fails: anything that does not parse yields
//! [`Reading::degraded`] stamped with the current time.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::models::{Reading, UNKNOWN};

const FULL_LAYOUT_FIELDS: usize = 10;
const LEGACY_MIN_FIELDS: usize = 4;

/// Current wall-clock time as float seconds since epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Decode one payload, stamping degraded readings with `now_secs()`.
pub fn decode(raw: &str) -> Reading {
    decode_at(raw, now_secs())
}

/// Decode one payload; `now` is used only for degraded readings.
pub fn decode_at(raw: &str, now: f64) -> Reading {
    match try_decode(raw) {
        Some(reading) => reading,
        None => {
            warn!(payload = %raw, "undecodable payload, using degraded reading");
            Reading::degraded(now)
        }
    }
}

fn try_decode(raw: &str) -> Option<Reading> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() < LEGACY_MIN_FIELDS {
        return None;
    }

    let timestamp = finite(parts[0])?;
    let source_id = parts[1].to_string();
    let message_id = parts[2].to_string();
    let value = finite(parts[3])?;

    if parts.len() >= FULL_LAYOUT_FIELDS {
        return Some(Reading {
            timestamp,
            source_id,
            message_id,
            value,
            wifi_rssi: int(parts[4])?,
            link_quality: int(parts[5])?,
            memory_percent: int(parts[6])?,
            cpu_freq: int(parts[7])?,
            reset_cause: int(parts[8])?,
            qos: Some(int(parts[9])?),
            network_condition: parts
                .get(10)
                .map(|s| s.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
        });
    }

    let wifi_rssi = match parts.get(4) {
        Some(field) => int(field)?,
        None => 0,
    };

    Some(Reading {
        timestamp,
        source_id,
        message_id,
        value,
        wifi_rssi,
        link_quality: 0,
        memory_percent: 0,
        cpu_freq: 0,
        reset_cause: 0,
        qos: None,
        network_condition: UNKNOWN.to_string(),
    })
}

fn finite(field: &str) -> Option<f64> {
    f64::from_str(field).ok().filter(|v| v.is_finite())
}

fn int(field: &str) -> Option<i64> {
    i64::from_str(field).ok()
}
