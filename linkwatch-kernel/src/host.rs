//! Host metrics source backed by `sysinfo` and Linux procfs/sysfs.
//!
//! - CPU / memory / load average from `sysinfo::System`
//! - interface error counters and byte totals from `sysinfo::Networks`
//! - link speed from `/sys/class/net/<iface>/speed`
//! - TCP retransmissions from `/proc/net/snmp`
//! - RTT via a single `ping` run with `tokio::process`

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::time::{Duration, Instant};
use sysinfo::{Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::process::Command;
use tracing::debug;

use crate::source::{InterfaceStats, MetricsSource, ProbeError, DEFAULT_LINK_SPEED_MBPS};

const FALLBACK_INTERFACE: &str = "eth0";

/// Last global CPU figure and when it was measured.
///
/// sysinfo derives usage from the delta between two refreshes, so readings
/// taken closer together than `min_interval` reuse the cached value.
#[derive(Debug, Clone, Copy)]
struct CpuCache {
    value: f64,
    at: Option<Instant>,
    min_interval: Duration,
}

impl CpuCache {
    fn new(min_interval: Duration) -> Self {
        Self {
            value: 0.0,
            at: None,
            min_interval,
        }
    }

    fn get_or_refresh(&mut self, now: Instant, refresh: impl FnOnce() -> f64) -> f64 {
        let stale = match self.at {
            Some(at) => now.saturating_duration_since(at) >= self.min_interval,
            None => true,
        };
        if stale {
            self.value = refresh();
            self.at = Some(now);
        }
        self.value
    }
}

pub struct SystemMetricsSource {
    sys: Mutex<System>,
    networks: Mutex<Networks>,
    cpu: Mutex<CpuCache>,
    interface: String,
}

impl SystemMetricsSource {
    /// Build a source for `interface`, or for the default-route interface
    /// when `None`.
    pub fn new(interface: Option<String>) -> Self {
        let interface = interface.unwrap_or_else(detect_interface);
        debug!(interface = %interface, "host metrics source ready");

        let mut sys = System::new();
        // first refresh primes the CPU usage delta
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            sys: Mutex::new(sys),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            cpu: Mutex::new(CpuCache::new(MINIMUM_CPU_UPDATE_INTERVAL)),
            interface,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

#[async_trait]
impl MetricsSource for SystemMetricsSource {
    fn cpu_percent(&self) -> Result<f64, ProbeError> {
        let mut cpu = self.cpu.lock();
        Ok(cpu.get_or_refresh(Instant::now(), || {
            let mut sys = self.sys.lock();
            sys.refresh_cpu_usage();
            sys.global_cpu_info().cpu_usage() as f64
        }))
    }

    fn memory_percent(&self) -> Result<f64, ProbeError> {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(ProbeError::Unsupported("memory totals"));
        }
        Ok(sys.used_memory() as f64 / total as f64 * 100.0)
    }

    fn system_load(&self) -> Result<f64, ProbeError> {
        if cfg!(unix) {
            Ok(System::load_average().one)
        } else {
            self.cpu_percent()
        }
    }

    fn interface_stats(&self) -> Result<InterfaceStats, ProbeError> {
        let mut networks = self.networks.lock();
        networks.refresh();
        let errors = networks
            .iter()
            .find(|(name, _)| name.as_str() == self.interface)
            .map(|(_, data)| data.total_errors_on_received() + data.total_errors_on_transmitted())
            .ok_or_else(|| ProbeError::InterfaceNotFound(self.interface.clone()))?;

        Ok(InterfaceStats {
            errors,
            link_speed_mbps: link_speed_mbps(&self.interface),
        })
    }

    fn retransmissions(&self) -> Result<u64, ProbeError> {
        if !cfg!(target_os = "linux") {
            return Err(ProbeError::Unsupported("tcp retransmissions"));
        }
        let snmp = std::fs::read_to_string("/proc/net/snmp")?;
        parse_retrans_segs(&snmp).ok_or_else(|| ProbeError::Parse {
            what: "/proc/net/snmp",
            detail: "no Tcp RetransSegs column".into(),
        })
    }

    fn bytes_total(&self) -> Result<u64, ProbeError> {
        let mut networks = self.networks.lock();
        networks.refresh();
        Ok(networks
            .iter()
            .map(|(_, data)| data.total_received() + data.total_transmitted())
            .sum())
    }

    async fn probe_rtt(&self, host: &str) -> Result<Option<f64>, ProbeError> {
        let count_flag = if cfg!(target_os = "windows") { "-n" } else { "-c" };
        let output = Command::new("ping")
            .args([count_flag, "1", host])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ping_time(&stdout))
    }
}

/// Interface carrying the default route, from `/proc/net/route`.
pub fn detect_interface() -> String {
    std::fs::read_to_string("/proc/net/route")
        .ok()
        .and_then(|table| parse_default_route(&table))
        .unwrap_or_else(|| FALLBACK_INTERFACE.to_string())
}

fn parse_default_route(table: &str) -> Option<String> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [iface, "00000000", ..] => Some(iface.to_string()),
            _ => None,
        }
    })
}

fn link_speed_mbps(interface: &str) -> u64 {
    std::fs::read_to_string(format!("/sys/class/net/{interface}/speed"))
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|speed| *speed > 0)
        .map(|speed| speed as u64)
        .unwrap_or(DEFAULT_LINK_SPEED_MBPS)
}

fn parse_retrans_segs(snmp: &str) -> Option<u64> {
    let mut tcp = snmp.lines().filter(|l| l.starts_with("Tcp:"));
    let header = tcp.next()?;
    let values = tcp.next()?;
    let column = header.split_whitespace().position(|h| h == "RetransSegs")?;
    values.split_whitespace().nth(column)?.parse().ok()
}

fn parse_ping_time(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("time=")?;
        let token = rest.split_whitespace().next()?;
        token.trim_end_matches("ms").parse::<f64>().ok()
    })
}
