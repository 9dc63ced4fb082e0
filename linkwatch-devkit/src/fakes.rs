/*!
Scriptable metrics source and in-memory record sinks.
*/

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use linkwatch_kernel::models::Record;
use linkwatch_kernel::sink::{RecordSink, SinkError};
use linkwatch_kernel::source::{InterfaceStats, MetricsSource, ProbeError};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Script {
    cpu: Option<f64>,
    memory: Option<f64>,
    load: Option<f64>,
    interface: Option<InterfaceStats>,
    retransmissions: Option<u64>,
    /// Consumed one per call; the last value repeats.
    bytes: VecDeque<u64>,
    /// Consumed one per call; `None` entries mean the probe failed.
    rtts: VecDeque<Option<f64>>,
}

/// Metrics source whose readings are set by the test. A metric set to `None`
/// fails with `ProbeError::Unsupported`.
pub struct ScriptedMetricsSource {
    script: Mutex<Script>,
}

impl Default for ScriptedMetricsSource {
    fn default() -> Self {
        Self {
            script: Mutex::new(Script {
                cpu: Some(10.0),
                memory: Some(30.0),
                load: Some(0.5),
                interface: Some(InterfaceStats::default()),
                retransmissions: Some(0),
                bytes: VecDeque::from([0]),
                rtts: VecDeque::new(),
            }),
        }
    }
}

impl ScriptedMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cpu(&self, cpu: Option<f64>) {
        self.script.lock().cpu = cpu;
    }

    pub fn set_memory(&self, memory: Option<f64>) {
        self.script.lock().memory = memory;
    }

    pub fn set_load(&self, load: Option<f64>) {
        self.script.lock().load = load;
    }

    pub fn set_interface(&self, stats: Option<InterfaceStats>) {
        self.script.lock().interface = stats;
    }

    pub fn set_retransmissions(&self, count: Option<u64>) {
        self.script.lock().retransmissions = count;
    }

    /// Byte counter values returned by successive `bytes_total` calls.
    pub fn push_bytes(&self, totals: impl IntoIterator<Item = u64>) {
        let mut script = self.script.lock();
        script.bytes.clear();
        script.bytes.extend(totals);
    }

    /// RTT results returned by successive probes.
    pub fn push_rtts(&self, rtts: impl IntoIterator<Item = Option<f64>>) {
        self.script.lock().rtts.extend(rtts);
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetricsSource {
    fn cpu_percent(&self) -> Result<f64, ProbeError> {
        self.script.lock().cpu.ok_or(ProbeError::Unsupported("cpu"))
    }

    fn memory_percent(&self) -> Result<f64, ProbeError> {
        self.script.lock().memory.ok_or(ProbeError::Unsupported("memory"))
    }

    fn system_load(&self) -> Result<f64, ProbeError> {
        self.script.lock().load.ok_or(ProbeError::Unsupported("load"))
    }

    fn interface_stats(&self) -> Result<InterfaceStats, ProbeError> {
        self.script
            .lock()
            .interface
            .ok_or_else(|| ProbeError::InterfaceNotFound("scripted".into()))
    }

    fn retransmissions(&self) -> Result<u64, ProbeError> {
        self.script
            .lock()
            .retransmissions
            .ok_or(ProbeError::Unsupported("retransmissions"))
    }

    fn bytes_total(&self) -> Result<u64, ProbeError> {
        let mut script = self.script.lock();
        if script.bytes.len() > 1 {
            return script.bytes.pop_front().ok_or(ProbeError::Unsupported("bytes"));
        }
        script.bytes.front().copied().ok_or(ProbeError::Unsupported("bytes"))
    }

    async fn probe_rtt(&self, _host: &str) -> Result<Option<f64>, ProbeError> {
        let next = self.script.lock().rtts.pop_front();
        match next {
            Some(Some(rtt)) => Ok(Some(rtt)),
            Some(None) => Err(ProbeError::Unsupported("rtt")),
            None => Ok(Some(1.0)),
        }
    }
}

/// Sink keeping every record in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn append(&self, record: &Record) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Memory sink that rejects every `fail_every`-th append (1-based).
pub struct FlakySink {
    inner: MemorySink,
    fail_every: u64,
    calls: AtomicU64,
}

impl FlakySink {
    pub fn failing_every(fail_every: u64) -> Self {
        Self {
            inner: MemorySink::new(),
            fail_every: fail_every.max(1),
            calls: AtomicU64::new(0),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.inner.records()
    }
}

impl RecordSink for FlakySink {
    fn append(&self, record: &Record) -> Result<(), SinkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.fail_every == 0 {
            return Err(SinkError::Rejected(format!("scripted failure on append {call}")));
        }
        self.inner.append(record)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_bytes_repeat_last() {
        let source = ScriptedMetricsSource::new();
        source.push_bytes([10, 20]);
        assert_eq!(source.bytes_total().unwrap(), 10);
        assert_eq!(source.bytes_total().unwrap(), 20);
        assert_eq!(source.bytes_total().unwrap(), 20);
    }

    #[test]
    fn test_unset_metric_fails() {
        let source = ScriptedMetricsSource::new();
        source.set_cpu(None);
        assert!(source.cpu_percent().is_err());
        assert_eq!(source.memory_percent().unwrap(), 30.0);
    }

    #[tokio::test]
    async fn test_scripted_rtts() {
        let source = ScriptedMetricsSource::new();
        source.push_rtts([Some(4.0), None]);
        assert_eq!(source.probe_rtt("h").await.unwrap(), Some(4.0));
        assert!(source.probe_rtt("h").await.is_err());
        assert_eq!(source.probe_rtt("h").await.unwrap(), Some(1.0));
    }
}
