//! Record sinks.
//!
//! A sink is append-only: the emitter hands it one finished [`Record`] per
//! reading and never reads back. `CsvSink` writes the dataset file; tests and
//! the devkit provide in-memory sinks.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::info;

use crate::models::Record;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink closed")]
    Closed,
    #[error("sink rejected record: {0}")]
    Rejected(String),
}

pub trait RecordSink: Send + Sync {
    /// Append one record.
    fn append(&self, record: &Record) -> Result<(), SinkError>;

    /// Push buffered rows to durable storage.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// CSV dataset writer. The file is truncated and the header row written when
/// the sink is opened; each record is flushed as soon as it is written.
pub struct CsvSink {
    path: PathBuf,
    writer: Mutex<Option<csv::Writer<File>>>,
}

impl CsvSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(HEADERS)?;
        writer.flush()?;

        info!(path = %path.display(), "created dataset file");
        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file; later appends fail with `Closed`.
    pub fn close(&self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl RecordSink for CsvSink {
    fn append(&self, record: &Record) -> Result<(), SinkError> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Column header row, in record field order.
pub const HEADERS: [&str; 33] = [
    "Timestamp",
    "Time_of_Day",
    "Sensor_ID",
    "Message_ID",
    "Published_Payload",
    "Received_Payload",
    "Message_Size_Bytes",
    "Latency_ms",
    "Jitter_ms",
    "Packet_Loss_Percent",
    "RTT_ms",
    "Throughput_BytesPerSec",
    "TCP_Retransmissions",
    "Interface_Errors",
    "Link_Speed_Mbps",
    "MQTT_Connection_State",
    "MQTT_Message_Queue_Size",
    "QoS_Level",
    "QoS_Success_Rate",
    "Messages_Per_Minute",
    "Failed_Delivery_Count",
    "CPU_Utilization_Percent",
    "Memory_Usage_Percent",
    "System_Load",
    "Network_Buffer_Status",
    "Network_Condition",
    "Moving_Avg_Latency_ms",
    "Rate_of_Change_Latency",
    "Sender_CPU_Freq",
    "Sender_Memory_Percent",
    "Sender_Reset_Cause",
    "Communication_Issue_Type",
    "Topic",
];
