//! Linkwatch kernel: MQTT sensor telemetry aggregation and communication
//! issue classification.
//!
//! Inbound payloads are decoded into [`models::Reading`]s, combined with
//! per-source history and the latest network snapshot, classified, and
//! written as [`models::Record`]s to a [`sink::RecordSink`].

pub mod classifier;
pub mod config;
pub mod decoder;
pub mod derived;
pub mod emitter;
pub mod health;
pub mod history;
pub mod host;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod sampler;
pub mod sink;
pub mod source;
pub mod state;

pub use emitter::Aggregator;
pub use models::{InboundMessage, IssueCategory, Reading, Record};
