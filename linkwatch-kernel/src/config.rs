//! Kernel configuration.
//!
//! Loaded from a YAML file (`LINKWATCH_CONFIG`, default `linkwatch.yaml`).
//! A missing or empty file means defaults; a file that does not parse is
//! reported and defaults are used. A few environment variables override the
//! file: `MQTT_BROKER`, `MQTT_PORT`, `LINKWATCH_CSV_PATH`,
//! `LINKWATCH_HTTP_ADDR`.

use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

use crate::sampler::SamplerSettings;

pub const DEFAULT_TOPICS: [&str; 5] = [
    "sensor/dht22/temp",
    "sensor/dht22/humidity",
    "sensor/bmp280/temp",
    "sensor/bmp280/pressure",
    "sensor/mq135/air_quality",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub topics: Vec<String>,
    pub sampler: SamplerConf,
    pub output: OutputConf,
    pub http: HttpConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub channel_capacity: usize,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SamplerConf {
    pub interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// Defaults to the broker host.
    pub probe_host: Option<String>,
    /// Defaults to the interface carrying the default route.
    pub interface: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConf {
    pub csv_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub enabled: bool,
    pub bind: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            sampler: SamplerConf::default(),
            output: OutputConf::default(),
            http: HttpConf::default(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id_prefix: "linkwatch-kernel".into(),
            keep_alive_secs: 30,
            channel_capacity: 10,
            reconnect_delay_secs: 2,
        }
    }
}

impl Default for SamplerConf {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            probe_timeout_secs: 3,
            probe_host: None,
            interface: None,
        }
    }
}

impl Default for OutputConf {
    fn default() -> Self {
        Self {
            csv_path: "dataset/telemetry.csv".into(),
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".into(),
        }
    }
}

impl KernelConfig {
    pub fn from_yaml(txt: &str, path: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt).map_err(|source| ConfigError::Yaml {
            path: path.to_string(),
            source,
        })
    }

    /// Apply environment overrides through `lookup` (normally `env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_BROKER") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| ConfigError::Env {
                var: "MQTT_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(path) = lookup("LINKWATCH_CSV_PATH") {
            self.output.csv_path = path;
        }
        if let Some(bind) = lookup("LINKWATCH_HTTP_ADDR") {
            self.http.bind = bind;
        }
        Ok(())
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            interval: Duration::from_secs(self.sampler.interval_secs.max(1)),
            probe_timeout: Duration::from_secs(self.sampler.probe_timeout_secs.max(1)),
            probe_host: self
                .sampler
                .probe_host
                .clone()
                .unwrap_or_else(|| self.mqtt.host.clone()),
        }
    }

    pub fn log_config(&self) {
        info!("Configuration loaded:");
        info!("  MQTT broker    : {}:{}", self.mqtt.host, self.mqtt.port);
        info!("  topics         : {}", self.topics.join(", "));
        info!("  sample every   : {}s", self.sampler.interval_secs);
        info!(
            "  interface      : {}",
            self.sampler.interface.as_deref().unwrap_or("(default route)")
        );
        info!("  dataset        : {}", self.output.csv_path);
        if self.http.enabled {
            info!("  status API     : http://{}", self.http.bind);
        }
    }
}

async fn read_file(path: &str) -> Result<KernelConfig, ConfigError> {
    if !Path::new(path).exists() {
        info!(path, "no config file, using defaults");
        return Ok(KernelConfig::default());
    }
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    KernelConfig::from_yaml(&txt, path)
}

/// Load the file named by `LINKWATCH_CONFIG`, falling back to defaults, then
/// apply environment overrides.
pub async fn load_config() -> KernelConfig {
    let path = env::var("LINKWATCH_CONFIG").unwrap_or_else(|_| "linkwatch.yaml".into());
    let mut cfg = read_file(&path).await.unwrap_or_else(|e| {
        warn!(error = %e, "config invalid, using defaults");
        KernelConfig::default()
    });
    if let Err(e) = cfg.apply_overrides(|var| env::var(var).ok()) {
        warn!(error = %e, "ignoring environment override");
    }
    cfg
}
