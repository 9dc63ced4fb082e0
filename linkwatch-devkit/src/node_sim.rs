/*!
Synthetic sensor node.

Publishes one reading per sensor topic per round, in either wire layout,
through any [`Publisher`]. Values drift slowly around a per-sensor baseline.
*/

use std::sync::Arc;

use anyhow::Result;
use sysinfo::System;

use crate::mqtt_stub::Publisher;
use crate::payloads::PayloadBuilder;

#[derive(Debug, Clone, Copy)]
pub struct SensorSpec {
    pub topic: &'static str,
    pub sensor_id: &'static str,
    pub baseline: f64,
    pub amplitude: f64,
}

pub const SENSORS: [SensorSpec; 5] = [
    SensorSpec {
        topic: "sensor/dht22/temp",
        sensor_id: "DHT22_TEMP",
        baseline: 22.0,
        amplitude: 1.5,
    },
    SensorSpec {
        topic: "sensor/dht22/humidity",
        sensor_id: "DHT22_HUMIDITY",
        baseline: 55.0,
        amplitude: 5.0,
    },
    SensorSpec {
        topic: "sensor/bmp280/temp",
        sensor_id: "BMP280_TEMP",
        baseline: 21.5,
        amplitude: 1.2,
    },
    SensorSpec {
        topic: "sensor/bmp280/pressure",
        sensor_id: "BMP280_PRESSURE",
        baseline: 1013.25,
        amplitude: 2.0,
    },
    SensorSpec {
        topic: "sensor/mq135/air_quality",
        sensor_id: "MQ135_AIR_QUALITY",
        baseline: 400.0,
        amplitude: 40.0,
    },
];

/// Value of `spec` at round `step`, rounded to two decimals.
pub fn value_at(spec: &SensorSpec, step: u64) -> f64 {
    let phase = step as f64 / 12.0 + spec.baseline.fract();
    let v = spec.baseline + spec.amplitude * phase.sin();
    (v * 100.0).round() / 100.0
}

/// Host figures the full layout carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeHealth {
    pub memory_percent: i64,
    pub cpu_freq_mhz: i64,
}

pub fn sample_node_health(sys: &mut System) -> NodeHealth {
    sys.refresh_memory();
    sys.refresh_cpu();
    let memory_percent = match sys.total_memory() {
        0 => 0,
        total => (sys.used_memory() as f64 / total as f64 * 100.0).round() as i64,
    };
    let cpu_freq_mhz = sys.cpus().first().map(|c| c.frequency() as i64).unwrap_or(0);
    NodeHealth {
        memory_percent,
        cpu_freq_mhz,
    }
}

pub struct NodeSimulator {
    publisher: Arc<dyn Publisher>,
    legacy: bool,
    step: u64,
    sys: System,
}

impl NodeSimulator {
    pub fn new(publisher: Arc<dyn Publisher>, legacy: bool) -> Self {
        Self {
            publisher,
            legacy,
            step: 0,
            sys: System::new(),
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Build the payloads of one round stamped `timestamp`.
    pub fn payloads(&self, timestamp: f64, health: NodeHealth) -> Vec<(&'static str, String)> {
        SENSORS
            .iter()
            .map(|spec| {
                let value = value_at(spec, self.step);
                let builder = PayloadBuilder::new(timestamp, spec.sensor_id, value);
                let payload = if self.legacy {
                    builder.legacy()
                } else {
                    builder
                        .link_quality(100)
                        .memory_percent(health.memory_percent)
                        .cpu_freq(health.cpu_freq_mhz)
                        .full()
                };
                (spec.topic, payload)
            })
            .collect()
    }

    /// Publish one round; returns the number of readings sent.
    pub async fn publish_round(&mut self, timestamp: f64) -> Result<usize> {
        let health = if self.legacy {
            NodeHealth::default()
        } else {
            sample_node_health(&mut self.sys)
        };
        let round = self.payloads(timestamp, health);
        for (topic, payload) in &round {
            self.publisher.publish_reading(topic, payload.clone()).await?;
            log::debug!("{} <- {}", topic, payload);
        }
        self.step += 1;
        Ok(round.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_stub::MockMqttClient;
    use linkwatch_kernel::decoder::decode_at;

    #[test]
    fn test_values_stay_near_baseline() {
        for spec in &SENSORS {
            for step in 0..100 {
                let v = value_at(spec, step);
                assert!((v - spec.baseline).abs() <= spec.amplitude + 0.01, "{spec:?} {v}");
            }
        }
    }

    #[tokio::test]
    async fn test_round_publishes_every_sensor() {
        let client = MockMqttClient::new();
        let mut sim = NodeSimulator::new(Arc::new(client.clone()), false);
        assert_eq!(sim.publish_round(1_700_000_000.0).await.unwrap(), 5);
        assert_eq!(sim.step(), 1);

        let published = client.get_published_messages();
        assert_eq!(published.len(), 5);
        for msg in &published {
            let r = decode_at(&msg.payload_text(), 0.0);
            assert!(!r.is_degraded());
            assert_eq!(r.qos, Some(1));
        }
    }

    #[tokio::test]
    async fn test_legacy_round() {
        let client = MockMqttClient::new();
        let mut sim = NodeSimulator::new(Arc::new(client.clone()), true);
        sim.publish_round(10.0).await.unwrap();
        let msg = &client.find_messages_by_topic("sensor/mq135/air_quality")[0];
        let r = decode_at(&msg.payload_text(), 0.0);
        assert_eq!(r.source_id, "MQ135_AIR_QUALITY");
        assert_eq!(r.qos, None);
    }
}
