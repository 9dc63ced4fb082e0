/*!
Test harness around the kernel aggregator.

Wires a `ScriptedMetricsSource`, a record sink and a `MockMqttClient` to one
`Aggregator`, so tests can push payloads through the same path the broker
listener uses and inspect the emitted records.
*/

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use linkwatch_kernel::config::DEFAULT_TOPICS;
use linkwatch_kernel::emitter::{Aggregator, Emission};
use linkwatch_kernel::health::LinkStatus;
use linkwatch_kernel::models::{ConnectionState, InboundMessage, Record};
use linkwatch_kernel::mqtt::SUBSCRIBE_QOS;
use linkwatch_kernel::sampler::{NetworkSampler, NetworkSnapshot, NetworkState, SamplerSettings};
use linkwatch_kernel::sink::RecordSink;
use tokio::sync::mpsc;

use crate::fakes::{MemorySink, ScriptedMetricsSource};
use crate::mqtt_stub::{MockMessage, MockMqttClient};

pub struct TestHarness<S: RecordSink + 'static = MemorySink> {
    pub mqtt_client: MockMqttClient,
    pub source: Arc<ScriptedMetricsSource>,
    pub sink: Arc<S>,
    pub aggregator: Arc<Aggregator>,
    incoming: mpsc::UnboundedReceiver<MockMessage>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(MemorySink::new()))
    }

    pub fn records(&self) -> Vec<Record> {
        self.sink.records()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RecordSink + 'static> TestHarness<S> {
    /// Harness over `sink`, already connected, with a healthy network snapshot
    /// (throughput above the classifier floor).
    pub fn with_sink(sink: Arc<S>) -> Self {
        env_logger::try_init().ok();

        let mqtt_client = MockMqttClient::new();
        let incoming = mqtt_client.setup_receiver();
        let source = Arc::new(ScriptedMetricsSource::new());

        let network = NetworkState::new();
        network.publish(NetworkSnapshot {
            throughput_bps: 10_000.0,
            ..NetworkSnapshot::default()
        });

        let record_sink: Arc<dyn RecordSink> = sink.clone();
        let aggregator = Arc::new(Aggregator::new(
            network,
            source.clone(),
            record_sink,
            LinkStatus::with_state(ConnectionState::Connected),
        ));

        Self {
            mqtt_client,
            source,
            sink,
            aggregator,
            incoming,
        }
    }

    pub fn status(&self) -> &LinkStatus {
        self.aggregator.status()
    }

    pub fn network(&self) -> &NetworkState {
        self.aggregator.network()
    }

    /// Subscribe the mock client to the default sensor topics.
    pub async fn subscribe_defaults(&self) -> Result<()> {
        for topic in DEFAULT_TOPICS {
            self.mqtt_client.subscribe(topic, SUBSCRIBE_QOS).await?;
        }
        Ok(())
    }

    /// Process one payload received at `received_at` (epoch seconds).
    pub fn send_at(&self, topic: &str, payload: &str, received_at: f64) -> Emission {
        let msg = InboundMessage::new(topic, payload, 1);
        self.aggregator.handle_at(&msg, received_at)
    }

    /// Push a message through the mock broker and process everything that
    /// has arrived, in order.
    pub async fn deliver(&mut self, topic: &str, payload: &str) -> Result<Vec<Emission>> {
        self.mqtt_client.simulate_incoming(topic, payload).await?;
        Ok(self.drain())
    }

    /// Process all queued incoming messages.
    pub fn drain(&mut self) -> Vec<Emission> {
        let mut out = Vec::new();
        while let Ok(msg) = self.incoming.try_recv() {
            out.push(self.aggregator.handle(&msg.to_inbound()));
        }
        log::debug!("processed {} queued messages", out.len());
        out
    }

    /// Sampler sharing this harness's metrics source and network state.
    pub fn sampler(&self) -> NetworkSampler {
        NetworkSampler::new(
            self.source.clone(),
            self.network().clone(),
            SamplerSettings::default(),
        )
    }

    /// Run one sampler pass at `now`.
    pub async fn sample_at(&self, sampler: &mut NetworkSampler, now: Instant) -> NetworkSnapshot {
        sampler.tick_at(now).await;
        self.network().current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_at_records() {
        let harness = TestHarness::new();
        harness.send_at("sensor/dht22/temp", "1.0,DHT22_TEMP,a,20.0", 1.1);
        harness.send_at("sensor/dht22/temp", "2.0,DHT22_TEMP,b,20.5", 2.1);
        let records = harness.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].messages_per_minute, 2);
    }

    #[tokio::test]
    async fn test_deliver_through_mock_broker() {
        let mut harness = TestHarness::new();
        harness.subscribe_defaults().await.unwrap();
        assert_eq!(harness.mqtt_client.get_subscriptions().len(), 5);

        let out = harness
            .deliver("sensor/bmp280/temp", "1.0,BMP280_TEMP,a,18.0")
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record.topic, "sensor/bmp280/temp");
        assert_eq!(out[0].record.qos_level, 1);
    }
}
