use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::KernelConfig;
use crate::emitter::{Aggregator, Emission};
use crate::models::InboundMessage;

/// Sensor topics are subscribed at least-once.
pub const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

/// Messages buffered between the event loop and the record worker.
pub const RECORD_QUEUE: usize = 256;

pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

pub fn to_inbound(p: &Publish) -> InboundMessage {
    InboundMessage::new(p.topic.clone(), p.payload.to_vec(), qos_level(p.qos))
}

pub fn mqtt_options(cfg: &KernelConfig) -> MqttOptions {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let client_id = format!("{}-{}", cfg.mqtt.client_id_prefix, &suffix[..8]);
    let mut opts = MqttOptions::new(client_id, cfg.mqtt.host.clone(), cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs.max(5)));
    opts.set_clean_session(true);
    opts
}

/// Run the per-message pipeline, including the synchronous sink write.
///
/// On a multi-thread runtime the write runs under `block_in_place` so the
/// worker's other tasks move to another thread while the disk is busy.
pub fn process_message(aggregator: &Aggregator, msg: &InboundMessage) -> Emission {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => task::block_in_place(|| aggregator.handle(msg)),
        _ => aggregator.handle(msg),
    }
}

/// Consume inbound messages in arrival order until every sender is dropped.
///
/// Record emission lives here rather than in the event loop task, so a slow
/// sink never delays `poll()` or the keep-alive.
pub fn spawn_record_worker(
    aggregator: Arc<Aggregator>,
    mut rx: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut processed = 0u64;
        while let Some(msg) = rx.recv().await {
            process_message(&aggregator, &msg);
            processed += 1;
        }
        debug!(processed, "record worker drained");
    })
}

/// Connect, subscribe every configured topic on each (re)connection and feed
/// publishes to the aggregator until `cancel` fires. The returned task ends
/// only after every received message has been emitted.
pub fn spawn_mqtt_listener(
    cfg: &KernelConfig,
    aggregator: Arc<Aggregator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let opts = mqtt_options(cfg);
    let topics = cfg.topics.clone();
    let capacity = cfg.mqtt.channel_capacity.max(topics.len() + 1);
    let reconnect_delay = Duration::from_secs(cfg.mqtt.reconnect_delay_secs);
    let broker = format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port);

    task::spawn(async move {
        let (client, mut eventloop) = AsyncClient::new(opts, capacity);
        let status = aggregator.status().clone();
        let (tx, rx) = mpsc::channel(RECORD_QUEUE);
        let worker = spawn_record_worker(aggregator, rx);
        info!(broker = %broker, "connecting to MQTT broker");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    status.mark_connected();
                    info!(broker = %broker, "connected to MQTT broker");
                    for topic in &topics {
                        match client.subscribe(topic.as_str(), SUBSCRIBE_QOS).await {
                            Ok(()) => info!(topic = %topic, "subscribed"),
                            Err(e) => error!(topic = %topic, error = %e, "subscribe failed"),
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    if tx.send(to_inbound(&p)).await.is_err() {
                        error!(topic = %p.topic, "record worker gone, dropping message");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    status.mark_disconnected();
                    warn!("broker closed the connection");
                }
                Ok(other) => debug!(event = ?other, "mqtt event"),
                Err(e) => {
                    status.increment_reconnects();
                    warn!(
                        error = %e,
                        attempt = status.reconnects(),
                        "MQTT connection error, retrying in {}s",
                        reconnect_delay.as_secs()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "disconnect request not queued");
        }
        status.mark_disconnected();

        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "record worker ended abnormally");
        }
        info!("MQTT listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::LinkStatus;
    use crate::host::SystemMetricsSource;
    use crate::sampler::NetworkState;
    use crate::sink::{CsvSink, RecordSink};

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_level(QoS::AtMostOnce), 0);
        assert_eq!(qos_level(QoS::AtLeastOnce), 1);
        assert_eq!(qos_level(QoS::ExactlyOnce), 2);
    }

    #[test]
    fn test_publish_to_inbound() {
        let p = Publish::new("sensor/mq135/air_quality", QoS::AtLeastOnce, "1.0,MQ135,x,412.0");
        let msg = to_inbound(&p);
        assert_eq!(msg.topic, "sensor/mq135/air_quality");
        assert_eq!(msg.qos, 1);
        assert_eq!(msg.payload_text(), "1.0,MQ135,x,412.0");
    }

    #[test]
    fn test_client_id_is_unique() {
        let cfg = KernelConfig::default();
        let a = mqtt_options(&cfg);
        let b = mqtt_options(&cfg);
        assert!(a.client_id().starts_with("linkwatch-kernel-"));
        assert_ne!(a.client_id(), b.client_id());
        assert_eq!(a.broker_address(), ("localhost".to_string(), 1883));
    }

    fn csv_aggregator(path: &std::path::Path) -> (Arc<Aggregator>, Arc<CsvSink>) {
        let csv_sink = Arc::new(CsvSink::create(path).unwrap());
        let sink: Arc<dyn RecordSink> = csv_sink.clone();
        let aggregator = Aggregator::new(
            NetworkState::new(),
            Arc::new(SystemMetricsSource::new(Some("lo".into()))),
            sink,
            LinkStatus::new(),
        );
        (Arc::new(aggregator), csv_sink)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_record_worker_writes_in_order_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let (aggregator, csv_sink) = csv_aggregator(&path);

        let (tx, rx) = mpsc::channel(RECORD_QUEUE);
        let worker = spawn_record_worker(aggregator.clone(), rx);
        for i in 0..3 {
            let payload = format!("{}.0,DHT22_TEMP,m{i},2{i}.0", 1_700_000_000 + i);
            let p = Publish::new("sensor/dht22/temp", QoS::AtLeastOnce, payload);
            tx.send(to_inbound(&p)).await.unwrap();
        }
        drop(tx);
        worker.await.unwrap();
        csv_sink.close().unwrap();

        assert_eq!(aggregator.history().view("sensor/dht22/temp").message_count, 3);
        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].contains(",m0,"));
        assert!(rows[2].contains(",m2,"));
    }

    #[tokio::test]
    async fn test_process_message_on_current_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, _csv_sink) = csv_aggregator(&dir.path().join("out.csv"));
        let p = Publish::new("sensor/bmp280/temp", QoS::AtLeastOnce, "1.0,BMP280_TEMP,a,18.0");
        let out = process_message(&aggregator, &to_inbound(&p));
        assert!(out.stored);
        assert_eq!(out.record.sensor_id, "BMP280_TEMP");
    }
}
