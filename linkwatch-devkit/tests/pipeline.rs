use std::sync::Arc;
use std::time::{Duration, Instant};

use linkwatch_devkit::fakes::FlakySink;
use linkwatch_devkit::node_sim::NodeSimulator;
use linkwatch_devkit::{MockMqttClient, PayloadBuilder, TestHarness};
use linkwatch_kernel::emitter::Aggregator;
use linkwatch_kernel::health::LinkStatus;
use linkwatch_kernel::models::{ConnectionState, InboundMessage, IssueCategory};
use linkwatch_kernel::sampler::NetworkState;
use linkwatch_kernel::sink::{CsvSink, RecordSink, HEADERS};

const T: f64 = 1_700_000_000.0;

#[test]
fn counters_increase_per_source_in_order() {
    let harness = TestHarness::new();
    for i in 0..3 {
        let ts = T + i as f64;
        let payload = PayloadBuilder::new(ts, "DHT22_TEMP", 21.0).full();
        harness.send_at("sensor/dht22/temp", &payload, ts + 0.02);
    }
    let payload = PayloadBuilder::new(T, "DHT22_HUMIDITY", 50.0).full();
    harness.send_at("sensor/dht22/humidity", &payload, T + 0.02);

    let records = harness.records();
    let temp: Vec<u64> = records
        .iter()
        .filter(|r| r.topic == "sensor/dht22/temp")
        .map(|r| r.messages_per_minute)
        .collect();
    assert_eq!(temp, vec![1, 2, 3]);
    let humidity = records.iter().find(|r| r.topic == "sensor/dht22/humidity").unwrap();
    assert_eq!(humidity.messages_per_minute, 1);
    assert!(records.iter().all(|r| r.issue == IssueCategory::Normal));
}

#[test]
fn sink_failure_does_not_stop_emission() {
    let harness = TestHarness::with_sink(Arc::new(FlakySink::failing_every(2)));
    let mut stored = Vec::new();
    for i in 0..4 {
        let ts = T + i as f64;
        let payload = format!("{ts},BMP280_TEMP,m{i},20.0");
        let out = harness.send_at("sensor/bmp280/temp", &payload, ts + 0.01);
        stored.push(out.stored);
    }
    assert_eq!(stored, vec![true, false, true, false]);

    let kept = harness.sink.records();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[1].messages_per_minute, 3);
    assert_eq!(kept[1].failed_deliveries, 1);

    let health = harness.status().get_health(harness.aggregator.history().len());
    assert_eq!(health.records_emitted, 2);
    assert_eq!(health.sink_failures, 2);
}

#[test]
fn history_keeps_latest_twenty_latencies() {
    let harness = TestHarness::new();
    for i in 0..25 {
        let ts = T + i as f64;
        let latency_secs = i as f64 / 1000.0;
        let payload = format!("{ts},MQ135,m,400");
        harness.send_at("sensor/mq135/air_quality", &payload, ts + latency_secs);
    }
    let view = harness.aggregator.history().view("sensor/mq135/air_quality");
    assert_eq!(view.latencies.len(), 20);
    assert!((view.latencies[0] - 5.0).abs() < 1e-3);
    assert!((view.latencies[19] - 24.0).abs() < 1e-3);
    assert_eq!(view.message_count, 25);
}

#[test]
fn malformed_payloads_are_recorded_as_unknown() {
    let harness = TestHarness::new();
    for raw in ["", "not,a,payload", "abc,S,m,1.0", "1.0,S"] {
        let out = harness.send_at("sensor/dht22/temp", raw, T);
        assert_eq!(out.record.sensor_id, "unknown");
        assert_eq!(out.record.raw_payload, raw);
    }
    assert_eq!(harness.records().len(), 4);
}

#[test]
fn connection_dominates_other_issues() {
    let harness = TestHarness::new();
    harness.status().increment_reconnects();
    harness.source.set_cpu(Some(99.0));
    let out = harness.send_at("sensor/dht22/temp", &format!("{T},DHT22_TEMP,m,20.0"), T + 2.0);
    assert_eq!(out.record.issue, IssueCategory::Connection);

    harness.status().mark_connected();
    let out = harness.send_at("sensor/dht22/temp", &format!("{T},DHT22_TEMP,m,20.0"), T + 2.0);
    assert_eq!(out.record.issue, IssueCategory::Latency);

    let out = harness.send_at("sensor/dht22/temp", &format!("{T},DHT22_TEMP,m,20.0"), T + 0.1);
    assert_eq!(out.record.issue, IssueCategory::ResourceConstraint);
}

#[tokio::test]
async fn sampler_snapshot_feeds_classification() {
    let harness = TestHarness::new();
    harness.source.push_bytes([0, 500]);
    harness.source.push_rtts([Some(12.0), Some(18.0)]);

    let mut sampler = harness.sampler();
    let t0 = Instant::now();
    let first = harness.sample_at(&mut sampler, t0 + Duration::from_secs(1)).await;
    assert_eq!(first.throughput_bps, 10_000.0);
    let second = harness.sample_at(&mut sampler, t0 + Duration::from_secs(2)).await;
    assert_eq!(second.throughput_bps, 500.0);
    assert_eq!(second.rtt_ms(), 15.0);
    assert!((second.buffer_status - 16.0).abs() < 1e-9);

    let payload = format!("{T},BMP280_PRESSURE,m,1013.2");
    let out = harness.send_at("sensor/bmp280/pressure", &payload, T + 0.05);
    assert_eq!(out.record.issue, IssueCategory::Throughput);
    assert_eq!(out.record.throughput_bps, 500.0);
    assert_eq!(out.record.rtt_ms, 15.0);
}

#[tokio::test]
async fn failed_probes_keep_previous_values() {
    let harness = TestHarness::new();
    harness.source.set_interface(None);
    harness.source.set_retransmissions(None);
    harness.source.set_cpu(None);
    harness.source.push_rtts([None]);

    let mut sampler = harness.sampler();
    let snap = harness.sample_at(&mut sampler, Instant::now()).await;
    assert!(snap.rtt_history.is_empty());
    assert_eq!(snap.link_speed_mbps, 1000);
    assert_eq!(snap.interface_errors, 0);
    assert_eq!(snap.buffer_status, 50.0);

    let out = harness.send_at("sensor/dht22/temp", &format!("{T},DHT22_TEMP,m,20.0"), T + 0.05);
    assert_eq!(out.record.cpu_percent, 0.0);
    assert_eq!(out.record.issue, IssueCategory::Normal);
}

#[test]
fn concurrent_sources_keep_independent_counts() {
    let harness = TestHarness::new();
    let topics = ["sensor/a", "sensor/b", "sensor/c", "sensor/d"];
    std::thread::scope(|scope| {
        for topic in topics {
            let agg = harness.aggregator.clone();
            scope.spawn(move || {
                for i in 0..50 {
                    let ts = T + i as f64;
                    let msg = InboundMessage::new(topic, format!("{ts},S,m,1.0"), 1);
                    agg.handle_at(&msg, ts + 0.01);
                }
            });
        }
    });
    for topic in topics {
        assert_eq!(harness.aggregator.history().view(topic).message_count, 50);
    }
    assert_eq!(harness.records().len(), 200);
}

#[tokio::test]
async fn simulated_node_through_mock_broker_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dataset/telemetry.csv");
    let csv_sink = Arc::new(CsvSink::create(&path).unwrap());
    let sink: Arc<dyn RecordSink> = csv_sink.clone();
    let aggregator = Aggregator::new(
        NetworkState::new(),
        Arc::new(linkwatch_devkit::ScriptedMetricsSource::new()),
        sink,
        LinkStatus::with_state(ConnectionState::Connected),
    );

    let broker = MockMqttClient::new();
    let mut sim = NodeSimulator::new(Arc::new(broker.clone()), false);
    sim.publish_round(T).await.unwrap();
    sim.publish_round(T + 2.0).await.unwrap();

    for msg in broker.get_published_messages() {
        aggregator.handle_at(&msg.to_inbound(), T + 3.0);
    }
    csv_sink.close().unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, HEADERS);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| r.len() == HEADERS.len()));
    assert_eq!(&rows[0][2], "DHT22_TEMP");
    assert_eq!(&rows[0][17], "1");
}
