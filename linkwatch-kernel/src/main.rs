/**
 * LINKWATCH KERNEL - entry point
 *
 * Wires the MQTT listener, network sampler, CSV dataset sink and status API
 * around one shared Aggregator, then runs until Ctrl-C.
 */

use std::env;
use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use linkwatch_kernel::config::load_config;
use linkwatch_kernel::emitter::Aggregator;
use linkwatch_kernel::health::LinkStatus;
use linkwatch_kernel::host::SystemMetricsSource;
use linkwatch_kernel::http::{self, AppState};
use linkwatch_kernel::mqtt::spawn_mqtt_listener;
use linkwatch_kernel::sampler::{spawn_sampler, NetworkSampler, NetworkState};
use linkwatch_kernel::sink::{CsvSink, RecordSink};
use linkwatch_kernel::source::MetricsSource;

fn init_tracing() {
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LINKWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},rumqttc=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = load_config().await;
    cfg.log_config();

    let source = Arc::new(SystemMetricsSource::new(cfg.sampler.interface.clone()));
    info!(interface = source.interface(), "sampling network interface");
    let source: Arc<dyn MetricsSource> = source;

    let csv = Arc::new(
        CsvSink::create(&cfg.output.csv_path)
            .with_context(|| format!("opening dataset file {}", cfg.output.csv_path))?,
    );
    let sink: Arc<dyn RecordSink> = csv.clone();

    let network = NetworkState::new();
    let status = LinkStatus::new();
    let aggregator = Arc::new(Aggregator::new(network.clone(), source.clone(), sink, status));

    let cancel = CancellationToken::new();

    let sampler = NetworkSampler::new(source, network, cfg.sampler_settings());
    let sampler_task = spawn_sampler(sampler, cancel.clone());
    let listener_task = spawn_mqtt_listener(&cfg, aggregator.clone(), cancel.clone());

    let http_task = if cfg.http.enabled {
        let app = http::build_router(AppState::new(aggregator.clone()));
        let listener = TcpListener::bind(&cfg.http.bind)
            .await
            .with_context(|| format!("binding status API on {}", cfg.http.bind))?;
        info!("status API listening on http://{}", cfg.http.bind);
        let shutdown = cancel.clone();
        Some(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "status API stopped");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    cancel.cancel();

    for (name, task) in [("sampler", sampler_task), ("listener", listener_task)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }
    if let Some(task) = http_task {
        if let Err(e) = task.await {
            warn!(task = "http", error = %e, "task ended abnormally");
        }
    }

    if let Err(e) = aggregator.flush() {
        warn!(error = %e, "final flush failed");
    }
    csv.close().context("closing dataset file")?;

    let health = aggregator.status().get_health(aggregator.history().len());
    info!(
        records = health.records_emitted,
        sink_failures = health.sink_failures,
        sources = health.sources_tracked,
        "stopped"
    );
    Ok(())
}
