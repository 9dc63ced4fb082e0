//! Publishes synthetic sensor-node readings to an MQTT broker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use linkwatch_devkit::node_sim::NodeSimulator;
use rumqttc::{AsyncClient, MqttOptions};

#[derive(Parser)]
#[command(about = "Simulated sensor node for local linkwatch runs")]
struct Args {
    /// Broker host
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    host: String,
    /// Broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,
    /// Seconds between rounds
    #[arg(long, default_value_t = 2)]
    interval: u64,
    /// Stop after this many rounds (0 = run until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    rounds: u64,
    /// Use the 5-field legacy payload layout
    #[arg(long)]
    legacy: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let client_id = format!("node-sim-{}", std::process::id());
    let mut opts = MqttOptions::new(client_id, args.host.clone(), args.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 32);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                log::warn!("MQTT error: {e}, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let mut sim = NodeSimulator::new(Arc::new(client), args.legacy);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    log::info!(
        "publishing to {}:{} every {}s ({} layout)",
        args.host,
        args.port,
        args.interval,
        if args.legacy { "legacy" } else { "full" }
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
                let sent = sim.publish_round(now).await?;
                log::info!("round {}: {} readings", sim.step(), sent);
                if args.rounds > 0 && sim.step() >= args.rounds {
                    break;
                }
            }
        }
    }

    // let the event loop drain queued publishes
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}
