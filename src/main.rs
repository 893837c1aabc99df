//! mqtt-demo - exercises the resilient client against a live broker
//!
//! Subscribes to a pose stream, an echo topic and a quit topic, and publishes
//! a heartbeat every few ticks. Stop the broker while it runs to watch the
//! client back off, reconnect and replay its subscriptions.

use chrono::Utc;
use clap::Parser;
use resilient_mqtt::observability::init_default_logging;
use resilient_mqtt::{ClientConfig, MqttTransport, QoS, ResilientClient};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_FILE: &str = "mqtt-demo.toml";
const HEARTBEAT_EVERY_TICKS: u64 = 20;

/// Demo client for the resilient MQTT engine
#[derive(Parser)]
#[command(name = "mqtt-demo")]
#[command(about = "Self-healing MQTT publish/subscribe demo")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./mqtt-demo.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, overrides the configuration file
    #[arg(short, long, env = "MQTT_BROKER_URL")]
    broker_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Pose {
    xyz: Vec<f64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-demo v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_demo(config).await {
        error!("Demo failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(path)?
        }
        None if default_path.exists() => {
            info!("Loading configuration from: {}", default_path.display());
            ClientConfig::load_from_file(default_path)?
        }
        None => {
            info!("No configuration file, using built-in defaults");
            ClientConfig::for_broker("mqtt://127.0.0.1:1883")
        }
    };

    if let Some(broker_url) = &cli.broker_url {
        config.mqtt.broker_url = broker_url.clone();
        config.validate()?;
    }
    Ok(config)
}

fn register_subscriptions(client: &ResilientClient<MqttTransport>, quit: &Arc<AtomicBool>) {
    client.subscribe("/localization/pose", QoS::AtMostOnce, |payload| {
        match serde_json::from_slice::<Pose>(payload) {
            Ok(pose) if pose.xyz.len() >= 3 => {
                info!(x = pose.xyz[0], y = pose.xyz[1], z = pose.xyz[2], "Pose");
            }
            Ok(pose) => warn!(len = pose.xyz.len(), "Pose needs at least 3 coordinates"),
            Err(e) => warn!("Malformed pose payload: {}", e),
        }
    });

    let quit_flag = Arc::clone(quit);
    client.subscribe("/quit", QoS::AtMostOnce, move |_| {
        info!("Quit requested over MQTT");
        quit_flag.store(true, Ordering::SeqCst);
    });

    let publisher = client.publisher();
    client.subscribe("/echo", QoS::AtMostOnce, move |payload| {
        info!(bytes = payload.len(), "Echoing to /echo/back");
        publisher.publish("/echo/back", QoS::AtMostOnce, false, payload);
    });
}

fn publish_heartbeat(client: &ResilientClient<MqttTransport>) {
    client.publish("/alive/string", QoS::ExactlyOnce, false, b"i am alive!");

    let document = serde_json::json!({
        "cmd": "alive",
        "sent_at": Utc::now().to_rfc3339(),
    });
    client.publish(
        "/alive/json",
        QoS::ExactlyOnce,
        false,
        document.to_string(),
    );
}

async fn run_demo(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(broker = %config.mqtt.broker_url, "Creating resilient MQTT client");
    let client = ResilientClient::from_config(&config, tokio::runtime::Handle::current())?;

    let quit = Arc::new(AtomicBool::new(false));
    register_subscriptions(&client, &quit);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(config.engine.poll_interval());
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => {
                client.poll_once();
                ticks += 1;
                if ticks % HEARTBEAT_EVERY_TICKS == 0 {
                    publish_heartbeat(&client);
                }
                if quit.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    client.shutdown();
    info!(
        metrics = %serde_json::to_string(&client.metrics())?,
        "Client stopped"
    );
    Ok(())
}
