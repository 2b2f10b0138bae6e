//! mqttlink - keeps a device's MQTT session alive and reports status.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, error, info};

use mqttlink::bearer::{Bearer, HostBearer};
use mqttlink::config::Config;
use mqttlink::identity::{self, DEFAULT_DEVICE_ID_PATH};
use mqttlink::logging;
use mqttlink::network::application::mqtt::Client;
use mqttlink::network::tcp::{TcpConnector, resolve};
use mqttlink::session::{ConnectionState, Dispatcher, Producer, Supervisor, ThreadDelay};

/// Self-healing MQTT session supervisor
#[derive(Parser)]
#[command(name = "mqttlink")]
#[command(about = "Keeps one MQTT broker session alive and publishes device status")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "MQTTLINK_CONFIG",
        default_value = "mqttlink.toml"
    )]
    config: PathBuf,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => None,
        1 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    };
    logging::init_default(level);

    info!("Starting mqttlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), "Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if cli.check {
        info!(path = %cli.config.display(), "Configuration is valid");
        return;
    }

    if let Err(e) = HostBearer.wait_ready() {
        error!("Bearer bring-up failed: {}", e);
        process::exit(1);
    }

    let broker = match resolve(&config.broker.host, config.broker.port) {
        Ok(broker) => broker,
        Err(e) => {
            error!(host = %config.broker.host, "Broker resolution failed: {}", e);
            process::exit(1);
        }
    };

    let identity_path = config
        .client
        .device_id_path
        .as_deref()
        .unwrap_or(DEFAULT_DEVICE_ID_PATH);
    let client_id = identity::derive_client_id(
        config.client.id.as_deref(),
        &config.client.id_prefix,
        identity::read_device_identity(Path::new(identity_path)),
    );

    if let Err(e) = run(&config, broker, &client_id) {
        error!("Startup failed: {}", e);
        process::exit(1);
    }
}

fn run(
    config: &Config,
    broker: std::net::SocketAddr,
    client_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = config.client_options(client_id)?;
    let connector = TcpConnector::new(config.timing.connect_timeout(), config.timing.io_timeout());
    let client = Arc::new(Client::new(
        connector,
        broker,
        options,
        config.buffers.rx,
        config.buffers.tx,
    )?);

    let state = ConnectionState::new();
    let dispatcher = Dispatcher::new(
        state.clone(),
        &config.topics.subscribe,
        config.buffers.payload,
    )?;

    let producer = Producer::new(
        Arc::clone(&client),
        state,
        &config.topics.publish,
        config.status.payload.as_bytes(),
        config.timing.publish_period(),
        ThreadDelay,
    );
    std::thread::Builder::new()
        .name("producer".to_string())
        .spawn(move || {
            producer.run();
        })?;

    let supervisor = Supervisor::new(
        client,
        dispatcher,
        config.timing.reconnect_delay(),
        ThreadDelay,
    );
    supervisor.run()
}
