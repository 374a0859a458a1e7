//! The agent binary
//!
//! Loads configuration and the device model, wires sources and sinks,
//! runs until interrupted or until the last external source fails.
//! Exits 0 on clean shutdown, 1 on a fatal configuration error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agent_pipeline::transforms::PipelineOptions;
use agent_service::agent::{Agent, AgentSettings, SourceBinding};
use agent_service::config::AgentConfig;
use agent_service::device_reader;
use agent_service::sink::rest::{RestSettings, RestSink};
use agent_service::sink::websocket::{WebSocketSettings, WebSocketSink};
use agent_service::source::mqtt::{MqttAdapter, MqttSettings, MqttTls};
use agent_service::source::shdr::{ShdrAdapter, ShdrSettings};

#[derive(Debug, Parser)]
#[command(name = "agent", about = "Telemetry agent")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device model file, overriding the configuration
    #[arg(short, long)]
    device_file: Option<PathBuf>,

    /// REST port, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `agent_service=debug`
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(device_file) = &args.device_file {
        config.device_file = Some(device_file.clone());
    }
    config.validate()?;

    let agent = Agent::create(AgentSettings {
        buffer_size: config.buffer_size,
        checkpoint_frequency: config.checkpoint_frequency,
        max_assets: config.max_assets,
        agent_uuid: format!("agent_{}", uuid::Uuid::new_v4()),
        device_file: config.device_file.clone(),
        version_device_file: config.version_device_file,
    })?;

    if let Some(device_file) = &config.device_file {
        for device in device_reader::read_devices(device_file)? {
            let device = agent.add_device(device)?;
            info!(uuid = device.uuid(), name = device.name(), "loaded device");
        }
    }

    agent.add_sink(RestSink::new(
        agent.clone(),
        RestSettings {
            bind: config.bind.clone(),
            port: config.port,
            allow_put: config.allow_put,
            allow_put_from: config.allow_put_from.clone(),
            default_heartbeat: Duration::from_millis(config.heartbeat_ms),
        },
    ));

    if let Some(port) = config.websocket_port {
        agent.add_sink(WebSocketSink::new(
            agent.clone(),
            WebSocketSettings {
                bind: config.bind.clone(),
                port,
                default_heartbeat: Duration::from_millis(config.heartbeat_ms),
                idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            },
        ));
    }

    for adapter_config in &config.adapters {
        let contract: Arc<dyn agent_pipeline::PipelineContract> = agent.clone();
        let adapter = ShdrAdapter::new(
            contract,
            ShdrSettings {
                host: adapter_config.host.clone(),
                port: adapter_config.port,
                reconnect_interval: Duration::from_millis(adapter_config.reconnect_interval_ms),
                legacy_timeout: Duration::from_millis(adapter_config.legacy_timeout_ms),
            },
            PipelineOptions {
                device: adapter_config.device.clone(),
                relative_time: adapter_config.relative_time,
                ignore_timestamps: adapter_config.ignore_timestamps,
                conversion_required: adapter_config.conversion_required,
                upcase_values: adapter_config.upcase_values,
                filter_duplicates: adapter_config.filter_duplicates,
                ..Default::default()
            },
        );
        let failure_agent = agent.clone();
        adapter.set_failure_handler(Arc::new(move |identity| {
            failure_agent.source_failed(identity);
        }));
        agent.add_source(
            adapter,
            SourceBinding {
                devices: adapter_config.device.iter().cloned().collect(),
                auto_available: adapter_config.auto_available,
            },
        );
    }

    for mqtt_config in &config.mqtt {
        let topics = mqtt_config
            .topics
            .iter()
            .map(|t| agent_codec::TopicRoute::parse(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("invalid mqtt topic: {}", e))?;

        let contract: Arc<dyn agent_pipeline::PipelineContract> = agent.clone();
        let adapter = MqttAdapter::new(
            contract,
            MqttSettings {
                host: mqtt_config.host.clone(),
                port: mqtt_config.port,
                reconnect_interval: Duration::from_millis(mqtt_config.reconnect_interval_ms),
                tls: mqtt_config.tls.as_ref().map(|tls| MqttTls {
                    ca_file: tls.ca_file.clone(),
                    client_cert: tls
                        .cert_file
                        .as_ref()
                        .zip(tls.key_file.as_ref())
                        .map(|(c, k)| (c.clone(), k.clone())),
                }),
            },
            PipelineOptions {
                device: mqtt_config.device.clone(),
                filter_duplicates: mqtt_config.filter_duplicates,
                topics,
                ..Default::default()
            },
        );
        agent.add_source(
            adapter,
            SourceBinding {
                devices: mqtt_config.device.iter().cloned().collect(),
                auto_available: mqtt_config.auto_available,
            },
        );
    }

    agent.start().await?;

    let mut shutdown = agent.shutdown_watch();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        _ = shutdown.changed() => {
            info!("agent requested shutdown");
        }
    }

    agent.stop().await;
    Ok(())
}
