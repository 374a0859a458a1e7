//! The message-broker (MQTT) adapter
//!
//! One broker session per adapter. On connect it subscribes at
//! at-least-once to the configured topics (or `#` when none are given);
//! every received publish is forwarded as a message entity. Disconnects
//! and errors retry on a fixed-interval timer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use agent_pipeline::transforms::{mqtt_pipeline, PipelineOptions};
use agent_pipeline::{ConnectionStatus, Pipeline, PipelineContract, PipelineEntity};

use crate::error::{AgentError, Result};
use crate::source::{source_identity, Source};

/// Connection settings for one broker session.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub reconnect_interval: Duration,
    pub tls: Option<MqttTls>,
}

#[derive(Debug, Clone)]
pub struct MqttTls {
    pub ca_file: PathBuf,
    pub client_cert: Option<(PathBuf, PathBuf)>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            reconnect_interval: Duration::from_secs(5),
            tls: None,
        }
    }
}

/// A broker subscription feeding one pipeline.
pub struct MqttAdapter {
    identity: String,
    name: String,
    settings: MqttSettings,
    pipeline: Arc<Pipeline>,
    topics: Vec<String>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttAdapter {
    pub fn new(
        contract: Arc<dyn PipelineContract>,
        settings: MqttSettings,
        mut options: PipelineOptions,
    ) -> Arc<Self> {
        let identity = source_identity(&settings.host, settings.port);
        options.source = identity.clone();

        let topics = if options.topics.is_empty() {
            vec!["#".to_string()]
        } else {
            options.topics.iter().map(|t| t.pattern().to_string()).collect()
        };

        let pipeline = Arc::new(mqtt_pipeline(contract, &options));
        let (stop_tx, _) = watch::channel(false);

        Arc::new(Self {
            name: format!("mqtt://{}:{}", settings.host, settings.port),
            identity,
            settings,
            pipeline,
            topics,
            stop_tx,
            task: Mutex::new(None),
        })
    }

    fn status(&self, status: ConnectionStatus) {
        let _ = self.pipeline.run(PipelineEntity::ConnectionStatus(status));
    }

    fn mqtt_options(&self) -> Result<MqttOptions> {
        let mut options =
            MqttOptions::new(&self.identity, &self.settings.host, self.settings.port);
        options.set_keep_alive(Duration::from_secs(10));
        options.set_clean_session(true);

        if let Some(tls) = &self.settings.tls {
            let ca = std::fs::read(&tls.ca_file).map_err(|source| AgentError::Io {
                path: tls.ca_file.display().to_string(),
                source,
            })?;
            let client_auth = match &tls.client_cert {
                Some((cert, key)) => {
                    let cert_bytes = std::fs::read(cert).map_err(|source| AgentError::Io {
                        path: cert.display().to_string(),
                        source,
                    })?;
                    let key_bytes = std::fs::read(key).map_err(|source| AgentError::Io {
                        path: key.display().to_string(),
                        source,
                    })?;
                    Some((cert_bytes, key_bytes))
                }
                None => None,
            };
            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            }));
        }
        Ok(options)
    }

    async fn run(self: Arc<Self>) {
        let mut stop = self.stop_tx.subscribe();
        let options = match self.mqtt_options() {
            Ok(options) => options,
            Err(e) => {
                error!(adapter = %self.name, error = %e, "broker configuration invalid");
                return;
            }
        };

        let (client, mut event_loop) = AsyncClient::new(options, 32);
        let mut connected = false;

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(adapter = %self.name, "connected to broker");
                        self.subscribe(&client).await;
                        connected = true;
                        self.status(ConnectionStatus::Connected);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).to_string();
                        debug!(
                            adapter = %self.name,
                            topic = %publish.topic,
                            "received message"
                        );
                        let _ = self.pipeline.run(PipelineEntity::Message {
                            topic: publish.topic.clone(),
                            payload,
                        });
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        debug!(adapter = %self.name, id = ack.pkid, "subscription acknowledged");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(adapter = %self.name, error = %e, "broker session error");
                        if connected {
                            connected = false;
                            self.status(ConnectionStatus::Disconnected);
                        }
                        tokio::select! {
                            _ = stop.changed() => break,
                            _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
                        }
                    }
                },
            }
        }

        let _ = client.disconnect().await;
        debug!(adapter = %self.name, "broker task exited");
    }

    async fn subscribe(&self, client: &AsyncClient) {
        for topic in &self.topics {
            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                warn!(adapter = %self.name, topic = %topic, error = %e, "subscribe failed");
            }
        }
    }
}

#[async_trait]
impl Source for MqttAdapter {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        if self.task.lock().is_some() {
            return Ok(());
        }
        self.status(ConnectionStatus::Connecting);
        let adapter = self.clone();
        let handle = tokio::spawn(adapter.run());
        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        // Drop the lock guard before awaiting the task.
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.pipeline.stop();
        debug!(adapter = %self.name, "adapter stopped");
    }
}
