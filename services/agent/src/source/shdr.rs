//! The line-oriented (SHDR) adapter
//!
//! A resilient TCP client: resolve → connect → read lines until `\n`,
//! with PONG-negotiated heartbeats, multi-line aggregation and protocol
//! command handling. Exactly one connection transition is reported per
//! connect attempt outcome; reconnects wait at least 500 ms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use agent_codec::shdr::{self, ShdrLine, ADAPTER_OPTION_COMMANDS};
use agent_pipeline::transforms::{shdr_pipeline, PipelineOptions};
use agent_pipeline::{ConnectionStatus, DeviceCommand, Pipeline, PipelineContract, PipelineEntity};

use crate::error::Result;
use crate::source::{source_identity, Source};

const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);
const MAX_HEARTBEAT: Duration = Duration::from_secs(30 * 60);

/// Called when the adapter gives up permanently.
pub type FailureHandler = Arc<dyn Fn(&str) + Send + Sync>;

fn is_true(value: &str) -> bool {
    value == "yes" || value == "true"
}

/// Connection settings for one adapter.
#[derive(Debug, Clone)]
pub struct ShdrSettings {
    pub host: String,
    pub port: u16,
    pub reconnect_interval: Duration,
    pub legacy_timeout: Duration,
}

impl Default for ShdrSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7878,
            reconnect_interval: Duration::from_secs(10),
            legacy_timeout: Duration::from_secs(600),
        }
    }
}

/// A stateful SHDR TCP client feeding one pipeline.
pub struct ShdrAdapter {
    identity: String,
    name: String,
    settings: ShdrSettings,
    contract: Arc<dyn PipelineContract>,
    options: Mutex<PipelineOptions>,
    pipeline: Mutex<Arc<Pipeline>>,
    /// Receive limit in milliseconds; legacy timeout until heartbeats are
    /// negotiated, then twice the heartbeat interval.
    receive_limit_ms: AtomicU64,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    on_failure: Mutex<Option<FailureHandler>>,
}

impl ShdrAdapter {
    pub fn new(
        contract: Arc<dyn PipelineContract>,
        mut settings: ShdrSettings,
        mut options: PipelineOptions,
    ) -> Arc<Self> {
        if settings.reconnect_interval < MIN_RECONNECT_INTERVAL {
            warn!(
                interval_ms = settings.reconnect_interval.as_millis() as u64,
                "reconnect interval too small, limiting to 500ms"
            );
            settings.reconnect_interval = MIN_RECONNECT_INTERVAL;
        }

        let identity = source_identity(&settings.host, settings.port);
        options.source = identity.clone();
        let pipeline = Arc::new(shdr_pipeline(contract.clone(), &options));
        let (stop_tx, _) = watch::channel(false);

        Arc::new(Self {
            name: format!("shdr://{}:{}", settings.host, settings.port),
            identity,
            receive_limit_ms: AtomicU64::new(settings.legacy_timeout.as_millis() as u64),
            settings,
            contract,
            options: Mutex::new(options),
            pipeline: Mutex::new(pipeline),
            stop_tx,
            task: Mutex::new(None),
            on_failure: Mutex::new(None),
        })
    }

    pub fn set_failure_handler(&self, handler: FailureHandler) {
        *self.on_failure.lock() = Some(handler);
    }

    fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.lock().clone()
    }

    fn status(&self, status: ConnectionStatus) {
        let _ = self.pipeline().run(PipelineEntity::ConnectionStatus(status));
    }

    /// The connect-and-read loop for the adapter's task.
    async fn run(self: Arc<Self>) {
        let mut stop = self.stop_tx.subscribe();
        loop {
            if *stop.borrow() {
                break;
            }

            self.status(ConnectionStatus::Connecting);
            match self.session(&mut stop).await {
                SessionEnd::Stopped => break,
                SessionEnd::ConnectFailed => {
                    self.status(ConnectionStatus::Disconnected);
                }
                SessionEnd::Lost => {
                    self.status(ConnectionStatus::Disconnected);
                }
            }

            self.receive_limit_ms.store(
                self.settings.legacy_timeout.as_millis() as u64,
                Ordering::SeqCst,
            );

            debug!(
                adapter = %self.name,
                "reconnecting in {}ms",
                self.settings.reconnect_interval.as_millis()
            );
            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
            }
        }
        debug!(adapter = %self.name, "adapter task exited");
    }

    /// One connect attempt and, on success, its read session.
    async fn session(&self, stop: &mut watch::Receiver<bool>) -> SessionEnd {
        let stream = tokio::select! {
            _ = stop.changed() => return SessionEnd::Stopped,
            result = self.connect() => match result {
                Ok(stream) => stream,
                Err(e) => {
                    error!(adapter = %self.name, error = %e, "cannot connect");
                    return SessionEnd::ConnectFailed;
                }
            },
        };

        info!(adapter = %self.name, "connected");
        let (read_half, mut write_half) = stream.into_split();
        self.status(ConnectionStatus::Connected);

        if let Err(e) = write_half.write_all(b"* PING\n").await {
            error!(adapter = %self.name, error = %e, "initial ping failed");
            return SessionEnd::Lost;
        }

        self.read_session(read_half, write_half, stop).await
    }

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let addrs: Vec<_> =
            tokio::net::lookup_host((self.settings.host.as_str(), self.settings.port))
                .await?
                .collect();
        if addrs.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot resolve {}", self.settings.host),
            ));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_linger(None)?;
                    SockRef::from(&stream).set_keepalive(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "connect failed")))
    }

    async fn read_session(
        &self,
        read_half: OwnedReadHalf,
        mut write_half: OwnedWriteHalf,
        stop: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut lines = BufReader::new(read_half).lines();
        let mut session = SessionState::default();
        // Replaced with the negotiated interval on the first PONG.
        let mut heartbeat = tokio::time::interval(Duration::from_secs(3600));
        heartbeat.reset();
        let mut heartbeats_enabled = false;

        loop {
            let limit = Duration::from_millis(self.receive_limit_ms.load(Ordering::SeqCst));
            tokio::select! {
                _ = stop.changed() => return SessionEnd::Stopped,
                _ = heartbeat.tick(), if heartbeats_enabled => {
                    trace!(adapter = %self.name, "sending heartbeat");
                    if let Err(e) = write_half.write_all(b"* PING\n").await {
                        error!(adapter = %self.name, error = %e, "heartbeat write failed");
                        return SessionEnd::Lost;
                    }
                }
                read = timeout(limit, lines.next_line()) => match read {
                    Err(_) => {
                        warn!(
                            adapter = %self.name,
                            "no data received for {}ms, reconnecting", limit.as_millis()
                        );
                        return SessionEnd::Lost;
                    }
                    Ok(Ok(Some(line))) => {
                        if let Some(interval) = self.process_line(&line, &mut session) {
                            if !heartbeats_enabled {
                                info!(
                                    adapter = %self.name,
                                    "starting heartbeats every {}ms", interval.as_millis()
                                );
                                self.receive_limit_ms
                                    .store(2 * interval.as_millis() as u64, Ordering::SeqCst);
                                heartbeat = tokio::time::interval(interval);
                                heartbeat.reset();
                                heartbeats_enabled = true;
                            }
                        }
                    }
                    Ok(Ok(None)) => {
                        warn!(adapter = %self.name, "connection closed by peer");
                        return SessionEnd::Lost;
                    }
                    Ok(Err(e)) => {
                        error!(adapter = %self.name, error = %e, "read failed");
                        return SessionEnd::Lost;
                    }
                },
            }
        }
    }

    /// Handle one received line. Returns a heartbeat interval when a PONG
    /// negotiates one.
    fn process_line(&self, line: &str, session: &mut SessionState) -> Option<Duration> {
        let trimmed = line.trim_end();
        trace!(adapter = %self.name, line = trimmed, "received");

        // Multi-line bodies aggregate verbatim until the terminator.
        if let Some((terminator, body)) = session.multiline.as_mut() {
            if trimmed == terminator {
                let data = body.join("\n");
                session.multiline = None;
                let _ = self.pipeline().run(PipelineEntity::Data { line: data });
            } else {
                body.push(trimmed.to_string());
            }
            return None;
        }

        match shdr::classify(trimmed) {
            Ok(ShdrLine::Blank) => None,
            Ok(ShdrLine::Pong(ms)) => {
                let ms = ms?;
                let interval = Duration::from_millis(ms);
                if interval > Duration::ZERO && interval < MAX_HEARTBEAT {
                    Some(interval)
                } else {
                    warn!(adapter = %self.name, ms, "ignoring out-of-range heartbeat");
                    None
                }
            }
            Ok(ShdrLine::Command { name, value }) => {
                self.protocol_command(&name, &value);
                None
            }
            Ok(ShdrLine::MultilineBegin { prefix, tag }) => {
                session.multiline = Some((shdr::multiline_end(&tag), vec![prefix]));
                None
            }
            Ok(ShdrLine::Data(data)) => {
                let _ = self.pipeline().run(PipelineEntity::Data { line: data });
                None
            }
            Err(e) => {
                warn!(adapter = %self.name, error = %e, "dropping line");
                None
            }
        }
    }

    /// Option commands reconfigure the adapter; everything else is
    /// forwarded to the agent as a device command.
    fn protocol_command(&self, name: &str, value: &str) {
        if ADAPTER_OPTION_COMMANDS.contains(&name) {
            let mut options = self.options.lock();
            match name {
                "conversionrequired" => options.conversion_required = is_true(value),
                "relativetime" => options.relative_time = is_true(value),
                "realtime" => debug!(adapter = %self.name, "realtime scheduling not applied"),
                "device" => options.device = Some(value.to_string()),
                "shdrversion" => debug!(adapter = %self.name, version = value, "shdr version"),
                _ => {}
            }
            let rebuilt = Arc::new(shdr_pipeline(self.contract.clone(), &options));
            drop(options);
            let old = std::mem::replace(&mut *self.pipeline.lock(), rebuilt);
            old.stop();
            return;
        }

        let device = self.options.lock().device.clone();
        let _ = self.pipeline().run(PipelineEntity::Command(DeviceCommand {
            command: name.to_string(),
            value: value.to_string(),
            device,
        }));
    }
}

enum SessionEnd {
    Stopped,
    ConnectFailed,
    Lost,
}

#[derive(Default)]
struct SessionState {
    /// Active multi-line aggregation: (terminator, collected lines).
    multiline: Option<(String, Vec<String>)>,
}

#[async_trait]
impl Source for ShdrAdapter {
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

        let adapter = self.clone();
        let identity = self.identity.clone();
        let on_failure = self.on_failure.lock().clone();
        let handle = tokio::spawn(async move {
            let stopped = adapter.stop_tx.subscribe();
            adapter.clone().run().await;
            if !*stopped.borrow() {
                if let Some(handler) = on_failure {
                    handler(&identity);
                }
            }
        });
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
        self.pipeline().stop();
        debug!(adapter = %self.name, "adapter stopped");
    }
}
