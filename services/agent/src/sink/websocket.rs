//! The WebSocket sink
//!
//! Clients send JSON-framed requests `{"id": …, "request": …, …params}`
//! and receive framed responses bearing the same id. Streamed requests
//! (an `interval` parameter) produce repeated frames. A client that
//! falls behind its bounded outbound queue has its session closed with a
//! protocol error.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};
use warp::Filter;

use agent_buffer::ChangeObserver;

use crate::agent::Agent;
use crate::error::{AgentError, RestError, Result};
use crate::sink::handler::RequestHandler;
use crate::sink::printer::{JsonPrinter, Printer};
use crate::sink::rest::QueryParams;
use crate::sink::Sink;

const OUTBOUND_QUEUE: usize = 64;

/// Configuration for the WebSocket sink.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    pub bind: String,
    pub port: u16,
    pub default_heartbeat: Duration,
    /// Sessions idle longer than this are closed.
    pub idle_timeout: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5001,
            default_heartbeat: Duration::from_millis(10_000),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// The WebSocket sink: framed request/response and streamed
/// subscriptions over the shared handler.
pub struct WebSocketSink {
    settings: WebSocketSettings,
    handler: Arc<RequestHandler>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    bound: Mutex<Option<SocketAddr>>,
}

impl WebSocketSink {
    pub fn new(agent: Arc<Agent>, settings: WebSocketSettings) -> Arc<Self> {
        let handler = Arc::new(RequestHandler::new(agent, Arc::new(JsonPrinter)));
        Arc::new(Self {
            settings,
            handler,
            shutdown: Mutex::new(None),
            bound: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

#[async_trait]
impl Sink for WebSocketSink {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        let address: IpAddr = self.settings.bind.parse().map_err(|_| {
            AgentError::Configuration(format!("invalid bind '{}'", self.settings.bind))
        })?;

        let handler = self.handler.clone();
        let heartbeat = self.settings.default_heartbeat;
        let idle_timeout = self.settings.idle_timeout;
        let route = warp::ws().map(move |ws: warp::ws::Ws| {
            let handler = handler.clone();
            ws.on_upgrade(move |socket| session(handler, socket, heartbeat, idle_timeout))
        });

        let (tx, rx) = oneshot::channel();
        let (bound, server) = warp::serve(route)
            .try_bind_with_graceful_shutdown((address, self.settings.port), async {
                let _ = rx.await;
            })
            .map_err(|e| AgentError::Bind {
                address: format!("{}:{}", self.settings.bind, self.settings.port),
                reason: e.to_string(),
            })?;

        info!(address = %bound, "WebSocket sink listening");
        *self.bound.lock() = Some(bound);
        *self.shutdown.lock() = Some(tx);
        tokio::spawn(server);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        debug!("WebSocket sink stopped");
    }
}

async fn session(
    handler: Arc<RequestHandler>,
    socket: WebSocket,
    heartbeat: Duration,
    idle_timeout: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    let forward = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        let incoming = match tokio::time::timeout(idle_timeout, ws_rx.next()).await {
            Err(_) => {
                debug!("websocket session idle, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(incoming)) => incoming,
        };
        let message = match incoming {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "websocket receive failed");
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };
        dispatch(&handler, text, &out_tx, heartbeat).await;
    }

    forward.abort();
}

/// Parse and dispatch one request envelope.
async fn dispatch(
    handler: &Arc<RequestHandler>,
    text: &str,
    out: &mpsc::Sender<Message>,
    default_heartbeat: Duration,
) {
    let envelope: Json = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            send_error(out, Json::Null, &RestError::InvalidRequest {
                message: format!("malformed request: {}", e),
            })
            .await;
            return;
        }
    };

    let id = envelope.get("id").cloned().unwrap_or(Json::Null);
    if id.is_null() {
        send_error(out, Json::Null, &RestError::InvalidRequest {
            message: "'id' is required".to_string(),
        })
        .await;
        return;
    }
    let Some(request) = envelope.get("request").and_then(Json::as_str) else {
        send_error(out, id, &RestError::InvalidRequest {
            message: "'request' is required".to_string(),
        })
        .await;
        return;
    };

    let mut params = QueryParams::new(params_map(&envelope));
    let result = match request {
        "probe" => {
            let device = params.string("device");
            finish(params).and_then(|_| handler.probe(device.as_deref()))
        }
        "current" => {
            let device = params.string("device");
            let path = params.string("path");
            let at = params.unsigned("at");
            let interval = params.integer("interval");
            match finish(params) {
                Err(e) => Err(e),
                Ok(()) if interval.is_some() => {
                    stream_samples(
                        handler.clone(),
                        out.clone(),
                        id.clone(),
                        StreamRequest {
                            device,
                            path,
                            from: None,
                            count: 100,
                            interval: Duration::from_millis(interval.unwrap_or(0).max(0) as u64),
                            heartbeat: default_heartbeat,
                            snapshot: true,
                        },
                    );
                    return;
                }
                Ok(()) => handler.current(device.as_deref(), path.as_deref(), at),
            }
        }
        "sample" => {
            let device = params.string("device");
            let path = params.string("path");
            let from = params.unsigned("from");
            let to = params.unsigned("to");
            let count = params.integer_or("count", 100);
            let interval = params.integer("interval");
            let heartbeat = params
                .integer("heartbeat")
                .filter(|h| *h > 0)
                .map(|h| Duration::from_millis(h as u64))
                .unwrap_or(default_heartbeat);
            match finish(params) {
                Err(e) => Err(e),
                Ok(()) if interval.is_some() => {
                    stream_samples(
                        handler.clone(),
                        out.clone(),
                        id.clone(),
                        StreamRequest {
                            device,
                            path,
                            from,
                            count,
                            interval: Duration::from_millis(interval.unwrap_or(0).max(0) as u64),
                            heartbeat,
                            snapshot: false,
                        },
                    );
                    return;
                }
                Ok(()) => handler
                    .sample(device.as_deref(), path.as_deref(), from, to, count)
                    .map(|(document, _, _)| document),
            }
        }
        "assets" => {
            let device = params.string("device");
            let asset_type = params.string("type");
            let removed = params.boolean_or("removed", false);
            let count = params.integer_or("count", 100).max(1) as usize;
            finish(params).and_then(|_| {
                handler.assets(device.as_deref(), asset_type.as_deref(), removed, count)
            })
        }
        "asset" => {
            let asset_id = params.string("assetId");
            finish(params).and_then(|_| match asset_id {
                Some(asset_id) => handler.asset(&asset_id),
                None => Err(RestError::InvalidRequest {
                    message: "'assetId' is required".to_string(),
                }),
            })
        }
        other => Err(RestError::InvalidRequest {
            message: format!("unrecognized request '{}'", other),
        }),
    };

    match result {
        Ok(document) => send_response(out, id, document).await,
        Err(e) => send_error(out, id, &e).await,
    }
}

fn finish(params: QueryParams) -> std::result::Result<(), RestError> {
    params.finish()
}

/// Flatten envelope parameters into strings for shared coercion.
fn params_map(envelope: &Json) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(obj) = envelope.as_object() {
        for (key, value) in obj {
            if key == "id" || key == "request" {
                continue;
            }
            let text = match value {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            };
            map.insert(key.clone(), text);
        }
    }
    map
}

async fn send_response(out: &mpsc::Sender<Message>, id: Json, document: String) {
    let frame = json!({ "id": id, "response": document }).to_string();
    let _ = out.send(Message::text(frame)).await;
}

async fn send_error(out: &mpsc::Sender<Message>, id: Json, error: &RestError) {
    let frame = json!({ "id": id, "error": error.to_string() }).to_string();
    let _ = out.send(Message::text(frame)).await;
}

struct StreamRequest {
    device: Option<String>,
    path: Option<String>,
    from: Option<u64>,
    count: i64,
    interval: Duration,
    heartbeat: Duration,
    snapshot: bool,
}

/// Stream frames bearing the request id until the client goes away or
/// falls behind.
fn stream_samples(
    handler: Arc<RequestHandler>,
    out: mpsc::Sender<Message>,
    id: Json,
    request: StreamRequest,
) {
    tokio::spawn(async move {
        let filter = match handler.resolve_filter(request.device.as_deref(), request.path.as_deref())
        {
            Ok(filter) => filter,
            Err(e) => {
                send_error(&out, id, &e).await;
                return;
            }
        };

        let observer = ChangeObserver::new();
        match &filter {
            Some(filter) => handler.agent().observe(&observer, filter),
            None => {
                let all = handler.agent().all_data_item_ids();
                handler.agent().observe(&observer, &all);
            }
        }

        let mut from = request
            .from
            .unwrap_or_else(|| handler.agent().buffer().lock().next_sequence());
        let mut first = true;

        loop {
            if !first {
                tokio::time::sleep(request.interval).await;
            }
            first = false;

            let document = if request.snapshot {
                handler
                    .current(request.device.as_deref(), request.path.as_deref(), None)
                    .unwrap_or_else(|e| handler.render_error(&e))
            } else {
                loop {
                    let (observations, next_from, meta) =
                        handler.observations_from(filter.as_ref(), from, request.count);
                    if !observations.is_empty() {
                        from = next_from;
                        observer.consume_through(next_from.saturating_sub(1));
                        break handler.printer().print_observations(&meta, &observations);
                    }
                    if !observer.wait_for(request.heartbeat).await {
                        break handler.printer().print_observations(&meta, &[]);
                    }
                }
            };

            let frame = json!({ "id": id.clone(), "response": document }).to_string();
            match out.try_send(Message::text(frame)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // The client fell behind its queue; end the session.
                    warn!("websocket client fell behind, closing session");
                    let _ = out
                        .send(Message::text(
                            json!({
                                "id": id.clone(),
                                "error": "ProtocolError: client cannot keep up with stream",
                            })
                            .to_string(),
                        ))
                        .await;
                    let _ = out.send(Message::close()).await;
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    });
}
