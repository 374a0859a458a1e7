//! The REST sink
//!
//! Routes requests by verb and path onto the shared handler: device model
//! snapshots, current state, historical ranges, assets, and streaming
//! variants of current/sample. The Accept header selects among the
//! registered printers; mutations are gated globally and by an origin
//! allow-list.

mod params;
mod stream;

pub use params::QueryParams;
pub use stream::{multipart_stream, StreamParams};

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};
use warp::hyper::Body;
use warp::reply::Response;
use warp::Filter;

use crate::agent::Agent;
use crate::error::{AgentError, RestError, Result};
use crate::sink::handler::RequestHandler;
use crate::sink::printer::{JsonPrinter, Printer};
use crate::sink::Sink;

/// Configuration for the REST sink.
#[derive(Debug, Clone)]
pub struct RestSettings {
    pub bind: String,
    pub port: u16,
    pub allow_put: bool,
    /// Remotes allowed to mutate; empty allows any when `allow_put`.
    pub allow_put_from: Vec<String>,
    pub default_heartbeat: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5000,
            allow_put: false,
            allow_put_from: Vec::new(),
            default_heartbeat: Duration::from_millis(10_000),
        }
    }
}

/// The REST sink: a warp server over the shared request handler.
pub struct RestSink {
    settings: RestSettings,
    /// One handler per registered printer; the first is the default.
    handlers: Vec<Arc<RequestHandler>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    bound: Mutex<Option<SocketAddr>>,
}

impl RestSink {
    pub fn new(agent: Arc<Agent>, settings: RestSettings) -> Arc<Self> {
        Self::with_printers(agent, settings, vec![Arc::new(JsonPrinter)])
    }

    /// Build with an explicit printer list; the first is the default and
    /// the Accept header selects among the rest.
    pub fn with_printers(
        agent: Arc<Agent>,
        settings: RestSettings,
        mut printers: Vec<Arc<dyn Printer>>,
    ) -> Arc<Self> {
        if printers.is_empty() {
            printers.push(Arc::new(JsonPrinter));
        }
        let handlers = printers
            .into_iter()
            .map(|printer| Arc::new(RequestHandler::new(agent.clone(), printer)))
            .collect();
        Arc::new(Self {
            settings,
            handlers,
            shutdown: Mutex::new(None),
            bound: Mutex::new(None),
        })
    }

    /// The bound address once started; useful when the port was 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    pub fn handler(&self) -> Arc<RequestHandler> {
        self.handlers[0].clone()
    }

    /// Pick the handler whose media type the client accepts.
    fn select(&self, accept: Option<&str>) -> Arc<RequestHandler> {
        if let Some(accept) = accept {
            for handler in &self.handlers {
                if accept.contains(handler.printer().mime())
                    || (accept.contains("xml") && handler.printer().mime().contains("xml"))
                    || (accept.contains("json") && handler.printer().mime().contains("json"))
                {
                    return handler.clone();
                }
            }
        }
        self.handlers[0].clone()
    }

    fn mutation_allowed(&self, remote: Option<SocketAddr>) -> std::result::Result<(), RestError> {
        if !self.settings.allow_put {
            return Err(RestError::Unauthorized {
                message: "mutations are disabled".to_string(),
            });
        }
        if self.settings.allow_put_from.is_empty() {
            return Ok(());
        }
        let allowed = remote
            .map(|addr| ip_allowed(&addr.ip(), &self.settings.allow_put_from))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(RestError::Unauthorized {
                message: "origin is not allowed to mutate".to_string(),
            })
        }
    }

    /// The route set, exposed for embedding and request-level tests.
    pub fn routes(self: &Arc<Self>) -> warp::filters::BoxedFilter<(Response,)> {
        let sink = self.clone();
        let with_sink = warp::any().map(move || sink.clone());
        let query = warp::query::<HashMap<String, String>>();
        let accept = warp::header::optional::<String>("accept");

        let probe = warp::get()
            .and(warp::path("probe"))
            .and(warp::path::end())
            .and(accept)
            .and(with_sink.clone())
            .map(|accept: Option<String>, sink: Arc<RestSink>| {
                let handler = sink.select(accept.as_deref());
                respond(&handler, handler.probe(None))
            });

        let device_probe = warp::get()
            .and(warp::path::param::<String>())
            .and(warp::path("probe"))
            .and(warp::path::end())
            .and(accept)
            .and(with_sink.clone())
            .map(|device: String, accept: Option<String>, sink: Arc<RestSink>| {
                let handler = sink.select(accept.as_deref());
                respond(&handler, handler.probe(Some(&device)))
            });

        let current = warp::get()
            .and(warp::path("current"))
            .and(warp::path::end())
            .and(query)
            .and(accept)
            .and(with_sink.clone())
            .map(
                |raw: HashMap<String, String>, accept: Option<String>, sink: Arc<RestSink>| {
                    sink.handle_current(None, raw, accept.as_deref())
                },
            );

        let device_current = warp::get()
            .and(warp::path::param::<String>())
            .and(warp::path("current"))
            .and(warp::path::end())
            .and(query)
            .and(accept)
            .and(with_sink.clone())
            .map(
                |device: String,
                 raw: HashMap<String, String>,
                 accept: Option<String>,
                 sink: Arc<RestSink>| {
                    sink.handle_current(Some(device), raw, accept.as_deref())
                },
            );

        let sample = warp::get()
            .and(warp::path("sample"))
            .and(warp::path::end())
            .and(query)
            .and(accept)
            .and(with_sink.clone())
            .map(
                |raw: HashMap<String, String>, accept: Option<String>, sink: Arc<RestSink>| {
                    sink.handle_sample(None, raw, accept.as_deref())
                },
            );

        let device_sample = warp::get()
            .and(warp::path::param::<String>())
            .and(warp::path("sample"))
            .and(warp::path::end())
            .and(query)
            .and(accept)
            .and(with_sink.clone())
            .map(
                |device: String,
                 raw: HashMap<String, String>,
                 accept: Option<String>,
                 sink: Arc<RestSink>| {
                    sink.handle_sample(Some(device), raw, accept.as_deref())
                },
            );

        let assets = warp::get()
            .and(warp::path("assets"))
            .and(warp::path::end())
            .and(query)
            .and(accept)
            .and(with_sink.clone())
            .map(
                |raw: HashMap<String, String>, accept: Option<String>, sink: Arc<RestSink>| {
                    sink.handle_assets(raw, accept.as_deref())
                },
            );

        let asset = warp::get()
            .and(warp::path("asset"))
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(accept)
            .and(with_sink.clone())
            .map(|id: String, accept: Option<String>, sink: Arc<RestSink>| {
                let handler = sink.select(accept.as_deref());
                respond(&handler, handler.asset(&id))
            });

        let put_asset = warp::put()
            .and(warp::path("asset"))
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(query)
            .and(warp::body::bytes())
            .and(warp::addr::remote())
            .and(with_sink.clone())
            .map(
                |id: String,
                 raw: HashMap<String, String>,
                 body: warp::hyper::body::Bytes,
                 remote: Option<SocketAddr>,
                 sink: Arc<RestSink>| {
                    sink.handle_put_asset(id, raw, body, remote)
                },
            );

        let post_asset = warp::post()
            .and(warp::path("asset"))
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(query)
            .and(warp::body::bytes())
            .and(warp::addr::remote())
            .and(with_sink.clone())
            .map(
                |id: String,
                 raw: HashMap<String, String>,
                 body: warp::hyper::body::Bytes,
                 remote: Option<SocketAddr>,
                 sink: Arc<RestSink>| {
                    sink.handle_put_asset(id, raw, body, remote)
                },
            );

        let delete_asset = warp::delete()
            .and(warp::path("asset"))
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::addr::remote())
            .and(with_sink.clone())
            .map(|id: String, remote: Option<SocketAddr>, sink: Arc<RestSink>| {
                let handler = sink.handler();
                match sink.mutation_allowed(remote) {
                    Ok(()) => respond(&handler, handler.delete_asset(&id)),
                    Err(e) => error_response(&handler, &e),
                }
            });

        let delete_assets = warp::delete()
            .and(warp::path("assets"))
            .and(warp::path::end())
            .and(query)
            .and(warp::addr::remote())
            .and(with_sink.clone())
            .map(
                |raw: HashMap<String, String>, remote: Option<SocketAddr>, sink: Arc<RestSink>| {
                    let handler = sink.handler();
                    match sink.mutation_allowed(remote) {
                        Ok(()) => {
                            let mut params = QueryParams::new(raw);
                            let device = params.string("device");
                            let asset_type = params.string("type");
                            respond(
                                &handler,
                                handler
                                    .delete_all_assets(device.as_deref(), asset_type.as_deref()),
                            )
                        }
                        Err(e) => error_response(&handler, &e),
                    }
                },
            );

        let put_device = warp::put()
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(query)
            .and(warp::addr::remote())
            .and(with_sink.clone())
            .map(
                |device: String,
                 raw: HashMap<String, String>,
                 remote: Option<SocketAddr>,
                 sink: Arc<RestSink>| {
                    let handler = sink.handler();
                    match sink.mutation_allowed(remote) {
                        Ok(()) => {
                            let values: Vec<(String, String)> = raw.into_iter().collect();
                            respond(&handler, handler.put_observations(&device, &values))
                        }
                        Err(e) => error_response(&handler, &e),
                    }
                },
            );

        let fallback = warp::any().and(with_sink).map(|sink: Arc<RestSink>| {
            let handler = sink.handler();
            error_response(
                &handler,
                &RestError::NotFound {
                    message: "no route matches the request".to_string(),
                },
            )
        });

        probe
            .or(device_probe)
            .unify()
            .or(current)
            .unify()
            .or(device_current)
            .unify()
            .or(sample)
            .unify()
            .or(device_sample)
            .unify()
            .or(assets)
            .unify()
            .or(asset)
            .unify()
            .or(put_asset)
            .unify()
            .or(post_asset)
            .unify()
            .or(delete_asset)
            .unify()
            .or(delete_assets)
            .unify()
            .or(put_device)
            .unify()
            .or(fallback)
            .unify()
            .boxed()
    }

    fn handle_current(
        &self,
        device: Option<String>,
        raw: HashMap<String, String>,
        accept: Option<&str>,
    ) -> Response {
        let handler = self.select(accept);
        let mut params = QueryParams::new(raw);
        let path = params.string("path");
        let at = params.unsigned("at");
        let interval = params.integer("interval");
        let heartbeat = params.integer("heartbeat");
        if let Err(e) = params.finish() {
            return error_response(&handler, &e);
        }

        match interval {
            Some(interval) if interval >= 0 => {
                if at.is_some() {
                    return error_response(
                        &handler,
                        &RestError::InvalidParameterValue {
                            errors: vec!["'at' cannot be combined with 'interval'".to_string()],
                        },
                    );
                }
                let filter = match handler.resolve_filter(device.as_deref(), path.as_deref()) {
                    Ok(filter) => filter,
                    Err(e) => return error_response(&handler, &e),
                };
                let from = handler.agent().buffer().lock().next_sequence();
                multipart_stream(
                    handler,
                    StreamParams {
                        filter,
                        from,
                        count: 100,
                        interval: Duration::from_millis(interval as u64),
                        heartbeat: self.heartbeat(heartbeat),
                        snapshot: true,
                        device,
                        path,
                    },
                )
            }
            _ => respond(
                &handler,
                handler.current(device.as_deref(), path.as_deref(), at),
            ),
        }
    }

    fn handle_sample(
        &self,
        device: Option<String>,
        raw: HashMap<String, String>,
        accept: Option<&str>,
    ) -> Response {
        let handler = self.select(accept);
        let mut params = QueryParams::new(raw);
        let path = params.string("path");
        let from = params.unsigned("from");
        let to = params.unsigned("to");
        let count = params.integer_or("count", 100);
        let interval = params.integer("interval");
        let heartbeat = params.integer("heartbeat");
        if let Err(e) = params.finish() {
            return error_response(&handler, &e);
        }

        match interval {
            Some(interval) if interval >= 0 => {
                let filter = match handler.resolve_filter(device.as_deref(), path.as_deref()) {
                    Ok(filter) => filter,
                    Err(e) => return error_response(&handler, &e),
                };
                let start =
                    from.unwrap_or_else(|| handler.agent().buffer().lock().next_sequence());
                multipart_stream(
                    handler,
                    StreamParams {
                        filter,
                        from: start,
                        count,
                        interval: Duration::from_millis(interval as u64),
                        heartbeat: self.heartbeat(heartbeat),
                        snapshot: false,
                        device,
                        path,
                    },
                )
            }
            _ => match handler.sample(device.as_deref(), path.as_deref(), from, to, count) {
                Ok((document, _, _)) => {
                    document_response(200, handler.printer().mime(), document)
                }
                Err(e) => error_response(&handler, &e),
            },
        }
    }

    fn handle_assets(&self, raw: HashMap<String, String>, accept: Option<&str>) -> Response {
        let handler = self.select(accept);
        let mut params = QueryParams::new(raw);
        let device = params.string("device");
        let asset_type = params.string("type");
        let removed = params.boolean_or("removed", false);
        let count = params.integer_or("count", 100);
        if count <= 0 {
            params.error("'count' must be positive");
        }
        if let Err(e) = params.finish() {
            return error_response(&handler, &e);
        }
        respond(
            &handler,
            handler.assets(
                device.as_deref(),
                asset_type.as_deref(),
                removed,
                count as usize,
            ),
        )
    }

    fn handle_put_asset(
        &self,
        id: String,
        raw: HashMap<String, String>,
        body: warp::hyper::body::Bytes,
        remote: Option<SocketAddr>,
    ) -> Response {
        let handler = self.handler();
        if let Err(e) = self.mutation_allowed(remote) {
            return error_response(&handler, &e);
        }
        let mut params = QueryParams::new(raw);
        let asset_type = params.string("type");
        let device = params.string("device");
        let body = String::from_utf8_lossy(&body).to_string();
        respond(
            &handler,
            handler.put_asset(&id, asset_type.as_deref(), device.as_deref(), body),
        )
    }

    fn heartbeat(&self, requested: Option<i64>) -> Duration {
        match requested {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            _ => self.settings.default_heartbeat,
        }
    }
}

fn respond(
    handler: &Arc<RequestHandler>,
    result: std::result::Result<String, RestError>,
) -> Response {
    match result {
        Ok(document) => document_response(200, handler.printer().mime(), document),
        Err(e) => error_response(handler, &e),
    }
}

fn error_response(handler: &Arc<RequestHandler>, error: &RestError) -> Response {
    let document = handler.render_error(error);
    document_response(error.status(), handler.printer().mime(), document)
}

fn document_response(status: u16, mime: &str, document: String) -> Response {
    warp::http::Response::builder()
        .status(status)
        .header("content-type", mime)
        .body(Body::from(document))
        .expect("document response")
}

fn ip_allowed(ip: &IpAddr, allowed: &[String]) -> bool {
    allowed.iter().any(|entry| {
        entry
            .parse::<IpAddr>()
            .map(|allowed_ip| allowed_ip == *ip)
            .unwrap_or(false)
    })
}

#[async_trait]
impl Sink for RestSink {
    fn name(&self) -> &str {
        "rest"
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        let address: IpAddr = self.settings.bind.parse().map_err(|_| {
            AgentError::Configuration(format!("invalid bind '{}'", self.settings.bind))
        })?;

        let routes = self.routes();
        let (tx, rx) = oneshot::channel();

        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown((address, self.settings.port), async {
                let _ = rx.await;
            })
            .map_err(|e| AgentError::Bind {
                address: format!("{}:{}", self.settings.bind, self.settings.port),
                reason: e.to_string(),
            })?;

        info!(address = %bound, "REST sink listening");
        *self.bound.lock() = Some(bound);
        *self.shutdown.lock() = Some(tx);
        tokio::spawn(server);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        debug!("REST sink stopped");
    }

    fn publish_observation(&self, observation: &agent_types::ObservationPtr) {
        // Streaming sessions are driven by buffer observers; nothing to
        // push here.
        let _ = observation;
    }
}
