//! Chunked streaming responses
//!
//! An `interval` parameter turns `current` and `sample` into a
//! `multipart/x-mixed-replace` stream with a random boundary. A buffer
//! observer wakes the session when a watched data item commits; when
//! nothing arrives within the heartbeat a keepalive chunk is sent.
//! Writes are one-in-flight per session: the next chunk is not produced
//! until the client consumed the previous one.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use warp::hyper::Body;
use warp::reply::Response;

use agent_buffer::{ChangeObserver, FilterSet};

use crate::sink::handler::RequestHandler;
use crate::sink::printer::Printer;

/// Parameters of one streaming session.
pub struct StreamParams {
    pub filter: Option<FilterSet>,
    pub from: u64,
    pub count: i64,
    pub interval: Duration,
    pub heartbeat: Duration,
    /// Stream current snapshots instead of sample windows.
    pub snapshot: bool,
    pub device: Option<String>,
    pub path: Option<String>,
}

struct StreamState {
    handler: Arc<RequestHandler>,
    params: StreamParams,
    observer: ChangeObserver,
    boundary: String,
    first: bool,
}

/// Build the streaming response.
pub fn multipart_stream(handler: Arc<RequestHandler>, params: StreamParams) -> Response {
    let boundary = format!("={:016x}=", rand::random::<u64>());

    let observer = ChangeObserver::new();
    match &params.filter {
        Some(filter) => handler.agent().observe(&observer, filter),
        None => {
            let all = handler.agent().all_data_item_ids();
            handler.agent().observe(&observer, &all);
        }
    }

    let mime = handler.printer().mime();
    let content_type = format!("multipart/x-mixed-replace;boundary={}", boundary);
    let state = StreamState {
        handler,
        params,
        observer,
        boundary,
        first: true,
    };

    let body = Body::wrap_stream(stream::unfold(state, move |mut state| async move {
        let chunk = state.next_chunk(mime).await;
        Some((Ok::<_, Infallible>(chunk), state))
    }));

    warp::http::Response::builder()
        .header("content-type", content_type)
        .body(body)
        .expect("streaming response")
}

impl StreamState {
    async fn next_chunk(&mut self, mime: &str) -> Vec<u8> {
        if !self.first {
            tokio::time::sleep(self.params.interval).await;
        }
        self.first = false;

        let document = if self.params.snapshot {
            self.snapshot_document()
        } else {
            self.sample_document().await
        };
        self.format_chunk(mime, &document)
    }

    fn snapshot_document(&self) -> String {
        self.handler
            .current(
                self.params.device.as_deref(),
                self.params.path.as_deref(),
                None,
            )
            .unwrap_or_else(|e| self.handler.render_error(&e))
    }

    /// Wait for matching observations or the heartbeat, whichever first.
    async fn sample_document(&mut self) -> String {
        loop {
            let (observations, next_from, meta) = self.handler.observations_from(
                self.params.filter.as_ref(),
                self.params.from,
                self.params.count,
            );
            if !observations.is_empty() {
                self.params.from = next_from;
                self.observer.consume_through(next_from.saturating_sub(1));
                return self
                    .handler
                    .printer()
                    .print_observations(&meta, &observations);
            }

            if !self.observer.wait_for(self.params.heartbeat).await {
                // Keepalive: an empty document.
                return self.handler.printer().print_observations(&meta, &[]);
            }
        }
    }

    fn format_chunk(&self, mime: &str, document: &str) -> Vec<u8> {
        format!(
            "--{}\r\nContent-type: {}\r\nContent-length: {}\r\n\r\n{}\r\n",
            self.boundary,
            mime,
            document.len(),
            document
        )
        .into_bytes()
    }
}
