//! WebSocket sink behavior: the request envelope, errors and streaming

use std::sync::Arc;
use std::time::Duration;

use agent_pipeline::PipelineContract;
use agent_service::agent::{Agent, AgentSettings};
use agent_service::sink::websocket::{WebSocketSettings, WebSocketSink};
use agent_service::sink::Sink;
use agent_types::device::{Component, DataItem, DataItemCategory, Device};
use agent_types::entity::{Properties, Value};
use agent_types::Observation;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

fn test_agent() -> Arc<Agent> {
    let agent = Agent::create(AgentSettings {
        buffer_size: 8,
        checkpoint_frequency: 16,
        max_assets: 8,
        ..Default::default()
    })
    .unwrap();

    let mut root = Component::new("d_u1", "Device").with_name("mill-1");
    root.add_data_item(
        DataItem::builder("x1", DataItemCategory::Sample)
            .item_type("POSITION")
            .build()
            .unwrap(),
    );
    agent.add_device(Device::new("u1", "mill-1", root).unwrap()).unwrap();
    agent
}

async fn connect(
    agent: &Arc<Agent>,
) -> (
    Arc<WebSocketSink>,
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) {
    let sink = WebSocketSink::new(
        agent.clone(),
        WebSocketSettings {
            bind: "127.0.0.1".to_string(),
            port: 0,
            default_heartbeat: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(30),
        },
    );
    sink.clone().start().await.unwrap();
    let addr = sink.local_addr().unwrap();
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr))
        .await
        .unwrap();
    (sink, socket)
}

async fn next_json(
    socket: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame within deadline")
            .expect("socket open")
            .expect("frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn probe_request_echoes_the_id() {
    let agent = test_agent();
    let (sink, mut socket) = connect(&agent).await;

    socket
        .send(Message::text(r#"{"id":"r1","request":"probe"}"#))
        .await
        .unwrap();

    let frame = next_json(&mut socket).await;
    assert_eq!(frame["id"], "r1");
    let document: serde_json::Value =
        serde_json::from_str(frame["response"].as_str().unwrap()).unwrap();
    assert_eq!(document["MTConnectDevices"]["Devices"][0]["uuid"], "u1");

    sink.stop().await;
}

#[tokio::test]
async fn missing_id_and_unknown_request_are_errors() {
    let agent = test_agent();
    let (sink, mut socket) = connect(&agent).await;

    socket
        .send(Message::text(r#"{"request":"probe"}"#))
        .await
        .unwrap();
    let frame = next_json(&mut socket).await;
    assert!(frame["error"].as_str().unwrap().contains("'id'"));

    socket
        .send(Message::text(r#"{"id":"r2","request":"bogus"}"#))
        .await
        .unwrap();
    let frame = next_json(&mut socket).await;
    assert_eq!(frame["id"], "r2");
    assert!(frame["error"].as_str().unwrap().contains("bogus"));

    sink.stop().await;
}

#[tokio::test]
async fn streamed_sample_frames_share_the_id() {
    let agent = test_agent();
    let (sink, mut socket) = connect(&agent).await;

    socket
        .send(Message::text(
            r#"{"id":"s1","request":"sample","from":1,"count":10,"interval":20}"#,
        ))
        .await
        .unwrap();

    let producer = {
        let agent = agent.clone();
        tokio::spawn(async move {
            let item = agent.data_item("x1").unwrap();
            for n in 0..10u64 {
                let mut props = Properties::new();
                props.insert("VALUE".into(), Value::Double(n as f64));
                let obs = Observation::make(&item, &props, Utc::now()).unwrap();
                agent.deliver_observation(obs);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let first = next_json(&mut socket).await;
    let second = next_json(&mut socket).await;
    producer.abort();

    assert_eq!(first["id"], "s1");
    assert_eq!(second["id"], "s1");
    let doc: serde_json::Value =
        serde_json::from_str(first["response"].as_str().unwrap()).unwrap();
    assert!(doc["MTConnectStreams"]["Streams"].as_array().is_some());

    sink.stop().await;
}
