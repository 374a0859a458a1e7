//! SHDR adapter behavior against a scripted peer: data flow, heartbeats
//! and the reconnect bound

use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_pipeline::transforms::PipelineOptions;
use agent_service::agent::{Agent, AgentSettings, SourceBinding};
use agent_service::source::shdr::{ShdrAdapter, ShdrSettings};
use agent_service::source::Source;
use agent_types::device::{Component, DataItem, DataItemCategory, Device};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

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

fn adapter_for(
    agent: &Arc<Agent>,
    port: u16,
    reconnect: Duration,
) -> Arc<ShdrAdapter> {
    let contract: Arc<dyn agent_pipeline::PipelineContract> = agent.clone();
    let adapter = ShdrAdapter::new(
        contract,
        ShdrSettings {
            host: "127.0.0.1".to_string(),
            port,
            reconnect_interval: reconnect,
            legacy_timeout: Duration::from_secs(600),
        },
        PipelineOptions {
            device: Some("mill-1".to_string()),
            ..Default::default()
        },
    );
    agent.add_source(
        adapter.clone(),
        SourceBinding {
            devices: vec!["mill-1".to_string()],
            auto_available: true,
        },
    );
    adapter
}

async fn wait_for_value(agent: &Arc<Agent>, id: &str, value: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        {
            let guard = agent.buffer().lock();
            if let Some(obs) = guard.latest().get(id) {
                if obs.value_text() == value {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn lines_flow_into_the_buffer() {
    let agent = test_agent();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let adapter = adapter_for(&agent, port, Duration::from_millis(500));
    adapter.clone().start().await.unwrap();

    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = stream.into_split();

    // The adapter announces itself with a ping.
    let mut lines = BufReader::new(read_half).lines();
    let first = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.as_deref(), Some("* PING"));

    write_half
        .write_all(b"2021-01-19T10:00:00Z|x1|42.5\n")
        .await
        .unwrap();
    assert!(wait_for_value(&agent, "x1", "42.5", Duration::from_secs(2)).await);

    adapter.stop().await;
}

#[tokio::test]
async fn pong_negotiates_heartbeats() {
    let agent = test_agent();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let adapter = adapter_for(&agent, port, Duration::from_millis(500));
    adapter.clone().start().await.unwrap();

    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Initial ping, then negotiate a 200ms heartbeat.
    let first = lines.next_line().await.unwrap();
    assert_eq!(first.as_deref(), Some("* PING"));
    write_half.write_all(b"* PONG 200\n").await.unwrap();

    // A second ping arrives within a couple of intervals.
    let second = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("heartbeat ping")
        .unwrap();
    assert_eq!(second.as_deref(), Some("* PING"));

    adapter.stop().await;
}

#[tokio::test]
async fn multiline_bodies_aggregate() {
    let agent = test_agent();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let adapter = adapter_for(&agent, port, Duration::from_millis(500));
    adapter.clone().start().await.unwrap();

    let (stream, mut write_half) = {
        let (stream, _) = listener.accept().await.unwrap();
        let (r, w) = stream.into_split();
        (r, w)
    };
    let mut lines = BufReader::new(stream).lines();
    let _ = lines.next_line().await.unwrap();

    write_half
        .write_all(
            b"2021-01-19T10:00:00Z|@ASSET@|T1|CuttingTool|---multiline---ABCD\n<CuttingTool>\n<Life>1</Life>\n</CuttingTool>\n---ABCD---\n",
        )
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if agent.asset_storage().get("T1").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let asset = agent.asset_storage().get("T1").expect("asset stored");
    assert!(asset.body().contains("<Life>1</Life>"));

    adapter.stop().await;
}

/// The adapter reattempts within [reconnectInterval, 2 x reconnectInterval]
/// of a failure, with the interval clamped to at least 500 ms.
#[tokio::test]
async fn reconnect_happens_within_the_bound() {
    let agent = test_agent();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Interval below the minimum is clamped up.
    let adapter = adapter_for(&agent, port, Duration::from_millis(100));
    adapter.clone().start().await.unwrap();

    let (first, _) = listener.accept().await.unwrap();
    let dropped_at = Instant::now();
    drop(first);

    let (_second, _) = tokio::time::timeout(Duration::from_secs(3), listener.accept())
        .await
        .expect("reconnect attempt")
        .unwrap();
    let elapsed = dropped_at.elapsed();

    assert!(
        elapsed >= Duration::from_millis(450),
        "reconnected too fast: {elapsed:?}"
    );
    assert!(
        elapsed <= Duration::from_millis(1500),
        "reconnected too slow: {elapsed:?}"
    );

    adapter.stop().await;
}
