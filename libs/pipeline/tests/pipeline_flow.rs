//! End-to-end pipeline flows: raw SHDR lines to committed observations

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use agent_buffer::CircularBuffer;
use agent_pipeline::transforms::{mqtt_pipeline, shdr_pipeline, PipelineOptions};
use agent_pipeline::{ConnectionStatus, DeviceCommand, Pipeline, PipelineContract, PipelineEntity};
use agent_types::device::{Component, DataItem, DataItemCategory, Device};
use agent_types::observation::condition;
use agent_types::{Asset, AssetCommand, ConditionLevel, Observation, ObservationPtr, SequenceNumber};

struct AgentStub {
    device: Arc<Device>,
    buffer: CircularBuffer,
    assets: Mutex<Vec<Asset>>,
    commands: Mutex<Vec<(String, DeviceCommand)>>,
    statuses: Mutex<Vec<ConnectionStatus>>,
}

impl AgentStub {
    fn new() -> Arc<Self> {
        let mut root = Component::new("dev", "Device").with_name("mill-1");
        root.add_data_item(
            DataItem::builder("X", DataItemCategory::Sample)
                .item_type("POSITION")
                .units("MILLIMETER")
                .native_units("FOOT")
                .build()
                .unwrap(),
        );
        root.add_data_item(
            DataItem::builder("C", DataItemCategory::Condition)
                .item_type("SYSTEM")
                .build()
                .unwrap(),
        );
        root.add_data_item(
            DataItem::builder("mode", DataItemCategory::Event)
                .item_type("CONTROLLER_MODE")
                .build()
                .unwrap(),
        );
        Arc::new(Self {
            device: Arc::new(Device::new("uuid-1", "mill-1", root).unwrap()),
            buffer: CircularBuffer::new(8, 16),
            assets: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
        })
    }
}

impl PipelineContract for AgentStub {
    fn find_device(&self, key: &str) -> Option<Arc<Device>> {
        (key == "mill-1" || key == "uuid-1").then(|| self.device.clone())
    }

    fn default_device(&self) -> Option<Arc<Device>> {
        Some(self.device.clone())
    }

    fn check_duplicate(&self, observation: &ObservationPtr) -> Option<ObservationPtr> {
        self.buffer.check_duplicate(observation)
    }

    fn deliver_observation(&self, observation: Observation) -> (SequenceNumber, ObservationPtr) {
        self.buffer.add(observation)
    }

    fn deliver_asset(&self, asset: Asset) {
        self.assets.lock().push(asset);
    }

    fn deliver_asset_command(&self, _: AssetCommand) {}

    fn deliver_connection_status(&self, _: &str, status: ConnectionStatus) {
        self.statuses.lock().push(status);
    }

    fn deliver_command(&self, source: &str, command: DeviceCommand) {
        self.commands.lock().push((source.to_string(), command));
    }
}

fn pipeline_for(agent: &Arc<AgentStub>) -> Pipeline {
    let options = PipelineOptions {
        source: "shdr-test".into(),
        ..Default::default()
    };
    shdr_pipeline(agent.clone(), &options)
}

fn run_line(pipeline: &Pipeline, line: &str) -> Option<PipelineEntity> {
    pipeline.run(PipelineEntity::Data { line: line.into() })
}

#[tokio::test]
async fn sample_converts_units_and_commits_at_sequence_one() {
    let agent = AgentStub::new();
    let pipeline = pipeline_for(&agent);

    let out = run_line(&pipeline, "2021-01-19T10:00:00Z|X|1").unwrap();
    let PipelineEntity::Committed(committed) = out else {
        panic!("expected committed observations, got {}", out.kind());
    };

    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].sequence(), 1);
    assert_eq!(committed[0].value_text(), "304.8");
    assert_eq!(
        committed[0].timestamp(),
        chrono::DateTime::parse_from_rfc3339("2021-01-19T10:00:00Z").unwrap()
    );
}

#[tokio::test]
async fn condition_chain_clears_after_faults() {
    let agent = AgentStub::new();
    let pipeline = pipeline_for(&agent);

    run_line(&pipeline, "|C|FAULT|A|1|HIGH|overheat").unwrap();
    run_line(&pipeline, "|C|FAULT|B|1|HIGH|jam").unwrap();
    run_line(&pipeline, "|C|NORMAL||||").unwrap();

    // Three sequences committed.
    assert_eq!(agent.buffer.lock().next_sequence(), 4);

    // The final chain is a single empty-code normal.
    let guard = agent.buffer.lock();
    let head = guard.latest().get("C").unwrap();
    assert!(condition::is_empty_normal(head));
    assert_eq!(head.condition().unwrap().level, ConditionLevel::Normal);
}

#[tokio::test]
async fn duplicate_suppression_is_idempotent() {
    let agent = AgentStub::new();
    let pipeline = pipeline_for(&agent);

    assert!(run_line(&pipeline, "|mode|AUTOMATIC").is_some());
    // The identical event is dropped before delivery.
    assert!(run_line(&pipeline, "|mode|AUTOMATIC").is_none());
    assert_eq!(agent.buffer.lock().next_sequence(), 2);

    assert!(run_line(&pipeline, "|mode|MANUAL").is_some());
    assert_eq!(agent.buffer.lock().next_sequence(), 3);
}

#[tokio::test]
async fn lowercase_events_are_upcased_before_dedup() {
    let agent = AgentStub::new();
    let pipeline = pipeline_for(&agent);

    run_line(&pipeline, "|mode|automatic").unwrap();
    assert!(run_line(&pipeline, "|mode|AUTOMATIC").is_none());
}

#[tokio::test]
async fn assets_flow_to_the_agent() {
    let agent = AgentStub::new();
    let pipeline = pipeline_for(&agent);

    let _ = run_line(
        &pipeline,
        "2021-01-19T10:00:00Z|@ASSET@|T1|CuttingTool|<CuttingTool/>",
    );
    let assets = agent.assets.lock();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].asset_id(), "T1");
}

#[tokio::test]
async fn connection_status_fans_out() {
    let agent = AgentStub::new();
    let pipeline = pipeline_for(&agent);

    let _ = pipeline.run(PipelineEntity::ConnectionStatus(ConnectionStatus::Connected));
    assert_eq!(agent.statuses.lock().as_slice(), &[ConnectionStatus::Connected]);
}

#[tokio::test]
async fn protocol_commands_reach_the_agent() {
    let agent = AgentStub::new();
    let pipeline = pipeline_for(&agent);

    let _ = pipeline.run(PipelineEntity::Command(DeviceCommand {
        command: "manufacturer".into(),
        value: "Acme".into(),
        device: Some("mill-1".into()),
    }));

    let commands = agent.commands.lock();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "shdr-test");
    assert_eq!(commands[0].1.value, "Acme");
}

#[tokio::test]
async fn mqtt_json_message_with_unknown_item_leaves_buffer_unchanged() {
    let agent = AgentStub::new();
    let options = PipelineOptions {
        source: "mqtt-test".into(),
        topics: vec![agent_codec::TopicRoute::parse("uuid-1:x/y").unwrap()],
        ..Default::default()
    };
    let pipeline = mqtt_pipeline(agent.clone(), &options);

    let before = agent.buffer.lock().next_sequence();
    let out = pipeline.run(PipelineEntity::Message {
        topic: "x/y".into(),
        payload: r#"{"dataItemId":"bogus","value":1.0}"#.into(),
    });
    assert!(out.is_none());
    assert_eq!(agent.buffer.lock().next_sequence(), before);
}

#[tokio::test]
async fn mqtt_json_message_commits_known_items() {
    let agent = AgentStub::new();
    let options = PipelineOptions {
        source: "mqtt-test".into(),
        ..Default::default()
    };
    let pipeline = mqtt_pipeline(agent.clone(), &options);

    let out = pipeline
        .run(PipelineEntity::Message {
            topic: "any".into(),
            payload: r#"{"dataItemId":"X","timestamp":"2021-01-19T10:00:00Z","value":1.0}"#.into(),
        })
        .unwrap();
    let PipelineEntity::Committed(committed) = out else {
        panic!("expected committed observations");
    };
    assert_eq!(committed[0].value_text(), "304.8");
}

#[tokio::test]
async fn mqtt_shdr_payload_routes_through_the_tokenizer() {
    let agent = AgentStub::new();
    let options = PipelineOptions {
        source: "mqtt-test".into(),
        ..Default::default()
    };
    let pipeline = mqtt_pipeline(agent.clone(), &options);

    let out = pipeline
        .run(PipelineEntity::Message {
            topic: "any".into(),
            payload: "2021-01-19T10:00:00Z|mode|AUTOMATIC".into(),
        })
        .unwrap();
    let PipelineEntity::Committed(committed) = out else {
        panic!("expected committed observations");
    };
    assert_eq!(committed[0].value_text(), "AUTOMATIC");
}
