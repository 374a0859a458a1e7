//! Routing broker messages into the data or JSON paths

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use agent_codec::{TimestampExtractor, TopicRoute};

use crate::contract::PipelineContract;
use crate::transforms::{PipelineOptions, ShdrTokenMapper};
use crate::{dispatch_nodes, GuardAction, Node, PipelineEntity, Transform};

/// Matches a message's topic against the configured routes and tags the
/// payload as JSON or line data.
pub struct TopicMapper {
    routes: Vec<TopicRoute>,
}

impl TopicMapper {
    pub fn new(routes: Vec<TopicRoute>) -> Self {
        Self { routes }
    }

    fn route(&self, topic: &str) -> Option<Option<String>> {
        if self.routes.is_empty() {
            return Some(None);
        }
        self.routes
            .iter()
            .find(|r| r.matches(topic))
            .map(|r| r.device_uuid().map(str::to_string))
    }
}

impl Transform for TopicMapper {
    fn name(&self) -> &'static str {
        "TopicMapper"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::Message { .. } => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::Message { topic, payload } = entity else {
            return None;
        };

        let Some(device) = self.route(&topic) else {
            debug!(topic, "no route matches topic, dropping message");
            return None;
        };

        if payload.trim_start().starts_with('{') {
            Some(PipelineEntity::JsonMessage { device, payload })
        } else {
            Some(PipelineEntity::DataMessage {
                device,
                line: payload,
            })
        }
    }
}

/// Feeds routed line payloads through a tokenizer sub-pipeline into the
/// shared observation tail and delivery nodes.
pub struct DataMapper {
    extractor: Mutex<TimestampExtractor>,
    mapper: ShdrTokenMapper,
    targets: Vec<Arc<Node>>,
}

impl DataMapper {
    pub fn new(
        contract: Arc<dyn PipelineContract>,
        options: &PipelineOptions,
        targets: Vec<Arc<Node>>,
    ) -> Self {
        Self {
            extractor: Mutex::new(TimestampExtractor::new(options.relative_time)),
            mapper: ShdrTokenMapper::new(contract, options.device.clone()),
            targets,
        }
    }
}

impl Transform for DataMapper {
    fn name(&self) -> &'static str {
        "DataMapper"
    }

    fn guard(&self, entity: &PipelineEntity) -> GuardAction {
        match entity {
            PipelineEntity::DataMessage { .. } => GuardAction::Run,
            _ => GuardAction::Skip,
        }
    }

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        let PipelineEntity::DataMessage { device, line } = entity else {
            return None;
        };

        let mut last = None;
        for raw in line.lines() {
            let raw = raw.trim_end();
            if raw.is_empty() {
                continue;
            }
            let mut tokens = agent_codec::shdr::tokenize(raw);
            if tokens.is_empty() {
                continue;
            }
            let first = tokens.remove(0);
            let extracted = self.extractor.lock().extract(&first, Utc::now());

            let Some(mapped) = self.mapper.map_tokens(
                extracted.timestamp,
                extracted.duration,
                &tokens,
                device.as_deref(),
            ) else {
                continue;
            };

            last = dispatch_nodes(&self.targets, mapped);
        }
        last
    }
}
