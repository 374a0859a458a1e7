//! The standard transform set and pipeline composition
//!
//! Adapter pipelines compose, in order: tokenize → timestamp → map →
//! upcase → convert → duplicate filter → delta filter → period filter →
//! deliver. Any stage may be omitted by configuration. Entities that skip
//! the data path (observations from the loopback source, assets,
//! connection status, commands) enter at their own roots.

#[cfg(test)]
pub(crate) mod test_support;

mod convert_sample;
mod deliver;
mod delta_filter;
mod duplicate_filter;
mod json_mapper;
mod period_filter;
mod shdr_token_mapper;
mod shdr_tokenizer;
mod timestamp_extractor;
mod topic_mapper;
mod upcase_value;

pub use convert_sample::ConvertSample;
pub use deliver::{
    DeliverAsset, DeliverAssetCommand, DeliverCommand, DeliverConnectionStatus,
    DeliverObservation,
};
pub use delta_filter::DeltaFilter;
pub use duplicate_filter::DuplicateFilter;
pub use json_mapper::JsonMapper;
pub use period_filter::PeriodFilter;
pub use shdr_token_mapper::ShdrTokenMapper;
pub use shdr_tokenizer::ShdrTokenizer;
pub use timestamp_extractor::{ExtractTimestamp, IgnoreTimestamp};
pub use topic_mapper::{DataMapper, TopicMapper};
pub use upcase_value::UpcaseValue;

use std::sync::Arc;

use agent_codec::TopicRoute;

use crate::{Node, Pipeline, PipelineContract, Transform};

/// Configuration for a source's pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Source identity, stamped into status and command deliveries.
    pub source: String,
    /// Default device for unqualified data item keys.
    pub device: Option<String>,
    /// Interpret embedded timestamps relative to first sight.
    pub relative_time: bool,
    /// Discard embedded timestamps and use the wall clock.
    pub ignore_timestamps: bool,
    /// Apply declared unit conversions to samples.
    pub conversion_required: bool,
    /// Upper-case event values into the controlled vocabulary.
    pub upcase_values: bool,
    /// Drop duplicate observations against the latest checkpoint.
    pub filter_duplicates: bool,
    /// Configured broker topic routes; empty subscribes everything.
    pub topics: Vec<TopicRoute>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            source: String::new(),
            device: None,
            relative_time: false,
            ignore_timestamps: false,
            conversion_required: true,
            upcase_values: true,
            filter_duplicates: true,
            topics: Vec::new(),
        }
    }
}

/// The shared observation tail: upcase → convert → duplicate → delta →
/// period → deliver, head node first.
fn observation_tail(
    contract: &Arc<dyn PipelineContract>,
    options: &PipelineOptions,
) -> Arc<Node> {
    let mut chain: Vec<Arc<dyn Transform>> = Vec::new();
    if options.upcase_values {
        chain.push(Arc::new(UpcaseValue));
    }
    if options.conversion_required {
        chain.push(Arc::new(ConvertSample));
    }
    if options.filter_duplicates {
        chain.push(Arc::new(DuplicateFilter::new(contract.clone())));
    }
    chain.push(Arc::new(DeltaFilter::new()));
    chain.push(Arc::new(PeriodFilter::new(contract.clone())));
    chain.push(Arc::new(DeliverObservation::new(contract.clone())));

    let mut next: Option<Arc<Node>> = None;
    for transform in chain.into_iter().rev() {
        let mut node = Node::new(transform);
        if let Some(succ) = next.take() {
            node = node.bind(succ);
        }
        next = Some(node.into_arc());
    }
    next.expect("tail is never empty")
}

/// Delivery nodes for the non-observation entities: assets, asset
/// commands, connection status, protocol commands.
struct ControlNodes {
    asset: Arc<Node>,
    asset_command: Arc<Node>,
    status: Arc<Node>,
    command: Arc<Node>,
}

fn control_nodes(contract: &Arc<dyn PipelineContract>, options: &PipelineOptions) -> ControlNodes {
    ControlNodes {
        asset: Node::new(Arc::new(DeliverAsset::new(
            contract.clone(),
            options.device.clone(),
        )))
        .into_arc(),
        asset_command: Node::new(Arc::new(DeliverAssetCommand::new(contract.clone()))).into_arc(),
        status: Node::new(Arc::new(DeliverConnectionStatus::new(
            contract.clone(),
            options.source.clone(),
        )))
        .into_arc(),
        command: Node::new(Arc::new(DeliverCommand::new(
            contract.clone(),
            options.source.clone(),
        )))
        .into_arc(),
    }
}

/// The pipeline for a line-oriented (SHDR) source.
pub fn shdr_pipeline(contract: Arc<dyn PipelineContract>, options: &PipelineOptions) -> Pipeline {
    let tail = observation_tail(&contract, options);
    let control = control_nodes(&contract, options);

    let mapper = Node::new(Arc::new(ShdrTokenMapper::new(
        contract.clone(),
        options.device.clone(),
    )))
    .bind(tail.clone())
    .bind(control.asset.clone())
    .bind(control.asset_command.clone())
    .into_arc();

    let timestamp: Arc<dyn Transform> = if options.ignore_timestamps {
        Arc::new(IgnoreTimestamp::new())
    } else {
        Arc::new(ExtractTimestamp::new(options.relative_time))
    };
    let timestamp = Node::new(timestamp).bind(mapper).into_arc();
    let tokenizer = Node::new(Arc::new(ShdrTokenizer)).bind(timestamp).into_arc();

    Pipeline::new(vec![
        tokenizer,
        tail,
        control.asset,
        control.asset_command,
        control.status,
        control.command,
    ])
}

/// The pipeline for a message-broker source.
pub fn mqtt_pipeline(contract: Arc<dyn PipelineContract>, options: &PipelineOptions) -> Pipeline {
    let tail = observation_tail(&contract, options);
    let control = control_nodes(&contract, options);

    let json = Node::new(Arc::new(JsonMapper::new(contract.clone())))
        .bind(tail.clone())
        .bind(control.asset.clone())
        .into_arc();
    let data = Node::new(Arc::new(DataMapper::new(
        contract.clone(),
        options,
        vec![
            tail.clone(),
            control.asset.clone(),
            control.asset_command.clone(),
        ],
    )))
    .into_arc();
    let topic = Node::new(Arc::new(TopicMapper::new(options.topics.clone())))
        .bind(json)
        .bind(data)
        .into_arc();

    Pipeline::new(vec![
        topic,
        tail,
        control.asset,
        control.asset_command,
        control.status,
        control.command,
    ])
}
