//! # Agent Pipeline
//!
//! The typed observation pipeline: a directed acyclic graph of transforms
//! turning raw bytes or messages into validated observations and assets.
//!
//! Each transform declares a type guard over the entity variants it
//! accepts. Dispatch walks a node's successors and picks the first whose
//! guard accepts; a transform's `apply` returns the entity to forward or
//! `None` to drop. Control flow is strictly forward; feedback (connection
//! status, commands) enters as entities of their own variants.
//!
//! Ordering: a pipeline instance is owned by one source task and processes
//! entities to completion one at a time. The sole reorder point is the
//! period filter, which delays per-data-item emissions onto timers.

pub mod contract;
pub mod entity;
pub mod transforms;

pub use contract::PipelineContract;
pub use entity::{ConnectionStatus, DeviceCommand, PipelineEntity};

use std::sync::Arc;

use tracing::trace;

/// The outcome of evaluating a transform's guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    /// Invoke the transform
    Run,
    /// Pass to the next sibling
    Skip,
    /// Forward unchanged through this node's successors
    Continue,
}

/// A pipeline transform.
///
/// Transforms never panic on malformed input; they log and return `None`
/// to drop the entity.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn guard(&self, entity: &PipelineEntity) -> GuardAction;

    fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity>;

    /// Cancel pending timers and release resources. Called on source stop.
    fn stop(&self) {}
}

/// A node in the transform graph, owning its successors.
pub struct Node {
    transform: Arc<dyn Transform>,
    successors: Vec<Arc<Node>>,
}

impl Node {
    pub fn new(transform: Arc<dyn Transform>) -> Self {
        Self {
            transform,
            successors: Vec::new(),
        }
    }

    pub fn bind(mut self, successor: Arc<Node>) -> Self {
        self.successors.push(successor);
        self
    }

    pub fn into_arc(self) -> Arc<Node> {
        Arc::new(self)
    }
}

/// A runnable transform graph.
pub struct Pipeline {
    roots: Vec<Arc<Node>>,
    transforms: Vec<Arc<dyn Transform>>,
}

impl Pipeline {
    pub fn new(roots: Vec<Arc<Node>>) -> Self {
        let mut transforms = Vec::new();
        fn collect(node: &Arc<Node>, out: &mut Vec<Arc<dyn Transform>>) {
            if !out.iter().any(|t| Arc::ptr_eq(t, &node.transform)) {
                out.push(node.transform.clone());
            }
            for succ in &node.successors {
                collect(succ, out);
            }
        }
        for root in &roots {
            collect(root, &mut transforms);
        }
        Self { roots, transforms }
    }

    /// A straight spine of transforms, each feeding the next.
    pub fn linear(transforms: Vec<Arc<dyn Transform>>) -> Self {
        let mut next: Option<Arc<Node>> = None;
        for transform in transforms.into_iter().rev() {
            let mut node = Node::new(transform);
            if let Some(succ) = next.take() {
                node = node.bind(succ);
            }
            next = Some(node.into_arc());
        }
        Self::new(next.into_iter().collect())
    }

    /// Drive an entity through the graph. Returns the last produced
    /// entity, or `None` when a transform dropped it.
    pub fn run(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
        dispatch_nodes(&self.roots, entity)
    }

    /// Stop every transform; pending period-filter timers are cancelled.
    pub fn stop(&self) {
        for transform in &self.transforms {
            transform.stop();
        }
    }
}

/// Route `entity` to the first accepting node among `nodes`.
///
/// With no accepting node the entity is terminal and returned as-is.
pub(crate) fn dispatch_nodes(
    nodes: &[Arc<Node>],
    entity: PipelineEntity,
) -> Option<PipelineEntity> {
    for node in nodes {
        match node.transform.guard(&entity) {
            GuardAction::Run => {
                trace!(transform = node.transform.name(), kind = entity.kind(), "run");
                let produced = node.transform.apply(entity)?;
                return if node.successors.is_empty() {
                    Some(produced)
                } else {
                    dispatch_nodes(&node.successors, produced)
                };
            }
            GuardAction::Continue => {
                return dispatch_nodes(&node.successors, entity);
            }
            GuardAction::Skip => continue,
        }
    }
    Some(entity)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    impl Transform for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn guard(&self, entity: &PipelineEntity) -> GuardAction {
            match entity {
                PipelineEntity::Data { .. } => GuardAction::Run,
                _ => GuardAction::Skip,
            }
        }

        fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
            match entity {
                PipelineEntity::Data { line } => Some(PipelineEntity::Data {
                    line: format!("{}:{}", line, self.0),
                }),
                other => Some(other),
            }
        }
    }

    struct DropAll;

    impl Transform for DropAll {
        fn name(&self) -> &'static str {
            "drop"
        }

        fn guard(&self, _: &PipelineEntity) -> GuardAction {
            GuardAction::Run
        }

        fn apply(&self, _: PipelineEntity) -> Option<PipelineEntity> {
            None
        }
    }

    fn line_of(entity: &PipelineEntity) -> &str {
        match entity {
            PipelineEntity::Data { line } => line,
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn linear_pipelines_chain_in_order() {
        let pipeline = Pipeline::linear(vec![Arc::new(Tag("a")), Arc::new(Tag("b"))]);
        let out = pipeline
            .run(PipelineEntity::Data { line: "x".into() })
            .unwrap();
        assert_eq!(line_of(&out), "x:a:b");
    }

    #[test]
    fn first_accepting_successor_wins() {
        let b = Node::new(Arc::new(Tag("b"))).into_arc();
        let c = Node::new(Arc::new(Tag("c"))).into_arc();
        let root = Node::new(Arc::new(Tag("a"))).bind(b).bind(c).into_arc();

        let pipeline = Pipeline::new(vec![root]);
        let out = pipeline
            .run(PipelineEntity::Data { line: "x".into() })
            .unwrap();
        // b accepts, c never sees the entity.
        assert_eq!(line_of(&out), "x:a:b");
    }

    #[test]
    fn dropped_entities_return_none() {
        let pipeline = Pipeline::linear(vec![Arc::new(Tag("a")), Arc::new(DropAll)]);
        assert!(pipeline
            .run(PipelineEntity::Data { line: "x".into() })
            .is_none());
    }

    struct PassThrough;

    impl Transform for PassThrough {
        fn name(&self) -> &'static str {
            "pass"
        }

        fn guard(&self, _: &PipelineEntity) -> GuardAction {
            GuardAction::Continue
        }

        fn apply(&self, entity: PipelineEntity) -> Option<PipelineEntity> {
            Some(entity)
        }
    }

    #[test]
    fn continue_forwards_unchanged_through_successors() {
        let tail = Node::new(Arc::new(Tag("b"))).into_arc();
        let root = Node::new(Arc::new(PassThrough)).bind(tail).into_arc();

        let pipeline = Pipeline::new(vec![root]);
        let out = pipeline
            .run(PipelineEntity::Data { line: "x".into() })
            .unwrap();
        // The pass-through node never ran; its successor did.
        assert_eq!(line_of(&out), "x:b");
    }

    #[test]
    fn unaccepted_entities_are_terminal() {
        let pipeline = Pipeline::linear(vec![Arc::new(Tag("a"))]);
        let out = pipeline
            .run(PipelineEntity::ConnectionStatus(ConnectionStatus::Connected))
            .unwrap();
        assert!(matches!(out, PipelineEntity::ConnectionStatus(_)));
    }
}
