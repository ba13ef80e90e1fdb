use std::collections::{HashMap, HashSet};

use anyhow::anyhow;

use crate::algorithms;
use crate::error::{LibError, Result};
use crate::models::{Node, NodeId, WorkflowGraph};

/// Immutable view of the persisted sub-graph used to vet prospective edges.
///
/// Building the index once and reusing it keeps repeated checks cheap while a
/// node is being dragged around the canvas.
#[derive(Debug, Clone)]
pub struct ConnectionIndex {
    adjacency: HashMap<NodeId, Vec<NodeId>>,
    persisted: HashSet<(NodeId, NodeId)>,
    /// Steps that never receive transitions.
    closed: HashSet<NodeId>,
}

impl ConnectionIndex {
    pub fn new(graph: &WorkflowGraph) -> Self {
        Self {
            adjacency: algorithms::adjacency_map(graph),
            persisted: graph.persisted_edges().map(|edge| edge.key()).collect(),
            closed: graph
                .nodes
                .iter()
                .filter(|node| !node.kind.accepts_incoming())
                .map(|node| node.id)
                .collect(),
        }
    }

    pub fn check(&self, source: NodeId, target: NodeId) -> Result<()> {
        if source == target {
            return Err(LibError::self_loop(anyhow!(
                "edge {} -> {} is a self-loop",
                source,
                target
            )));
        }
        for node_id in [source, target] {
            if !self.adjacency.contains_key(&node_id) {
                return Err(LibError::not_found(
                    "Step not found",
                    anyhow!("edge endpoint {} does not exist", node_id),
                ));
            }
        }
        if self.persisted.contains(&(source, target)) {
            return Err(LibError::duplicate(anyhow!(
                "edge {} -> {} already exists",
                source,
                target
            )));
        }
        // The new edge closes a cycle iff the source is already reachable from the target.
        if algorithms::is_reachable(&self.adjacency, target, source) {
            return Err(LibError::cycle(anyhow!(
                "edge {} -> {} would close a cycle",
                source,
                target
            )));
        }
        if self.closed.contains(&target) {
            return Err(LibError::invalid_with_code(
                "workflow_trigger_incoming",
                "The trigger cannot have incoming transitions",
                anyhow!("edge {} -> {} targets the trigger", source, target),
            ));
        }
        Ok(())
    }

    pub fn is_valid(&self, source: NodeId, target: NodeId) -> bool {
        self.check(source, target).is_ok()
    }
}

pub fn check_connection(graph: &WorkflowGraph, source: NodeId, target: NodeId) -> Result<()> {
    ConnectionIndex::new(graph).check(source, target)
}

/// Live feedback for connection drawing.
pub fn is_valid_connection(graph: &WorkflowGraph, source: NodeId, target: NodeId) -> bool {
    check_connection(graph, source, target).is_ok()
}

/// Resolves an explicit handle name, or the node kind's default handle.
pub fn resolve_source_handle<'a>(node: &Node, handle: Option<&'a str>) -> Result<&'a str> {
    let handles = node.source_handles();
    match handle {
        None => Ok(handles[0]),
        Some(name) if handles.iter().any(|known| *known == name) => Ok(name),
        Some(name) => Err(LibError::invalid_with_code(
            "workflow_unknown_handle",
            "Unknown connection point",
            anyhow!("node {} of kind {} has no handle '{}'", node.id, node.kind, name),
        )),
    }
}

/// Source handles of `source` that carry no persisted edge to a node other than `target`.
pub fn free_source_handles(
    graph: &WorkflowGraph,
    source: NodeId,
    target: NodeId,
) -> Vec<&'static str> {
    let Some(node) = graph.node(source) else {
        return Vec::new();
    };
    node.source_handles()
        .iter()
        .copied()
        .filter(|handle| {
            !graph.outgoing_edges(source).any(|edge| {
                edge.target != target
                    && edge.source_handle.as_deref().unwrap_or(node.source_handles()[0]) == *handle
            })
        })
        .collect()
}

/// Single-connection rule: a source handle may carry at most one persisted edge.
pub fn check_source_handle(
    graph: &WorkflowGraph,
    source: NodeId,
    target: NodeId,
    handle: Option<&str>,
) -> Result<()> {
    let node = graph.node(source).ok_or_else(|| {
        LibError::not_found("Step not found", anyhow!("edge source {} does not exist", source))
    })?;
    let handle = resolve_source_handle(node, handle)?;
    if free_source_handles(graph, source, target)
        .iter()
        .any(|free| *free == handle)
    {
        return Ok(());
    }
    Err(LibError::handle_occupied(anyhow!(
        "handle '{}' of node {} already has an outgoing edge",
        handle,
        source
    )))
}
