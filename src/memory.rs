use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use crate::debounce::lock;
use crate::error::{LibError, Result};
use crate::models::{Edge, EdgeKind, Node, NodeId, WorkflowGraph, WorkflowId};
use crate::remote::{NodeMove, RemoteGraph, RemoteStore};

#[derive(Debug, Default)]
struct Inner {
    graphs: HashMap<WorkflowId, RemoteGraph>,
    calls: Vec<&'static str>,
    fail_next: usize,
    failing: bool,
    fail_on: Option<&'static str>,
}

/// In-process [`RemoteStore`] used by tests and the demo editor.
///
/// Failures can be injected, every call is logged, and with
/// [`MemoryStore::with_server_ids`] inserted steps get a fresh id the way a
/// database default would assign one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    server_ids: bool,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_ids(mut self) -> Self {
        self.server_ids = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn seed(&self, workflow_id: WorkflowId, graph: &WorkflowGraph) {
        let stored = RemoteGraph {
            nodes: graph.nodes.clone(),
            edges: graph.persisted_edges().cloned().collect(),
        };
        lock(&self.inner).graphs.insert(workflow_id, stored);
    }

    pub fn stored(&self, workflow_id: WorkflowId) -> RemoteGraph {
        lock(&self.inner)
            .graphs
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fails the next `count` calls.
    pub fn fail_next(&self, count: usize) {
        lock(&self.inner).fail_next = count;
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.inner).failing = failing;
    }

    /// Fails every call to `operation` until cleared with `None`.
    pub fn fail_on(&self, operation: Option<&'static str>) {
        lock(&self.inner).fail_on = operation;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.inner).calls.clone()
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = lock(&self.inner);
        inner.calls.push(operation);
        if inner.failing || inner.fail_next > 0 || inner.fail_on == Some(operation) {
            inner.fail_next = inner.fail_next.saturating_sub(1);
            debug!(operation, "memory store rejecting call");
            return Err(LibError::remote(
                "Could not save changes",
                anyhow!("memory store rejected {}", operation),
            ));
        }
        Ok(())
    }

    fn with_graph<T>(&self, workflow_id: WorkflowId, apply: impl FnOnce(&mut RemoteGraph) -> T) -> T {
        let mut inner = lock(&self.inner);
        apply(inner.graphs.entry(workflow_id).or_default())
    }
}

fn stored_node_missing(id: NodeId) -> LibError {
    LibError::not_found("Step not found", anyhow!("stored node {} does not exist", id))
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_graph(&self, workflow_id: WorkflowId) -> Result<RemoteGraph> {
        self.enter("fetch_graph").await?;
        Ok(self.stored(workflow_id))
    }

    async fn insert_node(&self, workflow_id: WorkflowId, node: &Node) -> Result<Node> {
        self.enter("insert_node").await?;
        let mut stored = node.clone();
        stored.selected = false;
        if self.server_ids {
            stored.id = NodeId::generate();
        }
        self.with_graph(workflow_id, |graph| {
            if graph.nodes.iter().any(|existing| existing.id == stored.id) {
                return Err(LibError::invalid_with_code(
                    "workflow_node_exists",
                    "A step with this id already exists",
                    anyhow!("stored node {} already exists", stored.id),
                ));
            }
            graph.nodes.push(stored.clone());
            Ok(stored)
        })
    }

    async fn update_node(&self, workflow_id: WorkflowId, node: &Node) -> Result<Node> {
        self.enter("update_node").await?;
        self.with_graph(workflow_id, |graph| {
            let existing = graph
                .nodes
                .iter_mut()
                .find(|existing| existing.id == node.id)
                .ok_or_else(|| stored_node_missing(node.id))?;
            existing.position = node.position;
            existing.data = node.data.clone();
            Ok(existing.clone())
        })
    }

    async fn move_nodes(&self, workflow_id: WorkflowId, moves: &[NodeMove]) -> Result<()> {
        self.enter("move_nodes").await?;
        self.with_graph(workflow_id, |graph| {
            let mut targets = Vec::with_capacity(moves.len());
            for node_move in moves {
                let index = graph
                    .nodes
                    .iter()
                    .position(|existing| existing.id == node_move.id)
                    .ok_or_else(|| stored_node_missing(node_move.id))?;
                targets.push((index, node_move.position));
            }
            for (index, position) in targets {
                graph.nodes[index].position = position;
            }
            Ok(())
        })
    }

    async fn delete_node(&self, workflow_id: WorkflowId, node_id: NodeId) -> Result<()> {
        self.enter("delete_node").await?;
        self.with_graph(workflow_id, |graph| {
            graph.nodes.retain(|node| node.id != node_id);
            graph.edges.retain(|edge| !edge.touches(node_id));
        });
        Ok(())
    }

    async fn insert_edge(&self, workflow_id: WorkflowId, edge: &Edge) -> Result<Edge> {
        self.enter("insert_edge").await?;
        self.with_graph(workflow_id, |graph| {
            for endpoint in [edge.source, edge.target] {
                if !graph.nodes.iter().any(|node| node.id == endpoint) {
                    return Err(stored_node_missing(endpoint));
                }
            }
            if graph.edges.iter().any(|existing| existing.key() == edge.key()) {
                return Err(LibError::duplicate(anyhow!(
                    "stored edge {} -> {} already exists",
                    edge.source,
                    edge.target
                )));
            }
            let mut stored = edge.clone();
            stored.kind = EdgeKind::Persisted;
            stored.animated = false;
            stored.selected = false;
            graph.edges.push(stored.clone());
            Ok(stored)
        })
    }

    async fn update_edge(&self, workflow_id: WorkflowId, edge: &Edge) -> Result<Edge> {
        self.enter("update_edge").await?;
        self.with_graph(workflow_id, |graph| {
            let existing = graph
                .edges
                .iter_mut()
                .find(|existing| existing.key() == edge.key())
                .ok_or_else(|| {
                    LibError::not_found(
                        "Connection not found",
                        anyhow!("stored edge {} -> {} does not exist", edge.source, edge.target),
                    )
                })?;
            existing.delay = edge.delay;
            existing.source_handle = edge.source_handle.clone();
            existing.target_handle = edge.target_handle.clone();
            Ok(existing.clone())
        })
    }

    async fn delete_edge(
        &self,
        workflow_id: WorkflowId,
        source: NodeId,
        target: NodeId,
    ) -> Result<()> {
        self.enter("delete_edge").await?;
        self.with_graph(workflow_id, |graph| {
            graph.edges.retain(|edge| edge.key() != (source, target));
        });
        Ok(())
    }
}
