use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Edge, Node, NodeId, Position, WorkflowGraph, WorkflowId};

/// Rows as held by the backing store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl From<RemoteGraph> for WorkflowGraph {
    fn from(value: RemoteGraph) -> Self {
        WorkflowGraph::new(value.nodes, value.edges)
    }
}

/// Persistence backend for workflow graphs. The transport is up to the implementor;
/// any error it returns is surfaced to editors as a remote failure.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn fetch_graph(&self, workflow_id: WorkflowId) -> Result<RemoteGraph>;

    /// Returns the stored row, which may carry server-assigned fields.
    async fn insert_node(&self, workflow_id: WorkflowId, node: &Node) -> Result<Node>;

    async fn update_node(&self, workflow_id: WorkflowId, node: &Node) -> Result<Node>;

    /// Writes positions only, leaving step data as stored. Either every move
    /// lands or none does.
    async fn move_nodes(&self, workflow_id: WorkflowId, moves: &[NodeMove]) -> Result<()>;

    async fn delete_node(&self, workflow_id: WorkflowId, node_id: NodeId) -> Result<()>;

    async fn insert_edge(&self, workflow_id: WorkflowId, edge: &Edge) -> Result<Edge>;

    async fn update_edge(&self, workflow_id: WorkflowId, edge: &Edge) -> Result<Edge>;

    async fn delete_edge(
        &self,
        workflow_id: WorkflowId,
        source: NodeId,
        target: NodeId,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMove {
    pub id: NodeId,
    pub position: Position,
}

/// One store call planned by a local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    InsertNode(Node),
    UpdateNode(Node),
    /// Position-only update; coalesced per node before it is sent.
    MoveNode(NodeMove),
    /// Positions sent together, as auto layout does.
    MoveNodes(Vec<NodeMove>),
    DeleteNode(NodeId),
    InsertEdge(Edge),
    UpdateEdge(Edge),
    DeleteEdge { source: NodeId, target: NodeId },
}

impl RemoteWrite {
    pub const fn label(&self) -> &'static str {
        match self {
            RemoteWrite::InsertNode(_) => "insert_node",
            RemoteWrite::UpdateNode(_) => "update_node",
            RemoteWrite::MoveNode(_) => "move_node",
            RemoteWrite::MoveNodes(_) => "move_nodes",
            RemoteWrite::DeleteNode(_) => "delete_node",
            RemoteWrite::InsertEdge(_) => "insert_edge",
            RemoteWrite::UpdateEdge(_) => "update_edge",
            RemoteWrite::DeleteEdge { .. } => "delete_edge",
        }
    }

    /// Rewrites local node ids the store has replaced.
    pub fn remap(&mut self, ids: &HashMap<NodeId, NodeId>) {
        let swap = |id: &mut NodeId| {
            if let Some(stored) = ids.get(id) {
                *id = *stored;
            }
        };
        match self {
            RemoteWrite::InsertNode(node) | RemoteWrite::UpdateNode(node) => swap(&mut node.id),
            RemoteWrite::MoveNode(node_move) => swap(&mut node_move.id),
            RemoteWrite::MoveNodes(moves) => {
                for node_move in moves {
                    swap(&mut node_move.id);
                }
            }
            RemoteWrite::DeleteNode(node_id) => swap(node_id),
            RemoteWrite::InsertEdge(edge) | RemoteWrite::UpdateEdge(edge) => {
                swap(&mut edge.source);
                swap(&mut edge.target);
            }
            RemoteWrite::DeleteEdge { source, target } => {
                swap(source);
                swap(target);
            }
        }
    }
}

/// Store-assigned state to fold back into the local snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Node { local_id: NodeId, stored: Node },
    Edge { stored: Edge },
    Nothing,
}

/// Executes a single planned write against the store.
pub async fn execute_write<R: RemoteStore + ?Sized>(
    remote: &R,
    workflow_id: WorkflowId,
    write: &RemoteWrite,
) -> Result<Reconciled> {
    match write {
        RemoteWrite::InsertNode(node) => {
            let stored = remote.insert_node(workflow_id, node).await?;
            Ok(Reconciled::Node {
                local_id: node.id,
                stored,
            })
        }
        RemoteWrite::UpdateNode(node) => {
            let stored = remote.update_node(workflow_id, node).await?;
            Ok(Reconciled::Node {
                local_id: node.id,
                stored,
            })
        }
        RemoteWrite::MoveNode(node_move) => {
            remote.move_nodes(workflow_id, std::slice::from_ref(node_move)).await?;
            Ok(Reconciled::Nothing)
        }
        RemoteWrite::MoveNodes(moves) => {
            remote.move_nodes(workflow_id, moves).await?;
            Ok(Reconciled::Nothing)
        }
        RemoteWrite::DeleteNode(node_id) => {
            remote.delete_node(workflow_id, *node_id).await?;
            Ok(Reconciled::Nothing)
        }
        RemoteWrite::InsertEdge(edge) => {
            let stored = remote.insert_edge(workflow_id, edge).await?;
            Ok(Reconciled::Edge { stored })
        }
        RemoteWrite::UpdateEdge(edge) => {
            let stored = remote.update_edge(workflow_id, edge).await?;
            Ok(Reconciled::Edge { stored })
        }
        RemoteWrite::DeleteEdge { source, target } => {
            remote.delete_edge(workflow_id, *source, *target).await?;
            Ok(Reconciled::Nothing)
        }
    }
}
