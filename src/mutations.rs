//! Pure transforms over [`WorkflowGraph`] snapshots.
//!
//! Every transform leaves the receiver untouched and returns the next snapshot
//! together with the store writes needed to persist it. Validation happens
//! before anything is produced, so a rejected transform never needs rollback.

use std::collections::HashMap;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LibError, Result};
use crate::guard;
use crate::invariants;
use crate::models::{
    Delay, Edge, EdgeHandles, EdgeKind, NewEdge, NewNode, Node, NodeData, NodeId, NodeKind,
    Position, WorkflowGraph,
};
use crate::remote::{NodeMove, RemoteWrite};

pub const DEFAULT_DUPLICATE_OFFSET: Position = Position::new(40.0, 40.0);

/// Next snapshot plus the store writes that persist it.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub graph: WorkflowGraph,
    pub writes: Vec<RemoteWrite>,
    /// Node created by the transform, if any.
    pub created: Option<NodeId>,
}

impl Applied {
    fn new(graph: WorkflowGraph, writes: Vec<RemoteWrite>) -> Self {
        Self {
            graph,
            writes,
            created: None,
        }
    }

    fn unchanged(graph: &WorkflowGraph) -> Self {
        Self::new(graph.clone(), Vec::new())
    }
}

/// Rules applied when an edge is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRules {
    pub single_connection: bool,
    pub default_delay: Delay,
}

impl Default for EdgeRules {
    fn default() -> Self {
        Self {
            single_connection: false,
            default_delay: Delay::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeChange {
    Add { node: NewNode },
    Position { id: NodeId, position: Position },
    Data { id: NodeId, data: Value },
    Select { id: NodeId, selected: bool },
    Remove { id: NodeId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeChange {
    Add {
        edge: NewEdge,
    },
    Delay {
        source: NodeId,
        target: NodeId,
        delay: Delay,
    },
    Select {
        source: NodeId,
        target: NodeId,
        selected: bool,
    },
    Remove {
        source: NodeId,
        target: NodeId,
    },
}

/// A bulk item that was skipped.
#[derive(Debug)]
pub struct BulkFailure {
    pub index: usize,
    pub error: LibError,
}

/// Result of a best-effort bulk update: valid items commit, invalid ones are reported.
#[derive(Debug)]
pub struct BulkApplied {
    pub applied: Applied,
    pub committed: usize,
    pub failures: Vec<BulkFailure>,
}

fn ensure_finite(position: Position) -> Result<()> {
    if position.x.is_finite() && position.y.is_finite() {
        return Ok(());
    }
    Err(LibError::invalid(
        "Position must be a finite coordinate",
        anyhow!("invalid position ({}, {})", position.x, position.y),
    ))
}

fn node_not_found(id: NodeId) -> LibError {
    LibError::not_found("Step not found", anyhow!("node {} does not exist", id))
}

fn edge_not_found(source: NodeId, target: NodeId) -> LibError {
    LibError::not_found(
        "Connection not found",
        anyhow!("edge {} -> {} does not exist", source, target),
    )
}

impl WorkflowGraph {
    fn node_index(&self, id: NodeId) -> Result<usize> {
        self.nodes
            .iter()
            .position(|node| node.id == id)
            .ok_or_else(|| node_not_found(id))
    }

    fn edge_index(&self, source: NodeId, target: NodeId) -> Option<usize> {
        self.edges
            .iter()
            .position(|edge| edge.source == source && edge.target == target)
    }

    pub fn create_node(
        &self,
        kind: &str,
        position: Position,
        data: Option<Value>,
        id: Option<NodeId>,
    ) -> Result<Applied> {
        let kind: NodeKind = kind.parse()?;
        let data = NodeData::from_payload(kind, data)?;
        ensure_finite(position)?;

        let node_id = id.unwrap_or_else(NodeId::generate);
        if self.contains_node(node_id) {
            return Err(LibError::invalid_with_code(
                "workflow_node_exists",
                "Step already exists",
                anyhow!("duplicate node id {}", node_id),
            ));
        }
        match (kind.is_trigger(), self.trigger()) {
            (true, Some(existing)) => {
                return Err(LibError::invalid_with_code(
                    "workflow_trigger_exists",
                    "A workflow can only have one trigger",
                    anyhow!("trigger {} already exists", existing.id),
                ));
            }
            (false, None) => {
                return Err(LibError::invalid_with_code(
                    "workflow_trigger_required",
                    "Add a trigger before adding other steps",
                    anyhow!("cannot add {} node to a workflow without a trigger", kind),
                ));
            }
            _ => {}
        }

        let node = Node::new(node_id, position, data);
        let mut graph = self.clone();
        graph.nodes.push(node.clone());
        Ok(Applied {
            created: Some(node_id),
            ..Applied::new(graph, vec![RemoteWrite::InsertNode(node)])
        })
    }

    pub fn create_node_from(&self, new: NewNode) -> Result<Applied> {
        self.create_node(&new.kind, new.position, new.data, new.id)
    }

    /// A move within [`crate::models::POSITION_TOLERANCE`] is a no-op.
    pub fn move_node(&self, id: NodeId, position: Position) -> Result<Applied> {
        ensure_finite(position)?;
        let index = self.node_index(id)?;
        if self.nodes[index].position.approx_eq(&position) {
            return Ok(Applied::unchanged(self));
        }

        let mut graph = self.clone();
        graph.nodes[index].position = position;
        Ok(Applied::new(
            graph,
            vec![RemoteWrite::MoveNode(NodeMove { id, position })],
        ))
    }

    pub fn update_node_data(&self, id: NodeId, data: Value) -> Result<Applied> {
        let index = self.node_index(id)?;
        let data = NodeData::from_payload(self.nodes[index].kind, Some(data))?;
        if self.nodes[index].data == data {
            return Ok(Applied::unchanged(self));
        }

        let mut graph = self.clone();
        graph.nodes[index].data = data;
        let node = graph.nodes[index].clone();
        Ok(Applied::new(graph, vec![RemoteWrite::UpdateNode(node)]))
    }

    pub fn select_node(&self, id: NodeId, selected: bool) -> Result<Applied> {
        let index = self.node_index(id)?;
        let mut graph = self.clone();
        graph.nodes[index].selected = selected;
        Ok(Applied::new(graph, Vec::new()))
    }

    /// Removes the node and every edge that references it.
    pub fn delete_node(&self, id: NodeId) -> Result<Applied> {
        let index = self.node_index(id)?;
        if !self.nodes[index].deletable() {
            return Err(LibError::protected(
                "The trigger step cannot be deleted",
                anyhow!("node {} is not deletable", id),
            ));
        }

        let mut graph = self.clone();
        graph.nodes.remove(index);
        let mut writes = Vec::new();
        graph.edges.retain(|edge| {
            if !edge.touches(id) {
                return true;
            }
            if edge.is_persisted() {
                writes.push(RemoteWrite::DeleteEdge {
                    source: edge.source,
                    target: edge.target,
                });
            }
            false
        });
        writes.push(RemoteWrite::DeleteNode(id));
        Ok(Applied::new(graph, writes))
    }

    pub fn duplicate_node(&self, id: NodeId, offset: Option<Position>) -> Result<Applied> {
        let index = self.node_index(id)?;
        let original = &self.nodes[index];
        if original.kind.is_trigger() {
            return Err(LibError::protected(
                "The trigger step cannot be duplicated",
                anyhow!("node {} is the workflow trigger", id),
            ));
        }
        let offset = offset.unwrap_or(DEFAULT_DUPLICATE_OFFSET);
        ensure_finite(offset)?;

        let copy = Node::new(
            NodeId::generate(),
            original.position.offset(offset),
            original.data.clone(),
        );
        let mut graph = self.clone();
        graph.nodes.push(copy.clone());
        Ok(Applied {
            created: Some(copy.id),
            ..Applied::new(graph, vec![RemoteWrite::InsertNode(copy)])
        })
    }

    /// Vets the edge with the connection guard, then inserts it.
    ///
    /// An ephemeral edge replaces whatever suggestion was shown before and is never
    /// written to the store; a persisted edge supersedes a suggestion for the same pair.
    pub fn create_edge(&self, new: &NewEdge, kind: EdgeKind, rules: EdgeRules) -> Result<Applied> {
        guard::check_connection(self, new.source, new.target)?;
        let source = self.node(new.source).ok_or_else(|| node_not_found(new.source))?;
        guard::resolve_source_handle(source, new.handles.source.as_deref())?;
        if rules.single_connection {
            guard::check_source_handle(
                self,
                new.source,
                new.target,
                new.handles.source.as_deref(),
            )?;
        }
        let delay = new.delay.unwrap_or(rules.default_delay);
        delay.validate()?;

        let mut graph = self.clone();
        match kind {
            EdgeKind::Ephemeral => {
                graph.edges.retain(Edge::is_persisted);
                let edge = Edge::ephemeral(new.source, new.target, delay)
                    .with_handles(new.handles.clone());
                graph.edges.push(edge);
                Ok(Applied::new(graph, Vec::new()))
            }
            EdgeKind::Persisted => {
                graph
                    .edges
                    .retain(|edge| edge.is_persisted() || edge.key() != (new.source, new.target));
                let edge = Edge::persisted(new.source, new.target, delay)
                    .with_handles(new.handles.clone());
                graph.edges.push(edge.clone());
                Ok(Applied::new(graph, vec![RemoteWrite::InsertEdge(edge)]))
            }
        }
    }

    pub fn connect(
        &self,
        source: NodeId,
        target: NodeId,
        delay: Delay,
        handles: EdgeHandles,
    ) -> Result<Applied> {
        self.create_edge(
            &NewEdge {
                source,
                target,
                delay: Some(delay),
                handles,
            },
            EdgeKind::Persisted,
            EdgeRules::default(),
        )
    }

    /// Idempotent: deleting a missing edge is not an error.
    pub fn delete_edge(&self, source: NodeId, target: NodeId) -> Applied {
        let Some(index) = self.edge_index(source, target) else {
            return Applied::unchanged(self);
        };
        let mut graph = self.clone();
        let removed = graph.edges.remove(index);
        let writes = if removed.is_persisted() {
            vec![RemoteWrite::DeleteEdge { source, target }]
        } else {
            Vec::new()
        };
        Applied::new(graph, writes)
    }

    pub fn assign_edge_delay(&self, source: NodeId, target: NodeId, delay: Delay) -> Result<Applied> {
        let index = self
            .edge_index(source, target)
            .ok_or_else(|| edge_not_found(source, target))?;
        delay.validate()?;
        if self.edges[index].delay == delay {
            return Ok(Applied::unchanged(self));
        }

        let mut graph = self.clone();
        graph.edges[index].delay = delay;
        let edge = graph.edges[index].clone();
        let writes = if edge.is_persisted() {
            vec![RemoteWrite::UpdateEdge(edge)]
        } else {
            Vec::new()
        };
        Ok(Applied::new(graph, writes))
    }

    pub fn select_edge(&self, source: NodeId, target: NodeId, selected: bool) -> Result<Applied> {
        let index = self
            .edge_index(source, target)
            .ok_or_else(|| edge_not_found(source, target))?;
        let mut graph = self.clone();
        graph.edges[index].selected = selected;
        Ok(Applied::new(graph, Vec::new()))
    }

    pub fn clear_suggestion(&self) -> Applied {
        if self.ephemeral_edge().is_none() {
            return Applied::unchanged(self);
        }
        let mut graph = self.clone();
        graph.edges.retain(Edge::is_persisted);
        Applied::new(graph, Vec::new())
    }

    pub fn update_nodes(&self, changes: Vec<NodeChange>) -> BulkApplied {
        self.apply_bulk(changes, |graph, change| match change {
            NodeChange::Add { node } => graph.create_node_from(node),
            NodeChange::Position { id, position } => graph.move_node(id, position),
            NodeChange::Data { id, data } => graph.update_node_data(id, data),
            NodeChange::Select { id, selected } => graph.select_node(id, selected),
            NodeChange::Remove { id } => graph.delete_node(id),
        })
    }

    pub fn update_edges(&self, changes: Vec<EdgeChange>, rules: EdgeRules) -> BulkApplied {
        self.apply_bulk(changes, |graph, change| match change {
            EdgeChange::Add { edge } => graph.create_edge(&edge, EdgeKind::Persisted, rules),
            EdgeChange::Delay {
                source,
                target,
                delay,
            } => graph.assign_edge_delay(source, target, delay),
            EdgeChange::Select {
                source,
                target,
                selected,
            } => graph.select_edge(source, target, selected),
            EdgeChange::Remove { source, target } => Ok(graph.delete_edge(source, target)),
        })
    }

    fn apply_bulk<C>(
        &self,
        changes: Vec<C>,
        apply: impl Fn(&WorkflowGraph, C) -> Result<Applied>,
    ) -> BulkApplied {
        let mut current = Applied::unchanged(self);
        let mut committed = 0usize;
        let mut failures = Vec::new();
        for (index, change) in changes.into_iter().enumerate() {
            match apply(&current.graph, change) {
                Ok(step) => {
                    current.graph = step.graph;
                    current.writes.extend(step.writes);
                    current.created = step.created.or(current.created);
                    committed += 1;
                }
                Err(error) => failures.push(BulkFailure { index, error }),
            }
        }
        BulkApplied {
            applied: current,
            committed,
            failures,
        }
    }

    /// Swaps in a whole graph, planning the store writes that turn `self` into it.
    pub fn replace(&self, next: WorkflowGraph) -> Result<Applied> {
        invariants::ensure_graph_invariants(&next)?;
        if let Some(current) = self.trigger() {
            let kept = next
                .node(current.id)
                .is_some_and(|incoming| incoming.kind.is_trigger());
            if !kept {
                return Err(LibError::protected(
                    "The trigger step cannot be removed",
                    anyhow!("replacement graph drops trigger {}", current.id),
                ));
            }
        }
        let writes = plan_replacement(self, &next);
        Ok(Applied::new(next, writes))
    }
}

/// Store writes that turn `current` into `next`: edge deletes, node deletes,
/// node inserts and updates, then edge inserts and updates.
pub fn plan_replacement(current: &WorkflowGraph, next: &WorkflowGraph) -> Vec<RemoteWrite> {
    let old_nodes: HashMap<NodeId, &Node> = current.nodes.iter().map(|n| (n.id, n)).collect();
    let new_nodes: HashMap<NodeId, &Node> = next.nodes.iter().map(|n| (n.id, n)).collect();
    let old_edges: HashMap<(NodeId, NodeId), &Edge> =
        current.persisted_edges().map(|e| (e.key(), e)).collect();
    let new_edges: HashMap<(NodeId, NodeId), &Edge> =
        next.persisted_edges().map(|e| (e.key(), e)).collect();

    let mut writes = Vec::new();
    for edge in current.persisted_edges() {
        if !new_edges.contains_key(&edge.key()) {
            writes.push(RemoteWrite::DeleteEdge {
                source: edge.source,
                target: edge.target,
            });
        }
    }
    for node in &current.nodes {
        if !new_nodes.contains_key(&node.id) {
            writes.push(RemoteWrite::DeleteNode(node.id));
        }
    }
    for node in &next.nodes {
        match old_nodes.get(&node.id) {
            None => writes.push(RemoteWrite::InsertNode(node.clone())),
            Some(old) if old.data != node.data || old.kind != node.kind => {
                writes.push(RemoteWrite::UpdateNode(node.clone()));
            }
            Some(old) if !old.position.approx_eq(&node.position) => {
                writes.push(RemoteWrite::MoveNode(NodeMove {
                    id: node.id,
                    position: node.position,
                }));
            }
            Some(_) => {}
        }
    }
    for edge in next.persisted_edges() {
        match old_edges.get(&edge.key()) {
            None => writes.push(RemoteWrite::InsertEdge(edge.clone())),
            Some(old)
                if old.delay != edge.delay
                    || old.source_handle != edge.source_handle
                    || old.target_handle != edge.target_handle =>
            {
                writes.push(RemoteWrite::UpdateEdge(edge.clone()));
            }
            Some(_) => {}
        }
    }
    writes
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::models::DelayUnit;

    fn seeded() -> (WorkflowGraph, NodeId) {
        let applied = WorkflowGraph::default()
            .create_node("trigger", Position::new(0.0, 0.0), None, None)
            .expect("trigger");
        let id = applied.created.expect("created id");
        (applied.graph, id)
    }

    fn add(graph: &WorkflowGraph, kind: &str, y: f64) -> (WorkflowGraph, NodeId) {
        let applied = graph
            .create_node(kind, Position::new(0.0, y), None, None)
            .expect("node");
        (applied.graph, applied.created.expect("created id"))
    }

    fn days(amount: f64) -> Delay {
        Delay::new(amount, DelayUnit::Days).expect("delay")
    }

    #[test]
    fn create_node_plans_insert() {
        let (graph, trigger) = seeded();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.trigger().map(|n| n.id), Some(trigger));

        let applied = graph
            .create_node(
                "email",
                Position::new(0.0, 600.0),
                Some(json!({"subject": "Intro"})),
                None,
            )
            .expect("email");
        assert!(matches!(&applied.writes[..], [RemoteWrite::InsertNode(node)] if node.kind == NodeKind::Email));
        assert!(applied.graph.satisfies_invariants());
    }

    #[test]
    fn create_node_rejects_unknown_kind() {
        let (graph, _) = seeded();
        let err = graph
            .create_node("fax", Position::default(), None, None)
            .expect_err("unknown kind");
        assert_eq!(err.kind, ErrorKind::InvalidKind);
    }

    #[test]
    fn create_node_enforces_single_trigger() {
        let err = WorkflowGraph::default()
            .create_node("email", Position::default(), None, None)
            .expect_err("needs trigger");
        assert_eq!(err.code, "workflow_trigger_required");

        let (graph, trigger) = seeded();
        let err = graph
            .create_node("trigger", Position::default(), None, None)
            .expect_err("second trigger");
        assert_eq!(err.code, "workflow_trigger_exists");

        let err = graph
            .create_node("task", Position::default(), None, Some(trigger))
            .expect_err("id taken");
        assert_eq!(err.code, "workflow_node_exists");
    }

    #[test]
    fn move_node_is_noop_within_tolerance() {
        let (graph, trigger) = seeded();
        let applied = graph
            .move_node(trigger, Position::new(0.0, 1e-9))
            .expect("noop move");
        assert!(applied.writes.is_empty());
        assert_eq!(applied.graph, graph);

        let applied = graph.move_node(trigger, Position::new(10.0, 0.0)).expect("move");
        assert!(matches!(&applied.writes[..], [RemoteWrite::MoveNode(_)]));

        let err = graph
            .move_node(NodeId::generate(), Position::default())
            .expect_err("missing");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn trigger_is_protected() {
        let (graph, trigger) = seeded();
        let err = graph.delete_node(trigger).expect_err("protected");
        assert_eq!(err.kind, ErrorKind::Protected);
        let err = graph.duplicate_node(trigger, None).expect_err("protected");
        assert_eq!(err.kind, ErrorKind::Protected);
    }

    #[test]
    fn delete_node_cascades_edges() {
        let (graph, trigger) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let (graph, task) = add(&graph, "task", 600.0);
        let graph = graph
            .connect(trigger, email, days(1.0), EdgeHandles::default())
            .expect("t->e")
            .graph;
        let graph = graph
            .connect(email, task, days(2.0), EdgeHandles::default())
            .expect("e->t")
            .graph;

        let applied = graph.delete_node(email).expect("delete");
        assert!(!applied.graph.contains_node(email));
        assert!(applied.graph.edges.iter().all(|edge| !edge.touches(email)));
        assert_eq!(applied.writes.len(), 3);
        assert_eq!(applied.writes.last(), Some(&RemoteWrite::DeleteNode(email)));
        assert!(applied.graph.satisfies_invariants());
    }

    #[test]
    fn duplicate_node_offsets_position() {
        let (graph, _) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let applied = graph.duplicate_node(email, None).expect("duplicate");
        let copy = applied
            .graph
            .node(applied.created.expect("copy id"))
            .expect("copy exists");
        assert_ne!(copy.id, email);
        assert_eq!(copy.position, Position::new(40.0, 340.0));
        assert_eq!(copy.data, graph.node(email).expect("original").data);
    }

    #[test]
    fn reverse_edge_is_a_cycle_and_repeat_is_duplicate() {
        let (graph, trigger) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let once = graph
            .connect(trigger, email, days(1.0), EdgeHandles::default())
            .expect("first edge");

        let err = once
            .graph
            .connect(email, trigger, days(1.0), EdgeHandles::default())
            .expect_err("reverse");
        assert_eq!(err.kind, ErrorKind::Cycle);

        let err = once
            .graph
            .connect(trigger, email, days(1.0), EdgeHandles::default())
            .expect_err("repeat");
        assert_eq!(err.kind, ErrorKind::Duplicate);

        let err = graph
            .connect(email, email, days(1.0), EdgeHandles::default())
            .expect_err("self");
        assert_eq!(err.kind, ErrorKind::SelfLoop);
    }

    #[test]
    fn single_connection_rule_applies_to_new_edges() {
        let (graph, trigger) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let (graph, call) = add(&graph, "call", 300.0);
        let rules = EdgeRules {
            single_connection: true,
            ..EdgeRules::default()
        };
        let new_edge = |target| NewEdge {
            source: trigger,
            target,
            delay: None,
            handles: EdgeHandles::default(),
        };
        let graph = graph
            .create_edge(&new_edge(email), EdgeKind::Persisted, rules)
            .expect("first")
            .graph;
        let err = graph
            .create_edge(&new_edge(call), EdgeKind::Persisted, rules)
            .expect_err("handle taken");
        assert_eq!(err.kind, ErrorKind::HandleOccupied);
        assert!(graph
            .create_edge(&new_edge(call), EdgeKind::Persisted, EdgeRules::default())
            .is_ok());
    }

    #[test]
    fn ephemeral_edges_replace_each_other_and_are_not_written() {
        let (graph, trigger) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let (graph, call) = add(&graph, "call", 300.0);
        let suggest = |graph: &WorkflowGraph, target| {
            graph.create_edge(
                &NewEdge {
                    source: trigger,
                    target,
                    delay: None,
                    handles: EdgeHandles::default(),
                },
                EdgeKind::Ephemeral,
                EdgeRules::default(),
            )
        };
        let first = suggest(&graph, email).expect("suggest email");
        assert!(first.writes.is_empty());
        let second = suggest(&first.graph, call).expect("suggest call");
        assert_eq!(second.graph.edges.len(), 1);
        assert_eq!(
            second.graph.ephemeral_edge().map(Edge::key),
            Some((trigger, call))
        );

        let promoted = second
            .graph
            .connect(trigger, call, days(1.0), EdgeHandles::default())
            .expect("promote");
        assert_eq!(promoted.graph.edges.len(), 1);
        assert!(promoted.graph.has_persisted_edge(trigger, call));
        assert!(second.graph.clear_suggestion().graph.edges.is_empty());
    }

    #[test]
    fn delete_edge_is_idempotent_and_delay_requires_edge() {
        let (graph, trigger) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let unchanged = graph.delete_edge(trigger, email);
        assert_eq!(unchanged.graph, graph);
        assert!(unchanged.writes.is_empty());

        let err = graph
            .assign_edge_delay(trigger, email, days(3.0))
            .expect_err("no edge");
        assert_eq!(err.kind, ErrorKind::NotFound);

        let graph = graph
            .connect(trigger, email, days(1.0), EdgeHandles::default())
            .expect("edge")
            .graph;
        let applied = graph.assign_edge_delay(trigger, email, days(3.0)).expect("delay");
        assert_eq!(
            applied.graph.edge(trigger, email).map(|e| e.delay),
            Some(days(3.0))
        );
        let err = graph
            .assign_edge_delay(trigger, email, Delay { amount: -2.0, unit: DelayUnit::Hours })
            .expect_err("negative");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn bulk_updates_commit_valid_items() {
        let (graph, trigger) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let missing = NodeId::generate();

        let bulk = graph.update_nodes(
            vec![
                NodeChange::Position {
                    id: email,
                    position: Position::new(100.0, 300.0),
                },
                NodeChange::Remove { id: trigger },
                NodeChange::Select {
                    id: missing,
                    selected: true,
                },
                NodeChange::Add {
                    node: NewNode {
                        id: None,
                        kind: "task".to_string(),
                        position: Position::new(0.0, 600.0),
                        data: Some(json!({"title": "Follow up"})),
                    },
                },
            ],
        );

        assert_eq!(bulk.committed, 2);
        assert_eq!(
            bulk.failures.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(bulk.failures[0].error.kind, ErrorKind::Protected);
        assert_eq!(bulk.failures[1].error.kind, ErrorKind::NotFound);
        assert_eq!(bulk.applied.graph.nodes.len(), 3);
        assert!(bulk.applied.graph.satisfies_invariants());

        let bulk = bulk.applied.graph.update_edges(
            vec![
                EdgeChange::Add {
                    edge: NewEdge {
                        source: trigger,
                        target: email,
                        delay: Some(days(1.0)),
                        handles: EdgeHandles::default(),
                    },
                },
                EdgeChange::Add {
                    edge: NewEdge {
                        source: email,
                        target: trigger,
                        delay: None,
                        handles: EdgeHandles::default(),
                    },
                },
            ],
            EdgeRules::default(),
        );
        assert_eq!(bulk.committed, 1);
        assert_eq!(bulk.failures[0].error.kind, ErrorKind::Cycle);
    }

    #[test]
    fn replace_plans_minimal_writes() {
        let (graph, trigger) = seeded();
        let (graph, email) = add(&graph, "email", 300.0);
        let mut next = graph.clone();
        next.nodes.retain(|node| node.id != email);
        let task = Node::new(
            NodeId::generate(),
            Position::new(0.0, 500.0),
            NodeData::default_for(NodeKind::Task),
        );
        next.nodes.push(task.clone());
        next.edges.push(Edge::persisted(trigger, task.id, days(2.0)));

        let applied = graph.replace(next.clone()).expect("replace");
        assert_eq!(applied.graph, next);
        assert_eq!(
            applied.writes,
            vec![
                RemoteWrite::DeleteNode(email),
                RemoteWrite::InsertNode(task.clone()),
                RemoteWrite::InsertEdge(Edge::persisted(trigger, task.id, days(2.0))),
            ]
        );

        let mut cyclic = next;
        cyclic.edges.push(Edge::persisted(task.id, trigger, days(1.0)));
        assert_eq!(
            graph.replace(cyclic).expect_err("cycle").kind,
            ErrorKind::Cycle
        );
    }

    #[test]
    fn replace_keeps_the_trigger() {
        let (graph, trigger) = seeded();
        let (graph, _) = add(&graph, "email", 300.0);

        let err = graph
            .replace(WorkflowGraph::default())
            .expect_err("empty replacement");
        assert_eq!(err.kind, ErrorKind::Protected);

        let swapped = WorkflowGraph::new(
            vec![Node::new(
                NodeId::generate(),
                Position::default(),
                NodeData::default_for(NodeKind::Trigger),
            )],
            Vec::new(),
        );
        let err = graph.replace(swapped).expect_err("new trigger id");
        assert_eq!(err.kind, ErrorKind::Protected);

        let mut moved = graph.clone();
        moved.nodes[0].position = Position::new(0.0, -100.0);
        let applied = graph.replace(moved).expect("trigger kept");
        assert_eq!(applied.graph.trigger().map(|node| node.id), Some(trigger));
    }
}
