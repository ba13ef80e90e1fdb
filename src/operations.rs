use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{Delay, EdgeKind, NewEdge, NewNode, NodeId, Position, WorkflowGraph};
use crate::mutations::{Applied, BulkFailure, EdgeChange, EdgeRules, NodeChange};

/// Edits the interaction layer can request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum MutationRequest {
    CreateNode {
        node: NewNode,
    },
    MoveNode {
        id: NodeId,
        position: Position,
    },
    UpdateNodeData {
        id: NodeId,
        data: Value,
    },
    DeleteNode {
        id: NodeId,
    },
    DuplicateNode {
        id: NodeId,
        offset: Option<Position>,
    },
    CreateEdge {
        edge: NewEdge,
    },
    DeleteEdge {
        source: NodeId,
        target: NodeId,
    },
    AssignEdgeDelay {
        source: NodeId,
        target: NodeId,
        delay: Delay,
    },
    UpdateNodes {
        changes: Vec<NodeChange>,
    },
    UpdateEdges {
        changes: Vec<EdgeChange>,
    },
    ReplaceGraph {
        graph: WorkflowGraph,
    },
}

/// What a committed request did locally.
#[derive(Debug, Default)]
pub struct MutationOutcome {
    pub changed: bool,
    pub created: Option<NodeId>,
    /// Bulk items that were skipped.
    pub failures: Vec<BulkFailure>,
}

#[derive(Debug)]
pub struct Planned {
    pub applied: Applied,
    pub outcome: MutationOutcome,
}

impl MutationRequest {
    pub const fn label(&self) -> &'static str {
        match self {
            MutationRequest::CreateNode { .. } => "create_node",
            MutationRequest::MoveNode { .. } => "move_node",
            MutationRequest::UpdateNodeData { .. } => "update_node_data",
            MutationRequest::DeleteNode { .. } => "delete_node",
            MutationRequest::DuplicateNode { .. } => "duplicate_node",
            MutationRequest::CreateEdge { .. } => "create_edge",
            MutationRequest::DeleteEdge { .. } => "delete_edge",
            MutationRequest::AssignEdgeDelay { .. } => "assign_edge_delay",
            MutationRequest::UpdateNodes { .. } => "update_nodes",
            MutationRequest::UpdateEdges { .. } => "update_edges",
            MutationRequest::ReplaceGraph { .. } => "replace_graph",
        }
    }

    /// Runs the local transform. Errors leave `graph` untouched.
    pub fn plan(self, graph: &WorkflowGraph, config: &EngineConfig) -> Result<Planned> {
        let rules = edge_rules(config);
        let mut failures = Vec::new();
        let applied = match self {
            MutationRequest::CreateNode { node } => graph.create_node_from(node)?,
            MutationRequest::MoveNode { id, position } => graph.move_node(id, position)?,
            MutationRequest::UpdateNodeData { id, data } => graph.update_node_data(id, data)?,
            MutationRequest::DeleteNode { id } => graph.delete_node(id)?,
            MutationRequest::DuplicateNode { id, offset } => {
                graph.duplicate_node(id, Some(offset.unwrap_or(config.duplicate_offset)))?
            }
            MutationRequest::CreateEdge { edge } => {
                graph.create_edge(&edge, EdgeKind::Persisted, rules)?
            }
            MutationRequest::DeleteEdge { source, target } => graph.delete_edge(source, target),
            MutationRequest::AssignEdgeDelay {
                source,
                target,
                delay,
            } => graph.assign_edge_delay(source, target, delay)?,
            MutationRequest::UpdateNodes { changes } => {
                let bulk = graph.update_nodes(changes);
                failures = bulk.failures;
                bulk.applied
            }
            MutationRequest::UpdateEdges { changes } => {
                let bulk = graph.update_edges(changes, rules);
                failures = bulk.failures;
                bulk.applied
            }
            MutationRequest::ReplaceGraph { graph: next } => graph.replace(next)?,
        };

        let outcome = MutationOutcome {
            changed: applied.graph != *graph,
            created: applied.created,
            failures,
        };
        Ok(Planned { applied, outcome })
    }
}

pub fn edge_rules(config: &EngineConfig) -> EdgeRules {
    EdgeRules {
        single_connection: config.single_connection,
        default_delay: config.default_delay,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::models::DelayUnit;

    fn seeded() -> (WorkflowGraph, NodeId) {
        let applied = WorkflowGraph::default()
            .create_node("trigger", Position::default(), None, None)
            .expect("trigger");
        (applied.graph, applied.created.expect("id"))
    }

    #[test]
    fn requests_deserialize_from_tagged_json() {
        let request: MutationRequest = serde_json::from_value(json!({
            "operation": "create_node",
            "node": {
                "kind": "email",
                "position": {"x": 0.0, "y": 600.0},
                "data": {"subject": "Checking in"}
            }
        }))
        .expect("request should decode");
        assert_eq!(request.label(), "create_node");

        let (graph, _) = seeded();
        let planned = request
            .plan(&graph, &EngineConfig::default())
            .expect("plan");
        assert!(planned.outcome.changed);
        assert!(planned.outcome.created.is_some());
        assert_eq!(planned.applied.writes.len(), 1);
    }

    #[test]
    fn created_edges_use_configured_default_delay() {
        let (graph, trigger) = seeded();
        let applied = graph
            .create_node("call", Position::new(0.0, 300.0), None, None)
            .expect("call");
        let call = applied.created.expect("id");
        let config = EngineConfig {
            default_delay: Delay::new(4.0, DelayUnit::Hours).expect("delay"),
            ..EngineConfig::default()
        };
        let planned = MutationRequest::CreateEdge {
            edge: NewEdge {
                source: trigger,
                target: call,
                delay: None,
                handles: Default::default(),
            },
        }
        .plan(&applied.graph, &config)
        .expect("edge");
        assert_eq!(
            planned.applied.graph.edge(trigger, call).map(|e| e.delay),
            Some(config.default_delay)
        );
    }

    #[test]
    fn duplicate_uses_configured_offset() {
        let (graph, _) = seeded();
        let applied = graph
            .create_node("task", Position::new(10.0, 10.0), None, None)
            .expect("task");
        let task = applied.created.expect("id");
        let config = EngineConfig {
            duplicate_offset: Position::new(0.0, 120.0),
            ..EngineConfig::default()
        };
        let planned = MutationRequest::DuplicateNode {
            id: task,
            offset: None,
        }
        .plan(&applied.graph, &config)
        .expect("duplicate");
        let copy = planned
            .applied
            .graph
            .node(planned.outcome.created.expect("copy"))
            .expect("copy exists");
        assert_eq!(copy.position, Position::new(10.0, 130.0));
    }

    #[test]
    fn rejected_requests_report_error_kind() {
        let (graph, trigger) = seeded();
        let err = MutationRequest::DeleteNode { id: trigger }
            .plan(&graph, &EngineConfig::default())
            .expect_err("protected");
        assert_eq!(err.kind, ErrorKind::Protected);
    }

    #[test]
    fn unchanged_requests_are_flagged() {
        let (graph, trigger) = seeded();
        let planned = MutationRequest::DeleteEdge {
            source: trigger,
            target: NodeId::generate(),
        }
        .plan(&graph, &EngineConfig::default())
        .expect("idempotent");
        assert!(!planned.outcome.changed);
        assert!(planned.applied.writes.is_empty());
    }
}
