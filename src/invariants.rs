use std::collections::HashSet;

use anyhow::anyhow;

use crate::algorithms;
use crate::error::{LibError, Result};
use crate::models::{GraphInvariantViolation, NodeId, WorkflowGraph};

pub fn graph_invariant_violations(graph: &WorkflowGraph) -> Vec<GraphInvariantViolation> {
    let mut violations = Vec::new();

    let mut node_ids: HashSet<NodeId> = HashSet::with_capacity(graph.nodes.len());
    let mut triggers: HashSet<NodeId> = HashSet::new();
    let mut trigger_count = 0usize;
    for node in &graph.nodes {
        if !node_ids.insert(node.id) {
            violations.push(GraphInvariantViolation::DuplicateNode { node_id: node.id });
        }
        if node.kind != node.data.kind() {
            violations.push(GraphInvariantViolation::KindDataMismatch {
                node_id: node.id,
                kind: node.kind,
                data_kind: node.data.kind(),
            });
        }
        if node.kind.is_trigger() {
            trigger_count += 1;
            triggers.insert(node.id);
        }
    }

    if !graph.is_empty() && trigger_count != 1 {
        violations.push(GraphInvariantViolation::InvalidTriggerCount { trigger_count });
    }

    let mut seen_edges = HashSet::with_capacity(graph.edges.len());
    let mut into_trigger = Vec::new();
    let mut ephemeral_count = 0usize;
    for edge in &graph.edges {
        if !edge.is_persisted() {
            ephemeral_count += 1;
        }
        if !node_ids.contains(&edge.source) {
            violations.push(GraphInvariantViolation::UnknownNodeReference {
                source: edge.source,
                target: edge.target,
                missing_node_id: edge.source,
            });
            continue;
        }
        if !node_ids.contains(&edge.target) {
            violations.push(GraphInvariantViolation::UnknownNodeReference {
                source: edge.source,
                target: edge.target,
                missing_node_id: edge.target,
            });
            continue;
        }
        if edge.source == edge.target {
            violations.push(GraphInvariantViolation::SelfLoop {
                node_id: edge.source,
            });
        }
        if !seen_edges.insert(edge.key()) {
            violations.push(GraphInvariantViolation::DuplicateEdge {
                source: edge.source,
                target: edge.target,
            });
        }
        if edge.is_persisted() && triggers.contains(&edge.target) {
            into_trigger.push(GraphInvariantViolation::TriggerHasIncoming {
                source: edge.source,
                target: edge.target,
            });
        }
    }

    if ephemeral_count > 1 {
        violations.push(GraphInvariantViolation::MultipleEphemeralEdges {
            count: ephemeral_count,
        });
    }

    if algorithms::has_cycle(graph) {
        violations.push(GraphInvariantViolation::CycleDetected);
    }
    // After the cycle check: an edge back into the trigger reports as a cycle first.
    violations.extend(into_trigger);

    violations
}

pub fn ensure_graph_invariants(graph: &WorkflowGraph) -> Result<()> {
    let violations = graph_invariant_violations(graph);
    let Some(first) = violations.first() else {
        return Ok(());
    };

    let source = anyhow!("workflow invariant validation failed: {:?}", violations);
    Err(match first {
        GraphInvariantViolation::SelfLoop { .. } => LibError::self_loop(source),
        GraphInvariantViolation::DuplicateEdge { .. } => LibError::duplicate(source),
        GraphInvariantViolation::CycleDetected => LibError::cycle(source),
        other => LibError::invalid_with_code(other.error_code(), other.public_message(), source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{Delay, Edge, Node, NodeData, NodeKind, Position};

    fn node(kind: NodeKind) -> Node {
        Node::new(NodeId::generate(), Position::default(), NodeData::default_for(kind))
    }

    fn edge(from: NodeId, to: NodeId) -> Edge {
        Edge::persisted(from, to, Delay::default())
    }

    #[test]
    fn empty_graph_is_valid() {
        assert!(graph_invariant_violations(&WorkflowGraph::default()).is_empty());
    }

    #[test]
    fn requires_exactly_one_trigger() {
        let graph = WorkflowGraph::new(vec![node(NodeKind::Email)], vec![]);
        assert!(graph_invariant_violations(&graph).iter().any(|v| matches!(
            v,
            GraphInvariantViolation::InvalidTriggerCount { trigger_count: 0 }
        )));

        let graph = WorkflowGraph::new(
            vec![node(NodeKind::Trigger), node(NodeKind::Trigger)],
            vec![],
        );
        let err = ensure_graph_invariants(&graph).expect_err("two triggers");
        assert_eq!(err.code, "workflow_trigger_count");
    }

    #[test]
    fn rejects_cycles() {
        let a = node(NodeKind::Trigger);
        let b = node(NodeKind::Email);
        let c = node(NodeKind::Task);
        let graph = WorkflowGraph::new(
            vec![a.clone(), b.clone(), c.clone()],
            vec![edge(a.id, b.id), edge(b.id, c.id), edge(c.id, b.id)],
        );
        let err = ensure_graph_invariants(&graph).expect_err("cycle");
        assert_eq!(err.kind, ErrorKind::Cycle);
    }

    #[test]
    fn rejects_self_loop_and_duplicates() {
        let a = node(NodeKind::Trigger);
        let b = node(NodeKind::Email);
        let graph = WorkflowGraph::new(
            vec![a.clone(), b.clone()],
            vec![edge(a.id, b.id), edge(a.id, b.id), edge(b.id, b.id)],
        );
        let violations = graph_invariant_violations(&graph);
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphInvariantViolation::SelfLoop { node_id } if *node_id == b.id)));
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphInvariantViolation::DuplicateEdge { .. })));
    }

    #[test]
    fn unknown_node_references_are_reported() {
        let a = node(NodeKind::Trigger);
        let missing = NodeId::generate();
        let graph = WorkflowGraph::new(vec![a.clone()], vec![edge(a.id, missing)]);
        let violations = graph_invariant_violations(&graph);
        assert!(matches!(
            &violations[0],
            GraphInvariantViolation::UnknownNodeReference {
                source,
                target,
                missing_node_id
            } if *source == a.id && *target == missing && *missing_node_id == missing
        ));
    }

    #[test]
    fn node_data_must_match_the_node_kind() {
        let mut trigger = node(NodeKind::Trigger);
        trigger.data = NodeData::default_for(NodeKind::Email);
        let graph = WorkflowGraph::new(vec![trigger.clone()], vec![]);
        assert_eq!(
            graph_invariant_violations(&graph),
            vec![GraphInvariantViolation::KindDataMismatch {
                node_id: trigger.id,
                kind: NodeKind::Trigger,
                data_kind: NodeKind::Email,
            }]
        );
        let err = ensure_graph_invariants(&graph).expect_err("mismatch");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.code, "workflow_kind_mismatch");
    }

    #[test]
    fn trigger_receives_no_transitions() {
        let a = node(NodeKind::Trigger);
        let b = node(NodeKind::Email);
        let c = node(NodeKind::Task);
        let graph = WorkflowGraph::new(
            vec![a.clone(), b.clone(), c.clone()],
            vec![edge(b.id, a.id), Edge::ephemeral(c.id, a.id, Delay::default())],
        );
        assert_eq!(
            graph_invariant_violations(&graph),
            vec![GraphInvariantViolation::TriggerHasIncoming {
                source: b.id,
                target: a.id,
            }]
        );
        assert_eq!(
            ensure_graph_invariants(&graph).expect_err("incoming").code,
            "workflow_trigger_incoming"
        );

        let looped = WorkflowGraph::new(
            vec![a.clone(), b.clone()],
            vec![edge(a.id, b.id), edge(b.id, a.id)],
        );
        assert_eq!(
            ensure_graph_invariants(&looped).expect_err("cycle").kind,
            ErrorKind::Cycle
        );
    }

    #[test]
    fn at_most_one_suggestion() {
        let a = node(NodeKind::Trigger);
        let b = node(NodeKind::Email);
        let c = node(NodeKind::Task);
        let graph = WorkflowGraph::new(
            vec![a.clone(), b.clone(), c.clone()],
            vec![
                Edge::ephemeral(a.id, b.id, Delay::default()),
                Edge::ephemeral(a.id, c.id, Delay::default()),
            ],
        );
        assert!(graph_invariant_violations(&graph).iter().any(|v| matches!(
            v,
            GraphInvariantViolation::MultipleEphemeralEdges { count: 2 }
        )));
    }
}
