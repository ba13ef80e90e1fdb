use std::collections::{BTreeMap, HashMap, HashSet};

use crate::algorithms;
use crate::config::LayoutConfig;
use crate::error::Result;
use crate::models::{NodeId, Position, WorkflowGraph};
use crate::mutations::Applied;
use crate::remote::{NodeMove, RemoteWrite};

/// Rank and target position for every node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayoutPlan {
    pub ranks: BTreeMap<NodeId, usize>,
    pub positions: BTreeMap<NodeId, Position>,
}

/// Longest-path rank over persisted edges: roots get 0, every other node one more
/// than its deepest predecessor. Nodes caught in a cycle are ranked from whichever
/// predecessors were already placed.
pub fn compute_ranks(graph: &WorkflowGraph) -> BTreeMap<NodeId, usize> {
    let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for (source, targets) in algorithms::adjacency_map(graph) {
        for target in targets {
            predecessors.entry(target).or_default().push(source);
        }
    }

    let ordered = algorithms::topological_sort(graph);
    let placed: HashSet<NodeId> = ordered.iter().map(|node| node.id).collect();
    let leftovers = graph.nodes.iter().filter(|node| !placed.contains(&node.id));

    let mut ranks = BTreeMap::new();
    for node in ordered.into_iter().chain(leftovers) {
        let rank = predecessors
            .get(&node.id)
            .into_iter()
            .flatten()
            .filter_map(|pred| ranks.get(pred).map(|rank: &usize| rank + 1))
            .max()
            .unwrap_or(0);
        ranks.insert(node.id, rank);
    }
    ranks
}

/// Rows by rank, each centered on `x = 0` and ordered by current `x` then id.
pub fn layered_layout(graph: &WorkflowGraph, config: &LayoutConfig) -> LayoutPlan {
    let ranks = compute_ranks(graph);

    let mut rows: BTreeMap<usize, Vec<(f64, NodeId)>> = BTreeMap::new();
    for node in &graph.nodes {
        if let Some(rank) = ranks.get(&node.id) {
            rows.entry(*rank).or_default().push((node.position.x, node.id));
        }
    }

    let mut positions = BTreeMap::new();
    for (rank, mut row) in rows {
        row.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let center = (row.len() as f64 - 1.0) / 2.0;
        for (index, (_, node_id)) in row.into_iter().enumerate() {
            positions.insert(
                node_id,
                Position::new(
                    (index as f64 - center) * config.horizontal_spacing,
                    rank as f64 * config.vertical_spacing,
                ),
            );
        }
    }

    LayoutPlan { ranks, positions }
}

/// Moves every node in one store write; edges and step data are left alone.
pub fn apply_layout(graph: &WorkflowGraph, plan: &LayoutPlan) -> Result<Applied> {
    let mut next = graph.clone();
    let mut moves = Vec::new();
    for (node_id, position) in &plan.positions {
        let step = next.move_node(*node_id, *position)?;
        if !step.writes.is_empty() {
            moves.push(NodeMove {
                id: *node_id,
                position: *position,
            });
        }
        next = step.graph;
    }
    let writes = if moves.is_empty() {
        Vec::new()
    } else {
        vec![RemoteWrite::MoveNodes(moves)]
    };
    Ok(Applied {
        graph: next,
        writes,
        created: None,
    })
}
