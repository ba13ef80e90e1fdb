use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Node, NodeId, WorkflowGraph};

/// Successor lists over persisted edges, keyed by every known node.
pub fn adjacency_map(graph: &WorkflowGraph) -> HashMap<NodeId, Vec<NodeId>> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        adjacency.entry(node.id).or_default();
    }
    for edge in graph.persisted_edges() {
        if !adjacency.contains_key(&edge.source) || !adjacency.contains_key(&edge.target) {
            // Dangling edges are skipped.
            continue;
        }
        adjacency
            .entry(edge.source)
            .or_default()
            .push(edge.target);
    }
    adjacency
}

pub fn has_cycle(graph: &WorkflowGraph) -> bool {
    topological_sort(graph).len() != graph.nodes.len()
}

/// Kahn ordering over persisted edges. Ties are broken by node insertion order,
/// so the result is deterministic. Nodes on a cycle are left out.
pub fn topological_sort(graph: &WorkflowGraph) -> Vec<&Node> {
    let mut node_lookup = HashMap::with_capacity(graph.nodes.len());
    let mut indegree: HashMap<NodeId, usize> = HashMap::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        node_lookup.insert(node.id, node);
        indegree.insert(node.id, 0);
    }

    let adjacency = adjacency_map(graph);
    for children in adjacency.values() {
        for child in children {
            if let Some(degree) = indegree.get_mut(child) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<NodeId> = graph
        .nodes
        .iter()
        .filter(|node| indegree.get(&node.id) == Some(&0))
        .map(|node| node.id)
        .collect();

    let mut ordered = Vec::with_capacity(graph.nodes.len());
    while let Some(node_id) = queue.pop_front() {
        if let Some(node) = node_lookup.get(&node_id) {
            ordered.push(*node);
        }
        if let Some(children) = adjacency.get(&node_id) {
            for child in children {
                if let Some(child_degree) = indegree.get_mut(child) {
                    *child_degree -= 1;
                    if *child_degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    ordered
}

/// Nodes with no incoming persisted edge, in insertion order.
pub fn roots(graph: &WorkflowGraph) -> Vec<&Node> {
    let targets: HashSet<NodeId> = graph.persisted_edges().map(|edge| edge.target).collect();
    graph
        .nodes
        .iter()
        .filter(|node| !targets.contains(&node.id))
        .collect()
}

/// Iterative depth-first search; the visited set keeps it finite on cyclic input.
pub fn is_reachable(
    adjacency: &HashMap<NodeId, Vec<NodeId>>,
    start: NodeId,
    goal: NodeId,
) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![start];
    while let Some(node_id) = stack.pop() {
        if node_id == goal {
            return true;
        }
        if !visited.insert(node_id) {
            continue;
        }
        if let Some(children) = adjacency.get(&node_id) {
            stack.extend(children.iter().filter(|child| !visited.contains(*child)));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use crate::models::{
        Delay, Edge, Node, NodeData, NodeId, NodeKind, Position, WorkflowGraph,
    };

    fn step(kind: NodeKind) -> Node {
        Node::new(NodeId::generate(), Position::default(), NodeData::default_for(kind))
    }

    fn sample_graph() -> WorkflowGraph {
        let n1 = step(NodeKind::Trigger);
        let n2 = step(NodeKind::Email);
        WorkflowGraph::new(
            vec![n1.clone(), n2.clone()],
            vec![Edge::persisted(n1.id, n2.id, Delay::default())],
        )
    }

    #[test]
    fn dag_has_no_cycle() {
        let graph = sample_graph();
        assert!(!super::has_cycle(&graph));
        assert_eq!(super::topological_sort(&graph).len(), 2);
        assert_eq!(super::roots(&graph).len(), 1);
    }

    #[test]
    fn cycle_detects_properly() {
        let mut graph = sample_graph();
        graph.edges.push(Edge::persisted(
            graph.nodes[1].id,
            graph.nodes[0].id,
            Delay::default(),
        ));
        assert!(super::has_cycle(&graph));
    }

    #[test]
    fn ephemeral_edges_do_not_count_towards_cycles() {
        let mut graph = sample_graph();
        graph.edges.push(Edge::ephemeral(
            graph.nodes[1].id,
            graph.nodes[0].id,
            Delay::default(),
        ));
        assert!(!super::has_cycle(&graph));
    }

    #[test]
    fn reachability_terminates_on_cyclic_input() {
        let mut graph = sample_graph();
        let (a, b) = (graph.nodes[0].id, graph.nodes[1].id);
        graph.edges.push(Edge::persisted(b, a, Delay::default()));
        let adjacency = super::adjacency_map(&graph);
        assert!(super::is_reachable(&adjacency, a, b));
        assert!(!super::is_reachable(&adjacency, a, NodeId::generate()));
    }
}
