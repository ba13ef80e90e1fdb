use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::guard::{self, ConnectionIndex};
use crate::models::{Delay, EdgeHandles, EdgeKind, NewEdge, NodeId, WorkflowGraph};
use crate::mutations::{Applied, EdgeRules};

/// Rendered box of a node in absolute layout coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeBox {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NodeBox {
    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Gap between the bottom of `upper` and the top of `lower`, combined with the
/// horizontal offset of their centers.
pub fn box_distance(upper: &NodeBox, lower: &NodeBox) -> f64 {
    let dx = lower.center_x() - upper.center_x();
    let dy = lower.y - upper.bottom();
    (dx * dx + dy * dy).sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub source: NodeId,
    pub target: NodeId,
    pub source_handle: Option<String>,
    pub distance: f64,
}

impl Suggestion {
    pub fn to_new_edge(&self, delay: Delay) -> NewEdge {
        NewEdge {
            source: self.source,
            target: self.target,
            delay: Some(delay),
            handles: EdgeHandles {
                source: self.source_handle.clone(),
                target: None,
            },
        }
    }
}

/// Nearest node the dragged node could be connected with, if any qualifies.
///
/// The upper box is the source; on equal `y` the dragged node is. Ties in
/// distance go to the lower node id.
pub fn closest_candidate(
    graph: &WorkflowGraph,
    dragged: NodeId,
    layout: &[NodeBox],
    threshold: f64,
    single_connection: bool,
) -> Option<Suggestion> {
    let dragged_box = layout.iter().find(|entry| entry.id == dragged)?;
    let index = ConnectionIndex::new(graph);

    let mut best: Option<(NodeId, Suggestion)> = None;
    for other in layout.iter().filter(|entry| entry.id != dragged) {
        let (upper, lower) = if dragged_box.y <= other.y {
            (dragged_box, other)
        } else {
            (other, dragged_box)
        };
        let distance = box_distance(upper, lower);
        if distance >= threshold {
            continue;
        }
        match graph.node(lower.id) {
            Some(target) if target.kind.accepts_incoming() => {}
            _ => continue,
        }
        if !index.is_valid(upper.id, lower.id) {
            continue;
        }
        let source_handle = if single_connection {
            match guard::free_source_handles(graph, upper.id, lower.id).first() {
                Some(handle) => Some((*handle).to_string()),
                None => continue,
            }
        } else {
            None
        };

        let closer = best.as_ref().is_none_or(|(best_id, current)| {
            distance < current.distance || (distance == current.distance && other.id < *best_id)
        });
        if closer {
            best = Some((
                other.id,
                Suggestion {
                    source: upper.id,
                    target: lower.id,
                    source_handle,
                    distance,
                },
            ));
        }
    }
    best.map(|(_, suggestion)| suggestion)
}

/// Drag-session state for proximity connections.
///
/// Only one suggestion exists at a time. It lives in the graph as the single
/// ephemeral edge and is never written to the store.
#[derive(Debug, Clone)]
pub struct ProximitySuggestor {
    threshold: f64,
    single_connection: bool,
    default_delay: Delay,
    dragging: Option<NodeId>,
    current: Option<Suggestion>,
}

impl ProximitySuggestor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.proximity_threshold,
            single_connection: config.single_connection,
            default_delay: config.default_delay,
            dragging: None,
            current: None,
        }
    }

    pub fn dragging(&self) -> Option<NodeId> {
        self.dragging
    }

    pub fn current(&self) -> Option<&Suggestion> {
        self.current.as_ref()
    }

    /// Starts a session and drops any suggestion left over from the previous one.
    pub fn drag_start(&mut self, graph: &WorkflowGraph, node_id: NodeId) -> Applied {
        self.dragging = Some(node_id);
        self.current = None;
        graph.clear_suggestion()
    }

    /// Re-evaluates the suggestion and returns the graph showing it.
    pub fn drag_move(
        &mut self,
        graph: &WorkflowGraph,
        node_id: NodeId,
        layout: &[NodeBox],
    ) -> Applied {
        if self.dragging != Some(node_id) {
            let cleared = self.drag_start(graph, node_id);
            return self.suggest(&cleared.graph, node_id, layout);
        }
        self.suggest(graph, node_id, layout)
    }

    fn suggest(&mut self, graph: &WorkflowGraph, node_id: NodeId, layout: &[NodeBox]) -> Applied {
        let candidate = closest_candidate(
            graph,
            node_id,
            layout,
            self.threshold,
            self.single_connection,
        );
        let Some(candidate) = candidate else {
            self.current = None;
            return graph.clear_suggestion();
        };

        let rules = EdgeRules {
            single_connection: self.single_connection,
            default_delay: self.default_delay,
        };
        match graph.create_edge(
            &candidate.to_new_edge(self.default_delay),
            EdgeKind::Ephemeral,
            rules,
        ) {
            Ok(applied) => {
                if self.current.as_ref() != Some(&candidate) {
                    debug!(
                        source = %candidate.source,
                        target = %candidate.target,
                        distance = candidate.distance,
                        "proximity suggestion updated"
                    );
                }
                self.current = Some(candidate);
                applied
            }
            Err(err) => {
                debug!(error = %err, "proximity suggestion rejected");
                self.current = None;
                graph.clear_suggestion()
            }
        }
    }

    /// Ends the session. Returns the graph without the ephemeral edge and, when the
    /// last suggestion still passes the connection guard, the edge to persist.
    pub fn drag_end(&mut self, graph: &WorkflowGraph) -> (Applied, Option<NewEdge>) {
        self.dragging = None;
        let cleared = graph.clear_suggestion();
        let Some(suggestion) = self.current.take() else {
            return (cleared, None);
        };
        if let Err(err) = guard::check_connection(&cleared.graph, suggestion.source, suggestion.target) {
            debug!(error = %err, "discarding stale proximity suggestion");
            return (cleared, None);
        }
        (cleared, Some(suggestion.to_new_edge(self.default_delay)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node, NodeData, NodeKind, Position};

    const WIDTH: f64 = 200.0;
    const HEIGHT: f64 = 100.0;

    fn node(kind: NodeKind, x: f64, y: f64) -> Node {
        Node::new(NodeId::generate(), Position::new(x, y), NodeData::default_for(kind))
    }

    fn boxes(graph: &WorkflowGraph) -> Vec<NodeBox> {
        graph
            .nodes
            .iter()
            .map(|node| NodeBox {
                id: node.id,
                x: node.position.x,
                y: node.position.y,
                width: WIDTH,
                height: HEIGHT,
            })
            .collect()
    }

    fn place(graph: &mut WorkflowGraph, id: NodeId, x: f64, y: f64) {
        if let Some(node) = graph.nodes.iter_mut().find(|node| node.id == id) {
            node.position = Position::new(x, y);
        }
    }

    /// Trigger far off to the side, A at y=0, B at y=500, C far below.
    fn canvas() -> (WorkflowGraph, NodeId, NodeId, NodeId) {
        let trigger = node(NodeKind::Trigger, 5_000.0, 0.0);
        let a = node(NodeKind::Email, 0.0, 0.0);
        let b = node(NodeKind::Task, 0.0, 500.0);
        let c = node(NodeKind::Call, 0.0, 2_000.0);
        let graph = WorkflowGraph::new(
            vec![trigger, a.clone(), b.clone(), c.clone()],
            Vec::new(),
        );
        (graph, a.id, b.id, c.id)
    }

    fn config(single_connection: bool) -> EngineConfig {
        EngineConfig {
            single_connection,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn distance_uses_the_gap_between_boxes() {
        let upper = NodeBox {
            id: NodeId::generate(),
            x: 0.0,
            y: 0.0,
            width: WIDTH,
            height: HEIGHT,
        };
        let lower = NodeBox {
            id: NodeId::generate(),
            x: 30.0,
            y: 140.0,
            width: WIDTH,
            height: HEIGHT,
        };
        assert_eq!(box_distance(&upper, &lower), 50.0);
    }

    #[test]
    fn occupied_handle_yields_no_suggestion() {
        let (mut graph, a, b, c) = canvas();
        graph.edges.push(Edge::persisted(b, c, Delay::default()));
        place(&mut graph, a, 0.0, 650.0);

        let mut suggestor = ProximitySuggestor::new(&config(true));
        let applied = suggestor.drag_move(&graph, a, &boxes(&graph));
        assert!(suggestor.current().is_none());
        assert!(applied.graph.ephemeral_edge().is_none());
    }

    #[test]
    fn free_handle_yields_a_suggestion() {
        let (mut graph, a, b, _) = canvas();
        place(&mut graph, a, 0.0, 650.0);

        let mut suggestor = ProximitySuggestor::new(&config(true));
        let applied = suggestor.drag_move(&graph, a, &boxes(&graph));
        let suggestion = suggestor.current().expect("suggestion");
        assert_eq!((suggestion.source, suggestion.target), (b, a));
        assert_eq!(suggestion.source_handle.as_deref(), Some("out"));
        assert_eq!(suggestion.distance, 50.0);

        let ephemeral = applied.graph.ephemeral_edge().expect("ephemeral edge");
        assert_eq!(ephemeral.key(), (b, a));
        assert!(applied.writes.is_empty());
    }

    #[test]
    fn triggers_never_become_targets() {
        let trigger = node(NodeKind::Trigger, 0.0, 300.0);
        let dragged = node(NodeKind::Email, 0.0, 0.0);
        let graph = WorkflowGraph::new(vec![trigger, dragged.clone()], Vec::new());

        let mut suggestor = ProximitySuggestor::new(&config(false));
        suggestor.drag_move(&graph, dragged.id, &boxes(&graph));
        assert!(suggestor.current().is_none());
    }

    #[test]
    fn cycle_closing_candidates_are_skipped() {
        let (mut graph, a, b, _) = canvas();
        graph.edges.push(Edge::persisted(a, b, Delay::default()));
        place(&mut graph, a, 0.0, 650.0);

        let mut suggestor = ProximitySuggestor::new(&config(false));
        suggestor.drag_move(&graph, a, &boxes(&graph));
        assert!(suggestor.current().is_none());
    }

    #[test]
    fn nearest_candidate_wins_and_replaces_the_old_suggestion() {
        let (mut graph, a, b, c) = canvas();
        place(&mut graph, c, 0.0, 900.0);
        place(&mut graph, a, 0.0, 650.0);

        let mut suggestor = ProximitySuggestor::new(&config(false));
        let first = suggestor.drag_move(&graph, a, &boxes(&graph));
        assert_eq!(first.graph.ephemeral_edge().map(Edge::key), Some((b, a)));

        place(&mut graph, a, 0.0, 1_080.0);
        let second = suggestor.drag_move(&first.graph, a, &boxes(&graph));
        assert_eq!(second.graph.ephemeral_edge().map(Edge::key), Some((c, a)));
        assert_eq!(second.graph.edges.len(), 1);
    }

    #[test]
    fn equal_distances_prefer_the_lower_id() {
        let dragged = node(NodeKind::Trigger, 0.0, 0.0);
        let left = node(NodeKind::Email, -100.0, 150.0);
        let right = node(NodeKind::Call, 100.0, 150.0);
        let expected = left.id.min(right.id);
        let graph = WorkflowGraph::new(vec![dragged.clone(), left, right], Vec::new());

        let suggestion =
            closest_candidate(&graph, dragged.id, &boxes(&graph), 400.0, false).expect("candidate");
        assert_eq!(suggestion.target, expected);
    }

    #[test]
    fn drag_end_promotes_the_suggestion() {
        let (mut graph, a, b, _) = canvas();
        place(&mut graph, a, 0.0, 650.0);
        let mut suggestor = ProximitySuggestor::new(&config(false));
        suggestor.drag_start(&graph, a);
        let shown = suggestor.drag_move(&graph, a, &boxes(&graph));

        let (cleared, promoted) = suggestor.drag_end(&shown.graph);
        assert!(cleared.graph.ephemeral_edge().is_none());
        let promoted = promoted.expect("promoted edge");
        assert_eq!((promoted.source, promoted.target), (b, a));
        assert_eq!(promoted.delay, Some(Delay::default()));
        assert!(suggestor.dragging().is_none());
    }

    #[test]
    fn stale_suggestion_is_discarded_on_drag_end() {
        let (mut graph, a, b, _) = canvas();
        place(&mut graph, a, 0.0, 650.0);
        let mut suggestor = ProximitySuggestor::new(&config(false));
        let shown = suggestor.drag_move(&graph, a, &boxes(&graph));

        let mut raced = shown.graph.clone();
        raced.edges.push(Edge::persisted(a, b, Delay::default()));
        let (_, promoted) = suggestor.drag_end(&raced);
        assert!(promoted.is_none());
    }

    #[test]
    fn drag_start_clears_a_stale_suggestion() {
        let (mut graph, a, b, _) = canvas();
        graph.edges.push(Edge::ephemeral(b, a, Delay::default()));
        let mut suggestor = ProximitySuggestor::new(&config(false));
        let applied = suggestor.drag_start(&graph, a);
        assert!(applied.graph.ephemeral_edge().is_none());
        assert_eq!(suggestor.dragging(), Some(a));
    }
}
