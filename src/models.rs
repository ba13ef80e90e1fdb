use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::invariants;

/// Per-axis tolerance used when deciding whether a node actually moved.
pub const POSITION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct WorkflowId(pub Uuid);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for WorkflowId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn approx_eq(&self, other: &Position) -> bool {
        (self.x - other.x).abs() <= POSITION_TOLERANCE
            && (self.y - other.y).abs() <= POSITION_TOLERANCE
    }

    pub fn offset(self, by: Position) -> Position {
        Position::new(self.x + by.x, self.y + by.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Email,
    LinkedinMessage,
    Call,
    Task,
    Condition,
}

const SINGLE_SOURCE_HANDLE: &[&str] = &["out"];
const CONDITION_SOURCE_HANDLES: &[&str] = &["yes", "no"];

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Trigger,
        NodeKind::Email,
        NodeKind::LinkedinMessage,
        NodeKind::Call,
        NodeKind::Task,
        NodeKind::Condition,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Email => "email",
            NodeKind::LinkedinMessage => "linkedin_message",
            NodeKind::Call => "call",
            NodeKind::Task => "task",
            NodeKind::Condition => "condition",
        }
    }

    pub const fn is_trigger(self) -> bool {
        matches!(self, NodeKind::Trigger)
    }

    /// Triggers start a sequence and never receive transitions.
    pub const fn accepts_incoming(self) -> bool {
        !self.is_trigger()
    }

    /// Named outgoing connection points; the first one is the default.
    pub const fn source_handles(self) -> &'static [&'static str] {
        match self {
            NodeKind::Condition => CONDITION_SOURCE_HANDLES,
            _ => SINGLE_SOURCE_HANDLE,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = LibError;

    fn from_str(s: &str) -> Result<Self> {
        NodeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| LibError::invalid_kind(anyhow!("unknown node kind '{}'", s)))
    }
}

/// Step payload, keyed by the step kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeData {
    Trigger {
        #[serde(default)]
        criteria: Value,
    },
    Email {
        #[serde(default)]
        subject: String,
        #[serde(default)]
        body: String,
    },
    LinkedinMessage {
        #[serde(default)]
        message: String,
    },
    Call {
        #[serde(default)]
        script: String,
    },
    Task {
        #[serde(default)]
        title: String,
        #[serde(default)]
        notes: String,
    },
    Condition {
        #[serde(default)]
        criteria: Value,
    },
}

impl NodeData {
    pub const fn kind(&self) -> NodeKind {
        match self {
            NodeData::Trigger { .. } => NodeKind::Trigger,
            NodeData::Email { .. } => NodeKind::Email,
            NodeData::LinkedinMessage { .. } => NodeKind::LinkedinMessage,
            NodeData::Call { .. } => NodeKind::Call,
            NodeData::Task { .. } => NodeKind::Task,
            NodeData::Condition { .. } => NodeKind::Condition,
        }
    }

    pub fn default_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Trigger => NodeData::Trigger { criteria: json!({}) },
            NodeKind::Email => NodeData::Email {
                subject: String::new(),
                body: String::new(),
            },
            NodeKind::LinkedinMessage => NodeData::LinkedinMessage {
                message: String::new(),
            },
            NodeKind::Call => NodeData::Call {
                script: String::new(),
            },
            NodeKind::Task => NodeData::Task {
                title: String::new(),
                notes: String::new(),
            },
            NodeKind::Condition => NodeData::Condition { criteria: json!({}) },
        }
    }

    /// Validates an untyped payload against `kind`. A missing or null payload
    /// yields the kind's default data.
    pub fn from_payload(kind: NodeKind, payload: Option<Value>) -> Result<Self> {
        let mut fields = match payload {
            None | Some(Value::Null) => return Ok(Self::default_for(kind)),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                return Err(LibError::invalid(
                    "Step data must be an object",
                    anyhow!("node data for kind {} was {}", kind, other),
                ));
            }
        };

        match fields.get("kind") {
            Some(Value::String(tag)) if tag != kind.as_str() => {
                return Err(LibError::invalid(
                    "Step data does not match the step type",
                    anyhow!("data tagged {} supplied for kind {}", tag, kind),
                ));
            }
            _ => {}
        }
        fields.insert("kind".to_string(), Value::String(kind.as_str().to_string()));

        let data: NodeData = serde_json::from_value(Value::Object(fields)).map_err(|err| {
            LibError::invalid(
                "Step data does not match the step type",
                anyhow!(err).context(format!("decoding data for kind {}", kind)),
            )
        })?;
        Ok(data.normalized())
    }

    fn normalized(self) -> Self {
        match self {
            NodeData::Trigger { criteria: Value::Null } => NodeData::Trigger { criteria: json!({}) },
            NodeData::Condition { criteria: Value::Null } => {
                NodeData::Condition { criteria: json!({}) }
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub position: Position,
    pub data: NodeData,
    #[serde(skip)]
    pub selected: bool,
}

impl Node {
    pub fn new(id: NodeId, position: Position, data: NodeData) -> Self {
        Self {
            id,
            kind: data.kind(),
            position,
            data,
            selected: false,
        }
    }

    pub const fn deletable(&self) -> bool {
        !self.kind.is_trigger()
    }

    pub const fn source_handles(&self) -> &'static [&'static str] {
        self.kind.source_handles()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    #[default]
    Days,
    Weeks,
}

impl DelayUnit {
    pub const fn seconds(self) -> u64 {
        match self {
            DelayUnit::Minutes => 60,
            DelayUnit::Hours => 60 * 60,
            DelayUnit::Days => 24 * 60 * 60,
            DelayUnit::Weeks => 7 * 24 * 60 * 60,
        }
    }
}

/// Wait time before the target step runs once the source step completes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    pub amount: f64,
    pub unit: DelayUnit,
}

impl Default for Delay {
    fn default() -> Self {
        Self {
            amount: 1.0,
            unit: DelayUnit::Days,
        }
    }
}

impl Delay {
    pub fn new(amount: f64, unit: DelayUnit) -> Result<Self> {
        let delay = Self { amount, unit };
        delay.validate()?;
        Ok(delay)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(LibError::invalid(
                "Delay must be a non-negative number",
                anyhow!("invalid delay amount {}", self.amount),
            ));
        }
        Ok(())
    }

    pub fn as_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.amount.max(0.0) * self.unit.seconds() as f64)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    #[default]
    Persisted,
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EdgeHandles {
    pub source: Option<String>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub kind: EdgeKind,
    pub delay: Delay,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub animated: bool,
    #[serde(skip)]
    pub selected: bool,
}

impl Edge {
    pub fn persisted(source: NodeId, target: NodeId, delay: Delay) -> Self {
        Self {
            source,
            target,
            kind: EdgeKind::Persisted,
            delay,
            source_handle: None,
            target_handle: None,
            animated: false,
            selected: false,
        }
    }

    pub fn ephemeral(source: NodeId, target: NodeId, delay: Delay) -> Self {
        Self {
            kind: EdgeKind::Ephemeral,
            animated: true,
            ..Self::persisted(source, target, delay)
        }
    }

    pub fn with_handles(mut self, handles: EdgeHandles) -> Self {
        self.source_handle = handles.source;
        self.target_handle = handles.target;
        self
    }

    pub const fn key(&self) -> (NodeId, NodeId) {
        (self.source, self.target)
    }

    pub const fn is_persisted(&self) -> bool {
        matches!(self.kind, EdgeKind::Persisted)
    }

    pub fn touches(&self, node_id: NodeId) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Point-in-time value of a workflow's steps and transitions.
///
/// Nodes and edges keep insertion order so snapshots compare and render stably.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn trigger(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| node.kind.is_trigger())
    }

    pub fn edge(&self, source: NodeId, target: NodeId) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|edge| edge.source == source && edge.target == target)
    }

    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.edge(source, target).is_some()
    }

    pub fn has_persisted_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.edge(source, target).is_some_and(Edge::is_persisted)
    }

    pub fn persisted_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|edge| edge.is_persisted())
    }

    pub fn ephemeral_edge(&self) -> Option<&Edge> {
        self.edges.iter().find(|edge| !edge.is_persisted())
    }

    pub fn outgoing_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.persisted_edges().filter(move |edge| edge.source == id)
    }

    pub fn incoming_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.persisted_edges().filter(move |edge| edge.target == id)
    }

    /// Direct successors along persisted edges.
    pub fn outgoers(&self, id: NodeId) -> Vec<&Node> {
        self.outgoing_edges(id)
            .filter_map(|edge| self.node(edge.target))
            .collect()
    }

    /// Direct predecessors along persisted edges.
    pub fn incomers(&self, id: NodeId) -> Vec<&Node> {
        self.incoming_edges(id)
            .filter_map(|edge| self.node(edge.source))
            .collect()
    }

    pub fn satisfies_invariants(&self) -> bool {
        invariants::graph_invariant_violations(self).is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphInvariantViolation {
    InvalidTriggerCount {
        trigger_count: usize,
    },
    DuplicateNode {
        node_id: NodeId,
    },
    UnknownNodeReference {
        source: NodeId,
        target: NodeId,
        missing_node_id: NodeId,
    },
    SelfLoop {
        node_id: NodeId,
    },
    DuplicateEdge {
        source: NodeId,
        target: NodeId,
    },
    CycleDetected,
    MultipleEphemeralEdges {
        count: usize,
    },
    KindDataMismatch {
        node_id: NodeId,
        kind: NodeKind,
        data_kind: NodeKind,
    },
    TriggerHasIncoming {
        source: NodeId,
        target: NodeId,
    },
}

impl GraphInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            GraphInvariantViolation::InvalidTriggerCount { .. } => "workflow_trigger_count",
            GraphInvariantViolation::DuplicateNode { .. } => "workflow_duplicate_node",
            GraphInvariantViolation::UnknownNodeReference { .. } => {
                "workflow_unknown_node_reference"
            }
            GraphInvariantViolation::SelfLoop { .. } => "workflow_self_loop",
            GraphInvariantViolation::DuplicateEdge { .. } => "workflow_duplicate_edge",
            GraphInvariantViolation::CycleDetected => "workflow_cycle",
            GraphInvariantViolation::MultipleEphemeralEdges { .. } => {
                "workflow_multiple_suggestions"
            }
            GraphInvariantViolation::KindDataMismatch { .. } => "workflow_kind_mismatch",
            GraphInvariantViolation::TriggerHasIncoming { .. } => "workflow_trigger_incoming",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            GraphInvariantViolation::InvalidTriggerCount { .. } => {
                "A workflow must have exactly one trigger"
            }
            GraphInvariantViolation::DuplicateNode { .. } => {
                "Step IDs must be unique within a workflow"
            }
            GraphInvariantViolation::UnknownNodeReference { .. } => {
                "Connection references a step that does not exist"
            }
            GraphInvariantViolation::SelfLoop { .. } => "A step cannot connect to itself",
            GraphInvariantViolation::DuplicateEdge { .. } => "These steps are already connected",
            GraphInvariantViolation::CycleDetected => "Workflow steps must not form a cycle",
            GraphInvariantViolation::MultipleEphemeralEdges { .. } => {
                "Only one suggested connection may be shown"
            }
            GraphInvariantViolation::KindDataMismatch { .. } => {
                "Step data does not match the step type"
            }
            GraphInvariantViolation::TriggerHasIncoming { .. } => {
                "The trigger cannot have incoming transitions"
            }
        }
    }
}

/// Untyped step payload as received from the interaction layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    pub id: Option<NodeId>,
    pub kind: String,
    pub position: Position,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub delay: Option<Delay>,
    #[serde(default)]
    pub handles: EdgeHandles,
}
