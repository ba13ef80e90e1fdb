pub mod algorithms;
pub mod config;
pub mod debounce;
pub mod error;
pub mod guard;
pub mod invariants;
pub mod layout;
pub mod memory;
pub mod models;
pub mod mutations;
pub mod operations;
pub mod remote;
pub mod suggest;
pub mod sync;

pub mod prelude {
    pub use crate::algorithms::{adjacency_map, has_cycle, roots, topological_sort};
    pub use crate::config::{EngineConfig, LayoutConfig};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::guard::{ConnectionIndex, check_connection, is_valid_connection};
    pub use crate::invariants::{ensure_graph_invariants, graph_invariant_violations};
    pub use crate::layout::{LayoutPlan, apply_layout, layered_layout};
    pub use crate::memory::MemoryStore;
    pub use crate::models::{
        Delay, DelayUnit, Edge, EdgeHandles, EdgeKind, GraphInvariantViolation, NewEdge, NewNode,
        Node, NodeData, NodeId, NodeKind, Position, WorkflowGraph, WorkflowId,
    };
    pub use crate::mutations::{Applied, EdgeChange, EdgeRules, NodeChange};
    pub use crate::operations::{MutationOutcome, MutationRequest};
    pub use crate::remote::{NodeMove, RemoteGraph, RemoteStore, RemoteWrite};
    pub use crate::suggest::{NodeBox, ProximitySuggestor, Suggestion};
    pub use crate::sync::{PendingMutation, SyncCoordinator, SyncNotice};
}
