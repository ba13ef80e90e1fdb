//! Optimistic editing session over a [`RemoteStore`].
//!
//! Every edit is applied to the local snapshot first and published right away.
//! The store writes it planned are then sent in order by a single writer task;
//! position writes wait out a per-step debounce window before joining that
//! queue, unless a later delete or layout of the same step pulls them forward.
//! When a write fails, the snapshot taken before the edit is restored, the rest
//! of its batch is dropped and one [`SyncNotice`] is broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::debounce::{Debouncer, Waiter, lock, notify};
use crate::error::{ErrorKind, LibError, Result};
use crate::guard;
use crate::invariants;
use crate::layout;
use crate::models::{NodeId, Position, WorkflowGraph, WorkflowId};
use crate::mutations::Applied;
use crate::operations::{MutationOutcome, MutationRequest};
use crate::remote::{self, NodeMove, Reconciled, RemoteStore, RemoteWrite};
use crate::suggest::{NodeBox, ProximitySuggestor};

const NOTICE_CAPACITY: usize = 64;

/// A store write that failed after its edit had already been shown.
#[derive(Debug, Clone)]
pub struct SyncNotice {
    pub operation: &'static str,
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: &'static str,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

impl SyncNotice {
    fn from_error(operation: &'static str, err: &LibError) -> Self {
        Self {
            operation,
            kind: err.kind,
            code: err.code,
            message: err.public,
            detail: format!("{:#}", err.source),
            occurred_at: Utc::now(),
        }
    }
}

struct State {
    graph: Arc<WorkflowGraph>,
    suggestor: ProximitySuggestor,
    /// Snapshot from before the first move still waiting in the debounce window.
    move_rollbacks: HashMap<NodeId, Arc<WorkflowGraph>>,
    /// Local ids the store replaced on insert.
    stored_ids: HashMap<NodeId, NodeId>,
}

struct Shared<R> {
    workflow_id: WorkflowId,
    remote: Arc<R>,
    state: Mutex<State>,
    in_flight: AtomicUsize,
    graphs: watch::Sender<Arc<WorkflowGraph>>,
    notices: broadcast::Sender<SyncNotice>,
}

/// One store write and the snapshot that matches the store if it fails.
struct Step {
    write: RemoteWrite,
    rollback: Arc<WorkflowGraph>,
    /// Waiters of a debounced move folded into this step.
    waiters: Vec<Waiter>,
}

impl Step {
    fn new(write: RemoteWrite, rollback: &Arc<WorkflowGraph>) -> Self {
        Self {
            write,
            rollback: Arc::clone(rollback),
            waiters: Vec::new(),
        }
    }
}

struct Batch {
    operation: &'static str,
    steps: Vec<Step>,
    done: oneshot::Sender<Result<()>>,
}

type Wait = oneshot::Receiver<Result<()>>;

fn writer_stopped() -> LibError {
    LibError::remote("Could not save changes", anyhow!("sync writer is not running"))
}

fn remap_graph(graph: &mut WorkflowGraph, ids: &HashMap<NodeId, NodeId>) {
    if ids.is_empty() {
        return;
    }
    let swap = |id: &mut NodeId| {
        if let Some(stored) = ids.get(id) {
            *id = *stored;
        }
    };
    for node in &mut graph.nodes {
        swap(&mut node.id);
    }
    for edge in &mut graph.edges {
        swap(&mut edge.source);
        swap(&mut edge.target);
    }
}

impl<R: RemoteStore> Shared<R> {
    fn publish(&self, state: &mut State, graph: WorkflowGraph) {
        state.graph = Arc::new(graph);
        self.graphs.send_replace(Arc::clone(&state.graph));
    }

    fn enqueue(
        &self,
        writer: &mpsc::UnboundedSender<Batch>,
        operation: &'static str,
        steps: Vec<Step>,
    ) -> Wait {
        let (done, wait) = oneshot::channel();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let batch = Batch {
            operation,
            steps,
            done,
        };
        if let Err(mpsc::error::SendError(batch)) = writer.send(batch) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            for step in batch.steps {
                notify(step.waiters, &Err(writer_stopped()));
            }
            let _ = batch.done.send(Err(writer_stopped()));
        }
        wait
    }

    async fn persist(&self, mut write: RemoteWrite) -> Result<()> {
        write.remap(&lock(&self.state).stored_ids);
        let reconciled = remote::execute_write(self.remote.as_ref(), self.workflow_id, &write)
            .await
            .map_err(|err| {
                if err.kind.requires_rollback() {
                    return err;
                }
                LibError::remote(
                    "Could not save changes",
                    err.source.context(format!("{} rejected by store", write.label())),
                )
            })?;
        self.reconcile(reconciled);
        Ok(())
    }

    /// Folds store-assigned state into the snapshot. Selection stays local, and a
    /// step with a move still pending keeps its local position.
    fn reconcile(&self, reconciled: Reconciled) {
        let mut state = lock(&self.state);
        let mut graph = (*state.graph).clone();
        match reconciled {
            Reconciled::Node { local_id, stored } => {
                if stored.id != local_id {
                    debug!(%local_id, stored_id = %stored.id, "store assigned a new step id");
                    state.stored_ids.insert(local_id, stored.id);
                    remap_graph(&mut graph, &HashMap::from([(local_id, stored.id)]));
                }
                let keep_position = state.move_rollbacks.contains_key(&local_id);
                if let Some(node) = graph.nodes.iter_mut().find(|node| node.id == stored.id) {
                    let local = std::mem::replace(node, stored);
                    node.selected = local.selected;
                    if keep_position {
                        node.position = local.position;
                    }
                }
            }
            Reconciled::Edge { stored } => {
                if let Some(edge) = graph.edges.iter_mut().find(|edge| edge.key() == stored.key()) {
                    let selected = edge.selected;
                    *edge = stored;
                    edge.selected = selected;
                }
            }
            Reconciled::Nothing => return,
        }
        if graph != *state.graph {
            self.publish(&mut state, graph);
        }
    }

    fn roll_back(&self, operation: &'static str, rollback: &WorkflowGraph, err: &LibError) {
        warn!(
            workflow_id = %self.workflow_id,
            operation,
            error = %err,
            "store write failed, restoring previous snapshot"
        );
        let mut state = lock(&self.state);
        let mut graph = rollback.clone();
        remap_graph(&mut graph, &state.stored_ids);
        self.publish(&mut state, graph);
        drop(state);
        let _ = self.notices.send(SyncNotice::from_error(operation, err));
    }
}

async fn write_loop<R: RemoteStore>(shared: Arc<Shared<R>>, mut batches: mpsc::UnboundedReceiver<Batch>) {
    while let Some(batch) = batches.recv().await {
        let count = batch.steps.len();
        let mut failure: Option<LibError> = None;
        for step in batch.steps {
            // Writes after a failed one are dropped; the rollback already undid them locally.
            let outcome = match &failure {
                Some(err) => Err(err.replicate()),
                None => shared.persist(step.write).await.inspect_err(|err| {
                    shared.roll_back(batch.operation, &step.rollback, err)
                }),
            };
            notify(step.waiters, &outcome);
            if let Err(err) = outcome {
                failure.get_or_insert(err);
            }
        }
        let result = match failure {
            Some(err) => Err(err),
            None => {
                if count > 0 {
                    debug!(operation = batch.operation, writes = count, "store writes committed");
                }
                Ok(())
            }
        };
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        let _ = batch.done.send(result);
    }
}

async fn settle(wait: Wait) -> Result<()> {
    wait.await.map_err(|_| writer_stopped())?
}

/// Local result of an edit whose store writes may still be running.
#[must_use = "store failures are only reported through `settled`"]
#[derive(Debug)]
pub struct PendingMutation {
    outcome: MutationOutcome,
    waits: Vec<Wait>,
}

impl PendingMutation {
    pub fn outcome(&self) -> &MutationOutcome {
        &self.outcome
    }

    pub fn is_local_only(&self) -> bool {
        self.waits.is_empty()
    }

    /// Resolves once every store write of the edit has finished. On failure the
    /// local snapshot has already been rolled back.
    pub async fn settled(self) -> Result<MutationOutcome> {
        let mut first_error = None;
        for result in join_all(self.waits.into_iter().map(settle)).await {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(self.outcome),
        }
    }
}

/// Owns the editable snapshot of one workflow and keeps it in sync with the store.
pub struct SyncCoordinator<R> {
    shared: Arc<Shared<R>>,
    writer: mpsc::UnboundedSender<Batch>,
    moves: Debouncer<NodeId>,
    config: EngineConfig,
}

impl<R> Clone for SyncCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            writer: self.writer.clone(),
            moves: self.moves.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R: RemoteStore> SyncCoordinator<R> {
    /// Fetches the workflow and starts a session over it.
    pub async fn load(workflow_id: WorkflowId, remote: Arc<R>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let graph = WorkflowGraph::from(remote.fetch_graph(workflow_id).await?);
        let violations = invariants::graph_invariant_violations(&graph);
        if !violations.is_empty() {
            warn!(%workflow_id, ?violations, "stored workflow violates graph invariants");
        }
        info!(
            %workflow_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "workflow graph loaded"
        );
        Ok(Self::new(workflow_id, remote, config, graph))
    }

    /// Must be called from inside a tokio runtime.
    pub fn new(workflow_id: WorkflowId, remote: Arc<R>, config: EngineConfig, graph: WorkflowGraph) -> Self {
        let graph = Arc::new(graph);
        let (graphs, _) = watch::channel(Arc::clone(&graph));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let shared = Arc::new(Shared {
            workflow_id,
            remote,
            state: Mutex::new(State {
                graph,
                suggestor: ProximitySuggestor::new(&config),
                move_rollbacks: HashMap::new(),
                stored_ids: HashMap::new(),
            }),
            in_flight: AtomicUsize::new(0),
            graphs,
            notices,
        });
        let (writer, batches) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(Arc::clone(&shared), batches));
        Self {
            shared,
            writer,
            moves: Debouncer::new(config.debounce_window()),
            config,
        }
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.shared.workflow_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<WorkflowGraph> {
        Arc::clone(&lock(&self.shared.state).graph)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<WorkflowGraph>> {
        self.shared.graphs.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.shared.notices.subscribe()
    }

    /// Writes queued, running or waiting out the debounce window.
    pub fn has_pending_writes(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst) > 0 || self.moves.pending() > 0
    }

    pub fn is_valid_connection(&self, source: NodeId, target: NodeId) -> bool {
        guard::is_valid_connection(&self.snapshot(), source, target)
    }

    /// Applies the edit locally and starts persisting it. Validation errors are
    /// returned here and leave the snapshot untouched.
    pub fn apply_mutation(&self, request: MutationRequest) -> Result<PendingMutation> {
        let operation = request.label();
        let mut state = lock(&self.shared.state);
        let previous = Arc::clone(&state.graph);
        let planned = request
            .plan(&previous, &self.config)
            .inspect_err(|err| debug!(operation, error = %err, "mutation rejected"))?;
        let waits = self.commit(&mut state, operation, previous, planned.applied);
        Ok(PendingMutation {
            outcome: planned.outcome,
            waits,
        })
    }

    fn commit(
        &self,
        state: &mut State,
        operation: &'static str,
        previous: Arc<WorkflowGraph>,
        applied: Applied,
    ) -> Vec<Wait> {
        if applied.graph != *previous {
            self.shared.publish(state, applied.graph);
        }

        let mut steps = Vec::new();
        let mut waits = Vec::new();
        for write in applied.writes {
            match write {
                RemoteWrite::MoveNode(node_move) => {
                    state
                        .move_rollbacks
                        .entry(node_move.id)
                        .or_insert_with(|| Arc::clone(&previous));
                    waits.push(self.schedule_move(operation, node_move.id));
                }
                RemoteWrite::MoveNodes(moves) => {
                    for node_move in &moves {
                        steps.extend(self.take_pending_move(state, node_move.id, &previous));
                    }
                    steps.push(Step::new(RemoteWrite::MoveNodes(moves), &previous));
                }
                RemoteWrite::DeleteNode(node_id) => {
                    steps.extend(self.take_pending_move(state, node_id, &previous));
                    steps.push(Step::new(RemoteWrite::DeleteNode(node_id), &previous));
                }
                write => steps.push(Step::new(write, &previous)),
            }
        }
        if !steps.is_empty() {
            waits.push(self.shared.enqueue(&self.writer, operation, steps));
        }
        waits
    }

    /// Pulls a debounced move out of its window so it reaches the store before
    /// the write that follows it.
    fn take_pending_move(
        &self,
        state: &mut State,
        node_id: NodeId,
        previous: &Arc<WorkflowGraph>,
    ) -> Option<Step> {
        let waiters = self.moves.take(&node_id)?;
        let rollback = state
            .move_rollbacks
            .remove(&node_id)
            .unwrap_or_else(|| Arc::clone(previous));
        let Some(node) = previous.node(node_id) else {
            notify(waiters, &Ok(()));
            return None;
        };
        debug!(%node_id, "pending move sent ahead of the next write");
        Some(Step {
            write: RemoteWrite::MoveNode(NodeMove {
                id: node_id,
                position: node.position,
            }),
            rollback,
            waiters,
        })
    }

    /// The job writes wherever the step sits once the window closes.
    fn schedule_move(&self, operation: &'static str, node_id: NodeId) -> Wait {
        let shared = Arc::clone(&self.shared);
        let writer = self.writer.clone();
        let job = async move {
            let wait = {
                let mut state = lock(&shared.state);
                let rollback = state.move_rollbacks.remove(&node_id);
                let Some(node) = state.graph.node(node_id) else {
                    debug!(%node_id, "debounced move skipped, step is gone");
                    return Ok(());
                };
                let write = RemoteWrite::MoveNode(NodeMove {
                    id: node_id,
                    position: node.position,
                });
                let rollback = rollback.unwrap_or_else(|| Arc::clone(&state.graph));
                // Enqueued under the lock so no later edit can slip in front of it.
                shared.enqueue(&writer, operation, vec![Step::new(write, &rollback)])
            };
            settle(wait).await
        }
        .boxed();
        self.moves.schedule(node_id, job)
    }

    /// Replaces the snapshot with the stored graph. Skipped, returning `false`,
    /// while any write is pending so the fetch cannot clobber newer local edits.
    pub async fn refresh(&self) -> Result<bool> {
        if self.has_pending_writes() {
            debug!(workflow_id = %self.shared.workflow_id, "refresh skipped, writes pending");
            return Ok(false);
        }
        let fetched = self
            .shared
            .remote
            .fetch_graph(self.shared.workflow_id)
            .await
            .inspect_err(|err| {
                let _ = self.shared.notices.send(SyncNotice::from_error("refresh", err));
            })?;

        let mut state = lock(&self.shared.state);
        if self.has_pending_writes() {
            return Ok(false);
        }
        let mut next = WorkflowGraph::from(fetched);
        for node in &mut next.nodes {
            node.selected = state.graph.node(node.id).is_some_and(|local| local.selected);
        }
        for edge in &mut next.edges {
            edge.selected = state
                .graph
                .edge(edge.source, edge.target)
                .is_some_and(|local| local.selected);
        }
        if let Some(suggestion) = state.graph.ephemeral_edge() {
            let (source, target) = suggestion.key();
            if next.contains_node(source) && next.contains_node(target) && !next.has_edge(source, target) {
                next.edges.push(suggestion.clone());
            }
        }
        if next != *state.graph {
            info!(workflow_id = %self.shared.workflow_id, "workflow graph refreshed from store");
            self.shared.publish(&mut state, next);
        }
        Ok(true)
    }

    /// Sends debounced moves now and waits for every queued write.
    pub async fn flush(&self) -> Result<()> {
        self.moves.flush().await;
        let barrier = self.shared.enqueue(&self.writer, "flush", Vec::new());
        settle(barrier).await
    }

    pub fn on_drag_start(&self, node_id: NodeId) {
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        let graph = Arc::clone(&state.graph);
        let cleared = state.suggestor.drag_start(&graph, node_id);
        if cleared.graph != *graph {
            self.shared.publish(state, cleared.graph);
        }
    }

    /// Moves the dragged step and refreshes the proximity suggestion. `layout`
    /// holds the rendered boxes; the dragged one is placed at `position`.
    pub fn on_drag_move(
        &self,
        node_id: NodeId,
        position: Position,
        layout: &[NodeBox],
    ) -> Result<PendingMutation> {
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        let previous = Arc::clone(&state.graph);
        let moved = previous.move_node(node_id, position)?;

        let mut boxes = layout.to_vec();
        if let Some(dragged) = boxes.iter_mut().find(|entry| entry.id == node_id) {
            dragged.x = position.x;
            dragged.y = position.y;
        }
        let suggested = state.suggestor.drag_move(&moved.graph, node_id, &boxes);
        let applied = Applied {
            graph: suggested.graph,
            writes: moved.writes,
            created: None,
        };
        let outcome = MutationOutcome {
            changed: applied.graph != *previous,
            ..MutationOutcome::default()
        };
        let waits = self.commit(state, "move_node", previous, applied);
        Ok(PendingMutation { outcome, waits })
    }

    /// Clears the suggestion and persists it as a transition when it is still valid.
    pub fn on_drag_end(&self, node_id: NodeId) -> Option<PendingMutation> {
        let promoted = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            let graph = Arc::clone(&state.graph);
            let (cleared, promoted) = state.suggestor.drag_end(&graph);
            if cleared.graph != *graph {
                self.shared.publish(state, cleared.graph);
            }
            promoted
        };
        let edge = promoted?;
        debug!(%node_id, source = %edge.source, target = %edge.target, "promoting proximity suggestion");
        match self.apply_mutation(MutationRequest::CreateEdge { edge }) {
            Ok(pending) => Some(pending),
            Err(err) => {
                debug!(%node_id, error = %err, "proximity suggestion could not be promoted");
                None
            }
        }
    }

    /// Arranges every step in rank rows. The new positions go to the store in one write.
    pub fn auto_layout(&self) -> Result<PendingMutation> {
        let mut state = lock(&self.shared.state);
        let previous = Arc::clone(&state.graph);
        let plan = layout::layered_layout(&previous, &self.config.layout);
        let applied = layout::apply_layout(&previous, &plan)?;
        let outcome = MutationOutcome {
            changed: applied.graph != *previous,
            ..MutationOutcome::default()
        };
        let moved = match applied.writes.first() {
            Some(RemoteWrite::MoveNodes(moves)) => moves.len(),
            _ => 0,
        };
        info!(
            workflow_id = %self.shared.workflow_id,
            moved,
            "auto layout applied"
        );
        let waits = self.commit(&mut state, "auto_layout", previous, applied);
        Ok(PendingMutation { outcome, waits })
    }
}
