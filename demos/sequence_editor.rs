use std::env;
use std::fs;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use subseq_workflow::prelude::{
    EngineConfig, MemoryStore, MutationRequest, NewEdge, NewNode, NodeBox, Position,
    SyncCoordinator, WorkflowGraph, WorkflowId,
};

fn load_config() -> anyhow::Result<EngineConfig> {
    let Ok(path) = env::var("WORKFLOW_ENGINE_CONFIG") else {
        return Ok(EngineConfig::default());
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read WORKFLOW_ENGINE_CONFIG '{}'", path))?;
    EngineConfig::from_toml_str(&raw).with_context(|| format!("invalid config in '{}'", path))
}

fn boxes(graph: &WorkflowGraph) -> Vec<NodeBox> {
    graph
        .nodes
        .iter()
        .map(|node| NodeBox {
            id: node.id,
            x: node.position.x,
            y: node.position.y,
            width: 240.0,
            height: 96.0,
        })
        .collect()
}

fn step(kind: &str, x: f64, y: f64, data: Option<serde_json::Value>) -> MutationRequest {
    MutationRequest::CreateNode {
        node: NewNode {
            id: None,
            kind: kind.to_string(),
            position: Position::new(x, y),
            data,
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("subseq_workflow=debug,info")),
        )
        .with_target(false)
        .init();

    let config = load_config()?;
    let workflow_id = WorkflowId(Uuid::new_v4());
    let store = Arc::new(MemoryStore::new().with_server_ids());
    let editor = SyncCoordinator::load(workflow_id, Arc::clone(&store), config)
        .await
        .context("failed to load workflow")?;
    let mut notices = editor.notices();

    editor
        .apply_mutation(step("trigger", 0.0, 0.0, None))?
        .settled()
        .await?;
    // The store assigns its own ids, so look steps up in the reconciled snapshot.
    let trigger = editor
        .snapshot()
        .trigger()
        .map(|node| node.id)
        .ok_or_else(|| anyhow!("trigger step missing"))?;

    editor
        .apply_mutation(step(
            "email",
            0.0,
            600.0,
            Some(json!({ "subject": "Quick intro", "body": "Hi {{first_name}}" })),
        ))?
        .settled()
        .await?;
    editor
        .apply_mutation(step("call", 400.0, 900.0, None))?
        .settled()
        .await?;

    let snapshot = editor.snapshot();
    let email = snapshot
        .nodes
        .iter()
        .find(|node| node.kind.as_str() == "email")
        .map(|node| node.id)
        .ok_or_else(|| anyhow!("email step missing"))?;
    let call = snapshot
        .nodes
        .iter()
        .find(|node| node.kind.as_str() == "call")
        .map(|node| node.id)
        .ok_or_else(|| anyhow!("call step missing"))?;

    // Drag the email step up under the trigger and let the suggestion connect them.
    editor.on_drag_start(email);
    let layout = boxes(&editor.snapshot());
    let mut last_move = None;
    for y in [500.0, 350.0, 180.0] {
        last_move = Some(editor.on_drag_move(email, Position::new(0.0, y), &layout)?);
    }
    if let Some(edge) = editor.snapshot().ephemeral_edge() {
        tracing::info!(source = %edge.source, target = %edge.target, "suggested transition");
    }
    if let Some(promoted) = editor.on_drag_end(email) {
        promoted.settled().await?;
    }
    if let Some(moved) = last_move {
        moved.settled().await?;
    }

    editor
        .apply_mutation(MutationRequest::CreateEdge {
            edge: NewEdge {
                source: email,
                target: call,
                delay: None,
                handles: Default::default(),
            },
        })?
        .settled()
        .await?;

    let closing = editor.apply_mutation(MutationRequest::CreateEdge {
        edge: NewEdge {
            source: call,
            target: trigger,
            delay: None,
            handles: Default::default(),
        },
    });
    if let Err(err) = closing {
        tracing::info!(code = err.code, "rejected as expected: {}", err.public);
    }

    let arranged = editor.auto_layout()?;
    editor.flush().await?;
    arranged.settled().await?;

    while let Ok(notice) = notices.try_recv() {
        tracing::warn!(operation = notice.operation, code = notice.code, "{}", notice.message);
    }

    let stored = store.stored(workflow_id);
    println!(
        "{}",
        serde_json::to_string_pretty(&stored).context("failed to render stored workflow")?
    );
    Ok(())
}
