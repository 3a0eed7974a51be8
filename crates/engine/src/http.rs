//! Thin `axum` surface exposing the engine over HTTP: `POST /runs` submits a
//! request and starts a run in the background, `GET /runs/:id/events`
//! streams its [`Event`]s as SSE.
//!
//! Grounded in this codebase's own run-submission / SSE-event-stream idiom
//! (a `POST` that spawns a background task plus a `GET .../events` endpoint
//! that either replays a terminal snapshot or subscribes to a live stream),
//! rebuilt here without the mesh/session machinery that idiom was originally
//! wired into.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::descriptor::Registry;
use crate::events::{always_approve, Event, RunContext};
use crate::executor::run_dag;
use crate::invoker::Tool;
use crate::throttler::Throttler;

const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    pub config: Arc<EngineConfig>,
    pub throttler: Arc<Throttler>,
    pub provider: Arc<dyn sa_providers::LlmProvider>,
    runs: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
}

impl AppState {
    pub fn new(
        registry: Registry,
        tools: HashMap<String, Arc<dyn Tool>>,
        config: Arc<EngineConfig>,
        throttler: Arc<Throttler>,
        provider: Arc<dyn sa_providers::LlmProvider>,
    ) -> Self {
        Self {
            registry,
            tools: Arc::new(tools),
            config,
            throttler,
            provider,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// Last known state of a run, kept just long enough to answer late
/// `GET /runs/:id/events` subscribers.
struct RunRecord {
    sender: broadcast::Sender<Event>,
    terminal: Option<Event>,
}

fn is_terminal(event: &Event) -> bool {
    matches!(event, Event::FinalAnswer { .. } | Event::Error { .. })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/runs", post(submit_run))
        .route("/runs/:id/events", get(stream_run_events))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct SubmitRunRequest {
    request: String,
}

#[derive(Serialize)]
struct SubmitRunResponse {
    run_id: Uuid,
}

async fn submit_run(
    State(state): State<AppState>,
    Json(body): Json<SubmitRunRequest>,
) -> Json<SubmitRunResponse> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = RunContext::new(tx, always_approve());
    let run_id = ctx.run_id;

    let (broadcast_tx, _) = broadcast::channel(EVENT_BUFFER);
    state.runs.write().await.insert(
        run_id,
        RunRecord { sender: broadcast_tx.clone(), terminal: None },
    );

    let runs = state.runs.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let terminal = is_terminal(&event);
            let _ = broadcast_tx.send(event.clone());
            if terminal {
                if let Some(record) = runs.write().await.get_mut(&run_id) {
                    record.terminal = Some(event);
                }
                break;
            }
        }
    });

    let registry = state.registry.clone();
    let config = state.config.clone();
    let throttler = state.throttler.clone();
    let provider = state.provider.clone();
    let tools = state.tools.clone();

    tokio::spawn(async move {
        tracing::info_span!("run", run_id = %run_id).in_scope(|| {
            tracing::info!("run accepted");
        });
        let plan =
            crate::compiler::compile_plan(&body.request, &registry, provider.as_ref(), &throttler, &config).await;
        run_dag(&plan, &registry, &tools, &ctx, &config, throttler, provider).await;
    });

    Json(SubmitRunResponse { run_id })
}

async fn stream_run_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (terminal, mut receiver) = {
        let runs = state.runs.read().await;
        match runs.get(&run_id) {
            Some(record) if record.terminal.is_some() => (record.terminal.clone(), None),
            Some(record) => (None, Some(record.sender.subscribe())),
            None => (None, None),
        }
    };

    let stream = async_stream::stream! {
        if let Some(event) = terminal {
            yield Ok(to_sse(&event));
            return;
        }
        let Some(mut rx) = receiver.take() else {
            yield Ok(SseEvent::default().event("error").data(
                serde_json::json!({ "message": "unknown run_id" }).to_string(),
            ));
            return;
        };
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = is_terminal(&event);
                    yield Ok(to_sse(&event));
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn event_kind(event: &Event) -> &'static str {
    match event {
        Event::Status { .. } => "status",
        Event::PlanCreated { .. } => "plan_created",
        Event::StepStart { .. } => "step_start",
        Event::DebugArgs { .. } => "debug_args",
        Event::ApprovalRequired { .. } => "approval_required",
        Event::StepComplete { .. } => "step_complete",
        Event::FinalAnswer { .. } => "final_answer",
        Event::Error { .. } => "error",
    }
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event_kind(event))
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}
