//! HTTP API edge (§4.10/§6): a thin `axum` layer over the control plane.
//! `ApiServer` holds `Arc`-shared handles to the wired [`Services`]; every
//! handler translates a core `Result<T, CoreError>` into the uniform
//! `{success, data|error, requestId}` envelope and the matching HTTP status.
//!
//! Middleware runs `trace -> cors -> rate_limit -> auth`. Unlike the
//! teacher's single global auth layer, auth here is scoped to the mutating
//! routes via a nested router (§6 marks only `POST`/`DELETE` endpoints
//! `(auth)`; GETs and the health checks stay open).

use crate::adapters::{Persistence, PersistenceExt};
use crate::auth::{auth_middleware, create_auth_state};
use crate::config::Config;
use crate::constants::{DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_WALL_CLOCK_SECONDS, MAX_WORK_ORDER_DEPTH};
use crate::core::broadcaster::Event;
use crate::core::queue_facade::QueueFacadeConfigUpdate;
use crate::core::Services;
use crate::models::{EventFilter, Run, WorkOrder, WorkOrderStatus, WorkspaceSource};
use crate::rate_limit::{rate_limit_middleware, RateLimitConfig};
use crate::validation::PromptContentValidator;
use crate::CoreError;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

const SERVICE_NAME: &str = "agentgate-core";
const SERVICE_VERSION: &str = "0.1.0";

const DEFAULT_PAGE_LIMIT: usize = 50;

/// Wraps a successful value in the uniform response envelope (§6/§7).
fn envelope_ok<T: Serialize>(status: StatusCode, request_id: Uuid, data: T) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": true,
            "data": data,
            "request_id": request_id,
        })),
    )
        .into_response()
}

/// Wraps a [`CoreError`] in the uniform error envelope, logging once at the
/// boundary where it's first observed (§7: never re-logged at every hop).
fn envelope_err(request_id: Uuid, err: CoreError) -> Response {
    let status = err.http_status();
    warn!(%request_id, error = %err, code = err.api_code(), "request failed");
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": {
                "code": err.api_code(),
                "message": err.to_string(),
            },
            "request_id": request_id,
        })),
    )
        .into_response()
}

fn respond<T: Serialize>(request_id: Uuid, status: StatusCode, result: crate::Result<T>) -> Response {
    match result {
        Ok(data) => envelope_ok(status, request_id, data),
        Err(e) => envelope_err(request_id, e),
    }
}

fn event_name(event: &Event) -> String {
    serde_json::to_value(event.event_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "event".to_string())
}

/// Everything a handler needs: the wired control plane, the prompt
/// validator, and per-process rate-limit state. Cheap to clone (every
/// field is an `Arc` or a handful of `Arc`-backed limiters) so it doubles
/// as the router's `State`.
#[derive(Clone)]
pub struct ApiServer {
    config: crate::config::ApiConfig,
    services: Arc<Services>,
    validator: Arc<PromptContentValidator>,
    rate_limiter: RateLimitConfig,
}

impl ApiServer {
    pub fn new(config: &Config, services: Arc<Services>) -> crate::Result<Self> {
        Ok(Self {
            config: config.api.clone(),
            services,
            validator: Arc::new(PromptContentValidator::new()?),
            rate_limiter: RateLimitConfig::new(),
        })
    }

    pub async fn run(&self) -> crate::Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        info!(host = %self.config.host, port = self.config.port, "API server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(())
    }

    /// Order matters: Trace -> CORS -> rate limit -> auth -> routes (§4.10).
    /// Auth is `route_layer`'d onto the protected sub-router rather than
    /// applied globally, so it runs last (closest to the handler) without
    /// gating the public GETs and health checks.
    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ])
            .max_age(std::time::Duration::from_secs(3600));

        let protected = Router::new()
            .route("/api/v1/work-orders", post(create_work_order))
            .route("/api/v1/work-orders/{id}", delete(cancel_work_order))
            .route("/api/v1/work-orders/{id}/runs", post(start_run))
            .route("/api/v1/work-orders/{id}/kill", post(kill_work_order))
            .route("/api/v1/queue/rollout/config", post(update_rollout_config))
            .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let public = Router::new()
            .route("/health", get(health_check))
            .route("/health/ready", get(health_ready))
            .route("/health/live", get(health_live))
            .route("/api/v1/work-orders", get(list_work_orders))
            .route("/api/v1/work-orders/{id}", get(get_work_order))
            .route("/api/v1/runs", get(list_runs))
            .route("/api/v1/runs/{id}", get(get_run))
            .route("/api/v1/runs/{id}/stream", get(stream_run))
            .route("/api/v1/queue/health", get(queue_health))
            .route("/api/v1/queue/stats", get(queue_stats))
            .route("/api/v1/queue/position/{id}", get(queue_position))
            .route("/api/v1/queue/rollout/status", get(rollout_status))
            .route("/api/v1/queue/rollout/comparison", get(rollout_comparison))
            .route("/api/v1/ws", get(ws_handler));

        public
            .merge(protected)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer)
                    .layer(middleware::from_fn_with_state(
                        self.rate_limiter.clone(),
                        rate_limit_middleware,
                    )),
            )
            .with_state(self.clone())
    }
}

async fn health_check() -> Response {
    envelope_ok(
        StatusCode::OK,
        Uuid::new_v4(),
        serde_json::json!({"status": "ok", "service": SERVICE_NAME, "version": SERVICE_VERSION}),
    )
}

/// Unready (503) only when the resource monitor has hit the critical
/// memory threshold; otherwise the process is considered able to serve
/// traffic even with an empty queue.
async fn health_ready(State(server): State<ApiServer>) -> Response {
    let request_id = Uuid::new_v4();
    if server.services.resource_monitor.memory_fraction() >= 1.0 {
        return envelope_err(
            request_id,
            CoreError::ServiceUnavailable("memory pressure critical".to_string()),
        );
    }
    envelope_ok(StatusCode::OK, request_id, serde_json::json!({"ready": true}))
}

async fn health_live() -> Response {
    envelope_ok(StatusCode::OK, Uuid::new_v4(), serde_json::json!({"alive": true}))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkOrderRequest {
    pub prompt: String,
    pub workspace_source: WorkspaceSource,
    pub agent_type: String,
    pub max_iterations: Option<u32>,
    pub max_wall_clock_seconds: Option<u64>,
    pub harness_profile_ref: Option<String>,
    pub priority: Option<i32>,
    pub parent_id: Option<Uuid>,
}

async fn create_work_order(
    State(server): State<ApiServer>,
    Json(req): Json<CreateWorkOrderRequest>,
) -> Response {
    let request_id = Uuid::new_v4();

    let prompt = match server.validator.validate_and_sanitize_prompt(&req.prompt) {
        Ok(p) => p,
        Err(e) => return envelope_err(request_id, e),
    };

    let mut work_order = WorkOrder::new(
        prompt,
        req.workspace_source,
        req.agent_type,
        req.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        req.max_wall_clock_seconds.unwrap_or(DEFAULT_MAX_WALL_CLOCK_SECONDS),
    );
    work_order.harness_profile_ref = req.harness_profile_ref;
    work_order.priority = req.priority.unwrap_or(0);

    if let Some(parent_id) = req.parent_id {
        match server
            .services
            .persistence
            .load::<WorkOrder>("work_order", parent_id)
            .await
        {
            Ok(Some(parent)) => {
                if parent.depth + 1 > MAX_WORK_ORDER_DEPTH {
                    return envelope_err(
                        request_id,
                        CoreError::Validation(format!(
                            "work order depth would exceed the maximum of {MAX_WORK_ORDER_DEPTH}"
                        )),
                    );
                }
                work_order.parent_id = Some(parent_id);
                work_order.depth = parent.depth + 1;
            }
            Ok(None) => {
                return envelope_err(request_id, CoreError::NotFound(format!("work order {parent_id}")))
            }
            Err(e) => return envelope_err(request_id, e),
        }
    }

    match server.services.orchestrator.submit(work_order.clone()).await {
        Ok(_queued) => envelope_ok(StatusCode::CREATED, request_id, work_order),
        Err(e) => envelope_err(request_id, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkOrderListQuery {
    pub status: Option<WorkOrderStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

async fn list_work_orders(
    State(server): State<ApiServer>,
    Query(query): Query<WorkOrderListQuery>,
) -> Response {
    let request_id = Uuid::new_v4();

    let ids = match server.services.persistence.list_ids("work_order").await {
        Ok(ids) => ids,
        Err(e) => return envelope_err(request_id, e),
    };

    let mut work_orders = Vec::new();
    for id in ids {
        match server.services.persistence.load::<WorkOrder>("work_order", id).await {
            Ok(Some(wo)) if query.status.map_or(true, |s| s == wo.status) => work_orders.push(wo),
            Ok(_) => {}
            Err(e) => return envelope_err(request_id, e),
        }
    }
    work_orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = work_orders.len();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let page: Vec<WorkOrder> = work_orders.into_iter().skip(offset).take(limit).collect();

    envelope_ok(
        StatusCode::OK,
        request_id,
        serde_json::json!({"work_orders": page, "total": total}),
    )
}

#[derive(Debug, Serialize)]
struct WorkOrderDetail {
    #[serde(flatten)]
    work_order: WorkOrder,
    runs: Vec<Run>,
    harness_profile: Option<crate::models::HarnessProfile>,
}

async fn get_work_order(State(server): State<ApiServer>, Path(id): Path<Uuid>) -> Response {
    let request_id = Uuid::new_v4();

    let work_order: WorkOrder = match server.services.persistence.load("work_order", id).await {
        Ok(Some(wo)) => wo,
        Ok(None) => return envelope_err(request_id, CoreError::NotFound(format!("work order {id}"))),
        Err(e) => return envelope_err(request_id, e),
    };

    let runs = match runs_for_work_order(&server, id).await {
        Ok(runs) => runs,
        Err(e) => return envelope_err(request_id, e),
    };

    let profile_name = work_order.harness_profile_ref.as_deref().unwrap_or("default");
    let harness_profile = server.services.harness_profiles.get(profile_name).await.ok();

    envelope_ok(
        StatusCode::OK,
        request_id,
        WorkOrderDetail {
            work_order,
            runs,
            harness_profile,
        },
    )
}

async fn runs_for_work_order(server: &ApiServer, work_order_id: Uuid) -> crate::Result<Vec<Run>> {
    let run_ids = server.services.persistence.list_ids("run").await?;
    let mut runs = Vec::new();
    for run_id in run_ids {
        if let Some(run) = server.services.persistence.load::<Run>("run", run_id).await? {
            if run.work_order_id == work_order_id {
                runs.push(run);
            }
        }
    }
    runs.sort_by_key(|r| r.started_at);
    Ok(runs)
}

async fn cancel_work_order(State(server): State<ApiServer>, Path(id): Path<Uuid>) -> Response {
    let request_id = Uuid::new_v4();

    let work_order: WorkOrder = match server.services.persistence.load("work_order", id).await {
        Ok(Some(wo)) => wo,
        Ok(None) => return envelope_err(request_id, CoreError::NotFound(format!("work order {id}"))),
        Err(e) => return envelope_err(request_id, e),
    };

    if work_order.status.is_terminal() {
        return envelope_err(
            request_id,
            CoreError::Conflict(format!("work order {id} is already {:?}", work_order.status)),
        );
    }

    respond(
        request_id,
        StatusCode::OK,
        server
            .services
            .orchestrator
            .cancel(id)
            .await
            .map(|()| serde_json::json!({"id": id, "status": "canceled"})),
    )
}

/// Force-kill (§6): unlike [`cancel_work_order`], never rejects a terminal
/// work order with a conflict — an operator killing an already-finished
/// work order is a no-op, not an error.
async fn kill_work_order(State(server): State<ApiServer>, Path(id): Path<Uuid>) -> Response {
    let request_id = Uuid::new_v4();
    respond(
        request_id,
        StatusCode::OK,
        server
            .services
            .orchestrator
            .cancel(id)
            .await
            .map(|()| serde_json::json!({"id": id, "status": "killed"})),
    )
}

async fn start_run(State(server): State<ApiServer>, Path(id): Path<Uuid>) -> Response {
    let request_id = Uuid::new_v4();
    respond(
        request_id,
        StatusCode::ACCEPTED,
        server.services.orchestrator.start_run(id).await,
    )
}

#[derive(Debug, Deserialize)]
pub struct RunListQuery {
    pub work_order_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

async fn list_runs(State(server): State<ApiServer>, Query(query): Query<RunListQuery>) -> Response {
    let request_id = Uuid::new_v4();

    let ids = match server.services.persistence.list_ids("run").await {
        Ok(ids) => ids,
        Err(e) => return envelope_err(request_id, e),
    };

    let mut runs = Vec::new();
    for id in ids {
        match server.services.persistence.load::<Run>("run", id).await {
            Ok(Some(run)) if query.work_order_id.map_or(true, |wo| wo == run.work_order_id) => {
                runs.push(run)
            }
            Ok(_) => {}
            Err(e) => return envelope_err(request_id, e),
        }
    }
    runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));

    let total = runs.len();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let page: Vec<Run> = runs.into_iter().skip(offset).take(limit).collect();

    envelope_ok(StatusCode::OK, request_id, serde_json::json!({"runs": page, "total": total}))
}

async fn get_run(State(server): State<ApiServer>, Path(id): Path<Uuid>) -> Response {
    let request_id = Uuid::new_v4();
    match server.services.persistence.load::<Run>("run", id).await {
        Ok(Some(run)) => envelope_ok(StatusCode::OK, request_id, run),
        Ok(None) => envelope_err(request_id, CoreError::NotFound(format!("run {id}"))),
        Err(e) => envelope_err(request_id, e),
    }
}

/// SSE stream (§6): `connected` first, then every broadcaster event scoped
/// to this run's work order for as long as the client stays connected.
async fn stream_run(State(server): State<ApiServer>, Path(id): Path<Uuid>) -> Response {
    let request_id = Uuid::new_v4();

    let run: Run = match server.services.persistence.load("run", id).await {
        Ok(Some(run)) => run,
        Ok(None) => return envelope_err(request_id, CoreError::NotFound(format!("run {id}"))),
        Err(e) => return envelope_err(request_id, e),
    };

    let client_id = format!("sse-{id}");
    let mut work_order_ids = HashSet::new();
    work_order_ids.insert(run.work_order_id);
    let rx = server.services.broadcaster.subscribe(client_id, work_order_ids, None);

    let connected = SseEvent::default().event("connected").json_data(serde_json::json!({
        "client_id": request_id,
        "run_id": run.id,
        "run_status": run.state,
        "current_iteration": run.iteration,
        "timestamp": chrono::Utc::now(),
    }));

    let connected_stream = stream::once(async move {
        Ok::<SseEvent, Infallible>(connected.unwrap_or_else(|_| SseEvent::default()))
    });

    let event_stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .map(|event| {
        let name = event_name(&event);
        Ok::<SseEvent, Infallible>(
            SseEvent::default()
                .event(name)
                .json_data(&event)
                .unwrap_or_else(|_| SseEvent::default()),
        )
    });

    Sse::new(connected_stream.chain(event_stream))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn queue_health(State(server): State<ApiServer>) -> Response {
    let request_id = Uuid::new_v4();
    let resource_monitor = &server.services.resource_monitor;
    let body = serde_json::json!({
        "accepting_admissions": resource_monitor.can_start(),
        "available_slots": resource_monitor.available_slots(),
        "running_count": server.services.scheduler.running_count(),
        "queue_depth": server.services.queue_facade.total_queue_depth(),
        "memory_fraction": resource_monitor.memory_fraction(),
        "dropped_events": server.services.broadcaster.dropped_count(),
    });
    envelope_ok(StatusCode::OK, request_id, body)
}

async fn queue_stats(State(server): State<ApiServer>) -> Response {
    let request_id = Uuid::new_v4();
    let facade = &server.services.queue_facade;
    let body = serde_json::json!({
        "phase": format!("{:?}", facade.phase()),
        "counters": facade.counters(),
        "legacy_depth": facade.legacy_queue().queue_depth(),
        "new_depth": facade.scheduler().queue_depth(),
        "total_depth": facade.total_queue_depth(),
    });
    envelope_ok(StatusCode::OK, request_id, body)
}

async fn queue_position(State(server): State<ApiServer>, Path(id): Path<Uuid>) -> Response {
    let request_id = Uuid::new_v4();
    match server.services.queue_facade.position(id) {
        Some((position, ahead, state)) => envelope_ok(
            StatusCode::OK,
            request_id,
            serde_json::json!({"position": position, "ahead": ahead, "state": state}),
        ),
        None => envelope_err(
            request_id,
            CoreError::NotFound(format!("work order {id} is not queued")),
        ),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RolloutConfigUpdateRequest {
    pub use_new_queue_system: Option<bool>,
    pub shadow_mode: Option<bool>,
    pub rollout_percent: Option<u8>,
}

async fn update_rollout_config(
    State(server): State<ApiServer>,
    Json(req): Json<RolloutConfigUpdateRequest>,
) -> Response {
    let request_id = Uuid::new_v4();
    server.services.queue_facade.update_config(QueueFacadeConfigUpdate {
        use_new_queue_system: req.use_new_queue_system,
        shadow_mode: req.shadow_mode,
        rollout_percent: req.rollout_percent,
    });
    envelope_ok(StatusCode::OK, request_id, server.services.queue_facade.config())
}

async fn rollout_status(State(server): State<ApiServer>) -> Response {
    let request_id = Uuid::new_v4();
    let facade = &server.services.queue_facade;
    envelope_ok(
        StatusCode::OK,
        request_id,
        serde_json::json!({
            "config": facade.config(),
            "phase": format!("{:?}", facade.phase()),
            "counters": facade.counters(),
        }),
    )
}

async fn rollout_comparison(State(server): State<ApiServer>) -> Response {
    let request_id = Uuid::new_v4();
    let facade = &server.services.queue_facade;
    let counters = facade.counters();
    envelope_ok(
        StatusCode::OK,
        request_id,
        serde_json::json!({
            "legacy": {
                "queue_depth": facade.legacy_queue().queue_depth(),
                "routed": counters.routed_to_legacy,
            },
            "new_system": {
                "queue_depth": facade.scheduler().queue_depth(),
                "routed": counters.routed_to_new,
            },
            "shadow_mismatches": counters.shadow_mismatches,
            "fallbacks": counters.fallbacks,
            "total_routed": counters.total_routed,
        }),
    )
}

#[derive(Debug, Deserialize)]
struct WsAuthQuery {
    token: Option<String>,
}

/// Upgrades to a WebSocket (§6). Since a browser's `WebSocket` constructor
/// can't set an `Authorization` header, the bearer check happens against a
/// `?token=` query parameter instead, using the same constant-time
/// comparison as [`auth_middleware`].
async fn ws_handler(
    State(server): State<ApiServer>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if server.config.enable_auth {
        use subtle::ConstantTimeEq;
        let expected = server.config.api_key.as_deref().unwrap_or("");
        let provided = query.token.unwrap_or_default();
        let authorized: bool = provided.as_bytes().ct_eq(expected.as_bytes()).into();
        if expected.is_empty() || !authorized {
            return envelope_err(Uuid::new_v4(), CoreError::Unauthorized);
        }
    }

    ws.on_upgrade(move |socket| handle_ws_socket(socket, server))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsClientMessage {
    Subscribe {
        work_order_id: Uuid,
        filters: Option<EventFilter>,
    },
    Unsubscribe {
        work_order_id: Uuid,
    },
    Ping,
}

/// Drives one client connection: re-subscribes (replacing the channel) on
/// every `subscribe`/`unsubscribe` since [`crate::core::broadcaster::EventBroadcaster::subscribe`]
/// takes the full interest set each time rather than incrementally.
async fn handle_ws_socket(socket: WebSocket, server: ApiServer) {
    use futures::SinkExt;

    let (mut sender, mut receiver) = socket.split();
    let client_id = format!("ws-{}", Uuid::new_v4());
    let mut work_order_ids: HashSet<Uuid> = HashSet::new();
    let mut filter: Option<EventFilter> = None;
    let mut rx = server
        .services
        .broadcaster
        .subscribe(client_id.clone(), work_order_ids.clone(), filter.clone());

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<WsClientMessage>(&text) {
                            Ok(WsClientMessage::Subscribe { work_order_id, filters }) => {
                                work_order_ids.insert(work_order_id);
                                filter = filters;
                                rx = server.services.broadcaster.subscribe(
                                    client_id.clone(),
                                    work_order_ids.clone(),
                                    filter.clone(),
                                );
                            }
                            Ok(WsClientMessage::Unsubscribe { work_order_id }) => {
                                work_order_ids.remove(&work_order_id);
                                rx = server.services.broadcaster.subscribe(
                                    client_id.clone(),
                                    work_order_ids.clone(),
                                    filter.clone(),
                                );
                            }
                            Ok(WsClientMessage::Ping) => {
                                let pong = serde_json::json!({"type": "pong"}).to_string();
                                if sender.send(WsMessage::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let error = serde_json::json!({"type": "error", "message": e.to_string()}).to_string();
                                if sender.send(WsMessage::Text(error.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(_) => continue,
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    server.services.broadcaster.unsubscribe(&client_id);
}
