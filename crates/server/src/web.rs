//! SessionController: the HTTP surface, the session state machine
//! transitions driven by each endpoint, and the shared cleanup routine's
//! wiring into `StartSession`/`EndSession`/`Heartbeat`/`RoomWebhook`/the
//! reaper.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use orchestrator_protocol::{
    HeartbeatResponse, LiveKitWebhookEvent, OrchestratorConfig, SessionEndResponse,
    SessionStartRequest, SessionStartResponse, SessionStatus, generate_session_id,
    normalize_voice,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::billing::{CreditEngine, DeductMinuteResult};
use crate::cleanup::{self, CleanupGuard, CleanupTrigger};
use crate::spawn::{self, SpawnQueue};
use crate::store::SessionStore;

pub struct AppState {
    pub config: OrchestratorConfig,
    pub store: Arc<SessionStore>,
    pub credit_engine: Arc<CreditEngine>,
    pub spawn_queue: Arc<SpawnQueue>,
    pub cleanup_guard: Arc<CleanupGuard>,
    pub started_at: std::time::Instant,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Constant-time byte comparison, used for the webhook signature check.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Generate a random lowercase-alphanumeric suffix for `generate_session_id`.
fn random_suffix(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Mint a room-join credential: a compact HMAC-SHA256-signed JWT binding
/// `room`/`identity`/grants/TTL, the same scheme the
/// real room service's own access tokens use — built from `hmac`+`sha2`
/// rather than pulling in a dedicated SDK, since signing is all this
/// crate needs (the room service itself is an external collaborator).
fn mint_room_token(
    api_key: &str,
    api_secret: &str,
    room: &str,
    identity: &str,
    ttl: Duration,
) -> String {
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = b64.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = now_unix() + ttl.as_secs();
    let payload = json!({
        "iss": api_key,
        "sub": identity,
        "exp": exp,
        "video": {
            "room": room,
            "roomJoin": true,
            "canPublish": true,
            "canSubscribe": true,
            "canPublishData": true,
        },
    });
    let payload_b64 = b64.encode(payload.to_string());
    let signing_input = format!("{header}.{payload_b64}");

    let mut mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signing_input.as_bytes());
    let signature = b64.encode(mac.finalize().into_bytes());

    format!("{signing_input}.{signature}")
}

/// GET / — service banner.
async fn root_banner() -> impl IntoResponse {
    Json(json!({
        "name": "voice-session-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

/// GET /orchestrator/health
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let redis_connected = state.store.ping().await;
    let livekit_configured = !state.config.room_service.url.is_empty()
        && !state.config.room_service.api_key.is_empty()
        && !state.config.room_service.api_secret.is_empty();
    Json(json!({
        "status": "ok",
        "livekit_configured": livekit_configured,
        "redis_connected": redis_connected,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// POST /orchestrator/session/start.
async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionStartRequest>,
) -> impl IntoResponse {
    let session_id = req.correlation_token.clone().unwrap_or_else(|| {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        generate_session_id(now_ms, &random_suffix(9))
    });

    let (voice_id, voice_validated) = normalize_voice(req.voice_id.as_deref());

    let Some(student_id) = state.credit_engine.get_student_id(&session_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Student not found for this session" })),
        )
            .into_response();
    };

    if !state.credit_engine.check_sufficient(&student_id, 1).await {
        return (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({ "error": "Insufficient credits" })),
        )
            .into_response();
    }

    let outcome = state.credit_engine.deduct_minute(&session_id, 0).await;
    if outcome.result != DeductMinuteResult::Success {
        tracing::error!(
            session_id,
            result = ?outcome.result,
            "Failed to bill minute 0 at session start"
        );
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to reserve initial credit" })),
        )
            .into_response();
    }

    let token = mint_room_token(
        &state.config.room_service.api_key,
        &state.config.room_service.api_secret,
        &session_id,
        &req.user_name,
        Duration::from_secs(state.config.session.credential_ttl_secs),
    );

    let now = now_unix();
    let mut session = orchestrator_protocol::Session::new(
        session_id.clone(),
        req.user_name.clone(),
        voice_id.clone(),
        now,
    );
    session.opening_line = req.opening_line.clone();
    session.system_prompt = req.system_prompt.clone();

    let config_record = orchestrator_protocol::SessionConfigRecord {
        voice_id: voice_id.clone(),
        user_name: req.user_name.clone(),
        opening_line: req.opening_line.clone(),
        system_prompt: req.system_prompt.clone(),
        updated_at: now,
    };

    let ttl = state.config.session.record_ttl_secs;
    state.store.put_config(&session_id, &config_record, ttl).await;
    state.store.put_session(&session, ttl).await;

    let task_id = state
        .spawn_queue
        .enqueue(&session_id, Some(&req.user_name))
        .await;
    if let Some(task_id) = &task_id {
        session.queue_task_id = Some(task_id.clone());
        state.store.put_session(&session, ttl).await;
    } else {
        tracing::error!(session_id, "Failed to enqueue SpawnAgent job");
    }

    (
        StatusCode::OK,
        Json(SessionStartResponse {
            success: true,
            session_id,
            token,
            server_url: state.config.room_service.url.clone(),
            initial_credit_deducted: true,
            credits_remaining: outcome.balance_after,
            minute_billed: 0,
            voice_validated,
        }),
    )
        .into_response()
}

/// POST /orchestrator/session/end. Idempotent — always
/// reports success even when the session was already cleaned up by a
/// concurrent trigger.
async fn end_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<orchestrator_protocol::SessionEndRequest>,
) -> impl IntoResponse {
    let detail = cleanup::run(
        &state.store,
        &state.credit_engine,
        Some(&state.spawn_queue),
        &state.cleanup_guard,
        &req.session_id,
        CleanupTrigger::EndSession,
    )
    .await;

    (
        StatusCode::OK,
        Json(SessionEndResponse {
            success: true,
            message: "Session ended".to_string(),
            details: serde_json::to_value(&detail).unwrap_or(json!({})),
        }),
    )
}

/// POST /api/session/heartbeat.
async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<orchestrator_protocol::HeartbeatRequest>,
) -> impl IntoResponse {
    let Some(mut session) = state.store.get_session(&req.session_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(HeartbeatResponse {
                status: "error".to_string(),
                message: Some("Session not found".to_string()),
                minute_billed: None,
                credits_remaining: None,
                already_billed: None,
                reason: None,
            }),
        )
            .into_response();
    };

    let Some(conversation_start_time) = session.conversation_start_time else {
        return (
            StatusCode::OK,
            Json(HeartbeatResponse {
                status: "error".to_string(),
                message: Some("Conversation has not started".to_string()),
                minute_billed: None,
                credits_remaining: None,
                already_billed: None,
                reason: None,
            }),
        )
            .into_response();
    };

    let now = now_unix();
    let elapsed = now.saturating_sub(conversation_start_time);
    let current_minute = (elapsed / 60) as u32;

    session.last_active = now;
    if session.status == SessionStatus::Ready {
        session.status = SessionStatus::Active;
    }
    let ttl = state.config.session.record_ttl_secs;
    state.store.put_session(&session, ttl).await;

    if current_minute == 0 {
        return (
            StatusCode::OK,
            Json(HeartbeatResponse {
                status: "ok".to_string(),
                message: Some("minute 0 already billed".to_string()),
                minute_billed: None,
                credits_remaining: None,
                already_billed: None,
                reason: None,
            }),
        )
            .into_response();
    }

    let outcome = state
        .credit_engine
        .deduct_minute(&req.session_id, current_minute)
        .await;

    match outcome.result {
        DeductMinuteResult::Success => (
            StatusCode::OK,
            Json(HeartbeatResponse {
                status: "ok".to_string(),
                message: None,
                minute_billed: Some(current_minute),
                credits_remaining: outcome.balance_after,
                already_billed: None,
                reason: None,
            }),
        )
            .into_response(),
        DeductMinuteResult::AlreadyBilled => (
            StatusCode::OK,
            Json(HeartbeatResponse {
                status: "ok".to_string(),
                message: None,
                minute_billed: None,
                credits_remaining: None,
                already_billed: Some(true),
                reason: None,
            }),
        )
            .into_response(),
        DeductMinuteResult::InsufficientCredits => {
            cleanup::mark_terminating(&state.store, &req.session_id, ttl).await;
            let state = Arc::clone(&state);
            let session_id = req.session_id.clone();
            tokio::spawn(async move {
                cleanup::run(
                    &state.store,
                    &state.credit_engine,
                    Some(&state.spawn_queue),
                    &state.cleanup_guard,
                    &session_id,
                    CleanupTrigger::InsufficientCredits,
                )
                .await;
            });
            (
                StatusCode::OK,
                Json(HeartbeatResponse {
                    status: "stop".to_string(),
                    message: None,
                    minute_billed: None,
                    credits_remaining: None,
                    already_billed: None,
                    reason: Some("insufficient_credits".to_string()),
                }),
            )
                .into_response()
        }
        other => {
            tracing::error!(session_id = %req.session_id, current_minute, ?other, "Heartbeat billing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HeartbeatResponse {
                    status: "error".to_string(),
                    message: Some("Billing failed".to_string()),
                    minute_billed: None,
                    credits_remaining: None,
                    already_billed: None,
                    reason: None,
                }),
            )
                .into_response()
        }
    }
}

/// POST /webhook/livekit.
async fn room_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let provided_sig = headers
        .get("x-livekit-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mut mac = Hmac::<Sha256>::new_from_slice(state.config.room_service.api_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(&body);
    let expected_sig = hex_encode(&mac.finalize().into_bytes());

    if !constant_time_eq(expected_sig.as_bytes(), provided_sig.as_bytes()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid webhook signature" })),
        )
            .into_response();
    }

    let event: LiveKitWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Invalid webhook JSON body: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON" })),
            )
                .into_response();
        }
    };

    let room_ref = event
        .room
        .as_ref()
        .and_then(|r| r.name.clone().or_else(|| r.id.clone()));

    match event.event.as_str() {
        "participant_joined" => {
            if let Some(session_id) = &room_ref
                && let Some(mut session) = state.store.get_session(session_id).await
            {
                if session.conversation_start_time.is_none() {
                    session.conversation_start_time = Some(now_unix());
                }
                if session.status == SessionStatus::Ready {
                    session.status = SessionStatus::Active;
                }
                session.last_active = now_unix();
                state
                    .store
                    .put_session(&session, state.config.session.record_ttl_secs)
                    .await;
            }
        }
        "participant_left" | "room_finished" => {
            if let Some(session_id) = &room_ref {
                let existing = state.store.get_session(session_id).await;
                let is_known_session = session_id.starts_with("session_") || existing.is_some();
                if is_known_session {
                    if let Some(mut session) = existing
                        && let Some(start) = session.conversation_start_time
                    {
                        let duration = now_unix().saturating_sub(start);
                        session.conversation_duration = Some(duration);
                        session.conversation_duration_minutes = Some(duration.div_ceil(60));
                        state
                            .store
                            .put_session(&session, state.config.session.record_ttl_secs)
                            .await;
                    }
                    cleanup::run(
                        &state.store,
                        &state.credit_engine,
                        Some(&state.spawn_queue),
                        &state.cleanup_guard,
                        session_id,
                        CleanupTrigger::Webhook,
                    )
                    .await;
                }
            }
        }
        _ => {}
    }

    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "event": event.event })),
    )
        .into_response()
}

/// Read `/proc/{pid}/stat` and return its process-group id, if the pid is alive.
fn read_pgrp(pid: u32) -> Option<u32> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // `comm` (field 2) is parenthesized and may itself contain spaces/parens;
    // find the *last* ')' to skip past it reliably.
    let after_comm = contents.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] = state, fields[1] = ppid, fields[2] = pgrp
    fields.get(2)?.parse().ok()
}

/// Enumerate every pid in `/proc` whose process group is `pgid`.
fn list_process_group_members(pgid: u32) -> Vec<u32> {
    let mut members = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return members;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if read_pgrp(pid) == Some(pgid) {
            members.push(pid);
        }
    }
    members
}

/// GET /api/debug/session/{id}/processes.
async fn debug_session_processes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(session) = state.store.get_session(&id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )
            .into_response();
    };

    let (pid, pgid) = (session.agent_pid, session.agent_pgid);
    let is_process_alive = pid.is_some_and(spawn::process_group_alive);
    let is_group_alive = pgid.or(pid).is_some_and(spawn::process_group_alive);
    let is_group_leader = matches!((pid, pgid), (Some(p), Some(g)) if p == g);
    let children = pgid.map(list_process_group_members).unwrap_or_default();

    Json(json!({
        "session": session,
        "processes": {
            "pid": pid,
            "pgid": pgid,
            "isGroupLeader": is_group_leader,
            "isProcessAlive": is_process_alive,
            "isGroupAlive": is_group_alive,
            "children": children,
        },
    }))
    .into_response()
}

/// GET /api/admin/sessions.
async fn admin_list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ids = state.store.scan_session_ids(100).await;
    let now = now_unix();
    let mut sessions = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(session) = state.store.get_session(&id).await else {
            continue;
        };
        let is_alive = session.agent_pid.is_some_and(spawn::process_group_alive);
        let duration_secs = now.saturating_sub(session.start_time);
        sessions.push(json!({
            "session": session,
            "isAlive": is_alive,
            "durationSecs": duration_secs,
        }));
    }
    let count = sessions.len();
    Json(json!({ "sessions": sessions, "count": count }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<isize>,
}

/// GET /api/admin/sessions/{id}/logs?limit=N.
async fn admin_session_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100);
    let raw_lines = state.store.get_logs(&id, limit).await;
    let logs: Vec<serde_json::Value> = raw_lines
        .into_iter()
        .map(|line| serde_json::from_str(&line).unwrap_or(serde_json::Value::String(line)))
        .collect();
    let count = logs.len();
    Json(json!({ "logs": logs, "count": count }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_banner))
        .route("/orchestrator/health", get(health))
        .route("/orchestrator/session/start", post(start_session))
        .route("/orchestrator/session/end", post(end_session))
        .route("/api/session/heartbeat", post(heartbeat))
        .route("/webhook/livekit", post(room_webhook))
        .route(
            "/api/debug/session/{id}/processes",
            get(debug_session_processes),
        )
        .route("/api/admin/sessions", get(admin_list_sessions))
        .route("/api/admin/sessions/{id}/logs", get(admin_session_logs))
        .layer(RequestBodyLimitLayer::new(65_536))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app_state() -> Arc<AppState> {
        let mut config = OrchestratorConfig::default();
        config.room_service.url = "wss://room.example".to_string();
        config.room_service.api_key = "key".to_string();
        config.room_service.api_secret = "test-secret".to_string();
        config.database.url = "postgres://127.0.0.1:1/nonexistent".to_string();

        let redis_pool = deadpool_redis::Config::from_url("redis://127.0.0.1:1/0")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("pool construction does not connect eagerly");
        let db_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database.url)
            .expect("lazy connect does not touch the network");

        let store = Arc::new(SessionStore::new(redis_pool.clone()));
        let credit_engine = Arc::new(CreditEngine::new(db_pool, redis_pool.clone()));
        let spawn_queue = Arc::new(SpawnQueue::new(redis_pool));

        Arc::new(AppState {
            config,
            store,
            credit_engine,
            spawn_queue,
            cleanup_guard: Arc::new(CleanupGuard::new()),
            started_at: std::time::Instant::now(),
        })
    }

    async fn body_json(response: axum::response::Response<Body>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).expect("response body is not valid JSON")
    }

    #[tokio::test]
    async fn root_banner_returns_ok() {
        let app = build_router(test_app_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn health_reports_room_service_configured() {
        let app = build_router(test_app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/orchestrator/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["livekit_configured"], true);
    }

    #[tokio::test]
    async fn start_session_404s_when_student_lookup_fails() {
        // No live database — GetStudentId degrades to None.
        let app = build_router(test_app_state());
        let request = Request::builder()
            .method("POST")
            .uri("/orchestrator/session/start")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "user_name": "alice", "correlation_token": "tok_abc" }).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_404s_on_missing_session() {
        let app = build_router(test_app_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/session/heartbeat")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "session_id": "nope" }).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn end_session_is_idempotent_when_already_gone() {
        let app = build_router(test_app_state());
        let request = Request::builder()
            .method("POST")
            .uri("/orchestrator/session/end")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "session_id": "gone" }).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let app = build_router(test_app_state());
        let request = Request::builder()
            .method("POST")
            .uri("/webhook/livekit")
            .header("content-type", "application/json")
            .header("x-livekit-signature", "deadbeef")
            .body(Body::from(json!({ "event": "room_finished" }).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_accepts_valid_signature() {
        let app_state = test_app_state();
        let body = json!({ "event": "room_finished", "room": { "name": "session_1_abc" } })
            .to_string();
        let mut mac = Hmac::<Sha256>::new_from_slice(
            app_state.config.room_service.api_secret.as_bytes(),
        )
        .unwrap();
        mac.update(body.as_bytes());
        let sig = hex_encode(&mac.finalize().into_bytes());

        let app = build_router(app_state);
        let request = Request::builder()
            .method("POST")
            .uri("/webhook/livekit")
            .header("content-type", "application/json")
            .header("x-livekit-signature", sig)
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn debug_processes_404s_on_missing_session() {
        let app = build_router(test_app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/debug/session/nope/processes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_list_sessions_empty_when_store_unreachable() {
        let app = build_router(test_app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 0);
    }

    #[test]
    fn constant_time_eq_matches_equal_inputs() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
