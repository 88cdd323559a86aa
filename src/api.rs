//! REST API server for the finance assistant
//!
//! Exposes chat sessions over HTTP. Sessions live in memory and are keyed by
//! UUID; non-UUID ids supplied by clients are hashed into a stable UUID.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AssistantConfig;
use crate::error::AssistantError;
use crate::llm::LanguageAdapter;
use crate::models::FinancialData;
use crate::session::{AnswerMode, ChatMessage, ChatSession};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub session_id: Option<String>,
    pub mode: Option<AnswerMode>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: Option<String>,
    /// Transcript-style clients may send the whole conversation instead
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    pub mode: Option<AnswerMode>,
}

impl ChatRequest {
    /// Explicit `message`, else the last user turn of `messages`
    fn user_text(&self) -> Option<&str> {
        self.message.as_deref().or_else(|| {
            self.messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.as_str())
        })
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(status: StatusCode, error: AssistantError) -> ApiResult {
    (status, Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// API State
/// =============================

type SessionMap = HashMap<Uuid, Arc<Mutex<ChatSession>>>;

#[derive(Clone)]
pub struct ApiState {
    data: Arc<FinancialData>,
    adapter: Arc<dyn LanguageAdapter>,
    config: Arc<AssistantConfig>,
    default_mode: AnswerMode,
    sessions: Arc<RwLock<SessionMap>>,
}

impl ApiState {
    pub fn new(
        data: Arc<FinancialData>,
        adapter: Arc<dyn LanguageAdapter>,
        config: AssistantConfig,
        default_mode: AnswerMode,
    ) -> Self {
        Self {
            data,
            adapter,
            config: Arc::new(config),
            default_mode,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn find_session(&self, id: Uuid) -> Option<Arc<Mutex<ChatSession>>> {
        self.sessions.read().await.get(&id).cloned()
    }

    async fn get_or_create_session(
        &self,
        id: Uuid,
        mode: Option<AnswerMode>,
    ) -> Arc<Mutex<ChatSession>> {
        if let Some(existing) = self.find_session(id).await {
            return existing;
        }

        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&id) {
            prune_sessions(
                &mut sessions,
                self.config.session_idle_timeout,
                self.config.max_sessions,
            );
        }

        sessions
            .entry(id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(ChatSession::start_with_id(
                    id,
                    self.data.clone(),
                    self.adapter.clone(),
                    mode.unwrap_or(self.default_mode),
                    &self.config,
                )))
            })
            .clone()
    }
}

/// Evict idle sessions, then the least recently active ones until there is
/// room for one more. Sessions locked by an in-flight request are kept.
fn prune_sessions(sessions: &mut SessionMap, idle_timeout: Duration, max_sessions: usize) {
    let now = Utc::now();
    let before = sessions.len();

    sessions.retain(|_, session| match session.try_lock() {
        Ok(session) => (now - session.last_active()).to_std().unwrap_or_default() < idle_timeout,
        Err(_) => true,
    });

    while sessions.len() >= max_sessions.max(1) {
        let oldest = sessions
            .iter()
            .filter_map(|(id, session)| {
                session.try_lock().ok().map(|s| (*id, s.last_active()))
            })
            .min_by_key(|(_, last_active)| *last_active)
            .map(|(id, _)| id);

        match oldest {
            Some(id) => {
                sessions.remove(&id);
            }
            None => break,
        }
    }

    let evicted = before - sessions.len();
    if evicted > 0 {
        debug!(evicted, remaining = sessions.len(), "Sessions evicted");
    }
}

/// =============================
/// Helpers - Session Ids
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Parse a client-supplied session id; absent ids get a fresh UUID
fn parse_session_id(value: Option<&str>) -> Uuid {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => Uuid::new_v4(),
    }
}

/// =============================
/// Health & Status
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn status(State(state): State<ApiState>) -> ApiResult {
    let sessions = state.sessions.read().await.len();

    ok(serde_json::json!({
        "provider": state.adapter.provider(),
        "llm_enabled": state.adapter.is_llm(),
        "default_mode": state.default_mode,
        "active_sessions": sessions,
        "transactions": state.data.transactions.len(),
        "products": state.data.products.len(),
    }))
}

/// =============================
/// Session Endpoints
/// =============================

async fn create_session(
    State(state): State<ApiState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let id = parse_session_id(req.session_id.as_deref());

    let session = state.get_or_create_session(id, req.mode).await;
    let session = session.lock().await;

    info!(session_id = %id, "Session opened");

    ok(serde_json::json!({
        "session_id": id,
        "mode": session.mode(),
        "welcome": session.welcome_message(),
    }))
}

async fn list_messages(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_session_id(Some(&id));

    let Some(session) = state.find_session(id).await else {
        return failure(
            StatusCode::NOT_FOUND,
            AssistantError::SessionNotFound(id.to_string()),
        );
    };

    let session = session.lock().await;
    let messages: Vec<ChatMessage> = session.history().messages().to_vec();
    ok(serde_json::json!({ "session_id": id, "messages": messages }))
}

async fn clear_messages(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_session_id(Some(&id));

    let Some(session) = state.find_session(id).await else {
        return failure(
            StatusCode::NOT_FOUND,
            AssistantError::SessionNotFound(id.to_string()),
        );
    };

    let mut session = session.lock().await;
    session.clear();
    ok(serde_json::json!({
        "session_id": id,
        "messages": session.history().messages(),
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let Some(text) = req.user_text() else {
        return failure(
            StatusCode::BAD_REQUEST,
            AssistantError::InvalidInput("nenhuma mensagem do usuário".to_string()),
        );
    };

    let id = parse_session_id(req.session_id.as_deref());
    let session = state.get_or_create_session(id, req.mode).await;
    let mut session = session.lock().await;

    info!(session_id = %id, "Chat message received");
    let reply = session.process_user_input(text).await;

    ok(serde_json::json!({
        "session_id": id,
        "mode": session.mode(),
        "reply": reply,
    }))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/sessions", post(create_session))
        .route(
            "/api/sessions/:id/messages",
            get(list_messages).delete(clear_messages),
        )
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockAdapter;
    use crate::loader::DataLoader;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> ApiState {
        state_with_config(AssistantConfig::default())
    }

    fn state_with_config(config: AssistantConfig) -> ApiState {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        let data = DataLoader::new(dir).load_all().unwrap();
        ApiState::new(Arc::new(data), Arc::new(MockAdapter), config, AnswerMode::Routed)
    }

    async fn active_sessions(state: &ApiState) -> u64 {
        let request = Request::builder().uri("/api/status").body(Body::empty()).unwrap();
        let (_, body) = send(create_router(state.clone()), request).await;
        body["data"]["active_sessions"].as_u64().unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_stable_session_ids() {
        let a = parse_session_id(Some("chat-42"));
        let b = parse_session_id(Some("chat-42"));
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 4);

        let raw = Uuid::new_v4();
        assert_eq!(parse_session_id(Some(&raw.to_string())), raw);
        assert_ne!(parse_session_id(None), parse_session_id(None));
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(create_router(test_state()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_chat_creates_session_and_records_history() {
        let state = test_state();

        let (status, body) = send(
            create_router(state.clone()),
            post_json(
                "/api/chat",
                serde_json::json!({ "session_id": "abc", "message": "quanto gastei?" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["reply"]["intent"], "spending_summary");
        let reply = body["data"]["reply"]["content"].as_str().unwrap();
        assert!(reply.starts_with("Você gastou R$ 3604.90"));

        let session_id = body["data"]["session_id"].as_str().unwrap().to_string();
        let request = Request::builder()
            .uri(format!("/api/sessions/{}/messages", session_id))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(create_router(state.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 3);

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/sessions/abc/messages")
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(create_router(state), request).await;
        assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_accepts_transcript() {
        let (status, body) = send(
            create_router(test_state()),
            post_json(
                "/api/chat",
                serde_json::json!({
                    "messages": [
                        { "role": "user", "content": "oi" },
                        { "role": "assistant", "content": "Olá" },
                        { "role": "user", "content": "onde investir?" }
                    ]
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["reply"]["intent"], "product_suggestion");
    }

    #[tokio::test]
    async fn test_chat_without_user_message_is_rejected() {
        let (status, body) = send(
            create_router(test_state()),
            post_json("/api/chat", serde_json::json!({ "messages": [] })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let request = Request::builder()
            .uri("/api/sessions/missing/messages")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(create_router(test_state()), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_reports_provider() {
        let state = test_state();
        send(
            create_router(state.clone()),
            post_json("/api/sessions", serde_json::json!({ "mode": "dynamic" })),
        )
        .await;

        let request = Request::builder().uri("/api/status").body(Body::empty()).unwrap();
        let (status, body) = send(create_router(state), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["provider"], "mock");
        assert_eq!(body["data"]["llm_enabled"], false);
        assert_eq!(body["data"]["active_sessions"], 1);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let state = state_with_config(AssistantConfig {
            session_idle_timeout: Duration::ZERO,
            ..AssistantConfig::default()
        });

        for _ in 0..3 {
            send(
                create_router(state.clone()),
                post_json("/api/chat", serde_json::json!({ "message": "oi" })),
            )
            .await;
        }

        // each new session evicts the idle ones before it
        assert_eq!(active_sessions(&state).await, 1);
    }

    #[tokio::test]
    async fn test_session_count_is_capped() {
        let state = state_with_config(AssistantConfig {
            max_sessions: 2,
            ..AssistantConfig::default()
        });

        for i in 0..5 {
            send(
                create_router(state.clone()),
                post_json(
                    "/api/chat",
                    serde_json::json!({ "session_id": format!("cliente-{}", i), "message": "oi" }),
                ),
            )
            .await;
        }

        assert_eq!(active_sessions(&state).await, 2);

        // the newest session always survives
        let request = Request::builder()
            .uri("/api/sessions/cliente-4/messages")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(create_router(state), request).await;
        assert_eq!(status, StatusCode::OK);
    }
}
