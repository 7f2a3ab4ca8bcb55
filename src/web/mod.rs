//! HTTP / WebSocket 接口（feature = "web"）
//!
//! 用户身份取自 `x-user-id` 请求头（缺省 anonymous）；同一会话的消息通过按会话的异步锁串行处理，
//! 不同会话互不阻塞。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentComponents, ChatReply};
use crate::core::AgentError;
use crate::memory::{Conversation, EventFilter, Message};

pub const USER_HEADER: &str = "x-user-id";
const ANONYMOUS_USER: &str = "anonymous";

type LockMap = HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>;

/// 按会话 id 分配的异步锁；没有持有者也没有等待者的条目会被回收
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// 持有期间独占该会话
pub struct ConversationGuard {
    conversation_id: Uuid,
    locks: ConversationLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        // 先释放锁（连同它持有的 Arc），再判断条目是否还有人用
        self.guard.take();
        self.locks.release(self.conversation_id);
    }
}

impl ConversationLocks {
    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn acquire(&self, conversation_id: Uuid) -> ConversationGuard {
        let lock = {
            let mut map = self.map();
            // 计数为 1 说明只剩表本身引用（例如等待者被取消后留下的条目）
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(conversation_id).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        ConversationGuard {
            conversation_id,
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    fn release(&self, conversation_id: Uuid) {
        let mut map = self.map();
        if map
            .get(&conversation_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            map.remove(&conversation_id);
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<AgentComponents>,
    pub locks: ConversationLocks,
}

impl AppState {
    pub fn new(agent: AgentComponents) -> Self {
        Self {
            agent: Arc::new(agent),
            locks: ConversationLocks::default(),
        }
    }

    /// 先校验会话归属，再串行化同一会话内的消息处理
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, AgentError> {
        self.agent.conversation(conversation_id, user_id)?;
        let _guard = self.locks.acquire(conversation_id).await;
        self.agent
            .send_message(conversation_id, user_id, text, cancel)
            .await
    }
}

/// AgentError → HTTP 响应
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e)
    }
}

pub fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AgentError::NotFound(_) => StatusCode::NOT_FOUND,
        AgentError::Orchestration(_) | AgentError::ToolLoopExceeded { .. } => StatusCode::BAD_GATEWAY,
        AgentError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::Configuration(_) | AgentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({"error": self.0.to_string(), "code": self.0.code()})),
        )
            .into_response()
    }
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

/// 非法 id 与不存在的记录同样返回 404
fn parse_id(raw: &str, kind: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError(AgentError::NotFound(format!("{kind} {raw}"))))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/conversations/:id/send_message", post(send_message))
        .route("/api/conversations/:id/history", get(history))
        .route("/api/events", get(events_all))
        .route("/api/events/upcoming", get(events_upcoming))
        .route("/api/events/past", get(events_past))
        .route("/api/events/:id", get(get_event).delete(delete_event))
        .route("/ws/chat/:id", get(ws_chat))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct CreateConversationBody {
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SendMessageBody {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct ConversationDetail {
    #[serde(flatten)]
    conversation: Conversation,
    messages: Vec<Message>,
}

async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateConversationBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let conversation = state
        .agent
        .start_conversation(&user_id(&headers), body.title.as_deref())?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.agent.conversations(&user_id(&headers))?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "conversation")?;
    let conversation = state.agent.conversation(id, &user_id(&headers))?;
    let messages = state.agent.history(id)?;
    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "conversation")?;
    state.agent.delete_conversation(id, &user_id(&headers))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "conversation")?;
    let reply = state
        .send_message(id, &user_id(&headers), &body.message, &CancellationToken::new())
        .await?;
    Ok(Json(reply))
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "conversation")?;
    state.agent.conversation(id, &user_id(&headers))?;
    let messages = state.agent.history(id)?;
    Ok(Json(json!({"conversation_id": id, "messages": messages})))
}

async fn list_events(
    state: &AppState,
    headers: &HeaderMap,
    filter: EventFilter,
) -> Result<Json<Value>, ApiError> {
    let events = state.agent.events(&user_id(headers), filter)?;
    Ok(Json(json!(events)))
}

async fn events_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    list_events(&state, &headers, EventFilter::All).await
}

async fn events_upcoming(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    list_events(&state, &headers, EventFilter::Upcoming).await
}

async fn events_past(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    list_events(&state, &headers, EventFilter::Past).await
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "event")?;
    Ok(Json(state.agent.event(id, &user_id(&headers))?))
}

async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "event")?;
    state.agent.delete_event(id, &user_id(&headers))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ws_chat(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "conversation")?;
    let user = user_id(&headers);
    state.agent.conversation(id, &user)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, id, user)))
}

/// 一条客户端文本帧 → 一条回复帧：{"type":"agent_message","message","mood"} 或 {"error"[,"code"]}
async fn relay_frame(
    state: &AppState,
    conversation_id: Uuid,
    user: &str,
    text: &str,
    cancel: &CancellationToken,
) -> Value {
    let body = match serde_json::from_str::<SendMessageBody>(text) {
        Ok(body) => body,
        Err(e) => return json!({"error": format!("invalid payload: {e}")}),
    };
    match state.send_message(conversation_id, user, &body.message, cancel).await {
        Ok(reply) => json!({
            "type": "agent_message",
            "message": reply.reply,
            "mood": reply.mood,
        }),
        Err(e) => json!({"error": e.to_string(), "code": e.code()}),
    }
}

/// 读到下一条文本帧；连接关闭或出错时返回 None
async fn next_text(socket: &mut WebSocket) -> Option<String> {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            WsMessage::Text(t) => return Some(t),
            WsMessage::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

/// 逐条处理客户端消息。处理期间继续读取 socket：新消息排队，断开则取消进行中的一轮。
async fn handle_socket(mut socket: WebSocket, state: AppState, conversation_id: Uuid, user: String) {
    tracing::info!(conversation = %conversation_id, user = %user, "websocket connected");
    let cancel = CancellationToken::new();
    let mut pending: VecDeque<String> = VecDeque::new();

    'conn: loop {
        let text = match pending.pop_front() {
            Some(text) => text,
            None => match next_text(&mut socket).await {
                Some(text) => text,
                None => break,
            },
        };

        let turn = relay_frame(&state, conversation_id, &user, &text, &cancel);
        tokio::pin!(turn);
        let frame = loop {
            tokio::select! {
                frame = &mut turn => break frame,
                incoming = socket.recv() => match incoming {
                    Some(Ok(WsMessage::Text(t))) => pending.push_back(t),
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                        tracing::info!(conversation = %conversation_id, "client left mid-turn, cancelling");
                        cancel.cancel();
                        (&mut turn).await;
                        break 'conn;
                    }
                    Some(Ok(_)) => {}
                },
            }
        };
        if socket.send(WsMessage::Text(frame.to_string())).await.is_err() {
            break;
        }
    }
    cancel.cancel();
    tracing::info!(conversation = %conversation_id, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::{SystemPrompt, TurnOrchestrator};
    use crate::llm::{LlmError, ModelClient, ModelRequest, ModelResponse, ScriptedModelClient};
    use crate::memory::{InMemoryStore, Role};
    use crate::tools::{SaveEventTool, ToolExecutor, ToolRegistry};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    /// 每次调用前先等一会儿，让并发请求真正交错
    struct SlowModel(ScriptedModelClient);

    #[async_trait]
    impl ModelClient for SlowModel {
        fn model(&self) -> &str {
            self.0.model()
        }

        async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.generate(request).await
        }
    }

    fn state_with(model: Arc<dyn ModelClient>) -> AppState {
        let mut registry = ToolRegistry::new();
        registry.register(SaveEventTool);
        let orchestrator = TurnOrchestrator::new(model, ToolExecutor::new(registry, 5));
        let agent =
            AgentComponents::new(orchestrator, SystemPrompt::default(), Arc::new(InMemoryStore::new()));
        AppState::new(agent)
    }

    fn app(model: ScriptedModelClient) -> Router {
        router(state_with(Arc::new(model)))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_HEADER, "ana");
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn new_conversation(app: &Router) -> String {
        let (status, body) = call(app, "POST", "/api/conversations", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(ScriptedModelClient::new(vec![]));
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_message_and_history() {
        let app = app(ScriptedModelClient::new(vec![ModelResponse::text(
            "Va a llover toda la tarde 🌧",
        )]));
        let id = new_conversation(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/conversations/{id}/send_message"),
            Some(json!({"message": "¿Lloverá hoy?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "Va a llover toda la tarde 🌧");
        assert_eq!(body["mood"], "rainy");
        assert_eq!(body["conversation_id"], id.as_str());
        assert_eq!(body["user_message"]["content"], "¿Lloverá hoy?");

        let (status, body) = call(&app, "GET", &format!("/api/conversations/{id}/history"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let app = app(ScriptedModelClient::new(vec![]));
        let id = new_conversation(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/conversations/{id}/send_message"),
            Some(json!({"message": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_input");
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let app = app(ScriptedModelClient::new(vec![]));
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/conversations/{}/send_message", Uuid::new_v4()),
            Some(json!({"message": "hola"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/api/conversations/not-a-uuid/history", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_model_failure_is_bad_gateway() {
        let app = app(ScriptedModelClient::new(vec![]).then_fail(LlmError::Timeout(60)));
        let id = new_conversation(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/conversations/{id}/send_message"),
            Some(json!({"message": "hola"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "orchestration_error");
    }

    #[tokio::test]
    async fn test_events_split_by_date() {
        let app = app(ScriptedModelClient::new(vec![
            ModelResponse::function_call(
                "save_event",
                json!({"event_name": "Concierto", "event_date": "2099-07-01T21:00:00Z"}),
            ),
            ModelResponse::text("Evento guardado ✅"),
            ModelResponse::function_call(
                "save_event",
                json!({"event_name": "Cumpleaños", "event_date": "2001-03-03"}),
            ),
            ModelResponse::text("Evento guardado ✅"),
        ]));
        let id = new_conversation(&app).await;
        for text in ["Guarda el concierto", "Guarda mi cumpleaños"] {
            let (status, _) = call(
                &app,
                "POST",
                &format!("/api/conversations/{id}/send_message"),
                Some(json!({"message": text})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, all) = call(&app, "GET", "/api/events", None).await;
        let names: Vec<&str> = all
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["name"].as_str())
            .collect();
        assert_eq!(names, vec!["Concierto", "Cumpleaños"]);

        let (_, upcoming) = call(&app, "GET", "/api/events/upcoming", None).await;
        assert_eq!(upcoming.as_array().unwrap().len(), 1);
        assert_eq!(upcoming[0]["name"], "Concierto");

        let (_, past) = call(&app, "GET", "/api/events/past", None).await;
        assert_eq!(past[0]["name"], "Cumpleaños");
    }

    #[tokio::test]
    async fn test_conversation_retrieve_and_destroy() {
        let app = app(ScriptedModelClient::new(vec![ModelResponse::text("Despejado ☀")]));
        let id = new_conversation(&app).await;
        call(
            &app,
            "POST",
            &format!("/api/conversations/{id}/send_message"),
            Some(json!({"message": "¿Qué tal el día?"})),
        )
        .await;

        let (status, body) = call(&app, "GET", &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["user_id"], "ana");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Despejado ☀");

        let (status, _) = call(&app, "DELETE", &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "DELETE", &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_retrieve_and_destroy() {
        let app = app(ScriptedModelClient::new(vec![
            ModelResponse::function_call(
                "save_event",
                json!({"event_name": "Concierto", "event_date": "2099-07-01T21:00:00Z"}),
            ),
            ModelResponse::text("Evento guardado ✅"),
        ]));
        let id = new_conversation(&app).await;
        call(
            &app,
            "POST",
            &format!("/api/conversations/{id}/send_message"),
            Some(json!({"message": "Guarda el concierto"})),
        )
        .await;
        let (_, all) = call(&app, "GET", "/api/events", None).await;
        let event_id = all[0]["id"].as_str().unwrap().to_string();

        let (status, event) = call(&app, "GET", &format!("/api/events/{event_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(event["name"], "Concierto");

        // 其他用户看不到，也删不掉
        let foreign = Request::builder()
            .method("DELETE")
            .uri(format!("/api/events/{event_id}"))
            .header(USER_HEADER, "luis")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(foreign).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "DELETE", &format!("/api/events/{event_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", &format!("/api/events/{event_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", "/api/events/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, upcoming) = call(&app, "GET", "/api/events/upcoming", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(upcoming.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_locks_released_after_requests() {
        let state = state_with(Arc::new(ScriptedModelClient::new(vec![ModelResponse::text(
            "Hará fresco.",
        )])));
        let app = router(state.clone());

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/conversations/{}/send_message", Uuid::new_v4()),
            Some(json!({"message": "hola"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.locks.is_empty());

        let id = new_conversation(&app).await;
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/conversations/{id}/send_message"),
            Some(json!({"message": "¿Frío?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_messages_are_serialized() {
        let model = Arc::new(SlowModel(ScriptedModelClient::new(vec![
            ModelResponse::text("Primera respuesta."),
            ModelResponse::text("Segunda respuesta."),
        ])));
        let state = state_with(model.clone());
        let conv = state.agent.start_conversation("ana", None).unwrap();
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(
            state.send_message(conv.id, "ana", "primera", &cancel),
            state.send_message(conv.id, "ana", "segunda", &cancel),
        );
        first.unwrap();
        second.unwrap();

        let roles: Vec<Role> = state.agent.history(conv.id).unwrap().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        // 第二轮看到了第一轮完整的一问一答
        let requests = model.0.requests();
        assert_eq!(requests[0].contents.len(), 1);
        assert_eq!(requests[1].contents.len(), 3);
        assert!(state.locks.is_empty());
    }

    #[tokio::test]
    async fn test_relay_frame_agent_message() {
        let state = state_with(Arc::new(ScriptedModelClient::new(vec![ModelResponse::text(
            "Va a llover toda la tarde 🌧",
        )])));
        let conv = state.agent.start_conversation("ana", None).unwrap();
        let frame = relay_frame(
            &state,
            conv.id,
            "ana",
            r#"{"message": "¿Lloverá hoy?"}"#,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(
            frame,
            json!({"type": "agent_message", "message": "Va a llover toda la tarde 🌧", "mood": "rainy"})
        );
    }

    #[tokio::test]
    async fn test_relay_frame_errors() {
        let state = state_with(Arc::new(ScriptedModelClient::new(vec![])));
        let conv = state.agent.start_conversation("ana", None).unwrap();
        let cancel = CancellationToken::new();

        let frame = relay_frame(&state, conv.id, "ana", "esto no es json", &cancel).await;
        assert!(frame["error"].as_str().unwrap().starts_with("invalid payload"));
        assert!(frame.get("type").is_none());

        let frame = relay_frame(&state, conv.id, "ana", r#"{"message": "   "}"#, &cancel).await;
        assert_eq!(frame["code"], "invalid_input");
        assert!(frame["error"].is_string());

        let frame = relay_frame(&state, conv.id, "luis", r#"{"message": "hola"}"#, &cancel).await;
        assert_eq!(frame["code"], "not_found");
        assert!(state.agent.history(conv.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relay_frame_after_disconnect_is_cancelled() {
        let state = state_with(Arc::new(ScriptedModelClient::new(vec![ModelResponse::text("x")])));
        let conv = state.agent.start_conversation("ana", None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let frame = relay_frame(&state, conv.id, "ana", r#"{"message": "hola"}"#, &cancel).await;
        assert_eq!(frame["code"], "cancelled");
        assert!(state.agent.history(conv.id).unwrap().is_empty());
        assert!(state.locks.is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AgentError::Configuration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&AgentError::Orchestration(LlmError::Transport("x".into()))),
            StatusCode::BAD_GATEWAY
        );
    }
}
