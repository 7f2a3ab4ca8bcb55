//! Headless Agent 运行时
//!
//! 供终端 REPL 与 HTTP / WebSocket 前端共用：
//! AgentComponents::from_config 构建 Gemini 客户端、四个工具、执行器、系统提示词与存储；
//! send_message 负责「校验 → 跑编排器 → 一次性持久化用户消息与回复」。
//! 本轮失败（含取消）时不写入任何消息，存储中的 user / assistant 始终成对出现。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{AppConfig, ToolsSection};
use crate::core::{AgentError, SystemPrompt, ToolInvocation, TurnOrchestrator};
use crate::llm::{GeminiClient, ModelClient};
use crate::memory::{
    recent_history, Conversation, ConversationStore, EventFilter, EventStore, InMemoryStore,
    Message, SavedEvent, SqliteStore,
};
use crate::mood::Mood;
use crate::tools::{
    CurrentDateTimeTool, FetchWeatherTool, GeocodeTool, SaveEventTool, ToolContext, ToolExecutor,
    ToolRegistry,
};

/// 工具循环超限时回给用户的固定文案
pub const TOOL_LOOP_APOLOGY: &str =
    "Lo siento, no he podido completar tu solicitud. ¿Puedes reformularla con más detalle?";

const DEFAULT_CONVERSATION_TITLE: &str = "Nueva conversación";

/// 一次 send_message 的结果
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: Uuid,
    pub user_message: Message,
    pub reply: String,
    pub mood: Mood,
    pub tool_calls: Vec<ToolInvocation>,
}

/// 预构建的 Agent 组件，可多会话共享
pub struct AgentComponents {
    pub orchestrator: TurnOrchestrator,
    pub prompt: SystemPrompt,
    conversations: Arc<dyn ConversationStore>,
    events: Arc<dyn EventStore>,
    max_context_turns: usize,
}

/// 按配置注册 geocode / fetch_weather / current_datetime / save_event
pub fn build_tool_registry(tools: &ToolsSection) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(GeocodeTool::new(
        tools.geocoding.base_url.clone(),
        tools.geocoding.api_key.clone().unwrap_or_default(),
        tools.timeout_secs,
    ));
    registry.register(FetchWeatherTool::new(
        tools.weather.base_url.clone(),
        tools.weather.username.clone().unwrap_or_default(),
        tools.weather.password.clone().unwrap_or_default(),
        tools.timeout_secs,
    ));
    registry.register(CurrentDateTimeTool);
    registry.register(SaveEventTool);
    registry
}

impl AgentComponents {
    /// 从配置构建；凭据缺失、提示词文件不可读、数据库打不开都会立即返回错误
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        cfg.validate()?;
        let model: Arc<dyn ModelClient> = Arc::new(GeminiClient::from_config(&cfg.llm)?);
        let executor = ToolExecutor::new(build_tool_registry(&cfg.tools), cfg.tools.timeout_secs);
        let orchestrator = TurnOrchestrator::new(model, executor)
            .with_max_iterations(cfg.agent.max_tool_iterations);
        let prompt = SystemPrompt::from_config(&cfg.agent)?;

        let components = match &cfg.app.database_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "using sqlite store");
                Self::new(orchestrator, prompt, Arc::new(SqliteStore::open(path)?))
            }
            None => {
                tracing::warn!("app.database_path not set, conversations are kept in memory");
                Self::new(orchestrator, prompt, Arc::new(InMemoryStore::new()))
            }
        };
        tracing::info!(
            model = %components.orchestrator.model_name(),
            prompt_version = %components.prompt.version,
            max_tool_iterations = components.orchestrator.max_iterations(),
            "agent ready"
        );
        Ok(components.with_max_context_turns(cfg.app.max_context_turns))
    }

    pub fn new<S>(orchestrator: TurnOrchestrator, prompt: SystemPrompt, store: Arc<S>) -> Self
    where
        S: ConversationStore + EventStore + 'static,
    {
        Self {
            orchestrator,
            prompt,
            conversations: store.clone(),
            events: store,
            max_context_turns: crate::config::AppSection::default().max_context_turns,
        }
    }

    pub fn with_max_context_turns(mut self, turns: usize) -> Self {
        self.max_context_turns = turns;
        self
    }

    pub fn start_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, AgentError> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_TITLE);
        let conversation = self.conversations.create_conversation(user_id, title)?;
        tracing::info!(conversation = %conversation.id, user = %user_id, "conversation started");
        Ok(conversation)
    }

    /// 会话必须存在且属于该用户，否则视为不存在
    pub fn conversation(&self, conversation_id: Uuid, user_id: &str) -> Result<Conversation, AgentError> {
        self.conversations
            .get_conversation(conversation_id)?
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| AgentError::NotFound(format!("conversation {conversation_id}")))
    }

    pub fn conversations(&self, user_id: &str) -> Result<Vec<Conversation>, AgentError> {
        Ok(self.conversations.conversations_for_user(user_id)?)
    }

    /// 处理一条用户消息。调用方需保证同一会话的消息串行处理。
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, AgentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::InvalidInput("message must not be empty".to_string()));
        }
        self.conversation(conversation_id, user_id)?;

        let stored = self.conversations.messages(conversation_id)?;
        let history = recent_history(&stored, self.max_context_turns);

        let ctx = ToolContext::new(user_id, self.events.clone()).with_conversation(conversation_id);
        let outcome = match self
            .orchestrator
            .process_turn(history, &self.prompt, text, &ctx, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(AgentError::ToolLoopExceeded { limit }) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    limit,
                    "tool loop exceeded, replying with apology"
                );
                crate::core::TurnOutcome {
                    reply: TOOL_LOOP_APOLOGY.to_string(),
                    mood: Mood::Neutral,
                    tool_calls: Vec::new(),
                }
            }
            Err(e) => {
                tracing::error!(conversation = %conversation_id, error = %e, "turn failed");
                return Err(e);
            }
        };

        let user_message = Message::user(text);
        self.conversations.append_messages(
            conversation_id,
            &[user_message.clone(), Message::assistant(outcome.reply.clone())],
        )?;
        Ok(ChatReply {
            conversation_id,
            user_message,
            reply: outcome.reply,
            mood: outcome.mood,
            tool_calls: outcome.tool_calls,
        })
    }

    pub fn history(&self, conversation_id: Uuid) -> Result<Vec<Message>, AgentError> {
        if self.conversations.get_conversation(conversation_id)?.is_none() {
            return Err(AgentError::NotFound(format!("conversation {conversation_id}")));
        }
        Ok(self.conversations.messages(conversation_id)?)
    }

    pub fn delete_conversation(&self, conversation_id: Uuid, user_id: &str) -> Result<(), AgentError> {
        if !self.conversations.delete_conversation(conversation_id, user_id)? {
            return Err(AgentError::NotFound(format!("conversation {conversation_id}")));
        }
        tracing::info!(conversation = %conversation_id, user = %user_id, "conversation deleted");
        Ok(())
    }

    pub fn events(&self, user_id: &str, filter: EventFilter) -> Result<Vec<SavedEvent>, AgentError> {
        Ok(self.events.events_for_user(user_id, filter, Utc::now())?)
    }

    pub fn event(&self, event_id: Uuid, user_id: &str) -> Result<SavedEvent, AgentError> {
        self.events
            .get_event(event_id, user_id)?
            .ok_or_else(|| AgentError::NotFound(format!("event {event_id}")))
    }

    pub fn delete_event(&self, event_id: Uuid, user_id: &str) -> Result<(), AgentError> {
        if !self.events.delete_event(event_id, user_id)? {
            return Err(AgentError::NotFound(format!("event {event_id}")));
        }
        tracing::info!(event = %event_id, user = %user_id, "event deleted");
        Ok(())
    }
}
