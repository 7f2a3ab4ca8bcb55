//! 单轮对话编排器
//!
//! 历史 + 新消息 → 调用模型 → 若模型请求工具则执行并把结果回灌 → 重复，直到模型给出纯文本回复
//! 或达到 max_iterations。编排器不持有存储句柄，也没有可变共享状态，可被多个会话并发使用。

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, SystemPrompt};
use crate::llm::{
    Content, FunctionCall, FunctionResponse, LlmError, ModelClient, ModelRequest, Part,
    ROLE_MODEL, ROLE_USER,
};
use crate::memory::{Message, Role};
use crate::mood::{self, Mood};
use crate::tools::{ToolContext, ToolExecutor};

/// 默认工具循环上限
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 6;

const WEATHER_TOOL: &str = "fetch_weather";

/// 一次工具调用的记录（供日志与前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 一轮对话的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub mood: Mood,
    pub tool_calls: Vec<ToolInvocation>,
}

pub struct TurnOrchestrator {
    model: Arc<dyn ModelClient>,
    executor: ToolExecutor,
    max_iterations: usize,
}

impl TurnOrchestrator {
    pub fn new(model: Arc<dyn ModelClient>, executor: ToolExecutor) -> Self {
        Self {
            model,
            executor,
            max_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn model_name(&self) -> &str {
        self.model.model()
    }

    /// 处理一轮对话；工具失败不会变成错误，只有输入非法、模型调用失败、循环超限与取消会返回 Err
    pub async fn process_turn(
        &self,
        history: &[Message],
        prompt: &SystemPrompt,
        user_message: &str,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let user_message = user_message.trim();
        if user_message.is_empty() {
            return Err(AgentError::InvalidInput("message must not be empty".to_string()));
        }

        let mut contents = build_contents(history, user_message);
        let tools = self.executor.declarations();
        let mut tool_calls = Vec::new();
        let mut weather_payload: Option<Value> = None;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let request = ModelRequest {
                model: self.model.model().to_string(),
                contents: contents.clone(),
                system_instruction: Some(prompt.text.clone()),
                tools: tools.clone(),
            };
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = self.model.generate(&request) => r?,
            };

            let Some(call) = response.first_function_call().cloned() else {
                let reply = response.text_content().trim().to_string();
                if reply.is_empty() {
                    // 既无函数调用也无文本（如 finishReason SAFETY），不能当作正常回复保存
                    let finish_reason = response.finish_reason.as_deref().unwrap_or("unknown");
                    tracing::warn!(iteration, finish_reason, "model returned an empty response");
                    return Err(AgentError::Orchestration(LlmError::InvalidResponse(format!(
                        "empty response (finish_reason: {finish_reason})"
                    ))));
                }
                let mood = mood::classify(&reply, weather_payload.as_ref());
                tracing::info!(
                    iteration,
                    tool_calls = tool_calls.len(),
                    mood = %mood,
                    prompt_version = %prompt.version,
                    "turn complete"
                );
                return Ok(TurnOutcome {
                    reply,
                    mood,
                    tool_calls,
                });
            };

            let dropped = response.function_call_count() - 1;
            if dropped > 0 {
                tracing::debug!(kept = %call.name, dropped, "extra function calls ignored");
            }

            let args = Value::Object(call.args.clone());
            let result = self.executor.execute(&call.name, args.clone(), ctx).await;
            if call.name == WEATHER_TOOL && result.success {
                weather_payload = result.get("data").cloned();
            }
            tool_calls.push(ToolInvocation {
                name: call.name.clone(),
                args,
                success: result.success,
                error: result.error.clone(),
            });

            contents.push(model_turn(&response.parts, call.clone()));
            contents.push(Content {
                role: ROLE_USER.to_string(),
                parts: vec![Part::FunctionResponse(FunctionResponse {
                    name: call.name,
                    response: result.to_response(),
                })],
            });
        }

        tracing::warn!(limit = self.max_iterations, "tool loop limit reached");
        Err(AgentError::ToolLoopExceeded {
            limit: self.max_iterations,
        })
    }
}

/// 存储中的 user 映射为模型 user，其余角色（assistant/system）一律视为 model；空消息跳过
fn build_contents(history: &[Message], user_message: &str) -> Vec<Content> {
    history
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| match m.role {
            Role::User => Content::user_text(m.content.clone()),
            Role::Assistant | Role::System => Content::model_text(m.content.clone()),
        })
        .chain(std::iter::once(Content::user_text(user_message)))
        .collect()
}

/// 回灌的模型内容：原有文本 part + 被选中的那一个函数调用
fn model_turn(parts: &[Part], call: FunctionCall) -> Content {
    let mut kept: Vec<Part> = parts
        .iter()
        .filter(|p| matches!(p, Part::Text(t) if !t.is_empty()))
        .cloned()
        .collect();
    kept.push(Part::FunctionCall(call));
    Content {
        role: ROLE_MODEL.to_string(),
        parts: kept,
    }
}
