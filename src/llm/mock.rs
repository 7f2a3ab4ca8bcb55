//! 脚本化模型客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序回放预置的响应并记录每次收到的请求；脚本耗尽后可选择一直重复最后一条（模拟「永远请求工具」的模型）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmError, ModelClient, ModelRequest, ModelResponse};

pub struct ScriptedModelClient {
    model: String,
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    repeat: Option<ModelResponse>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            model: "scripted".to_string(),
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用都返回同一个响应
    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(Vec::new())
        }
    }

    /// 在脚本末尾追加一次失败
    pub fn then_fail(self, err: LlmError) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err));
        }
        self
    }

    /// 在脚本末尾追加一条响应
    pub fn then_respond(self, response: ModelResponse) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(response));
        }
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(result) => result,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string())),
        }
    }
}
