//! 模型客户端抽象
//!
//! 所有后端（Gemini / Scripted）实现 ModelClient：单次 generate，请求即完整内容列表 + 系统指令 + 工具声明。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::types::{ModelRequest, ModelResponse};

/// 模型端点错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 模型名（写入请求，亦用于日志）
    fn model(&self) -> &str;

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}
