//! Agent 错误类型
//!
//! 只有编排层级的失败（输入非法、配置缺失、工具循环超限、模型调用失败）才会以错误形式返回给调用方；
//! 工具级失败（地址无效、天气接口非 200、日期格式错误）一律作为 ToolResult 数据回灌给模型。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::StoreError;

/// 处理一轮对话时可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 用户可修正（如空消息），HTTP 层映射为 4xx
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 模型或外部集成的凭据缺失，应在启动时尽早暴露
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 模型在上限轮数内一直请求工具
    #[error("Tool loop exceeded {limit} iterations")]
    ToolLoopExceeded { limit: usize },

    /// 调用模型端点失败（传输、协议或响应解析）
    #[error("Orchestration failed: {0}")]
    Orchestration(#[from] LlmError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AgentError {
    /// 机器可读的错误码（HTTP / WebSocket 响应使用）
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::InvalidInput(_) => "invalid_input",
            AgentError::Configuration(_) => "configuration_error",
            AgentError::ToolLoopExceeded { .. } => "tool_loop_exceeded",
            AgentError::Orchestration(_) => "orchestration_error",
            AgentError::Cancelled => "cancelled",
            AgentError::NotFound(_) => "not_found",
            AgentError::Store(_) => "store_error",
        }
    }
}
