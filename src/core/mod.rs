//! 核心编排层：错误类型、系统提示词、单轮对话编排器

pub mod error;
pub mod orchestrator;
pub mod prompt;

pub use error::AgentError;
pub use orchestrator::{ToolInvocation, TurnOrchestrator, TurnOutcome, DEFAULT_MAX_TOOL_ITERATIONS};
pub use prompt::SystemPrompt;
