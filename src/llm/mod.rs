//! LLM 层：模型客户端抽象与实现（Gemini / Scripted）

pub mod gemini;
pub mod mock;
pub mod traits;
pub mod types;

pub use gemini::{sanitize_schema, GeminiClient, DEFAULT_GEMINI_MODEL, GEMINI_BASE_URL};
pub use mock::ScriptedModelClient;
pub use traits::{LlmError, ModelClient};
pub use types::{
    Content, FunctionCall, FunctionResponse, ModelRequest, ModelResponse, Part, ToolDeclaration,
    ROLE_MODEL, ROLE_USER,
};
