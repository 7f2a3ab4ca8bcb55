//! 工具执行上下文与结果
//!
//! 工具失败一律表示为 ToolResult { success: false }，作为数据回灌给模型，让对话自行纠正；
//! 从不以错误形式抛给调用方。

use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::memory::EventStore;

/// 工具执行时的请求级上下文（当前用户、会话、事件存储）
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub conversation_id: Option<Uuid>,
    pub events: Arc<dyn EventStore>,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>, events: Arc<dyn EventStore>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: None,
            events,
        }
    }

    pub fn with_conversation(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }
}

/// 工具执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub payload: Map<String, Value>,
    pub error: Option<String>,
}

impl ToolResult {
    /// 成功；payload 非对象时放到 "result" 键下
    pub fn ok(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Map::new(),
            error: Some(error.into()),
        }
    }

    /// 失败但附带额外数据（如接口状态码与响应体）
    pub fn failure_with(error: impl Into<String>, payload: Value) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::ok(payload)
        }
        .into_failure()
    }

    fn into_failure(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// 回灌给模型的 JSON：{"success": ..., <payload>..., "error"?: ...}
    pub fn to_response(&self) -> Value {
        let mut out = Map::new();
        out.insert("success".to_string(), json!(self.success));
        for (k, v) in &self.payload {
            out.insert(k.clone(), v.clone());
        }
        if let Some(err) = &self.error {
            out.insert("error".to_string(), json!(err));
        }
        Value::Object(out)
    }
}
