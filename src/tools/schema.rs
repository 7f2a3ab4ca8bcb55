//! 工具参数 JSON Schema 生成（schemars 自动生成，再裁剪为 Gemini 接受的子集）

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::llm::sanitize_schema;

/// 由参数结构体生成 functionDeclarations.parameters
pub fn parameters_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    });
    sanitize_schema(value)
}
