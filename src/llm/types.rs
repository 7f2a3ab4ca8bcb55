//! 模型请求 / 响应的内部表示
//!
//! 与 Gemini generateContent 的内容结构一一对应：Content = role + parts，
//! Part 为文本、函数调用或函数结果之一。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 模型侧角色（Gemini 只认 user / model）
pub const ROLE_USER: &str = "user";
pub const ROLE_MODEL: &str = "model";

/// 模型请求调用的工具：名称 + 参数对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// 回灌给模型的工具结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        }
    }
}

/// 一条带角色的内容
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: ROLE_MODEL.to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    /// 拼接所有文本 part
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// 声明给模型的工具（parameters 为 JSON Schema 子集）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub contents: Vec<Content>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
}

/// 首个候选的内容
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub parts: Vec<Part>,
    pub finish_reason: Option<String>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text(text.into())],
            finish_reason: Some("STOP".to_string()),
        }
    }

    pub fn function_call(name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            parts: vec![Part::FunctionCall(FunctionCall {
                name: name.into(),
                args,
            })],
            finish_reason: Some("STOP".to_string()),
        }
    }

    /// 按顺序找到的第一个函数调用
    pub fn first_function_call(&self) -> Option<&FunctionCall> {
        self.parts.iter().find_map(Part::as_function_call)
    }

    pub fn function_call_count(&self) -> usize {
        self.parts.iter().filter(|p| p.as_function_call().is_some()).count()
    }

    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}
