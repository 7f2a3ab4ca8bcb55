//! Google Gemini generateContent 客户端
//!
//! - Endpoint: {base_url}/models/{model}:generateContent
//! - 认证: x-goog-api-key 头
//! - parts 为 text / functionCall / functionResponse 三选一

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::LlmSection;
use crate::core::AgentError;
use crate::llm::types::{Content, FunctionCall, FunctionResponse, Part, ToolDeclaration};
use crate::llm::{LlmError, ModelClient, ModelRequest, ModelResponse};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            timeout_secs,
        })
    }

    /// 从 [llm] 配置创建；缺少 API Key 时直接返回配置错误
    pub fn from_config(cfg: &LlmSection) -> Result<Self, AgentError> {
        let api_key = cfg
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AgentError::Configuration(
                    "GOOGLE_API_KEY (or llm.api_key) is not configured".to_string(),
                )
            })?;
        Self::new(
            api_key,
            cfg.model.clone(),
            cfg.base_url.as_deref(),
            cfg.timeouts.request,
        )
        .map_err(|e| AgentError::Configuration(e.to_string()))
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTools>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    /// 无参数的工具不能带空的 OBJECT schema，直接省略
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

impl From<&ToolDeclaration> for GeminiFunctionDeclaration {
    fn from(decl: &ToolDeclaration) -> Self {
        let has_properties = decl
            .parameters
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|p| !p.is_empty());
        Self {
            name: decl.name.clone(),
            description: decl.description.clone(),
            parameters: has_properties.then(|| decl.parameters.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

// --- conversion ---

fn part_to_wire(part: &Part) -> GeminiPart {
    match part {
        Part::Text(text) => GeminiPart::Text { text: text.clone() },
        Part::FunctionCall(call) => GeminiPart::FunctionCall {
            function_call: call.clone(),
        },
        Part::FunctionResponse(resp) => GeminiPart::FunctionResponse {
            function_response: resp.clone(),
        },
    }
}

fn part_from_wire(part: GeminiPart) -> Part {
    match part {
        GeminiPart::Text { text } => Part::Text(text),
        GeminiPart::FunctionCall { function_call } => Part::FunctionCall(function_call),
        GeminiPart::FunctionResponse { function_response } => {
            Part::FunctionResponse(function_response)
        }
    }
}

fn content_to_wire(content: &Content) -> GeminiContent {
    GeminiContent {
        role: content.role.clone(),
        parts: content.parts.iter().map(part_to_wire).collect(),
    }
}

fn build_request(request: &ModelRequest) -> GeminiRequest {
    GeminiRequest {
        contents: request.contents.iter().map(content_to_wire).collect(),
        system_instruction: request
            .system_instruction
            .as_ref()
            .map(|s| GeminiSystemInstruction {
                parts: vec![GeminiPart::Text { text: s.clone() }],
            }),
        tools: if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTools {
                function_declarations: request.tools.iter().map(Into::into).collect(),
            }]
        },
    }
}

fn parse_response(body: &str) -> Result<ModelResponse, LlmError> {
    let response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {e}")))?;
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No candidates in response".to_string()))?;
    let parts = candidate
        .content
        .map(|c| c.parts.into_iter().map(part_from_wire).collect())
        .unwrap_or_default();
    Ok(ModelResponse {
        parts,
        finish_reason: candidate.finish_reason,
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<GeminiErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let api_request = build_request(request);
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Transport(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(format!("Read body: {e}")))?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        parse_response(&body)
    }
}

/// 去掉 Gemini 不接受的 JSON Schema 关键字（$schema、title、definitions 等），
/// 并把 `"type": ["string", "null"]` 收敛为单一类型
pub fn sanitize_schema(schema: Value) -> Value {
    const DROPPED: [&str; 4] = ["$schema", "title", "definitions", "additionalProperties"];
    match schema {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter(|(k, _)| !DROPPED.contains(&k.as_str()))
                .map(|(k, v)| match (k.as_str(), v) {
                    ("type", Value::Array(types)) => {
                        let single = types
                            .into_iter()
                            .find(|t| t.as_str() != Some("null"))
                            .unwrap_or(Value::String("string".to_string()));
                        (k, single)
                    }
                    ("properties", Value::Object(props)) => (
                        k,
                        Value::Object(
                            props.into_iter().map(|(p, s)| (p, sanitize_schema(s))).collect(),
                        ),
                    ),
                    (_, v) => (k, sanitize_schema(v)),
                })
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_schema).collect()),
        other => other,
    }
}
