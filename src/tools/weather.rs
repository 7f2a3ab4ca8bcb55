//! 天气数据工具（Meteomatics 风格接口）
//!
//! URL: {base_url}/{datetime_range}/{parameters}/{lat,lng}/json，Basic Auth。
//! 非 2xx 返回失败结果，携带状态码与响应体，由模型据此调整参数或向用户说明。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parameters_for, Tool, ToolContext, ToolResult};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[allow(dead_code)]
#[derive(Debug, Deserialize, JsonSchema)]
struct FetchWeatherArgs {
    /// Instante o rango ISO-8601, p. ej. "2025-06-01T00:00:00Z" o "2025-06-01T00:00:00Z--2025-06-02T00:00:00Z:PT1H"
    datetime_range: String,
    /// Códigos de parámetros separados por comas, p. ej. "t_2m:C,precip_1h:mm,wind_speed_10m:kmh"
    parameters: String,
    /// Coordenadas "lat,lng" (resultado de geocode)
    coordinates: String,
}

pub struct FetchWeatherTool {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl FetchWeatherTool {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn build_url(&self, datetime_range: &str, parameters: &str, coordinates: &str) -> String {
        format!(
            "{}/{}/{}/{}/json",
            self.base_url, datetime_range, parameters, coordinates
        )
    }

    async fn fetch(&self, url: &str) -> ToolResult {
        let resp = match self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("Weather request failed: {e}")),
        };
        let status = resp.status();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::failure(format!("Read body: {e}")),
        };
        if !status.is_success() {
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return ToolResult::failure_with(
                format!("Weather API returned HTTP {}", status.as_u16()),
                json!({"status": status.as_u16(), "body": body}),
            );
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(data) => ToolResult::ok(json!({ "data": data })),
            Err(e) => ToolResult::failure(format!("Invalid weather response: {e}")),
        }
    }
}

/// parameters 既可是逗号分隔字符串，也可是字符串数组
fn normalize_parameters(value: Option<&Value>) -> Option<String> {
    let joined = match value? {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(","),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(","),
        _ => return None,
    };
    (!joined.is_empty()).then_some(joined)
}

/// 会改变请求路径或查询串的字符；http URL 解析会把反斜杠当作 '/'
fn has_url_delimiters(segment: &str) -> bool {
    segment
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '?' | '#') || c.is_control())
}

/// 校验并规范化 "lat,lng"
fn normalize_coordinates(raw: &str) -> Option<String> {
    let mut parts = raw.split(',').map(str::trim);
    let lat: f64 = parts.next()?.parse().ok()?;
    let lng: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng)
    {
        return None;
    }
    Some(format!("{lat},{lng}"))
}

#[async_trait]
impl Tool for FetchWeatherTool {
    fn name(&self) -> &str {
        "fetch_weather"
    }

    fn description(&self) -> &str {
        "Obtiene datos meteorológicos para unas coordenadas y un rango de fechas. Devuelve data con la respuesta del proveedor."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<FetchWeatherArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let datetime_range = args
            .get("datetime_range")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if datetime_range.is_empty() {
            return ToolResult::failure("Missing datetime_range");
        }
        if has_url_delimiters(datetime_range) {
            return ToolResult::failure(format!(
                "Invalid characters in datetime_range '{datetime_range}'"
            ));
        }
        let Some(parameters) = normalize_parameters(args.get("parameters")) else {
            return ToolResult::failure("Missing parameters");
        };
        if has_url_delimiters(&parameters) {
            return ToolResult::failure(format!("Invalid characters in parameters '{parameters}'"));
        }
        let raw_coordinates = args.get("coordinates").and_then(Value::as_str).unwrap_or("");
        let Some(coordinates) = normalize_coordinates(raw_coordinates) else {
            return ToolResult::failure(format!(
                "Invalid coordinates '{raw_coordinates}', expected \"lat,lng\""
            ));
        };
        let url = self.build_url(datetime_range, &parameters, &coordinates);
        tracing::info!(url = %url, "fetch_weather tool");
        self.fetch(&url).await
    }
}
