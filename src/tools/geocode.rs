//! 地理编码工具：地址 → "lat,lng"
//!
//! 调用 Google Geocoding JSON API；结果为空视为失败（不是错误），由模型决定如何向用户追问。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parameters_for, Tool, ToolContext, ToolResult};

#[allow(dead_code)]
#[derive(Debug, Deserialize, JsonSchema)]
struct GeocodeArgs {
    /// Dirección, ciudad o lugar a geocodificar (p. ej. "Puerta del Sol, Madrid")
    address: String,
}

pub struct GeocodeTool {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeocodeTool {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn geocode(&self, address: &str) -> ToolResult {
        let resp = match self
            .client
            .get(&self.base_url)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("Geocoding request failed: {e}")),
        };
        let status = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::failure(format!("Read body: {e}")),
        };
        interpret_response(status, &body)
    }
}

const MAX_ERROR_BODY_CHARS: usize = 500;

/// 先看 HTTP 状态（错误页可能不是 JSON），再解析 JSON
fn interpret_response(status: u16, body: &str) -> ToolResult {
    if !(200..300).contains(&status) {
        let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return ToolResult::failure_with(
            format!("Geocoding API returned HTTP {status}"),
            json!({"status": status, "body": body}),
        );
    }
    match serde_json::from_str::<Value>(body) {
        Ok(body) => parse_geocode_response(&body),
        Err(e) => ToolResult::failure(format!("Invalid geocoding response: {e}")),
    }
}

/// 取第一个结果的坐标；空结果或状态非 OK 均为失败
pub fn parse_geocode_response(body: &Value) -> ToolResult {
    let api_status = body.get("status").and_then(Value::as_str).unwrap_or("OK");
    let first = body
        .get("results")
        .and_then(Value::as_array)
        .and_then(|r| r.first());
    let Some(first) = first else {
        let detail = body
            .get("error_message")
            .and_then(Value::as_str)
            .map(|m| format!(": {m}"))
            .unwrap_or_default();
        return ToolResult::failure(format!(
            "No se encontró la ubicación (status {api_status}){detail}"
        ));
    };
    let lat = first.pointer("/geometry/location/lat").and_then(Value::as_f64);
    let lng = first.pointer("/geometry/location/lng").and_then(Value::as_f64);
    match (lat, lng) {
        (Some(lat), Some(lng)) => ToolResult::ok(json!({
            "location": format!("{lat},{lng}"),
            "latitude": lat,
            "longitude": lng,
            "formatted_address": first.get("formatted_address").cloned().unwrap_or(Value::Null),
        })),
        _ => ToolResult::failure("Geocoding result has no coordinates"),
    }
}

#[async_trait]
impl Tool for GeocodeTool {
    fn name(&self) -> &str {
        "geocode"
    }

    fn description(&self) -> &str {
        "Convierte una dirección o lugar en coordenadas. Devuelve location como \"lat,lng\"."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<GeocodeArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        let address = args
            .get("address")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if address.is_empty() {
            return ToolResult::failure("Missing address");
        }
        tracing::info!(address = %address, "geocode tool");
        self.geocode(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_parse_first_result() {
        let body = json!({
            "status": "OK",
            "results": [
                {"formatted_address": "Madrid, España", "geometry": {"location": {"lat": 40.4168, "lng": -3.7038}}},
                {"formatted_address": "Madrid, Iowa", "geometry": {"location": {"lat": 41.87, "lng": -93.82}}}
            ]
        });
        let result = parse_geocode_response(&body);
        assert!(result.success);
        assert_eq!(result.get("location"), Some(&json!("40.4168,-3.7038")));
        assert_eq!(result.get("formatted_address"), Some(&json!("Madrid, España")));
    }

    #[test]
    fn test_empty_results_is_failure() {
        let body = json!({"status": "ZERO_RESULTS", "results": []});
        let result = parse_geocode_response(&body);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("ZERO_RESULTS"));
    }

    #[test]
    fn test_denied_request_reports_message() {
        let body = json!({"status": "REQUEST_DENIED", "error_message": "The provided API key is invalid.", "results": []});
        let result = parse_geocode_response(&body);
        assert!(result.error.unwrap().contains("API key is invalid"));
    }

    #[test]
    fn test_http_error_keeps_status_and_body() {
        let page = "<html><body>502 Bad Gateway</body></html>";
        let result = interpret_response(502, page);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Geocoding API returned HTTP 502"));
        assert_eq!(result.get("status"), Some(&json!(502)));
        assert_eq!(result.get("body"), Some(&json!(page)));

        let long = "x".repeat(2_000);
        let result = interpret_response(500, &long);
        assert_eq!(result.get("body").and_then(Value::as_str).map(str::len), Some(500));
    }

    #[test]
    fn test_success_status_with_bad_json_is_failure() {
        let result = interpret_response(200, "<html>");
        assert!(result.error.unwrap().starts_with("Invalid geocoding response"));

        let ok = interpret_response(
            200,
            r#"{"status":"OK","results":[{"geometry":{"location":{"lat":1.5,"lng":2.5}}}]}"#,
        );
        assert_eq!(ok.get("location"), Some(&json!("1.5,2.5")));
    }

    #[tokio::test]
    async fn test_missing_address_is_failure() {
        let tool = GeocodeTool::new("http://127.0.0.1:9", "key", 1);
        let ctx = ToolContext::new("u1", Arc::new(InMemoryStore::new()));
        let result = tool.execute(json!({"address": "   "}), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Missing address"));
    }

    #[test]
    fn test_schema_requires_address() {
        let tool = GeocodeTool::new("http://localhost", "key", 1);
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], json!(["address"]));
    }
}
