//! 保存事件工具
//!
//! 日期必须可解析（RFC3339 / 无时区的日期时间 / 纯日期，后两者按 UTC 处理），否则返回失败；
//! weather_data_json 经 lenient::parse_structured 宽松解析，解析失败也不会让整个调用失败。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::memory::SavedEvent;
use crate::tools::lenient::{parse_structured, ParseTier};
use crate::tools::{parameters_for, Tool, ToolContext, ToolResult};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[allow(dead_code)]
#[derive(Debug, Deserialize, JsonSchema)]
struct SaveEventArgs {
    /// Nombre del evento (p. ej. "Boda de Ana")
    event_name: String,
    /// Fecha ISO-8601 del evento ("2025-06-01", "2025-06-01T18:00:00" o con zona horaria)
    event_date: String,
    /// Nombre del lugar
    location_name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    /// Datos meteorológicos obtenidos con fetch_weather, serializados como JSON
    weather_data_json: Option<String>,
}

pub struct SaveEventTool;

/// 解析 ISO-8601 日期；无时区信息时视为 UTC
pub fn parse_event_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// 坐标可能是数字，也可能是数字字符串
fn coordinate(args: &Value, key: &str) -> Option<f64> {
    match args.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn weather_data(args: &Value) -> Value {
    match args.get("weather_data_json") {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            let (value, tier) = parse_structured(text);
            if tier != ParseTier::Json {
                tracing::warn!(tier = ?tier, "weather_data_json was not strict JSON");
            }
            value
        }
        Some(v @ (Value::Object(_) | Value::Array(_))) => v.clone(),
        _ => Value::Null,
    }
}

#[async_trait]
impl Tool for SaveEventTool {
    fn name(&self) -> &str {
        "save_event"
    }

    fn description(&self) -> &str {
        "Guarda un evento del usuario con su fecha, lugar y, si se conoce, el pronóstico del tiempo. Devuelve event_id."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SaveEventArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let name = args
            .get("event_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if name.is_empty() {
            return ToolResult::failure("Missing event_name");
        }
        let raw_date = args.get("event_date").and_then(Value::as_str).unwrap_or("");
        let Some(event_date) = parse_event_date(raw_date) else {
            return ToolResult::failure(format!(
                "Invalid event_date '{raw_date}', expected ISO-8601 (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)"
            ));
        };

        let mut event = SavedEvent::new(ctx.user_id.clone(), ctx.conversation_id, name, event_date)
            .with_weather(weather_data(&args));
        event.location_name = args
            .get("location_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        event.latitude = coordinate(&args, "latitude");
        event.longitude = coordinate(&args, "longitude");

        if let Err(e) = ctx.events.create_event(&event) {
            tracing::error!(error = %e, "save_event persistence failed");
            return ToolResult::failure(format!("Could not save event: {e}"));
        }
        tracing::info!(event_id = %event.id, user = %event.user_id, "event saved");
        ToolResult::ok(json!({
            "event_id": event.id.to_string(),
            "event_name": event.name,
            "event_date": event.event_date.to_rfc3339(),
        }))
    }
}
