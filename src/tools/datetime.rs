//! 当前时间工具：让模型把「明天」「周末」换算成具体日期

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::tools::{Tool, ToolContext, ToolResult};

pub struct CurrentDateTimeTool;

#[async_trait]
impl Tool for CurrentDateTimeTool {
    fn name(&self) -> &str {
        "current_datetime"
    }

    fn description(&self) -> &str {
        "Devuelve la fecha y hora actuales (RFC3339, UTC). Úsala antes de interpretar fechas relativas como \"mañana\"."
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::ok(json!({
            "current_datetime": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "timezone": "UTC",
        }))
    }
}
