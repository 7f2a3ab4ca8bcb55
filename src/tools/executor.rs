//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时，execute(tool_name, args, ctx) 在超时内调用 registry.dispatch；
//! 超时转为失败的 ToolResult（仍回灌给模型）；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::llm::ToolDeclaration;
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具；永不返回错误，超时与未知工具都映射为 success=false
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.dispatch(tool_name, args, ctx)).await;

        let result = match result {
            Ok(r) => r,
            Err(_) => ToolResult::failure(format!(
                "tool '{}' timed out after {}ms",
                tool_name,
                self.timeout.as_millis()
            )),
        };
        let outcome = if result.success { "ok" } else { "error" };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.success,
            "outcome": outcome,
            "error": result.error,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry.declarations()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
