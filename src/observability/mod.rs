//! 可观测性：tracing 订阅者初始化
//!
//! 默认级别 info，可用 RUST_LOG 覆盖（如 `RUST_LOG=clima=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 测试或嵌入场景下可能已有全局订阅者，重复初始化时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
