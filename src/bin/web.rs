//! Clima HTTP / WebSocket 服务
//!
//! 启动: cargo run --bin clima-web --features web
//! 监听地址取自 [web].bind，可用 CLIMA__WEB__BIND 覆盖。

use anyhow::Context;
use clima::{
    agent::AgentComponents,
    config::load_config,
    observability,
    web::{router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let agent = AgentComponents::from_config(&cfg).context("Failed to create agent")?;
    let app = router(AppState::new(agent));

    let listener = tokio::net::TcpListener::bind(&cfg.web.bind)
        .await
        .with_context(|| format!("bind {}", cfg.web.bind))?;
    tracing::info!("Clima web: http://{}", cfg.web.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
