//! Clima 终端对话
//!
//! 入口：初始化日志、加载配置、构建 Agent，然后逐行读取 stdin 作为用户消息。
//! 输入 /nuevo 开始新会话，/eventos 列出即将到来的事件，/salir 或 EOF 退出。

use anyhow::Context;
use clima::{
    agent::AgentComponents, config::load_config, core::AgentError, memory::EventFilter,
    observability,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

const REPL_USER: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let agent = AgentComponents::from_config(&cfg).context("Failed to create agent")?;
    let mut conversation = agent.start_conversation(REPL_USER, None)?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all("Clima listo. Escribe tu pregunta (/nuevo, /eventos, /salir).\n> ".as_bytes())
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        let output = match input {
            "" => String::new(),
            "/salir" => break,
            "/nuevo" => {
                conversation = agent.start_conversation(REPL_USER, None)?;
                "Nueva conversación.\n".to_string()
            }
            "/eventos" => {
                let events = agent.events(REPL_USER, EventFilter::Upcoming)?;
                if events.is_empty() {
                    "No hay eventos próximos.\n".to_string()
                } else {
                    events
                        .iter()
                        .map(|e| format!("- {} ({})\n", e.name, e.event_date.format("%Y-%m-%d %H:%M")))
                        .collect()
                }
            }
            text => {
                // Ctrl-C 取消当前这一轮，而不是退出程序
                let cancel = CancellationToken::new();
                let turn = agent.send_message(conversation.id, REPL_USER, text, &cancel);
                let result = tokio::select! {
                    r = turn => r,
                    _ = tokio::signal::ctrl_c() => {
                        cancel.cancel();
                        Err(AgentError::Cancelled)
                    }
                };
                match result {
                    Ok(reply) => format!("[{}] {}\n", reply.mood, reply.reply),
                    Err(e) => format!("Error: {e}\n"),
                }
            }
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}
