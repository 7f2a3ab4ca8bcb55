//! Clima - 气象对话智能体
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（REPL 与 HTTP / WebSocket 共用）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、系统提示词、单轮对话编排器
//! - **llm**: 模型客户端抽象与实现（Gemini / 脚本化 Mock）
//! - **memory**: 会话、消息与事件的持久化（内存 / SQLite）
//! - **mood**: 回复情绪分类
//! - **tools**: 工具箱（geocode、fetch_weather、current_datetime、save_event）与执行器
//! - **weather**: 天气接口数据的指标提取
//! - **web**: axum HTTP / WebSocket 接口（feature = "web"）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod mood;
pub mod observability;
pub mod tools;
pub mod weather;
#[cfg(feature = "web")]
pub mod web;
