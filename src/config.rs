//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CLIMA__*` 覆盖（双下划线表示嵌套，如 `CLIMA__AGENT__MAX_TOOL_ITERATIONS=4`）。
//! 最后用常见的密钥环境变量（GOOGLE_API_KEY、GOOGLE_MAPS_API_KEY、METEOMATICS_*、GEMINI_MODEL）补齐未设置的值。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::{DEFAULT_GEMINI_MODEL, GEMINI_BASE_URL};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub web: WebSection,
}

/// [app] 段：应用名、数据库路径、历史轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// SQLite 文件路径；未设置时使用内存存储
    pub database_path: Option<PathBuf>,
    /// 送入模型的历史轮数（每轮 user + assistant）
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            database_path: None,
            max_context_turns: 20,
        }
    }
}

/// [llm] 段：Gemini 模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: None,
            base_url: Some(GEMINI_BASE_URL.to_string()),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [agent] 段：工具循环上限与系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单轮对话内模型调用次数上限
    pub max_tool_iterations: usize,
    /// 提示词版本号（写入日志，便于灰度期间区分）
    pub prompt_version: String,
    /// 内联提示词，优先于 system_prompt_path
    pub system_prompt: Option<String>,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_iterations: 6,
            prompt_version: "weather-v1".to_string(),
            system_prompt: None,
            system_prompt_path: None,
        }
    }
}

/// [tools] 段：单次工具超时与外部集成凭据
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub timeout_secs: u64,
    pub geocoding: GeocodingSection,
    pub weather: WeatherSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            geocoding: GeocodingSection::default(),
            weather: WeatherSection::default(),
        }
    }
}

/// [tools.geocoding] 段：Google Geocoding API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodingSection {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for GeocodingSection {
    fn default() -> Self {
        Self {
            base_url: "https://maps.googleapis.com/maps/api/geocode/json".to_string(),
            api_key: None,
        }
    }
}

/// [tools.weather] 段：Meteomatics 风格天气接口（Basic Auth）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherSection {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.meteomatics.com".to_string(),
            username: None,
            password: None,
        }
    }
}

/// [web] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub bind: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// 用常见环境变量补齐未配置的密钥与模型名
    pub fn apply_env_fallbacks(&mut self) {
        fill_from_env(&mut self.llm.api_key, "GOOGLE_API_KEY");
        fill_from_env(&mut self.tools.geocoding.api_key, "GOOGLE_MAPS_API_KEY");
        fill_from_env(&mut self.tools.weather.username, "METEOMATICS_USERNAME");
        fill_from_env(&mut self.tools.weather.password, "METEOMATICS_PASSWORD");
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                self.llm.model = model;
            }
        }
    }

    /// 启动时校验：模型与外部集成的凭据缺失即报 Configuration 错误
    pub fn validate(&self) -> Result<(), AgentError> {
        let mut missing = Vec::new();
        if is_blank(&self.llm.api_key) {
            missing.push("llm.api_key (GOOGLE_API_KEY)");
        }
        if is_blank(&self.tools.geocoding.api_key) {
            missing.push("tools.geocoding.api_key (GOOGLE_MAPS_API_KEY)");
        }
        if is_blank(&self.tools.weather.username) || is_blank(&self.tools.weather.password) {
            missing.push("tools.weather.username/password (METEOMATICS_USERNAME/METEOMATICS_PASSWORD)");
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(AgentError::Configuration(
                "agent.max_tool_iterations must be at least 1".to_string(),
            ));
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Configuration(format!(
                "missing credentials: {}",
                missing.join(", ")
            )))
        }
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if is_blank(slot) {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                *slot = Some(value);
            }
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// 从 config 目录加载配置，环境变量 CLIMA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 CLIMA__*（双下划线表示嵌套键）
/// 4. 用密钥环境变量补齐
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CLIMA")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_env_fallbacks();
    Ok(cfg)
}
