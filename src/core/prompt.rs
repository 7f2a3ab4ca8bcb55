//! 版本化的系统提示词
//!
//! 启动时由配置构造一次（内联文本或文件），之后只读，每轮按引用传入编排器。

use std::path::Path;

use crate::config::AgentSection;
use crate::core::AgentError;

pub const DEFAULT_PROMPT_VERSION: &str = "weather-v1";

const DEFAULT_PROMPT: &str = "Eres un asistente experto en meteorología y clima espacial.

Tu especialidad incluye:
- Predicciones meteorológicas terrestres
- Clima espacial y actividad solar
- Tormentas geomagnéticas y su impacto
- Radiación espacial
- Efectos del clima espacial en satélites y comunicaciones
- Fenómenos atmosféricos relacionados con eventos espaciales

Debes proporcionar información precisa, científica y comprensible. Cuando no tengas datos
en tiempo real, indícalo claramente y ofrece información general sobre el tema.

Herramientas disponibles:
- current_datetime: consúltala antes de interpretar fechas relativas (\"mañana\", \"el sábado\").
- geocode: convierte un lugar en coordenadas \"lat,lng\".
- fetch_weather: obtiene el pronóstico para unas coordenadas y un rango de fechas ISO-8601.
  Parámetros habituales: t_2m:C, precip_1h:mm, wind_speed_10m:kmh, snow_depth:cm, prob_snow_1h:p.
- save_event: guarda un evento del usuario; incluye el pronóstico en weather_data_json si lo tienes.

Usa una sola herramienta por paso y espera su resultado. Si una herramienta falla,
explica el problema al usuario o inténtalo con otros parámetros.

Siempre responde en el idioma en el que te hablen.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    pub version: String,
    pub text: String,
}

impl SystemPrompt {
    pub fn new(version: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            text: text.into(),
        }
    }

    /// 优先级：内联文本 > 文件 > 内置默认
    pub fn from_config(agent: &AgentSection) -> Result<Self, AgentError> {
        if let Some(text) = agent.system_prompt.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Self::new(agent.prompt_version.clone(), text));
        }
        if let Some(path) = &agent.system_prompt_path {
            return Self::from_file(agent.prompt_version.clone(), path);
        }
        Ok(Self::new(agent.prompt_version.clone(), DEFAULT_PROMPT))
    }

    pub fn from_file(version: impl Into<String>, path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Configuration(format!("read system prompt {}: {e}", path.display()))
        })?;
        if text.trim().is_empty() {
            return Err(AgentError::Configuration(format!(
                "system prompt {} is empty",
                path.display()
            )));
        }
        Ok(Self::new(version, text.trim_end()))
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_VERSION, DEFAULT_PROMPT)
    }
}
