//! 情绪（mood）分类器：为前端提供回复的粗粒度气氛标签
//!
//! 纯函数、确定性：相同输入总得到相同标签。判定顺序（先命中者胜）：
//! 完成标记 → 进行中标记 → 结构化降雪信号 → 降水 / 风阈值 → 温度阈值 → 文本关键词 / emoji → neutral。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::weather::WeatherMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Sunny,
    Cloudy,
    Rainy,
    Stormy,
    Cold,
    Hot,
    Snow,
    Success,
    Loading,
    Neutral,
}

impl Mood {
    pub const ALL: [Mood; 10] = [
        Mood::Sunny,
        Mood::Cloudy,
        Mood::Rainy,
        Mood::Stormy,
        Mood::Cold,
        Mood::Hot,
        Mood::Snow,
        Mood::Success,
        Mood::Loading,
        Mood::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Sunny => "sunny",
            Mood::Cloudy => "cloudy",
            Mood::Rainy => "rainy",
            Mood::Stormy => "stormy",
            Mood::Cold => "cold",
            Mood::Hot => "hot",
            Mood::Snow => "snow",
            Mood::Success => "success",
            Mood::Loading => "loading",
            Mood::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SUCCESS_MARKERS: &[&str] = &[
    "guardado",
    "guardada",
    "registrado",
    "registrada",
    "evento creado",
    "✅",
];

const LOADING_MARKERS: &[&str] = &[
    "consultando",
    "procesando",
    "obteniendo",
    "un momento",
    "⏳",
];

const SNOW_PROBABILITY_PCT: f64 = 50.0;
const FREEZING_PRECIP_MM: f64 = 0.2;
const STORM_PRECIP_MM: f64 = 5.0;
const STORM_WIND_WITH_RAIN: f64 = 40.0;
const RAIN_PRECIP_MM: f64 = 0.5;
const STORM_WIND: f64 = 50.0;
const HOT_C: f64 = 35.0;
const MILD_RANGE_C: (f64, f64) = (18.0, 28.0);

/// 关键词表：按优先级排列（snow → stormy → rainy → sunny → cloudy → hot → cold）
const KEYWORDS: &[(Mood, &[&str], &[&str])] = &[
    (
        Mood::Snow,
        &["nieve", "nevada", "nevadas", "nevando", "nevar", "snow"],
        &["❄", "☃", "🌨"],
    ),
    (
        Mood::Stormy,
        &[
            "tormenta", "tormentas", "tormentoso", "tempestad", "granizo", "huracán", "vendaval",
            "rayos", "storm",
        ],
        &["⛈", "🌩", "🌪"],
    ),
    (
        Mood::Rainy,
        &[
            "lluvia", "lluvias", "lluvioso", "lloviendo", "llovizna", "chubasco", "chubascos",
            "precipitaciones", "rain",
        ],
        &["🌧", "☔", "🌦"],
    ),
    (
        Mood::Sunny,
        &["soleado", "soleada", "sol", "despejado", "despejada", "sunny"],
        &["☀", "🌞", "😎"],
    ),
    (
        Mood::Cloudy,
        &["nublado", "nublada", "nubes", "nuboso", "nubosidad", "cloudy"],
        &["☁", "⛅", "🌥"],
    ),
    (
        Mood::Hot,
        &["calor", "caluroso", "calurosa", "hot"],
        &["🔥", "🥵"],
    ),
    (
        Mood::Cold,
        &["frío", "fría", "frio", "fria", "helada", "heladas", "congelante", "cold"],
        &["🥶"],
    ),
];

struct KeywordMatcher {
    mood: Mood,
    words: Option<Regex>,
    symbols: &'static [&'static str],
}

impl KeywordMatcher {
    fn is_match(&self, lower: &str) -> bool {
        self.words.as_ref().is_some_and(|re| re.is_match(lower))
            || self.symbols.iter().any(|s| lower.contains(s))
    }
}

fn keyword_matchers() -> &'static [KeywordMatcher] {
    static MATCHERS: OnceLock<Vec<KeywordMatcher>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        KEYWORDS
            .iter()
            .map(|(mood, words, symbols)| {
                let alternation = words
                    .iter()
                    .map(|w| regex::escape(w))
                    .collect::<Vec<_>>()
                    .join("|");
                KeywordMatcher {
                    mood: *mood,
                    words: Regex::new(&format!(r"\b(?:{alternation})\b")).ok(),
                    symbols,
                }
            })
            .collect()
    })
}

fn classify_metrics(m: &WeatherMetrics) -> Option<Mood> {
    let precip = m.precipitation.unwrap_or(0.0);
    let wind = m.wind_speed.unwrap_or(0.0);

    let snow_signal = m.snow_depth.is_some_and(|d| d > 0.0)
        || m.snow_probability.is_some_and(|p| p > SNOW_PROBABILITY_PCT)
        || (m.temperature.is_some_and(|t| t <= 0.0) && precip > FREEZING_PRECIP_MM);
    if snow_signal {
        return Some(Mood::Snow);
    }

    if precip > STORM_PRECIP_MM && wind > STORM_WIND_WITH_RAIN {
        return Some(Mood::Stormy);
    }
    if precip > RAIN_PRECIP_MM {
        return Some(Mood::Rainy);
    }
    if wind > STORM_WIND {
        return Some(Mood::Stormy);
    }

    let temp = m.temperature?;
    if temp > HOT_C {
        return Some(Mood::Hot);
    }
    if (MILD_RANGE_C.0..=MILD_RANGE_C.1).contains(&temp) && precip <= RAIN_PRECIP_MM {
        return Some(Mood::Sunny);
    }
    None
}

/// 根据最终回复文本与（可选）天气接口数据给出 mood
pub fn classify(reply: &str, weather_payload: Option<&Value>) -> Mood {
    let lower = reply.to_lowercase();

    if SUCCESS_MARKERS.iter().any(|m| lower.contains(m)) {
        return Mood::Success;
    }
    if LOADING_MARKERS.iter().any(|m| lower.contains(m)) {
        return Mood::Loading;
    }

    if let Some(payload) = weather_payload {
        if let Some(mood) = classify_metrics(&WeatherMetrics::from_payload(payload)) {
            return mood;
        }
    }

    keyword_matchers()
        .iter()
        .find(|m| m.is_match(&lower))
        .map(|m| m.mood)
        .unwrap_or(Mood::Neutral)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(params: &[(&str, f64)]) -> Value {
        let data: Vec<Value> = params
            .iter()
            .map(|(name, value)| {
                json!({"parameter": name, "coordinates": [{"dates": [{"value": value}]}]})
            })
            .collect();
        json!({ "data": data })
    }

    #[test]
    fn test_success_marker_beats_weather() {
        assert_eq!(classify("Evento guardado exitosamente", None), Mood::Success);
        let stormy = payload(&[("precip_1h:mm", 10.0), ("wind_speed_10m:kmh", 80.0)]);
        assert_eq!(classify("Evento guardado exitosamente", Some(&stormy)), Mood::Success);
    }

    #[test]
    fn test_loading_marker() {
        assert_eq!(classify("Estoy consultando el pronóstico...", None), Mood::Loading);
    }

    #[test]
    fn test_mild_temperature_is_sunny() {
        let p = payload(&[("t_2m:C", 22.0)]);
        assert_eq!(classify("Mañana hará buen tiempo", Some(&p)), Mood::Sunny);
    }

    #[test]
    fn test_heavy_rain_with_wind_is_stormy() {
        let p = payload(&[("precip_1h:mm", 6.0), ("wind_speed_10m:kmh", 45.0)]);
        assert_eq!(classify("Pronóstico listo", Some(&p)), Mood::Stormy);
    }

    #[test]
    fn test_rain_and_wind_thresholds() {
        let rain = payload(&[("precip_1h:mm", 1.2), ("wind_speed_10m:kmh", 10.0)]);
        assert_eq!(classify("ok", Some(&rain)), Mood::Rainy);
        let wind = payload(&[("precip_1h:mm", 0.0), ("wind_speed_10m:kmh", 60.0)]);
        assert_eq!(classify("ok", Some(&wind)), Mood::Stormy);
    }

    #[test]
    fn test_snow_signals() {
        let depth = payload(&[("snow_depth:cm", 3.0)]);
        assert_eq!(classify("ok", Some(&depth)), Mood::Snow);
        let prob = payload(&[("prob_snow_1h:p", 70.0)]);
        assert_eq!(classify("ok", Some(&prob)), Mood::Snow);
        let freezing = payload(&[("t_2m:C", -1.0), ("precip_1h:mm", 0.5)]);
        assert_eq!(classify("ok", Some(&freezing)), Mood::Snow);
    }

    #[test]
    fn test_hot_threshold() {
        let p = payload(&[("t_2m:C", 38.0)]);
        assert_eq!(classify("ok", Some(&p)), Mood::Hot);
    }

    #[test]
    fn test_structured_without_match_falls_back_to_keywords() {
        // 10°C 无降水：结构化规则不命中，回退关键词
        let p = payload(&[("t_2m:C", 10.0)]);
        assert_eq!(classify("Cielo nublado toda la tarde", Some(&p)), Mood::Cloudy);
    }

    #[test]
    fn test_keyword_priority_order() {
        assert_eq!(classify("Nieve y tormenta en la sierra", None), Mood::Snow);
        assert_eq!(classify("Tormenta con lluvia intensa", None), Mood::Stormy);
        assert_eq!(classify("Habrá lluvia y algo de sol", None), Mood::Rainy);
        assert_eq!(classify("Día despejado ☀️", None), Mood::Sunny);
        assert_eq!(classify("Mucho calor hoy 🔥", None), Mood::Hot);
        assert_eq!(classify("Hará frío por la noche", None), Mood::Cold);
    }

    #[test]
    fn test_word_boundaries() {
        // "solicitud" no es "sol"
        assert_eq!(classify("Tu solicitud fue recibida", None), Mood::Neutral);
    }

    #[test]
    fn test_default_neutral() {
        assert_eq!(classify("Hola, ¿en qué puedo ayudarte?", None), Mood::Neutral);
        assert_eq!(classify("", None), Mood::Neutral);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Mood::Stormy).unwrap(), json!("stormy"));
        for mood in Mood::ALL {
            assert_eq!(serde_json::to_value(mood).unwrap(), json!(mood.as_str()));
        }
    }
}
