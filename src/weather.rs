//! 天气数据指标提取
//!
//! 天气接口返回 `{"data": [{"parameter": "t_2m:C", "coordinates": [{"dates": [{"value": 22}]}]}]}`；
//! 按参数名子串识别温度 / 降水 / 风速 / 积雪 / 降雪概率，每个参数取第一个时间点的值。
//! 被 save_event（写入事件）与情绪分类器共用。

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WeatherMetrics {
    /// °C
    pub temperature: Option<f64>,
    /// mm
    pub precipitation: Option<f64>,
    /// km/h（或接口所给单位）
    pub wind_speed: Option<f64>,
    /// 积雪深度 / 新雪量
    pub snow_depth: Option<f64>,
    /// 降雪概率（%）
    pub snow_probability: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Temperature,
    Precipitation,
    WindSpeed,
    SnowDepth,
    SnowProbability,
}

fn classify_parameter(parameter: &str) -> Option<MetricKind> {
    let p = parameter.to_lowercase();
    if p.contains("snow") {
        if p.contains("prob") {
            return Some(MetricKind::SnowProbability);
        }
        return Some(MetricKind::SnowDepth);
    }
    if p.contains("prob") {
        return None;
    }
    if p.contains("precip") {
        return Some(MetricKind::Precipitation);
    }
    if p.contains("wind_speed") {
        return Some(MetricKind::WindSpeed);
    }
    if p.contains("t_2m") || p.starts_with("t_") {
        return Some(MetricKind::Temperature);
    }
    None
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 找到参数列表：接受接口原始响应，或被包了一层 `{"success": true, "data": {...}}` 的工具结果
fn parameter_list(payload: &Value) -> Option<&Vec<Value>> {
    match payload.get("data")? {
        Value::Array(items) => Some(items),
        inner @ Value::Object(_) => parameter_list(inner),
        _ => None,
    }
}

impl WeatherMetrics {
    pub fn from_payload(payload: &Value) -> Self {
        let mut metrics = Self::default();
        let Some(items) = parameter_list(payload) else {
            return metrics;
        };
        for item in items {
            let Some(kind) = item
                .get("parameter")
                .and_then(Value::as_str)
                .and_then(classify_parameter)
            else {
                continue;
            };
            let value = item
                .pointer("/coordinates/0/dates/0/value")
                .and_then(as_number);
            let slot = match kind {
                MetricKind::Temperature => &mut metrics.temperature,
                MetricKind::Precipitation => &mut metrics.precipitation,
                MetricKind::WindSpeed => &mut metrics.wind_speed,
                MetricKind::SnowDepth => &mut metrics.snow_depth,
                MetricKind::SnowProbability => &mut metrics.snow_probability,
            };
            // 同类参数出现多次时保留第一个
            if slot.is_none() {
                *slot = value;
            }
        }
        metrics
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
