//! 用户通过 save_event 工具保存的事件
//!
//! 由工具一次性写入，此后只读；天气原始数据与提取出的指标一并保存。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::weather::WeatherMetrics;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedEvent {
    pub id: Uuid,
    pub user_id: String,
    pub conversation_id: Option<Uuid>,
    pub name: String,
    pub event_date: DateTime<Utc>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 原始天气数据（无法解析时为 {"raw_weather_data": "..."}）
    pub weather_data: Value,
    pub temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub wind_speed: Option<f64>,
    pub snow: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl SavedEvent {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: Option<Uuid>,
        name: impl Into<String>,
        event_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            conversation_id,
            name: name.into(),
            event_date,
            location_name: None,
            latitude: None,
            longitude: None,
            weather_data: Value::Null,
            temperature: None,
            precipitation: None,
            wind_speed: None,
            snow: None,
            created_at: Utc::now(),
        }
    }

    /// 写入天气数据并同步提取的指标
    pub fn with_weather(mut self, weather_data: Value) -> Self {
        let metrics = WeatherMetrics::from_payload(&weather_data);
        self.temperature = metrics.temperature;
        self.precipitation = metrics.precipitation;
        self.wind_speed = metrics.wind_speed;
        self.snow = metrics.snow_depth;
        self.weather_data = weather_data;
        self
    }
}

/// 事件查询范围（相对当前时间）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFilter {
    All,
    Upcoming,
    Past,
}

impl EventFilter {
    pub fn matches(&self, event: &SavedEvent, now: DateTime<Utc>) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Upcoming => event.event_date >= now,
            EventFilter::Past => event.event_date < now,
        }
    }
}
