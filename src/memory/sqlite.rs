//! SQLite 持久化（rusqlite，同步）
//!
//! 三张表：conversations、messages、events。时间统一存为 UTC RFC3339（微秒、Z 结尾），便于按文本比较。

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::memory::{
    Conversation, ConversationStore, EventFilter, EventStore, Message, Role, SavedEvent,
    StoreError,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s}: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("uuid {s}: {e}")))
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                conversation_id TEXT,
                name TEXT NOT NULL,
                event_date TEXT NOT NULL,
                location_name TEXT,
                latitude REAL,
                longitude REAL,
                weather_data TEXT NOT NULL,
                temperature REAL,
                precipitation REAL,
                wind_speed REAL,
                snow REAL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id, event_date);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn build_conversation(raw: (String, String, String, String)) -> Result<Conversation, StoreError> {
    let (id, user_id, title, created_at) = raw;
    Ok(Conversation {
        id: parse_uuid(&id)?,
        user_id,
        title,
        created_at: parse_ts(&created_at)?,
    })
}

impl ConversationStore for SqliteStore {
    fn create_conversation(&self, user_id: &str, title: &str) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(user_id, title);
        self.conn()?.execute(
            "INSERT INTO conversations (id, user_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.id.to_string(),
                conversation.user_id,
                conversation.title,
                ts(&conversation.created_at)
            ],
        )?;
        Ok(conversation)
    }

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        let raw = self
            .conn()?
            .query_row(
                "SELECT id, user_id, title, created_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                conversation_from_row,
            )
            .optional()?;
        raw.map(build_conversation).transpose()
    }

    fn conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at FROM conversations
             WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], conversation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(build_conversation).collect()
    }

    fn append_message(&self, conversation_id: Uuid, message: &Message) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation_id.to_string(),
                message.role.as_str(),
                message.content,
                ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    fn append_messages(&self, conversation_id: Uuid, messages: &[Message]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let now = ts(&Utc::now());
            for message in messages {
                stmt.execute(params![
                    conversation_id.to_string(),
                    message.role.as_str(),
                    message.content,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_conversation(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        // messages 通过 ON DELETE CASCADE 一并删除
        let deleted = self.conn()?.execute(
            "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id],
        )?;
        Ok(deleted > 0)
    }

    fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
        )?;
        let messages = stmt
            .query_map(params![conversation_id.to_string()], |row| {
                let role: String = row.get(0)?;
                Ok(Message {
                    role: Role::parse(&role),
                    content: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

struct EventRow {
    id: String,
    user_id: String,
    conversation_id: Option<String>,
    name: String,
    event_date: String,
    location_name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    weather_data: String,
    temperature: Option<f64>,
    precipitation: Option<f64>,
    wind_speed: Option<f64>,
    snow: Option<f64>,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            conversation_id: row.get(2)?,
            name: row.get(3)?,
            event_date: row.get(4)?,
            location_name: row.get(5)?,
            latitude: row.get(6)?,
            longitude: row.get(7)?,
            weather_data: row.get(8)?,
            temperature: row.get(9)?,
            precipitation: row.get(10)?,
            wind_speed: row.get(11)?,
            snow: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    fn into_event(self) -> Result<SavedEvent, StoreError> {
        Ok(SavedEvent {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            conversation_id: self.conversation_id.as_deref().map(parse_uuid).transpose()?,
            name: self.name,
            event_date: parse_ts(&self.event_date)?,
            location_name: self.location_name,
            latitude: self.latitude,
            longitude: self.longitude,
            weather_data: serde_json::from_str(&self.weather_data)?,
            temperature: self.temperature,
            precipitation: self.precipitation,
            wind_speed: self.wind_speed,
            snow: self.snow,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

const EVENT_COLUMNS: &str = "id, user_id, conversation_id, name, event_date, location_name,
    latitude, longitude, weather_data, temperature, precipitation, wind_speed, snow, created_at";

impl EventStore for SqliteStore {
    fn create_event(&self, event: &SavedEvent) -> Result<(), StoreError> {
        let weather_data = serde_json::to_string(&event.weather_data)?;
        self.conn()?.execute(
            "INSERT INTO events (id, user_id, conversation_id, name, event_date, location_name,
                latitude, longitude, weather_data, temperature, precipitation, wind_speed, snow, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                event.id.to_string(),
                event.user_id,
                event.conversation_id.map(|id| id.to_string()),
                event.name,
                ts(&event.event_date),
                event.location_name,
                event.latitude,
                event.longitude,
                weather_data,
                event.temperature,
                event.precipitation,
                event.wind_speed,
                event.snow,
                ts(&event.created_at),
            ],
        )?;
        Ok(())
    }

    fn events_for_user(
        &self,
        user_id: &str,
        filter: EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SavedEvent>, StoreError> {
        let condition = match filter {
            EventFilter::All => "",
            EventFilter::Upcoming => "AND event_date >= ?2",
            EventFilter::Past => "AND event_date < ?2",
        };
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 {condition} ORDER BY event_date DESC"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = match filter {
            EventFilter::All => stmt
                .query_map(params![user_id], EventRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
            _ => stmt
                .query_map(params![user_id, ts(&now)], EventRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter().map(EventRow::into_event).collect()
    }

    fn get_event(&self, id: Uuid, user_id: &str) -> Result<Option<SavedEvent>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id],
                EventRow::from_row,
            )
            .optional()?;
        row.map(EventRow::into_event).transpose()
    }

    fn delete_event(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id],
        )?;
        Ok(deleted > 0)
    }
}
