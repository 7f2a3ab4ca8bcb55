//! 持久化接口：对话消息与事件
//!
//! 编排器不依赖这里；由 agent 层（调用方）读取历史快照、写回新消息，save_event 工具写入事件。
//! 提供内存实现（测试 / 无数据库运行）与 SQLite 实现（见 sqlite.rs）。

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::memory::{Conversation, EventFilter, Message, SavedEvent};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub trait ConversationStore: Send + Sync {
    fn create_conversation(&self, user_id: &str, title: &str) -> Result<Conversation, StoreError>;

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError>;

    fn conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;

    fn append_message(&self, conversation_id: Uuid, message: &Message) -> Result<(), StoreError>;

    /// 一次性追加多条消息，要么全部写入，要么都不写
    fn append_messages(&self, conversation_id: Uuid, messages: &[Message]) -> Result<(), StoreError>;

    /// 仅删除属于 user_id 的会话，连同其消息；返回是否删除了记录
    fn delete_conversation(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError>;

    /// 按写入顺序返回全部消息
    fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError>;
}

pub trait EventStore: Send + Sync {
    fn create_event(&self, event: &SavedEvent) -> Result<(), StoreError>;

    /// 按 event_date 倒序
    fn events_for_user(
        &self,
        user_id: &str,
        filter: EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SavedEvent>, StoreError>;

    fn get_event(&self, id: Uuid, user_id: &str) -> Result<Option<SavedEvent>, StoreError>;

    fn delete_event(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError>;
}

/// 内存存储：进程退出即丢失
#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    messages: RwLock<HashMap<Uuid, Vec<Message>>>,
    events: RwLock<Vec<SavedEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for InMemoryStore {
    fn create_conversation(&self, user_id: &str, title: &str) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(user_id, title);
        self.conversations
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .conversations
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(&id)
            .cloned())
    }

    fn conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut list: Vec<Conversation> = self
            .conversations
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    fn append_message(&self, conversation_id: Uuid, message: &Message) -> Result<(), StoreError> {
        self.messages
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    fn append_messages(&self, conversation_id: Uuid, messages: &[Message]) -> Result<(), StoreError> {
        self.messages
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .entry(conversation_id)
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    fn delete_conversation(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.write().map_err(|_| StoreError::Poisoned)?;
        if !conversations.get(&id).is_some_and(|c| c.user_id == user_id) {
            return Ok(false);
        }
        conversations.remove(&id);
        self.messages
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(&id);
        Ok(true)
    }

    fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .messages
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl EventStore for InMemoryStore {
    fn create_event(&self, event: &SavedEvent) -> Result<(), StoreError> {
        self.events
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .push(event.clone());
        Ok(())
    }

    fn events_for_user(
        &self,
        user_id: &str,
        filter: EventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SavedEvent>, StoreError> {
        let mut events: Vec<SavedEvent> = self
            .events
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .iter()
            .filter(|e| e.user_id == user_id && filter.matches(e, now))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.event_date.cmp(&a.event_date));
        Ok(events)
    }

    fn get_event(&self, id: Uuid, user_id: &str) -> Result<Option<SavedEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .iter()
            .find(|e| e.id == id && e.user_id == user_id)
            .cloned())
    }

    fn delete_event(&self, id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let mut events = self.events.write().map_err(|_| StoreError::Poisoned)?;
        let before = events.len();
        events.retain(|e| !(e.id == id && e.user_id == user_id));
        Ok(events.len() != before)
    }
}
