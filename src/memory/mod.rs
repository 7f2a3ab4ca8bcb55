//! 记忆层：对话消息、已保存事件与持久化（内存 / SQLite）

pub mod conversation;
pub mod event;
pub mod persistence;
pub mod sqlite;

pub use conversation::{recent_history, Conversation, Message, Role};
pub use event::{EventFilter, SavedEvent};
pub use persistence::{ConversationStore, EventStore, InMemoryStore, StoreError};
pub use sqlite::SqliteStore;
