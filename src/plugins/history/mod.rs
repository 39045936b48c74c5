//! Chat session persistence over a size-bounded key-value backend.
//!
//! The conversation-level state that sits on top of this lives in
//! `crate::services::history`.

mod backend;
mod error;
mod store;
mod title;
mod types;

pub use backend::{FileStorage, KeyValueStorage, MemoryStorage};
pub use error::StorageError;
pub use store::{
    CURRENT_SESSION_KEY, MAX_MESSAGES_PER_SESSION, MAX_SESSIONS, QUOTA_RECOVERY_KEEP,
    SESSIONS_KEY, SessionStore,
};
pub(crate) use title::title_from_messages;
pub use title::{TITLE_ELLIPSIS, TITLE_MAX_CHARS};
pub use types::{ChatSession, DEFAULT_TITLE, Message, MessagePatch, Role};
