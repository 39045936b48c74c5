//! Durable session collection over a size-bounded key-value backend.
//!
//! Layout (three keys):
//! - `chat_sessions`: JSON array of sessions, most-recently-inserted first, at most 20.
//! - `current_session_id`: the active session ID, absent when none.
//! - `chat_settings`: reserved.
//!
//! None of the operations surface errors: failures are logged and the call
//! degrades to a no-op with an empty/`None` result. A detached store (no
//! backend, e.g. headless rendering) behaves the same way.

use std::sync::Arc;

use crate::services::ids;

use super::backend::{KeyValueStorage, MemoryStorage};
use super::title;
use super::types::{ChatSession, Message};
use super::StorageError;

pub const SESSIONS_KEY: &str = "chat_sessions";
pub const CURRENT_SESSION_KEY: &str = "current_session_id";

pub const MAX_SESSIONS: usize = 20;
pub const MAX_MESSAGES_PER_SESSION: usize = 100;
/// Sessions kept by the eviction pass after a quota failure.
pub const QUOTA_RECOVERY_KEEP: usize = 5;
pub const STORAGE_SOFT_CAP_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone)]
pub struct SessionStore {
    storage: Option<Arc<dyn KeyValueStorage>>,
    clock: fn() -> u64,
    id_generator: fn() -> String,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage: Some(storage),
            clock: ids::now_ms,
            id_generator: ids::generate_id,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// A store without persistent storage; every operation is a no-op.
    pub fn detached() -> Self {
        Self {
            storage: None,
            clock: ids::now_ms,
            id_generator: ids::generate_id,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, id_generator: fn() -> String) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn is_attached(&self) -> bool {
        self.storage.is_some()
    }

    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    pub fn get_sessions(&self) -> Vec<ChatSession> {
        let Some(storage) = self.storage.as_deref() else {
            return Vec::new();
        };

        let data = match storage.get(SESSIONS_KEY) {
            Ok(Some(data)) => data,
            Ok(None) => return Vec::new(),
            Err(err) => {
                log::error!("[Storage] Failed to get sessions: {}", err);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<ChatSession>>(&data) {
            Ok(sessions) => sessions,
            Err(err) => {
                log::error!("[Storage] Failed to get sessions: {}", err);
                Vec::new()
            }
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        self.get_sessions().into_iter().find(|s| s.id == session_id)
    }

    /// Upsert by ID. New sessions go to the front, existing ones keep their
    /// slot; the collection is then cut to `MAX_SESSIONS`.
    pub fn save_session(&self, session: &ChatSession) {
        let Some(storage) = self.storage.as_deref() else {
            return;
        };

        let mut session = session.clone();
        if session.messages.len() > MAX_MESSAGES_PER_SESSION {
            log::debug!(
                "[Storage] Session {} holds {} messages (recommended max {})",
                session.id,
                session.messages.len(),
                MAX_MESSAGES_PER_SESSION
            );
        }

        let mut sessions = self.get_sessions();
        match sessions.iter().position(|s| s.id == session.id) {
            Some(index) => {
                // updatedAt never moves backwards for the same session.
                session.updated_at = session.updated_at.max(sessions[index].updated_at);
                sessions[index] = session.clone();
            }
            None => sessions.insert(0, session.clone()),
        }
        sessions.truncate(MAX_SESSIONS);

        let Err(err) = write_sessions(storage, &sessions) else {
            return;
        };
        log::error!("[Storage] Failed to save session: {}", err);

        if !err.is_quota_exceeded() {
            return;
        }

        self.cleanup_old_sessions(QUOTA_RECOVERY_KEEP);
        if let Err(retry_err) = write_sessions(storage, std::slice::from_ref(&session)) {
            log::error!("[Storage] Retry failed: {}", retry_err);
        }
    }

    pub fn delete_session(&self, session_id: &str) {
        let Some(storage) = self.storage.as_deref() else {
            return;
        };

        let sessions: Vec<ChatSession> = self
            .get_sessions()
            .into_iter()
            .filter(|s| s.id != session_id)
            .collect();

        if let Err(err) = write_sessions(storage, &sessions) {
            log::error!("[Storage] Failed to delete session: {}", err);
            return;
        }

        if self.get_current_session_id().as_deref() == Some(session_id) {
            self.set_current_session_id(None);
        }
    }

    pub fn create_session(&self) -> ChatSession {
        let session = ChatSession::new((self.id_generator)(), (self.clock)());

        self.save_session(&session);
        self.set_current_session_id(Some(&session.id));

        session
    }

    pub fn get_current_session_id(&self) -> Option<String> {
        let storage = self.storage.as_deref()?;

        match storage.get(CURRENT_SESSION_KEY) {
            Ok(value) => value.filter(|id| !id.is_empty()),
            Err(err) => {
                log::error!("[Storage] Failed to get current session: {}", err);
                None
            }
        }
    }

    /// `None` removes the pointer entirely.
    pub fn set_current_session_id(&self, session_id: Option<&str>) {
        let Some(storage) = self.storage.as_deref() else {
            return;
        };

        let result = match session_id.filter(|id| !id.is_empty()) {
            Some(id) => storage.set(CURRENT_SESSION_KEY, id),
            None => storage.remove(CURRENT_SESSION_KEY),
        };
        if let Err(err) = result {
            log::error!("[Storage] Failed to set current session: {}", err);
        }
    }

    /// Keep the `keep_count` most recently updated sessions, overwriting the collection.
    pub fn cleanup_old_sessions(&self, keep_count: usize) {
        let Some(storage) = self.storage.as_deref() else {
            return;
        };

        let mut sessions = self.get_sessions();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(keep_count);

        if let Err(err) = write_sessions(storage, &sessions) {
            log::error!("[Storage] Failed to clean up sessions: {}", err);
        }
    }

    /// Name a default-titled session after its first user message.
    pub fn update_session_title(&self, session_id: &str, messages: &[Message]) {
        let Some(mut session) = self.get_session(session_id) else {
            return;
        };
        if !session.has_default_title() {
            return;
        }
        let Some(next_title) = title::title_from_messages(messages) else {
            return;
        };

        session.title = next_title;
        session.updated_at = (self.clock)();
        self.save_session(&session);
    }
}

fn write_sessions(storage: &dyn KeyValueStorage, sessions: &[ChatSession]) -> Result<(), StorageError> {
    let data = serde_json::to_string(sessions)?;
    if data.len() > STORAGE_SOFT_CAP_BYTES {
        log::warn!(
            "[Storage] Session payload is {} bytes, above the {} byte soft cap",
            data.len(),
            STORAGE_SOFT_CAP_BYTES
        );
    }
    storage.set(SESSIONS_KEY, &data)
}
