//! In-memory conversation state on top of the session store.
//!
//! `Conversation` owns the authoritative copy of the current session's
//! messages. Every mutation is written through to the store right away,
//! so the persisted session never lags the in-memory one.

use crate::plugins::history::{
    ChatSession, Message, MessagePatch, SessionStore, title_from_messages,
};
use crate::services::chat::HistoryEntry;

pub struct Conversation {
    store: SessionStore,
    current: ChatSession,
    messages: Vec<Message>,
    sessions: Vec<ChatSession>,
}

impl Conversation {
    /// Resume the session the current pointer names, or start a new one.
    pub fn init(store: SessionStore) -> Self {
        let resumed = store
            .get_current_session_id()
            .and_then(|id| store.get_session(&id));

        let current = match resumed {
            Some(session) => session,
            None => store.create_session(),
        };

        let mut conversation = Self {
            messages: current.messages.clone(),
            current,
            sessions: Vec::new(),
            store,
        };
        conversation.refresh_sessions();
        conversation
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn current(&self) -> &ChatSession {
        &self.current
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.sync();
    }

    pub fn update_message(&mut self, id: &str, patch: MessagePatch) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        message.apply(patch);
        self.sync();
        true
    }

    pub fn remove_message(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        if self.messages.len() == before {
            return false;
        }
        self.sync();
        true
    }

    /// Push the current messages into the store and refresh derived state.
    pub fn sync(&mut self) {
        let mut session = ChatSession {
            messages: self.messages.clone(),
            updated_at: self.store.now().max(self.current.updated_at),
            ..self.current.clone()
        };

        self.store.save_session(&session);
        // Titles freeze once set, so only a default title needs the store pass.
        if session.has_default_title() {
            self.store.update_session_title(&session.id, &self.messages);
        }

        // Mirror the store's title rule so a detached store still names sessions.
        if session.has_default_title() {
            if let Some(title) = title_from_messages(&self.messages) {
                session.title = title;
            }
        }

        self.current = session;
        self.refresh_sessions();
    }

    pub fn create_new_session(&mut self) -> &ChatSession {
        self.current = self.store.create_session();
        self.messages.clear();
        self.refresh_sessions();
        &self.current
    }

    /// Returns `false` (and changes nothing) when `session_id` is unknown.
    pub fn switch_session(&mut self, session_id: &str) -> bool {
        let Some(session) = self.store.get_session(session_id) else {
            return false;
        };

        self.messages = session.messages.clone();
        self.current = session;
        self.store.set_current_session_id(Some(session_id));
        self.refresh_sessions();
        true
    }

    /// Deleting the current session starts a fresh one in its place.
    pub fn delete_session(&mut self, session_id: &str) {
        self.store.delete_session(session_id);

        if self.current.id == session_id {
            self.create_new_session();
            return;
        }
        self.refresh_sessions();
    }

    /// The last `limit` messages as request context.
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].iter().map(HistoryEntry::from).collect()
    }

    fn refresh_sessions(&mut self) {
        if !self.store.is_attached() {
            self.sessions = vec![self.current.clone()];
            return;
        }
        self.sessions = self.store.get_sessions();
    }
}
