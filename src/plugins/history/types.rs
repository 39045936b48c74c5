use serde::{Deserialize, Serialize};

/// Title every session starts with until the first user message names it.
pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
}

impl Message {
    pub fn user(id: impl Into<String>, content: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            timestamp,
            is_streaming: None,
        }
    }

    /// Empty assistant message that content increments will be appended to.
    pub fn assistant_placeholder(id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            timestamp,
            is_streaming: Some(true),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming.unwrap_or(false)
    }

    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(is_streaming) = patch.is_streaming {
            // Only assistant messages ever stream.
            self.is_streaming = Some(is_streaming && self.role == Role::Assistant);
        }
    }
}

/// Partial update applied to a message in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub is_streaming: Option<bool>,
}

impl MessagePatch {
    pub fn streaming(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            is_streaming: Some(true),
        }
    }

    pub fn finished() -> Self {
        Self {
            content: None,
            is_streaming: Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_shape() {
        let message = Message::assistant_placeholder("m1", 42);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "m1",
                "role": "assistant",
                "content": "",
                "timestamp": 42,
                "isStreaming": true
            })
        );

        let user = serde_json::to_value(Message::user("u1", "hi", 1)).unwrap();
        assert!(user.get("isStreaming").is_none());
    }

    #[test]
    fn test_session_json_shape() {
        let session = ChatSession::new("s1", 7);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["createdAt"], 7);
        assert_eq!(json["updatedAt"], 7);
        assert_eq!(json["title"], DEFAULT_TITLE);

        let parsed: ChatSession = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, session);
    }

    #[test]
    fn test_user_message_never_streams() {
        let mut message = Message::user("u1", "hi", 1);
        message.apply(MessagePatch::streaming("hi"));
        assert!(!message.is_streaming());
    }

    #[test]
    fn test_patch_finished_keeps_content() {
        let mut message = Message::assistant_placeholder("a1", 1);
        message.apply(MessagePatch::streaming("hello"));
        message.apply(MessagePatch::finished());
        assert_eq!(message.content, "hello");
        assert_eq!(message.is_streaming, Some(false));
    }
}
