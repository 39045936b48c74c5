use serde::{Deserialize, Serialize};

use crate::plugins::history::{Message, Role};

use super::notice::Notice;

pub const MAX_MESSAGE_LENGTH: usize = 4000;
pub const MAX_HISTORY_LENGTH: usize = 10;

/// Body of `POST <endpoint>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

/// Trimmed-down message sent as conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// One `data:` payload of the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamChunk {
    pub text: String,
}

/// Machine-readable error codes the endpoint may attach to a non-2xx body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ErrorCode {
    InvalidMessage,
    MessageTooLong,
    HistoryTooLong,
    ConfigError,
    PermissionDenied,
    RateLimitExceeded,
    ApiError,
    InternalError,
    Timeout,
    Other(String),
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "INVALID_MESSAGE" => Self::InvalidMessage,
            "MESSAGE_TOO_LONG" => Self::MessageTooLong,
            "HISTORY_TOO_LONG" => Self::HistoryTooLong,
            "CONFIG_ERROR" => Self::ConfigError,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "RATE_LIMIT_EXCEEDED" => Self::RateLimitExceeded,
            "API_ERROR" => Self::ApiError,
            "INTERNAL_ERROR" => Self::InternalError,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Other(code),
        }
    }
}

/// Non-2xx response body. `error` is user-facing text by contract.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<ErrorCode>,
}

/// Progress of a single send, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// User message and assistant placeholder were inserted.
    Started {
        user_message_id: String,
        assistant_message_id: String,
    },
    /// An attempt began; `attempt` is 1-based. Content restarts from empty.
    Attempt {
        assistant_message_id: String,
        attempt: u32,
    },
    Delta {
        assistant_message_id: String,
        delta: String,
    },
    Finished {
        assistant_message_id: String,
        content: String,
    },
    Failed {
        assistant_message_id: String,
        aborted: bool,
    },
    NoticeChanged(Option<Notice>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let request = ChatRequest {
            message: "hi".to_string(),
            history: Some(vec![HistoryEntry {
                role: Role::Assistant,
                content: "hello".to_string(),
            }]),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "message": "hi",
                "history": [{ "role": "assistant", "content": "hello" }]
            })
        );

        let bare = ChatRequest {
            message: "hi".to_string(),
            history: None,
        };
        assert_eq!(serde_json::to_value(&bare).unwrap(), serde_json::json!({ "message": "hi" }));
    }

    #[test]
    fn test_error_code_parsing() {
        let body: ErrorResponse =
            serde_json::from_str(r#"{"error":"slow down","code":"RATE_LIMIT_EXCEEDED"}"#).unwrap();
        assert_eq!(body.code, Some(ErrorCode::RateLimitExceeded));

        let body: ErrorResponse =
            serde_json::from_str(r#"{"error":"x","code":"SOMETHING_NEW"}"#).unwrap();
        assert_eq!(body.code, Some(ErrorCode::Other("SOMETHING_NEW".to_string())));

        let body: ErrorResponse = serde_json::from_str(r#"{"error":"x"}"#).unwrap();
        assert_eq!(body.code, None);
    }
}
