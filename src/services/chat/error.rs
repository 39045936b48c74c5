use super::types::ErrorCode;

/// Message used when a non-2xx body carries no readable `error` field.
pub const REQUEST_FAILED: &str = "Request failed";

#[derive(Debug, Clone, PartialEq)]
pub enum ChatError {
    /// Rejected before any I/O (empty or over-long input).
    Validation { message: String },
    /// Send attempted while connectivity is known absent.
    Offline,
    /// Endpoint answered with a non-2xx status.
    Http {
        status: u16,
        message: String,
        code: Option<ErrorCode>,
    },
    /// 2xx response without a readable body.
    MissingBody,
    /// Connection, read or decode failure below the protocol level.
    Transport { message: String, status: Option<u16> },
    Aborted,
    Exhausted,
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>, code: Option<ErrorCode>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message }
            | Self::Http { message, .. }
            | Self::Transport { message, .. } => message,
            Self::Offline => "Offline",
            Self::MissingBody => "No response body",
            Self::Aborted => "Request aborted",
            Self::Exhausted => "Retry attempts exhausted",
        }
    }

    /// Text that may be shown to the user as-is.
    ///
    /// Only the endpoint's `error` field qualifies; everything else is internal.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Http { message, .. } if message != REQUEST_FAILED => Some(message),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { message } => write!(f, "Validation: {}", message),
            Self::Http { status, message, .. } => write!(f, "Http {}: {}", status, message),
            Self::Transport { message, .. } => write!(f, "Transport: {}", message),
            other => f.write_str(other.message()),
        }
    }
}

impl std::error::Error for ChatError {}
