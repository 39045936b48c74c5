use super::types::{Message, Role};

pub const TITLE_MAX_CHARS: usize = 30;
pub const TITLE_ELLIPSIS: &str = "...";

/// First `TITLE_MAX_CHARS` characters of `source`, with an ellipsis when cut.
pub(crate) fn truncate_title(source: &str) -> String {
    if source.chars().count() <= TITLE_MAX_CHARS {
        return source.to_string();
    }
    source.chars().take(TITLE_MAX_CHARS).collect::<String>() + TITLE_ELLIPSIS
}

/// Title derived from the first user message, if there is one.
pub(crate) fn title_from_messages(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| truncate_title(&m.content))
}
