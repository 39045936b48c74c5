//! User-facing notices shown by the front-end.
//!
//! Texts are picked per locale; internal error strings never reach the user.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Ko,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Error,
    /// Persistent while offline; not dismissable until connectivity returns.
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeText {
    ConnectionLost,
    SendWhileOffline,
    Cancelled,
    SendFailed,
    EmptyMessage,
    MessageTooLong,
    OfflineBanner,
    Crashed,
}

impl Locale {
    pub fn text(self, text: NoticeText) -> &'static str {
        match (self, text) {
            (Self::En, NoticeText::ConnectionLost) => {
                "Internet connection lost. Please check your connection."
            }
            (Self::En, NoticeText::SendWhileOffline) => "You can't send messages while offline.",
            (Self::En, NoticeText::Cancelled) => "The request was cancelled.",
            (Self::En, NoticeText::SendFailed) => "Something went wrong while sending the message.",
            (Self::En, NoticeText::EmptyMessage) => "Please enter a message.",
            (Self::En, NoticeText::MessageTooLong) => "Message is too long (max 4000 characters).",
            (Self::En, NoticeText::OfflineBanner) => {
                "You are offline. You can try again once the connection is restored."
            }
            (Self::En, NoticeText::Crashed) => "Something went wrong. Try again or restart.",

            (Self::Ko, NoticeText::ConnectionLost) => {
                "인터넷 연결이 끊어졌습니다. 연결을 확인해주세요."
            }
            (Self::Ko, NoticeText::SendWhileOffline) => {
                "오프라인 상태에서는 메시지를 보낼 수 없습니다."
            }
            (Self::Ko, NoticeText::Cancelled) => "요청이 취소되었습니다.",
            (Self::Ko, NoticeText::SendFailed) => "메시지 전송 중 오류가 발생했습니다.",
            (Self::Ko, NoticeText::EmptyMessage) => "메시지를 입력해주세요.",
            (Self::Ko, NoticeText::MessageTooLong) => "메시지가 너무 깁니다. (최대 4000자)",
            (Self::Ko, NoticeText::OfflineBanner) => {
                "오프라인 상태입니다. 연결이 복원되면 자동으로 다시 시도할 수 있습니다."
            }
            (Self::Ko, NoticeText::Crashed) => {
                "문제가 발생했습니다. 잠시 후 다시 시도하거나 다시 시작하세요."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    pub fn offline(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Offline,
            text: text.into(),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.kind == NoticeKind::Offline
    }
}
