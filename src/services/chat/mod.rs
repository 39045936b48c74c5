//! Streaming chat client: wire types, decoder, transport and the send pipeline.

mod error;
mod manager;
mod notice;
mod orchestrator;
mod retry_policy;
mod stream;
mod transport;
mod types;

pub use error::{ChatError, REQUEST_FAILED};
pub use manager::{AttemptTicket, InFlight, SendTicket};
pub use notice::{Locale, Notice, NoticeKind, NoticeText};
pub use orchestrator::{ChatOrchestrator, DEFAULT_NOTICE_TIMEOUT, PendingSend, SendPhase};
pub use stream::{ByteSource, ByteStream, SseDecoder};
pub use transport::{ChatTransport, HttpTransport};
pub use types::{
    ChatEvent, ChatRequest, ErrorCode, ErrorResponse, HistoryEntry, MAX_HISTORY_LENGTH,
    MAX_MESSAGE_LENGTH, StreamChunk,
};
