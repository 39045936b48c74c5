//! Send pipeline: validation, optimistic insert, retried streaming, settle.
//!
//! Per send the phase moves `Idle -> Sending -> Streaming` and ends in one of
//! `Settled`, `Failed` or `Aborted`. Conversation state lives behind a single
//! mutex; subscribers observe progress through [`ChatEvent`]s.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::plugins::history::{Message, MessagePatch};
use crate::services::history::Conversation;
use crate::services::ids::{generate_id, now_ms};
use crate::services::retry::{Retry, RetryPolicy};

use super::error::ChatError;
use super::manager::{InFlight, SendTicket};
use super::notice::{Locale, Notice, NoticeText};
use super::stream::SseDecoder;
use super::transport::ChatTransport;
use super::types::{ChatEvent, ChatRequest, HistoryEntry, MAX_HISTORY_LENGTH, MAX_MESSAGE_LENGTH};

const EVENT_CAPACITY: usize = 256;
pub const DEFAULT_NOTICE_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    Sending,
    Streaming,
    Settled,
    Failed,
    Aborted,
}

struct ChatState {
    conversation: Conversation,
    phase: SendPhase,
    notice: Option<Notice>,
    // Bumped on every notice change; expiry timers compare against it.
    notice_serial: u64,
    online: bool,
}

struct PreparedSend {
    history: Vec<HistoryEntry>,
    assistant_id: String,
}

/// A send whose messages are inserted and whose slot is already claimed.
///
/// Finish it with [`ChatOrchestrator::drive`]. Dropping it releases the slot.
pub struct PendingSend {
    ticket: SendTicket,
    request: ChatRequest,
    assistant_id: String,
    in_flight: InFlight,
}

impl PendingSend {
    pub fn assistant_message_id(&self) -> &str {
        &self.assistant_id
    }
}

impl Drop for PendingSend {
    fn drop(&mut self) {
        self.in_flight.finish(&self.ticket);
    }
}

pub struct ChatOrchestrator {
    // NOTE: Using std::sync::Mutex since lock is never held across .await.
    state: Arc<Mutex<ChatState>>,
    transport: Arc<dyn ChatTransport>,
    in_flight: InFlight,
    retry: RetryPolicy,
    locale: Locale,
    notice_timeout: Option<Duration>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatOrchestrator {
    pub fn new(conversation: Conversation, transport: Arc<dyn ChatTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ChatState {
                conversation,
                phase: SendPhase::Idle,
                notice: None,
                notice_serial: 0,
                online: true,
            })),
            transport,
            in_flight: InFlight::new(),
            retry: RetryPolicy::new(3, Duration::from_millis(500), true),
            locale: Locale::default(),
            notice_timeout: Some(DEFAULT_NOTICE_TIMEOUT),
            events,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// How long an error notice stays up. `None` keeps it until replaced.
    pub fn with_notice_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.notice_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn phase(&self) -> SendPhase {
        self.state().phase
    }

    pub fn notice(&self) -> Option<Notice> {
        self.state().notice.clone()
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_busy()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().conversation.messages().to_vec()
    }

    /// Run `f` against the conversation (session switching, listing, ...).
    pub fn with_conversation<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        f(&mut self.state().conversation)
    }

    // A panic mid-update leaves at worst a stale message; keep serving.
    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn replace_notice(&self, state: &mut ChatState, notice: Option<Notice>) {
        if state.notice == notice {
            return;
        }
        state.notice_serial += 1;
        if notice.as_ref().is_some_and(|n| !n.is_offline()) {
            self.schedule_notice_expiry(state.notice_serial);
        }
        state.notice = notice.clone();
        self.emit(ChatEvent::NoticeChanged(notice));
    }

    // Offline notices are never scheduled; connectivity clears them.
    fn schedule_notice_expiry(&self, serial: u64) {
        let Some(timeout) = self.notice_timeout else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("[Chat] No runtime, error notice will not expire");
            return;
        };

        let shared = Arc::downgrade(&self.state);
        let events = self.events.clone();
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if state.notice_serial != serial || state.notice.is_none() {
                return;
            }
            state.notice_serial += 1;
            state.notice = None;
            let _ = events.send(ChatEvent::NoticeChanged(None));
        });
    }

    /// Send `content` and stream the reply into the conversation.
    ///
    /// Returns the final assistant text. On failure the assistant placeholder
    /// is removed and a notice describes what happened.
    pub async fn send(&self, content: &str) -> Result<String, ChatError> {
        let pending = self.begin_send(content)?;
        self.drive(pending).await
    }

    /// Validate, insert the messages and claim the send slot without awaiting.
    ///
    /// `is_busy()` is true as soon as this returns `Ok`.
    pub fn begin_send(&self, content: &str) -> Result<PendingSend, ChatError> {
        let content = content.trim();
        let PreparedSend {
            history,
            assistant_id,
        } = self.prepare_send(content)?;

        Ok(PendingSend {
            ticket: self.in_flight.start_send(),
            request: ChatRequest {
                message: content.to_string(),
                history: Some(history),
            },
            assistant_id,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Stream the reply for a send started with [`Self::begin_send`].
    pub async fn drive(&self, pending: PendingSend) -> Result<String, ChatError> {
        let ticket = &pending.ticket;
        let assistant_id = pending.assistant_id.as_str();

        let outcome = {
            let retry = Retry::new(self.retry).on_retry(|attempt, err: &ChatError| {
                log::warn!("[Chat] Attempt {} failed, retrying: {}", attempt, err);
            });
            let request = &pending.request;
            let mut attempt_no = 0u32;
            let run = retry.run(move || {
                attempt_no += 1;
                self.attempt(ticket, request, assistant_id, attempt_no)
            });

            tokio::select! {
                biased;
                _ = ticket.token.cancelled() => Err(ChatError::Aborted),
                result = run => result,
            }
        };

        // A superseded send leaves phase and notice to the send that replaced it.
        let owned = self.in_flight.finish(ticket);

        match outcome {
            Ok(content) => {
                self.settle(assistant_id, &content, owned);
                Ok(content)
            }
            Err(err) => {
                self.fail(assistant_id, &err, owned);
                Err(err)
            }
        }
    }

    fn prepare_send(&self, content: &str) -> Result<PreparedSend, ChatError> {
        let mut state = self.state();

        if !state.online {
            let notice = Notice::offline(self.locale.text(NoticeText::SendWhileOffline));
            self.replace_notice(&mut state, Some(notice));
            return Err(ChatError::Offline);
        }

        if let Err((err, text)) = validate(content) {
            self.replace_notice(&mut state, Some(Notice::error(self.locale.text(text))));
            return Err(err);
        }

        if !state.notice.as_ref().is_some_and(Notice::is_offline) {
            self.replace_notice(&mut state, None);
        }

        let history = state.conversation.history(MAX_HISTORY_LENGTH);

        let user_message = Message::user(generate_id(), content, now_ms());
        let assistant_id = generate_id();
        let user_id = user_message.id.clone();
        state.conversation.add_message(user_message);
        state
            .conversation
            .add_message(Message::assistant_placeholder(assistant_id.clone(), now_ms()));
        state.phase = SendPhase::Sending;

        self.emit(ChatEvent::Started {
            user_message_id: user_id,
            assistant_message_id: assistant_id.clone(),
        });

        Ok(PreparedSend {
            history,
            assistant_id,
        })
    }

    async fn attempt(
        &self,
        send: &SendTicket,
        request: &ChatRequest,
        assistant_id: &str,
        attempt_no: u32,
    ) -> Result<String, ChatError> {
        let attempt = self.in_flight.begin(send);

        {
            let mut state = self.state();
            state
                .conversation
                .update_message(assistant_id, MessagePatch::streaming(""));
            if self.in_flight.owns(send) {
                state.phase = SendPhase::Sending;
            }
            self.emit(ChatEvent::Attempt {
                assistant_message_id: assistant_id.to_string(),
                attempt: attempt_no,
            });
        }

        let source = self.transport.open(request, &attempt.token).await?;
        let mut decoder = SseDecoder::open(source)
            .await?
            .with_cancellation(attempt.token.clone());

        {
            let mut state = self.state();
            if self.in_flight.is_current(attempt.generation) {
                state.phase = SendPhase::Streaming;
            }
        }

        let mut content = String::new();
        while let Some(chunk) = decoder.next().await {
            let chunk = chunk?;
            if !self.in_flight.is_current(attempt.generation) {
                return Err(ChatError::Aborted);
            }
            if chunk.text.is_empty() {
                continue;
            }

            content.push_str(&chunk.text);
            let mut state = self.state();
            state
                .conversation
                .update_message(assistant_id, MessagePatch::streaming(content.as_str()));
            self.emit(ChatEvent::Delta {
                assistant_message_id: assistant_id.to_string(),
                delta: chunk.text,
            });
        }

        Ok(content)
    }

    fn settle(&self, assistant_id: &str, content: &str, owned: bool) {
        let mut state = self.state();
        state
            .conversation
            .update_message(assistant_id, MessagePatch::finished());
        if owned {
            state.phase = SendPhase::Settled;
        }
        self.emit(ChatEvent::Finished {
            assistant_message_id: assistant_id.to_string(),
            content: content.to_string(),
        });
    }

    fn fail(&self, assistant_id: &str, err: &ChatError, owned: bool) {
        let mut state = self.state();
        state.conversation.remove_message(assistant_id);

        let aborted = err.is_aborted();
        if !owned {
            log::debug!("[Chat] Superseded send ended: {}", err);
            self.emit(ChatEvent::Failed {
                assistant_message_id: assistant_id.to_string(),
                aborted,
            });
            return;
        }

        let notice = if aborted {
            state.phase = SendPhase::Aborted;
            Notice::error(self.locale.text(NoticeText::Cancelled))
        } else {
            log::error!("[Chat] Send failed: {}", err);
            state.phase = SendPhase::Failed;
            let text = err
                .user_message()
                .map(str::to_string)
                .unwrap_or_else(|| self.locale.text(NoticeText::SendFailed).to_string());
            if state.online {
                Notice::error(text)
            } else {
                Notice::offline(text)
            }
        };

        self.emit(ChatEvent::Failed {
            assistant_message_id: assistant_id.to_string(),
            aborted,
        });
        self.replace_notice(&mut state, Some(notice));
    }

    /// Cancel the in-flight send, if any. Cooperative: the send settles as `Aborted`.
    pub fn abort(&self) -> bool {
        self.in_flight.abort()
    }

    pub fn set_online(&self, online: bool) {
        let mut state = self.state();
        let was_online = state.online;
        state.online = online;

        if was_online && !online {
            let notice = Notice::offline(self.locale.text(NoticeText::ConnectionLost));
            self.replace_notice(&mut state, Some(notice));
        } else if !was_online && online && state.notice.as_ref().is_some_and(Notice::is_offline) {
            self.replace_notice(&mut state, None);
        }
    }

    /// Offline notices stay up while still offline.
    pub fn dismiss_notice(&self) {
        let mut state = self.state();
        if !state.online && state.notice.as_ref().is_some_and(Notice::is_offline) {
            return;
        }
        self.replace_notice(&mut state, None);
    }

    pub fn shutdown(&self) {
        self.in_flight.abort();
    }
}

impl Drop for ChatOrchestrator {
    fn drop(&mut self) {
        self.in_flight.abort();
    }
}

fn validate(content: &str) -> Result<(), (ChatError, NoticeText)> {
    if content.is_empty() {
        return Err((
            ChatError::validation("Message cannot be empty"),
            NoticeText::EmptyMessage,
        ));
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err((
            ChatError::validation(format!("Message exceeds {MAX_MESSAGE_LENGTH} characters")),
            NoticeText::MessageTooLong,
        ));
    }
    Ok(())
}
