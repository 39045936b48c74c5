//! Incremental decoder for the chat endpoint's event stream.
//!
//! Frames are separated by a blank line (`\n\n`). Only frames starting with
//! `data: ` carry a payload, which is either a `{"text": "..."}` JSON object
//! or the `[DONE]` terminator. Bytes are buffered raw and split on the
//! delimiter before UTF-8 decoding, so chunk boundaries may fall anywhere,
//! including inside a multi-byte character.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::error::{ChatError, REQUEST_FAILED};
use super::types::{ErrorResponse, StreamChunk};

const FRAME_DELIMITER: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";
// Cap on how much of a non-2xx body is read looking for `{error, code}`.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// Response as handed over by a transport: status plus optional body stream.
pub struct ByteSource {
    pub status: u16,
    pub body: Option<ByteStream>,
}

impl ByteSource {
    pub fn new<S>(status: u16, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ChatError>> + Send + 'static,
    {
        Self {
            status,
            body: Some(Box::pin(body)),
        }
    }

    pub fn without_body(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

enum Read {
    Bytes(Bytes),
    Failed(ChatError),
    End,
}

impl From<Option<Result<Bytes, ChatError>>> for Read {
    fn from(item: Option<Result<Bytes, ChatError>>) -> Self {
        match item {
            Some(Ok(bytes)) => Self::Bytes(bytes),
            Some(Err(err)) => Self::Failed(err),
            None => Self::End,
        }
    }
}

/// Pull-based decoder; `body` is `None` once the sequence has ended.
pub struct SseDecoder {
    body: Option<ByteStream>,
    buffer: Vec<u8>,
    cancel: Option<CancellationToken>,
}

impl SseDecoder {
    /// Validate the response and take ownership of its body.
    ///
    /// Non-2xx responses fail with `ChatError::Http`, using the body's
    /// `error` text when it can be read.
    pub async fn open(source: ByteSource) -> Result<Self, ChatError> {
        let success = source.is_success();
        let ByteSource { status, body } = source;

        if !success {
            let parsed = match body {
                Some(body) => read_error_body(body).await,
                None => None,
            };
            let (message, code) = match parsed {
                Some(ErrorResponse { error, code }) => (
                    error
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| REQUEST_FAILED.to_string()),
                    code,
                ),
                None => (REQUEST_FAILED.to_string(), None),
            };
            return Err(ChatError::http(status, message, code));
        }

        let Some(body) = body else {
            return Err(ChatError::MissingBody);
        };

        Ok(Self {
            body: Some(body),
            buffer: Vec::new(),
            cancel: None,
        })
    }

    /// A cancelled token resolves the pending read to `ChatError::Aborted`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.body.is_none()
    }

    /// Next content increment, `None` once the sequence has ended.
    pub async fn next(&mut self) -> Option<Result<StreamChunk, ChatError>> {
        loop {
            if self.body.is_none() {
                return None;
            }

            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                self.finish();
                return Some(Err(ChatError::Aborted));
            }

            while let Some(frame) = self.take_frame() {
                let Some(payload) = frame.strip_prefix(DATA_PREFIX) else {
                    continue;
                };
                if payload == DONE_MARKER {
                    self.finish();
                    return None;
                }
                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(chunk) => return Some(Ok(chunk)),
                    Err(err) => log::warn!("[SSE] Parse error: {}", err),
                }
            }

            let read = {
                let body = self.body.as_mut()?;
                match self.cancel.as_ref() {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => Read::Failed(ChatError::Aborted),
                        item = body.next() => Read::from(item),
                    },
                    None => Read::from(body.next().await),
                }
            };

            match read {
                Read::Bytes(bytes) => self.buffer.extend_from_slice(&bytes),
                Read::Failed(err) => {
                    self.finish();
                    return Some(Err(err));
                }
                Read::End => {
                    if !self.buffer.is_empty() {
                        log::debug!(
                            "[SSE] Discarding {} bytes of unterminated frame",
                            self.buffer.len()
                        );
                    }
                    self.finish();
                    return None;
                }
            }
        }
    }

    /// Adapt into a `Stream` of increments.
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamChunk, ChatError>> + Send {
        futures_util::stream::unfold(self, |mut decoder| async move {
            let item = decoder.next().await?;
            Some((item, decoder))
        })
    }

    fn take_frame(&mut self) -> Option<String> {
        let end = self
            .buffer
            .windows(FRAME_DELIMITER.len())
            .position(|w| w == FRAME_DELIMITER)?;
        let frame: Vec<u8> = self.buffer.drain(..end + FRAME_DELIMITER.len()).take(end).collect();
        Some(String::from_utf8_lossy(&frame).into_owned())
    }

    // Drops the body and any buffered bytes.
    fn finish(&mut self) {
        self.body = None;
        self.buffer.clear();
    }
}

async fn read_error_body(mut body: ByteStream) -> Option<ErrorResponse> {
    let mut raw = Vec::new();
    while let Some(item) = body.next().await {
        match item {
            Ok(bytes) => {
                raw.extend_from_slice(&bytes);
                if raw.len() > MAX_ERROR_BODY_BYTES {
                    return None;
                }
            }
            Err(err) => {
                log::debug!("[SSE] Failed to read error body: {}", err);
                return None;
            }
        }
    }
    serde_json::from_slice(&raw).ok()
}
