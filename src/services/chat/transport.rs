use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::error::ChatError;
use super::stream::ByteSource;
use super::types::ChatRequest;

/// Opens one streaming request against the chat endpoint.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Resolves once response headers are in; the body is streamed lazily.
    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteSource, ChatError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|err| {
                log::warn!("Failed to build HTTP client, using defaults: {}", err);
                reqwest::Client::new()
            });

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ChatError {
    ChatError::Transport {
        message: err.to_string(),
        status: err.status().map(|s| s.as_u16()),
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteSource, ChatError> {
        let pending = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Aborted),
            response = pending => response.map_err(map_reqwest_error)?,
        };

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|item| item.map_err(map_reqwest_error));

        Ok(ByteSource::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat::stream::SseDecoder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP request with a canned response; returns the request bytes.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "{status_line}\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (endpoint, handle)
    }

    fn request() -> ChatRequest {
        ChatRequest {
            message: "hello".to_string(),
            history: None,
        }
    }

    #[tokio::test]
    async fn test_streams_response_body() {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 200 OK",
            "data: {\"text\":\"Hi\"}\n\ndata: {\"text\":\" there\"}\n\ndata: [DONE]\n\n",
        )
        .await;
        let transport = HttpTransport::new(endpoint, Duration::from_secs(5));

        let source = transport.open(&request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(source.status, 200);

        let mut decoder = SseDecoder::open(source).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = decoder.next().await {
            text.push_str(&chunk.unwrap().text);
        }
        assert_eq!(text, "Hi there");

        let raw_request = server.await.unwrap();
        assert!(raw_request.starts_with("POST /api/chat"));
        assert!(raw_request.contains("{\"message\":\"hello\"}"));
    }

    #[tokio::test]
    async fn test_error_status_passed_through() {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 400 Bad Request",
            "{\"error\":\"Message is too long\",\"code\":\"MESSAGE_TOO_LONG\"}",
        )
        .await;
        let transport = HttpTransport::new(endpoint, Duration::from_secs(5));

        let source = transport.open(&request(), &CancellationToken::new()).await.unwrap();
        let err = SseDecoder::open(source).await.err().unwrap();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.user_message(), Some("Message is too long"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpTransport::new(endpoint, Duration::from_secs(5));
        let err = transport
            .open(&request(), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let transport = HttpTransport::new("http://127.0.0.1:9/api/chat", Duration::from_secs(5));
        let token = CancellationToken::new();
        token.cancel();

        let err = transport.open(&request(), &token).await.err().unwrap();
        assert_eq!(err, ChatError::Aborted);
    }
}
