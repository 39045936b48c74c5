//! Connectivity signal derived from TCP reachability of the chat endpoint.

use std::sync::Weak;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::services::chat::ChatOrchestrator;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl ConnectivityProbe {
    /// `None` when the endpoint has no host to probe.
    pub fn for_endpoint(endpoint: &str, interval: Duration) -> Option<Self> {
        let url = reqwest::Url::parse(endpoint).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self {
            target: format!("{host}:{port}"),
            interval,
            timeout: DEFAULT_CONNECT_TIMEOUT.min(interval.max(Duration::from_millis(100))),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        )
    }

    /// Probe every `interval` until every receiver is gone.
    ///
    /// The channel starts at `true` (assumed online) and only changes on a
    /// transition.
    pub fn spawn(self) -> (watch::Receiver<bool>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(true);

        let handle = tokio::spawn(async move {
            loop {
                let online = self.check().await;
                tx.send_if_modified(|current| {
                    if *current == online {
                        return false;
                    }
                    *current = online;
                    true
                });

                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        });

        (rx, handle)
    }
}

/// Feed connectivity transitions into the orchestrator until it is dropped.
pub fn forward_to(orchestrator: Weak<ChatOrchestrator>, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            let Some(chat) = orchestrator.upgrade() else {
                break;
            };
            if chat.is_online() == online {
                continue;
            }
            if online {
                log::info!("[Connectivity] Endpoint reachable again");
            } else {
                log::warn!("[Connectivity] Endpoint unreachable, going offline");
            }
            chat.set_online(online);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::history::SessionStore;
    use crate::services::chat::{ChatEvent, HttpTransport};
    use crate::services::history::Conversation;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[test]
    fn test_target_from_endpoint() {
        let probe =
            ConnectivityProbe::for_endpoint("http://localhost:3000/api/chat", Duration::from_secs(5))
                .unwrap();
        assert_eq!(probe.target(), "localhost:3000");

        let probe =
            ConnectivityProbe::for_endpoint("https://chat.example.com/api/chat", Duration::from_secs(5))
                .unwrap();
        assert_eq!(probe.target(), "chat.example.com:443");

        assert!(ConnectivityProbe::for_endpoint("not a url", Duration::from_secs(5)).is_none());
    }

    #[tokio::test]
    async fn test_check_reflects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
        let probe = ConnectivityProbe::for_endpoint(&endpoint, Duration::from_secs(1)).unwrap();

        assert!(probe.check().await);
        drop(listener);
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn test_spawn_reports_transition() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/api/chat", listener.local_addr().unwrap());
        drop(listener);

        let probe = ConnectivityProbe::for_endpoint(&endpoint, Duration::from_millis(50)).unwrap();
        let (mut rx, handle) = probe.spawn();

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!*rx.borrow());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_forward_to_updates_orchestrator() {
        let transport = HttpTransport::new("http://127.0.0.1:9/api/chat", Duration::from_secs(1));
        let chat = Arc::new(ChatOrchestrator::new(
            Conversation::init(SessionStore::in_memory()),
            Arc::new(transport),
        ));
        let mut events = chat.subscribe();
        let (tx, rx) = watch::channel(true);
        let handle = forward_to(Arc::downgrade(&chat), rx);

        tx.send(false).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ChatEvent::NoticeChanged(Some(_)) = events.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert!(!chat.is_online());

        drop(tx);
        handle.await.unwrap();
    }
}
