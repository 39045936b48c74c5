use crate::services::retry::Retryable;

use super::error::ChatError;

impl Retryable for ChatError {
    fn is_abort(&self) -> bool {
        self.is_aborted()
    }

    fn status(&self) -> Option<u16> {
        ChatError::status(self)
    }

    fn exhausted() -> Self {
        ChatError::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::retry::{Retry, RetryPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn attempts_until_failure(err: ChatError) -> u32 {
        let calls = AtomicU32::new(0);
        let result: Result<(), ChatError> = Retry::new(RetryPolicy::new(3, Duration::ZERO, false))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = err.clone();
                async move { Err(err) }
            })
            .await;
        assert!(result.is_err());
        calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_chat_error_classification() {
        assert_eq!(attempts_until_failure(ChatError::Aborted).await, 1);
        assert_eq!(attempts_until_failure(ChatError::http(400, "bad", None)).await, 1);
        assert_eq!(attempts_until_failure(ChatError::http(429, "slow", None)).await, 1);
        assert_eq!(attempts_until_failure(ChatError::http(502, "gateway", None)).await, 3);
        assert_eq!(attempts_until_failure(ChatError::transport("reset")).await, 3);
        assert_eq!(attempts_until_failure(ChatError::MissingBody).await, 3);
    }
}
