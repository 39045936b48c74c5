//! Failure boundary for the front-end.
//!
//! `guard` runs a body, captures its error or panic into a [`Boundary`] and
//! hands it to a [`FallbackRenderer`], which decides whether to run the body
//! again or give up.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

#[derive(Debug)]
pub enum Failure<E> {
    Error(E),
    Panic(String),
}

impl<E: std::fmt::Display> std::fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{}", err),
            Self::Panic(message) => write!(f, "panic: {}", message),
        }
    }
}

/// Captured state of a guarded body.
#[derive(Debug)]
pub enum Boundary<E> {
    Ok,
    Failed(Failure<E>),
}

impl<E> Boundary<E> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&Failure<E>> {
        match self {
            Self::Ok => None,
            Self::Failed(failure) => Some(failure),
        }
    }

    pub fn take(&mut self) -> Option<Failure<E>> {
        match std::mem::replace(self, Self::Ok) {
            Self::Ok => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Exit,
}

pub trait FallbackRenderer<E> {
    fn render(&mut self, failure: &Failure<E>) -> RetryAction;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

/// Run `body` until it succeeds or the renderer chooses `Exit`.
pub async fn guard<T, E, R, F, Fut>(renderer: &mut R, mut body: F) -> Result<T, Failure<E>>
where
    E: std::fmt::Display,
    R: FallbackRenderer<E>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        let outcome = AssertUnwindSafe(body()).catch_unwind().await;
        let mut state = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => Boundary::Failed(Failure::Error(err)),
            Err(payload) => Boundary::Failed(Failure::Panic(panic_message(payload))),
        };

        let action = match state.failure() {
            Some(failure) => {
                log::error!("[Boundary] {}", failure);
                renderer.render(failure)
            }
            None => RetryAction::Retry,
        };

        if let (RetryAction::Exit, Some(failure)) = (action, state.take()) {
            return Err(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers from a script and records what it was shown.
    struct ScriptedRenderer {
        answers: Vec<RetryAction>,
        shown: Vec<String>,
    }

    impl FallbackRenderer<String> for ScriptedRenderer {
        fn render(&mut self, failure: &Failure<String>) -> RetryAction {
            self.shown.push(failure.to_string());
            if self.answers.is_empty() {
                return RetryAction::Exit;
            }
            self.answers.remove(0)
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let mut renderer = ScriptedRenderer {
            answers: vec![RetryAction::Retry],
            shown: Vec::new(),
        };
        let mut runs = 0;

        let result = guard(&mut renderer, || {
            runs += 1;
            let run = runs;
            async move {
                if run == 1 {
                    Err("first run broke".to_string())
                } else {
                    Ok(run)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(renderer.shown, vec!["first run broke"]);
    }

    #[tokio::test]
    async fn test_exit_returns_failure() {
        let mut renderer = ScriptedRenderer {
            answers: vec![RetryAction::Exit],
            shown: Vec::new(),
        };

        let result: Result<(), _> = guard(&mut renderer, || async { Err("fatal".to_string()) }).await;

        assert!(matches!(result, Err(Failure::Error(message)) if message == "fatal"));
    }

    async fn explode() -> Result<(), String> {
        panic!("render exploded")
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let mut renderer = ScriptedRenderer {
            answers: Vec::new(),
            shown: Vec::new(),
        };

        let result = guard(&mut renderer, explode).await;

        assert!(matches!(result, Err(Failure::Panic(message)) if message == "render exploded"));
        assert_eq!(renderer.shown, vec!["panic: render exploded"]);
    }

    #[test]
    fn test_boundary_take_resets() {
        let mut state: Boundary<String> = Boundary::Failed(Failure::Error("x".to_string()));
        assert!(state.is_failed());
        assert!(state.take().is_some());
        assert!(!state.is_failed());
        assert!(state.take().is_none());
    }
}
