//! Line-oriented terminal front-end.
//!
//! Plain lines are sent as chat messages; lines starting with `/` are
//! commands. Replies are printed as they stream in.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::plugins::history::{ChatSession, Role};
use crate::services::boundary::{FallbackRenderer, Failure, RetryAction};
use crate::services::chat::{ChatEvent, ChatOrchestrator, Locale, NoticeKind, NoticeText};
use crate::services::history::Conversation;

const HELP: &str = "\
Commands:
  /new              start a new session
  /sessions         list sessions
  /switch <n|id>    switch to a session
  /delete <n|id>    delete a session
  /history          print the current session
  /abort            cancel the reply in progress
  /dismiss          dismiss the current notice
  /help             show this help
  /quit             exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Send(String),
    New,
    Sessions,
    Switch(String),
    Delete(String),
    History,
    Abort,
    Dismiss,
    Help,
    Quit,
    Unknown(String),
}

pub(crate) fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match (name, arg.is_empty()) {
        ("new", _) => Command::New,
        ("sessions" | "ls", _) => Command::Sessions,
        ("switch", false) => Command::Switch(arg.to_string()),
        ("delete" | "rm", false) => Command::Delete(arg.to_string()),
        ("history", _) => Command::History,
        ("abort" | "stop", _) => Command::Abort,
        ("dismiss", _) => Command::Dismiss,
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit" | "q", _) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

/// Resolve a 1-based list position or an ID prefix to a session ID.
pub(crate) fn resolve_session(sessions: &[ChatSession], reference: &str) -> Option<String> {
    if let Ok(position) = reference.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|index| sessions.get(index))
            .map(|s| s.id.clone());
    }

    let mut matches = sessions.iter().filter(|s| s.id.starts_with(reference));
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first.id.clone())
}

fn format_sessions(conversation: &Conversation) -> String {
    let current = conversation.current().id.as_str();
    let mut out = String::new();
    for (index, session) in conversation.sessions().iter().enumerate() {
        let marker = if session.id == current { '*' } else { ' ' };
        let short_id: String = session.id.chars().take(8).collect();
        out.push_str(&format!(
            "{marker} {:>2}. {}  [{}] ({} messages)\n",
            index + 1,
            session.title,
            short_id,
            session.messages.len()
        ));
    }
    out
}

fn format_history(conversation: &Conversation) -> String {
    let mut out = format!("# {}\n", conversation.current().title);
    for message in conversation.messages() {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "bot",
        };
        out.push_str(&format!("{who}> {}\n", message.content));
    }
    out
}

async fn print(text: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await
}

/// Prints streamed replies and notices until the channel closes.
async fn render_events(mut rx: broadcast::Receiver<ChatEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("[Console] Dropped {} chat events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let text = match event {
            ChatEvent::Started { .. } => "bot> ".to_string(),
            ChatEvent::Attempt { attempt, .. } if attempt > 1 => format!("\n(retry {attempt})\nbot> "),
            ChatEvent::Attempt { .. } => continue,
            ChatEvent::Delta { delta, .. } => delta,
            ChatEvent::Finished { .. } => "\n".to_string(),
            ChatEvent::Failed { .. } => "\n".to_string(),
            ChatEvent::NoticeChanged(Some(notice)) => match notice.kind {
                NoticeKind::Offline => format!("[offline] {}\n", notice.text),
                NoticeKind::Error => format!("[!] {}\n", notice.text),
            },
            ChatEvent::NoticeChanged(None) => continue,
        };

        if let Err(err) = print(&text).await {
            log::warn!("[Console] Failed to write to stdout: {}", err);
            break;
        }
    }
}

/// Start a send and stream its reply in the background.
///
/// The slot is claimed before spawning, so the next buffered line already
/// sees the console busy. Failures are reported through notices.
fn submit(chat: &Arc<ChatOrchestrator>, content: &str) -> Option<JoinHandle<()>> {
    let pending = match chat.begin_send(content) {
        Ok(pending) => pending,
        Err(err) => {
            log::debug!("[Console] Send rejected: {}", err);
            return None;
        }
    };

    let chat = chat.clone();
    Some(tokio::spawn(async move {
        if let Err(err) = chat.drive(pending).await {
            log::debug!("[Console] Send ended with {}", err);
        }
    }))
}

/// One console session. Returns when stdin closes or `/quit` is entered.
pub(crate) async fn run(chat: Arc<ChatOrchestrator>) -> std::io::Result<()> {
    let printer = tokio::spawn(render_events(chat.subscribe()));

    let title = chat.with_conversation(|c| c.current().title.clone());
    print(&format!("Session: {title}  (/help for commands)\n")).await?;
    if !chat.is_online() {
        print(&format!("[offline] {}\n", chat.locale().text(NoticeText::OfflineBanner))).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };

        // Session changes would strand the streaming placeholder.
        let needs_idle = matches!(
            command,
            Command::Send(_) | Command::New | Command::Switch(_) | Command::Delete(_)
        );
        if needs_idle && chat.is_busy() {
            print("(still replying; /abort to cancel)\n").await?;
            continue;
        }

        match command {
            Command::Send(content) => {
                // Detached; the printer task shows the reply.
                let _reply = submit(&chat, &content);
            }
            Command::New => {
                let title = chat.with_conversation(|c| c.create_new_session().title.clone());
                print(&format!("Session: {title}\n")).await?;
            }
            Command::Sessions => {
                let listing = chat.with_conversation(|c| format_sessions(c));
                print(&listing).await?;
            }
            Command::Switch(reference) => {
                let switched = chat.with_conversation(|c| {
                    let id = resolve_session(c.sessions(), &reference)?;
                    c.switch_session(&id).then(|| format_history(c))
                });
                match switched {
                    Some(history) => print(&history).await?,
                    None => print(&format!("No session matches `{reference}`\n")).await?,
                }
            }
            Command::Delete(reference) => {
                let deleted = chat.with_conversation(|c| {
                    let id = resolve_session(c.sessions(), &reference)?;
                    c.delete_session(&id);
                    Some(c.current().title.clone())
                });
                match deleted {
                    Some(title) => print(&format!("Deleted. Session: {title}\n")).await?,
                    None => print(&format!("No session matches `{reference}`\n")).await?,
                }
            }
            Command::History => {
                let history = chat.with_conversation(|c| format_history(c));
                print(&history).await?;
            }
            Command::Abort => {
                if !chat.abort() {
                    print("(nothing to cancel)\n").await?;
                }
            }
            Command::Dismiss => chat.dismiss_notice(),
            Command::Help => print(&format!("{HELP}\n")).await?,
            Command::Quit => break Ok(()),
            Command::Unknown(line) => print(&format!("Unknown command `{line}`, try /help\n")).await?,
        }
    };

    chat.abort();
    printer.abort();
    result
}

/// Prints the crash notice and asks whether to start the console again.
pub(crate) struct TerminalFallback {
    locale: Locale,
}

impl TerminalFallback {
    pub(crate) fn new(locale: Locale) -> Self {
        Self { locale }
    }
}

impl FallbackRenderer<std::io::Error> for TerminalFallback {
    fn render(&mut self, failure: &Failure<std::io::Error>) -> RetryAction {
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "\n{}", self.locale.text(NoticeText::Crashed));
        let _ = writeln!(stderr, "  ({failure})");
        let _ = write!(stderr, "Retry? [y/N] ");
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return RetryAction::Exit;
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => RetryAction::Retry,
            _ => RetryAction::Exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::history::SessionStore;
    use crate::services::chat::{
        ByteSource, ChatError, ChatRequest, ChatTransport, SendPhase,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    fn session(id: &str) -> ChatSession {
        ChatSession::new(id, 1)
    }

    /// Accepts the request and never sends a byte.
    struct SilentTransport;

    #[async_trait]
    impl ChatTransport for SilentTransport {
        async fn open(
            &self,
            _request: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<ByteSource, ChatError> {
            Ok(ByteSource::new(
                200,
                futures_util::stream::pending::<Result<Bytes, ChatError>>(),
            ))
        }
    }

    fn chat() -> Arc<ChatOrchestrator> {
        let conversation = Conversation::init(SessionStore::in_memory());
        Arc::new(ChatOrchestrator::new(conversation, Arc::new(SilentTransport)))
    }

    #[tokio::test]
    async fn test_submit_is_busy_before_task_runs() {
        let chat = chat();

        let handle = submit(&chat, "first").unwrap();
        assert!(chat.is_busy());
        assert_eq!(chat.phase(), SendPhase::Sending);
        assert!(chat.notice().is_none());

        chat.abort();
        handle.await.unwrap();
        assert!(!chat.is_busy());
        assert_eq!(chat.phase(), SendPhase::Aborted);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_input() {
        let chat = chat();

        assert!(submit(&chat, "   ").is_none());
        assert!(!chat.is_busy());
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command(" hello "), Some(Command::Send("hello".to_string())));
        assert_eq!(parse_command("/new"), Some(Command::New));
        assert_eq!(parse_command("/switch 2"), Some(Command::Switch("2".to_string())));
        assert_eq!(parse_command("/delete   abc"), Some(Command::Delete("abc".to_string())));
        assert_eq!(parse_command("/switch"), Some(Command::Unknown("/switch".to_string())));
        assert_eq!(parse_command("/q"), Some(Command::Quit));
        assert_eq!(parse_command("/bogus"), Some(Command::Unknown("/bogus".to_string())));
    }

    #[test]
    fn test_resolve_session() {
        let sessions = vec![session("abc-1"), session("abd-2"), session("xyz-3")];

        assert_eq!(resolve_session(&sessions, "1").as_deref(), Some("abc-1"));
        assert_eq!(resolve_session(&sessions, "3").as_deref(), Some("xyz-3"));
        assert_eq!(resolve_session(&sessions, "0"), None);
        assert_eq!(resolve_session(&sessions, "4"), None);
        assert_eq!(resolve_session(&sessions, "xy").as_deref(), Some("xyz-3"));
        // Ambiguous prefix.
        assert_eq!(resolve_session(&sessions, "ab"), None);
        assert_eq!(resolve_session(&sessions, "nope"), None);
    }
}
