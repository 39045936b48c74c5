use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::plugins::history::{FileStorage, SessionStore};
use crate::services::boundary;
use crate::services::chat::{ChatOrchestrator, HttpTransport};
use crate::services::config::{ChatConfig, load_chat_config};
use crate::services::connectivity::{self, ConnectivityProbe};
use crate::services::history::Conversation;

mod console;
pub mod plugins;
pub mod services;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout belongs to the console; logs go to stderr.
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to initialise logging: {err}");
    }
}

/// Session storage under the configured data dir, or a detached store when
/// the directory cannot be opened.
fn open_store(config: &ChatConfig) -> SessionStore {
    let storage = config.resolve_data_dir().and_then(|dir| {
        FileStorage::open(dir, Some(config.storage_quota_bytes)).map_err(|e| e.message().to_string())
    });

    match storage {
        Ok(storage) => {
            log::info!("[Startup] Session storage at {}", storage.dir().display());
            SessionStore::new(Arc::new(storage))
        }
        Err(err) => {
            log::warn!("[Startup] Session storage unavailable, history will not be kept: {}", err);
            SessionStore::detached()
        }
    }
}

async fn start(config: ChatConfig) -> Result<(), String> {
    let conversation = Conversation::init(open_store(&config));
    let transport = HttpTransport::new(config.endpoint.clone(), config.connect_timeout);
    log::info!("[Startup] Chat endpoint {}", transport.endpoint());
    let chat = Arc::new(
        ChatOrchestrator::new(conversation, Arc::new(transport))
            .with_retry(config.retry)
            .with_locale(config.locale)
            .with_notice_timeout(config.notice_timeout),
    );

    match ConnectivityProbe::for_endpoint(&config.endpoint, config.probe_interval) {
        Some(probe) => {
            log::debug!("[Startup] Probing {} every {:?}", probe.target(), config.probe_interval);
            let (rx, _probe) = probe.spawn();
            connectivity::forward_to(Arc::downgrade(&chat), rx);
        }
        None => log::warn!("[Startup] Endpoint has no host to probe, assuming online"),
    }

    let mut fallback = console::TerminalFallback::new(config.locale);
    let result = boundary::guard(&mut fallback, || console::run(chat.clone())).await;

    chat.shutdown();
    result.map_err(|failure| failure.to_string())
}

pub fn run() {
    init_logging();
    let config = load_chat_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("[Startup] Failed to build async runtime: {}", err);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(start(config));
    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Err(err) = result {
        log::error!("[Shutdown] Console exited with failure: {}", err);
        std::process::exit(1);
    }
}
