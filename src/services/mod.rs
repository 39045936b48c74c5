pub mod boundary;
pub mod chat;
pub mod config;
pub mod connectivity;
pub mod history;
pub(crate) mod ids;
pub mod retry;
