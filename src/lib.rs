pub mod assist;
pub mod chat;
pub mod commands;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
#[cfg(test)]
mod http_stub;
pub mod llm;
pub mod logging;
pub mod persistence;
pub mod prompts;
pub mod session;
pub mod streaming;
