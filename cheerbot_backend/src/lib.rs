pub mod agent_client;
pub mod avatar;
pub mod classifier;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod idempotency;
pub mod platform;
pub mod progression;
pub mod runtime;
pub mod sanitizer;
pub mod schedule;
pub mod server;
pub mod state;
pub mod templates;

#[cfg(test)]
mod testing;
