//! Chatrelay - streaming relay between chat clients and an LLM service
//!
//! This crate provides a daemon that forwards a single chat prompt to an
//! OpenAI-compatible upstream and re-emits the streamed completion to the
//! client as server-sent events, alongside a small certificate facade.

pub mod config;
pub mod error;
pub mod ledger;
pub mod relay;
pub mod server;
pub mod testing;

pub use error::RelayError;
