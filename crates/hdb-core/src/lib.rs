//! Core domain + application logic for the helpdesk bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the Redis
//! coordination store live behind ports (traits) implemented in adapter crates.

pub mod claims;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;

pub use errors::{Error, Result};
