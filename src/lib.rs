pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pending;
pub mod platform;
pub mod store;
pub mod tracker;
pub mod tui;

pub use error::{Error, Result};
