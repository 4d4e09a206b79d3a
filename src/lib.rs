//! Syndicate Host Library
//!
//! This module exports the core components for testing and integration.

pub mod cli;
pub mod config;
pub mod coprocessor;
pub mod discovery;
pub mod error;
pub mod host;
pub mod merge;
pub mod protocol;
pub mod server;
pub mod store;
pub mod sweep;
pub mod types;
