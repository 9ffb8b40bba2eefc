//! Core modules shared by every registry operation.
//!
//! Storage, the broker write path, configuration, and error types live here.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;
