//! toolrelay - tool dispatch and multi-turn agent orchestration
//!
//! This library lets a conversational model call stored HTTP functions on
//! its own behalf, with per-function credentials, concurrent tool execution
//! and hand-off to a human.

pub mod adapters;
pub mod agent;
pub mod auth;
pub mod collab;
pub mod config;
pub mod error;
pub mod invoker;
pub mod registry;
pub mod store;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
