//! Adapters module - channels that feed the engine.
//!
//! Real channels (web socket, messaging platforms) live outside this crate
//! and call [`Engine::handle_inbound_message`](crate::agent::Engine::handle_inbound_message)
//! directly. The CLI channel here is the one this binary ships.
//!
//! # Adding a New Channel
//!
//! 1. Create a new file (e.g., `webhook.rs`)
//! 2. Turn each incoming payload into an [`InboundMessage`](crate::agent::InboundMessage)
//! 3. Deliver the reply, or nothing when the engine returns `None`

pub mod cli;

pub use cli::{load_image, CliChannel};
