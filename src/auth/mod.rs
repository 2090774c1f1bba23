//! Authentication for outbound function calls
//!
//! This module provides:
//! - Authenticator records (static key or endpoint bearer exchange)
//! - Token caching with per-authenticator life time
//! - AuthenticatorManager for resolving credentials before a call

mod authenticator;
mod credentials;
mod manager;

pub use authenticator::{Authenticator, AuthenticatorKind, ExchangeConfig, InjectionPlace};
pub use credentials::{CachedToken, Clock, Credential, SystemClock};
pub use manager::{lookup_path, AuthenticatorManager};
pub(crate) use manager::scalar_to_string;

#[cfg(test)]
pub use credentials::ManualClock;
