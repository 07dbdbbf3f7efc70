//! Credential model shared by the store, the refresh coordinator, and the channel.

pub mod credential;
pub mod secret;

pub use credential::*;
pub use secret::*;
