//! Storage contract and built-in credential store implementations.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::Credential};

/// Holder of the current session credential.
///
/// Implementations replace the whole credential atomically; readers either see the
/// previous pair or the new one, never a mix. Calls are synchronous so the refresh
/// coordinator can consult the store inside its own critical section.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the current credential, if any.
	fn get(&self) -> Option<Credential>;

	/// Replaces the current credential.
	fn set(&self, credential: Credential) -> Result<(), StoreError>;

	/// Removes the access and refresh tokens together.
	fn clear(&self) -> Result<(), StoreError>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;
	use crate::error::Error;

	#[test]
	fn store_error_converts_into_session_error_with_source() {
		let store_error = StoreError::Backend { message: "disk full".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk full"));

		let source = StdError::source(&error)
			.expect("Session error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
