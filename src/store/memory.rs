//! Thread-safe in-memory [`CredentialStore`] for tests and short-lived sessions.

// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{CredentialStore, StoreError},
};

/// In-process credential holder; dropped with the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Option<Credential>>>);
impl MemoryStore {
	/// Creates a store seeded with `credential`.
	pub fn with_credential(credential: Credential) -> Self {
		Self(Arc::new(RwLock::new(Some(credential))))
	}
}
impl CredentialStore for MemoryStore {
	fn get(&self) -> Option<Credential> {
		self.0.read().clone()
	}

	fn set(&self, credential: Credential) -> Result<(), StoreError> {
		*self.0.write() = Some(credential);

		Ok(())
	}

	fn clear(&self) -> Result<(), StoreError> {
		self.0.write().take();

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn set_replaces_and_clear_removes() {
		let store = MemoryStore::default();

		assert!(store.get().is_none());

		store
			.set(Credential::new("first").with_refresh_token("refresh-1"))
			.expect("Memory store set should not fail.");
		store
			.set(Credential::new("second").with_refresh_token("refresh-2"))
			.expect("Memory store set should not fail.");

		let current = store.get().expect("Credential should be present after set.");

		assert_eq!(current.access_token.expose(), "second");
		assert_eq!(current.refresh_token.as_ref().map(|s| s.expose()), Some("refresh-2"));

		store.clear().expect("Memory store clear should not fail.");

		assert!(store.get().is_none());
	}

	#[test]
	fn clones_share_the_same_slot() {
		let store = MemoryStore::default();
		let alias = store.clone();

		alias.set(Credential::new("shared")).expect("Memory store set should not fail.");

		assert_eq!(store.get().map(|c| c.access_token.expose().to_owned()), Some("shared".into()));
	}
}
