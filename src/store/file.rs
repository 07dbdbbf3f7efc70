//! File-backed [`CredentialStore`] that survives restarts.
//!
//! The snapshot is a single JSON object keyed by `token` (access credential) and
//! `refreshToken` (refresh credential), with an optional `expiresAt` instant. Both
//! keys are written and removed together.

// std
use std::{
	fs::{self, File},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	store::{CredentialStore, StoreError},
};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
	token: TokenSecret,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<TokenSecret>,
	#[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
	expires_at: Option<OffsetDateTime>,
}
impl From<&Credential> for Snapshot {
	fn from(credential: &Credential) -> Self {
		Self {
			token: credential.access_token.clone(),
			refresh_token: credential.refresh_token.clone(),
			expires_at: credential.expires_at,
		}
	}
}
impl From<Snapshot> for Credential {
	fn from(snapshot: Snapshot) -> Self {
		Self {
			access_token: snapshot.token,
			refresh_token: snapshot.refresh_token,
			expires_at: snapshot.expires_at,
		}
	}
}

/// Persists the session credential to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Option<Credential>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Returns the snapshot location.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Option<Credential>, StoreError> {
		let bytes = match fs::read(path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", path.display()),
				}),
		};

		if bytes.is_empty() {
			return Ok(None);
		}

		let snapshot: Snapshot =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(Some(snapshot.into()))
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist(&self, credential: &Credential) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized = serde_json::to_vec_pretty(&Snapshot::from(credential)).map_err(|e| {
			StoreError::Serialization { message: format!("Failed to serialize credential: {e}") }
		})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn remove(&self) -> Result<(), StoreError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to remove {}: {e}", self.path.display()),
			}),
		}
	}
}
impl CredentialStore for FileStore {
	fn get(&self) -> Option<Credential> {
		self.inner.read().clone()
	}

	fn set(&self, credential: Credential) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		self.persist(&credential)?;
		*guard = Some(credential);

		Ok(())
	}

	fn clear(&self) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		guard.take();

		self.remove()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	fn temp_path(tag: &str) -> PathBuf {
		let unique = format!(
			"bearer_session_file_store_{tag}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn save_and_reload_round_trip() {
		let path = temp_path("reload");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let credential = Credential::new("access-token")
			.with_refresh_token("refresh-token")
			.with_expires_at(time::macros::datetime!(2031-05-01 12:00:00 UTC));

		store.set(credential.clone()).expect("Failed to save credential to file store.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = reopened.get().expect("File store lost the credential after reopen.");

		assert_eq!(fetched, credential);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn snapshot_uses_two_named_keys() {
		let path = temp_path("layout");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");

		store
			.set(Credential::new("tok1").with_refresh_token("ref1"))
			.expect("Failed to save credential to file store.");

		let raw: serde_json::Value = serde_json::from_slice(
			&fs::read(&path).expect("Snapshot should exist after set."),
		)
		.expect("Snapshot should be valid JSON.");

		assert_eq!(raw["token"], "tok1");
		assert_eq!(raw["refreshToken"], "ref1");

		store.clear().expect("Failed to clear file store.");

		assert!(!path.exists(), "Clearing must remove both keys together.");
		assert!(store.get().is_none());
	}

	#[test]
	fn clear_without_snapshot_is_a_noop() {
		let store = FileStore::open(temp_path("empty")).expect("Failed to open file store.");

		store.clear().expect("Clearing an empty store should succeed.");

		assert!(store.get().is_none());
	}
}
