#![cfg(feature = "test")]

// std
use std::{env, fs, process};
// crates.io
use time::macros;
// self
use bearer_session::{
	_preludet::*,
	auth::Credential,
	store::{CredentialStore, FileStore, MemoryStore},
};

fn snapshot_path(tag: &str) -> std::path::PathBuf {
	env::temp_dir().join(format!(
		"bearer_session_store_it_{tag}_{}_{}.json",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos()
	))
}

#[test]
fn memory_store_clones_share_one_slot() {
	let store = MemoryStore::default();
	let view = store.clone();

	store
		.set(Credential::new("tok1").with_refresh_token("ref1"))
		.expect("Memory store set should not fail.");

	assert_eq!(view.get().map(|credential| credential.access_token.expose().to_owned()).as_deref(), Some("tok1"));

	view.clear().expect("Memory store clear should not fail.");

	assert!(store.get().is_none());
}

#[test]
fn file_store_survives_reopen_and_rotation() {
	let path = snapshot_path("rotation");
	let expires_at = macros::datetime!(2031-01-01 00:00 UTC);
	let store = FileStore::open(&path).expect("Failed to open file store.");

	store
		.set(Credential::new("tok1").with_refresh_token("ref1").with_expires_at(expires_at))
		.expect("Failed to save initial credential.");
	store
		.set(Credential::new("tok2").with_refresh_token("ref2"))
		.expect("Failed to rotate credential.");

	let reopened = FileStore::open(&path).expect("Failed to reopen file store.");
	let credential = reopened.get().expect("Rotated credential should persist.");

	assert_eq!(credential.access_token.expose(), "tok2");
	assert_eq!(credential.refresh_token.as_ref().map(|secret| secret.expose()), Some("ref2"));
	assert!(credential.expires_at.is_none(), "Rotation replaces the whole credential.");

	reopened.clear().expect("Failed to clear file store.");

	assert!(!path.exists());
	assert!(FileStore::open(&path).expect("Reopening an empty store should work.").get().is_none());
}

#[test]
fn corrupt_snapshot_is_reported() {
	let path = snapshot_path("corrupt");

	fs::write(&path, b"{\"token\":").expect("Failed to write corrupt snapshot.");

	let err = FileStore::open(&path).expect_err("Corrupt snapshots must not load silently.");

	assert!(err.to_string().starts_with("Serialization error"), "Unexpected error: {err}.");

	fs::remove_file(&path).expect("Failed to remove corrupt snapshot.");
}
