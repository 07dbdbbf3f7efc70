#![cfg(feature = "test")]

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use tokio::sync::Notify;
// self
use bearer_session::{
	_preludet::*,
	auth::{Credential, TokenSecret},
	refresh::{RefreshCoordinator, RefreshError, RefreshFuture, RefreshStatus, TokenRefresher},
	store::{CredentialStore, MemoryStore},
};

/// Refresher that blocks on a gate and then answers with a fixed outcome.
struct ScriptedRefresher {
	gate: Arc<Notify>,
	calls: AtomicUsize,
	reject_with: Option<u16>,
}
impl ScriptedRefresher {
	fn succeeding(gate: Arc<Notify>) -> Arc<Self> {
		Arc::new(Self { gate, calls: AtomicUsize::new(0), reject_with: None })
	}

	fn rejecting(gate: Arc<Notify>, status: u16) -> Arc<Self> {
		Arc::new(Self { gate, calls: AtomicUsize::new(0), reject_with: Some(status) })
	}
}
impl TokenRefresher for ScriptedRefresher {
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.gate.notified().await;

			match self.reject_with {
				Some(status) => Err(RefreshError::Rejected { status }),
				None => Ok(Credential::new(format!("after-{}", refresh_token.expose()))
					.with_refresh_token("ref2")),
			}
		})
	}
}

/// Refresher that never answers.
struct HangingRefresher;
impl TokenRefresher for HangingRefresher {
	fn refresh<'a>(&'a self, _refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(futures::future::pending())
	}
}

fn seeded_store() -> Arc<MemoryStore> {
	Arc::new(MemoryStore::with_credential(Credential::new("tok1").with_refresh_token("ref1")))
}

async fn settle_scheduler() {
	for _ in 0..8 {
		tokio::task::yield_now().await;
	}
}

#[tokio::test]
async fn waiters_resume_in_arrival_order_with_one_refresh() {
	let gate = Arc::new(Notify::new());
	let refresher = ScriptedRefresher::succeeding(gate.clone());
	let store = seeded_store();
	let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), refresher.clone()));
	let order = Arc::new(Mutex::new(Vec::new()));
	let mut tasks = Vec::new();

	for name in ["leader", "A", "B", "C"] {
		let coordinator = coordinator.clone();
		let order = order.clone();

		tasks.push(tokio::spawn(async move {
			let credential = coordinator.ensure_fresh_credential().await;

			order.lock().push(name);

			credential
		}));

		settle_scheduler().await;
	}

	assert_eq!(coordinator.status(), RefreshStatus::Refreshing { episode: 1, waiters: 3 });

	gate.notify_one();

	for task in tasks {
		let credential = task
			.await
			.expect("Refresh task should not panic.")
			.expect("Every caller should receive the refreshed credential.");

		assert_eq!(credential.access_token.expose(), "after-ref1");
	}

	let order = order.lock().clone();
	let followers = order.iter().filter(|name| **name != "leader").copied().collect::<Vec<_>>();

	assert_eq!(followers, ["A", "B", "C"]);
	assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
	assert_eq!(coordinator.status(), RefreshStatus::Idle);
	assert_eq!(coordinator.metrics().coalesced(), 3);
	assert_eq!(store.get().map(|credential| credential.access_token.expose().to_owned()).as_deref(), Some("after-ref1"));
}

#[tokio::test]
async fn failed_refresh_rejects_every_waiter_and_clears_store() {
	let gate = Arc::new(Notify::new());
	let refresher = ScriptedRefresher::rejecting(gate.clone(), 401);
	let store = seeded_store();
	let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), refresher.clone()));
	let mut tasks = Vec::new();

	for _ in 0..3 {
		let coordinator = coordinator.clone();

		tasks.push(tokio::spawn(async move { coordinator.ensure_fresh_credential().await }));

		settle_scheduler().await;
	}

	gate.notify_one();

	for task in tasks {
		let err = task
			.await
			.expect("Refresh task should not panic.")
			.expect_err("A rejected refresh must fail every caller.");

		assert!(
			matches!(&err, Error::RefreshFailed { episode: 1, reason } if reason.contains("401")),
			"Unexpected error: {err:?}."
		);
	}

	assert!(store.get().is_none());
	assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
	assert_eq!(coordinator.status(), RefreshStatus::Idle);
	assert_eq!(coordinator.metrics().failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_refresh_times_out() {
	let store = seeded_store();
	let coordinator = RefreshCoordinator::new(store.clone(), Arc::new(HangingRefresher))
		.with_timeout(Some(StdDuration::from_secs(30)));
	let err = coordinator
		.ensure_fresh_credential()
		.await
		.expect_err("A refresh that never answers must time out.");

	assert!(matches!(err, Error::RefreshFailed { .. }));
	assert!(err.to_string().contains("did not complete"), "Unexpected message: {err}.");
	assert!(store.get().is_none());
	assert_eq!(coordinator.status(), RefreshStatus::Idle);
}

#[tokio::test]
async fn later_episodes_start_after_the_previous_one_settles() {
	let gate = Arc::new(Notify::new());
	let refresher = ScriptedRefresher::succeeding(gate.clone());
	let store = seeded_store();
	let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), refresher.clone()));

	gate.notify_one();

	let first = coordinator.ensure_fresh_credential().await.expect("First episode should succeed.");

	assert_eq!(first.access_token.expose(), "after-ref1");

	// A late rejection of the old token reuses the stored credential.
	let reused = coordinator
		.ensure_fresh_credential_after(Some(&TokenSecret::new("tok1")))
		.await
		.expect("The newer credential should be reused.");

	assert_eq!(reused.access_token.expose(), "after-ref1");
	assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

	gate.notify_one();

	let second = coordinator
		.ensure_fresh_credential_after(Some(&reused.access_token))
		.await
		.expect("Rejecting the current token should start a new episode.");

	assert_eq!(second.access_token.expose(), "after-ref2");
	assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
	assert_eq!(coordinator.metrics().attempts(), 2);
}
