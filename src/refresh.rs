//! Single-flight credential refresh with FIFO fan-out.
//!
//! [`RefreshCoordinator::ensure_fresh_credential`] guarantees at most one refresh call
//! per failure episode. The first caller to find the coordinator idle becomes the
//! episode leader and performs the network call; callers arriving while the episode
//! is in flight are queued and settled, in arrival order, with the leader's outcome.
//! A successful episode stores the new credential before the coordinator returns to
//! idle; a failed one clears the store and rejects every waiter with the same
//! failure. If the leader is dropped mid-call the waiters are released and race for
//! a new episode instead of hanging.

mod metrics;
mod refresher;

pub use self::metrics::RefreshMetrics;
pub use refresher::*;

// std
use std::{
	collections::VecDeque,
	mem,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CredentialStore,
};

/// Refresh-call bound applied when none is configured explicitly.
pub const DEFAULT_REFRESH_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Reasons a single refresh call fails.
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// No refresh token is stored.
	#[error("No refresh token is available")]
	MissingRefreshToken,
	/// Refresh endpoint answered with a non-success status.
	#[error("Refresh endpoint responded with status {status}")]
	Rejected {
		/// HTTP status code.
		status: u16,
	},
	/// Refresh endpoint answered without an access token.
	#[error("Refresh response did not include an access token")]
	MissingAccessToken,
	/// Refresh endpoint reported a lifetime of zero or less.
	#[error("Refresh response carried a non-positive expiresIn ({seconds})")]
	NonPositiveExpiresIn {
		/// Reported lifetime in seconds.
		seconds: i64,
	},
	/// Refresh endpoint reported a lifetime past the representable instant range.
	#[error("Refresh response carried an out-of-range expiresIn ({seconds})")]
	ExpiresInOutOfRange {
		/// Reported lifetime in seconds.
		seconds: i64,
	},
	/// Stored credential was cleared by an earlier episode or a sign-out.
	#[error("Session already ended")]
	SessionCleared,
	/// Refresh call exceeded the configured bound.
	#[error("Refresh did not complete within {0:?}")]
	TimedOut(StdDuration),
	/// Transport, decode, or storage failure while refreshing.
	#[error(transparent)]
	Request(#[from] Error),
}

/// Snapshot of the coordinator's state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshStatus {
	/// No refresh is in flight.
	Idle,
	/// One refresh call is in flight.
	Refreshing {
		/// Episode sequence number.
		episode: u64,
		/// Callers queued behind the leader.
		waiters: usize,
	},
}

#[derive(Clone, Debug)]
struct RefreshFailure {
	reason: String,
	episode: u64,
}
impl RefreshFailure {
	fn into_error(self) -> Error {
		Error::RefreshFailed { reason: self.reason, episode: self.episode }
	}
}

#[derive(Clone, Debug)]
enum Settlement {
	Refreshed(Credential),
	Failed(RefreshFailure),
	Abandoned,
}

type Waiter = oneshot::Sender<Settlement>;

enum RefreshState {
	Idle,
	Refreshing { episode: u64, queue: VecDeque<Waiter> },
}

#[derive(Clone, Copy)]
enum Trigger<'a> {
	Explicit,
	Rejected(Option<&'a str>),
}

enum Role {
	Current(Credential),
	Leader { episode: u64, refresh_token: TokenSecret },
	Follower { episode: u64, settled: oneshot::Receiver<Settlement> },
	Unavailable { episode: u64 },
	Ended { episode: u64 },
}

/// Owns the refresh state machine for one credential store.
pub struct RefreshCoordinator {
	store: Arc<dyn CredentialStore>,
	refresher: Arc<dyn TokenRefresher>,
	state: Mutex<RefreshState>,
	episodes: AtomicU64,
	timeout: Option<StdDuration>,
	metrics: Arc<RefreshMetrics>,
}
impl RefreshCoordinator {
	/// Creates an idle coordinator bounded by [`DEFAULT_REFRESH_TIMEOUT`].
	pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
		Self {
			store,
			refresher,
			state: Mutex::new(RefreshState::Idle),
			episodes: AtomicU64::new(0),
			timeout: Some(DEFAULT_REFRESH_TIMEOUT),
			metrics: Default::default(),
		}
	}

	/// Overrides the refresh-call bound; `None` waits indefinitely.
	pub fn with_timeout(mut self, timeout: Option<StdDuration>) -> Self {
		self.timeout = timeout;

		self
	}

	/// Shares an existing metrics recorder.
	pub fn with_metrics(mut self, metrics: Arc<RefreshMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Counters for refresh episodes.
	pub fn metrics(&self) -> &Arc<RefreshMetrics> {
		&self.metrics
	}

	/// Store the coordinator reads and rotates.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.store
	}

	/// Returns the current state of the refresh state machine.
	pub fn status(&self) -> RefreshStatus {
		match &*self.state.lock() {
			RefreshState::Idle => RefreshStatus::Idle,
			RefreshState::Refreshing { episode, queue } =>
				RefreshStatus::Refreshing { episode: *episode, waiters: queue.len() },
		}
	}

	/// Returns a freshly refreshed credential, joining an in-flight refresh if one exists.
	///
	/// Fails with [`Error::RefreshFailed`] when no refresh token is stored (without
	/// any network call) or when the refresh endpoint rejects it; either way the store
	/// is cleared.
	pub async fn ensure_fresh_credential(&self) -> Result<Credential> {
		self.acquire(Trigger::Explicit).await
	}

	/// Like [`ensure_fresh_credential`](Self::ensure_fresh_credential), but skips the
	/// refresh when the store already holds a credential other than `rejected`.
	///
	/// `rejected` is the access token the server just refused, or `None` when the
	/// refused request went out anonymously. Requests dispatched before an episode
	/// finished can observe their 401 after it completed; this keeps such stragglers
	/// from starting a second episode.
	pub async fn ensure_fresh_credential_after(
		&self,
		rejected: Option<&TokenSecret>,
	) -> Result<Credential> {
		self.acquire(Trigger::Rejected(rejected.map(TokenSecret::expose))).await
	}

	async fn acquire(&self, trigger: Trigger<'_>) -> Result<Credential> {
		loop {
			match self.claim(trigger) {
				Role::Current(credential) => return Ok(credential),
				Role::Leader { episode, refresh_token } =>
					return self.lead(episode, refresh_token).await,
				Role::Unavailable { episode } => return Err(self.short_circuit(episode).into_error()),
				Role::Ended { episode } => {
					tracing::debug!(episode, "Late rejection after the session ended.");

					return Err(RefreshFailure {
						reason: RefreshError::SessionCleared.to_string(),
						episode,
					}
					.into_error());
				},
				Role::Follower { episode, settled } => match settled.await {
					Ok(Settlement::Refreshed(credential)) => return Ok(credential),
					Ok(Settlement::Failed(failure)) => return Err(failure.into_error()),
					Ok(Settlement::Abandoned) | Err(_) => {
						tracing::debug!(episode, "Refresh leader went away, retrying.");
					},
				},
			}
		}
	}

	fn claim(&self, trigger: Trigger<'_>) -> Role {
		let mut state = self.state.lock();

		if let RefreshState::Refreshing { episode, queue } = &mut *state {
			let (tx, rx) = oneshot::channel();

			queue.push_back(tx);
			self.metrics.record_coalesced();
			obs::record_refresh_coalesced();
			tracing::debug!(
				episode = *episode,
				waiters = queue.len(),
				"Queued behind in-flight refresh."
			);

			return Role::Follower { episode: *episode, settled: rx };
		}

		let current = self.store.get();

		match (trigger, current.as_ref()) {
			(Trigger::Rejected(rejected), Some(current)) => {
				let superseded = match rejected {
					Some(rejected) => !current.same_access(rejected),
					None => true,
				};

				if superseded {
					return Role::Current(current.clone());
				}
			},
			// A token was attached, so the store emptied after dispatch; the episode that
			// emptied it already reported the session end.
			(Trigger::Rejected(Some(_)), None) =>
				return Role::Ended { episode: self.episodes.load(Ordering::Relaxed) },
			_ => (),
		}

		let episode = self.episodes.fetch_add(1, Ordering::Relaxed) + 1;

		match current.and_then(|credential| credential.refresh_token) {
			Some(refresh_token) => {
				*state = RefreshState::Refreshing { episode, queue: VecDeque::new() };

				Role::Leader { episode, refresh_token }
			},
			None => Role::Unavailable { episode },
		}
	}

	async fn lead(&self, episode: u64, refresh_token: TokenSecret) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "ensure_fresh_credential");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.metrics.record_attempt();

		let mut episode_guard = EpisodeGuard { coordinator: self, episode, armed: true };
		let result = span.instrument(self.call_refresher(&refresh_token)).await;

		episode_guard.armed = false;

		self.settle(episode, result).map_err(RefreshFailure::into_error)
	}

	async fn call_refresher(&self, refresh_token: &TokenSecret) -> Result<Credential, RefreshError> {
		let call = self.refresher.refresh(refresh_token);

		match self.timeout {
			Some(limit) =>
				tokio::time::timeout(limit, call).await.map_err(|_| RefreshError::TimedOut(limit))?,
			None => call.await,
		}
	}

	fn short_circuit(&self, episode: u64) -> RefreshFailure {
		self.metrics.record_attempt();
		self.metrics.record_failure();
		obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);
		self.clear_store(episode);
		tracing::info!(episode, "No refresh token stored, session cannot be renewed.");

		RefreshFailure { reason: RefreshError::MissingRefreshToken.to_string(), episode }
	}

	fn settle(
		&self,
		episode: u64,
		result: Result<Credential, RefreshError>,
	) -> Result<Credential, RefreshFailure> {
		let result = result.and_then(|credential| {
			self.store.set(credential.clone()).map_err(|e| RefreshError::Request(e.into()))?;

			Ok(credential)
		});
		let outcome = match result {
			Ok(credential) => {
				self.metrics.record_success();
				obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Success);
				tracing::info!(episode, "Credential refreshed.");

				Ok(credential)
			},
			Err(e) => {
				self.metrics.record_failure();
				obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);
				self.clear_store(episode);
				tracing::warn!(episode, error = %e, "Credential refresh failed, session cleared.");

				Err(RefreshFailure { reason: e.to_string(), episode })
			},
		};

		self.release(match &outcome {
			Ok(credential) => Settlement::Refreshed(credential.clone()),
			Err(failure) => Settlement::Failed(failure.clone()),
		});

		outcome
	}

	fn release(&self, settlement: Settlement) {
		let waiters = match mem::replace(&mut *self.state.lock(), RefreshState::Idle) {
			RefreshState::Refreshing { queue, .. } => queue,
			RefreshState::Idle => VecDeque::new(),
		};

		for waiter in waiters {
			// Receiver is gone when the waiting caller was dropped.
			let _ = waiter.send(settlement.clone());
		}
	}

	fn clear_store(&self, episode: u64) {
		if let Err(e) = self.store.clear() {
			tracing::error!(episode, error = %e, "Failed to clear credential store.");
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("status", &self.status())
			.field("timeout", &self.timeout)
			.finish()
	}
}

struct EpisodeGuard<'a> {
	coordinator: &'a RefreshCoordinator,
	episode: u64,
	armed: bool,
}
impl Drop for EpisodeGuard<'_> {
	fn drop(&mut self) {
		if self.armed {
			tracing::warn!(episode = self.episode, "Refresh leader dropped before completion.");
			self.coordinator.release(Settlement::Abandoned);
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::sync::Notify;
	// self
	use super::*;
	use crate::store::MemoryStore;

	struct GatedRefresher {
		gate: Arc<Notify>,
		calls: AtomicU64,
	}
	impl TokenRefresher for GatedRefresher {
		fn refresh<'a>(&'a self, _refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);
				self.gate.notified().await;

				Ok(Credential::new("fresh").with_refresh_token("ref2"))
			})
		}
	}

	fn coordinator(seed: Option<Credential>, gate: Arc<Notify>) -> (RefreshCoordinator, Arc<GatedRefresher>) {
		let store = match seed {
			Some(credential) => MemoryStore::with_credential(credential),
			None => MemoryStore::default(),
		};
		let refresher = Arc::new(GatedRefresher { gate, calls: AtomicU64::new(0) });
		let coordinator = RefreshCoordinator::new(Arc::new(store), refresher.clone());

		(coordinator, refresher)
	}

	#[tokio::test]
	async fn missing_refresh_token_short_circuits() {
		let (coordinator, refresher) = coordinator(None, Arc::new(Notify::new()));
		let err = coordinator
			.ensure_fresh_credential()
			.await
			.expect_err("Refresh without a refresh token must fail.");

		assert!(matches!(err, Error::RefreshFailed { episode: 1, .. }));
		assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
		assert_eq!(coordinator.status(), RefreshStatus::Idle);
	}

	#[tokio::test]
	async fn stale_rejection_reuses_newer_credential() {
		let (coordinator, refresher) = coordinator(
			Some(Credential::new("tok2").with_refresh_token("ref")),
			Arc::new(Notify::new()),
		);
		let credential = coordinator
			.ensure_fresh_credential_after(Some(&TokenSecret::new("tok1")))
			.await
			.expect("A newer credential should be returned without refreshing.");

		assert_eq!(credential.access_token.expose(), "tok2");
		assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn late_rejection_after_session_end_reuses_last_episode() {
		let (coordinator, refresher) = coordinator(
			Some(Credential::new("tok1").with_refresh_token("ref1")),
			Arc::new(Notify::new()),
		);

		coordinator.store().clear().expect("Memory store clear should not fail.");

		let err = coordinator
			.ensure_fresh_credential_after(Some(&TokenSecret::new("tok1")))
			.await
			.expect_err("An emptied store cannot be renewed.");

		assert!(matches!(err, Error::RefreshFailed { episode: 0, .. }), "Unexpected error: {err:?}.");
		assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
		assert_eq!(coordinator.metrics().attempts(), 0);

		// Anonymous rejections still open an episode of their own.
		let err = coordinator
			.ensure_fresh_credential_after(None)
			.await
			.expect_err("An emptied store cannot be renewed.");

		assert!(matches!(err, Error::RefreshFailed { episode: 1, .. }), "Unexpected error: {err:?}.");
	}

	#[tokio::test]
	async fn dropped_leader_hands_over_to_waiter() {
		let gate = Arc::new(Notify::new());
		let (coordinator, refresher) =
			coordinator(Some(Credential::new("tok1").with_refresh_token("ref1")), gate.clone());
		let coordinator = Arc::new(coordinator);
		let leader = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.ensure_fresh_credential().await })
		};

		tokio::task::yield_now().await;

		let follower = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.ensure_fresh_credential().await })
		};

		tokio::task::yield_now().await;

		assert_eq!(coordinator.status(), RefreshStatus::Refreshing { episode: 1, waiters: 1 });

		leader.abort();

		let _ = leader.await;

		// The follower is now leading episode 2.
		while refresher.calls.load(Ordering::SeqCst) < 2 {
			tokio::task::yield_now().await;
		}

		gate.notify_one();

		let credential = follower
			.await
			.expect("Follower task should not panic.")
			.expect("Follower should complete the refresh itself.");

		assert_eq!(credential.access_token.expose(), "fresh");
		assert_eq!(coordinator.status(), RefreshStatus::Idle);
	}
}
