//! Authenticated request pipeline with one-shot replay after credential refresh.
//!
//! [`ApiClient::send`] attaches the stored bearer (if any), dispatches the request,
//! and reacts to a single status: 401. A 401 asks the [`RefreshCoordinator`] for a
//! fresh credential and replays the same immutable [`ApiRequest`] once. Every other
//! status, and every transport error, reaches the caller untouched. When the
//! refresh fails the store is cleared, the [`SignInRedirect`] collaborator is invoked
//! once for the failed episode, and callers receive [`Error::SessionEnded`].

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	endpoint::ServiceEndpoints,
	http::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::{DEFAULT_REFRESH_TIMEOUT, HttpRefresher, RefreshCoordinator, TokenRefresher},
	store::CredentialStore,
};

/// Pipeline specialized for the crate's default reqwest transport.
pub type ReqwestApiClient = ApiClient<ReqwestTransport>;

const MAX_REPLAYS: u8 = 1;

/// Navigation collaborator invoked when the session can no longer be renewed.
pub trait SignInRedirect
where
	Self: Send + Sync,
{
	/// Sends the user to the sign-in surface.
	fn redirect_to_sign_in(&self);
}
impl<F> SignInRedirect for F
where
	F: Fn() + Send + Sync,
{
	fn redirect_to_sign_in(&self) {
		self()
	}
}

/// [`SignInRedirect`] that only records the event in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRedirect;
impl SignInRedirect for NoopRedirect {
	fn redirect_to_sign_in(&self) {
		tracing::info!("Session ended; no sign-in redirect is configured.");
	}
}

/// Decides which requests may be replayed after a credential refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayPolicy {
	/// Replay every request at most once, including non-idempotent ones.
	#[default]
	Always,
	/// Replay only requests flagged idempotent; others get their 401 response back.
	IdempotentOnly,
}
impl ReplayPolicy {
	/// Returns `true` when `request` may be replayed under this policy.
	pub fn permits(self, request: &ApiRequest) -> bool {
		match self {
			ReplayPolicy::Always => true,
			ReplayPolicy::IdempotentOnly => request.is_idempotent(),
		}
	}
}

/// Tunables for [`ApiClient`].
#[derive(Clone, Debug)]
pub struct ClientOptions {
	/// Which requests are replayed after a refresh.
	pub replay_policy: ReplayPolicy,
	/// Bound on the refresh call; `None` waits indefinitely.
	pub refresh_timeout: Option<StdDuration>,
}
impl Default for ClientOptions {
	fn default() -> Self {
		Self { replay_policy: ReplayPolicy::default(), refresh_timeout: Some(DEFAULT_REFRESH_TIMEOUT) }
	}
}

/// Request pipeline bound to one backend and one credential store.
pub struct ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	coordinator: Arc<RefreshCoordinator>,
	endpoints: ServiceEndpoints,
	redirect: Arc<dyn SignInRedirect>,
	replay_policy: ReplayPolicy,
	last_redirected_episode: Arc<AtomicU64>,
}
impl<T> ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a pipeline whose refreshes go through `transport` to the refresh endpoint.
	pub fn with_transport(
		endpoints: ServiceEndpoints,
		store: Arc<dyn CredentialStore>,
		transport: impl Into<Arc<T>>,
		options: ClientOptions,
	) -> Self {
		let transport = transport.into();
		let refresher: Arc<dyn TokenRefresher> =
			Arc::new(<HttpRefresher<T>>::new(transport.clone(), endpoints.refresh.clone()));
		let coordinator =
			RefreshCoordinator::new(store, refresher).with_timeout(options.refresh_timeout);

		Self::with_coordinator(endpoints, transport, Arc::new(coordinator))
			.with_replay_policy(options.replay_policy)
	}

	/// Creates a pipeline around an existing coordinator; the coordinator's store is used.
	pub fn with_coordinator(
		endpoints: ServiceEndpoints,
		transport: impl Into<Arc<T>>,
		coordinator: Arc<RefreshCoordinator>,
	) -> Self {
		Self {
			transport: transport.into(),
			coordinator,
			endpoints,
			redirect: Arc::new(NoopRedirect),
			replay_policy: ReplayPolicy::default(),
			last_redirected_episode: Default::default(),
		}
	}

	/// Sets the navigation collaborator invoked on terminal refresh failure.
	pub fn with_redirect(mut self, redirect: impl 'static + SignInRedirect) -> Self {
		self.redirect = Arc::new(redirect);

		self
	}

	/// Overrides the replay policy.
	pub fn with_replay_policy(mut self, policy: ReplayPolicy) -> Self {
		self.replay_policy = policy;

		self
	}

	/// Backend endpoints.
	pub fn endpoints(&self) -> &ServiceEndpoints {
		&self.endpoints
	}

	/// Credential store shared with the coordinator.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		self.coordinator.store()
	}

	/// Refresh coordinator used by this pipeline.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
		&self.coordinator
	}

	/// Stores a credential obtained from a sign-in flow.
	pub fn sign_in(&self, credential: Credential) -> Result<()> {
		self.store().set(credential)?;

		Ok(())
	}

	/// Forgets the access and refresh tokens together.
	pub fn sign_out(&self) -> Result<()> {
		self.store().clear()?;

		Ok(())
	}

	/// Builds a request for `path`, resolved against the API base.
	pub fn request(&self, method: Method, path: &str) -> Result<ApiRequest> {
		Ok(ApiRequest::new(method, self.endpoints.resolve(path)?))
	}

	/// Sends a `GET` for `path` and decodes a successful JSON body.
	pub async fn get_json<R>(&self, path: &str) -> Result<R>
	where
		R: DeserializeOwned,
	{
		let response = self.send(self.request(Method::GET, path)?).await?.error_for_status()?;

		Ok(response.json()?)
	}

	/// Sends `body` as JSON with `method` and decodes a successful JSON body.
	pub async fn send_json<B, R>(&self, method: Method, path: &str, body: &B) -> Result<R>
	where
		B: ?Sized + Serialize,
		R: DeserializeOwned,
	{
		let request = self.request(method, path)?.json(body)?;
		let response = self.send(request).await?.error_for_status()?;

		Ok(response.json()?)
	}

	/// Dispatches `request`, refreshing and replaying it once on a 401.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Dispatch;

		let span = FlowSpan::new(KIND, "send");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.dispatch_with_replay(&request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn dispatch_with_replay(&self, request: &ApiRequest) -> Result<ApiResponse> {
		let mut credential = self.store().get();
		let mut replays = 0_u8;

		loop {
			let bearer = credential.as_ref().map(|credential| &credential.access_token);
			let response = self.transport.execute(request, bearer).await?;

			tracing::debug!(
				method = %request.method(),
				url = %request.url(),
				status = response.status().as_u16(),
				authenticated = bearer.is_some(),
				replays,
				"Request dispatched."
			);

			if !response.is_auth_expired() {
				return Ok(response);
			}
			if replays >= MAX_REPLAYS {
				tracing::warn!(url = %request.url(), "Replayed request was rejected again.");

				return Ok(response);
			}
			if !self.replay_policy.permits(request) {
				tracing::debug!(url = %request.url(), "Replay policy declined to replay request.");

				return Ok(response);
			}

			let rejected = bearer.cloned();

			credential = Some(self.renew(rejected.as_ref()).await?);
			replays += 1;
		}
	}

	async fn renew(&self, rejected: Option<&TokenSecret>) -> Result<Credential> {
		match self.coordinator.ensure_fresh_credential_after(rejected).await {
			Ok(credential) => Ok(credential),
			Err(Error::RefreshFailed { reason, episode }) => {
				self.end_session(episode);

				Err(Error::SessionEnded { reason })
			},
			Err(e) => Err(e),
		}
	}

	fn end_session(&self, episode: u64) {
		if let Err(e) = self.store().clear() {
			tracing::error!(error = %e, "Failed to clear credential store.");
		}

		let previous = self.last_redirected_episode.fetch_max(episode, Ordering::SeqCst);

		if previous < episode {
			self.redirect.redirect_to_sign_in();
		}
	}
}
impl ApiClient<ReqwestTransport> {
	/// Creates a pipeline backed by a default reqwest client.
	pub fn new(endpoints: ServiceEndpoints, store: Arc<dyn CredentialStore>) -> Self {
		Self::with_transport(endpoints, store, ReqwestTransport::default(), ClientOptions::default())
	}
}
impl<T> Clone for ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			coordinator: self.coordinator.clone(),
			endpoints: self.endpoints.clone(),
			redirect: self.redirect.clone(),
			replay_policy: self.replay_policy,
			last_redirected_episode: self.last_redirected_episode.clone(),
		}
	}
}
impl<T> Debug for ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("endpoints", &self.endpoints)
			.field("replay_policy", &self.replay_policy)
			.field("coordinator", &self.coordinator)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn replay_policy_respects_idempotency() {
		let url = Url::parse("https://api.example.com/api/v1/users/postItems")
			.expect("Fixture URL should parse.");
		let create = ApiRequest::post(url.clone());
		let read = ApiRequest::get(url);

		assert!(ReplayPolicy::Always.permits(&create));
		assert!(!ReplayPolicy::IdempotentOnly.permits(&create));
		assert!(ReplayPolicy::IdempotentOnly.permits(&read));
	}

	#[test]
	fn closures_act_as_redirects() {
		let hits = Arc::new(AtomicU64::new(0));
		let redirect = {
			let hits = hits.clone();

			move || {
				hits.fetch_add(1, Ordering::SeqCst);
			}
		};

		redirect.redirect_to_sign_in();

		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}
}
