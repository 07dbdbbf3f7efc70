//! Refresh endpoint client used by the coordinator.

// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	http::{ApiRequest, HttpTransport},
	refresh::RefreshError,
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential, RefreshError>> + 'a + Send>>;

/// Performs the network call that trades a refresh token for a new credential.
///
/// Implementations talk to the backend directly; they must never route through the
/// request pipeline, otherwise a rejected refresh would recursively trigger another.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Exchanges `refresh_token` for a new credential.
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a>;
}

/// [`TokenRefresher`] that POSTs the refresh token to a JSON endpoint.
///
/// The request body is `{"refreshToken": "<secret>"}`. The response may carry the
/// new token either at the top level or inside a `data` envelope:
/// `{"accessToken": "…"}` or `{"data": {"accessToken": "…"}}`. An optional rotated
/// `refreshToken` and an `expiresIn` (seconds) are honored; when no refresh token
/// comes back the previous one stays in use.
pub struct HttpRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	endpoint: Url,
}
impl<T> HttpRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a refresher calling `endpoint` through `transport`.
	pub fn new(transport: impl Into<Arc<T>>, endpoint: Url) -> Self {
		Self { transport: transport.into(), endpoint }
	}

	/// Refresh endpoint URL.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}
}
impl<T> TokenRefresher for HttpRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(async move {
			let request = ApiRequest::post(self.endpoint.clone())
				.json(&RefreshRequest { refresh_token: refresh_token.expose() })
				.map_err(Error::from)?;
			let response = self.transport.execute(&request, None).await?;

			if !response.is_success() {
				return Err(RefreshError::Rejected { status: response.status().as_u16() });
			}

			let envelope = response.json::<RefreshEnvelope>().map_err(Error::from)?;

			envelope.into_credential(refresh_token)
		})
	}
}
impl<T> Debug for HttpRefresher<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpRefresher").field("endpoint", &self.endpoint.as_str()).finish()
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
	refresh_token: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefreshEnvelope {
	#[serde(default)]
	data: Option<RefreshPayload>,
	#[serde(flatten)]
	root: RefreshPayload,
}
impl RefreshEnvelope {
	fn into_credential(self, previous_refresh: &TokenSecret) -> Result<Credential, RefreshError> {
		let Self { data, root } = self;
		let data = data.unwrap_or_default();
		let access_token = non_empty(data.access_token)
			.or_else(|| non_empty(root.access_token))
			.ok_or(RefreshError::MissingAccessToken)?;
		let refresh_token = non_empty(data.refresh_token)
			.or_else(|| non_empty(root.refresh_token))
			.map(TokenSecret::new)
			.unwrap_or_else(|| previous_refresh.clone());
		let mut credential = Credential::new(access_token).with_refresh_token(refresh_token);

		if let Some(seconds) = data.expires_in.or(root.expires_in) {
			if seconds <= 0 {
				return Err(RefreshError::NonPositiveExpiresIn { seconds });
			}

			let expires_at = OffsetDateTime::now_utc()
				.checked_add(Duration::seconds(seconds))
				.ok_or(RefreshError::ExpiresInOutOfRange { seconds })?;

			credential = credential.with_expires_at(expires_at);
		}

		Ok(credential)
	}
}

fn non_empty(value: Option<String>) -> Option<String> {
	value.filter(|v| !v.is_empty())
}
