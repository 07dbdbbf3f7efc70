//! Transport primitives for authenticated API calls.
//!
//! [`ApiRequest`] is an immutable request descriptor: the pipeline may dispatch the
//! same descriptor twice (original call plus one replay) and attaches the bearer
//! per dispatch instead of writing it into the request. [`HttpTransport`] is the
//! pipeline's only dependency on an HTTP stack; [`ReqwestTransport`] is the default.

// std
use std::ops::Deref;
// crates.io
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, DecodeError, TransportError},
};

pub use reqwest::{
	Method, StatusCode,
	header::{HeaderMap, HeaderName, HeaderValue},
};

/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + 'a + Send>>;

/// Abstraction over HTTP stacks able to execute [`ApiRequest`] values.
///
/// Implementations must not retry, must not follow the pipeline's auth policy, and
/// must surface network failures as [`Error::Transport`] so callers see them
/// unchanged.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request`, sending `Authorization: Bearer <bearer>` when `bearer` is set.
	fn execute<'a>(
		&'a self,
		request: &'a ApiRequest,
		bearer: Option<&'a TokenSecret>,
	) -> TransportFuture<'a>;
}

/// Immutable description of one outbound call.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	method: Method,
	url: Url,
	headers: HeaderMap,
	body: Option<Vec<u8>>,
	idempotent: bool,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		let idempotent = is_idempotent_method(&method);

		Self { method, url, headers: HeaderMap::new(), body: None, idempotent }
	}

	/// Shorthand for a `GET` request.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	/// Shorthand for a `POST` request.
	pub fn post(url: Url) -> Self {
		Self::new(Method::POST, url)
	}

	/// Shorthand for a `PUT` request.
	pub fn put(url: Url) -> Self {
		Self::new(Method::PUT, url)
	}

	/// Shorthand for a `DELETE` request.
	pub fn delete(url: Url) -> Self {
		Self::new(Method::DELETE, url)
	}

	/// Adds (or replaces) a header.
	pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self, ConfigError> {
		let value = HeaderValue::from_str(value)
			.map_err(|_| ConfigError::InvalidHeader { name: name.to_string() })?;

		self.headers.insert(name, value);

		Ok(self)
	}

	/// Appends query parameters to the target URL.
	pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: AsRef<str>,
		V: AsRef<str>,
	{
		self.url.query_pairs_mut().extend_pairs(pairs);

		self
	}

	/// Serializes `body` as JSON and sets the content type.
	pub fn json<T>(mut self, body: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		self.body = Some(serde_json::to_vec(body)?);
		self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Ok(self)
	}

	/// Sets a raw body with the given content type.
	pub fn body(mut self, body: impl Into<Vec<u8>>, content_type: &str) -> Result<Self, ConfigError> {
		self.body = Some(body.into());

		self.header(CONTENT_TYPE, content_type)
	}

	/// Overrides whether the request is safe to replay.
	///
	/// Defaults to `true` for `GET`, `HEAD`, `PUT`, `DELETE`, `OPTIONS`, and `TRACE`.
	pub fn idempotent(mut self, idempotent: bool) -> Self {
		self.idempotent = idempotent;

		self
	}

	/// HTTP method.
	pub fn method(&self) -> &Method {
		&self.method
	}

	/// Target URL.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Caller-supplied headers (never includes the bearer).
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Request body, if any.
	pub fn body_bytes(&self) -> Option<&[u8]> {
		self.body.as_deref()
	}

	/// Whether replaying the request is considered safe.
	pub fn is_idempotent(&self) -> bool {
		self.idempotent
	}
}

/// Fully buffered response returned by an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct ApiResponse {
	status: StatusCode,
	headers: HeaderMap,
	body: Vec<u8>,
}
impl ApiResponse {
	/// Builds a response from its parts.
	pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers, body: body.into() }
	}

	/// HTTP status.
	pub fn status(&self) -> StatusCode {
		self.status
	}

	/// Response headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Raw body.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	/// Returns `true` when the server rejected the presented credential.
	pub fn is_auth_expired(&self) -> bool {
		self.status == StatusCode::UNAUTHORIZED
	}

	/// Decodes the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T, DecodeError>
	where
		T: DeserializeOwned,
	{
		let mut de = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut de)
			.map_err(|source| DecodeError::Json { source, status: self.status.as_u16() })
	}

	/// Converts non-success statuses into errors.
	pub fn error_for_status(self) -> Result<Self> {
		if self.is_success() {
			Ok(self)
		} else if self.is_auth_expired() {
			Err(Error::AuthExpired)
		} else {
			Err(Error::UnexpectedStatus { status: self.status.as_u16() })
		}
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client whose requests time out after `timeout`.
	pub fn with_timeout(timeout: StdDuration) -> Result<Self, ConfigError> {
		Ok(Self(ReqwestClient::builder().timeout(timeout).build()?))
	}
}
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl HttpTransport for ReqwestTransport {
	fn execute<'a>(
		&'a self,
		request: &'a ApiRequest,
		bearer: Option<&'a TokenSecret>,
	) -> TransportFuture<'a> {
		Box::pin(async move {
			let mut headers = request.headers().clone();

			if let Some(bearer) = bearer {
				headers.insert(AUTHORIZATION, bearer_header(bearer)?);
			}

			let mut builder =
				self.0.request(request.method().clone(), request.url().clone()).headers(headers);

			if let Some(body) = request.body_bytes() {
				builder = builder.body(body.to_vec());
			}

			let response = builder
				.send()
				.await
				.map_err(|e| TransportError::network(request.url(), e))?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body =
				response.bytes().await.map_err(|e| TransportError::network(request.url(), e))?;

			Ok(ApiResponse::new(status, headers, body.to_vec()))
		})
	}
}

/// Renders a bearer secret as a sensitive `Authorization` header value.
pub fn bearer_header(secret: &TokenSecret) -> Result<HeaderValue, ConfigError> {
	let mut value = HeaderValue::from_str(&secret.bearer())
		.map_err(|_| ConfigError::InvalidHeader { name: AUTHORIZATION.to_string() })?;

	value.set_sensitive(true);

	Ok(value)
}

fn is_idempotent_method(method: &Method) -> bool {
	matches!(
		*method,
		Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
	)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Failed to parse fixture URL.")
	}

	#[test]
	fn idempotency_follows_method_and_override() {
		assert!(ApiRequest::get(url("https://api.example.com/items")).is_idempotent());
		assert!(ApiRequest::delete(url("https://api.example.com/items/1")).is_idempotent());
		assert!(!ApiRequest::post(url("https://api.example.com/items")).is_idempotent());
		assert!(
			ApiRequest::post(url("https://api.example.com/search")).idempotent(true).is_idempotent()
		);
	}

	#[test]
	fn json_body_sets_content_type() {
		let request = ApiRequest::put(url("https://api.example.com/items/7"))
			.json(&serde_json::json!({ "itemName": "umbrella" }))
			.expect("JSON body should serialize.");

		assert_eq!(request.headers().get(CONTENT_TYPE).map(|v| v.as_bytes()), Some(&b"application/json"[..]));
		assert_eq!(request.body_bytes(), Some(&br#"{"itemName":"umbrella"}"#[..]));
	}

	#[test]
	fn query_pairs_are_encoded() {
		let request = ApiRequest::delete(url("https://api.example.com/api/v1/users/profile/delete"))
			.query([("itemId", "abc 1")]);

		assert_eq!(request.url().query(), Some("itemId=abc+1"));
	}

	#[test]
	fn error_for_status_classifies_unauthenticated() {
		let response = ApiResponse::new(StatusCode::UNAUTHORIZED, HeaderMap::new(), Vec::new());

		assert!(response.is_auth_expired());
		assert!(matches!(response.error_for_status(), Err(Error::AuthExpired)));

		let response = ApiResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new());

		assert!(matches!(
			response.error_for_status(),
			Err(Error::UnexpectedStatus { status: 404 })
		));
	}

	#[test]
	fn json_decode_reports_path() {
		#[derive(Debug, Deserialize)]
		struct Payload {
			#[allow(dead_code)]
			count: u32,
		}

		let response =
			ApiResponse::new(StatusCode::OK, HeaderMap::new(), br#"{"count":"many"}"#.to_vec());
		let err = response.json::<Payload>().expect_err("String count should fail to decode.");
		let DecodeError::Json { source, status } = err;

		assert_eq!(status, 200);
		assert_eq!(source.path().to_string(), "count");
	}

	#[test]
	fn bearer_header_is_sensitive() {
		let value = bearer_header(&TokenSecret::new("tok")).expect("Plain token should render.");

		assert!(value.is_sensitive());
		assert_eq!(value.to_str().ok(), Some("Bearer tok"));
	}
}
