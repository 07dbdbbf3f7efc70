//! Backend endpoint configuration consumed by the pipeline, refresher, and channel.
//!
//! [`ServiceEndpoints`] is validated once at construction so the hot paths never
//! re-check URL schemes. [`ServiceEndpoints::from_base`] derives the refresh and
//! realtime endpoints from the API origin using the backend's standard layout.

// self
use crate::{_prelude::*, error::ConfigError};

/// Errors raised while constructing or validating endpoints.
#[derive(Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum EndpointsError {
	/// API base is mandatory.
	#[error("Missing API base URL.")]
	MissingApiBase,
	/// Refresh endpoint is mandatory.
	#[error("Missing refresh endpoint.")]
	MissingRefreshEndpoint,
	/// Realtime endpoint is mandatory.
	#[error("Missing realtime endpoint.")]
	MissingRealtimeEndpoint,
	/// Endpoint uses a scheme that does not fit its role.
	#[error("The {endpoint} endpoint uses an unsupported scheme: {url}.")]
	UnsupportedScheme {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Endpoint must use TLS because the builder was asked to require it.
	#[error("The {endpoint} endpoint must use TLS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// A derived endpoint could not be built from the base.
	#[error("Cannot derive the {endpoint} endpoint from {url}.")]
	Underivable {
		/// Which endpoint failed derivation.
		endpoint: &'static str,
		/// Base URL used for derivation.
		url: String,
	},
}

/// Validated endpoint set for one backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
	/// Origin (and optional prefix) that request paths are resolved against.
	pub api_base: Url,
	/// Endpoint that trades a refresh token for a new access token.
	pub refresh: Url,
	/// Websocket endpoint for the realtime channel.
	pub realtime: Url,
}
impl ServiceEndpoints {
	/// Origin used by local development backends.
	pub const DEFAULT_BASE: &'static str = "http://localhost:4000";
	/// Refresh path appended to the base by [`ServiceEndpoints::from_base`].
	pub const REFRESH_PATH: &'static str = "/api/v1/users/auth/refreshAccessToken";

	/// Creates a new builder.
	pub fn builder() -> ServiceEndpointsBuilder {
		ServiceEndpointsBuilder::default()
	}

	/// Derives the refresh and realtime endpoints from an HTTP(S) origin.
	///
	/// The realtime endpoint reuses the origin with the `ws`/`wss` scheme.
	pub fn from_base(base: Url) -> Result<Self, EndpointsError> {
		let refresh = base.join(Self::REFRESH_PATH).map_err(|_| EndpointsError::Underivable {
			endpoint: "refresh",
			url: base.to_string(),
		})?;
		let mut realtime = base.clone();
		let scheme = match base.scheme() {
			"https" => "wss",
			_ => "ws",
		};

		realtime.set_scheme(scheme).map_err(|_| EndpointsError::Underivable {
			endpoint: "realtime",
			url: base.to_string(),
		})?;

		Self::builder().api_base(base).refresh(refresh).realtime(realtime).build()
	}

	/// Endpoints of a backend running on [`ServiceEndpoints::DEFAULT_BASE`].
	pub fn local() -> Result<Self, EndpointsError> {
		let base = Url::parse(Self::DEFAULT_BASE).map_err(|_| EndpointsError::Underivable {
			endpoint: "api",
			url: Self::DEFAULT_BASE.to_owned(),
		})?;

		Self::from_base(base)
	}

	/// Resolves a request path against the API base.
	pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
		self.api_base
			.join(path)
			.map_err(|source| ConfigError::InvalidPath { path: path.to_owned(), source })
	}

	fn validate(&self, require_tls: bool) -> Result<(), EndpointsError> {
		validate_endpoint("api", &self.api_base, ("http", "https"), require_tls)?;
		validate_endpoint("refresh", &self.refresh, ("http", "https"), require_tls)?;
		validate_endpoint("realtime", &self.realtime, ("ws", "wss"), require_tls)?;

		Ok(())
	}
}

/// Builder for [`ServiceEndpoints`].
#[derive(Debug, Default)]
pub struct ServiceEndpointsBuilder {
	/// API base URL.
	pub api_base: Option<Url>,
	/// Refresh endpoint.
	pub refresh: Option<Url>,
	/// Realtime endpoint.
	pub realtime: Option<Url>,
	/// Rejects plaintext schemes when set.
	pub require_tls: bool,
}
impl ServiceEndpointsBuilder {
	/// Sets the API base.
	pub fn api_base(mut self, url: Url) -> Self {
		self.api_base = Some(url);

		self
	}

	/// Sets the refresh endpoint.
	pub fn refresh(mut self, url: Url) -> Self {
		self.refresh = Some(url);

		self
	}

	/// Sets the realtime endpoint.
	pub fn realtime(mut self, url: Url) -> Self {
		self.realtime = Some(url);

		self
	}

	/// Requires `https`/`wss` for every endpoint.
	pub fn require_tls(mut self, require: bool) -> Self {
		self.require_tls = require;

		self
	}

	/// Consumes the builder and validates the resulting endpoints.
	pub fn build(self) -> Result<ServiceEndpoints, EndpointsError> {
		let api_base = self.api_base.ok_or(EndpointsError::MissingApiBase)?;
		let refresh = self.refresh.ok_or(EndpointsError::MissingRefreshEndpoint)?;
		let realtime = self.realtime.ok_or(EndpointsError::MissingRealtimeEndpoint)?;
		let endpoints = ServiceEndpoints { api_base, refresh, realtime };

		endpoints.validate(self.require_tls)?;

		Ok(endpoints)
	}
}

fn validate_endpoint(
	name: &'static str,
	url: &Url,
	(plain, secure): (&'static str, &'static str),
	require_tls: bool,
) -> Result<(), EndpointsError> {
	let scheme = url.scheme();

	if scheme != plain && scheme != secure {
		return Err(EndpointsError::UnsupportedScheme { endpoint: name, url: url.to_string() });
	}
	if require_tls && scheme != secure {
		return Err(EndpointsError::InsecureEndpoint { endpoint: name, url: url.to_string() });
	}

	Ok(())
}
