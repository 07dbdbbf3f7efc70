//! Session-level error types shared across the pipeline, coordinator, store, and channel.

// self
use crate::_prelude::*;

/// Session-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Credential storage failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeouts enforced by the HTTP client).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Response body could not be decoded.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// Realtime channel failure.
	#[error(transparent)]
	Channel(#[from] crate::channel::ChannelError),

	/// Server rejected the presented credential (HTTP 401).
	#[error("Server rejected the request as unauthenticated.")]
	AuthExpired,
	/// Server answered with a non-success status other than 401.
	#[error("Server responded with status {status}.")]
	UnexpectedStatus {
		/// HTTP status code.
		status: u16,
	},
	/// No usable refresh token, or the refresh endpoint rejected it.
	#[error("Credential refresh failed: {reason}.")]
	RefreshFailed {
		/// Human-readable failure summary.
		reason: String,
		/// Sequence number of the refresh episode that failed.
		episode: u64,
	},
	/// Request failed and credentials were cleared; the user must sign in again.
	#[error("Session ended, sign-in required: {reason}.")]
	SessionEnded {
		/// Human-readable failure summary.
		reason: String,
	},
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Endpoint configuration is invalid.
	#[error(transparent)]
	Endpoints(#[from] crate::endpoint::EndpointsError),
	/// A request path could not be resolved against the API base.
	#[error("Request path `{path}` cannot be resolved against the API base.")]
	InvalidPath {
		/// Offending path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	Body(#[from] serde_json::Error),
	/// Header value contains characters that cannot be sent.
	#[error("Header `{name}` has an invalid value.")]
	InvalidHeader {
		/// Header name.
		name: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {url}.")]
	Network {
		/// Target of the failed call.
		url: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(url: &Url, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { url: url.to_string(), source: Box::new(src) }
	}
}

/// Response bodies that could not be parsed.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// Body was not valid JSON for the requested type.
	#[error("Response body is malformed JSON.")]
	Json {
		/// Structured parsing failure, including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the response.
		status: u16,
	},
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as _;
	// self
	use super::*;

	#[test]
	fn refresh_failure_message_includes_reason() {
		let err = Error::RefreshFailed { reason: "no refresh token".into(), episode: 3 };

		assert_eq!(err.to_string(), "Credential refresh failed: no refresh token.");
	}

	#[test]
	fn transport_error_keeps_source() {
		let url = Url::parse("https://api.example.com/items").expect("Fixture URL should parse.");
		let err: Error =
			TransportError::network(&url, std::io::Error::other("connection reset")).into();

		assert!(err.to_string().contains("https://api.example.com/items"));

		let source = err.source().expect("Transport error should expose its source.");

		assert_eq!(source.to_string(), "connection reset");
	}
}
