//! Self-healing realtime channel.
//!
//! [`ChannelManager::start`] spawns one run loop that owns the live connection. The
//! loop reads the credential store at every connect, presents the access token (when
//! present) in the handshake, waits for the server's `welcome` ack, replays every
//! joined room, and then forwards server events to a [`NotificationSink`]. Lost
//! connections are rebuilt after a [`Backoff`] delay until the manager is stopped.
//!
//! Frames are JSON text of the form `{"event": "<name>", "data": <payload>}`.

pub mod backoff;
pub mod connector;
pub mod event;
pub mod manager;
pub mod room;
#[cfg(feature = "websocket")] pub mod websocket;

pub use backoff::Backoff;
pub use connector::*;
pub use event::*;
pub use manager::*;
pub use room::*;
#[cfg(feature = "websocket")] pub use websocket::WebSocketConnector;

// self
use crate::{_prelude::*, error::BoxError};

/// Failures raised inside the channel run loop or by its handle.
///
/// The loop itself never surfaces these to callers; it logs them and reconnects.
/// Handles return [`ChannelError::Stopped`] once the loop has exited.
#[derive(Debug, ThisError)]
pub enum ChannelError {
	/// The connection could not be opened.
	#[error("Failed to connect to realtime endpoint {endpoint}.")]
	Connect {
		/// Endpoint that refused the connection.
		endpoint: String,
		/// Connector-specific failure.
		#[source]
		source: BoxError,
	},
	/// Reading or writing a frame failed.
	#[error("Realtime transport failed.")]
	Transport {
		/// Connector-specific failure.
		#[source]
		source: BoxError,
	},
	/// The server did not acknowledge the handshake in time.
	#[error("Realtime handshake was not acknowledged within {0:?}.")]
	HandshakeTimeout(StdDuration),
	/// The connection closed before the handshake completed.
	#[error("Realtime connection closed during the handshake.")]
	ClosedDuringHandshake,
	/// The access token cannot be carried in the upgrade request.
	#[error("Access token cannot be sent as a header value.")]
	InvalidToken,
	/// An outbound frame could not be encoded.
	#[error("Realtime frame could not be encoded.")]
	Encode(#[from] serde_json::Error),
	/// The run loop has exited.
	#[error("Realtime channel has been stopped.")]
	Stopped,
}
impl ChannelError {
	/// Wraps a connector's connect failure.
	pub fn connect(endpoint: &Url, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Connect { endpoint: endpoint.to_string(), source: Box::new(src) }
	}

	/// Wraps a connector's frame I/O failure.
	pub fn transport(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Transport { source: Box::new(src) }
	}
}

/// Receiver of notifications translated from server events.
///
/// `publish` runs inside the channel loop; implementations should hand the value off
/// quickly instead of blocking.
pub trait NotificationSink
where
	Self: 'static + Send + Sync,
{
	/// Delivers one notification.
	fn publish(&self, notification: Notification);
}
impl<F> NotificationSink for F
where
	F: 'static + Fn(Notification) + Send + Sync,
{
	fn publish(&self, notification: Notification) {
		self(notification)
	}
}
impl NotificationSink for tokio::sync::mpsc::UnboundedSender<Notification> {
	fn publish(&self, notification: Notification) {
		if self.send(notification).is_err() {
			tracing::debug!("Notification receiver is gone, dropping notification.");
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn transport_error_keeps_source() {
		let err = ChannelError::transport(std::io::Error::other("broken pipe"));

		assert_eq!(
			std::error::Error::source(&err).map(ToString::to_string).as_deref(),
			Some("broken pipe")
		);
	}

	#[test]
	fn channel_errors_lift_into_session_errors() {
		let err: Error = ChannelError::Stopped.into();

		assert_eq!(err.to_string(), "Realtime channel has been stopped.");
	}
}
