//! WebSocket connector built on `tokio-tungstenite`.

// crates.io
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{
	Message,
	client::IntoClientRequest,
	http::{HeaderValue, header::AUTHORIZATION},
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	channel::{ChannelConnection, ChannelConnector, ChannelError, ConnectFuture},
};

/// [`ChannelConnector`] speaking JSON text frames over a WebSocket.
///
/// When a token is present it is sent as `Authorization: Bearer <token>` on the
/// upgrade request, in addition to the `hello` frame the run loop sends.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
	endpoint: Url,
}
impl WebSocketConnector {
	/// Creates a connector for a `ws://` or `wss://` endpoint.
	pub fn new(endpoint: Url) -> Self {
		Self { endpoint }
	}

	/// Realtime endpoint.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}
}
impl ChannelConnector for WebSocketConnector {
	fn connect<'a>(&'a self, bearer: Option<&'a TokenSecret>) -> ConnectFuture<'a> {
		Box::pin(async move {
			let mut request = self
				.endpoint
				.as_str()
				.into_client_request()
				.map_err(|e| ChannelError::connect(&self.endpoint, e))?;

			if let Some(bearer) = bearer {
				let mut value =
					HeaderValue::from_str(&bearer.bearer()).map_err(|_| ChannelError::InvalidToken)?;

				value.set_sensitive(true);
				request.headers_mut().insert(AUTHORIZATION, value);
			}

			let (socket, response) = tokio_tungstenite::connect_async(request)
				.await
				.map_err(|e| ChannelError::connect(&self.endpoint, e))?;

			tracing::debug!(
				endpoint = %self.endpoint,
				status = response.status().as_u16(),
				"WebSocket upgrade completed."
			);

			let (sink, stream) = socket.split();
			let sink = sink
				.sink_map_err(ChannelError::transport)
				.with(|text: String| future::ready(Ok::<_, ChannelError>(Message::text(text))));
			let stream = stream.filter_map(|message| {
				future::ready(match message {
					Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
					// Control and binary frames carry no events.
					Ok(_) => None,
					Err(e) => Some(Err(ChannelError::transport(e))),
				})
			});

			Ok(ChannelConnection::new(sink, stream))
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn unreachable_endpoint_reports_connect_error() {
		let endpoint = Url::parse("ws://127.0.0.1:9/socket").expect("Fixture URL should parse.");
		let connector = WebSocketConnector::new(endpoint);
		let err = connector
			.connect(Some(&TokenSecret::new("tok1")))
			.await
			.expect_err("Nothing listens on the discard port.");

		assert!(matches!(err, ChannelError::Connect { endpoint, .. } if endpoint == "ws://127.0.0.1:9/socket"));
	}
}
