//! Bearer-token session plumbing for API clients: an authenticated request pipeline that
//! refreshes expired credentials exactly once per failure episode and replays the failed
//! calls, plus a realtime channel that reconnects, re-authenticates, and re-joins its rooms
//! on its own.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod channel;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod obs;
pub mod pipeline;
pub mod refresh;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// crates.io
	use futures::channel::mpsc as frames;
	use tokio::sync::mpsc;
	// self
	use crate::{
		auth::{Credential, TokenSecret},
		channel::{ChannelConnection, ChannelConnector, ChannelError, ConnectFuture},
		endpoint::ServiceEndpoints,
		http::ReqwestTransport,
		pipeline::{ApiClient, ClientOptions, ReqwestApiClient},
		store::{CredentialStore, MemoryStore},
	};

	/// Shared, ordered log of what crossed the in-memory channel.
	pub type Timeline = Arc<Mutex<Vec<String>>>;

	/// Builds endpoints rooted at a mock server's base URL.
	pub fn test_endpoints(base_url: &str) -> ServiceEndpoints {
		let base = Url::parse(base_url).expect("Mock server base URL should parse.");

		ServiceEndpoints::from_base(base).expect("Mock server endpoints should validate.")
	}

	/// Constructs an [`ApiClient`] backed by an in-memory store (optionally seeded) and the
	/// default reqwest transport.
	pub fn build_test_client(
		base_url: &str,
		seed: Option<Credential>,
		options: ClientOptions,
	) -> (ReqwestApiClient, Arc<MemoryStore>) {
		let store_backend = Arc::new(seed.map(MemoryStore::with_credential).unwrap_or_default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let client = ApiClient::with_transport(
			test_endpoints(base_url),
			store,
			ReqwestTransport::default(),
			options,
		);

		(client, store_backend)
	}

	/// Server side of one in-memory channel connection.
	#[derive(Debug)]
	pub struct MemoryPeer {
		/// Bearer presented when the client connected.
		pub bearer: Option<String>,
		/// Frames written by the client, in order.
		pub received: frames::UnboundedReceiver<String>,
		/// Frames delivered to the client; dropping it ends the connection.
		pub outbound: frames::UnboundedSender<Result<String, ChannelError>>,
	}
	impl MemoryPeer {
		/// Sends a raw text frame to the client.
		pub fn push(&self, frame: &str) {
			self.outbound.unbounded_send(Ok(frame.to_owned())).expect("Client side should be open.");
		}

		/// Waits for the next frame written by the client.
		pub async fn next_frame(&mut self) -> String {
			// crates.io
			use futures::StreamExt;

			tokio::time::timeout(StdDuration::from_secs(5), self.received.next())
				.await
				.expect("Client should send a frame in time.")
				.expect("Client side should stay open.")
		}
	}

	/// [`ChannelConnector`] whose connections are served by the test through [`MemoryPeer`]s.
	#[derive(Debug)]
	pub struct MemoryConnector {
		peers: mpsc::UnboundedSender<MemoryPeer>,
		timeline: Timeline,
	}
	impl MemoryConnector {
		/// Creates a connector and the receiver yielding one peer per accepted connection.
		pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
			let (peers, accepted) = mpsc::unbounded_channel();

			(Arc::new(Self { peers, timeline: Default::default() }), accepted)
		}

		/// Log of frames sent by clients, shared with whoever else records into it.
		pub fn timeline(&self) -> Timeline {
			self.timeline.clone()
		}
	}
	impl ChannelConnector for MemoryConnector {
		fn connect<'a>(&'a self, bearer: Option<&'a TokenSecret>) -> ConnectFuture<'a> {
			Box::pin(async move {
				let (client_tx, received) = frames::unbounded::<String>();
				let (outbound, client_rx) = frames::unbounded();
				let sink = futures::sink::unfold(
					(client_tx, self.timeline.clone()),
					|(client_tx, timeline), frame: String| async move {
						timeline.lock().push(format!("sent {frame}"));
						client_tx.unbounded_send(frame).map_err(ChannelError::transport)?;

						Ok::<_, ChannelError>((client_tx, timeline))
					},
				);
				let peer = MemoryPeer {
					bearer: bearer.map(|bearer| bearer.expose().to_owned()),
					received,
					outbound,
				};

				self.peers.send(peer).map_err(|_| {
					ChannelError::transport(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
				})?;

				Ok(ChannelConnection::new(sink, client_rx))
			})
		}
	}
}

mod _prelude {
	pub use std::{
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
