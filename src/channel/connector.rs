//! Transport seam for the realtime channel.

// crates.io
use futures::{Sink, Stream};
// self
use crate::{_prelude::*, auth::TokenSecret, channel::ChannelError};

/// Outbound half of a connection: accepts JSON text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
/// Inbound half of a connection: yields JSON text frames until the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;
/// Boxed future returned by [`ChannelConnector::connect`].
pub type ConnectFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ChannelConnection, ChannelError>> + 'a + Send>>;

/// Opens raw connections to the realtime endpoint.
///
/// Connectors only establish the link. The run loop owns the handshake, room replay,
/// and reconnects.
pub trait ChannelConnector
where
	Self: 'static + Send + Sync,
{
	/// Opens a connection, presenting `bearer` on the upgrade when the transport supports it.
	fn connect<'a>(&'a self, bearer: Option<&'a TokenSecret>) -> ConnectFuture<'a>;
}

/// One live connection split into its outbound and inbound halves.
pub struct ChannelConnection {
	/// Outbound frames.
	pub sink: FrameSink,
	/// Inbound frames.
	pub stream: FrameStream,
}
impl ChannelConnection {
	/// Boxes the two halves of a connection.
	pub fn new<S, R>(sink: S, stream: R) -> Self
	where
		S: 'static + Send + Sink<String, Error = ChannelError>,
		R: 'static + Send + Stream<Item = Result<String, ChannelError>>,
	{
		Self { sink: Box::pin(sink), stream: Box::pin(stream) }
	}
}
impl Debug for ChannelConnection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ChannelConnection(..)")
	}
}
