//! Channel run loop and its caller-facing handle.

// crates.io
use futures::{SinkExt, StreamExt};
use tokio::{
	sync::{mpsc, watch},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	channel::{
		Backoff, ChannelConnection, ChannelConnector, ChannelError, ClientFrame, EventError,
		FrameSink, NotificationClock, NotificationSink, RoomId, ServerEvent,
	},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CredentialStore,
};

/// Observable connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
	/// No connection and none pending; the initial and final state.
	Disconnected,
	/// Opening a connection and waiting for the handshake ack.
	Connecting,
	/// Handshake acknowledged.
	Connected {
		/// Whether the server accepted the presented token.
		authenticated: bool,
	},
	/// Waiting before the next connection attempt.
	Reconnecting {
		/// Consecutive failed attempts so far.
		attempt: u32,
		/// Delay before the next attempt.
		delay: StdDuration,
	},
}

/// Tunables for [`ChannelManager`].
#[derive(Clone, Debug)]
pub struct ChannelOptions {
	/// Reconnect schedule.
	pub backoff: Backoff,
	/// Bound on connecting plus waiting for the `welcome` ack.
	pub handshake_timeout: StdDuration,
}
impl Default for ChannelOptions {
	fn default() -> Self {
		Self { backoff: Backoff::default(), handshake_timeout: StdDuration::from_secs(10) }
	}
}

#[derive(Debug)]
enum Command {
	Join(RoomId),
	Leave(RoomId),
	Stop,
}

enum Exit {
	Stopped,
	Lost,
}

/// Handle to a running realtime channel.
///
/// Dropping the manager tears the run loop down as if [`stop`](Self::stop) had
/// been called without waiting for it.
#[derive(Debug)]
pub struct ChannelManager {
	commands: mpsc::UnboundedSender<Command>,
	state: watch::Receiver<ChannelState>,
	task: JoinHandle<()>,
}
impl ChannelManager {
	/// Spawns the run loop on the current tokio runtime and starts connecting.
	pub fn start<C>(
		connector: Arc<C>,
		store: Arc<dyn CredentialStore>,
		sink: Arc<dyn NotificationSink>,
		options: ChannelOptions,
	) -> Self
	where
		C: ?Sized + ChannelConnector,
	{
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
		let runner = ChannelRunner {
			connector,
			store,
			sink,
			options,
			commands: commands_rx,
			state: state_tx,
			rooms: Vec::new(),
			clock: NotificationClock::default(),
		};
		let task = tokio::spawn(runner.run());

		Self { commands: commands_tx, state: state_rx, task }
	}

	/// Subscribes to `room`; the subscription is replayed after every reconnect.
	pub fn join(&self, room: RoomId) -> Result<(), ChannelError> {
		self.command(Command::Join(room))
	}

	/// Forgets `room` so later reconnects no longer join it.
	pub fn leave(&self, room: RoomId) -> Result<(), ChannelError> {
		self.command(Command::Leave(room))
	}

	/// Current connection state.
	pub fn state(&self) -> ChannelState {
		*self.state.borrow()
	}

	/// Receiver that observes every state transition.
	pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
		self.state.clone()
	}

	/// Stops the run loop and waits until it has closed the connection.
	pub async fn stop(self) {
		// Send fails only when the loop already exited.
		let _ = self.commands.send(Command::Stop);

		if let Err(e) = self.task.await {
			tracing::error!(error = %e, "Realtime channel task ended abnormally.");
		}
	}

	fn command(&self, command: Command) -> Result<(), ChannelError> {
		self.commands.send(command).map_err(|_| ChannelError::Stopped)
	}
}

struct Session {
	connection: ChannelConnection,
	authenticated: bool,
}

struct ChannelRunner<C>
where
	C: ?Sized,
{
	connector: Arc<C>,
	store: Arc<dyn CredentialStore>,
	sink: Arc<dyn NotificationSink>,
	options: ChannelOptions,
	commands: mpsc::UnboundedReceiver<Command>,
	state: watch::Sender<ChannelState>,
	rooms: Vec<RoomId>,
	clock: NotificationClock,
}
impl<C> ChannelRunner<C>
where
	C: ?Sized + ChannelConnector,
{
	async fn run(mut self) {
		let mut attempt = 0_u32;

		loop {
			self.state.send_replace(ChannelState::Connecting);

			let exit = match self.connect().await {
				Ok(Some(session)) => {
					attempt = 0;

					self.serve(session).await
				},
				Ok(None) => Exit::Stopped,
				Err(e) => {
					tracing::warn!(error = %e, "Realtime connection attempt failed.");

					Exit::Lost
				},
			};

			if let Exit::Stopped = exit {
				break;
			}

			let delay = self.options.backoff.delay(attempt);

			attempt = attempt.saturating_add(1);
			self.state.send_replace(ChannelState::Reconnecting { attempt, delay });
			obs::record_channel_attempt(attempt);
			tracing::info!(attempt, ?delay, "Realtime channel reconnecting.");

			if !self.wait(delay).await {
				break;
			}
		}

		self.state.send_replace(ChannelState::Disconnected);
		tracing::info!("Realtime channel stopped.");
	}

	/// Connects and completes the handshake while still honoring commands.
	///
	/// Returns `Ok(None)` when a stop arrives first.
	async fn connect(&mut self) -> Result<Option<Session>, ChannelError> {
		const KIND: FlowKind = FlowKind::Channel;

		let span = FlowSpan::new(KIND, "connect");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let credential = self.store.get();
		let token = credential.as_ref().map(|credential| &credential.access_token);
		let limit = self.options.handshake_timeout;
		let handshake = span.instrument(tokio::time::timeout(
			limit,
			handshake(&*self.connector, token),
		));

		tokio::pin!(handshake);

		let result = loop {
			tokio::select! {
				result = &mut handshake => {
					break result.unwrap_or(Err(ChannelError::HandshakeTimeout(limit)));
				},
				command = self.commands.recv() => {
					if !apply_offline(&mut self.rooms, command) {
						return Ok(None);
					}
				},
			}
		};

		match &result {
			Ok(session) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Success);

				if token.is_some() && !session.authenticated {
					tracing::warn!(
						"Realtime channel rejected the presented token, continuing unauthenticated."
					);
				}
			},
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result.map(Some)
	}

	async fn serve(&mut self, session: Session) -> Exit {
		let Session { connection, authenticated } = session;
		let ChannelConnection { mut sink, mut stream } = connection;

		self.state.send_replace(ChannelState::Connected { authenticated });
		obs::record_channel_attempt(0);
		tracing::info!(authenticated, rooms = self.rooms.len(), "Realtime channel connected.");

		for room in &self.rooms {
			if let Err(e) = send(&mut sink, &ClientFrame::Join(room.clone())).await {
				tracing::warn!(room = %room, error = %e, "Failed to rejoin room.");

				return Exit::Lost;
			}
		}

		loop {
			tokio::select! {
				command = self.commands.recv() => match command {
					Some(Command::Join(room)) => {
						if self.rooms.contains(&room) {
							continue;
						}

						self.rooms.push(room.clone());

						if let Err(e) = send(&mut sink, &ClientFrame::Join(room)).await {
							tracing::warn!(error = %e, "Failed to send join.");

							return Exit::Lost;
						}
					},
					Some(Command::Leave(room)) => {
						self.rooms.retain(|joined| joined != &room);

						if let Err(e) = send(&mut sink, &ClientFrame::Leave(room)).await {
							tracing::warn!(error = %e, "Failed to send leave.");

							return Exit::Lost;
						}
					},
					Some(Command::Stop) | None => {
						if let Err(e) = sink.close().await {
							tracing::debug!(error = %e, "Failed to close realtime connection cleanly.");
						}

						return Exit::Stopped;
					},
				},
				frame = stream.next() => match frame {
					Some(Ok(text)) => self.dispatch(&text),
					Some(Err(e)) => {
						tracing::warn!(error = %e, "Realtime connection failed.");

						return Exit::Lost;
					},
					None => {
						tracing::info!("Realtime connection closed by peer.");

						return Exit::Lost;
					},
				},
			}
		}
	}

	/// Sleeps for `delay` while still honoring commands; `false` means stop.
	async fn wait(&mut self, delay: StdDuration) -> bool {
		let sleep = tokio::time::sleep(delay);

		tokio::pin!(sleep);

		loop {
			tokio::select! {
				_ = &mut sleep => return true,
				command = self.commands.recv() => {
					if !apply_offline(&mut self.rooms, command) {
						return false;
					}
				},
			}
		}
	}

	fn dispatch(&self, text: &str) {
		match ServerEvent::parse(text) {
			Ok(ServerEvent::Welcome { .. }) => tracing::debug!("Ignoring repeated welcome."),
			Ok(event) => {
				let (id, timestamp) = self.clock.tick();

				if let Some(notification) = event.into_notification(id, timestamp) {
					self.sink.publish(notification);
				}
			},
			Err(e @ EventError::Unknown { .. }) => tracing::debug!(error = %e, "Dropped realtime event."),
			Err(e) => tracing::warn!(error = %e, "Dropped malformed realtime event."),
		}
	}
}

async fn handshake<C>(connector: &C, token: Option<&TokenSecret>) -> Result<Session, ChannelError>
where
	C: ?Sized + ChannelConnector,
{
	let mut connection = connector.connect(token).await?;
	let hello = ClientFrame::Hello { token: token.map(|token| token.expose().to_owned()) };

	send(&mut connection.sink, &hello).await?;

	while let Some(frame) = connection.stream.next().await {
		match ServerEvent::parse(&frame?) {
			Ok(ServerEvent::Welcome { authenticated }) =>
				return Ok(Session { connection, authenticated }),
			Ok(_) => tracing::debug!("Dropped event received before the handshake ack."),
			Err(e) => tracing::warn!(error = %e, "Dropped malformed frame during the handshake."),
		}
	}

	Err(ChannelError::ClosedDuringHandshake)
}

async fn send(sink: &mut FrameSink, frame: &ClientFrame) -> Result<(), ChannelError> {
	sink.send(frame.encode()?).await
}

/// Applies a command while no connection is up; `false` means stop.
fn apply_offline(rooms: &mut Vec<RoomId>, command: Option<Command>) -> bool {
	match command {
		Some(Command::Join(room)) => {
			if !rooms.contains(&room) {
				rooms.push(room);
			}

			true
		},
		Some(Command::Leave(room)) => {
			rooms.retain(|joined| joined != &room);

			true
		},
		Some(Command::Stop) | None => false,
	}
}
