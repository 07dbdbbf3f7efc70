//! Wire frames exchanged with the realtime server and the notifications derived from them.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, channel::RoomId};

const UNKNOWN_ITEM: &str = "Unknown item";

/// Server events that could not be turned into a [`ServerEvent`].
#[derive(Debug, ThisError)]
pub enum EventError {
	/// Frame is not a JSON object with an `event` name.
	#[error("Realtime frame is not a valid event envelope.")]
	Envelope(#[source] serde_json::Error),
	/// Event name is not one the client understands.
	#[error("Realtime event `{event}` is not recognized.")]
	Unknown {
		/// Event name sent by the server.
		event: String,
	},
	/// Event payload has the wrong shape.
	#[error("Realtime event `{event}` carries a malformed payload.")]
	Malformed {
		/// Event name sent by the server.
		event: String,
		/// Payload decoding failure.
		#[source]
		source: serde_json::Error,
	},
}

/// Frames sent from the client to the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
	/// Opens the session, optionally presenting an access token.
	Hello {
		/// Access token, omitted for anonymous sessions.
		#[serde(skip_serializing_if = "Option::is_none")]
		token: Option<String>,
	},
	/// Subscribes to a room.
	Join(RoomId),
	/// Unsubscribes from a room.
	Leave(RoomId),
}
impl ClientFrame {
	/// Encodes the frame as JSON text.
	pub fn encode(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}

#[derive(Deserialize)]
struct Envelope {
	event: String,
	#[serde(default)]
	data: Value,
}

/// Payload of the item lifecycle events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
	/// Item category, such as `Lost` or `Found`.
	#[serde(rename = "type")]
	pub kind: Option<String>,
	/// Display name of the item.
	pub item_name: Option<String>,
}

/// Payload of a generic `notification` event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationPayload {
	/// Server-defined notification type.
	#[serde(rename = "type")]
	pub kind: Option<String>,
	/// Notification title.
	pub title: Option<String>,
	/// Notification body.
	pub message: Option<String>,
}

/// Server frames understood by the channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
	/// Handshake acknowledgement.
	Welcome {
		/// Whether the presented token was accepted.
		authenticated: bool,
	},
	/// A new item was reported.
	NewItemPosted(ItemPayload),
	/// An item was removed; the payload is the item id.
	ItemDeleted(Value),
	/// An item changed.
	ItemUpdated(ItemPayload),
	/// Generic notification pushed by the server.
	Notification(NotificationPayload),
}
impl ServerEvent {
	/// Parses one text frame.
	pub fn parse(text: &str) -> Result<Self, EventError> {
		let Envelope { event, data } = serde_json::from_str(text).map_err(EventError::Envelope)?;

		match event.as_str() {
			"welcome" => {
				#[derive(Deserialize)]
				struct Welcome {
					#[serde(default)]
					authenticated: bool,
				}

				let data = if data.is_null() { Value::Object(Default::default()) } else { data };
				let Welcome { authenticated } = payload(&event, data)?;

				Ok(Self::Welcome { authenticated })
			},
			"newItemPosted" => Ok(Self::NewItemPosted(payload(&event, data)?)),
			"itemDeleted" => Ok(Self::ItemDeleted(data)),
			"itemUpdated" => Ok(Self::ItemUpdated(payload(&event, data)?)),
			"notification" => Ok(Self::Notification(payload(&event, data)?)),
			_ => Err(EventError::Unknown { event }),
		}
	}

	/// Translates the event into a user-facing notification; `None` for control frames.
	pub fn into_notification(self, id: u64, timestamp: OffsetDateTime) -> Option<Notification> {
		let (kind, title, message) = match self {
			ServerEvent::Welcome { .. } => return None,
			ServerEvent::NewItemPosted(item) => {
				let name = item.item_name.as_deref().unwrap_or(UNKNOWN_ITEM);
				let message = match item.kind {
					Some(kind) => format!(
						"A new {} item has been reported: {name}",
						kind.to_lowercase()
					),
					None => format!("A new item has been reported: {name}"),
				};

				(NotificationKind::NewItem, "New Item Posted".to_owned(), message)
			},
			ServerEvent::ItemDeleted(_) => (
				NotificationKind::ItemDeleted,
				"Item Removed".to_owned(),
				"An item has been removed from the system".to_owned(),
			),
			ServerEvent::ItemUpdated(item) => (
				NotificationKind::ItemUpdated,
				"Item Updated".to_owned(),
				format!(
					"An item has been updated: {}",
					item.item_name.as_deref().unwrap_or(UNKNOWN_ITEM)
				),
			),
			ServerEvent::Notification(payload) => (
				payload.kind.map(NotificationKind::from).unwrap_or(NotificationKind::Generic(
					"notification".to_owned(),
				)),
				payload.title.unwrap_or_else(|| "Notification".to_owned()),
				payload.message.unwrap_or_default(),
			),
		};

		Some(Notification { id, kind, title, message, timestamp })
	}
}

/// Category of a [`Notification`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
	/// `new_item`
	NewItem,
	/// `item_deleted`
	ItemDeleted,
	/// `item_updated`
	ItemUpdated,
	/// Server-defined type carried by a generic notification.
	Generic(String),
}
impl NotificationKind {
	/// Stable label for the kind.
	pub fn as_str(&self) -> &str {
		match self {
			NotificationKind::NewItem => "new_item",
			NotificationKind::ItemDeleted => "item_deleted",
			NotificationKind::ItemUpdated => "item_updated",
			NotificationKind::Generic(kind) => kind,
		}
	}
}
impl From<String> for NotificationKind {
	fn from(value: String) -> Self {
		match value.as_str() {
			"new_item" => NotificationKind::NewItem,
			"item_deleted" => NotificationKind::ItemDeleted,
			"item_updated" => NotificationKind::ItemUpdated,
			_ => NotificationKind::Generic(value),
		}
	}
}
impl From<NotificationKind> for String {
	fn from(value: NotificationKind) -> Self {
		match value {
			NotificationKind::Generic(kind) => kind,
			kind => kind.as_str().to_owned(),
		}
	}
}
impl Display for NotificationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// User-facing notification delivered to a [`NotificationSink`](crate::channel::NotificationSink).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
	/// Unique, strictly increasing id derived from the wall clock in milliseconds.
	pub id: u64,
	/// Notification category.
	#[serde(rename = "type")]
	pub kind: NotificationKind,
	/// Short title.
	pub title: String,
	/// Body text.
	pub message: String,
	/// Moment the client received the event (UTC).
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}

/// Issues notification ids and timestamps.
///
/// Ids are Unix milliseconds, bumped past the previous id when two events land in the
/// same millisecond or the clock steps backwards.
#[derive(Debug, Default)]
pub struct NotificationClock {
	last: AtomicU64,
}
impl NotificationClock {
	/// Returns the next id and the current UTC time.
	pub fn tick(&self) -> (u64, OffsetDateTime) {
		let now = OffsetDateTime::now_utc();

		(self.next_id(unix_millis(now)), now)
	}

	fn next_id(&self, millis: u64) -> u64 {
		let mut last = self.last.load(Ordering::Relaxed);

		loop {
			let next = millis.max(last.saturating_add(1));

			match self.last.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
				Ok(_) => return next,
				Err(actual) => last = actual,
			}
		}
	}
}

fn unix_millis(at: OffsetDateTime) -> u64 {
	u64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or_default()
}

fn payload<T>(event: &str, data: Value) -> Result<T, EventError>
where
	T: serde::de::DeserializeOwned,
{
	serde_json::from_value(data)
		.map_err(|source| EventError::Malformed { event: event.to_owned(), source })
}
