//! Room identifiers for realtime subscriptions.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const ROOM_MAX_LEN: usize = 128;

/// Error returned when a room name fails validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum RoomIdError {
	/// The room name was empty.
	#[error("Room name cannot be empty.")]
	Empty,
	/// The room name contains whitespace or control characters.
	#[error("Room name contains whitespace or control characters.")]
	InvalidCharacter,
	/// The room name exceeded the allowed length.
	#[error("Room name exceeds {max} bytes.")]
	TooLong {
		/// Maximum permitted length in bytes.
		max: usize,
	},
}

/// Name of a server-side room the channel subscribes to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);
impl RoomId {
	/// Creates a room identifier after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, RoomIdError> {
		let view = value.as_ref();

		validate(view)?;

		Ok(Self(view.to_owned()))
	}
}
impl Deref for RoomId {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for RoomId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Borrow<str> for RoomId {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl From<RoomId> for String {
	fn from(value: RoomId) -> Self {
		value.0
	}
}
impl TryFrom<String> for RoomId {
	type Error = RoomIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate(&value)?;

		Ok(Self(value))
	}
}
impl FromStr for RoomId {
	type Err = RoomIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for RoomId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Room({})", self.0)
	}
}
impl Display for RoomId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

fn validate(view: &str) -> Result<(), RoomIdError> {
	if view.is_empty() {
		return Err(RoomIdError::Empty);
	}
	if view.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err(RoomIdError::InvalidCharacter);
	}
	if view.len() > ROOM_MAX_LEN {
		return Err(RoomIdError::TooLong { max: ROOM_MAX_LEN });
	}

	Ok(())
}
