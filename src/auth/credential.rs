//! Access/refresh credential pair held by the credential store.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access/refresh token pair identifying an authenticated session.
///
/// Values are immutable once built; the store swaps whole credentials instead of
/// editing fields in place, so readers never observe a half-rotated pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	/// Bearer secret attached to outbound calls.
	pub access_token: TokenSecret,
	/// Secret presented to the refresh endpoint, if the backend issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Expiry instant for the access token, when known.
	pub expires_at: Option<OffsetDateTime>,
}
impl Credential {
	/// Creates a credential holding only an access token.
	pub fn new(access_token: impl Into<TokenSecret>) -> Self {
		Self { access_token: access_token.into(), refresh_token: None, expires_at: None }
	}

	/// Attaches a refresh token.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<TokenSecret>) -> Self {
		self.refresh_token = Some(refresh_token.into());

		self
	}

	/// Sets an absolute expiry instant.
	pub fn with_expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the expiry relative to the current clock.
	///
	/// Negative durations are clamped to zero; lifetimes past the representable range
	/// saturate at the latest instant.
	pub fn with_expires_in(self, duration: Duration) -> Self {
		let duration = if duration.is_negative() { Duration::ZERO } else { duration };

		self.with_expires_at(OffsetDateTime::now_utc().saturating_add(duration))
	}

	/// Returns `true` if the access token is known to be expired at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| instant >= expires_at)
	}

	/// Returns `true` if the access token is known to be expired now.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if both credentials carry the same access token.
	pub fn same_access(&self, access_token: &str) -> bool {
		self.access_token.expose() == access_token
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn expiry_is_optional() {
		let credential = Credential::new("access");

		assert!(!credential.is_expired());
		assert!(credential.refresh_token.is_none());
	}

	#[test]
	fn expiry_checks_against_instant() {
		let credential =
			Credential::new("access").with_expires_at(datetime!(2030-01-01 00:00:00 UTC));

		assert!(!credential.is_expired_at(datetime!(2029-12-31 23:59:59 UTC)));
		assert!(credential.is_expired_at(datetime!(2030-01-01 00:00:00 UTC)));
	}

	#[test]
	fn huge_lifetime_saturates_instead_of_overflowing() {
		let credential = Credential::new("access").with_expires_in(Duration::MAX);

		assert!(!credential.is_expired());
		assert!(credential.expires_at.is_some());
	}

	#[test]
	fn debug_redacts_both_secrets() {
		let credential = Credential::new("access-secret").with_refresh_token("refresh-secret");
		let rendered = format!("{credential:?}");

		assert!(!rendered.contains("access-secret"));
		assert!(!rendered.contains("refresh-secret"));
		assert!(rendered.contains("<redacted>"));
	}
}
