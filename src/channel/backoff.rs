//! Reconnect delay schedule.

// self
use crate::_prelude::*;

/// Exponential reconnect schedule without jitter.
///
/// Delays never decrease between resets and never exceed `max`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
	/// Delay before the first reconnect attempt.
	pub initial: StdDuration,
	/// Upper bound for every delay.
	pub max: StdDuration,
	/// Growth factor applied after each failed attempt.
	pub factor: u32,
}
impl Backoff {
	/// Creates a schedule starting at `initial` and capped at `max`.
	pub fn new(initial: StdDuration, max: StdDuration) -> Self {
		Self { initial, max: max.max(initial), factor: 2 }
	}

	/// Overrides the growth factor; values below 1 are treated as 1.
	pub fn with_factor(mut self, factor: u32) -> Self {
		self.factor = factor.max(1);

		self
	}

	/// Delay before reconnect attempt number `attempt` (zero-based).
	pub fn delay(&self, attempt: u32) -> StdDuration {
		let max = self.max.max(self.initial);
		let factor = self.factor.max(1);
		let mut delay = self.initial;

		for _ in 0..attempt {
			if delay >= max || factor == 1 {
				break;
			}

			delay = delay.saturating_mul(factor).min(max);
		}

		delay
	}
}
impl Default for Backoff {
	fn default() -> Self {
		Self::new(StdDuration::from_secs(1), StdDuration::from_secs(5))
	}
}
