//! Counters and gauges exported through the global `metrics` recorder.
//!
//! Every function compiles to a no-op unless the `metrics` feature is enabled.

// self
use crate::obs::{FlowKind, FlowOutcome};

/// Counts one attempt, success, or failure of a session flow.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"bearer_session_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Counts a caller that joined an in-flight refresh instead of starting its own.
pub fn record_refresh_coalesced() {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("bearer_session_refresh_coalesced_total").increment(1);
	}
}

/// Publishes the reconnect attempt the realtime channel is backing off on; zero while connected.
pub fn record_channel_attempt(attempt: u32) {
	#[cfg(feature = "metrics")]
	{
		metrics::gauge!("bearer_session_channel_reconnect_attempt").set(f64::from(attempt));
	}
	#[cfg(not(feature = "metrics"))]
	let _ = attempt;
}
