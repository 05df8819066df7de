//! Observability helpers for engine flows.
//!
//! Every engine operation runs inside a `wearable_sdk.flow` span carrying the `flow`, `provider`,
//! and `stage` (call site) fields.
//!
//! # Feature Flags
//!
//! - Enable `metrics` to increment the `wearable_sdk_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Engine operations observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization URL construction.
	Authorize,
	/// Callback handling and code exchange.
	Callback,
	/// Refresh grant.
	Refresh,
	/// Access-token reads and provider data fetches.
	Fetch,
	/// Connection health evaluation.
	Health,
	/// Token deletion.
	Disconnect,
	/// Multi-type historical fetch.
	Backfill,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Authorize => "authorize",
			FlowKind::Callback => "callback",
			FlowKind::Refresh => "refresh",
			FlowKind::Fetch => "fetch",
			FlowKind::Health => "health",
			FlowKind::Disconnect => "disconnect",
			FlowKind::Backfill => "backfill",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to an engine operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}

	/// Maps a finished operation onto its outcome label.
	pub fn of<T, E>(result: &std::result::Result<T, E>) -> Self {
		if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure }
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
