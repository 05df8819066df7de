//! Shared helpers for engine operations (span + outcome wrapping, singleflight guards).

// self
use crate::{
	_prelude::*,
	flows::ConnectionEngine,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::StoreKey,
};

/// Runs `fut` inside a flow span, recording attempt and outcome counters around it.
pub(crate) async fn observe<T, Fut>(
	kind: FlowKind,
	provider: &ProviderId,
	stage: &'static str,
	fut: Fut,
) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = FlowSpan::new(kind, provider, stage);

	obs::record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = span.instrument(fut).await;

	if let Err(e) = &result {
		let _entered = span.entered();

		tracing::debug!(error = %e, "Flow failed.");
	}

	obs::record_flow_outcome(kind, FlowOutcome::of(&result));

	result
}

/// Returns (and creates on demand) the singleflight guard for a store key.
pub(crate) fn flow_guard(engine: &ConnectionEngine, key: &StoreKey) -> Arc<AsyncMutex<()>> {
	let mut guards = engine.flow_guards.lock();

	guards.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
}

/// Drops the map entry for `key` once no other caller holds or awaits `guard`.
pub(crate) fn release_flow_guard(
	engine: &ConnectionEngine,
	key: &StoreKey,
	guard: Arc<AsyncMutex<()>>,
) {
	let mut guards = engine.flow_guards.lock();

	// Clones are only taken under the map lock, so the count cannot grow here.
	if Arc::strong_count(&guard) == 2 {
		guards.remove(key);
	}
}
