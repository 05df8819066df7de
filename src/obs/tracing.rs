// self
use crate::{_prelude::*, obs::FlowKind};

/// Future wrapped in a flow span.
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;

/// Span attached to one engine operation.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a span tagged with the flow kind, provider, and call-site stage.
	pub fn new(kind: FlowKind, provider: &ProviderId, stage: &'static str) -> Self {
		let span = tracing::info_span!(
			"wearable_sdk.flow",
			flow = kind.as_str(),
			provider = %provider,
			stage
		);

		Self { span }
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> FlowSpanGuard {
		FlowSpanGuard { _guard: self.span.entered() }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

/// RAII guard returned by [`FlowSpan::entered`].
pub struct FlowSpanGuard {
	_guard: tracing::span::EnteredSpan,
}
impl Debug for FlowSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FlowSpanGuard(..)")
	}
}
