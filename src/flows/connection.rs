//! Connection health and disconnect.

// self
use crate::{
	_prelude::*,
	auth::ConnectionHealth,
	flows::{ConnectionEngine, common},
	obs::FlowKind,
};

impl ConnectionEngine {
	/// Derives the connection health for `subject` from the stored record.
	pub async fn connection_health(&self, subject: &SubjectId) -> Result<ConnectionHealth> {
		common::observe(FlowKind::Health, self.provider(), "connection_health", async move {
			let record = self.store.get(&self.key(subject)).await?;

			Ok(ConnectionHealth::evaluate(
				self.provider().clone(),
				subject.clone(),
				record.as_ref(),
				OffsetDateTime::now_utc(),
			))
		})
		.await
	}

	/// Deletes the stored tokens for `subject`. Disconnecting an unknown subject succeeds.
	pub async fn disconnect(&self, subject: &SubjectId) -> Result<()> {
		common::observe(FlowKind::Disconnect, self.provider(), "disconnect", async move {
			self.store.delete(&self.key(subject)).await?;

			tracing::info!(subject = %subject, "Provider connection removed.");

			Ok(())
		})
		.await
	}
}
