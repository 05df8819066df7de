//! Refresh-token rotation.
//!
//! [`ConnectionEngine::refresh`] always contacts the token endpoint; proactive refreshes issued by
//! [`ConnectionEngine::get_valid_access_token`] share the same rotation path under a per-subject
//! guard. Providers that omit `refresh_token` from a refresh response keep the previous one.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	flows::{ConnectionEngine, common},
	obs::FlowKind,
	store::StoreKey,
};

impl ConnectionEngine {
	/// Redeems the stored refresh token for `subject` and persists the new record.
	///
	/// Fails with [`Error::MissingToken`] when nothing is stored and with
	/// [`Error::TokenRefreshFailed`] when no refresh token exists or the grant is rejected.
	pub async fn refresh(&self, subject: &SubjectId) -> Result<TokenRecord> {
		common::observe(FlowKind::Refresh, self.provider(), "refresh", async move {
			let key = self.key(subject);
			let current = self.load(&key).await?;

			self.rotate(&key, current).await
		})
		.await
	}

	pub(crate) async fn load(&self, key: &StoreKey) -> Result<TokenRecord> {
		self.store.get(key).await?.ok_or_else(|| Error::MissingToken {
			provider: key.provider.clone(),
			subject: key.subject.clone(),
		})
	}

	pub(crate) async fn rotate(&self, key: &StoreKey, current: TokenRecord) -> Result<TokenRecord> {
		self.refresh_metrics.record_attempt();

		let result = self.rotate_inner(key, current).await;

		match &result {
			Ok(record) => {
				self.refresh_metrics.record_success();

				tracing::info!(
					subject = %key.subject,
					expires_at = %record.expires_at,
					"Access token refreshed."
				);
			},
			Err(e) => {
				self.refresh_metrics.record_failure();

				tracing::warn!(subject = %key.subject, error = %e, "Access token refresh failed.");
			},
		}

		result
	}

	async fn rotate_inner(&self, key: &StoreKey, current: TokenRecord) -> Result<TokenRecord> {
		let Some(previous) = current.refresh_token else {
			return Err(self.refresh_failed(key, None));
		};
		let refreshed = self
			.token_endpoint
			.refresh(previous.expose())
			.await
			.map_err(|e| self.refresh_failed(key, Some(e)))?
			.retain_refresh_token(Some(previous));

		self.store.save(key, refreshed.clone()).await?;

		Ok(refreshed)
	}

	fn refresh_failed(&self, key: &StoreKey, cause: Option<Error>) -> Error {
		Error::TokenRefreshFailed {
			provider: key.provider.clone(),
			subject: key.subject.clone(),
			source: cause.map(Box::new),
		}
	}
}
