//! Access-token reads and provider data fetches.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	data::{
		BackfillOptions, BackfillResult, DataType, DateRange, NormalizedActivity, NormalizedDaily,
		NormalizedSleep,
	},
	flows::{ConnectionEngine, common},
	obs::FlowKind,
	store::StoreKey,
};

impl ConnectionEngine {
	/// Returns a usable access token for `subject`, refreshing it first when it expires within
	/// five minutes.
	///
	/// Concurrent callers for the same subject share one refresh.
	pub async fn get_valid_access_token(&self, subject: &SubjectId) -> Result<TokenSecret> {
		common::observe(
			FlowKind::Fetch,
			self.provider(),
			"get_valid_access_token",
			self.valid_access_token(subject),
		)
		.await
	}

	/// Fetches normalized activities for `subject` inside `range`.
	pub async fn get_activities(
		&self,
		subject: &SubjectId,
		range: DateRange,
	) -> Result<Vec<NormalizedActivity>> {
		common::observe(FlowKind::Fetch, self.provider(), "get_activities", async move {
			let token = self.valid_access_token(subject).await?;

			self.adapter.fetch_activities(&self.http, token.expose(), range).await
		})
		.await
	}

	/// Fetches normalized sleep sessions for `subject` inside `range`.
	pub async fn get_sleep(
		&self,
		subject: &SubjectId,
		range: DateRange,
	) -> Result<Vec<NormalizedSleep>> {
		common::observe(FlowKind::Fetch, self.provider(), "get_sleep", async move {
			let token = self.valid_access_token(subject).await?;

			self.adapter.fetch_sleep(&self.http, token.expose(), range).await
		})
		.await
	}

	/// Fetches normalized daily summaries for `subject` inside `range`.
	pub async fn get_dailies(
		&self,
		subject: &SubjectId,
		range: DateRange,
	) -> Result<Vec<NormalizedDaily>> {
		common::observe(FlowKind::Fetch, self.provider(), "get_dailies", async move {
			let token = self.valid_access_token(subject).await?;

			self.adapter.fetch_dailies(&self.http, token.expose(), range).await
		})
		.await
	}

	/// Fetches every requested data type concurrently over the resolved window.
	///
	/// The call fails as a whole when any requested fetch fails.
	pub async fn backfill(
		&self,
		subject: &SubjectId,
		options: &BackfillOptions,
	) -> Result<BackfillResult> {
		common::observe(FlowKind::Backfill, self.provider(), "backfill", async move {
			let range = options.resolve_range(OffsetDateTime::now_utc().date())?;

			tracing::info!(subject = %subject, %range, "Starting backfill.");

			let (activities, sleep, dailies) = tokio::try_join!(
				async {
					if options.wants(DataType::Activities) {
						self.get_activities(subject, range).await.map(Some)
					} else {
						Ok(None)
					}
				},
				async {
					if options.wants(DataType::Sleep) {
						self.get_sleep(subject, range).await.map(Some)
					} else {
						Ok(None)
					}
				},
				async {
					if options.wants(DataType::Dailies) {
						self.get_dailies(subject, range).await.map(Some)
					} else {
						Ok(None)
					}
				},
			)?;

			Ok(BackfillResult { range, activities, sleep, dailies })
		})
		.await
	}

	async fn valid_access_token(&self, subject: &SubjectId) -> Result<TokenSecret> {
		let key = self.key(subject);
		let record = self.load(&key).await?;

		if !record.needs_refresh_at(OffsetDateTime::now_utc()) {
			return Ok(record.access_token);
		}

		let guard = common::flow_guard(self, &key);
		let result = self.refresh_if_stale(&key, subject, &guard).await;

		common::release_flow_guard(self, &key, guard);

		result
	}

	async fn refresh_if_stale(
		&self,
		key: &StoreKey,
		subject: &SubjectId,
		guard: &AsyncMutex<()>,
	) -> Result<TokenSecret> {
		let _singleflight = guard.lock().await;
		// Another caller may have refreshed while this one waited.
		let record = self.load(key).await?;

		if !record.needs_refresh_at(OffsetDateTime::now_utc()) {
			return Ok(record.access_token);
		}

		tracing::debug!(
			subject = %subject,
			expires_at = %record.expires_at,
			"Access token inside the refresh window."
		);

		Ok(self.rotate(key, record).await?.access_token)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use httpmock::prelude::*;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::TokenRecord,
		provider::{ClientAuthMethod, GarminAdapter, PkceMode, ProviderAdapter},
		store::{MemoryStore, StoreKey, TokenStore},
	};

	fn garmin_adapter(server: &MockServer) -> Arc<dyn ProviderAdapter> {
		Arc::new(GarminAdapter::with_descriptor(mock_descriptor(
			"garmin",
			&server.base_url(),
			PkceMode::Required,
			ClientAuthMethod::Body,
			&["WELLNESS_READ"],
		)))
	}

	fn subject() -> SubjectId {
		SubjectId::new("user-1").expect("Subject fixture should be valid.")
	}

	async fn seed(engine: &ConnectionEngine, store: &MemoryStore, expires_in: Duration) -> StoreKey {
		let key = StoreKey::new(subject(), engine.provider().clone());
		let record = TokenRecord::builder()
			.access_token("A0")
			.refresh_token("R0")
			.expires_in(expires_in)
			.build()
			.expect("Token fixture should build.");

		store.save(&key, record).await.expect("Seeding the store should succeed.");

		key
	}

	#[tokio::test]
	async fn concurrent_reads_share_one_refresh() {
		let server = MockServer::start_async().await;
		let token = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/garmin/token")
					.form_urlencoded_tuple("grant_type", "refresh_token")
					.form_urlencoded_tuple("refresh_token", "R0");
				then.status(200)
					.header("content-type", "application/json")
					.body(r#"{"access_token":"A1","token_type":"Bearer","expires_in":3600}"#);
			})
			.await;
		let (engine, store) = build_test_engine(garmin_adapter(&server));

		seed(&engine, &store, Duration::minutes(1)).await;

		let subject = subject();
		let (first, second) = tokio::join!(
			engine.get_valid_access_token(&subject),
			engine.get_valid_access_token(&subject)
		);

		token.assert_calls_async(1).await;

		assert_eq!(first.expect("First read should succeed.").expose(), "A1");
		assert_eq!(second.expect("Second read should succeed.").expose(), "A1");
		assert_eq!(engine.refresh_metrics().successes(), 1);
		assert!(engine.flow_guards.lock().is_empty(), "Idle refresh guards should be released.");
	}

	#[tokio::test]
	async fn fetch_uses_stored_token() {
		let server = MockServer::start_async().await;
		let dailies = server
			.mock_async(|when, then| {
				when.method(GET)
					.path("/wellness-api/rest/dailies")
					.header("authorization", "Bearer A0");
				then.status(200).header("content-type", "application/json").body("[]");
			})
			.await;
		let (engine, store) = build_test_engine(garmin_adapter(&server));

		seed(&engine, &store, Duration::hours(2)).await;

		let range = DateRange::last_days(1, OffsetDateTime::now_utc().date());
		let result =
			engine.get_dailies(&subject(), range).await.expect("Dailies fetch should succeed.");

		dailies.assert_async().await;

		assert!(result.is_empty());
	}

	#[tokio::test]
	async fn backfill_fetches_only_requested_types() {
		let server = MockServer::start_async().await;
		let activities = server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/activities");
				then.status(200).header("content-type", "application/json").body("[]");
			})
			.await;
		let sleeps = server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/sleeps");
				then.status(200).header("content-type", "application/json").body("[]");
			})
			.await;
		let (engine, store) = build_test_engine(garmin_adapter(&server));

		seed(&engine, &store, Duration::hours(2)).await;

		let options = BackfillOptions::default().days_back(7).data_types([DataType::Activities]);
		let result =
			engine.backfill(&subject(), &options).await.expect("Backfill should succeed.");

		activities.assert_async().await;
		sleeps.assert_calls_async(0).await;

		assert_eq!(result.range.len_days(), 8);
		assert_eq!(result.activities, Some(Vec::new()));
		assert!(result.sleep.is_none());
		assert!(result.dailies.is_none());
	}

	#[tokio::test]
	async fn backfill_fails_when_any_fetch_fails() {
		let server = MockServer::start_async().await;
		let _ok = server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/activities");
				then.status(200).header("content-type", "application/json").body("[]");
			})
			.await;
		let _limited = server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/sleeps");
				then.status(429).header("retry-after", "30").body("slow down");
			})
			.await;
		let (engine, store) = build_test_engine(garmin_adapter(&server));

		seed(&engine, &store, Duration::hours(2)).await;

		let options = BackfillOptions::default()
			.days_back(3)
			.data_types([DataType::Activities, DataType::Sleep]);
		let err = engine.backfill(&subject(), &options).await.expect_err("Backfill should fail.");

		assert!(matches!(err, Error::RateLimited { .. }));
		assert_eq!(err.retry_after(), Some(Duration::seconds(30)));
	}
}
