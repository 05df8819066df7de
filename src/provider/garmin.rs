//! Garmin Health (Wellness API) adapter: OAuth 2.0 with mandatory PKCE and body credentials.

// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	data::{DateRange, NormalizedActivity, NormalizedDaily, NormalizedSleep, SleepStage},
	error::ConfigError,
	http::RetryingClient,
	provider::{
		AdapterFuture, ClientAuthMethod, PkceMode, ProviderAdapter, ProviderDescriptor,
		adapter::normalize_all,
	},
};

/// Provider identifier.
pub const GARMIN: &str = "garmin";

const AUTHORIZE_URL: &str = "https://connect.garmin.com/oauth2Confirm";
const TOKEN_URL: &str = "https://diauth.garmin.com/di-oauth2-service/oauth/token";
const API_BASE: &str = "https://apis.garmin.com";
const DEFAULT_SCOPES: [&str; 3] = ["WELLNESS_READ", "ACTIVITY_READ", "SLEEP_READ"];
const USER_ID_PATH: &str = "wellness-api/rest/user/id";
const ACTIVITIES_PATH: &str = "wellness-api/rest/activities";
const SLEEPS_PATH: &str = "wellness-api/rest/sleeps";
const DAILIES_PATH: &str = "wellness-api/rest/dailies";

/// Garmin adapter.
#[derive(Clone, Debug)]
pub struct GarminAdapter {
	descriptor: ProviderDescriptor,
}
impl GarminAdapter {
	/// Adapter pointing at the production Garmin endpoints.
	pub fn new() -> Result<Self, ConfigError> {
		Ok(Self { descriptor: Self::production_descriptor()? })
	}

	/// Adapter using a caller-supplied descriptor (e.g. a proxy or a mock server).
	pub fn with_descriptor(descriptor: ProviderDescriptor) -> Self {
		Self { descriptor }
	}

	/// Descriptor for the production Garmin endpoints.
	pub fn production_descriptor() -> Result<ProviderDescriptor, ConfigError> {
		let parse = |name, value: &str| {
			Url::parse(value).map_err(|source| ConfigError::InvalidUrl { name, source })
		};

		Ok(ProviderDescriptor::builder(ProviderId::new(GARMIN)?)
			.authorization_endpoint(parse("authorization", AUTHORIZE_URL)?)
			.token_endpoint(parse("token", TOKEN_URL)?)
			.api_base(parse("api", API_BASE)?)
			.pkce(PkceMode::Required)
			.client_auth(ClientAuthMethod::Body)
			.default_scopes(ScopeSet::new(DEFAULT_SCOPES)?)
			.build()?)
	}

	fn window_url(&self, path: &str, range: DateRange) -> Result<Url> {
		let mut url = self.descriptor.api_url(path)?;

		url.query_pairs_mut()
			.append_pair("uploadStartTimeInSeconds", &range.start_timestamp().to_string())
			.append_pair("uploadEndTimeInSeconds", &range.end_timestamp().to_string());

		Ok(url)
	}

	async fn fetch_window(
		&self,
		http: &RetryingClient,
		access_token: &str,
		path: &str,
		range: DateRange,
	) -> Result<Vec<serde_json::Value>> {
		let url = self.window_url(path, range)?;
		let payloads: Option<Vec<serde_json::Value>> = http.get_json(url, access_token).await?;

		Ok(payloads.unwrap_or_default())
	}
}
impl ProviderAdapter for GarminAdapter {
	fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	fn fetch_user_id<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
	) -> AdapterFuture<'a, Option<String>> {
		Box::pin(async move {
			let url = self.descriptor.api_url(USER_ID_PATH)?;
			let identity: GarminUserId = http.get_json(url, access_token).await?;

			Ok(identity.user_id)
		})
	}

	fn fetch_activities<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedActivity>> {
		Box::pin(async move {
			let payloads = self.fetch_window(http, access_token, ACTIVITIES_PATH, range).await?;

			normalize_all(http, payloads, |raw: GarminActivity, value| {
				raw.normalize(&self.descriptor.id, value)
			})
		})
	}

	fn fetch_sleep<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedSleep>> {
		Box::pin(async move {
			let payloads = self.fetch_window(http, access_token, SLEEPS_PATH, range).await?;

			normalize_all(http, payloads, |raw: GarminSleep, value| {
				raw.normalize(&self.descriptor.id, value)
			})
		})
	}

	fn fetch_dailies<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedDaily>> {
		Box::pin(async move {
			let payloads = self.fetch_window(http, access_token, DAILIES_PATH, range).await?;

			normalize_all(http, payloads, |raw: GarminDaily, value| {
				raw.normalize(&self.descriptor.id, value)
			})
		})
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GarminUserId {
	user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GarminActivity {
	activity_id: serde_json::Number,
	#[serde(default)]
	activity_type: String,
	#[serde(with = "time::serde::timestamp")]
	start_time_in_seconds: OffsetDateTime,
	duration_in_seconds: i64,
	distance_in_meters: Option<f64>,
	active_kilocalories: Option<f64>,
	average_heart_rate_in_beats_per_minute: Option<u32>,
	max_heart_rate_in_beats_per_minute: Option<u32>,
	steps: Option<u64>,
	device_name: Option<String>,
}
impl GarminActivity {
	fn normalize(self, provider: &ProviderId, raw: serde_json::Value) -> NormalizedActivity {
		let start_time = self.start_time_in_seconds;

		NormalizedActivity {
			id: self.activity_id.to_string(),
			provider: provider.clone(),
			kind: map_activity_type(&self.activity_type),
			start_time,
			end_time: start_time.saturating_add(Duration::seconds(self.duration_in_seconds)),
			duration_seconds: self.duration_in_seconds,
			calories: self.active_kilocalories,
			distance_meters: self.distance_in_meters,
			steps: self.steps,
			average_heart_rate: self.average_heart_rate_in_beats_per_minute,
			max_heart_rate: self.max_heart_rate_in_beats_per_minute,
			source: Some(self.device_name.unwrap_or_else(|| GARMIN.into())),
			raw,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GarminSleep {
	summary_id: Option<String>,
	calendar_date: Date,
	#[serde(with = "time::serde::timestamp")]
	start_time_in_seconds: OffsetDateTime,
	duration_in_seconds: i64,
	deep_sleep_duration_in_seconds: Option<i64>,
	light_sleep_duration_in_seconds: Option<i64>,
	rem_sleep_in_seconds: Option<i64>,
	awake_duration_in_seconds: Option<i64>,
	sleep_levels_map: Option<BTreeMap<String, Vec<GarminSleepPeriod>>>,
	overall_sleep_score: Option<GarminSleepScore>,
}
impl GarminSleep {
	fn normalize(self, provider: &ProviderId, raw: serde_json::Value) -> NormalizedSleep {
		let mut stages = self
			.sleep_levels_map
			.unwrap_or_default()
			.into_iter()
			.flat_map(|(level, periods)| {
				let stage = map_sleep_stage(&level);

				periods.into_iter().map(move |period| SleepStage {
					stage: stage.clone(),
					start_time: period.start_time_in_seconds,
					end_time: period.end_time_in_seconds,
					duration_seconds: (period.end_time_in_seconds - period.start_time_in_seconds)
						.whole_seconds(),
				})
			})
			.collect::<Vec<_>>();

		stages.sort_by_key(|stage| stage.start_time);

		NormalizedSleep {
			id: self.summary_id.unwrap_or_else(|| self.calendar_date.to_string()),
			provider: provider.clone(),
			date: self.calendar_date,
			start_time: self.start_time_in_seconds,
			end_time: self
				.start_time_in_seconds
				.saturating_add(Duration::seconds(self.duration_in_seconds)),
			duration_seconds: self.duration_in_seconds,
			deep_sleep_seconds: self.deep_sleep_duration_in_seconds,
			light_sleep_seconds: self.light_sleep_duration_in_seconds,
			rem_sleep_seconds: self.rem_sleep_in_seconds,
			awake_seconds: self.awake_duration_in_seconds,
			sleep_score: self.overall_sleep_score.map(|score| score.value),
			stages: (!stages.is_empty()).then_some(stages),
			raw,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GarminSleepPeriod {
	#[serde(with = "time::serde::timestamp")]
	start_time_in_seconds: OffsetDateTime,
	#[serde(with = "time::serde::timestamp")]
	end_time_in_seconds: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct GarminSleepScore {
	value: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GarminDaily {
	summary_id: Option<String>,
	calendar_date: Date,
	steps: Option<u64>,
	distance_in_meters: Option<f64>,
	active_time_in_seconds: Option<f64>,
	active_kilocalories: Option<f64>,
	resting_heart_rate_in_beats_per_minute: Option<u32>,
	average_heart_rate_in_beats_per_minute: Option<u32>,
	max_heart_rate_in_beats_per_minute: Option<u32>,
	average_stress_level: Option<i32>,
	floors_climbed: Option<u32>,
}
impl GarminDaily {
	fn normalize(self, provider: &ProviderId, raw: serde_json::Value) -> NormalizedDaily {
		NormalizedDaily {
			id: self.summary_id.unwrap_or_else(|| self.calendar_date.to_string()),
			provider: provider.clone(),
			date: self.calendar_date,
			steps: self.steps,
			calories: self.active_kilocalories,
			distance_meters: self.distance_in_meters,
			active_minutes: self.active_time_in_seconds.map(|secs| (secs / 60.0).round() as u32),
			resting_heart_rate: self.resting_heart_rate_in_beats_per_minute,
			average_heart_rate: self.average_heart_rate_in_beats_per_minute,
			max_heart_rate: self.max_heart_rate_in_beats_per_minute,
			stress_level: self.average_stress_level,
			floors_climbed: self.floors_climbed,
			raw,
		}
	}
}

fn map_activity_type(garmin_type: &str) -> String {
	match garmin_type {
		"RUNNING" => "run",
		"CYCLING" => "bike",
		"SWIMMING" => "swim",
		"WALKING" => "walk",
		"HIKING" => "hike",
		"STRENGTH_TRAINING" => "strength",
		"YOGA" => "yoga",
		"INDOOR_CYCLING" => "bike_indoor",
		"TREADMILL_RUNNING" => "run_indoor",
		"ELLIPTICAL" => "elliptical",
		other => return other.to_lowercase(),
	}
	.into()
}

fn map_sleep_stage(level: &str) -> String {
	level.to_lowercase()
}

#[cfg(test)]
mod tests {
	// crates.io
	use httpmock::prelude::*;
	use time::macros::{date, datetime};
	// self
	use super::*;
	use crate::_preludet::*;

	fn adapter(server: &MockServer) -> GarminAdapter {
		GarminAdapter::with_descriptor(mock_descriptor(
			GARMIN,
			&server.base_url(),
			PkceMode::Required,
			ClientAuthMethod::Body,
			&DEFAULT_SCOPES,
		))
	}

	fn client() -> RetryingClient {
		RetryingClient::new(
			ProviderId::new(GARMIN).expect("Provider id should be valid."),
			test_transport(),
			fast_retry_policy(),
		)
	}

	fn range() -> DateRange {
		DateRange::new(date!(2024 - 01 - 01), date!(2024 - 01 - 02))
			.expect("Range fixture should be valid.")
	}

	#[test]
	fn production_descriptor_requires_pkce_and_body_credentials() {
		let descriptor =
			GarminAdapter::production_descriptor().expect("Production descriptor should build.");

		assert_eq!(descriptor.pkce, PkceMode::Required);
		assert_eq!(descriptor.client_auth, ClientAuthMethod::Body);
		assert!(descriptor.default_scopes.contains("WELLNESS_READ"));
		assert_eq!(descriptor.api_base.as_str(), "https://apis.garmin.com/");
	}

	#[test]
	fn activity_types_map_to_short_names() {
		assert_eq!(map_activity_type("TREADMILL_RUNNING"), "run_indoor");
		assert_eq!(map_activity_type("RUNNING"), "run");
		assert_eq!(map_activity_type("OPEN_WATER_SWIMMING"), "open_water_swimming");
	}

	#[tokio::test]
	async fn activities_use_upload_window_and_normalize() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(GET)
					.path("/wellness-api/rest/activities")
					.query_param("uploadStartTimeInSeconds", "1704067200")
					.query_param("uploadEndTimeInSeconds", "1704240000")
					.header("authorization", "Bearer garmin-token");
				then.status(200).header("content-type", "application/json").body(
					r#"[{"activityId":9001,"activityName":"Morning Run","activityType":"RUNNING","startTimeInSeconds":1704096000,"durationInSeconds":1800,"distanceInMeters":5000.5,"activeKilocalories":320,"averageHeartRateInBeatsPerMinute":150,"maxHeartRateInBeatsPerMinute":172,"steps":5400,"deviceName":null}]"#,
				);
			})
			.await;
		let activities = adapter(&server)
			.fetch_activities(&client(), "garmin-token", range())
			.await
			.expect("Activity fetch should succeed.");

		mock.assert_async().await;

		assert_eq!(activities.len(), 1);

		let run = &activities[0];

		assert_eq!(run.id, "9001");
		assert_eq!(run.kind, "run");
		assert_eq!(run.start_time, datetime!(2024-01-01 08:00 UTC));
		assert_eq!(run.end_time, datetime!(2024-01-01 08:30 UTC));
		assert_eq!(run.distance_meters, Some(5000.5));
		assert_eq!(run.source.as_deref(), Some("garmin"));
		assert_eq!(run.raw["activityName"], "Morning Run");
	}

	#[tokio::test]
	async fn sleep_stages_are_flattened_and_sorted() {
		let server = MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/sleeps");
				then.status(200).header("content-type", "application/json").body(
					r#"[{"summaryId":"s-1","calendarDate":"2024-01-02","startTimeInSeconds":1704146400,"durationInSeconds":28800,"deepSleepDurationInSeconds":3600,"lightSleepDurationInSeconds":18000,"remSleepInSeconds":5400,"awakeDurationInSeconds":1800,"sleepLevelsMap":{"light":[{"startTimeInSeconds":1704146400,"endTimeInSeconds":1704150000}],"deep":[{"startTimeInSeconds":1704150000,"endTimeInSeconds":1704153600}],"REM":[{"startTimeInSeconds":1704140000,"endTimeInSeconds":1704146400}]},"overallSleepScore":{"value":82,"qualifierKey":"GOOD"}}]"#,
				);
			})
			.await;

		let sleep = adapter(&server)
			.fetch_sleep(&client(), "garmin-token", range())
			.await
			.expect("Sleep fetch should succeed.");
		let session = &sleep[0];
		let stages = session.stages.as_ref().expect("Stages should be present.");

		assert_eq!(session.id, "s-1");
		assert_eq!(session.date, date!(2024 - 01 - 02));
		assert_eq!(session.sleep_score, Some(82));
		assert_eq!(
			stages.iter().map(|stage| stage.stage.as_str()).collect::<Vec<_>>(),
			["rem", "light", "deep"]
		);
		assert_eq!(stages[1].duration_seconds, 3600);
	}

	#[tokio::test]
	async fn dailies_round_active_minutes_and_tolerate_null_body() {
		let server = MockServer::start_async().await;
		let dailies = server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/dailies");
				then.status(200).header("content-type", "application/json").body(
					r#"[{"calendarDate":"2024-01-01","steps":10234,"activeTimeInSeconds":3690,"activeKilocalories":540.5,"averageStressLevel":31,"floorsClimbed":12}]"#,
				);
			})
			.await;
		let fetched = adapter(&server)
			.fetch_dailies(&client(), "garmin-token", range())
			.await
			.expect("Daily fetch should succeed.");

		assert_eq!(fetched[0].id, "2024-01-01");
		assert_eq!(fetched[0].active_minutes, Some(62));
		assert_eq!(fetched[0].steps, Some(10234));
		assert_eq!(fetched[0].stress_level, Some(31));

		dailies.delete_async().await;
		server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/dailies");
				then.status(200).header("content-type", "application/json").body("null");
			})
			.await;

		let empty = adapter(&server)
			.fetch_dailies(&client(), "garmin-token", range())
			.await
			.expect("Null payload should decode as empty.");

		assert!(empty.is_empty());
	}

	#[tokio::test]
	async fn user_id_lookup_and_malformed_payloads() {
		let server = MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/user/id");
				then.status(200)
					.header("content-type", "application/json")
					.body(r#"{"userId":"garmin-user-7"}"#);
			})
			.await;
		server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/activities");
				then.status(200)
					.header("content-type", "application/json")
					.body(r#"[{"activityId":1,"startTimeInSeconds":"soon","durationInSeconds":60}]"#);
			})
			.await;

		let adapter = adapter(&server);
		let user_id = adapter
			.fetch_user_id(&client(), "garmin-token")
			.await
			.expect("Identity lookup should succeed.");

		assert_eq!(user_id.as_deref(), Some("garmin-user-7"));

		let err = adapter
			.fetch_activities(&client(), "garmin-token", range())
			.await
			.expect_err("Malformed activity should be rejected.");

		match err {
			Error::MalformedResponse { source, .. } =>
				assert_eq!(source.path().to_string(), "startTimeInSeconds"),
			other => panic!("Unexpected error: {other:?}"),
		}
	}
}
