//! Fitbit Web API adapter: OAuth 2.0 with optional PKCE and HTTP Basic credentials.
//!
//! Dailies have no single Fitbit endpoint, so they are merged per date from the steps, calories,
//! distance, and heart-rate time series.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	data::{self, DateRange, NormalizedActivity, NormalizedDaily, NormalizedSleep, SleepStage},
	error::ConfigError,
	http::RetryingClient,
	provider::{
		AdapterFuture, ClientAuthMethod, PkceMode, ProviderAdapter, ProviderDescriptor,
		adapter::normalize_all,
	},
};

/// Provider identifier.
pub const FITBIT: &str = "fitbit";
/// Longest window the sleep range endpoint accepts.
pub const SLEEP_RANGE_MAX_DAYS: u32 = 100;

const AUTHORIZE_URL: &str = "https://www.fitbit.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";
const API_BASE: &str = "https://api.fitbit.com";
const DEFAULT_SCOPES: [&str; 4] = ["activity", "heartrate", "sleep", "profile"];
const PROFILE_PATH: &str = "1/user/-/profile.json";
const ACTIVITY_LIST_PATH: &str = "1/user/-/activities/list.json";
const ACTIVITY_LIST_LIMIT: &str = "100";

/// Fitbit adapter.
#[derive(Clone, Debug)]
pub struct FitbitAdapter {
	descriptor: ProviderDescriptor,
}
impl FitbitAdapter {
	/// Adapter pointing at the production Fitbit endpoints.
	pub fn new() -> Result<Self, ConfigError> {
		Ok(Self { descriptor: Self::production_descriptor()? })
	}

	/// Adapter using a caller-supplied descriptor (e.g. a proxy or a mock server).
	pub fn with_descriptor(descriptor: ProviderDescriptor) -> Self {
		Self { descriptor }
	}

	/// Descriptor for the production Fitbit endpoints.
	///
	/// Fitbit accepts flows without PKCE, but the adapter opts in unless the caller disables it.
	pub fn production_descriptor() -> Result<ProviderDescriptor, ConfigError> {
		let parse = |name, value: &str| {
			Url::parse(value).map_err(|source| ConfigError::InvalidUrl { name, source })
		};

		Ok(ProviderDescriptor::builder(ProviderId::new(FITBIT)?)
			.authorization_endpoint(parse("authorization", AUTHORIZE_URL)?)
			.token_endpoint(parse("token", TOKEN_URL)?)
			.api_base(parse("api", API_BASE)?)
			.pkce(PkceMode::Enabled)
			.client_auth(ClientAuthMethod::Basic)
			.default_scopes(ScopeSet::new(DEFAULT_SCOPES)?)
			.build()?)
	}

	async fn series<T>(
		&self,
		http: &RetryingClient,
		access_token: &str,
		resource: &str,
		range: DateRange,
	) -> Result<Vec<T>>
	where
		T: DeserializeOwned,
	{
		let url = self.descriptor.api_url(&format!(
			"1/user/-/activities/{resource}/date/{}/{}.json",
			range.start, range.end
		))?;
		let mut body: BTreeMap<String, serde_json::Value> = http.get_json(url, access_token).await?;

		match body.remove(&format!("activities-{resource}")) {
			Some(entries) => http.decode_value(entries),
			None => Ok(Vec::new()),
		}
	}
}
impl ProviderAdapter for FitbitAdapter {
	fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	fn fetch_user_id<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
	) -> AdapterFuture<'a, Option<String>> {
		Box::pin(async move {
			let url = self.descriptor.api_url(PROFILE_PATH)?;
			let profile: FitbitProfile = http.get_json(url, access_token).await?;

			Ok(profile.user.and_then(|user| user.encoded_id))
		})
	}

	fn fetch_activities<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedActivity>> {
		Box::pin(async move {
			let mut url = self.descriptor.api_url(ACTIVITY_LIST_PATH)?;

			url.query_pairs_mut()
				.append_pair("afterDate", &range.start.to_string())
				.append_pair("sort", "asc")
				.append_pair("offset", "0")
				.append_pair("limit", ACTIVITY_LIST_LIMIT);

			let list: FitbitActivityList = http.get_json(url, access_token).await?;
			let activities = normalize_all(http, list.activities, |raw: FitbitActivity, value| {
				(raw.start_time.date(), raw.normalize(&self.descriptor.id, value))
			})?;

			Ok(activities
				.into_iter()
				.filter(|(date, _)| range.contains(*date))
				.map(|(_, activity)| activity)
				.collect())
		})
	}

	fn fetch_sleep<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedSleep>> {
		Box::pin(async move {
			let mut sessions = Vec::new();

			for window in range.chunks(SLEEP_RANGE_MAX_DAYS) {
				let url = self.descriptor.api_url(&format!(
					"1.2/user/-/sleep/date/{}/{}.json",
					window.start, window.end
				))?;
				let log: FitbitSleepLog = http.get_json(url, access_token).await?;

				sessions.extend(normalize_all(http, log.sleep, |raw: FitbitSleep, value| {
					raw.normalize(&self.descriptor.id, value)
				})?);
			}

			Ok(sessions)
		})
	}

	fn fetch_dailies<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedDaily>> {
		Box::pin(async move {
			let (steps, calories, distance, heart) = tokio::try_join!(
				self.series::<FitbitSeriesEntry>(http, access_token, "steps", range),
				self.series::<FitbitSeriesEntry>(http, access_token, "calories", range),
				self.series::<FitbitSeriesEntry>(http, access_token, "distance", range),
				self.series::<FitbitHeartEntry>(http, access_token, "heart", range),
			)?;
			let mut days = BTreeMap::<Date, DailyParts>::new();

			for entry in steps {
				days.entry(entry.date_time).or_default().steps =
					entry.value.parse::<u64>().ok().filter(|steps| *steps > 0);
			}
			for entry in calories {
				days.entry(entry.date_time).or_default().calories =
					parse_nonzero(&entry.value).map(f64::trunc);
			}
			for entry in distance {
				days.entry(entry.date_time).or_default().distance_meters =
					parse_nonzero(&entry.value).map(|km| km * 1000.);
			}
			for entry in heart {
				days.entry(entry.date_time).or_default().resting_heart_rate =
					entry.value.resting_heart_rate;
			}

			Ok(days
				.into_iter()
				.map(|(date, parts)| parts.into_daily(&self.descriptor.id, date))
				.collect())
		})
	}
}

#[derive(Debug, Deserialize)]
struct FitbitProfile {
	user: Option<FitbitUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitUser {
	encoded_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FitbitActivityList {
	#[serde(default)]
	activities: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitActivity {
	log_id: serde_json::Number,
	#[serde(default)]
	activity_name: String,
	#[serde(deserialize_with = "data::de_provider_time")]
	start_time: OffsetDateTime,
	duration: i64,
	active_duration: Option<i64>,
	calories: Option<f64>,
	distance: Option<f64>,
	steps: Option<u64>,
	average_heart_rate: Option<u32>,
	source: Option<FitbitSource>,
}
impl FitbitActivity {
	fn normalize(self, provider: &ProviderId, raw: serde_json::Value) -> NormalizedActivity {
		let duration_ms = self.active_duration.unwrap_or(self.duration);
		let start_time = self.start_time.to_offset(time::UtcOffset::UTC);

		NormalizedActivity {
			id: self.log_id.to_string(),
			provider: provider.clone(),
			kind: map_activity_type(&self.activity_name),
			start_time,
			end_time: start_time.saturating_add(Duration::milliseconds(duration_ms)),
			duration_seconds: (duration_ms as f64 / 1000.).round() as i64,
			calories: self.calories,
			distance_meters: self.distance.filter(|km| *km != 0.).map(|km| km * 1000.),
			steps: self.steps,
			average_heart_rate: self.average_heart_rate,
			max_heart_rate: None,
			source: Some(
				self.source.and_then(|source| source.name).unwrap_or_else(|| FITBIT.into()),
			),
			raw,
		}
	}
}

#[derive(Debug, Deserialize)]
struct FitbitSource {
	name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FitbitSleepLog {
	#[serde(default)]
	sleep: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitSleep {
	log_id: serde_json::Number,
	date_of_sleep: Date,
	#[serde(deserialize_with = "data::de_provider_time")]
	start_time: OffsetDateTime,
	#[serde(deserialize_with = "data::de_provider_time")]
	end_time: OffsetDateTime,
	duration: i64,
	efficiency: Option<u32>,
	levels: Option<FitbitSleepLevels>,
}
impl FitbitSleep {
	fn normalize(self, provider: &ProviderId, raw: serde_json::Value) -> NormalizedSleep {
		let levels = self.levels.unwrap_or_default();
		let summary = levels.summary.unwrap_or_default();
		let seconds = |stage: Option<FitbitStageSummary>| stage.map(|stage| stage.minutes * 60);
		let stages = levels
			.data
			.into_iter()
			.map(|entry| SleepStage {
				stage: map_sleep_stage(&entry.level),
				start_time: entry.date_time,
				end_time: entry.date_time.saturating_add(Duration::seconds(entry.seconds)),
				duration_seconds: entry.seconds,
			})
			.collect::<Vec<_>>();

		NormalizedSleep {
			id: self.log_id.to_string(),
			provider: provider.clone(),
			date: self.date_of_sleep,
			start_time: self.start_time,
			end_time: self.end_time,
			duration_seconds: (self.duration as f64 / 1000.).round() as i64,
			deep_sleep_seconds: seconds(summary.deep),
			light_sleep_seconds: seconds(summary.light),
			rem_sleep_seconds: seconds(summary.rem),
			awake_seconds: seconds(summary.wake),
			sleep_score: self.efficiency,
			stages: (!stages.is_empty()).then_some(stages),
			raw,
		}
	}
}

#[derive(Debug, Default, Deserialize)]
struct FitbitSleepLevels {
	summary: Option<FitbitSleepSummary>,
	#[serde(default)]
	data: Vec<FitbitSleepEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct FitbitSleepSummary {
	deep: Option<FitbitStageSummary>,
	light: Option<FitbitStageSummary>,
	rem: Option<FitbitStageSummary>,
	wake: Option<FitbitStageSummary>,
}

#[derive(Debug, Deserialize)]
struct FitbitStageSummary {
	minutes: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitSleepEntry {
	#[serde(deserialize_with = "data::de_provider_time")]
	date_time: OffsetDateTime,
	level: String,
	seconds: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitSeriesEntry {
	date_time: Date,
	value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitHeartEntry {
	date_time: Date,
	value: FitbitHeartValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitHeartValue {
	resting_heart_rate: Option<u32>,
}

#[derive(Debug, Default)]
struct DailyParts {
	steps: Option<u64>,
	calories: Option<f64>,
	distance_meters: Option<f64>,
	resting_heart_rate: Option<u32>,
}
impl DailyParts {
	fn into_daily(self, provider: &ProviderId, date: Date) -> NormalizedDaily {
		let raw = serde_json::json!({
			"steps": self.steps,
			"calories": self.calories,
			"distanceMeters": self.distance_meters,
			"restingHeartRate": self.resting_heart_rate,
		});

		NormalizedDaily {
			id: format!("{FITBIT}-daily-{date}"),
			provider: provider.clone(),
			date,
			steps: self.steps,
			calories: self.calories,
			distance_meters: self.distance_meters,
			active_minutes: None,
			resting_heart_rate: self.resting_heart_rate,
			average_heart_rate: None,
			max_heart_rate: None,
			stress_level: None,
			floors_climbed: None,
			raw,
		}
	}
}

fn parse_nonzero(value: &str) -> Option<f64> {
	value.parse::<f64>().ok().filter(|parsed| parsed.is_finite() && *parsed != 0.)
}

fn map_activity_type(name: &str) -> String {
	let lower = name.to_lowercase();
	let kind = if lower.contains("run") {
		"run"
	} else if lower.contains("walk") {
		"walk"
	} else if lower.contains("bike") || lower.contains("cycl") {
		"bike"
	} else if lower.contains("swim") {
		"swim"
	} else if lower.contains("yoga") {
		"yoga"
	} else if lower.contains("hik") {
		"hike"
	} else if lower.contains("weight") || lower.contains("strength") {
		"strength"
	} else if lower.contains("elliptical") {
		"elliptical"
	} else {
		return lower.split_whitespace().collect::<Vec<_>>().join("_");
	};

	kind.into()
}

fn map_sleep_stage(level: &str) -> String {
	let lower = level.to_lowercase();

	match lower.as_str() {
		"wake" | "awake" => "awake".into(),
		"restless" | "asleep" => "light".into(),
		_ => lower,
	}
}
