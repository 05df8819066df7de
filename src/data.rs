//! Date windows, backfill options, and the lightly normalized records returned by adapters.
//!
//! Normalization stays shallow on purpose: every record keeps the provider payload it was built
//! from in `raw`, so callers needing vendor-specific fields never have to refetch.

// crates.io
use time::macros;
// self
use crate::{_prelude::*, error::ConfigError};

/// Window used when [`BackfillOptions::days_back`] is omitted.
pub const DEFAULT_BACKFILL_DAYS: u32 = 60;

/// Inclusive range of calendar dates (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
	/// First day of the range.
	pub start: Date,
	/// Last day of the range, inclusive.
	pub end: Date,
}
impl DateRange {
	/// Builds a range, rejecting `start > end`.
	pub fn new(start: Date, end: Date) -> Result<Self, ConfigError> {
		if start > end {
			return Err(ConfigError::InvalidDateRange { start, end });
		}

		Ok(Self { start, end })
	}

	/// Range covering a single day.
	pub fn day(date: Date) -> Self {
		Self { start: date, end: date }
	}

	/// Range ending at `end` and starting `days` earlier.
	pub fn last_days(days: u32, end: Date) -> Self {
		let start = end.saturating_sub(Duration::days(days.into()));

		Self { start, end }
	}

	/// Returns `true` when `date` falls inside the range.
	pub fn contains(&self, date: Date) -> bool {
		self.start <= date && date <= self.end
	}

	/// Number of calendar days covered, counting both ends.
	pub fn len_days(&self) -> i64 {
		(self.end - self.start).whole_days() + 1
	}

	/// Splits the range into consecutive windows spanning at most `max_days` days each.
	pub fn chunks(&self, max_days: u32) -> Vec<DateRange> {
		let span = Duration::days(i64::from(max_days.max(1)) - 1);
		let mut chunks = Vec::new();
		let mut cursor = self.start;

		loop {
			let end = cursor.saturating_add(span).min(self.end);

			chunks.push(Self { start: cursor, end });

			match end.next_day() {
				Some(next) if next <= self.end => cursor = next,
				_ => break,
			}
		}

		chunks
	}

	/// Unix timestamp of midnight UTC on the first day.
	pub fn start_timestamp(&self) -> i64 {
		self.start.midnight().assume_utc().unix_timestamp()
	}

	/// Unix timestamp of midnight UTC following the last day, so the final day is covered.
	pub fn end_timestamp(&self) -> i64 {
		self.end.saturating_add(Duration::DAY).midnight().assume_utc().unix_timestamp()
	}
}
impl Display for DateRange {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}..={}", self.start, self.end)
	}
}

/// Data families a provider can be asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
	/// Workouts and other recorded activities.
	Activities,
	/// Sleep sessions.
	Sleep,
	/// Per-day summaries.
	Dailies,
}
impl DataType {
	/// Every data type, in fetch order.
	pub const ALL: [DataType; 3] = [DataType::Activities, DataType::Sleep, DataType::Dailies];

	/// Stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			DataType::Activities => "activities",
			DataType::Sleep => "sleep",
			DataType::Dailies => "dailies",
		}
	}
}
impl Display for DataType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Activity or workout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedActivity {
	/// Provider-assigned identifier.
	pub id: String,
	/// Provider the record came from.
	pub provider: ProviderId,
	/// Normalized activity kind such as `run` or `bike`.
	#[serde(rename = "type")]
	pub kind: String,
	/// Start instant.
	#[serde(with = "time::serde::rfc3339")]
	pub start_time: OffsetDateTime,
	/// End instant.
	#[serde(with = "time::serde::rfc3339")]
	pub end_time: OffsetDateTime,
	/// Duration in seconds.
	pub duration_seconds: i64,
	/// Active calories.
	pub calories: Option<f64>,
	/// Distance in meters.
	pub distance_meters: Option<f64>,
	/// Step count.
	pub steps: Option<u64>,
	/// Average heart rate in beats per minute.
	pub average_heart_rate: Option<u32>,
	/// Maximum heart rate in beats per minute.
	pub max_heart_rate: Option<u32>,
	/// Device or app that recorded the activity.
	pub source: Option<String>,
	/// Original provider payload.
	pub raw: serde_json::Value,
}

/// One contiguous phase inside a sleep session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepStage {
	/// Normalized stage name: `deep`, `light`, `rem`, or `awake`.
	pub stage: String,
	/// Start instant.
	#[serde(with = "time::serde::rfc3339")]
	pub start_time: OffsetDateTime,
	/// End instant.
	#[serde(with = "time::serde::rfc3339")]
	pub end_time: OffsetDateTime,
	/// Duration in seconds.
	pub duration_seconds: i64,
}

/// Sleep session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSleep {
	/// Provider-assigned identifier.
	pub id: String,
	/// Provider the record came from.
	pub provider: ProviderId,
	/// Calendar date the provider files the session under.
	pub date: Date,
	/// Start instant.
	#[serde(with = "time::serde::rfc3339")]
	pub start_time: OffsetDateTime,
	/// End instant.
	#[serde(with = "time::serde::rfc3339")]
	pub end_time: OffsetDateTime,
	/// Total duration in seconds.
	pub duration_seconds: i64,
	/// Seconds spent in deep sleep.
	pub deep_sleep_seconds: Option<i64>,
	/// Seconds spent in light sleep.
	pub light_sleep_seconds: Option<i64>,
	/// Seconds spent in REM sleep.
	pub rem_sleep_seconds: Option<i64>,
	/// Seconds spent awake.
	pub awake_seconds: Option<i64>,
	/// Provider sleep score or efficiency.
	pub sleep_score: Option<u32>,
	/// Stages ordered by start time.
	pub stages: Option<Vec<SleepStage>>,
	/// Original provider payload.
	pub raw: serde_json::Value,
}

/// Per-day activity summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDaily {
	/// Provider-assigned (or derived) identifier.
	pub id: String,
	/// Provider the record came from.
	pub provider: ProviderId,
	/// Calendar date summarized.
	pub date: Date,
	/// Step count.
	pub steps: Option<u64>,
	/// Calories burned.
	pub calories: Option<f64>,
	/// Distance in meters.
	pub distance_meters: Option<f64>,
	/// Active minutes.
	pub active_minutes: Option<u32>,
	/// Resting heart rate in beats per minute.
	pub resting_heart_rate: Option<u32>,
	/// Average heart rate in beats per minute.
	pub average_heart_rate: Option<u32>,
	/// Maximum heart rate in beats per minute.
	pub max_heart_rate: Option<u32>,
	/// Average stress level.
	pub stress_level: Option<i32>,
	/// Floors climbed.
	pub floors_climbed: Option<u32>,
	/// Original provider payload.
	pub raw: serde_json::Value,
}

/// Options accepted by the backfill operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillOptions {
	/// Explicit first day; wins over `days_back`.
	pub start: Option<Date>,
	/// Explicit last day; defaults to today.
	pub end: Option<Date>,
	/// Window length used when `start` is absent (default 60).
	pub days_back: Option<u32>,
	/// Data types to fetch (default all three).
	pub data_types: Option<Vec<DataType>>,
}
impl BackfillOptions {
	/// Sets an explicit date range.
	pub fn range(mut self, range: DateRange) -> Self {
		self.start = Some(range.start);
		self.end = Some(range.end);

		self
	}

	/// Sets the window length used when no start date is given.
	pub fn days_back(mut self, days: u32) -> Self {
		self.days_back = Some(days);

		self
	}

	/// Restricts the fetch to the provided data types.
	pub fn data_types<I>(mut self, data_types: I) -> Self
	where
		I: IntoIterator<Item = DataType>,
	{
		self.data_types = Some(data_types.into_iter().collect());

		self
	}

	/// Resolves the effective range relative to `today`.
	pub fn resolve_range(&self, today: Date) -> Result<DateRange, ConfigError> {
		let end = self.end.unwrap_or(today);
		let start = match self.start {
			Some(start) => start,
			None => DateRange::last_days(self.days_back.unwrap_or(DEFAULT_BACKFILL_DAYS), end).start,
		};

		DateRange::new(start, end)
	}

	/// Returns `true` when `data_type` should be fetched.
	pub fn wants(&self, data_type: DataType) -> bool {
		match &self.data_types {
			Some(requested) => requested.contains(&data_type),
			None => true,
		}
	}
}

/// Aggregated output of a backfill; unrequested data types stay `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackfillResult {
	/// Range that was fetched.
	pub range: DateRange,
	/// Activities in the range.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub activities: Option<Vec<NormalizedActivity>>,
	/// Sleep sessions in the range.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sleep: Option<Vec<NormalizedSleep>>,
	/// Daily summaries in the range.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dailies: Option<Vec<NormalizedDaily>>,
}

/// Parses RFC 3339 timestamps, treating offset-less local times as UTC.
pub(crate) fn parse_provider_time(value: &str) -> Option<OffsetDateTime> {
	if let Ok(instant) =
		OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
	{
		return Some(instant);
	}

	time::PrimitiveDateTime::parse(
		value,
		macros::format_description!(
			"[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
		),
	)
	.ok()
	.map(time::PrimitiveDateTime::assume_utc)
}

pub(crate) fn de_provider_time<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let raw = String::deserialize(deserializer)?;

	parse_provider_time(&raw)
		.ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}
