//! Client credentials and SDK-wide settings.
//!
//! [`SdkConfig`] deserializes from any serde format with defaults for everything but the
//! provider credentials, or loads from the process environment via [`SdkConfig::from_env`].
//! A provider is configured only when its client id, secret, and redirect URI are all present.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	error::ConfigError,
	http::RetryPolicy,
	pending::DEFAULT_STATE_TTL,
};

const STATE_TTL_ENV: &str = "WEARABLE_STATE_TTL_SECS";
const HTTP_RETRIES_ENV: &str = "WEARABLE_HTTP_RETRIES";
const HTTP_BACKOFF_ENV: &str = "WEARABLE_HTTP_BACKOFF_MS";
const HTTP_TIMEOUT_ENV: &str = "WEARABLE_HTTP_TIMEOUT_MS";
const GARMIN_ENV: CredentialKeys = CredentialKeys {
	client_id: "GARMIN_CLIENT_ID",
	client_secret: "GARMIN_CLIENT_SECRET",
	redirect_uri: "GARMIN_REDIRECT_URI",
	scopes: "GARMIN_SCOPES",
	use_pkce: "GARMIN_USE_PKCE",
};
const FITBIT_ENV: CredentialKeys = CredentialKeys {
	client_id: "FITBIT_CLIENT_ID",
	client_secret: "FITBIT_CLIENT_SECRET",
	redirect_uri: "FITBIT_REDIRECT_URI",
	scopes: "FITBIT_SCOPES",
	use_pkce: "FITBIT_USE_PKCE",
};

/// OAuth client registration for one provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: TokenSecret,
	/// Redirect URI registered with the provider.
	pub redirect_uri: Url,
	/// Scope override; the provider defaults apply when absent.
	#[serde(default)]
	pub scopes: Option<ScopeSet>,
	/// PKCE override; ignored by providers that require PKCE.
	#[serde(default)]
	pub use_pkce: Option<bool>,
}
impl ProviderCredentials {
	/// Creates credentials using the provider's default scopes and PKCE policy.
	pub fn new(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		redirect_uri: Url,
	) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: TokenSecret::new(client_secret),
			redirect_uri,
			scopes: None,
			use_pkce: None,
		}
	}

	/// Overrides the requested scopes.
	pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = Some(scopes);

		self
	}

	/// Opts in to (or out of) PKCE where the provider allows a choice.
	pub fn with_pkce(mut self, use_pkce: bool) -> Self {
		self.use_pkce = Some(use_pkce);

		self
	}

	fn from_lookup<F>(keys: &CredentialKeys, lookup: &F) -> Result<Option<Self>, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let client_id = non_empty(lookup(keys.client_id));
		let client_secret = non_empty(lookup(keys.client_secret));
		let redirect_uri = non_empty(lookup(keys.redirect_uri));
		let (Some(client_id), Some(client_secret), Some(redirect_uri)) =
			(client_id, client_secret, redirect_uri)
		else {
			return Ok(None);
		};
		let redirect_uri = Url::parse(&redirect_uri)
			.map_err(|source| ConfigError::InvalidUrl { name: keys.redirect_uri, source })?;
		let mut credentials = Self::new(client_id, client_secret, redirect_uri);

		if let Some(raw) = non_empty(lookup(keys.scopes)) {
			credentials.scopes = Some(ScopeSet::new(
				raw.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()),
			)?);
		}
		if let Some(raw) = non_empty(lookup(keys.use_pkce)) {
			credentials.use_pkce = Some(parse_env(keys.use_pkce, &raw)?);
		}

		Ok(Some(credentials))
	}
}

/// SDK-wide configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
	/// Garmin credentials; Garmin is disabled when absent.
	pub garmin: Option<ProviderCredentials>,
	/// Fitbit credentials; Fitbit is disabled when absent.
	pub fitbit: Option<ProviderCredentials>,
	/// Lifetime of a pending authorization in seconds.
	pub state_ttl_secs: u64,
	/// Retry policy applied to every provider request.
	pub http: RetryPolicy,
}
impl SdkConfig {
	/// Pending-authorization lifetime as a [`Duration`].
	pub fn state_ttl(&self) -> Duration {
		Duration::seconds(i64::try_from(self.state_ttl_secs).unwrap_or(i64::MAX))
	}

	/// Loads configuration from the process environment.
	///
	/// Reads `GARMIN_*` and `FITBIT_*` (`CLIENT_ID`, `CLIENT_SECRET`, `REDIRECT_URI`, `SCOPES`,
	/// `USE_PKCE`), `WEARABLE_STATE_TTL_SECS`, and `WEARABLE_HTTP_{RETRIES,BACKOFF_MS,TIMEOUT_MS}`.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads configuration through an arbitrary key lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self {
			garmin: ProviderCredentials::from_lookup(&GARMIN_ENV, &lookup)?,
			fitbit: ProviderCredentials::from_lookup(&FITBIT_ENV, &lookup)?,
			..Self::default()
		};

		if let Some(raw) = non_empty(lookup(STATE_TTL_ENV)) {
			config.state_ttl_secs = parse_env(STATE_TTL_ENV, &raw)?;
		}
		if let Some(raw) = non_empty(lookup(HTTP_RETRIES_ENV)) {
			config.http.retries = parse_env(HTTP_RETRIES_ENV, &raw)?;
		}
		if let Some(raw) = non_empty(lookup(HTTP_BACKOFF_ENV)) {
			config.http.backoff_base =
				std::time::Duration::from_millis(parse_env(HTTP_BACKOFF_ENV, &raw)?);
		}
		if let Some(raw) = non_empty(lookup(HTTP_TIMEOUT_ENV)) {
			config.http.timeout =
				std::time::Duration::from_millis(parse_env(HTTP_TIMEOUT_ENV, &raw)?);
		}

		Ok(config)
	}
}
impl Default for SdkConfig {
	fn default() -> Self {
		Self {
			garmin: None,
			fitbit: None,
			state_ttl_secs: DEFAULT_STATE_TTL.whole_seconds().unsigned_abs(),
			http: RetryPolicy::default(),
		}
	}
}

struct CredentialKeys {
	client_id: &'static str,
	client_secret: &'static str,
	redirect_uri: &'static str,
	scopes: &'static str,
	use_pkce: &'static str,
}

fn non_empty(value: Option<String>) -> Option<String> {
	value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
	T: FromStr,
{
	raw.parse().map_err(|_| ConfigError::InvalidEnvValue { name, value: raw.to_owned() })
}
