//! Multi-provider facade.
//!
//! [`WearableSdk`] maps provider identifiers onto [`ConnectionEngine`]s built once at startup and
//! delegates every call to the resolved engine. Requests naming a provider without an engine fail
//! with [`Error::ProviderNotConfigured`]. Aggregate operations walk the configured providers
//! sequentially and report per-provider outcomes instead of aborting on the first failure.

// self
use crate::{
	_prelude::*,
	auth::{ConnectionHealth, TokenRecord, TokenSecret},
	config::{ProviderCredentials, SdkConfig},
	data::{
		BackfillOptions, BackfillResult, DateRange, NormalizedActivity, NormalizedDaily,
		NormalizedSleep,
	},
	error::ConfigError,
	flows::{AuthorizationUrl, ConnectionEngine, ConnectionResult},
	http::{HttpTransport, RetryPolicy, RetryingClient},
	pending::{DEFAULT_STATE_TTL, PendingStateRegistry},
	provider::{FitbitAdapter, GarminAdapter, ProviderAdapter},
	store::{MemoryStore, TokenStore},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Facade over every configured provider engine.
#[derive(Clone, Debug)]
pub struct WearableSdk {
	engines: BTreeMap<ProviderId, ConnectionEngine>,
	pending: Arc<PendingStateRegistry>,
}
impl WearableSdk {
	/// Returns a builder for programmatic assembly.
	pub fn builder() -> SdkBuilder {
		SdkBuilder::default()
	}

	/// Builds the facade from configuration with the default store and transport.
	pub fn from_config(config: SdkConfig) -> Result<Self, ConfigError> {
		SdkBuilder::from_config(config)?.build()
	}

	/// Returns the engine registered for `provider`.
	pub fn resolve(&self, provider: &str) -> Result<&ConnectionEngine> {
		self.engines
			.get(provider)
			.ok_or_else(|| Error::ProviderNotConfigured { provider: provider.to_owned() })
	}

	/// Identifiers of every configured provider in stable order.
	pub fn configured_providers(&self) -> impl Iterator<Item = &ProviderId> {
		self.engines.keys()
	}

	/// Number of authorizations issued but not yet consumed or pruned.
	pub fn pending_authorizations(&self) -> usize {
		self.pending.len()
	}

	/// Issues an authorize URL for `subject` on `provider`.
	pub fn authorization_url(&self, provider: &str, subject: &str) -> Result<AuthorizationUrl> {
		let engine = self.resolve(provider)?;

		Ok(engine.build_authorization_url(subject_id(subject)?))
	}

	/// Completes an authorization on `provider`.
	pub async fn handle_callback(
		&self,
		provider: &str,
		code: &str,
		request_id: &str,
	) -> Result<ConnectionResult> {
		self.resolve(provider)?.handle_callback(code, request_id).await
	}

	/// Forces a refresh grant for `subject` on `provider`.
	pub async fn refresh_token(&self, provider: &str, subject: &str) -> Result<TokenRecord> {
		self.resolve(provider)?.refresh(&subject_id(subject)?).await
	}

	/// Returns a fresh access token for `subject` on `provider`.
	pub async fn get_valid_access_token(&self, provider: &str, subject: &str) -> Result<TokenSecret> {
		self.resolve(provider)?.get_valid_access_token(&subject_id(subject)?).await
	}

	/// Fetches activities for `subject` on `provider`.
	pub async fn get_activities(
		&self,
		provider: &str,
		subject: &str,
		range: DateRange,
	) -> Result<Vec<NormalizedActivity>> {
		self.resolve(provider)?.get_activities(&subject_id(subject)?, range).await
	}

	/// Fetches sleep sessions for `subject` on `provider`.
	pub async fn get_sleep(
		&self,
		provider: &str,
		subject: &str,
		range: DateRange,
	) -> Result<Vec<NormalizedSleep>> {
		self.resolve(provider)?.get_sleep(&subject_id(subject)?, range).await
	}

	/// Fetches daily summaries for `subject` on `provider`.
	pub async fn get_dailies(
		&self,
		provider: &str,
		subject: &str,
		range: DateRange,
	) -> Result<Vec<NormalizedDaily>> {
		self.resolve(provider)?.get_dailies(&subject_id(subject)?, range).await
	}

	/// Fetches the requested data types for `subject` on `provider` concurrently.
	pub async fn backfill(
		&self,
		provider: &str,
		subject: &str,
		options: &BackfillOptions,
	) -> Result<BackfillResult> {
		self.resolve(provider)?.backfill(&subject_id(subject)?, options).await
	}

	/// Health of `subject`'s connection to `provider`.
	pub async fn connection_health(&self, provider: &str, subject: &str) -> Result<ConnectionHealth> {
		self.resolve(provider)?.connection_health(&subject_id(subject)?).await
	}

	/// Health of `subject` on every configured provider.
	///
	/// A provider whose check fails is reported as disconnected, carrying the failure message.
	pub async fn health_for_all_providers(&self, subject: &str) -> Result<Vec<ConnectionHealth>> {
		let subject = subject_id(subject)?;
		let mut report = Vec::with_capacity(self.engines.len());

		for (provider, engine) in &self.engines {
			let health = match engine.connection_health(&subject).await {
				Ok(health) => health,
				Err(e) => {
					tracing::warn!(
						provider = %provider,
						subject = %subject,
						error = %e,
						"Health check failed; reporting the provider as disconnected."
					);

					ConnectionHealth::disconnected(provider.clone(), subject.clone(), Some(e.to_string()))
				},
			};

			report.push(health);
		}

		Ok(report)
	}

	/// Removes `subject`'s tokens for `provider`.
	pub async fn disconnect(&self, provider: &str, subject: &str) -> Result<()> {
		self.resolve(provider)?.disconnect(&subject_id(subject)?).await
	}

	/// Removes `subject`'s tokens on every configured provider.
	///
	/// Every provider is attempted; the returned map holds each provider's outcome.
	pub async fn disconnect_from_all_providers(
		&self,
		subject: &str,
	) -> Result<BTreeMap<ProviderId, Result<()>>> {
		let subject = subject_id(subject)?;
		let mut outcomes = BTreeMap::new();

		for (provider, engine) in &self.engines {
			outcomes.insert(provider.clone(), engine.disconnect(&subject).await);
		}

		Ok(outcomes)
	}
}

/// Programmatic [`WearableSdk`] assembly.
pub struct SdkBuilder {
	store: Option<Arc<dyn TokenStore>>,
	transport: Option<Arc<dyn HttpTransport>>,
	retry_policy: RetryPolicy,
	state_ttl: Duration,
	providers: Vec<(Arc<dyn ProviderAdapter>, ProviderCredentials)>,
}
impl SdkBuilder {
	/// Seeds a builder with the configured providers, retry policy, and pending-state TTL.
	pub fn from_config(config: SdkConfig) -> Result<Self, ConfigError> {
		let mut builder =
			Self::default().retry_policy(config.http.clone()).state_ttl(config.state_ttl());

		if let Some(credentials) = config.garmin {
			builder = builder.provider(Arc::new(GarminAdapter::new()?), credentials);
		}
		if let Some(credentials) = config.fitbit {
			builder = builder.provider(Arc::new(FitbitAdapter::new()?), credentials);
		}

		Ok(builder)
	}

	/// Uses `store` for token persistence instead of the in-memory default.
	pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Uses `transport` for every provider request.
	pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);

		self
	}

	/// Overrides the retry policy shared by all providers.
	pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;

		self
	}

	/// Overrides the pending-authorization lifetime.
	pub fn state_ttl(mut self, ttl: Duration) -> Self {
		self.state_ttl = ttl;

		self
	}

	/// Registers an adapter with its credentials.
	pub fn provider(
		mut self,
		adapter: Arc<dyn ProviderAdapter>,
		credentials: ProviderCredentials,
	) -> Self {
		self.providers.push((adapter, credentials));

		self
	}

	/// Builds one engine per registered provider.
	///
	/// Every engine shares the token store and one pending-state registry.
	pub fn build(self) -> Result<WearableSdk, ConfigError> {
		let transport = match self.transport {
			Some(transport) => transport,
			None => default_transport()?,
		};
		let store = self.store.unwrap_or_else(|| {
			tracing::warn!("No token store configured; tokens will not survive a restart.");

			Arc::new(MemoryStore::default())
		});
		let pending = Arc::new(PendingStateRegistry::new(self.state_ttl));
		let mut engines = BTreeMap::new();

		for (adapter, credentials) in self.providers {
			let provider = adapter.descriptor().id.clone();

			if engines.contains_key(&provider) {
				return Err(ConfigError::DuplicateProvider { provider });
			}

			let http =
				RetryingClient::new(provider.clone(), transport.clone(), self.retry_policy.clone());
			let engine =
				ConnectionEngine::new(adapter, credentials, store.clone(), pending.clone(), http)?;

			tracing::debug!(provider = %provider, pkce = engine.uses_pkce(), "Provider registered.");
			engines.insert(provider, engine);
		}

		Ok(WearableSdk { engines, pending })
	}
}
impl Default for SdkBuilder {
	fn default() -> Self {
		Self {
			store: None,
			transport: None,
			retry_policy: RetryPolicy::default(),
			state_ttl: DEFAULT_STATE_TTL,
			providers: Vec::new(),
		}
	}
}
impl Debug for SdkBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SdkBuilder")
			.field("store_set", &self.store.is_some())
			.field("transport_set", &self.transport.is_some())
			.field("retry_policy", &self.retry_policy)
			.field("state_ttl", &self.state_ttl)
			.field(
				"providers",
				&self.providers.iter().map(|(adapter, _)| &adapter.descriptor().id).collect::<Vec<_>>(),
			)
			.finish()
	}
}

fn subject_id(subject: &str) -> Result<SubjectId, ConfigError> {
	Ok(SubjectId::new(subject)?)
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn HttpTransport>, ConfigError> {
	Ok(Arc::new(ReqwestHttpClient::default()))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn HttpTransport>, ConfigError> {
	Err(ConfigError::MissingTransport)
}
