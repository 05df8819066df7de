//! Per-provider connection engine.
//!
//! A [`ConnectionEngine`] owns the OAuth lifecycle for one provider: it issues authorization
//! URLs backed by single-use pending state, exchanges callback codes, keeps access tokens fresh,
//! and hands valid tokens to the provider adapter for data fetches. Operations live in the
//! submodules as `impl ConnectionEngine` blocks.

pub mod authorize;
pub mod connection;
pub mod fetch;
pub mod refresh;

mod common;

pub use authorize::*;
pub use refresh::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	config::ProviderCredentials,
	error::ConfigError,
	http::RetryingClient,
	oauth::TokenEndpoint,
	pending::PendingStore,
	provider::{ProviderAdapter, ProviderDescriptor},
	store::{StoreKey, TokenStore},
};

/// Drives the connection state machine for every subject of one provider.
///
/// The engine is cheap to clone and safe to share across tasks. Concurrent proactive refreshes
/// for the same subject are collapsed onto one in-process guard; cross-process consistency is the
/// [`TokenStore`]'s responsibility.
#[derive(Clone)]
pub struct ConnectionEngine {
	adapter: Arc<dyn ProviderAdapter>,
	credentials: ProviderCredentials,
	store: Arc<dyn TokenStore>,
	pending: Arc<dyn PendingStore>,
	http: RetryingClient,
	token_endpoint: TokenEndpoint,
	scopes: ScopeSet,
	use_pkce: bool,
	refresh_metrics: Arc<RefreshMetrics>,
	flow_guards: Arc<Mutex<HashMap<StoreKey, Arc<AsyncMutex<()>>>>>,
}
impl ConnectionEngine {
	/// Wires an adapter to its credentials, token store, pending-state store, and HTTP client.
	///
	/// Scopes default to the descriptor's when the credentials carry no override, and PKCE
	/// follows the descriptor's policy combined with the credentials' preference.
	pub fn new(
		adapter: Arc<dyn ProviderAdapter>,
		credentials: ProviderCredentials,
		store: Arc<dyn TokenStore>,
		pending: Arc<dyn PendingStore>,
		http: RetryingClient,
	) -> Result<Self, ConfigError> {
		let descriptor = adapter.descriptor();
		let token_endpoint = TokenEndpoint::new(descriptor, &credentials, http.clone())?;
		let scopes = credentials.scopes.clone().unwrap_or_else(|| descriptor.default_scopes.clone());
		let use_pkce = descriptor.pkce.resolve(credentials.use_pkce);

		Ok(Self {
			adapter,
			credentials,
			store,
			pending,
			http,
			token_endpoint,
			scopes,
			use_pkce,
			refresh_metrics: Default::default(),
			flow_guards: Default::default(),
		})
	}

	/// Provider this engine serves.
	pub fn provider(&self) -> &ProviderId {
		&self.adapter.descriptor().id
	}

	/// Descriptor of the wrapped adapter.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		self.adapter.descriptor()
	}

	/// Scopes requested on every authorization URL.
	pub fn scopes(&self) -> &ScopeSet {
		&self.scopes
	}

	/// Whether authorization URLs carry a PKCE challenge.
	pub fn uses_pkce(&self) -> bool {
		self.use_pkce
	}

	/// Refresh counters shared by explicit and proactive refreshes.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.refresh_metrics
	}

	fn key(&self, subject: &SubjectId) -> StoreKey {
		StoreKey::new(subject.clone(), self.provider().clone())
	}
}
impl Debug for ConnectionEngine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionEngine")
			.field("descriptor", self.descriptor())
			.field("client_id", &self.credentials.client_id)
			.field("redirect_uri", &self.credentials.redirect_uri)
			.field("scopes", &self.scopes)
			.field("use_pkce", &self.use_pkce)
			.field("retry_policy", self.http.policy())
			.finish()
	}
}
