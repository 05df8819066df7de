//! OAuth 2.0 connection engine for wearable providers - PKCE authorization URLs, single-use
//! callback state, proactive token refresh, and retrying data fetches behind one facade.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod pending;
pub mod provider;
pub mod sdk;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test` crate
	//! feature.

	pub use crate::_prelude::*;

	// std
	use std::time::Duration as StdDuration;
	// self
	use crate::{
		auth::ScopeSet,
		config::ProviderCredentials,
		flows::ConnectionEngine,
		http::{HttpTransport, ReqwestHttpClient, RetryPolicy, RetryingClient},
		pending::PendingStateRegistry,
		provider::{
			ClientAuthMethod, FITBIT, FitbitAdapter, GARMIN, GarminAdapter, PkceMode,
			ProviderAdapter, ProviderDescriptor, ProviderDescriptorBuilder,
		},
		sdk::{SdkBuilder, WearableSdk},
		store::{MemoryStore, TokenStore},
	};

	/// Client identifier used by test credentials.
	pub const TEST_CLIENT_ID: &str = "client-test";
	/// Client secret used by test credentials.
	pub const TEST_CLIENT_SECRET: &str = "secret-test";
	/// Redirect URI registered by test credentials.
	pub const TEST_REDIRECT_URI: &str = "https://app.example.com/callback";

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_transport() -> Arc<dyn HttpTransport> {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		Arc::new(ReqwestHttpClient::with_client(client))
	}

	/// Retry policy with zero backoff so retry tests stay fast.
	pub fn fast_retry_policy() -> RetryPolicy {
		RetryPolicy { retries: 3, backoff_base: StdDuration::ZERO, timeout: StdDuration::from_secs(5) }
	}

	/// Parses a URL fixture.
	pub fn url(value: &str) -> Url {
		Url::parse(value).expect("URL fixture should parse successfully.")
	}

	/// Descriptor builder pointing every endpoint at `base` (typically a mock server URL).
	pub fn mock_descriptor_builder(id: &str, base: &str) -> ProviderDescriptorBuilder {
		let provider = ProviderId::new(id).expect("Provider fixture should be valid.");
		let base = base.trim_end_matches('/');

		ProviderDescriptor::builder(provider)
			.authorization_endpoint(url(&format!("{base}/{id}/authorize")))
			.token_endpoint(url(&format!("{base}/{id}/token")))
			.api_base(url(&format!("{base}/")))
	}

	/// Descriptor mirroring a provider's credential mode and PKCE policy against a mock server.
	pub fn mock_descriptor(
		id: &str,
		base: &str,
		pkce: PkceMode,
		client_auth: ClientAuthMethod,
		scopes: &[&str],
	) -> ProviderDescriptor {
		mock_descriptor_builder(id, base)
			.pkce(pkce)
			.client_auth(client_auth)
			.default_scopes(
				ScopeSet::new(scopes.iter().copied()).expect("Scope fixture should be valid."),
			)
			.build()
			.expect("Mock descriptor should build successfully.")
	}

	/// Credentials shared by test engines.
	pub fn test_credentials() -> ProviderCredentials {
		ProviderCredentials::new(
			TEST_CLIENT_ID,
			TEST_CLIENT_SECRET,
			url(TEST_REDIRECT_URI),
		)
	}

	/// SDK builder registering Garmin and Fitbit adapters whose endpoints all point at `base`.
	pub fn mock_sdk_builder(base: &str) -> SdkBuilder {
		let garmin = mock_descriptor(
			GARMIN,
			base,
			PkceMode::Required,
			ClientAuthMethod::Body,
			&["WELLNESS_READ", "ACTIVITY_READ", "SLEEP_READ"],
		);
		let fitbit = mock_descriptor(
			FITBIT,
			base,
			PkceMode::Enabled,
			ClientAuthMethod::Basic,
			&["activity", "heartrate", "sleep", "profile"],
		);

		WearableSdk::builder()
			.transport(test_transport())
			.retry_policy(fast_retry_policy())
			.provider(Arc::new(GarminAdapter::with_descriptor(garmin)), test_credentials())
			.provider(Arc::new(FitbitAdapter::with_descriptor(fitbit)), test_credentials())
	}

	/// Builds a [`WearableSdk`] against `base` that persists into `store`.
	pub fn build_mock_sdk(base: &str, store: Arc<dyn TokenStore>) -> WearableSdk {
		mock_sdk_builder(base).store(store).build().expect("Mock SDK should build successfully.")
	}

	/// Builds a [`ConnectionEngine`] backed by an in-memory store and the test transport.
	pub fn build_test_engine(
		adapter: Arc<dyn ProviderAdapter>,
	) -> (ConnectionEngine, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn TokenStore> = store_backend.clone();
		let http = RetryingClient::new(
			adapter.descriptor().id.clone(),
			test_transport(),
			fast_retry_policy(),
		);
		let engine = ConnectionEngine::new(
			adapter,
			test_credentials(),
			store,
			Arc::new(PendingStateRegistry::default()),
			http,
		)
		.expect("Test engine should build successfully.");

		(engine, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Date, Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::{
		auth::{ProviderId, SubjectId},
		error::{Error, Result},
	};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
