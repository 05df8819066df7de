//! Capability contract every wearable provider implements.
//!
//! The engine is polymorphic over [`ProviderAdapter`]: it owns the OAuth lifecycle and hands
//! adapters nothing but a provider-scoped [`RetryingClient`] and a fresh access token. Adapters
//! own endpoint paths, query conventions, and payload normalization.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	data::{DateRange, NormalizedActivity, NormalizedDaily, NormalizedSleep},
	http::RetryingClient,
	provider::ProviderDescriptor,
};

/// Boxed future returned by [`ProviderAdapter`] operations.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Per-provider implementation of identity lookup and data fetches.
///
/// Every fetch receives a valid access token; refreshing is the engine's job. Failures propagate
/// unchanged and are not retried beyond what the [`RetryingClient`] already does.
pub trait ProviderAdapter
where
	Self: Send + Sync,
{
	/// Descriptor carrying endpoints, PKCE policy, credential mode, and default scopes.
	fn descriptor(&self) -> &ProviderDescriptor;

	/// Looks up the provider's identifier for the token owner, if the provider exposes one.
	fn fetch_user_id<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
	) -> AdapterFuture<'a, Option<String>>;

	/// Fetches activities recorded inside `range`.
	fn fetch_activities<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedActivity>>;

	/// Fetches sleep sessions inside `range`.
	fn fetch_sleep<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedSleep>>;

	/// Fetches daily summaries inside `range`.
	fn fetch_dailies<'a>(
		&'a self,
		http: &'a RetryingClient,
		access_token: &'a str,
		range: DateRange,
	) -> AdapterFuture<'a, Vec<NormalizedDaily>>;
}

/// Decodes every raw payload into `T` and normalizes it, keeping the raw value alongside.
pub(crate) fn normalize_all<T, R, F>(
	http: &RetryingClient,
	payloads: Vec<serde_json::Value>,
	mut normalize: F,
) -> Result<Vec<R>>
where
	T: DeserializeOwned,
	F: FnMut(T, serde_json::Value) -> R,
{
	payloads
		.into_iter()
		.map(|raw| {
			let parsed = http.decode_value::<T>(raw.clone())?;

			Ok(normalize(parsed, raw))
		})
		.collect()
}
