//! Provider descriptor data shared by the engine and the adapters.
//!
//! A descriptor carries everything the OAuth side of the engine needs to know about a vendor:
//! HTTPS-only endpoints, the REST API base, the PKCE policy, how client credentials travel to the
//! token endpoint, and the default scopes.

/// Builder API for assembling provider descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::{_prelude::*, auth::ScopeSet, error::ConfigError};

/// How client credentials are transmitted to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	#[default]
	/// HTTP Basic with `client_id`/`client_secret`.
	Basic,
	/// Form body parameters `client_id`/`client_secret`.
	Body,
}

/// Whether the authorization flow uses PKCE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkceMode {
	/// Provider rejects flows without PKCE; callers cannot opt out.
	Required,
	#[default]
	/// PKCE is used unless the caller opts out.
	Enabled,
	/// PKCE is skipped unless the caller opts in.
	Disabled,
}
impl PkceMode {
	/// Resolves the effective policy given the caller's optional override.
	pub fn resolve(self, requested: Option<bool>) -> bool {
		match self {
			PkceMode::Required => true,
			PkceMode::Enabled => requested.unwrap_or(true),
			PkceMode::Disabled => requested.unwrap_or(false),
		}
	}
}

/// OAuth endpoints declared by a provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint users are redirected to.
	pub authorization: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token: Url,
}

/// Immutable provider descriptor consumed by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// OAuth endpoints.
	pub endpoints: ProviderEndpoints,
	/// Base URL of the provider's REST API; always ends with `/`.
	pub api_base: Url,
	/// PKCE policy.
	pub pkce: PkceMode,
	/// Client credential transmission mode.
	pub client_auth: ClientAuthMethod,
	/// Scopes requested when the caller configures none.
	pub default_scopes: ScopeSet,
	/// Character used to join scopes on the authorize URL.
	pub scope_delimiter: char,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Resolves `path` against [`api_base`](Self::api_base).
	///
	/// Leading slashes are ignored so paths stay relative to any prefix carried by the base.
	pub fn api_url(&self, path: &str) -> Result<Url, ConfigError> {
		self.api_base
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { name: "api", source })
	}
}
