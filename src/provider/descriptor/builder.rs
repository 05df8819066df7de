// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	provider::{ClientAuthMethod, PkceMode, ProviderDescriptor, ProviderEndpoints},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is required.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// API base is required for data fetches.
	#[error("Missing API base URL.")]
	MissingApiBase,
	/// Endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Reject scope delimiters that are control characters.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Identifier for the descriptor being constructed.
	pub id: ProviderId,
	/// Authorization endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint used for exchanges and refreshes.
	pub token_endpoint: Option<Url>,
	/// REST API base.
	pub api_base: Option<Url>,
	/// PKCE policy.
	pub pkce: PkceMode,
	/// Client authentication method for the token endpoint.
	pub client_auth: ClientAuthMethod,
	/// Default scopes.
	pub default_scopes: ScopeSet,
	/// Scope delimiter.
	pub scope_delimiter: char,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			authorization_endpoint: None,
			token_endpoint: None,
			api_base: None,
			pkce: PkceMode::default(),
			client_auth: ClientAuthMethod::default(),
			default_scopes: ScopeSet::default(),
			scope_delimiter: ' ',
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the REST API base.
	pub fn api_base(mut self, url: Url) -> Self {
		self.api_base = Some(url);

		self
	}

	/// Overrides the PKCE policy.
	pub fn pkce(mut self, mode: PkceMode) -> Self {
		self.pkce = mode;

		self
	}

	/// Overrides the client authentication method.
	pub fn client_auth(mut self, method: ClientAuthMethod) -> Self {
		self.client_auth = method;

		self
	}

	/// Sets the scopes requested when callers configure none.
	pub fn default_scopes(mut self, scopes: ScopeSet) -> Self {
		self.default_scopes = scopes;

		self
	}

	/// Overrides the scope delimiter.
	pub fn scope_delimiter(mut self, delimiter: char) -> Self {
		self.scope_delimiter = delimiter;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let mut api_base = self.api_base.ok_or(ProviderDescriptorError::MissingApiBase)?;

		if !api_base.path().ends_with('/') {
			let path = format!("{}/", api_base.path());

			api_base.set_path(&path);
		}

		let descriptor = ProviderDescriptor {
			id: self.id,
			endpoints: ProviderEndpoints { authorization, token },
			api_base,
			pkce: self.pkce,
			client_auth: self.client_auth,
			default_scopes: self.default_scopes,
			scope_delimiter: self.scope_delimiter,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;
		validate_endpoint("api", &self.api_base)?;
		validate_scope_delimiter(self.scope_delimiter)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() != "https" {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}

fn validate_scope_delimiter(delimiter: char) -> Result<(), ProviderDescriptorError> {
	if delimiter.is_control() {
		Err(ProviderDescriptorError::InvalidScopeDelimiter { delimiter })
	} else {
		Ok(())
	}
}
