//! Token endpoint facade built on the `oauth2` crate.
//!
//! [`TokenEndpoint`] owns a configured [`BasicClient`] and routes every grant through the
//! provider's [`RetryingClient`], so code exchanges and refresh grants share the same retry,
//! timeout, and error classification as data fetches. Response metadata captured by the dispatch
//! handle lets non-2xx token responses surface as [`Error::ProviderApi`] or
//! [`Error::RateLimited`] with the original status and body.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AsyncHttpClient, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret,
	EndpointNotSet, EndpointSet, HttpClientError, HttpRequest, HttpResponse, PkceCodeVerifier,
	RedirectUrl, RefreshToken, RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	config::ProviderCredentials,
	error::{ConfigError, TransportError},
	http::{ApiRequest, ResponseMetadata, ResponseMetadataSlot, RetryingClient, parse_retry_after},
	provider::{ClientAuthMethod, ProviderDescriptor},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type GrantError = RequestTokenError<HttpClientError<Error>, BasicErrorResponse>;

/// Authorization-code and refresh grants against one provider's token endpoint.
#[derive(Clone, Debug)]
pub struct TokenEndpoint {
	client: ConfiguredBasicClient,
	http: RetryingClient,
}
impl TokenEndpoint {
	/// Configures the `oauth2` client from the descriptor and the caller's credentials.
	///
	/// [`ClientAuthMethod::Body`] sends the client credentials as form fields; otherwise they
	/// travel in an HTTP Basic `Authorization` header.
	pub fn new(
		descriptor: &ProviderDescriptor,
		credentials: &ProviderCredentials,
		http: RetryingClient,
	) -> Result<Self, ConfigError> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidUrl { name: "authorization", source })?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidUrl { name: "token", source })?;
		let auth_type = match descriptor.client_auth {
			ClientAuthMethod::Basic => AuthType::BasicAuth,
			ClientAuthMethod::Body => AuthType::RequestBody,
		};
		let client = BasicClient::new(ClientId::new(credentials.client_id.clone()))
			.set_client_secret(ClientSecret::new(credentials.client_secret.expose().to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url)
			.set_auth_type(auth_type);

		Ok(Self { client, http })
	}

	/// Exchanges an authorization code, echoing the redirect URI and PKCE verifier when present.
	pub async fn exchange_code(
		&self,
		code: &str,
		pkce_verifier: Option<&str>,
		redirect_uri: &Url,
	) -> Result<TokenRecord> {
		let slot = ResponseMetadataSlot::default();
		let handle = self.handle(slot.clone());
		let redirect_url = RedirectUrl::new(redirect_uri.to_string())
			.map_err(|source| ConfigError::InvalidUrl { name: "redirect", source })?;
		let mut request = self
			.client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.set_redirect_uri(Cow::Owned(redirect_url));

		if let Some(verifier) = pkce_verifier {
			request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_owned()));
		}

		let response = request
			.request_async(&handle)
			.await
			.map_err(|e| map_grant_error(self.http.provider(), slot.take(), e))?;

		token_record_from(response)
	}

	/// Redeems a refresh token for a new token pair.
	pub async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord> {
		let slot = ResponseMetadataSlot::default();
		let handle = self.handle(slot.clone());
		let refresh_token = RefreshToken::new(refresh_token.to_owned());
		let response = self
			.client
			.exchange_refresh_token(&refresh_token)
			.request_async(&handle)
			.await
			.map_err(|e| map_grant_error(self.http.provider(), slot.take(), e))?;

		token_record_from(response)
	}

	fn handle(&self, slot: ResponseMetadataSlot) -> DispatchHandle {
		DispatchHandle { http: self.http.clone(), slot }
	}
}

/// [`AsyncHttpClient`] handle that sends `oauth2` requests through a [`RetryingClient`].
struct DispatchHandle {
	http: RetryingClient,
	slot: ResponseMetadataSlot,
}
impl<'c> AsyncHttpClient<'c> for DispatchHandle {
	type Error = HttpClientError<Error>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let request = ApiRequest::from_http(request).map_err(|e| Box::new(Error::from(e)))?;
			let response = self.http.dispatch(&request).await.map_err(Box::new)?;

			self.slot.store(ResponseMetadata {
				status: Some(response.status().as_u16()),
				retry_after: parse_retry_after(response.headers()),
				body: String::from_utf8_lossy(response.body()).into_owned(),
			});

			Ok(response)
		})
	}
}

fn token_record_from(response: BasicTokenResponse) -> Result<TokenRecord> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let mut builder = TokenRecord::builder()
		.access_token(response.access_token().secret().to_owned())
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in))
		.token_type(response.token_type().as_ref());

	if let Some(refresh) = response.refresh_token() {
		builder = builder.refresh_token(refresh.secret().to_owned());
	}
	if let Some(scopes) = response.scopes() {
		builder = builder
			.scope(scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" "));
	}

	builder.build().map_err(|e| ConfigError::from(e).into())
}

fn map_grant_error(provider: &ProviderId, meta: Option<ResponseMetadata>, err: GrantError) -> Error {
	match meta {
		Some(ResponseMetadata { status: Some(429), retry_after, body }) =>
			return Error::RateLimited { provider: provider.clone(), retry_after, body },
		Some(ResponseMetadata { status: Some(status), body, .. }) if !(200..300).contains(&status) =>
			return Error::ProviderApi { provider: provider.clone(), status, body },
		_ => {},
	}

	match err {
		RequestTokenError::Request(HttpClientError::Reqwest(inner)) => *inner,
		RequestTokenError::Request(HttpClientError::Http(e)) => ConfigError::from(e).into(),
		RequestTokenError::Request(HttpClientError::Io(e)) => TransportError::Io(e).into(),
		RequestTokenError::Parse(source, _) =>
			Error::MalformedResponse { provider: provider.clone(), source },
		RequestTokenError::ServerResponse(response) => Error::ProviderApi {
			provider: provider.clone(),
			status: 400,
			body: response.error().as_ref().to_owned(),
		},
		RequestTokenError::Other(message) =>
			Error::ProviderApi { provider: provider.clone(), status: 200, body: message },
		RequestTokenError::Request(other) => Error::Transport(TransportError::network(other)),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use httpmock::prelude::*;
	// self
	use super::*;
	use crate::{_preludet::*, provider::PkceMode};

	fn endpoint(server: &MockServer, client_auth: ClientAuthMethod) -> TokenEndpoint {
		let descriptor =
			mock_descriptor("fitbit", &server.base_url(), PkceMode::Enabled, client_auth, &["sleep"]);
		let http = RetryingClient::new(descriptor.id.clone(), test_transport(), fast_retry_policy());

		TokenEndpoint::new(&descriptor, &test_credentials(), http)
			.expect("Token endpoint should configure.")
	}

	#[tokio::test]
	async fn code_exchange_sends_basic_credentials_and_verifier() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/fitbit/token")
					.header_exists("authorization")
					.form_urlencoded_tuple("grant_type", "authorization_code")
					.form_urlencoded_tuple("code", "code-1")
					.form_urlencoded_tuple("code_verifier", "verifier-1")
					.form_urlencoded_tuple("redirect_uri", "https://app.example.com/callback");
				then.status(200).header("content-type", "application/json").body(
					r#"{"access_token":"A1","refresh_token":"R1","token_type":"Bearer","expires_in":3600,"scope":"sleep activity"}"#,
				);
			})
			.await;
		let record = endpoint(&server, ClientAuthMethod::Basic)
			.exchange_code("code-1", Some("verifier-1"), &url("https://app.example.com/callback"))
			.await
			.expect("Code exchange should succeed.");

		mock.assert_async().await;

		assert_eq!(record.access_token.expose(), "A1");
		assert_eq!(record.refresh_token.as_ref().map(|t| t.expose()), Some("R1"));
		assert_eq!(record.scope.as_deref(), Some("sleep activity"));
		assert!(record.expires_at > OffsetDateTime::now_utc() + Duration::minutes(59));
	}

	#[tokio::test]
	async fn body_auth_posts_client_secret_in_form() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/fitbit/token")
					.form_urlencoded_tuple("grant_type", "refresh_token")
					.form_urlencoded_tuple("refresh_token", "R1")
					.form_urlencoded_tuple("client_id", TEST_CLIENT_ID)
					.form_urlencoded_tuple("client_secret", TEST_CLIENT_SECRET);
				then.status(200)
					.header("content-type", "application/json")
					.body(r#"{"access_token":"A2","token_type":"bearer","expires_in":600}"#);
			})
			.await;
		let record = endpoint(&server, ClientAuthMethod::Body)
			.refresh("R1")
			.await
			.expect("Refresh should succeed.");

		mock.assert_async().await;

		assert_eq!(record.access_token.expose(), "A2");
		assert!(record.refresh_token.is_none());
	}

	#[tokio::test]
	async fn rejected_grant_maps_to_provider_api_error() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(POST).path("/fitbit/token");
				then.status(400)
					.header("content-type", "application/json")
					.body(r#"{"error":"invalid_grant"}"#);
			})
			.await;
		let err = endpoint(&server, ClientAuthMethod::Basic)
			.refresh("revoked")
			.await
			.expect_err("Rejected grant should fail.");

		mock.assert_calls_async(1).await;

		assert!(
			matches!(err, Error::ProviderApi { status: 400, ref body, .. } if body.contains("invalid_grant"))
		);
	}

	#[tokio::test]
	async fn throttled_grant_maps_to_rate_limited() {
		let server = MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method(POST).path("/fitbit/token");
				then.status(429).header("retry-after", "7").body("{}");
			})
			.await;

		let err = endpoint(&server, ClientAuthMethod::Basic)
			.refresh("R1")
			.await
			.expect_err("Throttled grant should fail.");

		assert_eq!(err.retry_after(), Some(Duration::seconds(7)));
	}

	#[tokio::test]
	async fn missing_expires_in_is_a_config_error() {
		let server = MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method(POST).path("/fitbit/token");
				then.status(200)
					.header("content-type", "application/json")
					.body(r#"{"access_token":"A3","token_type":"Bearer"}"#);
			})
			.await;

		let err = endpoint(&server, ClientAuthMethod::Basic)
			.refresh("R1")
			.await
			.expect_err("Missing expires_in should fail.");

		assert!(matches!(err, Error::Config(ConfigError::MissingExpiresIn)));
	}
}
