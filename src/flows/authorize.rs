//! Authorization URL issuance and callback handling.
//!
//! [`ConnectionEngine::build_authorization_url`] is pure: it generates the request identifier
//! (doubling as the OAuth `state`), an optional PKCE pair, and records both in the pending store.
//! [`ConnectionEngine::handle_callback`] consumes that entry exactly once, exchanges the code,
//! persists the tokens, and then looks up the provider-side user identifier on a best-effort
//! basis.

// self
use crate::{
	_prelude::*,
	auth::{PkcePair, TokenRecord, TokenSecret},
	flows::{ConnectionEngine, common},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	pending::PendingAuthorization,
};

/// Authorize URL plus the request identifier embedded as its `state` parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationUrl {
	/// Fully-formed authorize URL to send the end user to.
	pub url: Url,
	/// Opaque identifier the callback must present.
	pub request_id: String,
}

/// Outcome of a successful callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionResult {
	/// Subject the connection belongs to.
	pub subject: SubjectId,
	/// Provider that issued the tokens.
	pub provider: ProviderId,
	/// Persisted token record.
	pub tokens: TokenRecord,
	/// Provider-side user identifier; absent when the lookup failed or is unsupported.
	pub external_user_id: Option<String>,
}

impl ConnectionEngine {
	/// Issues an authorize URL for `subject` and registers the pending authorization.
	///
	/// Performs no network I/O.
	pub fn build_authorization_url(&self, subject: SubjectId) -> AuthorizationUrl {
		const KIND: FlowKind = FlowKind::Authorize;

		let _span = FlowSpan::new(KIND, self.provider(), "build_authorization_url").entered();

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let pkce = self.use_pkce.then(PkcePair::generate);
		let mut pending = PendingAuthorization::new(
			subject,
			self.provider().clone(),
			self.credentials.redirect_uri.clone(),
		);

		if let Some(pair) = &pkce {
			pending = pending.with_pkce_verifier(pair.verifier.clone());
		}

		let request_id = self.pending.put(pending);
		let url = self.compose_authorize_url(&request_id, pkce.as_ref());

		tracing::debug!(pkce = pkce.is_some(), "Authorization URL issued.");
		obs::record_flow_outcome(KIND, FlowOutcome::Success);

		AuthorizationUrl { url, request_id }
	}

	/// Completes the authorization started by [`ConnectionEngine::build_authorization_url`].
	///
	/// Unknown, expired, replayed, and foreign request identifiers all fail with
	/// [`Error::InvalidState`] before the token endpoint is contacted.
	pub async fn handle_callback(&self, code: &str, request_id: &str) -> Result<ConnectionResult> {
		common::observe(FlowKind::Callback, self.provider(), "handle_callback", async move {
			let pending = match self.pending.take_if_valid(request_id) {
				Some(pending) if &pending.provider == self.provider() => pending,
				_ => return Err(Error::InvalidState),
			};
			let tokens = self
				.token_endpoint
				.exchange_code(
					code,
					pending.pkce_verifier.as_ref().map(TokenSecret::expose),
					&pending.redirect_uri,
				)
				.await?;
			let key = self.key(&pending.subject);

			self.store.save(&key, tokens.clone()).await?;

			let external_user_id =
				match self.adapter.fetch_user_id(&self.http, tokens.access_token.expose()).await {
					Ok(id) => id,
					Err(e) => {
						tracing::warn!(
							reason = "identity_lookup_failed",
							subject = %pending.subject,
							error = %e,
							"Provider identity lookup failed; continuing without it."
						);

						None
					},
				};

			tracing::info!(
				subject = %pending.subject,
				expires_at = %tokens.expires_at,
				"Provider connection established."
			);

			Ok(ConnectionResult {
				subject: pending.subject,
				provider: self.provider().clone(),
				tokens,
				external_user_id,
			})
		})
		.await
	}

	fn compose_authorize_url(&self, request_id: &str, pkce: Option<&PkcePair>) -> Url {
		let descriptor = self.descriptor();
		let mut url = descriptor.endpoints.authorization.clone();
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("response_type", "code");
		pairs.append_pair("client_id", &self.credentials.client_id);
		pairs.append_pair("redirect_uri", self.credentials.redirect_uri.as_str());

		if let Some(scope) = self.scopes.joined(descriptor.scope_delimiter) {
			pairs.append_pair("scope", &scope);
		}

		pairs.append_pair("state", request_id);

		if let Some(pair) = pkce {
			pairs.append_pair("code_challenge", &pair.challenge);
			pairs.append_pair("code_challenge_method", pair.method.as_str());
		}

		drop(pairs);

		url
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use httpmock::prelude::*;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		provider::{ClientAuthMethod, GarminAdapter, PkceMode, ProviderAdapter},
		store::{StoreKey, TokenStore},
	};

	const TOKEN_BODY: &str =
		r#"{"access_token":"A1","refresh_token":"R1","token_type":"Bearer","expires_in":3600}"#;

	fn garmin_adapter(server: &MockServer) -> Arc<dyn ProviderAdapter> {
		Arc::new(GarminAdapter::with_descriptor(mock_descriptor(
			"garmin",
			&server.base_url(),
			PkceMode::Required,
			ClientAuthMethod::Body,
			&["WELLNESS_READ", "SLEEP_READ"],
		)))
	}

	fn query(url: &Url, name: &str) -> Option<String> {
		url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
	}

	fn subject() -> SubjectId {
		SubjectId::new("user-1").expect("Subject fixture should be valid.")
	}

	#[tokio::test]
	async fn authorize_url_carries_oauth_and_pkce_parameters() {
		let server = MockServer::start_async().await;
		let (engine, _) = build_test_engine(garmin_adapter(&server));
		let issued = engine.build_authorization_url(subject());
		let url = &issued.url;

		assert_eq!(url.path(), "/garmin/authorize");
		assert_eq!(query(url, "response_type").as_deref(), Some("code"));
		assert_eq!(query(url, "client_id").as_deref(), Some(TEST_CLIENT_ID));
		assert_eq!(query(url, "redirect_uri").as_deref(), Some("https://app.example.com/callback"));
		assert_eq!(query(url, "scope").as_deref(), Some("SLEEP_READ WELLNESS_READ"));
		assert_eq!(query(url, "state").as_deref(), Some(issued.request_id.as_str()));
		assert_eq!(query(url, "code_challenge_method").as_deref(), Some("S256"));
		assert_eq!(issued.request_id.len(), 43);

		let challenge = query(url, "code_challenge").expect("PKCE challenge should be present.");

		assert_eq!(challenge.len(), 43);
		assert_ne!(challenge, issued.request_id);
	}

	#[tokio::test]
	async fn callback_exchanges_code_persists_tokens_and_resolves_identity() {
		let server = MockServer::start_async().await;
		let token = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/garmin/token")
					.form_urlencoded_tuple("grant_type", "authorization_code")
					.form_urlencoded_tuple("code", "code-1")
					.form_urlencoded_tuple("client_id", TEST_CLIENT_ID)
					.form_urlencoded_tuple("client_secret", TEST_CLIENT_SECRET)
					.form_urlencoded_tuple_exists("code_verifier");
				then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
			})
			.await;
		let identity = server
			.mock_async(|when, then| {
				when.method(GET)
					.path("/wellness-api/rest/user/id")
					.header("authorization", "Bearer A1");
				then.status(200)
					.header("content-type", "application/json")
					.body(r#"{"userId":"garmin-user-9"}"#);
			})
			.await;
		let (engine, store) = build_test_engine(garmin_adapter(&server));
		let issued = engine.build_authorization_url(subject());
		let result = engine
			.handle_callback("code-1", &issued.request_id)
			.await
			.expect("Callback should succeed.");

		token.assert_async().await;
		identity.assert_async().await;

		assert_eq!(result.subject, subject());
		assert_eq!(result.external_user_id.as_deref(), Some("garmin-user-9"));
		assert_eq!(result.tokens.access_token.expose(), "A1");

		let stored = store
			.get(&StoreKey::new(subject(), engine.provider().clone()))
			.await
			.expect("Store read should succeed.")
			.expect("Tokens should be persisted.");

		assert_eq!(stored, result.tokens);

		let replay = engine
			.handle_callback("code-1", &issued.request_id)
			.await
			.expect_err("Replayed request identifiers should be rejected.");

		assert!(matches!(replay, Error::InvalidState));
		token.assert_calls_async(1).await;
	}

	#[tokio::test]
	async fn identity_lookup_failure_is_not_fatal() {
		let server = MockServer::start_async().await;
		let _token = server
			.mock_async(|when, then| {
				when.method(POST).path("/garmin/token");
				then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
			})
			.await;
		let identity = server
			.mock_async(|when, then| {
				when.method(GET).path("/wellness-api/rest/user/id");
				then.status(403).body("forbidden");
			})
			.await;
		let (engine, store) = build_test_engine(garmin_adapter(&server));
		let issued = engine.build_authorization_url(subject());
		let result = engine
			.handle_callback("code-1", &issued.request_id)
			.await
			.expect("Callback should succeed despite the identity failure.");

		identity.assert_async().await;

		assert!(result.external_user_id.is_none());
		assert_eq!(store.len(), 1);
	}

	#[tokio::test]
	async fn failed_exchange_persists_nothing() {
		let server = MockServer::start_async().await;
		let token = server
			.mock_async(|when, then| {
				when.method(POST).path("/garmin/token");
				then.status(400)
					.header("content-type", "application/json")
					.body(r#"{"error":"invalid_grant"}"#);
			})
			.await;
		let (engine, store) = build_test_engine(garmin_adapter(&server));
		let issued = engine.build_authorization_url(subject());
		let err = engine
			.handle_callback("bad-code", &issued.request_id)
			.await
			.expect_err("Rejected codes should fail.");

		token.assert_async().await;

		assert!(matches!(err, Error::ProviderApi { status: 400, .. }));
		assert!(store.is_empty());
	}
}
