//! Bounded retries with exponential backoff, per-attempt timeouts, and status classification.

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::{HttpResponse, http::StatusCode};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	error::TransportError,
	http::{ApiRequest, HttpTransport, parse_retry_after},
};

/// Retry budget applied to every outbound provider request.
///
/// Transport failures, per-attempt timeouts, and 5xx responses are retried up to `retries`
/// additional times, sleeping `backoff_base * 2^attempt` in between. 4xx responses are never
/// retried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Additional attempts after the first one.
	pub retries: u32,
	/// Base delay doubled after every failed attempt.
	#[serde(rename = "backoff_base_ms", with = "millis")]
	pub backoff_base: StdDuration,
	/// Upper bound for a single attempt.
	#[serde(rename = "timeout_ms", with = "millis")]
	pub timeout: StdDuration,
}
impl RetryPolicy {
	/// Delay to wait after the failed attempt numbered `attempt` (zero-based).
	pub fn backoff_for(&self, attempt: u32) -> StdDuration {
		self.backoff_base.saturating_mul(2_u32.saturating_pow(attempt))
	}

	/// Total number of calls the policy allows.
	pub fn max_attempts(&self) -> u32 {
		self.retries.saturating_add(1)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			retries: 3,
			backoff_base: StdDuration::from_millis(500),
			timeout: StdDuration::from_secs(30),
		}
	}
}

/// Provider-scoped HTTP client applying a [`RetryPolicy`] on top of an [`HttpTransport`].
#[derive(Clone)]
pub struct RetryingClient {
	provider: ProviderId,
	transport: Arc<dyn HttpTransport>,
	policy: RetryPolicy,
}
impl RetryingClient {
	/// Creates a client attributing failures to `provider`.
	pub fn new(provider: ProviderId, transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
		Self { provider, transport, policy }
	}

	/// Provider this client reports errors for.
	pub fn provider(&self) -> &ProviderId {
		&self.provider
	}

	/// Active retry policy.
	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Sends `request`, retrying transport failures and 5xx responses.
	///
	/// Returns the final response whatever its status; only exhausted transport failures
	/// surface as errors.
	pub async fn dispatch(&self, request: &ApiRequest) -> Result<HttpResponse> {
		let mut attempt = 0;

		loop {
			let outcome =
				match tokio::time::timeout(self.policy.timeout, self.transport.send(request.to_http()?))
					.await
				{
					Ok(result) => result,
					Err(_) => Err(TransportError::Timeout),
				};
			let retryable = match &outcome {
				Ok(response) => response.status().is_server_error(),
				Err(_) => true,
			};

			tracing::debug!(
				provider = %self.provider,
				method = %request.method,
				path = request.url.path(),
				attempt,
				retryable,
				"Provider request attempt finished."
			);

			if !retryable || attempt >= self.policy.retries {
				return outcome.map_err(Error::from);
			}

			let delay = self.policy.backoff_for(attempt);

			match &outcome {
				Ok(response) => tracing::warn!(
					provider = %self.provider,
					status = response.status().as_u16(),
					delay_ms = delay.as_millis() as u64,
					"Retrying provider request after server error."
				),
				Err(e) => tracing::warn!(
					provider = %self.provider,
					error = %e,
					delay_ms = delay.as_millis() as u64,
					"Retrying provider request after transport failure."
				),
			}

			tokio::time::sleep(delay).await;

			attempt += 1;
		}
	}

	/// Dispatches `request` and maps non-2xx responses into [`Error::RateLimited`] or
	/// [`Error::ProviderApi`].
	pub async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse> {
		let response = self.dispatch(request).await?;
		let status = response.status();

		if status.is_success() {
			return Ok(response);
		}

		let body = String::from_utf8_lossy(response.body()).into_owned();

		if status == StatusCode::TOO_MANY_REQUESTS {
			return Err(Error::RateLimited {
				provider: self.provider.clone(),
				retry_after: parse_retry_after(response.headers()),
				body,
			});
		}

		Err(Error::ProviderApi { provider: self.provider.clone(), status: status.as_u16(), body })
	}

	/// Issues an authenticated `GET` and decodes the JSON body.
	pub async fn get_json<T>(&self, url: Url, access_token: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let request = ApiRequest::get(url).bearer(access_token)?;
		let response = self.execute(&request).await?;

		self.decode_json(response.body())
	}

	/// Decodes a JSON payload, reporting the failing path on error.
	pub fn decode_json<T>(&self, body: &[u8]) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut de = serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(&mut de)
			.map_err(|source| Error::MalformedResponse { provider: self.provider.clone(), source })
	}

	/// Decodes an already-parsed JSON value, reporting the failing path on error.
	pub fn decode_value<T>(&self, value: serde_json::Value) -> Result<T>
	where
		T: DeserializeOwned,
	{
		serde_path_to_error::deserialize(value)
			.map_err(|source| Error::MalformedResponse { provider: self.provider.clone(), source })
	}
}
impl Debug for RetryingClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RetryingClient")
			.field("provider", &self.provider)
			.field("policy", &self.policy)
			.finish()
	}
}

mod millis {
	// std
	use std::time::Duration as StdDuration;
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &StdDuration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<StdDuration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(StdDuration::from_millis)
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use httpmock::prelude::*;
	use oauth2::HttpRequest;
	// self
	use super::*;
	use crate::{_preludet::*, http::TransportFuture};

	fn client(transport: Arc<dyn HttpTransport>) -> RetryingClient {
		RetryingClient::new(
			ProviderId::new("fitbit").expect("Provider fixture should be valid."),
			transport,
			fast_retry_policy(),
		)
	}

	#[derive(Default)]
	struct StalledTransport {
		calls: AtomicU32,
	}
	impl HttpTransport for StalledTransport {
		fn send(&self, _request: HttpRequest) -> TransportFuture<'_> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Box::pin(async {
				tokio::time::sleep(StdDuration::from_secs(60)).await;

				Ok(HttpResponse::new(Vec::new()))
			})
		}
	}

	struct FlakyTransport {
		failures: u32,
		calls: AtomicU32,
	}
	impl HttpTransport for FlakyTransport {
		fn send(&self, _request: HttpRequest) -> TransportFuture<'_> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			let (status, body) = if call < self.failures {
				(StatusCode::BAD_GATEWAY, Vec::new())
			} else {
				(StatusCode::OK, br#"{"ok":true}"#.to_vec())
			};

			Box::pin(async move {
				let mut response = HttpResponse::new(body);

				*response.status_mut() = status;

				Ok(response)
			})
		}
	}

	#[test]
	fn backoff_doubles_per_attempt() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.backoff_for(0), StdDuration::from_millis(500));
		assert_eq!(policy.backoff_for(1), StdDuration::from_millis(1_000));
		assert_eq!(policy.backoff_for(2), StdDuration::from_millis(2_000));
		assert_eq!(policy.max_attempts(), 4);
	}

	#[test]
	fn policy_serializes_durations_as_millis() {
		let json = serde_json::to_value(RetryPolicy::default()).expect("Policy should serialize.");

		assert_eq!(json, serde_json::json!({ "retries": 3, "backoff_base_ms": 500, "timeout_ms": 30000 }));

		let parsed = serde_json::from_value::<RetryPolicy>(serde_json::json!({ "retries": 1 }))
			.expect("Partial policy should deserialize.");

		assert_eq!(parsed.retries, 1);
		assert_eq!(parsed.timeout, StdDuration::from_secs(30));
	}

	#[tokio::test]
	async fn server_errors_exhaust_the_retry_budget() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(GET).path("/1/user/-/profile.json");
				then.status(500).body("boom");
			})
			.await;
		let err = client(test_transport())
			.get_json::<serde_json::Value>(url(&server.url("/1/user/-/profile.json")), "tok")
			.await
			.expect_err("Persistent 500s should fail.");

		mock.assert_calls_async(4).await;

		assert!(matches!(err, Error::ProviderApi { status: 500, ref body, .. } if body == "boom"));
	}

	#[tokio::test]
	async fn client_errors_are_not_retried() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(GET).path("/missing").header("authorization", "Bearer tok");
				then.status(404).body("not found");
			})
			.await;
		let err = client(test_transport())
			.get_json::<serde_json::Value>(url(&server.url("/missing")), "tok")
			.await
			.expect_err("404 should fail.");

		mock.assert_calls_async(1).await;

		assert!(matches!(err, Error::ProviderApi { status: 404, .. }));
	}

	#[tokio::test]
	async fn rate_limits_surface_retry_after_without_retrying() {
		let server = MockServer::start_async().await;
		let mock = server
			.mock_async(|when, then| {
				when.method(GET).path("/limited");
				then.status(429).header("retry-after", "42").body("slow down");
			})
			.await;
		let err = client(test_transport())
			.get_json::<serde_json::Value>(url(&server.url("/limited")), "tok")
			.await
			.expect_err("429 should fail.");

		mock.assert_calls_async(1).await;

		assert_eq!(err.retry_after(), Some(Duration::seconds(42)));
		assert!(matches!(err, Error::RateLimited { ref body, .. } if body == "slow down"));
	}

	#[tokio::test]
	async fn transient_server_error_recovers() {
		let transport = Arc::new(FlakyTransport { failures: 2, calls: AtomicU32::new(0) });
		let value = client(transport.clone())
			.get_json::<serde_json::Value>(url("https://api.example.com/flaky"), "tok")
			.await
			.expect("Request should succeed once the server recovers.");

		assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
		assert_eq!(value, serde_json::json!({ "ok": true }));
	}

	#[tokio::test]
	async fn malformed_payload_reports_path() {
		let server = MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method(GET).path("/profile");
				then.status(200).body(r#"{"user":{"encodedId":7}}"#);
			})
			.await;

		#[derive(Debug, Deserialize)]
		#[serde(rename_all = "camelCase")]
		#[allow(dead_code)]
		struct User {
			encoded_id: String,
		}
		#[derive(Debug, Deserialize)]
		#[allow(dead_code)]
		struct Profile {
			user: User,
		}

		let err = client(test_transport())
			.get_json::<Profile>(url(&server.url("/profile")), "tok")
			.await
			.expect_err("Type mismatch should fail.");
		let Error::MalformedResponse { source, .. } = err else {
			panic!("Expected a malformed response error, got {err:?}.");
		};

		assert_eq!(source.path().to_string(), "user.encodedId");
	}

	#[tokio::test]
	async fn stalled_attempts_time_out_and_retry() {
		let transport = Arc::new(StalledTransport::default());
		let policy = RetryPolicy {
			retries: 1,
			backoff_base: StdDuration::ZERO,
			timeout: StdDuration::from_millis(20),
		};
		let http = RetryingClient::new(
			ProviderId::new("garmin").expect("Provider fixture should be valid."),
			transport.clone(),
			policy,
		);
		let request = ApiRequest::get(url("https://apis.example.com/slow"));
		let err = http.dispatch(&request).await.expect_err("Stalled transport should time out.");

		assert!(matches!(err, Error::Transport(TransportError::Timeout)));
		assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
	}
}
