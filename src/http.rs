//! Transport primitives shared by token exchanges and provider data fetches.
//!
//! [`HttpTransport`] is the engine's only dependency on an HTTP stack. Requests are described
//! with [`ApiRequest`], which keeps the body content type explicit ([`RequestBody::Form`] or
//! [`RequestBody::Json`]) instead of sniffing it. [`RetryingClient`] layers timeouts, backoff,
//! and status classification on top of any transport.

pub mod retry;

pub use retry::*;

// crates.io
use oauth2::{
	HttpRequest, HttpResponse,
	http::{
		HeaderMap, HeaderValue, Method,
		header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
	},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
};

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks able to execute a single request.
///
/// Implementations perform exactly one attempt; retries and timeouts belong to
/// [`RetryingClient`]. Any HTTP status, including errors, must be returned as `Ok`.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and resolves with the raw response.
	fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// Body attached to an [`ApiRequest`].
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
	/// No body.
	#[default]
	Empty,
	/// `application/x-www-form-urlencoded` pairs.
	Form(Vec<(String, String)>),
	/// `application/json` document.
	Json(serde_json::Value),
	/// Pre-encoded bytes whose content type is already present in the headers.
	Raw(Vec<u8>),
}

/// Transport-neutral request description that can be re-encoded for every retry attempt.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Request headers.
	pub headers: HeaderMap,
	/// Request body.
	pub body: RequestBody,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: HeaderMap::new(), body: RequestBody::Empty }
	}

	/// Shorthand for a `GET` request.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	/// Shorthand for a `POST` request.
	pub fn post(url: Url) -> Self {
		Self::new(Method::POST, url)
	}

	/// Adds `Authorization: Bearer <token>`.
	pub fn bearer(mut self, access_token: &str) -> Result<Self, ConfigError> {
		let mut value = HeaderValue::try_from(format!("Bearer {access_token}"))?;

		value.set_sensitive(true);
		self.headers.insert(AUTHORIZATION, value);

		Ok(self)
	}

	/// Attaches a form-encoded body.
	pub fn form<I, K, V>(mut self, pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.body = RequestBody::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());

		self
	}

	/// Attaches a JSON body.
	pub fn json(mut self, value: serde_json::Value) -> Self {
		self.body = RequestBody::Json(value);

		self
	}

	/// Wraps a request produced elsewhere (e.g. by the `oauth2` crate).
	pub fn from_http(request: HttpRequest) -> Result<Self, ConfigError> {
		let (parts, body) = request.into_parts();
		let url = Url::parse(&parts.uri.to_string())
			.map_err(|source| ConfigError::InvalidUrl { name: "request", source })?;

		Ok(Self { method: parts.method, url, headers: parts.headers, body: RequestBody::Raw(body) })
	}

	/// Encodes the request into an [`HttpRequest`] for a single attempt.
	pub fn to_http(&self) -> Result<HttpRequest, ConfigError> {
		let mut builder = oauth2::http::Request::builder()
			.method(self.method.clone())
			.uri(self.url.as_str());

		if let Some(headers) = builder.headers_mut() {
			headers.extend(self.headers.clone());
		}

		let (content_type, body) = match &self.body {
			RequestBody::Empty => (None, Vec::new()),
			RequestBody::Form(pairs) => {
				let encoded = url::form_urlencoded::Serializer::new(String::new())
					.extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
					.finish();

				(Some("application/x-www-form-urlencoded"), encoded.into_bytes())
			},
			RequestBody::Json(value) =>
				(Some("application/json"), serde_json::to_vec(value).map_err(ConfigError::RequestEncode)?),
			RequestBody::Raw(bytes) => (None, bytes.clone()),
		};

		if let Some(content_type) = content_type {
			builder = builder.header(CONTENT_TYPE, content_type);
		}

		Ok(builder.body(body)?)
	}
}

/// Metadata captured from the most recent token endpoint response for error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code, if a response arrived.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
	/// Response body decoded lossily as UTF-8.
	pub body: String,
}

/// Thread-safe slot sharing [`ResponseMetadata`] between the transport handle and error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Reqwest-backed [`HttpTransport`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestHttpClient {
	fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let response = self.0.execute(request.try_into()?).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut converted = HttpResponse::new(response.bytes().await?.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

/// Parses `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<i64>() {
		return (secs >= 0).then(|| Duration::seconds(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("URL fixture should parse.")
	}

	#[test]
	fn form_body_sets_explicit_content_type() {
		let request = ApiRequest::post(url("https://api.example.com/oauth2/token"))
			.form([("grant_type", "refresh_token"), ("refresh_token", "a b&c")])
			.to_http()
			.expect("Form request should encode.");

		assert_eq!(request.method(), Method::POST);
		assert_eq!(
			request.headers().get(CONTENT_TYPE).map(HeaderValue::as_bytes),
			Some(&b"application/x-www-form-urlencoded"[..])
		);
		assert_eq!(request.body(), b"grant_type=refresh_token&refresh_token=a+b%26c");
	}

	#[test]
	fn json_body_and_bearer_header() {
		let request = ApiRequest::post(url("https://api.example.com/items"))
			.bearer("tok")
			.expect("Bearer header should be valid.")
			.json(serde_json::json!({ "limit": 100 }))
			.to_http()
			.expect("JSON request should encode.");

		assert_eq!(
			request.headers().get(CONTENT_TYPE).map(HeaderValue::as_bytes),
			Some(&b"application/json"[..])
		);
		assert_eq!(
			request.headers().get(AUTHORIZATION).map(HeaderValue::as_bytes),
			Some(&b"Bearer tok"[..])
		);
		assert_eq!(request.body(), br#"{"limit":100}"#);
	}

	#[test]
	fn bearer_rejects_header_breaking_tokens() {
		assert!(ApiRequest::get(url("https://api.example.com/")).bearer("bad\ntoken").is_err());
	}

	#[test]
	fn raw_requests_round_trip_through_from_http() {
		let original = ApiRequest::post(url("https://api.example.com/token?x=1"))
			.form([("code", "abc")])
			.to_http()
			.expect("Form request should encode.");
		let wrapped = ApiRequest::from_http(original).expect("Absolute URI should convert.");

		assert_eq!(wrapped.url.as_str(), "https://api.example.com/token?x=1");

		let again = wrapped.to_http().expect("Raw request should re-encode.");

		assert_eq!(again.body(), b"code=abc");
		assert_eq!(
			again.headers().get(CONTENT_TYPE).map(HeaderValue::as_bytes),
			Some(&b"application/x-www-form-urlencoded"[..])
		);
	}

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(120)));

		headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));

		assert_eq!(parse_retry_after(&headers), None, "Past dates carry no hint.");

		headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));

		assert_eq!(parse_retry_after(&headers), None);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}
}
