//! Engine-level error types shared across flows, providers, transports, and stores.

// self
use crate::{
	_prelude::*,
	auth::{IdentifierError, ScopeValidationError, TokenRecordBuilderError},
	provider::ProviderDescriptorError,
	store::StoreError,
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure that survived every retry.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Callback presented a request identifier that is unknown, expired, or already consumed.
	#[error("Authorization request is unknown or no longer valid.")]
	InvalidState,
	/// No token record exists for the subject/provider pair.
	#[error("No tokens are stored for subject `{subject}` on provider `{provider}`.")]
	MissingToken {
		/// Provider the lookup targeted.
		provider: ProviderId,
		/// Subject the lookup targeted.
		subject: SubjectId,
	},
	/// Refresh grant was rejected or no refresh token is available.
	#[error("Token refresh failed for subject `{subject}` on provider `{provider}`.")]
	TokenRefreshFailed {
		/// Provider the refresh targeted.
		provider: ProviderId,
		/// Subject the refresh targeted.
		subject: SubjectId,
		/// Underlying cause; absent when no refresh token was stored.
		#[source]
		source: Option<Box<Error>>,
	},
	/// Facade has no engine registered for the requested provider.
	#[error("Provider `{provider}` is not configured.")]
	ProviderNotConfigured {
		/// Requested provider identifier.
		provider: String,
	},
	/// Provider endpoint answered with a non-2xx, non-429 status.
	#[error("Provider `{provider}` returned HTTP {status}: {body}")]
	ProviderApi {
		/// Provider that answered.
		provider: ProviderId,
		/// HTTP status code.
		status: u16,
		/// Response body kept for diagnostics.
		body: String,
	},
	/// Provider answered with HTTP 429.
	#[error("Provider `{provider}` rate limited the request.")]
	RateLimited {
		/// Provider that answered.
		provider: ProviderId,
		/// Retry-After hint, when supplied.
		retry_after: Option<Duration>,
		/// Response body kept for diagnostics.
		body: String,
	},
	/// Provider returned a payload that could not be decoded.
	#[error("Provider `{provider}` returned a malformed response.")]
	MalformedResponse {
		/// Provider that answered.
		provider: ProviderId,
		/// Structured decoding failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl Error {
	/// Returns `true` when the caller should restart the authorization flow.
	pub fn requires_reconnect(&self) -> bool {
		matches!(self, Self::InvalidState | Self::MissingToken { .. } | Self::TokenRefreshFailed { .. })
	}

	/// Returns `true` when the failure is worth retrying later.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::RateLimited { .. } | Self::Transport(_) => true,
			Self::ProviderApi { status, .. } => *status >= 500,
			_ => false,
		}
	}

	/// Retry-After hint carried by [`Error::RateLimited`].
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::RateLimited { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Header value contains characters HTTP does not allow.
	#[error("Header value is invalid.")]
	InvalidHeader(#[from] oauth2::http::header::InvalidHeaderValue),
	/// JSON request body could not be encoded.
	#[error("Request body could not be encoded.")]
	RequestEncode(#[source] serde_json::Error),
	/// A configured URL cannot be parsed.
	#[error("The {name} URL is invalid.")]
	InvalidUrl {
		/// Which URL failed.
		name: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// An environment value cannot be parsed.
	#[error("Environment variable {name} has an invalid value `{value}`.")]
	InvalidEnvValue {
		/// Variable name.
		name: &'static str,
		/// Raw value as read.
		value: String,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	InvalidDescriptor(#[from] ProviderDescriptorError),
	/// Identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] ScopeValidationError),
	/// Date range is inverted.
	#[error("Date range start {start} is after end {end}.")]
	InvalidDateRange {
		/// Requested start date.
		start: Date,
		/// Requested end date.
		end: Date,
	},
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] TokenRecordBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// No HTTP transport was supplied and the default one is compiled out.
	#[error("No HTTP transport configured; enable the `reqwest` feature or supply one.")]
	MissingTransport,
	/// Two adapters were registered under the same provider identifier.
	#[error("Provider `{provider}` is registered more than once.")]
	DuplicateProvider {
		/// Duplicated provider identifier.
		provider: ProviderId,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, timeout, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request did not complete within the configured bound.
	#[error("Request to the provider timed out.")]
	Timeout,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn provider() -> ProviderId {
		ProviderId::new("garmin").expect("Provider fixture should be valid.")
	}

	fn subject() -> SubjectId {
		SubjectId::new("user-1").expect("Subject fixture should be valid.")
	}

	#[test]
	fn reconnect_and_transient_classification() {
		assert!(Error::InvalidState.requires_reconnect());
		assert!(Error::MissingToken { provider: provider(), subject: subject() }.requires_reconnect());
		assert!(
			Error::TokenRefreshFailed { provider: provider(), subject: subject(), source: None }
				.requires_reconnect()
		);

		let limited = Error::RateLimited {
			provider: provider(),
			retry_after: Some(Duration::seconds(30)),
			body: String::new(),
		};

		assert!(limited.is_transient());
		assert!(!limited.requires_reconnect());
		assert_eq!(limited.retry_after(), Some(Duration::seconds(30)));

		let server = Error::ProviderApi { provider: provider(), status: 503, body: "busy".into() };
		let client = Error::ProviderApi { provider: provider(), status: 404, body: "gone".into() };

		assert!(server.is_transient());
		assert!(!client.is_transient());
		assert!(client.to_string().contains("404"));
	}

	#[test]
	fn refresh_failure_exposes_cause() {
		let cause = Error::ProviderApi { provider: provider(), status: 400, body: "bad".into() };
		let err = Error::TokenRefreshFailed {
			provider: provider(),
			subject: subject(),
			source: Some(Box::new(cause)),
		};
		let source = StdError::source(&err).expect("Refresh failure should expose its cause.");

		assert!(source.to_string().contains("HTTP 400"));
	}
}
