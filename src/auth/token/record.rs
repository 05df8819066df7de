//! Token record persisted per subject/provider pair, plus its builder.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Margin before expiry inside which a token is refreshed proactively.
pub const REFRESH_WINDOW: Duration = Duration::minutes(5);

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// OAuth tokens issued to one subject by one provider.
///
/// This is the at-rest shape every [`TokenStore`](crate::store::TokenStore) persists.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Absolute expiry derived from issuance time plus the reported lifetime.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Space-delimited scope string echoed by the provider.
	pub scope: Option<String>,
	/// Token type reported by the provider (usually `Bearer`).
	pub token_type: String,
}
impl TokenRecord {
	/// Returns a builder for constructing records.
	pub fn builder() -> TokenRecordBuilder {
		TokenRecordBuilder::default()
	}

	/// Returns `true` once `instant` reaches the expiry.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` when the expiry falls inside [`REFRESH_WINDOW`] of `instant` (inclusive).
	pub fn needs_refresh_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at <= instant + REFRESH_WINDOW
	}

	/// Keeps `previous` as the refresh token when this record arrived without one.
	pub fn retain_refresh_token(mut self, previous: Option<TokenSecret>) -> Self {
		if self.refresh_token.is_none() {
			self.refresh_token = previous;
		}

		self
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.field("token_type", &self.token_type)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug, Default)]
pub struct TokenRecordBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	scope: Option<String>,
	token_type: Option<String>,
}
impl TokenRecordBuilder {
	/// Sets the issued-at instant used with [`expires_in`](Self::expires_in).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative lifetime counted from the issued-at instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the scope string.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Overrides the token type (defaults to `Bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self.access_token.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenRecordBuilderError::MissingExpiry),
		};

		Ok(TokenRecord {
			access_token,
			refresh_token: self.refresh_token,
			expires_at,
			scope: self.scope,
			token_type: self.token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.into()),
		})
	}
}
