//! Connection health derived from the stored token record.

// self
use crate::{_prelude::*, auth::TokenRecord};

const EXPIRED_MESSAGE: &str = "Access token expired; refresh or reconnect.";

/// Connection status reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	/// Tokens exist and the access token has not expired.
	Active,
	/// Tokens exist but the access token has expired.
	Expired,
	/// No tokens exist for the pair.
	Disconnected,
}
impl ConnectionStatus {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConnectionStatus::Active => "active",
			ConnectionStatus::Expired => "expired",
			ConnectionStatus::Disconnected => "disconnected",
		}
	}
}

/// Point-in-time health of one subject's connection to one provider. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHealth {
	/// Provider the connection belongs to.
	pub provider: ProviderId,
	/// Subject owning the connection.
	pub subject: SubjectId,
	/// Derived status.
	pub status: ConnectionStatus,
	/// Expiry of the stored access token, when one exists.
	#[serde(with = "time::serde::rfc3339::option")]
	pub token_expires_at: Option<OffsetDateTime>,
	/// Whether the next token read will trigger a proactive refresh.
	pub needs_refresh: bool,
	/// Human-readable reason accompanying a non-active status.
	pub error: Option<String>,
}
impl ConnectionHealth {
	/// Derives health from the stored record (or its absence) at `now`.
	pub fn evaluate(
		provider: ProviderId,
		subject: SubjectId,
		record: Option<&TokenRecord>,
		now: OffsetDateTime,
	) -> Self {
		let Some(record) = record else {
			return Self::disconnected(provider, subject, None);
		};
		let expired = record.is_expired_at(now);

		Self {
			provider,
			subject,
			status: if expired { ConnectionStatus::Expired } else { ConnectionStatus::Active },
			token_expires_at: Some(record.expires_at),
			needs_refresh: record.needs_refresh_at(now),
			error: expired.then(|| EXPIRED_MESSAGE.to_owned()),
		}
	}

	/// Health entry for a pair without tokens, optionally explaining why.
	pub fn disconnected(provider: ProviderId, subject: SubjectId, error: Option<String>) -> Self {
		Self {
			provider,
			subject,
			status: ConnectionStatus::Disconnected,
			token_expires_at: None,
			needs_refresh: false,
			error,
		}
	}
}
