//! Token persistence contract plus the built-in memory and file backends.
//!
//! The engine never touches storage directly: every read and write goes through [`TokenStore`],
//! keyed by the `(subject, provider)` pair. Cross-process consistency (e.g. two instances
//! refreshing the same pair) is the backend's responsibility.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::TokenRecord};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for per-subject, per-provider token records.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the record stored under `key`.
	fn save<'a>(&'a self, key: &'a StoreKey, record: TokenRecord) -> StoreFuture<'a, ()>;

	/// Fetches the record stored under `key`, if present.
	fn get<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Removes the record stored under `key`. Removing an absent record succeeds.
	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()>;

	/// Returns `true` when a record exists under `key`.
	fn has<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.get(key).await?.is_some()) })
	}
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Unique key identifying a stored token record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
	/// Subject owning the connection.
	pub subject: SubjectId,
	/// Provider the tokens were issued by.
	pub provider: ProviderId,
}
impl StoreKey {
	/// Builds a key for the subject/provider pair.
	pub fn new(subject: SubjectId, provider: ProviderId) -> Self {
		Self { subject, provider }
	}
}
impl Display for StoreKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{}", self.provider, self.subject)
	}
}
