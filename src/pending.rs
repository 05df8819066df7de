//! In-memory registry of in-flight authorization requests.
//!
//! Every authorize URL the engine issues is backed by one [`PendingAuthorization`] keyed by an
//! opaque request identifier that doubles as the OAuth `state` parameter. Entries are handed out
//! exactly once: [`PendingStore::take_if_valid`] removes the entry in the same critical section
//! that reads it, so a replayed callback can never succeed twice. Entries older than the TTL are
//! pruned on every write and are also rejected at read time.
//!
//! The registry is process-local. Multi-instance deployments need a shared store with native
//! expiry behind the same [`PendingStore`] contract.

// self
use crate::{
	_prelude::*,
	auth::{self, TokenSecret},
};

/// Default lifetime of a pending authorization (15 minutes).
pub const DEFAULT_STATE_TTL: Duration = Duration::seconds(900);

/// Context captured when an authorization URL is issued.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
	/// Subject the connection is being established for.
	pub subject: SubjectId,
	/// Provider the authorize URL targets.
	pub provider: ProviderId,
	/// PKCE verifier, present when the flow uses PKCE.
	pub pkce_verifier: Option<TokenSecret>,
	/// Redirect URI echoed to the provider; the code exchange must repeat it.
	pub redirect_uri: Url,
	/// Creation instant used for TTL enforcement.
	pub created_at: OffsetDateTime,
}
impl PendingAuthorization {
	/// Creates a pending entry stamped with the current clock.
	pub fn new(subject: SubjectId, provider: ProviderId, redirect_uri: Url) -> Self {
		Self {
			subject,
			provider,
			pkce_verifier: None,
			redirect_uri,
			created_at: OffsetDateTime::now_utc(),
		}
	}

	/// Attaches the PKCE verifier to send during the code exchange.
	pub fn with_pkce_verifier(mut self, verifier: TokenSecret) -> Self {
		self.pkce_verifier = Some(verifier);

		self
	}

	fn is_expired_at(&self, ttl: Duration, now: OffsetDateTime) -> bool {
		now - self.created_at > ttl
	}
}

/// Storage contract for pending authorizations.
pub trait PendingStore
where
	Self: Send + Sync,
{
	/// Stores `pending` under a fresh unique identifier and returns that identifier.
	fn put(&self, pending: PendingAuthorization) -> String;

	/// Atomically removes and returns the entry, or `None` if it is absent, consumed, or expired.
	fn take_if_valid(&self, request_id: &str) -> Option<PendingAuthorization>;
}

/// Mutex-guarded [`PendingStore`] with TTL pruning.
#[derive(Debug)]
pub struct PendingStateRegistry {
	ttl: Duration,
	entries: Mutex<HashMap<String, PendingAuthorization>>,
}
impl PendingStateRegistry {
	/// Creates a registry with a custom TTL.
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, entries: Mutex::new(HashMap::new()) }
	}

	/// Configured TTL.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Number of entries currently held, including expired ones not yet pruned.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns `true` when no entries are held.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// [`PendingStore::put`] with an explicit clock.
	pub fn put_at(&self, pending: PendingAuthorization, now: OffsetDateTime) -> String {
		let mut entries = self.entries.lock();

		Self::prune_locked(&mut entries, self.ttl, now);

		let mut request_id = auth::new_opaque_token();

		while entries.contains_key(&request_id) {
			request_id = auth::new_opaque_token();
		}

		entries.insert(request_id.clone(), pending);

		request_id
	}

	/// [`PendingStore::take_if_valid`] with an explicit clock.
	pub fn take_if_valid_at(
		&self,
		request_id: &str,
		now: OffsetDateTime,
	) -> Option<PendingAuthorization> {
		let pending = self.entries.lock().remove(request_id)?;

		if pending.is_expired_at(self.ttl, now) {
			tracing::debug!(provider = %pending.provider, "Discarded expired pending authorization.");

			return None;
		}

		Some(pending)
	}

	/// Removes every entry older than the TTL and returns how many were dropped.
	pub fn prune_at(&self, now: OffsetDateTime) -> usize {
		Self::prune_locked(&mut self.entries.lock(), self.ttl, now)
	}

	fn prune_locked(
		entries: &mut HashMap<String, PendingAuthorization>,
		ttl: Duration,
		now: OffsetDateTime,
	) -> usize {
		let before = entries.len();

		entries.retain(|_, pending| !pending.is_expired_at(ttl, now));

		before - entries.len()
	}
}
impl Default for PendingStateRegistry {
	fn default() -> Self {
		Self::new(DEFAULT_STATE_TTL)
	}
}
impl PendingStore for PendingStateRegistry {
	fn put(&self, pending: PendingAuthorization) -> String {
		self.put_at(pending, OffsetDateTime::now_utc())
	}

	fn take_if_valid(&self, request_id: &str) -> Option<PendingAuthorization> {
		self.take_if_valid_at(request_id, OffsetDateTime::now_utc())
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{collections::HashSet, thread};
	// self
	use super::*;

	fn pending_created_at(created_at: OffsetDateTime) -> PendingAuthorization {
		let mut pending = PendingAuthorization::new(
			SubjectId::new("user-1").expect("Subject fixture should be valid."),
			ProviderId::new("garmin").expect("Provider fixture should be valid."),
			Url::parse("https://app.example.com/callback").expect("Redirect fixture should parse."),
		);

		pending.created_at = created_at;

		pending
	}

	#[test]
	fn take_is_exactly_once() {
		let registry = PendingStateRegistry::default();
		let request_id = registry.put(pending_created_at(OffsetDateTime::now_utc()));
		let first = registry.take_if_valid(&request_id).expect("First take should succeed.");

		assert_eq!(first.subject.as_ref(), "user-1");
		assert!(registry.take_if_valid(&request_id).is_none());
		assert!(registry.take_if_valid("never-issued").is_none());
		assert!(registry.is_empty());
	}

	#[test]
	fn request_ids_are_unique_opaque_tokens() {
		let registry = PendingStateRegistry::default();
		let now = OffsetDateTime::now_utc();
		let ids = (0..100).map(|_| registry.put(pending_created_at(now))).collect::<HashSet<_>>();

		assert_eq!(ids.len(), 100);
		assert!(ids.iter().all(|id| id.len() == 43));
		assert_eq!(registry.len(), 100);
	}

	#[test]
	fn prune_drops_entries_older_than_ttl() {
		let registry = PendingStateRegistry::default();
		let now = OffsetDateTime::now_utc();
		let stale_at = now - Duration::minutes(16);
		let fresh_at = now - Duration::minutes(10);
		let stale = registry.put_at(pending_created_at(stale_at), stale_at);
		let fresh = registry.put_at(pending_created_at(fresh_at), fresh_at);

		assert_eq!(registry.len(), 2);
		assert_eq!(registry.prune_at(now), 1);
		assert!(registry.take_if_valid_at(&stale, now).is_none());
		assert!(registry.take_if_valid_at(&fresh, now).is_some());
	}

	#[test]
	fn put_prunes_opportunistically() {
		let registry = PendingStateRegistry::new(Duration::seconds(60));
		let start = OffsetDateTime::now_utc();

		registry.put_at(pending_created_at(start), start);
		registry.put_at(pending_created_at(start), start);

		assert_eq!(registry.len(), 2);

		let later = start + Duration::seconds(61);

		registry.put_at(pending_created_at(later), later);

		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn expired_entry_is_rejected_before_any_prune() {
		let registry = PendingStateRegistry::default();
		let issued = OffsetDateTime::now_utc();
		let request_id = registry.put_at(pending_created_at(issued), issued);

		assert!(registry.take_if_valid_at(&request_id, issued + Duration::minutes(16)).is_none());
		assert!(registry.is_empty(), "Expired entries must still be consumed.");
	}

	#[test]
	fn concurrent_takes_yield_a_single_winner() {
		let registry = Arc::new(PendingStateRegistry::default());
		let request_id = registry.put(pending_created_at(OffsetDateTime::now_utc()));
		let handles = (0..8)
			.map(|_| {
				let registry = registry.clone();
				let request_id = request_id.clone();

				thread::spawn(move || registry.take_if_valid(&request_id).is_some())
			})
			.collect::<Vec<_>>();
		let winners = handles
			.into_iter()
			.map(|handle| handle.join().expect("Take thread should not panic."))
			.filter(|won| *won)
			.count();

		assert_eq!(winners, 1);
	}
}
