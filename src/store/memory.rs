//! Thread-safe in-memory [`TokenStore`] for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	store::{StoreError, StoreFuture, StoreKey, TokenStore},
};

type StoreMap = Arc<RwLock<HashMap<StoreKey, TokenRecord>>>;

/// Process-local storage backend; records vanish with the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored records.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn save_now(map: StoreMap, key: StoreKey, record: TokenRecord) -> Result<(), StoreError> {
		map.write().insert(key, record);

		Ok(())
	}

	fn get_now(map: StoreMap, key: &StoreKey) -> Option<TokenRecord> {
		map.read().get(key).cloned()
	}

	fn delete_now(map: StoreMap, key: &StoreKey) {
		map.write().remove(key);
	}
}
impl TokenStore for MemoryStore {
	fn save<'a>(&'a self, key: &'a StoreKey, record: TokenRecord) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Self::save_now(map, key, record) })
	}

	fn get<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<TokenRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::get_now(map, key)) })
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			Self::delete_now(map, key);

			Ok(())
		})
	}
}
