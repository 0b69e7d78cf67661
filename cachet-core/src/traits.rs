//! Capabilities supplied by the embedding application.
//!
//! The cache never talks to persistent storage directly. It is handed a
//! [`BackingStore`] for persistence and cache-aside reads and, optionally,
//! a [`Loader`] for computing values on miss and on refresh.

use crate::entry::{CacheKey, CacheValue};
use crate::error::{LoadError, StoreError};
use async_trait::async_trait;

/// Persistent store behind the cache.
#[async_trait]
pub trait BackingStore<K: CacheKey, V: CacheValue>: Send + Sync {
    /// Read the stored value for a key.
    async fn read(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Persist a value. Returning `Ok` acknowledges the write.
    async fn write(&self, key: &K, value: &V) -> Result<(), StoreError>;
}

/// Value source used on miss and on refresh.
///
/// `Ok(None)` means the key has no value; a refresh that observes it removes
/// the cached entry.
#[async_trait]
pub trait Loader<K: CacheKey, V: CacheValue>: Send + Sync {
    async fn load(&self, key: &K) -> Result<Option<V>, LoadError>;
}

/// Adapts a synchronous closure into a [`Loader`].
pub struct FnLoader<F>(pub F);

#[async_trait]
impl<K, V, F> Loader<K, V> for FnLoader<F>
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(&K) -> Result<Option<V>, LoadError> + Send + Sync,
{
    async fn load(&self, key: &K) -> Result<Option<V>, LoadError> {
        (self.0)(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_loader_delegates() {
        let loader = FnLoader(|key: &String| -> Result<Option<usize>, LoadError> {
            if key.is_empty() {
                Err(LoadError::Failed {
                    key: key.clone(),
                    reason: "empty key".to_string(),
                })
            } else {
                Ok(Some(key.len()))
            }
        });

        assert_eq!(loader.load(&"abcd".to_string()).await, Ok(Some(4)));
        assert!(loader.load(&String::new()).await.is_err());
    }
}
