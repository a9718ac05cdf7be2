//! Sharded connection registry
//!
//! Maps connection ids to live transport handles. Ids are spread over a
//! power-of-two number of shards by hash, each shard behind its own
//! reader-writer lock, so lookups only contend with writers on the same shard.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tracing::debug;

use crate::error::{MatchingError, Result};
use crate::request::ChannelId;
use crate::transport::SharedHandle;

/// Default number of shards
pub const DEFAULT_SHARD_COUNT: usize = 128;

type Shard = RwLock<HashMap<ChannelId, SharedHandle>>;

/// Live connections keyed by [`ChannelId`]
///
/// Shared by the ingest side, which registers and unregisters handles, and the
/// notification consumers, which look them up to deliver match results.
pub struct ConnectionRegistry {
    shards: Vec<Shard>,
    mask: usize,
}

impl ConnectionRegistry {
    /// Registry with [`DEFAULT_SHARD_COUNT`] shards
    pub fn new() -> Self {
        Self::build(DEFAULT_SHARD_COUNT)
    }

    /// Registry with `shard_count` shards; the count must be a power of two
    pub fn with_shards(shard_count: usize) -> Result<Self> {
        if shard_count == 0 || !shard_count.is_power_of_two() {
            return Err(MatchingError::InvalidConfig(format!(
                "shard count must be a power of two, got {shard_count}"
            )));
        }
        Ok(Self::build(shard_count))
    }

    fn build(shard_count: usize) -> Self {
        Self {
            shards: (0..shard_count).map(|_| RwLock::new(HashMap::new())).collect(),
            mask: shard_count - 1,
        }
    }

    /// Number of shards, always a power of two
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard holding `id`
    pub fn shard_index(&self, id: &ChannelId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() as usize & 0x7FFF_FFFF) & self.mask
    }

    /// Insert a handle under its own id, returning any handle it replaced
    pub fn register(&self, handle: SharedHandle) -> Option<SharedHandle> {
        let id = handle.id().clone();
        let shard = self.shard_index(&id);
        debug!(channel = %id, shard, "Registering connection");
        self.shards[shard].write().insert(id, handle)
    }

    /// Remove the handle under `id`. A no-op for unknown ids.
    pub fn unregister(&self, id: &ChannelId) -> Option<SharedHandle> {
        let shard = self.shard_index(id);
        debug!(channel = %id, shard, "Unregistering connection");
        self.shards[shard].write().remove(id)
    }

    /// Handle registered under `id`, if the connection is still live.
    ///
    /// Takes a read lock on one shard only.
    ///
    /// # Example
    ///
    /// ```
    /// use matchmaking::{ChannelHandle, ChannelId, ConnectionRegistry};
    /// use std::sync::Arc;
    ///
    /// let registry = ConnectionRegistry::new();
    /// let (handle, _rx) = ChannelHandle::new("ws-1");
    /// registry.register(Arc::new(handle));
    ///
    /// assert!(registry.lookup(&ChannelId::from("ws-1")).is_some());
    /// assert!(registry.lookup(&ChannelId::from("ws-2")).is_none());
    /// ```
    pub fn lookup(&self, id: &ChannelId) -> Option<SharedHandle> {
        self.shards[self.shard_index(id)].read().get(id).cloned()
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.shards[self.shard_index(id)].read().contains_key(id)
    }

    /// Total registered connections (sums every shard)
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelHandle;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[test]
    fn test_register_lookup_unregister() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ChannelHandle::new("conn-1");
        let id = ChannelId::from("conn-1");

        assert!(registry.register(Arc::new(handle)).is_none());
        assert!(registry.contains(&id));
        assert_eq!(registry.lookup(&id).unwrap().id(), &id);
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&id).is_some());
        assert!(registry.lookup(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = ChannelHandle::new("dup");
        let (second, _rx2) = ChannelHandle::new("dup");

        registry.register(Arc::new(first));
        assert!(registry.register(Arc::new(second)).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_shard_index_is_stable() {
        let registry = ConnectionRegistry::with_shards(16).unwrap();
        let id = ChannelId::from("stable");
        let shard = registry.shard_index(&id);

        assert!(shard < 16);
        for _ in 0..10 {
            assert_eq!(registry.shard_index(&id), shard);
        }
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert_matches!(
            ConnectionRegistry::with_shards(100).err(),
            Some(MatchingError::InvalidConfig(_))
        );
        assert_matches!(
            ConnectionRegistry::with_shards(0).err(),
            Some(MatchingError::InvalidConfig(_))
        );
    }

    #[test]
    fn test_unknown_id() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup(&ChannelId::from("ghost")).is_none());
        assert!(registry.unregister(&ChannelId::from("ghost")).is_none());
    }
}
