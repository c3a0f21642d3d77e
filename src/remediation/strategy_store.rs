//! Strategy statistics store.
//!
//! [`StrategyStore`] is the persistence seam (`load`/`save` per fix type).
//! [`StrategyStats`] wraps a store with per-key locks so that concurrent
//! sessions updating the same fix type serialize their read-modify-write
//! cycles, while different fix types proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::types::StrategyStat;
use crate::error::StorageResult;

// ============================================================================
// Persistence Trait
// ============================================================================

/// Persistence for [`StrategyStat`] records, keyed by fix type.
///
/// Implementations must provide read-your-writes per key.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// Load the statistics for a fix type, if any were saved.
    async fn load(&self, fix_type: &str) -> StorageResult<Option<StrategyStat>>;

    /// Save (insert or replace) statistics.
    async fn save(&self, stat: &StrategyStat) -> StorageResult<()>;

    /// Load every saved record, ordered by fix type.
    async fn load_all(&self) -> StorageResult<Vec<StrategyStat>>;

    /// Delete the statistics for a fix type. Returns whether a record existed.
    async fn delete(&self, fix_type: &str) -> StorageResult<bool>;
}

/// Process-local store, used in tests and when no database is configured.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStrategyStore {
    stats: Arc<RwLock<HashMap<String, StrategyStat>>>,
}

impl InMemoryStrategyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StrategyStore for InMemoryStrategyStore {
    async fn load(&self, fix_type: &str) -> StorageResult<Option<StrategyStat>> {
        Ok(self.stats.read().await.get(fix_type).cloned())
    }

    async fn save(&self, stat: &StrategyStat) -> StorageResult<()> {
        self.stats
            .write()
            .await
            .insert(stat.fix_type.clone(), stat.clone());
        Ok(())
    }

    async fn load_all(&self) -> StorageResult<Vec<StrategyStat>> {
        let mut all: Vec<StrategyStat> = self.stats.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.fix_type.cmp(&b.fix_type));
        Ok(all)
    }

    async fn delete(&self, fix_type: &str) -> StorageResult<bool> {
        Ok(self.stats.write().await.remove(fix_type).is_some())
    }
}

// ============================================================================
// Locked Access
// ============================================================================

/// Shared handle to strategy statistics with per-fix-type locking.
#[derive(Clone)]
pub struct StrategyStats {
    store: Arc<dyn StrategyStore>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl StrategyStats {
    /// Wrap a persistence implementation.
    pub fn new(store: Arc<dyn StrategyStore>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStrategyStore::new()))
    }

    async fn key_lock(&self, fix_type: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(fix_type.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current statistics for a fix type, or fresh ones if none exist.
    pub async fn get(&self, fix_type: &str) -> StorageResult<StrategyStat> {
        Ok(self
            .store
            .load(fix_type)
            .await?
            .unwrap_or_else(|| StrategyStat::new(fix_type)))
    }

    /// Saved statistics for the given fix types. Types with no history are
    /// absent from the result.
    pub async fn snapshot<'a, I>(&self, fix_types: I) -> StorageResult<HashMap<String, StrategyStat>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut snapshot = HashMap::new();
        for fix_type in fix_types {
            if snapshot.contains_key(fix_type) {
                continue;
            }
            if let Some(stat) = self.store.load(fix_type).await? {
                snapshot.insert(fix_type.to_string(), stat);
            }
        }
        Ok(snapshot)
    }

    /// Read-modify-write the statistics for one fix type under its lock.
    ///
    /// Returns the saved value.
    pub async fn update<F>(&self, fix_type: &str, apply: F) -> StorageResult<StrategyStat>
    where
        F: FnOnce(&mut StrategyStat),
    {
        let lock = self.key_lock(fix_type).await;
        let _guard = lock.lock().await;

        let mut stat = self.get(fix_type).await?;
        apply(&mut stat);
        self.store.save(&stat).await?;

        debug!(
            fix_type = %fix_type,
            samples = stat.sample_count,
            success_rate = stat.success_rate,
            "Strategy statistics saved"
        );
        Ok(stat)
    }

    /// All saved statistics.
    pub async fn all(&self) -> StorageResult<Vec<StrategyStat>> {
        self.store.load_all().await
    }

    /// Forget the history of a fix type.
    pub async fn reset(&self, fix_type: &str) -> StorageResult<bool> {
        let lock = self.key_lock(fix_type).await;
        let _guard = lock.lock().await;
        self.store.delete(fix_type).await
    }
}

impl std::fmt::Debug for StrategyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyStats").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_fresh_stat_for_unknown_type() {
        let stats = StrategyStats::in_memory();
        let stat = stats.get("color_correction").await.unwrap();
        assert_eq!(stat.sample_count, 0);
        assert_eq!(stat.fix_type, "color_correction");
    }

    #[tokio::test]
    async fn test_update_is_read_your_writes() {
        let stats = StrategyStats::in_memory();
        stats
            .update("font_replacement", |s| s.sample_count += 1)
            .await
            .unwrap();

        let stat = stats.get("font_replacement").await.unwrap();
        assert_eq!(stat.sample_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_same_key_are_not_lost() {
        let stats = StrategyStats::in_memory();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                stats
                    .update("color_correction", |s| s.sample_count += 1)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(stats.get("color_correction").await.unwrap().sample_count, 20);
    }

    #[tokio::test]
    async fn test_snapshot_omits_types_without_history() {
        let stats = StrategyStats::in_memory();
        stats.update("text_reflow", |_| {}).await.unwrap();

        let snapshot = stats
            .snapshot(["text_reflow", "logo_reposition"])
            .await
            .unwrap();
        assert!(snapshot.contains_key("text_reflow"));
        assert!(!snapshot.contains_key("logo_reposition"));
    }

    #[tokio::test]
    async fn test_reset_removes_history() {
        let stats = StrategyStats::in_memory();
        stats.update("text_reflow", |_| {}).await.unwrap();

        assert!(stats.reset("text_reflow").await.unwrap());
        assert!(!stats.reset("text_reflow").await.unwrap());
        assert!(stats.all().await.unwrap().is_empty());
    }
}
