//! Registry of live buffers for one run.
//!
//! Creation goes through a single coarse lock; writes only touch the per-buffer
//! lock, so workers writing to different keys never contend.

use crate::buffer::{BoundedBuffer, FlushResult, SkipReason};
use crate::classifier::{Budget, GroupKey};
use crate::uploader::UploadPool;
use crate::window::RunWindow;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct BufferRegistry {
    buffers: RwLock<HashMap<GroupKey, Arc<BoundedBuffer>>>,
    window: RunWindow,
    path_prefix: String,
    uploads: Arc<UploadPool>,
}

impl BufferRegistry {
    pub fn new(window: RunWindow, path_prefix: impl Into<String>, uploads: Arc<UploadPool>) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            window,
            path_prefix: path_prefix.into(),
            uploads,
        }
    }

    /// Buffer for `key`, created with `budget` on first use.
    ///
    /// Concurrent callers racing on a new key all receive the same instance.
    pub fn get_or_create(&self, key: &GroupKey, budget: Budget) -> Arc<BoundedBuffer> {
        if let Some(buffer) = self.buffers.read().get(key) {
            return Arc::clone(buffer);
        }

        let mut buffers = self.buffers.write();
        let buffer = buffers.entry(key.clone()).or_insert_with(|| {
            let object_key = self.window.destination_key(&self.path_prefix, key);
            debug!(key = %key, object_key = %object_key, limit = budget.limit, "Creating buffer");
            Arc::new(BoundedBuffer::new(
                key.clone(),
                object_key,
                budget,
                Arc::clone(&self.uploads),
            ))
        });
        Arc::clone(buffer)
    }

    pub fn get(&self, key: &GroupKey) -> Option<Arc<BoundedBuffer>> {
        self.buffers.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }

    /// True iff at least one buffer exists and every registered buffer is flushed
    pub fn all_flushed(&self) -> bool {
        let buffers = self.buffers.read();
        !buffers.is_empty() && buffers.values().all(|b| b.is_flushed())
    }

    /// True iff every key in `keys` has a registered, flushed buffer
    pub fn all_flushed_for<'a>(&self, keys: impl IntoIterator<Item = &'a GroupKey>) -> bool {
        let buffers = self.buffers.read();
        let mut seen_any = false;
        for key in keys {
            seen_any = true;
            match buffers.get(key) {
                Some(buffer) if buffer.is_flushed() => {}
                _ => return false,
            }
        }
        seen_any
    }

    /// Flush every buffer still open and return each buffer's final outcome,
    /// ordered by key.
    ///
    /// Buffers that flushed earlier on budget overflow report the result of
    /// that flush.
    pub fn drain_all(&self) -> Vec<(GroupKey, FlushResult)> {
        let mut buffers: Vec<Arc<BoundedBuffer>> = self.buffers.read().values().cloned().collect();
        buffers.sort_by(|a, b| a.key().cmp(b.key()));

        buffers
            .into_iter()
            .map(|buffer| {
                let result = match buffer.flush() {
                    FlushResult::Skipped(SkipReason::AlreadyFlushed) => buffer
                        .flush_outcome()
                        .unwrap_or(FlushResult::Skipped(SkipReason::AlreadyFlushed)),
                    other => other,
                };
                (buffer.key().clone(), result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferState, WriteOutcome};
    use crate::record::Platform;
    use crate::store::memory::MemoryDestination;
    use chrono::{TimeZone, Utc};

    fn registry() -> (Arc<BufferRegistry>, Arc<UploadPool>, Arc<MemoryDestination>) {
        let store = Arc::new(MemoryDestination::new());
        let pool = Arc::new(UploadPool::start(store.clone(), 2));
        let window = RunWindow::for_hour(Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap(), 8);
        let registry = Arc::new(BufferRegistry::new(window, "track", pool.clone()));
        (registry, pool, store)
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let (registry, _pool, _store) = registry();
        let key = GroupKey::new(Platform::Android, "usa");

        let first = registry.get_or_create(&key, Budget::bytes(100));
        let second = registry.get_or_create(&key, Budget::bytes(999));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.budget(), Budget::bytes(100));
        assert_eq!(first.object_key(), "track/2024-01-15/15/android.usa.log.gz");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_yields_one_buffer() {
        let (registry, _pool, _store) = registry();
        let key = GroupKey::new(Platform::Ios, "jpn");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                std::thread::spawn(move || registry.get_or_create(&key, Budget::bytes(1024)))
            })
            .collect();

        let buffers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(buffers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_all_flushed_is_false_when_empty() {
        let (registry, _pool, _store) = registry();
        assert!(!registry.all_flushed());
        assert!(!registry.all_flushed_for(std::iter::empty()));
    }

    #[tokio::test]
    async fn test_all_flushed_tracks_every_buffer() {
        let (registry, _pool, _store) = registry();
        let usa = GroupKey::new(Platform::Android, "usa");
        let bra = GroupKey::new(Platform::Android, "bra");

        registry.get_or_create(&usa, Budget::bytes(6)).write("abcde");
        registry.get_or_create(&bra, Budget::bytes(100)).write("abc");
        assert!(!registry.all_flushed());

        // overflow flushes usa
        assert_eq!(
            registry.get_or_create(&usa, Budget::bytes(6)).write("x"),
            WriteOutcome::Rejected(crate::buffer::Rejection::BudgetExceeded)
        );
        assert!(!registry.all_flushed());
        assert!(registry.all_flushed_for([&usa]));
        assert!(!registry.all_flushed_for([&usa, &bra]));

        registry.get(&bra).unwrap().flush();
        assert!(registry.all_flushed());
    }

    #[tokio::test]
    async fn test_drain_all_reports_every_buffer() {
        let (registry, pool, store) = registry();
        let usa = GroupKey::new(Platform::Android, "usa");
        let idn = GroupKey::new(Platform::Android, "idn");
        let tha = GroupKey::new(Platform::Ios, "tha");

        registry.get_or_create(&usa, Budget::bytes(6)).write("abcde");
        registry.get_or_create(&usa, Budget::bytes(6)).write("overflow");
        registry.get_or_create(&idn, Budget::bytes(100)).write("partial");
        registry.get_or_create(&tha, Budget::bytes(4)).write("too long for the budget");

        let drained = registry.drain_all();
        assert_eq!(drained.len(), 3);

        let (key, result) = &drained[0];
        assert_eq!(key, &idn);
        assert!(matches!(result, FlushResult::Uploaded { line_count: 1, .. }));

        let (key, result) = &drained[1];
        assert_eq!(key, &usa);
        assert!(matches!(result, FlushResult::Uploaded { line_count: 1, .. }));

        let (key, result) = &drained[2];
        assert_eq!(key, &tha);
        assert!(matches!(result, FlushResult::Skipped(SkipReason::EmptyBuffer)));
        assert_eq!(registry.get(&tha).unwrap().state(), BufferState::Open);

        let reports = pool.finish().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(
            store.keys(),
            vec![
                "track/2024-01-15/15/android.idn.log.gz".to_string(),
                "track/2024-01-15/15/android.usa.log.gz".to_string(),
            ]
        );
    }
}
