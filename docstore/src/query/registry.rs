use crate::collection::Document;
use crate::common::{DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_SWEEP_THRESHOLD};
use crate::filter::{Criteria, DocumentPredicate};
use crate::store::DocumentCodec;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// A predicate the storage engine cannot evaluate natively.
#[derive(Clone)]
pub enum FallbackPredicate {
    /// Evaluated with the predicate matcher.
    Criteria(Criteria),
    /// Caller supplied callback over the decoded document.
    Callback(DocumentPredicate),
}

impl FallbackPredicate {
    fn evaluate(&self, document: &Document) -> bool {
        match self {
            FallbackPredicate::Criteria(criteria) => criteria.matches(document),
            FallbackPredicate::Callback(callback) => callback(document),
        }
    }
}

struct Entry {
    predicate: FallbackPredicate,
    codec: DocumentCodec,
    owner: Weak<()>,
}

/// Table of fallback predicates invoked by the `docstore_match(token, data)`
/// SQL function, once per scanned row.
///
/// The registry is owned by one [crate::store::SqliteStore]. Each
/// registration hands back a [PredicateLease]; dropping the lease removes the
/// entry. Leases only hold a weak reference to the registry, so an
/// outstanding lease does not keep the store alive. Every entry also keeps a
/// weak reference to its lease's owner token; entries whose owner is gone
/// are reclaimed by [PredicateRegistry::sweep], which runs opportunistically
/// on registration when the table grows past a threshold or an interval has
/// elapsed since the previous sweep.
#[derive(Clone)]
pub struct PredicateRegistry {
    inner: Arc<RegistryInner>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::with_sweep_policy(
            DEFAULT_SWEEP_THRESHOLD,
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        )
    }

    pub fn with_sweep_policy(threshold: usize, interval: Duration) -> Self {
        PredicateRegistry {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                next_id: AtomicU64::new(1),
                last_sweep: Mutex::new(Instant::now()),
                sweep_threshold: threshold,
                sweep_interval: interval,
            }),
        }
    }

    /// Registers a predicate whose rows are decoded with `codec`.
    pub fn register(&self, predicate: FallbackPredicate, codec: DocumentCodec) -> PredicateLease {
        self.inner.maybe_sweep();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let owner = Arc::new(());
        self.inner.entries.insert(
            id,
            Arc::new(Entry {
                predicate,
                codec,
                owner: Arc::downgrade(&owner),
            }),
        );
        log::debug!("Registered fallback predicate {}", id);

        PredicateLease {
            id,
            registry: Arc::downgrade(&self.inner),
            _owner: owner,
        }
    }

    /// Decodes the raw row and evaluates predicate `id` against it.
    ///
    /// Unknown ids and undecodable rows evaluate to `false`.
    pub fn invoke(&self, id: u64, raw: &str) -> bool {
        self.inner.invoke(id, raw)
    }

    /// Removes entries whose lease no longer exists. Returns the number of
    /// entries removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for PredicateRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PredicateRegistry({} entries)", self.len())
    }
}

/// Weak handle captured by the SQL function so the function does not keep
/// the registry alive.
#[derive(Clone)]
pub(crate) struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    pub(crate) fn invoke(&self, id: u64, raw: &str) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.invoke(id, raw),
            None => false,
        }
    }
}

struct RegistryInner {
    entries: DashMap<u64, Arc<Entry>>,
    next_id: AtomicU64,
    last_sweep: Mutex<Instant>,
    sweep_threshold: usize,
    sweep_interval: Duration,
}

impl RegistryInner {
    fn invoke(&self, id: u64, raw: &str) -> bool {
        // clone the entry out so the shard lock is not held while matching
        let entry = match self.entries.get(&id) {
            Some(entry) => entry.value().clone(),
            None => {
                log::warn!("Fallback predicate {} is not registered", id);
                return false;
            }
        };
        match entry.codec.decode(raw) {
            Some(document) => entry.predicate.evaluate(&document),
            None => false,
        }
    }

    fn maybe_sweep(&self) {
        let due = {
            let last = self.last_sweep.lock();
            self.entries.len() > self.sweep_threshold || last.elapsed() >= self.sweep_interval
        };
        if due {
            self.sweep();
        }
    }

    fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.owner.strong_count() > 0);
        *self.last_sweep.lock() = Instant::now();
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            log::debug!("Swept {} orphaned fallback predicates", removed);
        }
        removed
    }
}

/// Keeps a fallback predicate registered. Dropping the lease unregisters it.
pub struct PredicateLease {
    id: u64,
    registry: Weak<RegistryInner>,
    _owner: Arc<()>,
}

impl PredicateLease {
    /// Token passed to the SQL function.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Debug for PredicateLease {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PredicateLease({})", self.id)
    }
}

impl Drop for PredicateLease {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.entries.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::field;

    fn raw(document: &Document) -> String {
        DocumentCodec::Plain.encode(document).unwrap()
    }

    #[test]
    fn invoke_matches_registered_criteria() {
        let registry = PredicateRegistry::new();
        let lease = registry.register(
            FallbackPredicate::Criteria(field("age").gte(18)),
            DocumentCodec::Plain,
        );
        assert!(registry.invoke(lease.id(), &raw(&doc! { "age": 30 })));
        assert!(!registry.invoke(lease.id(), &raw(&doc! { "age": 3 })));
    }

    #[test]
    fn invoke_callback() {
        let registry = PredicateRegistry::new();
        let callback: DocumentPredicate = Arc::new(|doc: &Document| doc.contains_key("flag"));
        let lease = registry.register(FallbackPredicate::Callback(callback), DocumentCodec::Plain);
        assert!(registry.invoke(lease.id(), &raw(&doc! { "flag": 1 })));
        assert!(!registry.invoke(lease.id(), &raw(&doc! { "other": 1 })));
    }

    #[test]
    fn unknown_id_and_garbage_are_false() {
        let registry = PredicateRegistry::new();
        assert!(!registry.invoke(42, "{}"));
        let lease = registry.register(FallbackPredicate::Criteria(Criteria::all()), DocumentCodec::Plain);
        assert!(!registry.invoke(lease.id(), "not json"));
        assert!(registry.invoke(lease.id(), "{}"));
    }

    #[test]
    fn dropping_lease_unregisters() {
        let registry = PredicateRegistry::new();
        let lease = registry.register(FallbackPredicate::Criteria(Criteria::all()), DocumentCodec::Plain);
        let id = lease.id();
        assert_eq!(registry.len(), 1);
        drop(lease);
        assert!(registry.is_empty());
        assert!(!registry.invoke(id, "{}"));
    }

    fn insert_orphan(registry: &PredicateRegistry, id: u64) {
        registry.inner.entries.insert(
            id,
            Arc::new(Entry {
                predicate: FallbackPredicate::Criteria(Criteria::all()),
                codec: DocumentCodec::Plain,
                owner: Weak::new(),
            }),
        );
    }

    #[test]
    fn sweep_reclaims_orphans_only() {
        let registry = PredicateRegistry::with_sweep_policy(100, Duration::from_secs(3600));
        let live = registry.register(FallbackPredicate::Criteria(Criteria::all()), DocumentCodec::Plain);
        insert_orphan(&registry, 1000);
        insert_orphan(&registry, 1001);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.sweep(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.invoke(live.id(), "{}"));
    }

    #[test]
    fn registration_sweeps_past_threshold() {
        let registry = PredicateRegistry::with_sweep_policy(2, Duration::from_secs(3600));
        for id in 1000..1003 {
            insert_orphan(&registry, id);
        }
        let live = registry.register(FallbackPredicate::Criteria(Criteria::all()), DocumentCodec::Plain);
        assert_eq!(registry.len(), 1);
        assert!(registry.invoke(live.id(), "{}"));
    }

    #[test]
    fn registration_sweeps_after_interval() {
        let registry = PredicateRegistry::with_sweep_policy(100, Duration::from_millis(0));
        insert_orphan(&registry, 1000);
        let _live = registry.register(FallbackPredicate::Criteria(Criteria::all()), DocumentCodec::Plain);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lease_does_not_keep_registry_alive() {
        let registry = PredicateRegistry::new();
        let weak = registry.downgrade();
        let lease = registry.register(FallbackPredicate::Criteria(Criteria::all()), DocumentCodec::Plain);
        drop(registry);
        assert!(!weak.invoke(lease.id(), "{}"));
        drop(lease);
    }
}
