//! Configuration of a docstore database.

use crate::common::{
    EncryptionKey, DEFAULT_MAX_UNBOUNDED_RESULTS, DEFAULT_SAFE_RESULT_CAP, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_SWEEP_THRESHOLD,
};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Database-wide settings.
///
/// Settings can only change until the database is opened; afterwards every
/// setter fails with `InvalidOperation`. Clones share the same settings.
///
/// # Examples
///
/// ```rust,ignore
/// use docstore::DocStore;
///
/// let db = DocStore::builder()
///     .max_unbounded_results(50_000)
///     .open_in_memory()?;
/// assert_eq!(db.config().max_unbounded_results(), 50_000);
/// ```
#[derive(Clone)]
pub struct DocStoreConfig {
    inner: Arc<DocStoreConfigInner>,
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DocStoreConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        DocStoreConfig {
            inner: Arc::new(DocStoreConfigInner {
                encryption_key: RwLock::new(None),
                max_unbounded_results: AtomicUsize::new(DEFAULT_MAX_UNBOUNDED_RESULTS),
                safe_result_cap: AtomicUsize::new(DEFAULT_SAFE_RESULT_CAP),
                sweep_threshold: AtomicUsize::new(DEFAULT_SWEEP_THRESHOLD),
                sweep_interval_secs: AtomicU64::new(DEFAULT_SWEEP_INTERVAL_SECS),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Key inherited by every collection that has no key of its own.
    pub fn encryption_key(&self) -> Option<EncryptionKey> {
        self.inner.encryption_key.read().clone()
    }

    /// Sets the database-wide encryption secret.
    ///
    /// # Errors
    ///
    /// Returns `SecurityError` for a weak secret and `InvalidOperation` once
    /// the database is open.
    pub fn set_encryption_key(&self, secret: &str) -> DocStoreResult<()> {
        self.ensure_mutable()?;
        let key = EncryptionKey::new(secret)?;
        *self.inner.encryption_key.write() = Some(key);
        Ok(())
    }

    /// Largest result `to_array` materializes without an explicit limit.
    pub fn max_unbounded_results(&self) -> usize {
        self.inner.max_unbounded_results.load(Ordering::Relaxed)
    }

    pub fn set_max_unbounded_results(&self, max: usize) -> DocStoreResult<()> {
        self.ensure_mutable()?;
        ensure_positive("max_unbounded_results", max as u64)?;
        self.inner.max_unbounded_results.store(max, Ordering::Relaxed);
        Ok(())
    }

    /// Limit `to_array_safe` applies when the cursor has none.
    pub fn safe_result_cap(&self) -> usize {
        self.inner.safe_result_cap.load(Ordering::Relaxed)
    }

    pub fn set_safe_result_cap(&self, cap: usize) -> DocStoreResult<()> {
        self.ensure_mutable()?;
        ensure_positive("safe_result_cap", cap as u64)?;
        self.inner.safe_result_cap.store(cap, Ordering::Relaxed);
        Ok(())
    }

    /// Registry size past which a registration sweeps orphaned predicates.
    pub fn sweep_threshold(&self) -> usize {
        self.inner.sweep_threshold.load(Ordering::Relaxed)
    }

    pub fn set_sweep_threshold(&self, threshold: usize) -> DocStoreResult<()> {
        self.ensure_mutable()?;
        ensure_positive("sweep_threshold", threshold as u64)?;
        self.inner.sweep_threshold.store(threshold, Ordering::Relaxed);
        Ok(())
    }

    /// Time after which a registration sweeps regardless of size.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.inner.sweep_interval_secs.load(Ordering::Relaxed))
    }

    pub fn set_sweep_interval(&self, interval: Duration) -> DocStoreResult<()> {
        self.ensure_mutable()?;
        self.inner.sweep_interval_secs.store(interval.as_secs(), Ordering::Relaxed);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.inner.initialized.store(true, Ordering::Release);
    }

    fn ensure_mutable(&self) -> DocStoreResult<()> {
        if self.is_initialized() {
            log::error!("Cannot change configuration after the database is opened");
            return Err(DocStoreError::new(
                "Cannot change configuration after the database is opened",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }
}

impl Debug for DocStoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStoreConfig")
            .field("encrypted", &self.encryption_key().is_some())
            .field("max_unbounded_results", &self.max_unbounded_results())
            .field("safe_result_cap", &self.safe_result_cap())
            .field("sweep_threshold", &self.sweep_threshold())
            .field("sweep_interval", &self.sweep_interval())
            .finish()
    }
}

struct DocStoreConfigInner {
    encryption_key: RwLock<Option<EncryptionKey>>,
    max_unbounded_results: AtomicUsize,
    safe_result_cap: AtomicUsize,
    sweep_threshold: AtomicUsize,
    sweep_interval_secs: AtomicU64,
    initialized: AtomicBool,
}

fn ensure_positive(name: &str, value: u64) -> DocStoreResult<()> {
    if value == 0 {
        log::error!("{} must be greater than zero", name);
        return Err(DocStoreError::new(
            &format!("{} must be greater than zero", name),
            ErrorKind::InvalidOperation,
        ));
    }
    Ok(())
}
