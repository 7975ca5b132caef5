use crate::docstore::DocStore;
use crate::docstore_config::DocStoreConfig;
use crate::errors::{DocStoreError, DocStoreResult};
use std::time::Duration;

/// Builder for opening a [DocStore].
///
/// The first invalid setting is captured and returned from `open` or
/// `open_in_memory`; later settings are ignored once one has failed.
///
/// # Examples
///
/// ```rust,ignore
/// use docstore::DocStore;
///
/// let db = DocStore::builder()
///     .encryption_key("a sufficiently long and unguessable secret")
///     .max_unbounded_results(50_000)
///     .open("app.db")?;
/// ```
#[derive(Default)]
pub struct DocStoreBuilder {
    error: Option<DocStoreError>,
    config: DocStoreConfig,
}

impl DocStoreBuilder {
    pub fn new() -> Self {
        DocStoreBuilder {
            error: None,
            config: DocStoreConfig::new(),
        }
    }

    /// Database-wide encryption secret, inherited by every collection that
    /// has no key of its own.
    ///
    /// # Errors
    ///
    /// A weak secret is captured as `SecurityError` and returned on open.
    pub fn encryption_key(self, secret: &str) -> Self {
        self.apply(|config| config.set_encryption_key(secret))
    }

    /// Largest result `to_array` may load without an explicit limit.
    pub fn max_unbounded_results(self, max: usize) -> Self {
        self.apply(|config| config.set_max_unbounded_results(max))
    }

    /// Limit `to_array_safe` applies when the cursor has none.
    pub fn safe_result_cap(self, cap: usize) -> Self {
        self.apply(|config| config.set_safe_result_cap(cap))
    }

    pub fn sweep_threshold(self, threshold: usize) -> Self {
        self.apply(|config| config.set_sweep_threshold(threshold))
    }

    pub fn sweep_interval(self, interval: Duration) -> Self {
        self.apply(|config| config.set_sweep_interval(interval))
    }

    /// Opens (or creates) the database file at `path`.
    pub fn open(self, path: &str) -> DocStoreResult<DocStore> {
        if let Some(error) = self.error {
            return Err(error);
        }
        DocStore::open(self.config, Some(path))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(self) -> DocStoreResult<DocStore> {
        if let Some(error) = self.error {
            return Err(error);
        }
        DocStore::open(self.config, None)
    }

    fn apply<F>(mut self, setter: F) -> Self
    where
        F: FnOnce(&DocStoreConfig) -> DocStoreResult<()>,
    {
        if self.error.is_none() {
            if let Err(e) = setter(&self.config) {
                self.error = Some(e);
            }
        }
        self
    }
}
