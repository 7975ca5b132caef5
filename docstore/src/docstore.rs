use crate::collection::DocStoreCollection;
use crate::common::META_TABLE;
use crate::docstore_builder::DocStoreBuilder;
use crate::docstore_config::DocStoreConfig;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::query::PredicateRegistry;
use crate::store::{validate_collection_name, MetadataStore, SqliteMetadataStore, SqliteStore};
use dashmap::DashMap;
use rusqlite::types::Value as SqlValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An embedded document database backed by one SQLite file.
///
/// `DocStore` uses the PIMPL pattern: clones are cheap and share the same
/// connection, configuration and collection handles. The connection closes
/// when the last clone is dropped; [close](DocStore::close) invalidates every
/// handle right away.
///
/// # Examples
///
/// ```rust,ignore
/// use docstore::{doc, DocStore};
/// use docstore::filter::field;
///
/// let db = DocStore::builder().open_in_memory()?;
/// let users = db.collection("users")?;
/// users.insert(doc!{ "name": "Ann", "age": 30 })?;
///
/// let ann = users.find_one(field("name").eq("Ann"))?;
/// assert!(ann.is_some());
/// ```
#[derive(Clone)]
pub struct DocStore {
    inner: Arc<DocStoreInner>,
}

struct DocStoreInner {
    config: DocStoreConfig,
    store: SqliteStore,
    metadata: Arc<dyn MetadataStore>,
    collections: DashMap<String, DocStoreCollection>,
    closed: AtomicBool,
}

impl DocStore {
    pub fn builder() -> DocStoreBuilder {
        DocStoreBuilder::new()
    }

    pub(crate) fn open(config: DocStoreConfig, path: Option<&str>) -> DocStoreResult<DocStore> {
        let registry = PredicateRegistry::with_sweep_policy(config.sweep_threshold(), config.sweep_interval());
        let store = match path {
            Some(path) => SqliteStore::open(path, registry)?,
            None => SqliteStore::open_in_memory(registry)?,
        };
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(store.clone())?);
        config.mark_initialized();

        log::info!("Opened docstore {}", path.unwrap_or(":memory:"));
        Ok(DocStore {
            inner: Arc::new(DocStoreInner {
                config,
                store,
                metadata,
                collections: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Opens the named collection, creating it on first use.
    ///
    /// Repeated calls return handles sharing the same hooks and settings.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for a name outside `[A-Za-z_][A-Za-z0-9_]*` or a
    /// closed database.
    pub fn collection(&self, name: &str) -> DocStoreResult<DocStoreCollection> {
        self.ensure_opened()?;
        if let Some(collection) = self.inner.collections.get(name) {
            return Ok(collection.clone());
        }
        let collection = self
            .inner
            .collections
            .entry(name.to_string())
            .or_try_insert_with(|| {
                DocStoreCollection::open(
                    name,
                    self.inner.store.clone(),
                    self.inner.metadata.clone(),
                    self.inner.config.clone(),
                )
            })?
            .clone();
        Ok(collection)
    }

    pub fn has_collection(&self, name: &str) -> DocStoreResult<bool> {
        self.ensure_opened()?;
        if name == META_TABLE {
            return Ok(false);
        }
        self.inner.store.table_exists(name)
    }

    /// Names of all collections, sorted.
    pub fn list_collection_names(&self) -> DocStoreResult<Vec<String>> {
        self.ensure_opened()?;
        self.inner.store.query_strings(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' AND name != ? ORDER BY name",
            &[SqlValue::Text(META_TABLE.to_string())],
        )
    }

    /// Drops the collection with its documents and configuration. Open
    /// handles to it fail from now on.
    pub fn drop_collection(&self, name: &str) -> DocStoreResult<()> {
        self.ensure_opened()?;
        validate_collection_name(name)?;
        self.inner.store.drop_table(name)?;
        self.inner.metadata.remove(name)?;
        if let Some((_, collection)) = self.inner.collections.remove(name) {
            collection.mark_dropped();
        }
        log::info!("Dropped collection {}", name);
        Ok(())
    }

    /// Renames a collection. Open handles to the old name fail from now on.
    ///
    /// # Errors
    ///
    /// `NotFound` when `from` does not exist and `InvalidOperation` when
    /// `to` already does.
    pub fn rename_collection(&self, from: &str, to: &str) -> DocStoreResult<()> {
        self.ensure_opened()?;
        validate_collection_name(from)?;
        validate_collection_name(to)?;
        if !self.inner.store.table_exists(from)? {
            log::error!("Collection {} does not exist", from);
            return Err(DocStoreError::new(
                &format!("Collection {} does not exist", from),
                ErrorKind::NotFound,
            ));
        }
        if self.inner.store.table_exists(to)? {
            log::error!("Collection {} already exists", to);
            return Err(DocStoreError::new(
                &format!("Collection {} already exists", to),
                ErrorKind::InvalidOperation,
            ));
        }

        self.inner.store.rename_table(from, to)?;
        self.inner.metadata.rename(from, to)?;
        if let Some((_, collection)) = self.inner.collections.remove(from) {
            collection.mark_dropped();
        }
        log::info!("Renamed collection {} to {}", from, to);
        Ok(())
    }

    pub fn config(&self) -> DocStoreConfig {
        self.inner.config.clone()
    }

    pub fn store(&self) -> SqliteStore {
        self.inner.store.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Invalidates this database and every collection handle obtained from
    /// it. Closing twice is a no-op.
    pub fn close(&self) -> DocStoreResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for entry in self.inner.collections.iter() {
            entry.value().mark_dropped();
        }
        self.inner.collections.clear();
        let swept = self.inner.store.registry().sweep();
        log::info!("Closed docstore, {} orphaned predicates swept", swept);
        Ok(())
    }

    fn ensure_opened(&self) -> DocStoreResult<()> {
        if self.is_closed() {
            log::error!("Docstore is closed");
            return Err(DocStoreError::new("Docstore is closed", ErrorKind::InvalidOperation));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DocStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStore")
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}
