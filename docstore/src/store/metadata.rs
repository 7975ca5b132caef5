use crate::collection::CollectionConfig;
use crate::common::META_TABLE;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::store::SqliteStore;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;

/// Per-collection change counter and the time of the last change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeVersion {
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Key-value persistence of collection configuration and change versions,
/// keyed by collection name.
pub trait MetadataStore: Send + Sync {
    fn load_config(&self, collection: &str) -> DocStoreResult<Option<CollectionConfig>>;

    fn save_config(&self, collection: &str, config: &CollectionConfig) -> DocStoreResult<()>;

    /// Increments the change version by one and returns the new value.
    fn bump_version(&self, collection: &str) -> DocStoreResult<u64>;

    fn version(&self, collection: &str) -> DocStoreResult<ChangeVersion>;

    /// Forgets everything recorded for a collection.
    fn remove(&self, collection: &str) -> DocStoreResult<()>;

    fn rename(&self, from: &str, to: &str) -> DocStoreResult<()>;
}

/// [MetadataStore] kept in the `_docstore_meta` table of the same database.
#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    store: SqliteStore,
}

impl SqliteMetadataStore {
    pub fn new(store: SqliteStore) -> DocStoreResult<Self> {
        store.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 collection TEXT PRIMARY KEY, \
                 config TEXT, \
                 version INTEGER NOT NULL DEFAULT 0, \
                 updated_at TEXT)",
                META_TABLE
            ),
            &[],
        )?;
        Ok(SqliteMetadataStore { store })
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn load_config(&self, collection: &str) -> DocStoreResult<Option<CollectionConfig>> {
        let rows = self.store.query_rows(
            &format!("SELECT config FROM {} WHERE collection = ?", META_TABLE),
            &[SqlValue::Text(collection.to_string())],
            |row| row.get::<_, Option<String>>(0),
        )?;
        match rows.into_iter().flatten().next() {
            Some(json) => match CollectionConfig::from_json_str(&json) {
                Ok(config) => Ok(Some(config)),
                Err(err) => {
                    log::error!("Corrupted configuration for collection {}: {}", collection, err);
                    Err(DocStoreError::new(
                        &format!("Corrupted configuration for collection {}: {}", collection, err),
                        ErrorKind::EncodingError,
                    ))
                }
            },
            None => Ok(None),
        }
    }

    fn save_config(&self, collection: &str, config: &CollectionConfig) -> DocStoreResult<()> {
        let json = config.to_json_string()?;
        self.store.execute(
            &format!(
                "INSERT INTO {} (collection, config) VALUES (?, ?) \
                 ON CONFLICT(collection) DO UPDATE SET config = excluded.config",
                META_TABLE
            ),
            &[SqlValue::Text(collection.to_string()), SqlValue::Text(json)],
        )?;
        Ok(())
    }

    fn bump_version(&self, collection: &str) -> DocStoreResult<u64> {
        let now = Utc::now().to_rfc3339();
        self.store.execute(
            &format!(
                "INSERT INTO {} (collection, version, updated_at) VALUES (?, 1, ?) \
                 ON CONFLICT(collection) DO UPDATE SET version = version + 1, updated_at = excluded.updated_at",
                META_TABLE
            ),
            &[SqlValue::Text(collection.to_string()), SqlValue::Text(now)],
        )?;
        Ok(self.version(collection)?.version)
    }

    fn version(&self, collection: &str) -> DocStoreResult<ChangeVersion> {
        let rows = self.store.query_rows(
            &format!("SELECT version, updated_at FROM {} WHERE collection = ?", META_TABLE),
            &[SqlValue::Text(collection.to_string())],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
        )?;
        Ok(match rows.into_iter().next() {
            Some((version, updated_at)) => ChangeVersion {
                version: version.max(0) as u64,
                updated_at: updated_at
                    .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
                    .map(|time| time.with_timezone(&Utc)),
            },
            None => ChangeVersion::default(),
        })
    }

    fn remove(&self, collection: &str) -> DocStoreResult<()> {
        self.store.execute(
            &format!("DELETE FROM {} WHERE collection = ?", META_TABLE),
            &[SqlValue::Text(collection.to_string())],
        )?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> DocStoreResult<()> {
        self.store.execute(
            &format!("UPDATE {} SET collection = ? WHERE collection = ?", META_TABLE),
            &[SqlValue::Text(to.to_string()), SqlValue::Text(from.to_string())],
        )?;
        Ok(())
    }
}
