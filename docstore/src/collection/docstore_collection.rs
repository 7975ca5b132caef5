use super::operation::{CollectionState, ReadOperations, WriteOperations, WriteResult};
use super::{CollectionConfig, Document, HookChain, HookOutcome, IdDecoration, IdMode, Schema, UpdateRequest};
use crate::common::{EncryptionKey, Value, DOC_ID};
use crate::cursor::{DocumentCursor, Population};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::filter::Criteria;
use crate::index::{column_collision, search_column, SearchableField, SearchableFields};
use crate::store::{validate_collection_name, ChangeVersion, DocumentCodec, MetadataStore, SqliteStore};
use crate::DocStoreConfig;
use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A named collection of documents.
///
/// `DocStoreCollection` is a cheap handle: clones share the same
/// configuration, hooks and connection. Obtain one with
/// [DocStore::collection](crate::DocStore::collection).
///
/// # Examples
///
/// ```rust,ignore
/// use docstore::doc;
/// use docstore::filter::field;
///
/// let users = db.collection("users")?;
/// users.insert(doc!{ "name": "Ann", "age": 30 })?;
/// users.insert(doc!{ "name": "Bo", "age": 17 })?;
///
/// let adults = users.find(field("age").gte(18))?.to_array()?;
/// assert_eq!(adults.len(), 1);
/// ```
///
/// # Configuration
///
/// Schema, searchable fields, soft delete and id generation are stored in
/// the metadata table and survive a reopen. Changes apply to operations that
/// start afterwards. Encryption keys are never stored; a collection opened
/// with its own key must be given it again after a reopen.
#[derive(Clone)]
pub struct DocStoreCollection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    name: String,
    store: SqliteStore,
    metadata: Arc<dyn MetadataStore>,
    db_config: DocStoreConfig,
    settings: RwLock<CollectionSettings>,
    hooks: HookChain,
    read_ops: ReadOperations,
    write_ops: WriteOperations,
    dropped: AtomicBool,
}

struct CollectionSettings {
    config: CollectionConfig,
    key: Option<EncryptionKey>,
}

impl DocStoreCollection {
    pub(crate) fn open(
        name: &str,
        store: SqliteStore,
        metadata: Arc<dyn MetadataStore>,
        db_config: DocStoreConfig,
    ) -> DocStoreResult<Self> {
        validate_collection_name(name)?;
        store.create_collection_table(name)?;

        let mut config = match metadata.load_config(name)? {
            Some(config) => config,
            None => {
                let config = CollectionConfig::default();
                metadata.save_config(name, &config)?;
                config
            }
        };
        // rows written under the database key must stay hidden after a keyless reopen
        if db_config.encryption_key().is_some() && !config.encrypted {
            config.encrypted = true;
            metadata.save_config(name, &config)?;
        }
        if config.encrypted && db_config.encryption_key().is_none() {
            log::warn!(
                "Collection {} is encrypted; documents stay unreadable until a key is set",
                name
            );
        }

        let hooks = HookChain::new();
        let read_ops = ReadOperations::new(name, store.clone(), db_config.clone());
        let write_ops = WriteOperations::new(read_ops.clone(), metadata.clone(), hooks.clone());

        let collection = DocStoreCollection {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                store,
                metadata,
                db_config,
                settings: RwLock::new(CollectionSettings { config, key: None }),
                hooks,
                read_ops,
                write_ops,
                dropped: AtomicBool::new(false),
            }),
        };
        collection.inner.write_ops.ensure_search_columns(&collection.state())?;
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Inserts one document and returns its `_id`.
    pub fn insert(&self, document: Document) -> DocStoreResult<WriteResult> {
        self.insert_many(vec![document])
    }

    /// Inserts all documents in one transaction.
    ///
    /// # Errors
    ///
    /// - `ValidationError` when a document violates the schema
    /// - `OperationCancelled` when a before-insert hook cancels
    /// - `InvalidId` for a non-string `_id`, or a missing one in manual mode
    /// - `StorageError` for a duplicate `_id` or any engine failure
    ///
    /// Nothing is stored when any document fails.
    pub fn insert_many(&self, documents: Vec<Document>) -> DocStoreResult<WriteResult> {
        self.ensure_opened()?;
        self.inner.write_ops.insert(&self.state(), documents)
    }

    /// Lazy cursor over the documents matching `criteria`.
    pub fn find(&self, criteria: Criteria) -> DocStoreResult<DocumentCursor> {
        self.ensure_opened()?;
        Ok(self.inner.read_ops.find(self.state(), criteria))
    }

    pub fn find_all(&self) -> DocStoreResult<DocumentCursor> {
        self.find(Criteria::all())
    }

    pub fn find_one(&self, criteria: Criteria) -> DocStoreResult<Option<Document>> {
        self.find(criteria)?.first()
    }

    pub fn count(&self, criteria: Criteria) -> DocStoreResult<usize> {
        self.find(criteria)?.size()
    }

    /// The live document with this `_id`.
    pub fn get_by_id(&self, id: &str) -> DocStoreResult<Option<Document>> {
        self.ensure_opened()?;
        self.inner.read_ops.get_by_id(&self.state(), id)
    }

    /// Updates the documents matching `criteria` and returns how many
    /// changed.
    ///
    /// With `merge` the patch is either an operator document (`$set` and
    /// `$unset` with dot paths) or a plain document merged over the top
    /// level fields. Merges are not validated against the schema. Without
    /// `merge` the patch replaces each document, keeping its `_id`, and is
    /// validated.
    ///
    /// `_id` is never changed by an update.
    pub fn update(&self, criteria: Criteria, patch: Document, merge: bool) -> DocStoreResult<usize> {
        self.ensure_opened()?;
        self.inner.write_ops.update(&self.state(), criteria, patch, merge)
    }

    /// Removes the matching documents.
    ///
    /// With soft delete enabled the documents get a deletion timestamp
    /// instead. That path runs the update hooks, not the remove hooks.
    /// Already trashed documents are not touched again.
    pub fn remove(&self, criteria: Criteria) -> DocStoreResult<usize> {
        self.ensure_opened()?;
        self.inner.write_ops.remove(&self.state(), criteria)
    }

    /// Clears the deletion timestamp of matching trashed documents.
    pub fn restore(&self, criteria: Criteria) -> DocStoreResult<usize> {
        self.ensure_opened()?;
        self.inner.write_ops.restore(&self.state(), criteria)
    }

    /// Physically deletes matching documents, trashed or live.
    pub fn force_delete(&self, criteria: Criteria) -> DocStoreResult<usize> {
        self.ensure_opened()?;
        self.inner.write_ops.force_delete(&self.state(), criteria)
    }

    /// Replaces the references at `local_field` of `documents` with the
    /// documents of `target` whose `foreign_field` (default `_id`) matches.
    pub fn populate(
        &self,
        documents: &mut [Document],
        local_field: &str,
        target: &DocStoreCollection,
        foreign_field: Option<&str>,
        alias: Option<&str>,
    ) -> DocStoreResult<()> {
        self.ensure_opened()?;
        let mut population = Population::new(local_field, target);
        if let Some(foreign_field) = foreign_field {
            population = population.foreign_field(foreign_field);
        }
        if let Some(alias) = alias {
            population = population.alias(alias);
        }
        population.apply(documents)
    }

    /// Change version of this collection. Every successful write bumps it
    /// once.
    pub fn version(&self) -> DocStoreResult<ChangeVersion> {
        self.ensure_opened()?;
        self.inner.metadata.version(&self.inner.name)
    }

    /// Creates an index on the extracted JSON path of `field`.
    ///
    /// Searchable fields are always indexed through their mirror column.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for an encrypted collection when `field` is not
    /// searchable, since the path cannot be read from ciphertext.
    pub fn create_index(&self, field: &str) -> DocStoreResult<()> {
        self.ensure_opened()?;
        let state = self.state();
        if field == DOC_ID || state.searchable.contains_key(field) {
            return Ok(());
        }
        if state.codec.is_encrypted() {
            log::error!(
                "Cannot index {} of encrypted collection {}; make it searchable instead",
                field,
                self.inner.name
            );
            return Err(DocStoreError::new(
                &format!(
                    "Cannot index {} of encrypted collection {}; make it searchable instead",
                    field, self.inner.name
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        self.inner.store.create_path_index(&self.inner.name, field)
    }

    pub fn drop_index(&self, field: &str) -> DocStoreResult<()> {
        self.ensure_opened()?;
        self.inner.store.drop_path_index(&self.inner.name, field)
    }

    /// Recomputes every searchable mirror from the stored documents.
    ///
    /// Making a field searchable only affects documents written afterwards;
    /// run this once to cover the existing ones. Returns the number of
    /// documents processed.
    pub fn rebuild_search_mirrors(&self) -> DocStoreResult<usize> {
        self.ensure_opened()?;
        self.inner.write_ops.rebuild_mirrors(&self.state())
    }

    pub fn on_before_insert<F>(&self, hook: F)
    where
        F: Fn(&Document) -> DocStoreResult<HookOutcome<Document>> + Send + Sync + 'static,
    {
        self.inner.hooks.on_before_insert(hook);
    }

    pub fn on_after_insert<F>(&self, hook: F)
    where
        F: Fn(&Document, &str) -> DocStoreResult<()> + Send + Sync + 'static,
    {
        self.inner.hooks.on_after_insert(hook);
    }

    pub fn on_before_update<F>(&self, hook: F)
    where
        F: Fn(&UpdateRequest) -> DocStoreResult<HookOutcome<UpdateRequest>> + Send + Sync + 'static,
    {
        self.inner.hooks.on_before_update(hook);
    }

    pub fn on_after_update<F>(&self, hook: F)
    where
        F: Fn(&Document, &Document) -> DocStoreResult<()> + Send + Sync + 'static,
    {
        self.inner.hooks.on_after_update(hook);
    }

    /// `Cancel` keeps that one document; the others are still removed.
    pub fn on_before_remove<F>(&self, hook: F)
    where
        F: Fn(&Document) -> DocStoreResult<HookOutcome<()>> + Send + Sync + 'static,
    {
        self.inner.hooks.on_before_remove(hook);
    }

    pub fn on_after_remove<F>(&self, hook: F)
    where
        F: Fn(&Document) -> DocStoreResult<()> + Send + Sync + 'static,
    {
        self.inner.hooks.on_after_remove(hook);
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> CollectionConfig {
        self.inner.settings.read().config.clone()
    }

    pub fn set_schema(&self, schema: Schema) -> DocStoreResult<()> {
        schema.check_patterns()?;
        self.update_config(|config| config.schema = schema)
    }

    /// Replaces the searchable fields and adds any missing mirror column.
    /// Fields whose names map to the same mirror column are rejected.
    /// Existing documents keep their old mirrors until
    /// [rebuild_search_mirrors](DocStoreCollection::rebuild_search_mirrors).
    pub fn set_searchable_fields(&self, fields: SearchableFields) -> DocStoreResult<()> {
        if let Some((first, second)) = column_collision(&fields) {
            log::error!("Searchable fields {} and {} share a mirror column", first, second);
            return Err(DocStoreError::new(
                &format!(
                    "Searchable fields {} and {} share the mirror column {}",
                    first,
                    second,
                    search_column(first)
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        self.update_config(|config| config.searchable = fields)?;
        self.inner.write_ops.ensure_search_columns(&self.state())
    }

    /// Marks `field` searchable, keeping the other searchable fields.
    pub fn add_searchable_field(&self, field: &str, options: SearchableField) -> DocStoreResult<()> {
        let mut fields = self.config().searchable;
        fields.insert(field.to_string(), options);
        self.set_searchable_fields(fields)
    }

    /// Turns soft delete on, optionally with a custom deletion field.
    pub fn enable_soft_delete(&self, field: Option<&str>) -> DocStoreResult<()> {
        if let Some(field) = field {
            if field.is_empty() || field == DOC_ID {
                log::error!("Invalid soft delete field {:?}", field);
                return Err(DocStoreError::new(
                    &format!("Invalid soft delete field {:?}", field),
                    ErrorKind::InvalidOperation,
                ));
            }
        }
        self.update_config(|config| {
            config.soft_delete = true;
            if let Some(field) = field {
                config.soft_delete_field = field.to_string();
            }
        })?;
        self.inner.write_ops.ensure_search_columns(&self.state())
    }

    /// Turns soft delete off. Trashed documents become visible again.
    pub fn disable_soft_delete(&self) -> DocStoreResult<()> {
        self.update_config(|config| config.soft_delete = false)
    }

    pub fn set_id_mode(&self, mode: IdMode) -> DocStoreResult<()> {
        if let IdMode::Prefix { prefix } = &mode {
            if prefix.is_empty() {
                log::error!("Prefix id mode requires a non-empty prefix");
                return Err(DocStoreError::new(
                    "Prefix id mode requires a non-empty prefix",
                    ErrorKind::InvalidOperation,
                ));
            }
        }
        self.update_config(|config| config.id_mode = mode)?;
        self.inner.write_ops.id_generator().reset();
        Ok(())
    }

    /// Text added around every generated id. Supplied ids are stored as is.
    pub fn set_id_decoration(&self, prefix: &str, suffix: &str) -> DocStoreResult<()> {
        self.update_config(|config| {
            config.id_decoration = IdDecoration {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }
        })?;
        self.inner.write_ops.id_generator().reset();
        Ok(())
    }

    pub fn set_setting(&self, key: &str, value: impl Into<Value>) -> DocStoreResult<()> {
        let value = value.into();
        self.update_config(|config| {
            config.settings.insert(key.to_string(), value);
        })
    }

    pub fn setting(&self, key: &str) -> Option<Value> {
        self.inner.settings.read().config.settings.get(key).cloned()
    }

    /// Gives this collection its own encryption key, overriding the
    /// database key.
    ///
    /// Documents written with another key become unreadable through this
    /// handle; they are skipped, not reported.
    ///
    /// # Errors
    ///
    /// `SecurityError` for a weak secret.
    pub fn set_encryption_key(&self, secret: &str) -> DocStoreResult<()> {
        self.ensure_opened()?;
        let key = EncryptionKey::new(secret)?;
        let mut settings = self.inner.settings.write();
        if !settings.config.encrypted {
            let mut config = settings.config.clone();
            config.encrypted = true;
            self.inner.metadata.save_config(&self.inner.name, &config)?;
            settings.config = config;
        }
        settings.key = Some(key);
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.state().codec.is_encrypted()
    }

    pub fn is_dropped(&self) -> bool {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_dropped(&self) {
        self.inner.dropped.store(true, Ordering::Relaxed);
    }

    /// Snapshot of the settings one operation runs with.
    pub(crate) fn state(&self) -> CollectionState {
        let settings = self.inner.settings.read();
        let codec = match settings.key.clone().or_else(|| self.inner.db_config.encryption_key()) {
            Some(key) => DocumentCodec::Encrypted(key),
            None if settings.config.encrypted => DocumentCodec::Locked,
            None => DocumentCodec::Plain,
        };
        CollectionState::new(settings.config.clone(), codec)
    }

    fn update_config<F>(&self, change: F) -> DocStoreResult<()>
    where
        F: FnOnce(&mut CollectionConfig),
    {
        self.ensure_opened()?;
        let mut settings = self.inner.settings.write();
        let mut config = settings.config.clone();
        change(&mut config);
        self.inner.metadata.save_config(&self.inner.name, &config)?;
        settings.config = config;
        Ok(())
    }

    fn ensure_opened(&self) -> DocStoreResult<()> {
        if self.is_dropped() {
            log::error!("Collection {} is dropped and cannot be accessed", self.inner.name);
            return Err(DocStoreError::new(
                &format!("Collection {} is dropped and cannot be accessed", self.inner.name),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }
}

impl Debug for DocStoreCollection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStoreCollection")
            .field("name", &self.inner.name)
            .field("config", &self.inner.settings.read().config)
            .field("dropped", &self.is_dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::field;
    use crate::query::PredicateRegistry;
    use crate::store::SqliteMetadataStore;

    fn collection(name: &str) -> DocStoreCollection {
        let store = SqliteStore::open_in_memory(PredicateRegistry::new()).unwrap();
        let metadata = Arc::new(SqliteMetadataStore::new(store.clone()).unwrap());
        DocStoreCollection::open(name, store, metadata, DocStoreConfig::new()).unwrap()
    }

    #[test]
    fn insert_assigns_uuid() {
        let users = collection("users");
        let result = users.insert(doc! { "name": "Ann" }).unwrap();
        let id = result.first_id().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert_eq!(users.get_by_id(id).unwrap().unwrap().get("name"), Value::from("Ann"));
    }

    #[test]
    fn supplied_ids_must_be_strings() {
        let users = collection("users");
        let err = users.insert(doc! { "_id": 5, "name": "Ann" }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidId);
        assert!(users.insert(doc! { "_id": "a" }).is_ok());
        let err = users.insert(doc! { "_id": "a" }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::StorageError);
    }

    #[test]
    fn manual_mode_requires_id() {
        let users = collection("users");
        users.set_id_mode(IdMode::Manual).unwrap();
        let err = users.insert(doc! { "name": "Ann" }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidId);
    }

    #[test]
    fn decorated_prefix_ids() {
        let users = collection("users");
        users.set_id_mode(IdMode::Prefix { prefix: "USR".into() }).unwrap();
        users.set_id_decoration("eu.", ".v1").unwrap();
        let result = users.insert_many(vec![doc! {}, doc! {}]).unwrap();
        assert_eq!(result.inserted_ids(), &["eu.USR-000001.v1".to_string(), "eu.USR-000002.v1".to_string()]);
    }

    #[test]
    fn merge_update_and_replace() {
        let users = collection("users");
        let id = users.insert(doc! { "name": "Ann", "age": 30 }).unwrap().first_id().unwrap().to_string();

        let changed = users.update(field("name").eq("Ann"), doc! { "age": 31 }, true).unwrap();
        assert_eq!(changed, 1);
        let ann = users.get_by_id(&id).unwrap().unwrap();
        assert_eq!(ann.get("age"), Value::from(31));
        assert_eq!(ann.get("name"), Value::from("Ann"));

        users.update(field("name").eq("Ann"), doc! { "nick": "A" }, false).unwrap();
        let ann = users.get_by_id(&id).unwrap().unwrap();
        assert_eq!(ann, doc! { "_id": (id.as_str()), "nick": "A" });
    }

    #[test]
    fn unchanged_documents_are_not_counted() {
        let users = collection("users");
        users.insert(doc! { "name": "Ann", "age": 30 }).unwrap();
        let before = users.version().unwrap().version;
        assert_eq!(users.update(field("age").eq(30), doc! { "age": 30 }, true).unwrap(), 0);
        assert_eq!(users.version().unwrap().version, before);
    }

    #[test]
    fn replace_is_validated() {
        let users = collection("users");
        users.insert(doc! { "name": "Ann" }).unwrap();
        users
            .set_schema(Schema::new().field("name", crate::collection::FieldRule::new().required()))
            .unwrap();
        let err = users.update(field("name").eq("Ann"), doc! { "age": 3 }, false).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert_eq!(users.update(field("name").eq("Ann"), doc! { "$unset": ["name"] }, true).unwrap(), 1);
    }

    #[test]
    fn remove_hook_vetoes_single_document() {
        let users = collection("users");
        users.insert_many(vec![doc! { "name": "Ann" }, doc! { "name": "Bo" }]).unwrap();
        users.on_before_remove(|doc| {
            Ok(if doc.get("name") == Value::from("Ann") {
                HookOutcome::Cancel
            } else {
                HookOutcome::Continue
            })
        });
        assert_eq!(users.remove(Criteria::all()).unwrap(), 1);
        assert_eq!(users.count(Criteria::all()).unwrap(), 1);
    }

    #[test]
    fn encrypted_collections_reject_path_indexes() {
        let users = collection("users");
        users.set_encryption_key("k3y-f0r-t3st1ng-0nly-#9Zq!xWv@pLm$").unwrap();
        assert!(users.is_encrypted());
        assert!(users.config().encrypted);
        assert_eq!(users.create_index("age").unwrap_err().kind(), &ErrorKind::InvalidOperation);
        users.add_searchable_field("age", SearchableField::plain()).unwrap();
        assert!(users.create_index("age").is_ok());
    }

    #[test]
    fn colliding_searchable_fields_are_rejected() {
        let users = collection("users");
        users.add_searchable_field("address.city", SearchableField::plain()).unwrap();
        let err = users
            .add_searchable_field("address_city", SearchableField::hashed())
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        assert_eq!(users.config().searchable.len(), 1);
        assert!(users.add_searchable_field("address.zip", SearchableField::plain()).is_ok());
    }

    #[test]
    fn database_key_marks_collection_encrypted() {
        let store = SqliteStore::open_in_memory(PredicateRegistry::new()).unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(store.clone()).unwrap());
        let keyed = DocStoreConfig::new();
        keyed.set_encryption_key("k3y-f0r-t3st1ng-0nly-#9Zq!xWv@pLm$").unwrap();

        let secrets = DocStoreCollection::open("secrets", store.clone(), metadata.clone(), keyed).unwrap();
        secrets.insert(doc! { "_id": "s1", "pin": "1234" }).unwrap();
        assert!(metadata.load_config("secrets").unwrap().unwrap().encrypted);

        let keyless = DocStoreCollection::open("secrets", store, metadata, DocStoreConfig::new()).unwrap();
        assert!(keyless.find_all().unwrap().to_array().unwrap().is_empty());
        assert_eq!(keyless.get_by_id("s1").unwrap(), None);
        assert_eq!(keyless.insert(doc! {}).unwrap_err().kind(), &ErrorKind::SecurityError);
    }

    #[test]
    fn dropped_handles_fail() {
        let users = collection("users");
        users.mark_dropped();
        assert_eq!(users.find_all().unwrap_err().kind(), &ErrorKind::InvalidOperation);
    }
}
