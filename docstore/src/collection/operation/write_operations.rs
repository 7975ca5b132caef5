use super::read_operations::{CollectionState, ReadOperations};
use super::write_result::WriteResult;
use crate::collection::{Document, HookChain, IdGenerator, UpdateRequest};
use crate::common::{Value, DATA_COLUMN, DOC_ID, ID_COLUMN, SET_OPERATOR, UNSET_OPERATOR};
use crate::cursor::TrashScope;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::filter::Criteria;
use crate::index::{compute_mirrors, search_column};
use crate::query::quote_identifier;
use crate::store::MetadataStore;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use std::sync::Arc;

/// Write pipelines of a collection: insert, update, remove and the mirror
/// maintenance that goes with them.
///
/// Every pipeline follows the same shape. Documents are prepared (validated,
/// passed through before-hooks, encoded) outside the connection lock, the
/// rows are written in one transaction, the change version is bumped once,
/// and after-hooks run last.
#[derive(Clone)]
pub(crate) struct WriteOperations {
    inner: Arc<WriteOperationsInner>,
}

struct WriteOperationsInner {
    read: ReadOperations,
    metadata: Arc<dyn MetadataStore>,
    hooks: HookChain,
    id_generator: IdGenerator,
}

struct PreparedRow {
    id: String,
    data: String,
    mirrors: Vec<Option<String>>,
}

/// A parsed update patch.
enum Patch {
    /// Shallow merge of top level fields.
    Merge(Document),
    /// `$set` of dot paths and `$unset` of dot paths.
    Operators { set: Document, unset: Vec<String> },
}

impl WriteOperations {
    pub(crate) fn new(read: ReadOperations, metadata: Arc<dyn MetadataStore>, hooks: HookChain) -> Self {
        WriteOperations {
            inner: Arc::new(WriteOperationsInner {
                read,
                metadata,
                hooks,
                id_generator: IdGenerator::new(),
            }),
        }
    }

    pub(crate) fn id_generator(&self) -> &IdGenerator {
        &self.inner.id_generator
    }

    /// Inserts all documents atomically.
    ///
    /// Each document is validated against the schema, passed through the
    /// before-insert hooks and given an `_id` when it has none. Any failure,
    /// including a hook cancelling, aborts the whole batch before anything is
    /// written; a storage failure rolls back the rows already written.
    pub(crate) fn insert(&self, state: &CollectionState, documents: Vec<Document>) -> DocStoreResult<WriteResult> {
        if documents.is_empty() {
            return Ok(WriteResult::default());
        }

        let mut prepared = Vec::with_capacity(documents.len());
        let mut inserted = Vec::with_capacity(documents.len());
        for document in documents {
            state.config.schema.validate(&document)?;
            let mut document = match self.inner.hooks.before_insert(document) {
                Some(document) => document,
                None => return Err(cancelled("insert")),
            };
            let id = self.assign_id(state, &mut document)?;
            prepared.push(self.prepare_row(state, id, &document)?);
            inserted.push(document);
        }

        let sql = self.insert_sql(state);
        self.inner.read.store().transaction(|tx| {
            for row in &prepared {
                tx.execute(&sql, &row_params(row, true))?;
            }
            Ok(())
        })?;
        self.bump_version()?;

        let ids: Vec<String> = prepared.into_iter().map(|row| row.id).collect();
        for (document, id) in inserted.iter().zip(ids.iter()) {
            self.inner.hooks.after_insert(document, id);
        }
        log::debug!("Inserted {} documents into {}", ids.len(), self.inner.read.table());
        Ok(WriteResult::new(ids))
    }

    /// Runs the update pipeline over live documents.
    pub(crate) fn update(
        &self,
        state: &CollectionState,
        criteria: Criteria,
        patch: Document,
        merge: bool,
    ) -> DocStoreResult<usize> {
        self.update_scoped(state, criteria, patch, merge, TrashScope::Exclude)
    }

    fn update_scoped(
        &self,
        state: &CollectionState,
        criteria: Criteria,
        patch: Document,
        merge: bool,
        scope: TrashScope,
    ) -> DocStoreResult<usize> {
        let request = self
            .inner
            .hooks
            .before_update(UpdateRequest { criteria, patch })
            .ok_or_else(|| cancelled("update"))?;
        let patch = parse_patch(&request.patch, merge)?;

        let candidates = self.inner.read.select(state, &request.criteria, scope)?;
        let mut changes = Vec::new();
        for (id, original) in candidates {
            let updated = match &patch {
                Some(patch) => apply_patch(&original, patch)?,
                None => {
                    let replaced = replace_document(&id, &request.patch);
                    // merges skip validation, replacements do not
                    state.config.schema.validate(&replaced)?;
                    replaced
                }
            };
            if updated != original {
                changes.push((id, original, updated));
            }
        }
        if changes.is_empty() {
            return Ok(0);
        }

        let mut prepared = Vec::with_capacity(changes.len());
        for (id, _, updated) in &changes {
            prepared.push(self.prepare_row(state, id.clone(), updated)?);
        }
        let sql = self.update_sql(state);
        self.inner.read.store().transaction(|tx| {
            for row in &prepared {
                tx.execute(&sql, &row_params(row, false))?;
            }
            Ok(())
        })?;
        self.bump_version()?;

        for (_, original, updated) in &changes {
            self.inner.hooks.after_update(original, updated);
        }
        log::debug!("Updated {} documents in {}", changes.len(), self.inner.read.table());
        Ok(changes.len())
    }

    /// Removes matching documents.
    ///
    /// With soft delete enabled this is an update setting the deletion
    /// field, so the update hooks run and the remove hooks do not.
    pub(crate) fn remove(&self, state: &CollectionState, criteria: Criteria) -> DocStoreResult<usize> {
        if state.config.soft_delete {
            let mut set = Document::new();
            set.insert_raw(state.config.soft_delete_field.clone(), Utc::now().to_rfc3339());
            let mut patch = Document::new();
            patch.insert_raw(SET_OPERATOR, set);
            return self.update_scoped(state, criteria, patch, true, TrashScope::Exclude);
        }
        self.delete(state, criteria, TrashScope::Include)
    }

    /// Physically deletes matching documents, trashed or not, whatever the
    /// soft delete setting.
    pub(crate) fn force_delete(&self, state: &CollectionState, criteria: Criteria) -> DocStoreResult<usize> {
        self.delete(state, criteria, TrashScope::Include)
    }

    /// Clears the deletion field of matching trashed documents.
    pub(crate) fn restore(&self, state: &CollectionState, criteria: Criteria) -> DocStoreResult<usize> {
        let mut patch = Document::new();
        patch.insert_raw(
            UNSET_OPERATOR,
            Value::Array(vec![Value::from(state.config.soft_delete_field.as_str())]),
        );
        self.update_scoped(state, criteria, patch, true, TrashScope::Only)
    }

    fn delete(&self, state: &CollectionState, criteria: Criteria, scope: TrashScope) -> DocStoreResult<usize> {
        let candidates = self.inner.read.select(state, &criteria, scope)?;
        let approved: Vec<(String, Document)> = candidates
            .into_iter()
            .filter(|(_, document)| self.inner.hooks.before_remove(document))
            .collect();
        if approved.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.inner.read.quoted_table(),
            ID_COLUMN
        );
        self.inner.read.store().transaction(|tx| {
            for (id, _) in &approved {
                tx.execute(&sql, &[SqlValue::Text(id.clone())])?;
            }
            Ok(())
        })?;
        self.bump_version()?;

        for (_, document) in &approved {
            self.inner.hooks.after_remove(document);
        }
        log::debug!("Deleted {} documents from {}", approved.len(), self.inner.read.table());
        Ok(approved.len())
    }

    /// Recomputes every searchable mirror from the stored documents. Rows
    /// that do not decode are left alone.
    pub(crate) fn rebuild_mirrors(&self, state: &CollectionState) -> DocStoreResult<usize> {
        self.ensure_search_columns(state)?;
        if state.searchable.is_empty() {
            return Ok(0);
        }
        let rows = self
            .inner
            .read
            .select(state, &Criteria::all(), TrashScope::Include)?;

        let assignments = state
            .searchable
            .keys()
            .map(|field| format!("{} = ?", quote_identifier(&search_column(field))))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.inner.read.quoted_table(),
            assignments,
            ID_COLUMN
        );

        let count = rows.len();
        self.inner.read.store().transaction(|tx| {
            for (id, document) in &rows {
                let mut params: Vec<SqlValue> = compute_mirrors(document, &state.searchable)
                    .into_iter()
                    .map(|(_, mirror)| mirror.map_or(SqlValue::Null, SqlValue::Text))
                    .collect();
                params.push(SqlValue::Text(id.clone()));
                tx.execute(&sql, &params)?;
            }
            Ok(())
        })?;
        log::info!("Rebuilt search mirrors of {} documents in {}", count, self.inner.read.table());
        Ok(count)
    }

    /// Adds the mirror column (and its index) of every searchable field.
    pub(crate) fn ensure_search_columns(&self, state: &CollectionState) -> DocStoreResult<()> {
        for field in state.searchable.keys() {
            self.inner
                .read
                .store()
                .add_search_column(self.inner.read.table(), &search_column(field))?;
        }
        Ok(())
    }

    fn assign_id(&self, state: &CollectionState, document: &mut Document) -> DocStoreResult<String> {
        match document.get_ref(DOC_ID) {
            Some(Value::String(id)) if !id.is_empty() => return Ok(id.clone()),
            None | Some(Value::Null) => {}
            Some(other) => {
                log::error!("Document _id must be a non-empty string, found {}", other);
                return Err(DocStoreError::new(
                    &format!("Document _id must be a non-empty string, found {}", other),
                    ErrorKind::InvalidId,
                ));
            }
        }

        let config = &state.config;
        let generated = self
            .inner
            .id_generator
            .next_id(&config.id_mode, &config.id_decoration, |head| {
                self.inner.read.ids_with_prefix(head)
            })?;
        match generated {
            Some(id) => {
                document.set_id(id.clone());
                Ok(id)
            }
            None => {
                log::error!("Collection {} requires documents to carry an _id", self.inner.read.table());
                Err(DocStoreError::new(
                    &format!("Collection {} requires documents to carry an _id", self.inner.read.table()),
                    ErrorKind::InvalidId,
                ))
            }
        }
    }

    fn prepare_row(&self, state: &CollectionState, id: String, document: &Document) -> DocStoreResult<PreparedRow> {
        let data = state.codec.encode(document)?;
        let mirrors = compute_mirrors(document, &state.searchable)
            .into_iter()
            .map(|(_, mirror)| mirror)
            .collect();
        Ok(PreparedRow { id, data, mirrors })
    }

    fn insert_sql(&self, state: &CollectionState) -> String {
        let mut columns = vec![ID_COLUMN.to_string(), DATA_COLUMN.to_string()];
        columns.extend(state.searchable.keys().map(|f| quote_identifier(&search_column(f))));
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.inner.read.quoted_table(),
            columns.join(", "),
            placeholders
        )
    }

    fn update_sql(&self, state: &CollectionState) -> String {
        let mut assignments = vec![format!("{} = ?", DATA_COLUMN)];
        assignments.extend(
            state
                .searchable
                .keys()
                .map(|f| format!("{} = ?", quote_identifier(&search_column(f)))),
        );
        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.inner.read.quoted_table(),
            assignments.join(", "),
            ID_COLUMN
        )
    }

    fn bump_version(&self) -> DocStoreResult<()> {
        self.inner.metadata.bump_version(self.inner.read.table())?;
        Ok(())
    }
}

/// Parameters of an insert (`id, data, mirrors...`) or an update
/// (`data, mirrors..., id`).
fn row_params(row: &PreparedRow, insert: bool) -> Vec<SqlValue> {
    let mut params = Vec::with_capacity(row.mirrors.len() + 2);
    if insert {
        params.push(SqlValue::Text(row.id.clone()));
    }
    params.push(SqlValue::Text(row.data.clone()));
    params.extend(
        row.mirrors
            .iter()
            .map(|mirror| mirror.clone().map_or(SqlValue::Null, SqlValue::Text)),
    );
    if !insert {
        params.push(SqlValue::Text(row.id.clone()));
    }
    params
}

fn cancelled(operation: &str) -> DocStoreError {
    log::error!("A before-{} hook cancelled the operation", operation);
    DocStoreError::new(
        &format!("A before-{} hook cancelled the operation", operation),
        ErrorKind::OperationCancelled,
    )
}

/// `None` for a replacement.
fn parse_patch(patch: &Document, merge: bool) -> DocStoreResult<Option<Patch>> {
    let has_operators = patch.keys().any(|k| k.starts_with('$'));
    if !merge {
        if has_operators {
            log::error!("Update operators cannot be used to replace a document");
            return Err(DocStoreError::new(
                "Update operators cannot be used to replace a document",
                ErrorKind::PredicateError,
            ));
        }
        return Ok(None);
    }
    if !has_operators {
        return Ok(Some(Patch::Merge(patch.clone())));
    }

    let mut set = Document::new();
    let mut unset = Vec::new();
    for (key, value) in patch.iter() {
        match (key.as_str(), value) {
            (SET_OPERATOR, Value::Document(fields)) => set = fields.clone(),
            (UNSET_OPERATOR, Value::Document(fields)) => unset.extend(fields.keys().cloned()),
            (UNSET_OPERATOR, Value::Array(fields)) => {
                for field in fields {
                    match field.as_str() {
                        Some(name) => unset.push(name.to_string()),
                        None => return Err(malformed_patch(key)),
                    }
                }
            }
            (UNSET_OPERATOR, Value::String(name)) => unset.push(name.clone()),
            _ => return Err(malformed_patch(key)),
        }
    }
    Ok(Some(Patch::Operators { set, unset }))
}

fn malformed_patch(key: &str) -> DocStoreError {
    log::error!("Unsupported or malformed update operator {}", key);
    DocStoreError::new(
        &format!("Unsupported or malformed update operator {}", key),
        ErrorKind::PredicateError,
    )
}

/// New state of a document under a merge patch. `_id` never changes.
fn apply_patch(original: &Document, patch: &Patch) -> DocStoreResult<Document> {
    let mut updated = original.clone();
    match patch {
        Patch::Merge(fields) => {
            for (key, value) in fields.iter() {
                if key != DOC_ID {
                    updated.insert_raw(key.clone(), value.clone());
                }
            }
        }
        Patch::Operators { set, unset } => {
            for (key, value) in set.iter() {
                if key != DOC_ID {
                    updated.put(key, value.clone())?;
                }
            }
            for key in unset {
                if key != DOC_ID {
                    updated.remove(key);
                }
            }
        }
    }
    Ok(updated)
}

fn replace_document(id: &str, replacement: &Document) -> Document {
    let mut replaced = Document::new();
    replaced.set_id(id);
    for (key, value) in replacement.iter() {
        if key != DOC_ID {
            replaced.insert_raw(key.clone(), value.clone());
        }
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn merge_is_shallow() {
        let original = doc! { "_id": "1", "a": { "x": 1, "y": 2 }, "b": 1 };
        let patch = parse_patch(&doc! { "a": { "x": 5 }, "c": 3, "_id": "2" }, true)
            .unwrap()
            .unwrap();
        let updated = apply_patch(&original, &patch).unwrap();
        assert_eq!(updated, doc! { "_id": "1", "a": { "x": 5 }, "b": 1, "c": 3 });
    }

    #[test]
    fn set_and_unset_paths() {
        let original = doc! { "_id": "1", "a": { "x": 1, "y": 2 }, "b": 1 };
        let patch = parse_patch(&doc! { "$set": { "a.x": 9, "d": true }, "$unset": ["b", "a.y"] }, true)
            .unwrap()
            .unwrap();
        let updated = apply_patch(&original, &patch).unwrap();
        assert_eq!(updated, doc! { "_id": "1", "a": { "x": 9 }, "d": true });
    }

    #[test]
    fn unset_forms() {
        for patch in [
            doc! { "$unset": { "b": "" } },
            doc! { "$unset": ["b"] },
            doc! { "$unset": "b" },
        ] {
            let parsed = parse_patch(&patch, true).unwrap().unwrap();
            let updated = apply_patch(&doc! { "_id": "1", "b": 1 }, &parsed).unwrap();
            assert_eq!(updated, doc! { "_id": "1" });
        }
    }

    #[test]
    fn malformed_patches() {
        assert!(parse_patch(&doc! { "$inc": { "a": 1 } }, true).is_err());
        assert!(parse_patch(&doc! { "$set": 3 }, true).is_err());
        assert!(parse_patch(&doc! { "$unset": [1] }, true).is_err());
        assert!(parse_patch(&doc! { "$set": { "a": 1 } }, false).is_err());
    }

    #[test]
    fn replacement_keeps_id() {
        assert!(parse_patch(&doc! { "name": "x" }, false).unwrap().is_none());
        let replaced = replace_document("1", &doc! { "_id": "other", "name": "x" });
        assert_eq!(replaced, doc! { "_id": "1", "name": "x" });
    }

    #[test]
    fn row_parameter_order() {
        let row = PreparedRow {
            id: "1".into(),
            data: "{}".into(),
            mirrors: vec![Some("a".into()), None],
        };
        assert_eq!(
            row_params(&row, true),
            vec![
                SqlValue::Text("1".into()),
                SqlValue::Text("{}".into()),
                SqlValue::Text("a".into()),
                SqlValue::Null
            ]
        );
        assert_eq!(row_params(&row, false).last(), Some(&SqlValue::Text("1".into())));
    }
}
