use crate::collection::{CollectionConfig, Document};
use crate::common::{DATA_COLUMN, ID_COLUMN};
use crate::cursor::{DocumentCursor, TrashScope};
use crate::errors::DocStoreResult;
use crate::filter::Criteria;
use crate::index::{search_column, SearchableFields};
use crate::query::{quote_identifier, to_sql_condition, QueryContext, SqlCondition};
use crate::store::{DocumentCodec, SqliteStore};
use crate::DocStoreConfig;
use rusqlite::types::Value as SqlValue;
use std::sync::Arc;

/// The settings one operation runs with. Taken once per operation so a
/// concurrent configuration change never applies halfway through.
#[derive(Clone, Debug)]
pub(crate) struct CollectionState {
    pub(crate) config: CollectionConfig,
    pub(crate) codec: DocumentCodec,
    pub(crate) searchable: SearchableFields,
}

impl CollectionState {
    pub(crate) fn new(config: CollectionConfig, codec: DocumentCodec) -> Self {
        let searchable = config.effective_searchable();
        CollectionState {
            config,
            codec,
            searchable,
        }
    }

    pub(crate) fn query_context(&self) -> QueryContext<'_> {
        QueryContext {
            searchable: &self.searchable,
            encrypted: self.codec.is_encrypted(),
        }
    }

    pub(crate) fn trash_column(&self) -> String {
        quote_identifier(&search_column(&self.config.soft_delete_field))
    }
}

/// Read side of a collection: WHERE construction, candidate selection and
/// cursors.
#[derive(Clone)]
pub(crate) struct ReadOperations {
    inner: Arc<ReadOperationsInner>,
}

struct ReadOperationsInner {
    table: String,
    store: SqliteStore,
    db_config: DocStoreConfig,
}

impl ReadOperations {
    pub(crate) fn new(table: &str, store: SqliteStore, db_config: DocStoreConfig) -> Self {
        ReadOperations {
            inner: Arc::new(ReadOperationsInner {
                table: table.to_string(),
                store,
                db_config,
            }),
        }
    }

    pub(crate) fn table(&self) -> &str {
        &self.inner.table
    }

    pub(crate) fn quoted_table(&self) -> String {
        quote_identifier(&self.inner.table)
    }

    pub(crate) fn store(&self) -> &SqliteStore {
        &self.inner.store
    }

    pub(crate) fn db_config(&self) -> &DocStoreConfig {
        &self.inner.db_config
    }

    pub(crate) fn find(&self, state: CollectionState, criteria: Criteria) -> DocumentCursor {
        DocumentCursor::new(self.clone(), state, criteria)
    }

    /// WHERE condition for `criteria` restricted to `scope`.
    pub(crate) fn condition(&self, state: &CollectionState, criteria: &Criteria, scope: TrashScope) -> SqlCondition {
        let mut condition = to_sql_condition(
            criteria,
            state.query_context(),
            self.inner.store.registry(),
            &state.codec,
        );
        match scope {
            TrashScope::Exclude if state.config.soft_delete => {
                condition.push(format!("{} IS NULL", state.trash_column()), vec![]);
            }
            TrashScope::Only => {
                condition.push(format!("{} IS NOT NULL", state.trash_column()), vec![]);
            }
            _ => {}
        }
        condition
    }

    /// Decoded documents matching `criteria` with their row ids.
    /// Undecodable rows are skipped.
    pub(crate) fn select(
        &self,
        state: &CollectionState,
        criteria: &Criteria,
        scope: TrashScope,
    ) -> DocStoreResult<Vec<(String, Document)>> {
        let condition = self.condition(state, criteria, scope);
        let sql = format!(
            "SELECT {}, {} FROM {}{}",
            ID_COLUMN,
            DATA_COLUMN,
            self.quoted_table(),
            condition.where_clause()
        );
        let rows = self.inner.store.query_rows(&sql, &condition.params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, raw)| state.codec.decode(&raw).map(|doc| (id, doc)))
            .collect())
    }

    /// Raw `data` column values of matching rows, in the order given by
    /// `order_by` and `paging` (both already formatted SQL).
    pub(crate) fn select_raw(
        &self,
        condition: &SqlCondition,
        order_by: &str,
        paging: &str,
        paging_params: &[SqlValue],
    ) -> DocStoreResult<Vec<String>> {
        let sql = format!(
            "SELECT {} FROM {}{}{}{}",
            DATA_COLUMN,
            self.quoted_table(),
            condition.where_clause(),
            order_by,
            paging
        );
        let mut params = condition.params.clone();
        params.extend_from_slice(paging_params);
        self.inner.store.query_strings(&sql, &params)
    }

    pub(crate) fn count_rows(&self, condition: &SqlCondition) -> DocStoreResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.quoted_table(), condition.where_clause());
        let count = self.inner.store.query_i64(&sql, &condition.params)?;
        Ok(count.unwrap_or(0).max(0) as usize)
    }

    /// Matching rows that decode under `codec`, counting stops once `stop_at`
    /// is reached.
    pub(crate) fn count_decodable(
        &self,
        condition: &SqlCondition,
        codec: &DocumentCodec,
        stop_at: Option<usize>,
    ) -> DocStoreResult<usize> {
        let sql = format!("SELECT {} FROM {}{}", DATA_COLUMN, self.quoted_table(), condition.where_clause());
        let stop_at = stop_at.unwrap_or(usize::MAX);
        if stop_at == 0 {
            return Ok(0);
        }
        let mut count = 0;
        self.inner.store.scan_strings(&sql, &condition.params, |raw| {
            if codec.decode(raw).is_some() {
                count += 1;
            }
            count < stop_at
        })?;
        Ok(count)
    }

    /// The document stored under `id`, unless it is trashed.
    pub(crate) fn get_by_id(&self, state: &CollectionState, id: &str) -> DocStoreResult<Option<Document>> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            DATA_COLUMN,
            self.quoted_table(),
            ID_COLUMN
        );
        if state.config.soft_delete {
            sql.push_str(&format!(" AND {} IS NULL", state.trash_column()));
        }
        let rows = self
            .inner
            .store
            .query_strings(&sql, &[SqlValue::Text(id.to_string())])?;
        Ok(rows.first().and_then(|raw| state.codec.decode(raw)))
    }

    /// Stored ids starting with `head`.
    pub(crate) fn ids_with_prefix(&self, head: &str) -> DocStoreResult<Vec<String>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE substr({}, 1, ?) = ?",
            ID_COLUMN,
            self.quoted_table(),
            ID_COLUMN
        );
        self.inner.store.query_strings(
            &sql,
            &[
                SqlValue::Integer(head.chars().count() as i64),
                SqlValue::Text(head.to_string()),
            ],
        )
    }
}
