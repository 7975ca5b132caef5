use crate::collection::operation::{CollectionState, ReadOperations};
use crate::collection::Document;
use crate::common::{SortOrder, DATA_COLUMN, DOC_ID, ID_COLUMN};
use crate::cursor::{Population, Projection};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::filter::Criteria;
use crate::query::{json_extract, json_path};
use itertools::Itertools;
use rusqlite::types::Value as SqlValue;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Which documents a query sees with respect to soft delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashScope {
    /// Skip trashed documents while soft delete is enabled.
    #[default]
    Exclude,
    /// Trashed and live documents.
    Include,
    /// Trashed documents only.
    Only,
}

/// Lifecycle of a [DocumentCursor].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No query has run yet.
    Unstarted,
    /// Results are loaded and being handed out.
    Iterating,
    /// Every result has been handed out.
    Exhausted,
}

/// Lazy result set of a `find`.
///
/// Nothing touches the database until the cursor is iterated or
/// materialized. The query then runs once: rows are decoded (undecodable
/// rows are skipped), populated and projected, and handed out in order.
/// [rewind](DocumentCursor::rewind) resets the cursor so the next read runs
/// the query again.
///
/// Builder methods (`sort`, `skip`, `limit`, ...) also rewind.
///
/// # Examples
///
/// ```rust,ignore
/// let page = users
///     .find(field("age").gte(18))?
///     .sort("name", SortOrder::Ascending)
///     .skip(20)
///     .limit(10)
///     .to_array()?;
/// ```
///
/// Ordering and pagination run in SQL for plain collections. For encrypted
/// collections, and for sort paths SQL cannot address, they run in memory
/// after decoding. Both order values by type first (null and missing, then
/// bools, numbers, strings, arrays, documents) and then by value. Within
/// arrays and documents SQL compares JSON text while the in-memory order
/// compares element by element, so those two can disagree.
pub struct DocumentCursor {
    operations: ReadOperations,
    state: CollectionState,
    criteria: Criteria,
    sorts: Vec<(String, SortOrder)>,
    skip: Option<usize>,
    limit: Option<usize>,
    scope: TrashScope,
    projection: Option<Projection>,
    populations: Vec<Population>,
    phase: CursorState,
    buffer: VecDeque<Document>,
}

impl DocumentCursor {
    pub(crate) fn new(operations: ReadOperations, state: CollectionState, criteria: Criteria) -> Self {
        DocumentCursor {
            operations,
            state,
            criteria,
            sorts: Vec::new(),
            skip: None,
            limit: None,
            scope: TrashScope::Exclude,
            projection: None,
            populations: Vec::new(),
            phase: CursorState::Unstarted,
            buffer: VecDeque::new(),
        }
    }

    pub fn sort(mut self, field: &str, order: SortOrder) -> Self {
        self.sorts.push((field.to_string(), order));
        self.rewound()
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self.rewound()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self.rewound()
    }

    /// Includes soft-deleted documents.
    pub fn with_trashed(mut self) -> Self {
        self.scope = TrashScope::Include;
        self.rewound()
    }

    /// Returns only soft-deleted documents.
    pub fn only_trashed(mut self) -> Self {
        self.scope = TrashScope::Only;
        self.rewound()
    }

    /// Applied after population.
    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self.rewound()
    }

    pub fn populate(mut self, population: Population) -> Self {
        self.populations.push(population);
        self.rewound()
    }

    pub fn state(&self) -> CursorState {
        self.phase
    }

    /// Back to [CursorState::Unstarted]; the next read runs the query again.
    pub fn rewind(&mut self) {
        self.phase = CursorState::Unstarted;
        self.buffer.clear();
    }

    /// First result, respecting sort and skip.
    pub fn first(&self) -> DocStoreResult<Option<Document>> {
        let limit = Some(self.limit.map_or(1, |l| l.min(1)));
        Ok(self.fetch(limit)?.into_iter().next())
    }

    /// Number of documents this cursor yields, after skip and limit,
    /// without loading them.
    pub fn size(&self) -> DocStoreResult<usize> {
        let skip = self.skip.unwrap_or(0);
        let total = self.count_matching(self.limit.map(|limit| skip.saturating_add(limit)))?;
        let after_skip = total.saturating_sub(skip);
        Ok(match self.limit {
            Some(limit) => after_skip.min(limit),
            None => after_skip,
        })
    }

    /// Loads every result.
    ///
    /// # Errors
    ///
    /// Without an explicit limit the matching rows are counted first (for
    /// encrypted collections, decoding stops once the limit is passed);
    /// more than the configured `max_unbounded_results` fails with
    /// `CapacityError` instead of loading them. Paginate with `limit`, or use
    /// [to_array_safe](DocumentCursor::to_array_safe).
    pub fn to_array(&self) -> DocStoreResult<Vec<Document>> {
        if self.limit.is_none() {
            let max = self.operations.db_config().max_unbounded_results();
            let skip = self.skip.unwrap_or(0);
            let condition = self.operations.condition(&self.state, &self.criteria, self.scope);
            let rows = self.operations.count_rows(&condition)?.saturating_sub(skip);
            // row count bounds the decodable count from above
            let over = rows > max
                && self
                    .count_matching(Some(skip.saturating_add(max).saturating_add(1)))?
                    .saturating_sub(skip)
                    > max;
            if over {
                log::error!("Query matched more than the unbounded limit of {} documents", max);
                return Err(DocStoreError::new(
                    &format!(
                        "Query matched more than the unbounded limit of {} documents; use limit() to paginate",
                        max
                    ),
                    ErrorKind::CapacityError,
                ));
            }
        }
        self.fetch(self.limit)
    }

    /// Like [to_array](DocumentCursor::to_array) but applies the configured
    /// `safe_result_cap` as the limit when none was set, instead of failing.
    pub fn to_array_safe(&self) -> DocStoreResult<Vec<Document>> {
        let limit = self
            .limit
            .unwrap_or_else(|| self.operations.db_config().safe_result_cap());
        self.fetch(Some(limit))
    }

    fn rewound(mut self) -> Self {
        self.rewind();
        self
    }

    /// Matching documents, counting no further than `stop_at`.
    fn count_matching(&self, stop_at: Option<usize>) -> DocStoreResult<usize> {
        let condition = self.operations.condition(&self.state, &self.criteria, self.scope);
        if self.state.codec.is_encrypted() {
            // rows that do not decode with our key do not count
            self.operations
                .count_decodable(&condition, &self.state.codec, stop_at)
        } else {
            self.operations.count_rows(&condition)
        }
    }

    /// ORDER BY clause, or `None` when ordering has to happen in memory.
    fn sql_order_by(&self) -> Option<String> {
        if self.sorts.is_empty() {
            return Some(String::new());
        }
        if self.state.codec.is_encrypted() {
            return None;
        }
        let terms = self
            .sorts
            .iter()
            .map(|(field, order)| {
                if field == DOC_ID {
                    return Some(format!("{} {}", ID_COLUMN, order.as_sql()));
                }
                let path = json_path(field)?;
                Some(format!(
                    "{} {}, {} {}",
                    type_rank(&path),
                    order.as_sql(),
                    json_extract(&path),
                    order.as_sql()
                ))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(format!(" ORDER BY {}", terms.join(", ")))
    }

    fn fetch(&self, limit: Option<usize>) -> DocStoreResult<Vec<Document>> {
        let condition = self.operations.condition(&self.state, &self.criteria, self.scope);
        let skip = self.skip.unwrap_or(0);

        let mut documents = match self.sql_order_by() {
            Some(order_by) => {
                let (paging, params) = match (limit, skip) {
                    (None, 0) => (String::new(), vec![]),
                    (None, skip) => (" LIMIT -1 OFFSET ?".to_string(), vec![SqlValue::Integer(skip as i64)]),
                    (Some(limit), skip) => (
                        " LIMIT ? OFFSET ?".to_string(),
                        vec![SqlValue::Integer(limit as i64), SqlValue::Integer(skip as i64)],
                    ),
                };
                let raw = self.operations.select_raw(&condition, &order_by, &paging, &params)?;
                self.decode_all(raw)
            }
            None => {
                let raw = self.operations.select_raw(&condition, "", "", &[])?;
                let mut decoded = self.decode_all(raw);
                decoded.sort_by(|a, b| compare_documents(a, b, &self.sorts));
                decoded
                    .into_iter()
                    .skip(skip)
                    .take(limit.unwrap_or(usize::MAX))
                    .collect()
            }
        };
        drop(condition);

        for population in &self.populations {
            population.apply(&mut documents)?;
        }
        if let Some(projection) = &self.projection {
            documents = documents.into_iter().map(|doc| projection.apply(doc)).collect();
        }
        Ok(documents)
    }

    fn decode_all(&self, raw: Vec<String>) -> Vec<Document> {
        raw.iter().filter_map(|r| self.state.codec.decode(r)).collect()
    }
}

/// SQL rank of a field's JSON type, in the order [Value](crate::common::Value)
/// sorts types.
fn type_rank(json_path: &str) -> String {
    format!(
        "CASE json_type({}, '{}') WHEN 'true' THEN 1 WHEN 'false' THEN 1 WHEN 'integer' THEN 2 \
         WHEN 'real' THEN 2 WHEN 'text' THEN 3 WHEN 'array' THEN 4 WHEN 'object' THEN 5 ELSE 0 END",
        DATA_COLUMN, json_path
    )
}

fn compare_documents(a: &Document, b: &Document, sorts: &[(String, SortOrder)]) -> Ordering {
    for (field, order) in sorts {
        let ordering = a.get(field).cmp(&b.get(field));
        let ordering = match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl Iterator for DocumentCursor {
    type Item = DocStoreResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.phase {
            CursorState::Exhausted => None,
            CursorState::Unstarted => match self.fetch(self.limit) {
                Ok(documents) => {
                    self.buffer = documents.into();
                    self.phase = CursorState::Iterating;
                    self.next()
                }
                Err(err) => {
                    self.phase = CursorState::Exhausted;
                    Some(Err(err))
                }
            },
            CursorState::Iterating => match self.buffer.pop_front() {
                Some(document) => Some(Ok(document)),
                None => {
                    self.phase = CursorState::Exhausted;
                    None
                }
            },
        }
    }
}

impl std::fmt::Debug for DocumentCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCursor")
            .field("table", &self.operations.table())
            .field("criteria", &self.criteria)
            .field("sorts", &self.sorts.iter().map(|(f, o)| format!("{} {}", f, o.as_sql())).join(", "))
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("scope", &self.scope)
            .field("state", &self.phase)
            .finish()
    }
}
