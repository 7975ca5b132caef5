use crate::common::{DATA_COLUMN, ID_COLUMN, MATCH_FUNCTION, META_TABLE, NUMBER_FUNCTION};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::filter::numeric_text;
use crate::query::{json_extract, json_path, quote_identifier, PredicateRegistry};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::fmt::{Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

static COLLECTION_NAME: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"));

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks a collection name against `^[A-Za-z_][A-Za-z0-9_]*$` and the
/// reserved metadata table name.
pub fn validate_collection_name(name: &str) -> DocStoreResult<()> {
    let valid = match COLLECTION_NAME.as_ref() {
        Ok(regex) => regex.is_match(name),
        Err(err) => {
            log::error!("Collection name pattern failed to compile: {}", err);
            return Err(DocStoreError::new(
                "Collection name pattern failed to compile",
                ErrorKind::InternalError,
            ));
        }
    };
    if !valid || name == META_TABLE {
        log::error!("Invalid collection name {}", name);
        return Err(DocStoreError::new(
            &format!("Invalid collection name {}", name),
            ErrorKind::ValidationError,
        ));
    }
    Ok(())
}

/// Wraps a failing statement with its SQL text and bound parameters.
pub(crate) fn statement_error(err: rusqlite::Error, sql: &str, params: &[SqlValue]) -> DocStoreError {
    log::error!("Statement failed: {} with params {:?}: {}", sql, params, err);
    DocStoreError::new_with_cause(
        &format!("Statement failed: {} with params {:?}", sql, params),
        ErrorKind::StorageError,
        err.into(),
    )
}

/// SQLite storage backend.
///
/// Owns one [Connection] behind a mutex and the [PredicateRegistry] whose
/// predicates the `docstore_match(token, data)` SQL function evaluates. Uses
/// the PIMPL pattern; clones share the same connection.
///
/// Every collection is a table `(id TEXT PRIMARY KEY, data TEXT)` plus one
/// `_s_<field>` column per searchable field.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<SqliteStoreInner>,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    pub fn open(path: &str, registry: PredicateRegistry) -> DocStoreResult<SqliteStore> {
        let conn = Connection::open(path)?;
        Self::initialize(conn, Some(path.to_string()), registry)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(registry: PredicateRegistry) -> DocStoreResult<SqliteStore> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, None, registry)
    }

    fn initialize(conn: Connection, path: Option<String>, registry: PredicateRegistry) -> DocStoreResult<SqliteStore> {
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let weak = AssertUnwindSafe(registry.downgrade());
        conn.create_scalar_function(MATCH_FUNCTION, 2, FunctionFlags::SQLITE_UTF8, move |ctx| {
            let token: i64 = ctx.get(0)?;
            let raw: Option<String> = ctx.get(1)?;
            Ok(match raw {
                Some(raw) => weak.invoke(token as u64, &raw),
                None => false,
            })
        })?;

        // text to number the way loose equality reads it, NULL otherwise
        conn.create_scalar_function(
            NUMBER_FUNCTION,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                Ok(match ctx.get_raw(0) {
                    ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                        .ok()
                        .and_then(numeric_text)
                        .filter(|n| n.is_finite()),
                    _ => None,
                })
            },
        )?;

        log::debug!("Opened SQLite store at {}", path.as_deref().unwrap_or(":memory:"));
        Ok(SqliteStore {
            inner: Arc::new(SqliteStoreInner {
                conn: Mutex::new(conn),
                registry,
                path,
            }),
        })
    }

    pub fn registry(&self) -> &PredicateRegistry {
        &self.inner.registry
    }

    pub fn path(&self) -> Option<&str> {
        self.inner.path.as_deref()
    }

    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> DocStoreResult<usize> {
        let conn = self.inner.conn.lock();
        execute_on(&conn, sql, params)
    }

    /// Runs a query returning a single text column.
    pub fn query_strings(&self, sql: &str, params: &[SqlValue]) -> DocStoreResult<Vec<String>> {
        self.query_rows(sql, params, |row| row.get::<_, String>(0))
    }

    pub fn query_rows<T, F>(&self, sql: &str, params: &[SqlValue], mapper: F) -> DocStoreResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.inner.conn.lock();
        query_on(&conn, sql, params, mapper)
    }

    /// Streams a single text column through `visit` without collecting it.
    /// Stops early when `visit` returns `false`.
    pub fn scan_strings<F>(&self, sql: &str, params: &[SqlValue], mut visit: F) -> DocStoreResult<()>
    where
        F: FnMut(&str) -> bool,
    {
        let conn = self.inner.conn.lock();
        log::debug!("Scanning {} {:?}", sql, params);
        let mut statement = conn.prepare(sql).map_err(|err| statement_error(err, sql, params))?;
        let mut rows = statement
            .query(params_from_iter(params.iter()))
            .map_err(|err| statement_error(err, sql, params))?;
        while let Some(row) = rows.next().map_err(|err| statement_error(err, sql, params))? {
            let text = row.get::<_, String>(0).map_err(|err| statement_error(err, sql, params))?;
            if !visit(&text) {
                break;
            }
        }
        Ok(())
    }

    /// Runs a query returning one integer, or `None` when no row or a NULL
    /// comes back.
    pub fn query_i64(&self, sql: &str, params: &[SqlValue]) -> DocStoreResult<Option<i64>> {
        let conn = self.inner.conn.lock();
        let result = conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get::<_, Option<i64>>(0))
            .optional()
            .map_err(|err| statement_error(err, sql, params))?;
        Ok(result.flatten())
    }

    /// Runs `work` inside a transaction. Commits when it returns `Ok`, rolls
    /// back when it returns `Err`.
    pub fn transaction<T, F>(&self, work: F) -> DocStoreResult<T>
    where
        F: FnOnce(&StoreTransaction<'_>) -> DocStoreResult<T>,
    {
        let mut conn = self.inner.conn.lock();
        let tx = conn.transaction()?;
        let result = work(&StoreTransaction { conn: &tx });
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    log::error!("Rollback failed: {}", rollback);
                }
                Err(err)
            }
        }
    }

    pub fn table_exists(&self, table: &str) -> DocStoreResult<bool> {
        let count = self.query_i64(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[SqlValue::Text(table.to_string())],
        )?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Column names of a table, in declaration order.
    pub fn table_columns(&self, table: &str) -> DocStoreResult<Vec<String>> {
        self.query_rows(
            &format!("PRAGMA table_info({})", quote_identifier(table)),
            &[],
            |row| row.get::<_, String>(1),
        )
    }

    pub fn create_collection_table(&self, table: &str) -> DocStoreResult<()> {
        validate_collection_name(table)?;
        self.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} TEXT NOT NULL)",
                quote_identifier(table),
                ID_COLUMN,
                DATA_COLUMN
            ),
            &[],
        )?;
        Ok(())
    }

    /// Adds a mirror column and its index unless the column already exists.
    pub fn add_search_column(&self, table: &str, column: &str) -> DocStoreResult<()> {
        if !self.table_columns(table)?.iter().any(|c| c == column) {
            self.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} TEXT", quote_identifier(table), quote_identifier(column)),
                &[],
            )?;
        }
        self.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_identifier(&index_name(table, column)),
                quote_identifier(table),
                quote_identifier(column)
            ),
            &[],
        )?;
        Ok(())
    }

    /// Creates an index on the JSON path of a field inside the data column.
    pub fn create_path_index(&self, table: &str, field: &str) -> DocStoreResult<()> {
        let path = json_path(field).ok_or_else(|| {
            log::error!("Field {} cannot be indexed", field);
            DocStoreError::new(&format!("Field {} cannot be indexed", field), ErrorKind::InvalidOperation)
        })?;
        self.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_identifier(&index_name(table, field)),
                quote_identifier(table),
                json_extract(&path)
            ),
            &[],
        )?;
        Ok(())
    }

    pub fn drop_path_index(&self, table: &str, field: &str) -> DocStoreResult<()> {
        self.execute(
            &format!("DROP INDEX IF EXISTS {}", quote_identifier(&index_name(table, field))),
            &[],
        )?;
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> DocStoreResult<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table)), &[])?;
        Ok(())
    }

    pub fn rename_table(&self, from: &str, to: &str) -> DocStoreResult<()> {
        validate_collection_name(to)?;
        self.execute(
            &format!("ALTER TABLE {} RENAME TO {}", quote_identifier(from), quote_identifier(to)),
            &[],
        )?;
        Ok(())
    }
}

impl Debug for SqliteStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteStore({})", self.path().unwrap_or(":memory:"))
    }
}

struct SqliteStoreInner {
    conn: Mutex<Connection>,
    registry: PredicateRegistry,
    path: Option<String>,
}

/// Statement access inside [SqliteStore::transaction].
pub struct StoreTransaction<'a> {
    conn: &'a Connection,
}

impl StoreTransaction<'_> {
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> DocStoreResult<usize> {
        execute_on(self.conn, sql, params)
    }

    pub fn query_strings(&self, sql: &str, params: &[SqlValue]) -> DocStoreResult<Vec<String>> {
        query_on(self.conn, sql, params, |row| row.get::<_, String>(0))
    }
}

fn execute_on(conn: &Connection, sql: &str, params: &[SqlValue]) -> DocStoreResult<usize> {
    log::debug!("Executing {} {:?}", sql, params);
    conn.execute(sql, params_from_iter(params.iter()))
        .map_err(|err| statement_error(err, sql, params))
}

fn query_on<T, F>(conn: &Connection, sql: &str, params: &[SqlValue], mapper: F) -> DocStoreResult<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    log::debug!("Querying {} {:?}", sql, params);
    let mut statement = conn.prepare(sql).map_err(|err| statement_error(err, sql, params))?;
    let rows = statement
        .query_map(params_from_iter(params.iter()), mapper)
        .map_err(|err| statement_error(err, sql, params))?;
    rows.collect::<rusqlite::Result<Vec<T>>>()
        .map_err(|err| statement_error(err, sql, params))
}

fn index_name(table: &str, field: &str) -> String {
    let sanitized: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("idx_{}_{}", table, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::field;
    use crate::query::FallbackPredicate;
    use crate::store::DocumentCodec;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(PredicateRegistry::new()).unwrap()
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn collection_names() {
        assert!(validate_collection_name("users").is_ok());
        assert!(validate_collection_name("_private2").is_ok());
        assert!(validate_collection_name("2users").is_err());
        assert!(validate_collection_name("users;drop").is_err());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name(META_TABLE).is_err());
    }

    #[test]
    fn number_function_reads_numeric_text() {
        let store = store();
        let read = |arg: SqlValue| {
            store
                .query_rows("SELECT docstore_number(?)", &[arg], |row| row.get::<_, Option<f64>>(0))
                .unwrap()[0]
        };
        assert_eq!(read(text(" 1e3 ")), Some(1000.0));
        assert_eq!(read(text("10001")), Some(10001.0));
        assert_eq!(read(text("ten")), None);
        assert_eq!(read(text("")), None);
        assert_eq!(read(SqlValue::Integer(5)), None);
        assert_eq!(read(SqlValue::Null), None);
    }

    #[test]
    fn create_table_and_columns() {
        let store = store();
        store.create_collection_table("users").unwrap();
        assert!(store.table_exists("users").unwrap());
        assert_eq!(store.table_columns("users").unwrap(), vec!["id", "data"]);

        store.add_search_column("users", "_s_email").unwrap();
        store.add_search_column("users", "_s_email").unwrap();
        assert_eq!(store.table_columns("users").unwrap(), vec!["id", "data", "_s_email"]);
    }

    #[test]
    fn transaction_commits_and_rolls_back() {
        let store = store();
        store.create_collection_table("t").unwrap();
        store
            .transaction(|tx| tx.execute("INSERT INTO t (id, data) VALUES (?, ?)", &[text("a"), text("{}")]))
            .unwrap();

        let failed: DocStoreResult<()> = store.transaction(|tx| {
            tx.execute("INSERT INTO t (id, data) VALUES (?, ?)", &[text("b"), text("{}")])?;
            tx.execute("INSERT INTO t (id, data) VALUES (?, ?)", &[text("a"), text("{}")])?;
            Ok(())
        });
        let err = failed.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::StorageError);
        assert!(err.message().contains("INSERT INTO t"));

        assert_eq!(store.query_strings("SELECT id FROM t", &[]).unwrap(), vec!["a"]);
    }

    #[test]
    fn match_function_uses_registry() {
        let store = store();
        store.create_collection_table("people").unwrap();
        store
            .execute(
                "INSERT INTO people (id, data) VALUES ('1', '{\"age\": 30}'), ('2', '{\"age\": 10}')",
                &[],
            )
            .unwrap();

        let lease = store.registry().register(
            FallbackPredicate::Criteria(field("age").gte(18)),
            DocumentCodec::Plain,
        );
        let ids = store
            .query_strings(
                "SELECT id FROM people WHERE docstore_match(?, data)",
                &[SqlValue::Integer(lease.id() as i64)],
            )
            .unwrap();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn path_index_lifecycle() {
        let store = store();
        store.create_collection_table("t").unwrap();
        store.create_path_index("t", "address.city").unwrap();
        let indexes = store
            .query_strings("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 't' AND name LIKE 'idx_%'", &[])
            .unwrap();
        assert_eq!(indexes, vec!["idx_t_address_city"]);
        store.drop_path_index("t", "address.city").unwrap();
        assert!(store.create_path_index("t", "items.0").is_err());
    }

    #[test]
    fn rename_and_drop() {
        let store = store();
        store.create_collection_table("a").unwrap();
        store.rename_table("a", "b").unwrap();
        assert!(!store.table_exists("a").unwrap());
        assert!(store.table_exists("b").unwrap());
        store.drop_table("b").unwrap();
        assert!(!store.table_exists("b").unwrap());
    }

    #[test]
    fn query_i64_handles_empty() {
        let store = store();
        store.create_collection_table("t").unwrap();
        assert_eq!(store.query_i64("SELECT MAX(1) FROM t WHERE 0", &[]).unwrap(), None);
        assert_eq!(store.query_i64("SELECT COUNT(*) FROM t", &[]).unwrap(), Some(0));
    }
}
