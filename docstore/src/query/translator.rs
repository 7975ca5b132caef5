use crate::common::{Value, DATA_COLUMN, DOC_ID, FIELD_SEPARATOR, ID_COLUMN, MATCH_FUNCTION, NUMBER_FUNCTION};
use crate::filter::{numeric_text, Clause, Condition, Criteria, Operator};
use crate::index::{mirror_value, search_column, SearchableField, SearchableFields};
use crate::query::{FallbackPredicate, PredicateLease, PredicateRegistry};
use crate::store::DocumentCodec;
use itertools::Itertools;
use rusqlite::types::Value as SqlValue;

/// What the translator needs to know about the collection being queried.
#[derive(Clone, Copy)]
pub struct QueryContext<'a> {
    pub searchable: &'a SearchableFields,
    /// Encrypted blobs cannot be inspected by SQL, so only `_id` and
    /// searchable fields translate natively.
    pub encrypted: bool,
}

/// Outcome of the translation decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    /// Native WHERE fragments, ANDed, with their bound parameters. No
    /// fragments means no condition.
    Translatable {
        fragments: Vec<String>,
        params: Vec<SqlValue>,
    },
    RequiresFallback,
}

/// A WHERE condition ready to bind.
///
/// When the criteria required the fallback path, `lease` keeps the
/// registered predicate alive; the condition must not outlive it.
#[derive(Debug, Default)]
pub struct SqlCondition {
    pub fragments: Vec<String>,
    pub params: Vec<SqlValue>,
    pub lease: Option<PredicateLease>,
}

impl SqlCondition {
    pub fn is_fallback(&self) -> bool {
        self.lease.is_some()
    }

    /// Adds a fragment that must also hold.
    pub fn push(&mut self, fragment: impl Into<String>, params: Vec<SqlValue>) {
        self.fragments.push(fragment.into());
        self.params.extend(params);
    }

    /// `WHERE ...` clause text, empty when there is no condition.
    pub fn where_clause(&self) -> String {
        if self.fragments.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.fragments.iter().map(|f| format!("({})", f)).join(" AND "))
        }
    }
}

/// Decides whether `criteria` can run as native SQL and builds the
/// fragments when it can.
///
/// Translatable criteria have no logical clause and only use bare
/// equality against a string or number, `$gt`, `$gte`, `$lt`, `$lte` and
/// `$exists`. `$in` and `$nin` also translate on searchable fields and on
/// `_id` with string values.
pub fn translate(criteria: &Criteria, context: QueryContext<'_>) -> Translation {
    let mut fragments = Vec::new();
    let mut params = Vec::new();
    for clause in criteria.clauses() {
        let (path, condition) = match clause {
            Clause::Field { path, condition } => (path, condition),
            _ => return Translation::RequiresFallback,
        };
        let target = match Target::resolve(path, context) {
            Some(target) => target,
            None => return Translation::RequiresFallback,
        };
        let translated = match condition {
            Condition::Equals(value) => target.equals(value),
            Condition::Operators(operators) => operators
                .iter()
                .map(|op| target.operator(op))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.into_iter().flatten().collect()),
        };
        match translated {
            Some(parts) => {
                for (fragment, bound) in parts {
                    fragments.push(fragment);
                    params.extend(bound);
                }
            }
            None => return Translation::RequiresFallback,
        }
    }
    Translation::Translatable { fragments, params }
}

/// Translates `criteria`, registering it with the registry when it needs the
/// fallback path.
pub fn to_sql_condition(
    criteria: &Criteria,
    context: QueryContext<'_>,
    registry: &PredicateRegistry,
    codec: &DocumentCodec,
) -> SqlCondition {
    match translate(criteria, context) {
        Translation::Translatable { fragments, params } => {
            log::debug!("Native condition: {:?} {:?}", fragments, params);
            SqlCondition {
                fragments,
                params,
                lease: None,
            }
        }
        Translation::RequiresFallback => {
            let predicate = match criteria.clauses() {
                [Clause::Where(callback)] => FallbackPredicate::Callback(callback.clone()),
                _ => FallbackPredicate::Criteria(criteria.clone()),
            };
            let lease = registry.register(predicate, codec.clone());
            log::debug!("Fallback condition for {:?} using predicate {}", criteria, lease.id());
            SqlCondition {
                fragments: vec![format!("{}(?, {})", MATCH_FUNCTION, DATA_COLUMN)],
                params: vec![SqlValue::Integer(lease.id() as i64)],
                lease: Some(lease),
            }
        }
    }
}

type Fragment = (String, Vec<SqlValue>);

/// The SQL expression a field path reads from.
enum Target {
    Id,
    Mirror { column: String, options: SearchableField },
    Json { expression: String, json_path: String },
}

impl Target {
    fn resolve(path: &str, context: QueryContext<'_>) -> Option<Target> {
        if path == DOC_ID {
            return Some(Target::Id);
        }
        if let Some(options) = context.searchable.get(path) {
            return Some(Target::Mirror {
                column: quote_identifier(&search_column(path)),
                options: *options,
            });
        }
        if context.encrypted {
            return None;
        }
        let json_path = json_path(path)?;
        Some(Target::Json {
            expression: json_extract(&json_path),
            json_path,
        })
    }

    fn expression(&self) -> String {
        match self {
            Target::Id => ID_COLUMN.to_string(),
            Target::Mirror { column, .. } => column.clone(),
            Target::Json { expression, .. } => expression.clone(),
        }
    }

    /// Bare equality, following the matcher's loose rules.
    fn equals(&self, value: &Value) -> Option<Vec<Fragment>> {
        match (self, value) {
            (Target::Id, Value::String(s)) => Some(vec![(format!("{} = ?", ID_COLUMN), vec![SqlValue::Text(s.clone())])]),
            (Target::Mirror { column, options }, Value::String(s)) => {
                let mirrored = mirror_value(value, options)?;
                let fragment = if s.is_empty() {
                    format!("{} IS NULL OR {} = ?", column, column)
                } else {
                    format!("{} = ?", column)
                };
                Some(vec![(fragment, vec![SqlValue::Text(mirrored)])])
            }
            (Target::Json { expression, json_path }, v) if v.is_string() || v.is_number() => {
                Some(vec![loose_equals(expression, json_path, v)])
            }
            _ => None,
        }
    }

    /// `None` means not translatable. `Some(None)` means the operator adds no
    /// condition.
    fn operator(&self, operator: &Operator) -> Option<Option<Fragment>> {
        match operator {
            Operator::Gt(bound) => self.range(">", bound).map(Some),
            Operator::Gte(bound) => self.range(">=", bound).map(Some),
            Operator::Lt(bound) => self.range("<", bound).map(Some),
            Operator::Lte(bound) => self.range("<=", bound).map(Some),
            Operator::Exists(true) => Some(Some((format!("{} IS NOT NULL", self.expression()), vec![]))),
            Operator::Exists(false) => Some(Some((format!("{} IS NULL", self.expression()), vec![]))),
            Operator::In(values) => self.membership(values, false),
            Operator::Nin(values) => self.membership(values, true),
            _ => None,
        }
    }

    fn range(&self, op: &str, bound: &Value) -> Option<Fragment> {
        match self {
            Target::Id => match bound {
                Value::String(s) => Some((format!("{} {} ?", ID_COLUMN, op), vec![SqlValue::Text(s.clone())])),
                _ => None,
            },
            Target::Mirror { column, options } => {
                if !(bound.is_string() || bound.is_number()) {
                    return Some(("0".to_string(), vec![]));
                }
                let mirrored = mirror_value(bound, options)?;
                Some((format!("{} {} ?", column, op), vec![SqlValue::Text(mirrored)]))
            }
            Target::Json { expression, json_path } => {
                // only number/number and string/string pairs compare
                let guard = match bound {
                    b if b.is_number() => "IN ('integer', 'real')",
                    Value::String(_) => "= 'text'",
                    _ => return Some(("0".to_string(), vec![])),
                };
                Some((
                    format!(
                        "json_type({}, '{}') {} AND {} {} ?",
                        DATA_COLUMN, json_path, guard, expression, op
                    ),
                    vec![to_sql_value(bound)],
                ))
            }
        }
    }

    fn membership(&self, values: &[Value], negate: bool) -> Option<Option<Fragment>> {
        let (column, mirrored): (&str, Vec<SqlValue>) = match self {
            Target::Mirror { column, options } => (
                column.as_str(),
                values
                    .iter()
                    .filter_map(|v| mirror_value(v, options))
                    .unique()
                    .map(SqlValue::Text)
                    .collect(),
            ),
            // non-string values compare loosely, leave them to the matcher
            Target::Id if values.iter().all(Value::is_string) => (
                ID_COLUMN,
                values
                    .iter()
                    .filter_map(|v| v.as_str())
                    .unique()
                    .map(|s| SqlValue::Text(s.to_string()))
                    .collect(),
            ),
            _ => return None,
        };
        if mirrored.is_empty() {
            return if negate {
                Some(None)
            } else {
                Some(Some(("0".to_string(), vec![])))
            };
        }
        let placeholders = vec!["?"; mirrored.len()].join(", ");
        let keyword = if negate { "NOT IN" } else { "IN" };
        Some(Some((format!("{} {} ({})", column, keyword, placeholders), mirrored)))
    }
}

/// ORs one branch per stored JSON type that can equal `value` loosely.
///
/// Strings match text exactly and numbers by value when numeric. Numbers
/// match numbers by value and numeric text. Falsy values also match null
/// and missing fields. Bools match by truthiness.
fn loose_equals(expression: &str, json_path: &str, value: &Value) -> Fragment {
    let json_type = format!("json_type({}, '{}')", DATA_COLUMN, json_path);
    let mut branches = Vec::new();
    let mut params = Vec::new();
    match value {
        Value::String(s) => {
            branches.push(format!("{} = 'text' AND {} = ?", json_type, expression));
            params.push(SqlValue::Text(s.clone()));
            if let Some(number) = numeric_text(s).filter(|n| n.is_finite()) {
                branches.push(format!(
                    "{} IN ('integer', 'real') AND CAST({} AS REAL) = ?",
                    json_type, expression
                ));
                params.push(SqlValue::Real(number));
            }
        }
        Value::I64(n) => {
            branches.push(format!("{} = 'integer' AND {} = ?", json_type, expression));
            params.push(SqlValue::Integer(*n));
            branches.push(format!("{} = 'real' AND {} = ?", json_type, expression));
            params.push(SqlValue::Real(*n as f64));
        }
        Value::F64(f) => {
            branches.push(format!(
                "{} IN ('integer', 'real') AND CAST({} AS REAL) = ?",
                json_type, expression
            ));
            params.push(SqlValue::Real(*f));
        }
        _ => {}
    }
    if let Some(number) = value.as_f64() {
        branches.push(format!("{} = 'text' AND {}({}) = ?", json_type, NUMBER_FUNCTION, expression));
        params.push(SqlValue::Real(number));
    }
    if !value.is_truthy() && value.as_str() != Some("0") {
        branches.push(format!("{} IS NULL OR {} = 'null'", json_type, json_type));
    }
    branches.push(format!(
        "{} = '{}'",
        json_type,
        if value.is_truthy() { "true" } else { "false" }
    ));
    (branches.iter().map(|b| format!("({})", b)).join(" OR "), params)
}

/// JSON path for a dot separated field, `a.b` becomes `$."a"."b"`.
///
/// Paths with quote characters or numeric segments are not expressible and
/// return `None`.
pub fn json_path(field: &str) -> Option<String> {
    let mut path = String::from("$");
    for segment in field.split(FIELD_SEPARATOR) {
        if segment.is_empty()
            || segment.contains('"')
            || segment.contains('\'')
            || segment.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        path.push_str(&format!(".\"{}\"", segment));
    }
    Some(path)
}

/// `json_extract(data, '<path>')` for a JSON path built by [json_path].
pub fn json_extract(json_path: &str) -> String {
    format!("json_extract({}, '{}')", DATA_COLUMN, json_path)
}

/// Double-quotes an identifier for SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Converts a scalar to a bindable SQL value. Bools bind as `1`/`0`;
/// arrays and documents bind as JSON text.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::I64(n) => SqlValue::Integer(*n),
        Value::F64(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_json().to_string()),
    }
}
