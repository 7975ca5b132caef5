use crate::collection::Document;
use crate::common::Value;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::filter::{FuzzyQuery, Pattern};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Predicate over a single field value, used by `$func`.
pub type FieldPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Predicate over a whole document, used by `$where` and callback queries.
pub type DocumentPredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// One per-field operator with its validated argument.
#[derive(Clone)]
pub enum Operator {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Has(Value),
    All(Vec<Value>),
    Size(i64),
    Regex(Pattern),
    NotRegex(Pattern),
    Mod { divisor: i64, remainder: i64 },
    Func(FieldPredicate),
    Exists(bool),
    Fuzzy(FuzzyQuery),
}

impl Operator {
    /// The operator key as written in a criteria document.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq(_) => "$eq",
            Operator::Ne(_) => "$ne",
            Operator::Gt(_) => "$gt",
            Operator::Gte(_) => "$gte",
            Operator::Lt(_) => "$lt",
            Operator::Lte(_) => "$lte",
            Operator::In(_) => "$in",
            Operator::Nin(_) => "$nin",
            Operator::Has(_) => "$has",
            Operator::All(_) => "$all",
            Operator::Size(_) => "$size",
            Operator::Regex(_) => "$regex",
            Operator::NotRegex(_) => "$not",
            Operator::Mod { .. } => "$mod",
            Operator::Func(_) => "$func",
            Operator::Exists(_) => "$exists",
            Operator::Fuzzy(_) => "$fuzzy",
        }
    }

    /// Parses one `operator: argument` pair from a criteria document.
    ///
    /// # Errors
    ///
    /// `PredicateError` for an unknown operator, an operator that needs a
    /// closure, or an argument of the wrong shape.
    pub fn parse(name: &str, argument: &Value) -> DocStoreResult<Operator> {
        match name {
            "$eq" => Ok(Operator::Eq(argument.clone())),
            "$ne" => Ok(Operator::Ne(argument.clone())),
            "$gt" => Ok(Operator::Gt(argument.clone())),
            "$gte" => Ok(Operator::Gte(argument.clone())),
            "$lt" => Ok(Operator::Lt(argument.clone())),
            "$lte" => Ok(Operator::Lte(argument.clone())),
            "$in" => Ok(Operator::In(expect_array(name, argument)?)),
            "$nin" => Ok(Operator::Nin(expect_array(name, argument)?)),
            "$has" => {
                if argument.is_array() {
                    return Err(predicate_error(&format!(
                        "{} expects a scalar argument, found an array",
                        name
                    )));
                }
                Ok(Operator::Has(argument.clone()))
            }
            "$all" => Ok(Operator::All(expect_array(name, argument)?)),
            "$size" => match argument.as_i64() {
                Some(size) => Ok(Operator::Size(size)),
                None => Err(predicate_error(&format!(
                    "{} expects an integer argument, found {}",
                    name,
                    argument.type_name()
                ))),
            },
            "$regex" | "$preg" | "$match" => Ok(Operator::Regex(Pattern::compile(expect_str(name, argument)?)?)),
            "$not" => Ok(Operator::NotRegex(Pattern::compile(expect_str(name, argument)?)?)),
            "$mod" => parse_mod(argument),
            "$exists" => Ok(Operator::Exists(argument.is_truthy())),
            "$fuzzy" | "$text" => parse_fuzzy(name, argument),
            "$func" | "$fn" | "$f" => Err(predicate_error(&format!(
                "{} takes a function and can only be built with field(..).func(..)",
                name
            ))),
            other => Err(predicate_error(&format!("Unknown operator {}", other))),
        }
    }
}

impl Debug for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Eq(v)
            | Operator::Ne(v)
            | Operator::Gt(v)
            | Operator::Gte(v)
            | Operator::Lt(v)
            | Operator::Lte(v)
            | Operator::Has(v) => write!(f, "{}: {}", self.name(), v),
            Operator::In(vs) | Operator::Nin(vs) | Operator::All(vs) => {
                write!(f, "{}: {:?}", self.name(), vs)
            }
            Operator::Size(n) => write!(f, "$size: {}", n),
            Operator::Regex(p) | Operator::NotRegex(p) => write!(f, "{}: {}", self.name(), p),
            Operator::Mod { divisor, remainder } => write!(f, "$mod: [{}, {}]", divisor, remainder),
            Operator::Func(_) => write!(f, "$func: <fn>"),
            Operator::Exists(flag) => write!(f, "$exists: {}", flag),
            Operator::Fuzzy(q) => write!(f, "$fuzzy: {}", q.query),
        }
    }
}

/// What a field is tested against.
#[derive(Clone, Debug)]
pub enum Condition {
    /// Bare value: `{name: "Ann"}`.
    Equals(Value),
    /// Operator map: `{age: {$gte: 18, $lt: 65}}`, all must hold.
    Operators(Vec<Operator>),
}

/// A node of the criteria tree.
#[derive(Clone)]
pub enum Clause {
    Field { path: String, condition: Condition },
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Where(DocumentPredicate),
}

impl Debug for Clause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Clause::Field { path, condition } => write!(f, "{}: {:?}", path, condition),
            Clause::And(items) => write!(f, "$and: {:?}", items),
            Clause::Or(items) => write!(f, "$or: {:?}", items),
            Clause::Where(_) => write!(f, "$where: <fn>"),
        }
    }
}

/// A query criteria tree. Top level clauses are implicitly ANDed; an empty
/// criteria matches every document.
///
/// Criteria are built either from a MongoDB-style document with
/// [Criteria::parse] or with the fluent builder:
///
/// ```rust,ignore
/// use docstore::doc;
/// use docstore::filter::{field, Criteria};
///
/// let parsed = Criteria::parse(&doc!{ "age": { "$gte": 18 }, "status": "active" })?;
/// let built = field("age").gte(18).and(field("status").eq("active"));
/// ```
#[derive(Clone, Default)]
pub struct Criteria {
    clauses: Vec<Clause>,
}

impl Criteria {
    /// Criteria matching every document.
    pub fn all() -> Criteria {
        Criteria { clauses: Vec::new() }
    }

    pub fn from_clause(clause: Clause) -> Criteria {
        Criteria { clauses: vec![clause] }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Adds a clause that must also hold.
    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Conjunction of this criteria and `other`.
    pub fn and(mut self, other: Criteria) -> Criteria {
        self.clauses.extend(other.clauses);
        self
    }

    /// Disjunction of this criteria and `other`.
    pub fn or(self, other: Criteria) -> Criteria {
        Criteria::from_clause(Clause::Or(vec![self, other]))
    }

    /// Parses a criteria document.
    ///
    /// Keys `$and` and `$or` take an array of criteria documents. Any other key
    /// names a field; its value is either a bare value (equality) or a document
    /// whose keys are operators.
    pub fn parse(document: &Document) -> DocStoreResult<Criteria> {
        let mut criteria = Criteria::all();
        for (key, value) in document.iter() {
            let clause = match key.as_str() {
                "$and" => Clause::And(parse_list(key, value)?),
                "$or" => Clause::Or(parse_list(key, value)?),
                "$where" => {
                    return Err(predicate_error(
                        "$where takes a function and can only be built with where_fn(..)",
                    ))
                }
                op if op.starts_with('$') => {
                    return Err(predicate_error(&format!("Unknown logical operator {}", op)))
                }
                path => Clause::Field {
                    path: path.to_string(),
                    condition: parse_condition(value)?,
                },
            };
            criteria.push(clause);
        }
        Ok(criteria)
    }
}

impl Debug for Criteria {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.clauses.iter()).finish()
    }
}

fn parse_condition(value: &Value) -> DocStoreResult<Condition> {
    match value {
        Value::Document(doc) if doc.keys().any(|k| k.starts_with('$')) => {
            let mut operators = Vec::with_capacity(doc.size());
            for (name, argument) in doc.iter() {
                operators.push(Operator::parse(name, argument)?);
            }
            Ok(Condition::Operators(operators))
        }
        other => Ok(Condition::Equals(other.clone())),
    }
}

fn parse_list(name: &str, value: &Value) -> DocStoreResult<Vec<Criteria>> {
    let items = value
        .as_array()
        .ok_or_else(|| predicate_error(&format!("{} expects an array of criteria", name)))?;
    items
        .iter()
        .map(|item| match item {
            Value::Document(doc) => Criteria::parse(doc),
            other => Err(predicate_error(&format!(
                "{} expects criteria documents, found {}",
                name,
                other.type_name()
            ))),
        })
        .collect()
}

fn parse_mod(argument: &Value) -> DocStoreResult<Operator> {
    let pair = argument
        .as_array()
        .filter(|items| items.len() == 2)
        .ok_or_else(|| predicate_error("$mod expects [divisor, remainder]"))?;
    match (pair[0].as_i64(), pair[1].as_i64()) {
        (Some(divisor), Some(remainder)) => Ok(Operator::Mod { divisor, remainder }),
        _ => Err(predicate_error("$mod expects integer divisor and remainder")),
    }
}

fn parse_fuzzy(name: &str, argument: &Value) -> DocStoreResult<Operator> {
    match argument {
        Value::String(query) => Ok(Operator::Fuzzy(FuzzyQuery::new(query))),
        Value::Document(options) => {
            let query = options
                .get_ref("query")
                .and_then(|q| q.as_str())
                .ok_or_else(|| predicate_error(&format!("{} expects a query string", name)))?;
            let mut fuzzy = FuzzyQuery::new(query);
            if let Some(threshold) = options.get_ref("threshold") {
                let threshold = threshold
                    .as_i64()
                    .filter(|t| *t >= 0)
                    .ok_or_else(|| predicate_error(&format!("{} threshold must be a non-negative integer", name)))?;
                fuzzy = fuzzy.threshold(threshold as usize);
            }
            if let Some(min_score) = options.get_ref("min_score") {
                let min_score = min_score
                    .as_f64()
                    .ok_or_else(|| predicate_error(&format!("{} min_score must be a number", name)))?;
                fuzzy = fuzzy.min_score(min_score);
            }
            Ok(Operator::Fuzzy(fuzzy))
        }
        other => Err(predicate_error(&format!(
            "{} expects a string or options document, found {}",
            name,
            other.type_name()
        ))),
    }
}

fn expect_array(name: &str, argument: &Value) -> DocStoreResult<Vec<Value>> {
    match argument {
        Value::Array(items) => Ok(items.clone()),
        other => Err(predicate_error(&format!(
            "{} expects an array argument, found {}",
            name,
            other.type_name()
        ))),
    }
}

fn expect_str<'a>(name: &str, argument: &'a Value) -> DocStoreResult<&'a str> {
    argument.as_str().ok_or_else(|| {
        predicate_error(&format!(
            "{} expects a pattern string, found {}",
            name,
            argument.type_name()
        ))
    })
}

fn predicate_error(message: &str) -> DocStoreError {
    log::error!("{}", message);
    DocStoreError::new(message, ErrorKind::PredicateError)
}
