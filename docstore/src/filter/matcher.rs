use crate::collection::Document;
use crate::common::Value;
use crate::filter::{Clause, Condition, Criteria, Operator};
use itertools::Itertools;
use std::cmp::Ordering;

impl Criteria {
    /// Evaluates this criteria against a document. Pure, no I/O.
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses().iter().all(|clause| clause_matches(clause, document))
    }
}

/// Evaluates `criteria` against `document`.
pub fn matches(criteria: &Criteria, document: &Document) -> bool {
    criteria.matches(document)
}

fn clause_matches(clause: &Clause, document: &Document) -> bool {
    match clause {
        Clause::Field { path, condition } => {
            let value = document.get_ref(path).unwrap_or(&Value::Null);
            condition_matches(condition, value)
        }
        Clause::And(items) => items.iter().all(|c| c.matches(document)),
        Clause::Or(items) => items.iter().any(|c| c.matches(document)),
        Clause::Where(predicate) => predicate(document),
    }
}

fn condition_matches(condition: &Condition, value: &Value) -> bool {
    match condition {
        Condition::Equals(expected) => field_equals(value, expected),
        Condition::Operators(operators) => operators.iter().all(|op| operator_matches(op, value)),
    }
}

/// Equality used for bare `{field: value}` conditions.
///
/// Same family scalars (number and number, string and string) compare
/// directly; everything else falls back to [loose_eq].
pub fn field_equals(value: &Value, expected: &Value) -> bool {
    match (value, expected) {
        (a, b) if a.is_number() && b.is_number() => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => loose_eq(value, expected),
    }
}

/// Loose equality with type juggling.
///
/// - `null` equals `false`, `0`, `""` and empty arrays or documents
/// - a bool compares with the truthiness of the other side
/// - a number equals a numeric string with the same value, and a
///   non-numeric string when the number's text form is that string
/// - arrays and documents compare element-wise with loose equality
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, other) | (other, Value::Null) => match other {
            Value::Bool(flag) => !flag,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Document(doc) => doc.is_empty(),
            number => number.as_f64() == Some(0.0),
        },
        (Value::Bool(flag), other) | (other, Value::Bool(flag)) => *flag == other.is_truthy(),
        (x, y) if x.is_number() && y.is_number() => x == y,
        (Value::String(s), number) | (number, Value::String(s)) if number.is_number() => {
            match numeric_text(s) {
                Some(parsed) => number.as_f64() == Some(parsed),
                None => scalar_text(number).as_deref() == Some(s.as_str()),
            }
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| loose_eq(l, r))
        }
        (Value::Document(x), Value::Document(y)) => {
            x.size() == y.size()
                && x.iter().all(|(key, l)| y.get_ref(key).map_or(false, |r| loose_eq(l, r)))
        }
        _ => false,
    }
}

fn operator_matches(operator: &Operator, value: &Value) -> bool {
    if value.is_null() && !matches!(operator, Operator::Exists(_)) {
        return false;
    }

    match operator {
        Operator::Eq(expected) => value == expected,
        Operator::Ne(expected) => value != expected,
        Operator::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
        Operator::Gte(bound) => matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
        Operator::Lte(bound) => matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal)),
        Operator::In(candidates) => in_list(value, candidates),
        Operator::Nin(candidates) => !in_list(value, candidates),
        Operator::Has(needle) => as_list(value).iter().any(|v| loose_eq(v, needle)),
        Operator::All(required) => {
            let present = as_list(value);
            required.iter().all(|r| present.iter().any(|v| loose_eq(v, r)))
        }
        Operator::Size(size) => value.as_array().map_or(false, |items| items.len() as i64 == *size),
        Operator::Regex(pattern) => scalar_text(value).map_or(false, |text| pattern.is_match(&text)),
        Operator::NotRegex(pattern) => !scalar_text(value).map_or(false, |text| pattern.is_match(&text)),
        Operator::Mod { divisor, remainder } => *divisor != 0 && modulo(value, *divisor) == Some(*remainder),
        Operator::Func(predicate) => predicate(value),
        Operator::Fuzzy(query) => fuzzy_text(value).map_or(false, |text| query.matches(&text)),
        Operator::Exists(expected) => *expected == !value.is_null(),
    }
}

/// Remainder of the truncated value, or `None` for non-numbers.
fn modulo(value: &Value, divisor: i64) -> Option<i64> {
    match value {
        Value::I64(n) => Some(n.wrapping_rem(divisor)),
        Value::F64(f) if f.is_finite() => {
            let truncated = f.trunc();
            if truncated.abs() < I64_BOUND {
                Some((truncated as i64).wrapping_rem(divisor))
            } else {
                // beyond i64 every f64 is an integer
                let rest = truncated % divisor as f64;
                (rest.abs() < I64_BOUND).then_some(rest as i64)
            }
        }
        _ => None,
    }
}

const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Ordering for range operators: only number/number and string/string
/// pairs are comparable.
fn compare(value: &Value, bound: &Value) -> Option<Ordering> {
    match (value, bound) {
        (a, b) if a.is_number() && b.is_number() => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn in_list(value: &Value, candidates: &[Value]) -> bool {
    match value {
        Value::Array(items) => items
            .iter()
            .any(|item| candidates.iter().any(|c| loose_eq(item, c))),
        scalar => candidates.iter().any(|c| loose_eq(scalar, c)),
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Number a string stands for when compared loosely with a number, e.g.
/// `" 1e3 "` is `1000`.
pub fn numeric_text(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

/// Text form of a scalar: strings as-is, numbers formatted, bools as
/// `"1"`/`""`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::I64(n) => Some(n.to_string()),
        Value::F64(f) => Some(f.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some(String::new()),
        _ => None,
    }
}

fn fuzzy_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(scalar_text).join(" ")),
        other => scalar_text(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::{field, FuzzyQuery};

    fn parse(criteria: Document) -> Criteria {
        Criteria::parse(&criteria).unwrap()
    }

    fn person() -> Document {
        doc! {
            "_id": "p1",
            "name": "Ann Smith",
            "age": 30,
            "score": 7.5,
            "zip": "10001",
            "tags": ["admin", "editor"],
            "address": { "city": "Paris" },
            "nickname": null,
            "active": true
        }
    }

    #[test]
    fn equality_rules() {
        let doc = person();
        assert!(parse(doc! { "name": "Ann Smith" }).matches(&doc));
        assert!(parse(doc! { "age": 30.0 }).matches(&doc));
        assert!(parse(doc! { "zip": 10001 }).matches(&doc));
        assert!(parse(doc! { "nickname": null }).matches(&doc));
        assert!(parse(doc! { "missing": null }).matches(&doc));
        assert!(parse(doc! { "missing": false }).matches(&doc));
        assert!(parse(doc! { "active": 1 }).matches(&doc));
        assert!(parse(doc! { "address": { "city": "Paris" } }).matches(&doc));
        assert!(parse(doc! { "address.city": "Paris" }).matches(&doc));
        assert!(!parse(doc! { "name": "ann smith" }).matches(&doc));
        assert!(!parse(doc! { "age": "thirty" }).matches(&doc));
    }

    #[test]
    fn loose_equality_table() {
        assert!(loose_eq(&Value::Null, &Value::from(0)));
        assert!(loose_eq(&Value::Null, &Value::from("")));
        assert!(loose_eq(&Value::Null, &Value::Array(vec![])));
        assert!(!loose_eq(&Value::Null, &Value::from("0")));
        assert!(loose_eq(&Value::from("1e3"), &Value::from(1000)));
        assert!(loose_eq(&Value::Bool(false), &Value::from("0")));
        assert!(!loose_eq(&Value::from(0), &Value::from("a")));
        assert!(loose_eq(&Value::from(vec![1, 2]), &Value::from(vec!["1", "2"])));
    }

    #[test]
    fn null_short_circuit_except_exists() {
        let doc = person();
        assert!(!parse(doc! { "nickname": { "$ne": "x" } }).matches(&doc));
        assert!(!parse(doc! { "missing": { "$nin": [1] } }).matches(&doc));
        assert!(parse(doc! { "missing": { "$exists": false } }).matches(&doc));
        assert!(parse(doc! { "nickname": { "$exists": false } }).matches(&doc));
        assert!(parse(doc! { "age": { "$exists": true } }).matches(&doc));
        assert!(!parse(doc! { "age": { "$exists": 0 } }).matches(&doc));
    }

    #[test]
    fn strict_eq_and_ne() {
        let doc = person();
        assert!(parse(doc! { "age": { "$eq": 30 } }).matches(&doc));
        assert!(!parse(doc! { "zip": { "$eq": 10001 } }).matches(&doc));
        assert!(parse(doc! { "zip": { "$ne": 10001 } }).matches(&doc));
    }

    #[test]
    fn range_requires_same_family() {
        let doc = person();
        assert!(parse(doc! { "age": { "$gte": 18, "$lt": 65 } }).matches(&doc));
        assert!(parse(doc! { "score": { "$gt": 7 } }).matches(&doc));
        assert!(parse(doc! { "name": { "$gt": "Am" } }).matches(&doc));
        assert!(!parse(doc! { "zip": { "$gt": 5 } }).matches(&doc));
        assert!(!parse(doc! { "age": { "$lte": "99" } }).matches(&doc));
    }

    #[test]
    fn membership() {
        let doc = person();
        assert!(parse(doc! { "age": { "$in": [29, 30] } }).matches(&doc));
        assert!(parse(doc! { "tags": { "$in": ["editor", "viewer"] } }).matches(&doc));
        assert!(!parse(doc! { "tags": { "$in": ["viewer"] } }).matches(&doc));
        assert!(parse(doc! { "tags": { "$nin": ["viewer"] } }).matches(&doc));
        assert!(!parse(doc! { "tags": { "$nin": ["admin"] } }).matches(&doc));
        assert!(!parse(doc! { "age": { "$in": [] } }).matches(&doc));
        assert!(parse(doc! { "age": { "$nin": [] } }).matches(&doc));
    }

    #[test]
    fn has_all_size() {
        let doc = person();
        assert!(parse(doc! { "tags": { "$has": "admin" } }).matches(&doc));
        assert!(parse(doc! { "name": { "$has": "Ann Smith" } }).matches(&doc));
        assert!(parse(doc! { "tags": { "$all": ["editor", "admin"] } }).matches(&doc));
        assert!(!parse(doc! { "tags": { "$all": ["editor", "owner"] } }).matches(&doc));
        assert!(parse(doc! { "tags": { "$size": 2 } }).matches(&doc));
        assert!(!parse(doc! { "name": { "$size": 9 } }).matches(&doc));
    }

    #[test]
    fn regex_and_not() {
        let doc = person();
        assert!(parse(doc! { "name": { "$regex": "^ann" } }).matches(&doc));
        assert!(!parse(doc! { "name": { "$regex": "/^ann/" } }).matches(&doc));
        assert!(parse(doc! { "zip": { "$match": "^100" } }).matches(&doc));
        assert!(parse(doc! { "name": { "$not": "^bob" } }).matches(&doc));
        assert!(!parse(doc! { "name": { "$not": "smith$" } }).matches(&doc));
    }

    #[test]
    fn modulo_operator() {
        let doc = person();
        assert!(parse(doc! { "age": { "$mod": [7, 2] } }).matches(&doc));
        assert!(!parse(doc! { "age": { "$mod": [7, 3] } }).matches(&doc));
        assert!(!parse(doc! { "age": { "$mod": [0, 0] } }).matches(&doc));
        assert!(!parse(doc! { "name": { "$mod": [2, 0] } }).matches(&doc));
    }

    #[test]
    fn modulo_at_integer_extremes() {
        let smallest = doc! { "n": (i64::MIN) };
        assert!(parse(doc! { "n": { "$mod": [(-1), 0] } }).matches(&smallest));
        assert!(parse(doc! { "n": { "$mod": [2, 0] } }).matches(&smallest));

        let odd = doc! { "n": 9007199254740993i64 };
        assert!(parse(doc! { "n": { "$mod": [2, 1] } }).matches(&odd));
        assert!(!parse(doc! { "n": { "$mod": [2, 0] } }).matches(&odd));

        let huge = doc! { "n": 1e20 };
        assert!(parse(doc! { "n": { "$mod": [7, 2] } }).matches(&huge));
        assert!(parse(doc! { "n": { "$mod": [10, 0] } }).matches(&huge));
        assert!(parse(doc! { "n": { "$mod": [3, (-1)] } }).matches(&doc! { "n": (-7.9) }));
    }

    #[test]
    fn func_and_fuzzy() {
        let doc = person();
        assert!(field("age").func(|v| v.as_i64().map_or(false, |n| n % 2 == 0)).matches(&doc));
        assert!(parse(doc! { "name": { "$fuzzy": "smyth" } }).matches(&doc));
        assert!(parse(doc! { "tags": { "$text": "editr" } }).matches(&doc));
        assert!(!field("name").fuzzy(FuzzyQuery::new("zebra")).matches(&doc));
    }

    #[test]
    fn logical_combinators() {
        let doc = person();
        assert!(parse(doc! { "$or": [{ "age": 1 }, { "name": "Ann Smith" }] }).matches(&doc));
        assert!(!parse(doc! { "$and": [{ "age": 30 }, { "name": "Bo" }] }).matches(&doc));
        assert!(parse(doc! {
            "$and": [
                { "$or": [{ "age": { "$lt": 18 } }, { "active": true }] },
                { "address.city": "Paris" }
            ]
        })
        .matches(&doc));
    }

    #[test]
    fn empty_criteria_matches_everything() {
        assert!(Criteria::all().matches(&Document::new()));
        assert!(matches(&Criteria::all(), &person()));
    }
}
