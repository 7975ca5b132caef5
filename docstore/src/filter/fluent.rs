use crate::collection::Document;
use crate::common::Value;
use crate::errors::DocStoreResult;
use crate::filter::{Clause, Condition, Criteria, FuzzyQuery, Operator, Pattern};
use std::sync::Arc;

/// Creates a fluent criteria builder for the specified field path.
///
/// ```rust,ignore
/// let adults = field("age").gte(18);
/// let names = field("name").in_list(vec!["Ann", "Bo"]);
/// ```
pub fn field(field_name: &str) -> FluentCriteria {
    FluentCriteria {
        field_name: field_name.to_string(),
    }
}

/// Criteria matching every document.
pub fn all() -> Criteria {
    Criteria::all()
}

/// Matches when every criteria matches.
pub fn and(criteria: Vec<Criteria>) -> Criteria {
    Criteria::from_clause(Clause::And(criteria))
}

/// Matches when at least one criteria matches.
pub fn or(criteria: Vec<Criteria>) -> Criteria {
    Criteria::from_clause(Clause::Or(criteria))
}

/// Matches documents accepted by the predicate.
pub fn where_fn<F>(predicate: F) -> Criteria
where
    F: Fn(&Document) -> bool + Send + Sync + 'static,
{
    Criteria::from_clause(Clause::Where(Arc::new(predicate)))
}

/// A builder for criteria on one field.
pub struct FluentCriteria {
    field_name: String,
}

impl FluentCriteria {
    fn with(self, operator: Operator) -> Criteria {
        Criteria::from_clause(Clause::Field {
            path: self.field_name,
            condition: Condition::Operators(vec![operator]),
        })
    }

    /// Bare equality, `{field: value}`. Unlike [FluentCriteria::eq] this uses
    /// loose comparison.
    pub fn equals<T: Into<Value>>(self, value: T) -> Criteria {
        Criteria::from_clause(Clause::Field {
            path: self.field_name,
            condition: Condition::Equals(value.into()),
        })
    }

    #[inline]
    pub fn eq<T: Into<Value>>(self, value: T) -> Criteria {
        self.with(Operator::Eq(value.into()))
    }

    #[inline]
    pub fn ne<T: Into<Value>>(self, value: T) -> Criteria {
        self.with(Operator::Ne(value.into()))
    }

    #[inline]
    pub fn gt<T: Into<Value>>(self, value: T) -> Criteria {
        self.with(Operator::Gt(value.into()))
    }

    #[inline]
    pub fn gte<T: Into<Value>>(self, value: T) -> Criteria {
        self.with(Operator::Gte(value.into()))
    }

    #[inline]
    pub fn lt<T: Into<Value>>(self, value: T) -> Criteria {
        self.with(Operator::Lt(value.into()))
    }

    #[inline]
    pub fn lte<T: Into<Value>>(self, value: T) -> Criteria {
        self.with(Operator::Lte(value.into()))
    }

    pub fn in_list<T: Into<Value>>(self, values: Vec<T>) -> Criteria {
        self.with(Operator::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<T: Into<Value>>(self, values: Vec<T>) -> Criteria {
        self.with(Operator::Nin(values.into_iter().map(Into::into).collect()))
    }

    /// Field (coerced to an array) contains the scalar.
    pub fn has<T: Into<Value>>(self, value: T) -> Criteria {
        self.with(Operator::Has(value.into()))
    }

    /// Field array contains every value.
    pub fn all<T: Into<Value>>(self, values: Vec<T>) -> Criteria {
        self.with(Operator::All(values.into_iter().map(Into::into).collect()))
    }

    pub fn size(self, size: i64) -> Criteria {
        self.with(Operator::Size(size))
    }

    /// # Errors
    ///
    /// `PredicateError` when the pattern does not compile.
    pub fn regex(self, pattern: &str) -> DocStoreResult<Criteria> {
        Ok(self.with(Operator::Regex(Pattern::compile(pattern)?)))
    }

    pub fn not_regex(self, pattern: &str) -> DocStoreResult<Criteria> {
        Ok(self.with(Operator::NotRegex(Pattern::compile(pattern)?)))
    }

    pub fn modulo(self, divisor: i64, remainder: i64) -> Criteria {
        self.with(Operator::Mod { divisor, remainder })
    }

    pub fn func<F>(self, predicate: F) -> Criteria
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.with(Operator::Func(Arc::new(predicate)))
    }

    pub fn exists(self, exists: bool) -> Criteria {
        self.with(Operator::Exists(exists))
    }

    pub fn fuzzy(self, query: FuzzyQuery) -> Criteria {
        self.with(Operator::Fuzzy(query))
    }
}
