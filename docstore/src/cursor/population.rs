use crate::collection::{DocStoreCollection, Document};
use crate::common::{Value, DOC_ID, FIELD_SEPARATOR};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use crate::filter::field;
use std::collections::HashMap;

/// Replaces references stored at a path with the documents they point to.
///
/// The values at `local_field` (looked up through nested documents and
/// arrays of documents) are matched against `foreign_field` of the target
/// collection in one query. Each reference is then replaced by the matching
/// document, or written under `alias` next to it when an alias is given. A
/// single reference becomes a document (or `null` when nothing matches); an
/// array of references becomes an array of the documents found, in the same
/// order.
///
/// The target may belong to another database.
///
/// ```rust,ignore
/// let posts = db.collection("posts")?;
/// let users = db.collection("users")?;
/// let populated = posts
///     .find(field("published").eq(true))?
///     .populate(Population::new("author_id", &users).alias("author"))
///     .to_array()?;
/// ```
#[derive(Clone)]
pub struct Population {
    local_field: String,
    target: DocStoreCollection,
    foreign_field: String,
    alias: Option<String>,
}

impl Population {
    /// References `_id` of the target by default.
    pub fn new(local_field: &str, target: &DocStoreCollection) -> Self {
        Population {
            local_field: local_field.to_string(),
            target: target.clone(),
            foreign_field: DOC_ID.to_string(),
            alias: None,
        }
    }

    pub fn foreign_field(mut self, foreign_field: &str) -> Self {
        self.foreign_field = foreign_field.to_string();
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Populates the documents in place.
    pub fn apply(&self, documents: &mut [Document]) -> DocStoreResult<()> {
        let segments: Vec<&str> = self.local_field.split(FIELD_SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            log::error!("Invalid population path {}", self.local_field);
            return Err(DocStoreError::new(
                &format!("Invalid population path {}", self.local_field),
                ErrorKind::InvalidOperation,
            ));
        }

        let mut references = Vec::new();
        for document in documents.iter() {
            collect_references(document, &segments, &mut references);
        }
        if references.is_empty() {
            return Ok(());
        }

        let mut lookup: HashMap<String, Document> = HashMap::new();
        for found in self.target.find(field(&self.foreign_field).in_list(references))? {
            let found = found?;
            if let Some(value) = found.get_ref(&self.foreign_field) {
                lookup.entry(reference_key(value)).or_insert(found);
            }
        }

        for document in documents.iter_mut() {
            inject(document, &segments, self.alias.as_deref(), &lookup);
        }
        Ok(())
    }
}

fn collect_references(document: &Document, segments: &[&str], out: &mut Vec<Value>) {
    match segments {
        [] => {}
        [last] => match document.get_ref(last) {
            Some(Value::Array(items)) => out.extend(items.iter().filter(|v| v.is_scalar() && !v.is_null()).cloned()),
            Some(value) if value.is_scalar() && !value.is_null() => out.push(value.clone()),
            _ => {}
        },
        [head, rest @ ..] => match document.get_ref(head) {
            Some(Value::Document(nested)) => collect_references(nested, rest, out),
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Document(nested) = item {
                        collect_references(nested, rest, out);
                    }
                }
            }
            _ => {}
        },
    }
}

fn inject(document: &mut Document, segments: &[&str], alias: Option<&str>, lookup: &HashMap<String, Document>) {
    match segments {
        [] => {}
        [last] => {
            let replacement = match document.get_ref(last) {
                Some(Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .filter_map(|item| lookup.get(&reference_key(item)))
                        .cloned()
                        .map(Value::Document)
                        .collect(),
                ),
                Some(value) if !value.is_null() => lookup
                    .get(&reference_key(value))
                    .cloned()
                    .map(Value::Document)
                    .unwrap_or(Value::Null),
                _ => return,
            };
            document.insert_raw(alias.unwrap_or(*last), replacement);
        }
        [head, rest @ ..] => {
            if let Some(value) = document.get_mut(head) {
                match value {
                    Value::Document(nested) => inject(nested, rest, alias, lookup),
                    Value::Array(items) => {
                        for item in items.iter_mut() {
                            if let Value::Document(nested) = item {
                                inject(nested, rest, alias, lookup);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Key under which a reference and a foreign value meet. Integral floats
/// fold into integers so `1` and `1.0` find each other.
fn reference_key(value: &Value) -> String {
    match value {
        Value::F64(f) if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 => (*f as i64).to_string(),
        Value::String(s) => format!("s:{}", s),
        other => other.to_string(),
    }
}
