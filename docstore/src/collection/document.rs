use crate::common::{Value, DOC_ID, FIELD_SEPARATOR};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};

type PathVec<'a> = SmallVec<[&'a str; 8]>;

fn split_path(path: &str) -> PathVec<'_> {
    path.split(FIELD_SEPARATOR).collect()
}

/// Represents a document stored in a docstore collection.
///
/// A document is an insertion-ordered mapping of field name to [Value]. Nested
/// values are addressed with a dot separated path, so `doc.get("a.b")` reads
/// field `b` of the nested document under `a`. A numeric path segment indexes
/// into an array (`"tags.0"`).
///
/// The reserved field `_id` holds the string identifier of a persisted
/// document and is unique within its collection.
#[derive(Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Document {
    data: IndexMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of top level entries.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Inserts a top level entry without interpreting the key as a path.
    ///
    /// Keys containing the separator are kept literally, which is how criteria
    /// and `$set` patches address nested fields.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Associates the value with the dot separated path, creating intermediate
    /// documents as needed.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` when the key is empty or when an
    /// intermediate segment already holds a scalar.
    ///
    /// ```ignore
    /// let mut doc = Document::new();
    /// doc.put("user.name", "Alice")?;
    /// assert_eq!(doc.get("user.name"), Value::from("Alice"));
    /// ```
    pub fn put(&mut self, key: &str, value: impl Into<Value>) -> DocStoreResult<()> {
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(DocStoreError::new(
                "Document does not support empty key",
                ErrorKind::InvalidOperation,
            ));
        }

        let value = value.into();
        if !key.contains(FIELD_SEPARATOR) {
            self.data.insert(key.to_string(), value);
            return Ok(());
        }

        let segments = split_path(key);
        if segments.iter().any(|s| s.is_empty()) {
            log::error!("Invalid field path {}", key);
            return Err(DocStoreError::new(
                &format!("Invalid field path {}", key),
                ErrorKind::InvalidOperation,
            ));
        }
        deep_put(self, &segments, value, key)
    }

    /// Returns the value at the dot separated path or [Value::Null] when the
    /// path does not resolve.
    pub fn get(&self, key: &str) -> Value {
        self.get_ref(key).cloned().unwrap_or(Value::Null)
    }

    /// Borrows the value at the dot separated path.
    ///
    /// A top level key that literally contains the separator wins over the
    /// nested interpretation.
    pub fn get_ref(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.data.get(key) {
            return Some(value);
        }
        if !key.contains(FIELD_SEPARATOR) {
            return None;
        }

        let segments = split_path(key);
        let (first, rest) = segments.split_first()?;
        let mut current = self.data.get(*first)?;
        for segment in rest {
            current = match current {
                Value::Document(doc) => doc.data.get(*segment)?,
                Value::Array(items) => {
                    let index = segment.parse::<usize>().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Mutable access to a top level key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Removes the value at the dot separated path and returns it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if let Some(value) = self.data.shift_remove(key) {
            return Some(value);
        }
        if !key.contains(FIELD_SEPARATOR) {
            return None;
        }

        let segments = split_path(key);
        let (last, parents) = segments.split_last()?;
        let mut current = self;
        for segment in parents {
            current = match current.data.get_mut(*segment) {
                Some(Value::Document(doc)) => doc,
                _ => return None,
            };
        }
        current.data.shift_remove(*last)
    }

    /// Checks a top level key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Checks whether the dot separated path resolves to a value.
    pub fn contains_field(&self, field: &str) -> bool {
        self.get_ref(field).is_some()
    }

    /// Returns the `_id` of this document when it is a string.
    pub fn id(&self) -> Option<&str> {
        self.data.get(DOC_ID).and_then(|v| v.as_str())
    }

    pub fn has_id(&self) -> bool {
        self.id().is_some()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.data.insert(DOC_ID.to_string(), Value::String(id.into()));
    }

    /// Returns every field path in this document, descending into nested
    /// documents.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        collect_fields(self, "", &mut fields);
        fields
    }

    /// Shallow merge: each top level entry of `other` overwrites the entry
    /// with the same key.
    pub fn merge(&mut self, other: &Document) {
        for (key, value) in other.data.iter() {
            self.data.insert(key.clone(), value.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.data.len());
        for (key, value) in self.data.iter() {
            map.insert(key.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Parses a JSON object into a document.
    pub fn from_json(json: serde_json::Value) -> DocStoreResult<Document> {
        match Value::from_json(json) {
            Value::Document(doc) => Ok(doc),
            other => {
                log::error!("Expected a JSON object, found {}", other.type_name());
                Err(DocStoreError::new(
                    &format!("Expected a JSON object, found {}", other.type_name()),
                    ErrorKind::EncodingError,
                ))
            }
        }
    }

    /// Serializes to compact JSON text.
    pub fn to_json_string(&self) -> DocStoreResult<String> {
        Ok(serde_json::to_string(&self.to_json())?)
    }

    pub fn from_json_str(text: &str) -> DocStoreResult<Document> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Document::from_json(json)
    }

    fn sorted_entries(&self) -> Vec<(&String, &Value)> {
        let mut entries: Vec<_> = self.data.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

fn deep_put(doc: &mut Document, segments: &[&str], value: Value, path: &str) -> DocStoreResult<()> {
    match segments {
        [] => Ok(()),
        [last] => {
            doc.data.insert(last.to_string(), value);
            Ok(())
        }
        [head, rest @ ..] => {
            let entry = doc
                .data
                .entry(head.to_string())
                .or_insert_with(|| Value::Document(Document::new()));
            if entry.is_null() {
                *entry = Value::Document(Document::new());
            }
            match entry {
                Value::Document(nested) => deep_put(nested, rest, value, path),
                _ => {
                    log::error!("Cannot put {} as {} is not a document", path, head);
                    Err(DocStoreError::new(
                        &format!("Cannot put {} as {} is not a document", path, head),
                        ErrorKind::InvalidOperation,
                    ))
                }
            }
        }
    }
}

fn collect_fields(doc: &Document, prefix: &str, fields: &mut Vec<String>) {
    for (key, value) in doc.data.iter() {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, FIELD_SEPARATOR, key)
        };
        match value {
            Value::Document(nested) if !nested.is_empty() => collect_fields(nested, &path, fields),
            _ => fields.push(path),
        }
    }
}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sorted_entries().cmp(&other.sorted_entries())
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Document {
            data: iter.into_iter().collect(),
        }
    }
}

pub fn normalize(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Creates a [Document] with JSON-like syntax.
///
/// Keys are taken literally, so `"a.b": 1` creates a top level key `a.b`,
/// which is the form criteria and `$set` patches use for nested fields.
///
/// ```rust
/// use docstore::doc;
///
/// let empty = doc!{};
/// let base = 100;
/// let person = doc!{
///     "name": "Alice",
///     "score": (base * 2),
///     "address": { "city": "Paris" },
///     "tags": ["admin", "user"],
///     "nickname": null
/// };
/// assert_eq!(person.get("address.city").as_str(), Some("Paris"));
/// ```
#[macro_export]
macro_rules! doc {
    ({}) => {
        $crate::collection::Document::new()
    };

    () => {
        $crate::collection::Document::new()
    };

    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::doc!($($key : $value),*)
    };

    ($($key:tt : $value:tt),* $(,)?) => {
        {
            let mut doc = $crate::collection::Document::new();
            $(
                doc.insert_raw($crate::collection::normalize(stringify!($key)), $crate::doc_value!($value));
            )*
            doc
        }
    };
}

/// Helper macro converting values for the [doc!] macro.
#[macro_export]
macro_rules! doc_value {
    (null) => {
        $crate::common::Value::Null
    };

    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}
