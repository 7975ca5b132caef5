use crate::collection::Document;
use crate::common::{sha256_hex, Value, SEARCH_COLUMN_PREFIX, SEARCH_VALUE_SEPARATOR};
use crate::filter::scalar_text;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Options of one searchable field.
///
/// A searchable field gets a mirror column holding its lower-cased value, or
/// the SHA-256 digest of that when `hash` is set. Mirrors let equality and
/// range criteria run as SQL even when the document blob is encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchableField {
    #[serde(default)]
    pub hash: bool,
}

impl SearchableField {
    pub fn plain() -> Self {
        SearchableField { hash: false }
    }

    pub fn hashed() -> Self {
        SearchableField { hash: true }
    }
}

/// Searchable fields keyed by dot path, in declaration order.
pub type SearchableFields = IndexMap<String, SearchableField>;

/// Name of the mirror column for a field path.
///
/// Characters other than ASCII alphanumerics and `_` become `_`, so
/// `address.city` maps to `_s_address_city`.
pub fn search_column(field: &str) -> String {
    let sanitized: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("{}{}", SEARCH_COLUMN_PREFIX, sanitized)
}

/// First pair of distinct fields sharing a mirror column, such as `a.b` and
/// `a_b`.
pub fn column_collision(fields: &SearchableFields) -> Option<(&str, &str)> {
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(fields.len());
    for field in fields.keys() {
        if let Some(previous) = seen.insert(search_column(field), field) {
            return Some((previous, field));
        }
    }
    None
}

/// Mirror text of a value, before hashing. `None` for null.
///
/// Strings and numbers use their text form, bools `true`/`false`, arrays
/// join their elements with `,` and documents use their JSON text. The result
/// is lower-cased.
pub fn mirror_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::Bool(flag) => flag.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(mirror_text)
            .collect::<Vec<_>>()
            .join(SEARCH_VALUE_SEPARATOR),
        Value::Document(doc) => doc.to_json().to_string(),
        scalar => scalar_text(scalar).unwrap_or_default(),
    };
    Some(text.to_lowercase())
}

/// Value stored in (or compared against) a mirror column.
pub fn mirror_value(value: &Value, options: &SearchableField) -> Option<String> {
    let text = mirror_text(value)?;
    if options.hash {
        Some(sha256_hex(&text))
    } else {
        Some(text)
    }
}

/// Computes `(column, value)` for every searchable field of a document.
/// Missing fields produce a `NULL` mirror.
pub fn compute_mirrors(document: &Document, fields: &SearchableFields) -> Vec<(String, Option<String>)> {
    fields
        .iter()
        .map(|(field, options)| {
            let value = document.get_ref(field).unwrap_or(&Value::Null);
            (search_column(field), mirror_value(value, options))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn column_names_are_sanitized() {
        assert_eq!(search_column("email"), "_s_email");
        assert_eq!(search_column("address.city"), "_s_address_city");
        assert_eq!(search_column("odd-name!"), "_s_odd_name_");
    }

    #[test]
    fn colliding_columns_are_found() {
        let mut fields = SearchableFields::new();
        fields.insert("a.b".into(), SearchableField::plain());
        fields.insert("email".into(), SearchableField::hashed());
        assert_eq!(column_collision(&fields), None);
        fields.insert("a_b".into(), SearchableField::plain());
        assert_eq!(column_collision(&fields), Some(("a.b", "a_b")));
    }

    #[test]
    fn mirror_text_normalizes() {
        assert_eq!(mirror_text(&Value::from("Ann@Example.COM")), Some("ann@example.com".into()));
        assert_eq!(mirror_text(&Value::from(42)), Some("42".into()));
        assert_eq!(mirror_text(&Value::Bool(true)), Some("true".into()));
        assert_eq!(mirror_text(&Value::from(vec!["A", "b"])), Some("a,b".into()));
        assert_eq!(mirror_text(&Value::Null), None);
    }

    #[test]
    fn hashed_mirror_never_holds_plaintext() {
        let value = Value::from("Secret@Mail.com");
        let mirror = mirror_value(&value, &SearchableField::hashed()).unwrap();
        assert_ne!(mirror, "secret@mail.com");
        assert_eq!(mirror, sha256_hex("secret@mail.com"));
        assert_eq!(mirror.len(), 64);
    }

    #[test]
    fn compute_for_document() {
        let mut fields = SearchableFields::new();
        fields.insert("email".into(), SearchableField::hashed());
        fields.insert("address.city".into(), SearchableField::plain());
        fields.insert("phone".into(), SearchableField::plain());

        let doc = doc! { "email": "A@B.c", "address": { "city": "Paris" } };
        let mirrors = compute_mirrors(&doc, &fields);
        assert_eq!(mirrors[0], ("_s_email".to_string(), Some(sha256_hex("a@b.c"))));
        assert_eq!(mirrors[1], ("_s_address_city".to_string(), Some("paris".to_string())));
        assert_eq!(mirrors[2], ("_s_phone".to_string(), None));
    }
}
