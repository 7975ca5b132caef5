use crate::collection::Schema;
use crate::common::{Value, DEFAULT_SOFT_DELETE_FIELD};
use crate::index::{SearchableField, SearchableFields};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a collection assigns `_id` to documents inserted without one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum IdMode {
    /// Random v4 UUID.
    #[default]
    Auto,
    /// The caller must supply `_id`; inserting without one fails.
    Manual,
    /// `<prefix>-000001`, `<prefix>-000002`, ...
    Prefix { prefix: String },
}

/// Text wrapped around every generated id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdDecoration {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
}

impl IdDecoration {
    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty() && self.suffix.is_empty()
    }

    pub fn apply(&self, id: &str) -> String {
        format!("{}{}{}", self.prefix, id, self.suffix)
    }
}

/// Per-collection configuration, persisted as JSON in the metadata table.
///
/// Changes apply to subsequent operations only. Encryption keys are never
/// part of the persisted form; `encrypted` records that the collection was
/// given its own key so a reopened collection knows one must be supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub id_mode: IdMode,
    #[serde(default)]
    pub id_decoration: IdDecoration,
    #[serde(default)]
    pub searchable: SearchableFields,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default = "default_soft_delete_field")]
    pub soft_delete_field: String,
    #[serde(default)]
    pub settings: IndexMap<String, Value>,
    #[serde(default)]
    pub encrypted: bool,
}

fn default_soft_delete_field() -> String {
    DEFAULT_SOFT_DELETE_FIELD.to_string()
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            id_mode: IdMode::Auto,
            id_decoration: IdDecoration::default(),
            searchable: SearchableFields::new(),
            schema: Schema::new(),
            soft_delete: false,
            soft_delete_field: default_soft_delete_field(),
            settings: IndexMap::new(),
            encrypted: false,
        }
    }
}

impl CollectionConfig {
    /// Searchable fields as writes and the translator see them. The deletion
    /// field is always mirrored so trash filtering never reads the document
    /// blob, and so toggling soft delete never leaves a stale mirror behind.
    pub fn effective_searchable(&self) -> SearchableFields {
        let mut fields = self.searchable.clone();
        if !fields.contains_key(&self.soft_delete_field) {
            fields.insert(self.soft_delete_field.clone(), SearchableField::plain());
        }
        fields
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_str(text: &str) -> Result<CollectionConfig, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FieldRule;

    #[test]
    fn defaults() {
        let config = CollectionConfig::default();
        assert_eq!(config.id_mode, IdMode::Auto);
        assert!(!config.soft_delete);
        assert_eq!(config.soft_delete_field, "_deleted_at");
        assert_eq!(config.effective_searchable().len(), 1);
    }

    #[test]
    fn persisted_form_round_trips() {
        let mut config = CollectionConfig::default();
        config.id_mode = IdMode::Prefix { prefix: "USR".into() };
        config.id_decoration.suffix = "-x".into();
        config.searchable.insert("email".into(), SearchableField::hashed());
        config.schema = Schema::new().field("name", FieldRule::new().required());
        config.soft_delete = true;
        config.settings.insert("owner".into(), Value::from("ops"));

        let json = config.to_json_string().unwrap();
        assert!(json.contains(r#""id_mode":{"mode":"prefix","prefix":"USR"}"#));
        assert_eq!(CollectionConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = CollectionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CollectionConfig::default());
    }

    #[test]
    fn soft_delete_field_is_mirrored() {
        let mut config = CollectionConfig::default();
        config.searchable.insert("email".into(), SearchableField::hashed());
        let fields = config.effective_searchable();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("_deleted_at"), Some(&SearchableField::plain()));
    }

    #[test]
    fn decoration() {
        let decoration = IdDecoration {
            prefix: "a_".into(),
            suffix: "_z".into(),
        };
        assert_eq!(decoration.apply("1"), "a_1_z");
        assert!(IdDecoration::default().is_empty());
    }
}
