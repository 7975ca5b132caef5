use crate::collection::Document;
use crate::common::DOC_ID;
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};

/// Field selection applied to every document a cursor yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Keep only these dot paths, plus `_id` unless `keep_id` is false.
    Include { fields: Vec<String>, keep_id: bool },
    /// Drop these dot paths.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<S: AsRef<str>>(fields: &[S]) -> Projection {
        Projection::Include {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            keep_id: true,
        }
    }

    pub fn exclude<S: AsRef<str>>(fields: &[S]) -> Projection {
        Projection::Exclude(fields.iter().map(|f| f.as_ref().to_string()).collect())
    }

    /// Reads a `{field: 1, other: 0}` style projection document.
    ///
    /// Truthy values include, falsy values exclude; the two cannot be mixed
    /// except for `_id`, which may be excluded from an inclusive projection.
    pub fn from_document(document: &Document) -> DocStoreResult<Projection> {
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut keep_id = true;
        for (field, flag) in document.iter() {
            if flag.is_truthy() {
                included.push(field.clone());
            } else if field == DOC_ID {
                keep_id = false;
                excluded.push(field.clone());
            } else {
                excluded.push(field.clone());
            }
        }

        if included.is_empty() {
            return Ok(Projection::Exclude(excluded));
        }
        if excluded.iter().any(|f| f != DOC_ID) {
            log::error!("Projection cannot mix included and excluded fields: {}", document);
            return Err(DocStoreError::new(
                "Projection cannot mix included and excluded fields",
                ErrorKind::PredicateError,
            ));
        }
        Ok(Projection::Include {
            fields: included,
            keep_id,
        })
    }

    pub fn apply(&self, document: Document) -> Document {
        match self {
            Projection::Include { fields, keep_id } => {
                let mut projected = Document::new();
                if *keep_id {
                    if let Some(id) = document.get_ref(DOC_ID) {
                        projected.insert_raw(DOC_ID, id.clone());
                    }
                }
                for field in fields {
                    if let Some(value) = document.get_ref(field) {
                        if let Err(err) = projected.put(field, value.clone()) {
                            log::warn!("Skipping projected field {}: {}", field, err);
                        }
                    }
                }
                projected
            }
            Projection::Exclude(fields) => {
                let mut projected = document;
                for field in fields {
                    projected.remove(field);
                }
                projected
            }
        }
    }
}
