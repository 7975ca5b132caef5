use crate::collection::{IdDecoration, IdMode};
use crate::common::{PREFIX_ID_SEPARATOR, PREFIX_ID_WIDTH};
use crate::errors::{DocStoreError, DocStoreResult, ErrorKind};
use parking_lot::Mutex;
use uuid::Uuid;

/// Generates `_id` values for a collection.
///
/// In prefix mode the generator keeps the last issued number in memory. The
/// first id issued after opening (or after the prefix changes) is seeded from
/// the highest existing id that carries the same prefix and decoration, so
/// numbering continues across restarts.
#[derive(Default)]
pub struct IdGenerator {
    counter: Mutex<Option<PrefixCounter>>,
}

struct PrefixCounter {
    head: String,
    tail: String,
    last: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next id, or `None` in manual mode.
    ///
    /// `existing` is only called when the prefix counter needs seeding. It is
    /// given the fixed head of generated ids and returns every stored id
    /// starting with it.
    pub fn next_id<F>(&self, mode: &IdMode, decoration: &IdDecoration, existing: F) -> DocStoreResult<Option<String>>
    where
        F: FnOnce(&str) -> DocStoreResult<Vec<String>>,
    {
        match mode {
            IdMode::Manual => Ok(None),
            IdMode::Auto => Ok(Some(decoration.apply(&Uuid::new_v4().to_string()))),
            IdMode::Prefix { prefix } => {
                if prefix.is_empty() {
                    log::error!("Prefix id mode requires a non-empty prefix");
                    return Err(DocStoreError::new(
                        "Prefix id mode requires a non-empty prefix",
                        ErrorKind::InvalidOperation,
                    ));
                }
                let head = format!("{}{}{}", decoration.prefix, prefix, PREFIX_ID_SEPARATOR);
                let tail = decoration.suffix.clone();

                let mut counter = self.counter.lock();
                let stale = match counter.as_ref() {
                    Some(current) => current.head != head || current.tail != tail,
                    None => true,
                };
                if stale {
                    let ids = existing(&head)?;
                    let last = highest_number(&ids, &head, &tail);
                    log::debug!("Seeded id counter for {} at {}", head, last);
                    *counter = Some(PrefixCounter { head, tail, last });
                }

                match counter.as_mut() {
                    Some(current) => {
                        current.last += 1;
                        Ok(Some(format!(
                            "{}{:0width$}{}",
                            current.head,
                            current.last,
                            current.tail,
                            width = PREFIX_ID_WIDTH
                        )))
                    }
                    None => Err(DocStoreError::new("Id counter not seeded", ErrorKind::InternalError)),
                }
            }
        }
    }

    /// Forgets the counter so the next prefix id is seeded again.
    pub fn reset(&self) {
        *self.counter.lock() = None;
    }
}

fn highest_number(ids: &[String], head: &str, tail: &str) -> u64 {
    ids.iter()
        .filter_map(|id| id.strip_prefix(head))
        .filter_map(|rest| rest.strip_suffix(tail))
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|digits| digits.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}
