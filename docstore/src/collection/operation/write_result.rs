/// Result of an insert.
///
/// Holds the `_id` of every inserted document, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResult {
    ids: Vec<String>,
}

impl WriteResult {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    pub fn inserted_ids(&self) -> &[String] {
        &self.ids
    }

    /// Id of the first inserted document.
    pub fn first_id(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl IntoIterator for WriteResult {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let result = WriteResult::new(vec!["a".into(), "b".into()]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.first_id(), Some("a"));
        assert_eq!(result.inserted_ids(), &["a".to_string(), "b".to_string()]);
        assert_eq!(result.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(WriteResult::default().is_empty());
    }
}
