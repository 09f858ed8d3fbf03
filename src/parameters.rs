//! The append-only parameter set of one pipeline run.

use crate::{error::Result, PipelineError};
use std::collections::{BTreeMap, BTreeSet};

/// Resolved parameters of a pipeline run.
///
/// A name is written at most once. Templates read a snapshot of the set
/// taken when they start; only the executor commits new values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: BTreeMap<String, String>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a value. Writing a name twice is an internal error.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.values.contains_key(&name) {
            return Err(PipelineError::Unexpected(format!(
                "Parameter {{{}}} is already defined and cannot be overwritten",
                name
            )));
        }
        self.values.insert(name, value.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Names of all resolved parameters.
    pub fn names(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    /// A copy of the current values, handed to a starting template.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    /// Keep only the named parameters.
    pub fn retain_names(&mut self, keep: &BTreeSet<String>) {
        self.values.retain(|name, _| keep.contains(name));
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.values
    }
}

impl FromIterator<(String, String)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut params = ParameterSet::new();
        params.insert("name", "Alice").unwrap();
        assert_eq!(params.get("name"), Some("Alice"));
        assert!(params.contains("name"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_overwrite_is_rejected() {
        let mut params = ParameterSet::new();
        params.insert("x", "1").unwrap();
        let err = params.insert("x", "2").unwrap_err();
        assert!(err.is_unexpected());
        assert_eq!(params.get("x"), Some("1"));
    }

    #[test]
    fn test_retain_names() {
        let mut params: ParameterSet = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        params.retain_names(&BTreeSet::from(["b".to_string()]));
        assert_eq!(params.names(), BTreeSet::from(["b".to_string()]));
    }
}
