//! Related-row data consumed by the renderer
//!
//! Rendering is synchronous. Everything a page of records needs from related
//! entities is loaded up front by a [`RelationLoader`] into a [`RelationCache`].

use std::collections::HashMap;
use std::future::Future;

use serde::Serialize;

use crate::error::Result;
use crate::field::FieldOption;
use crate::record::{Record, key_text};
use crate::registry::FieldRegistry;

/// Count and label preview of an owned collection for one owner row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChildSummary {
    pub count: i64,
    /// At most the binding's preview limit, in related primary-key order
    pub labels: Vec<String>,
}

/// Lookup of related-row data by relationship name
pub trait RelationSource {
    /// Label of the parent row whose key is `key`; `None` if it does not exist
    fn parent_label(&self, relationship: &str, key: &str) -> Option<&str>;

    /// Owned rows of `owner`; `None` means the owner has none
    fn children(&self, relationship: &str, owner: &str) -> Option<&ChildSummary>;

    /// Rows associated with `owner` through a join table
    fn shared(&self, relationship: &str, owner: &str) -> Option<&[FieldOption]>;

    /// Candidate rows for a dropdown
    fn choices(&self, relationship: &str) -> Option<&[FieldOption]>;
}

/// In-memory [`RelationSource`] filled by a loader
#[derive(Debug, Clone, Default)]
pub struct RelationCache {
    parents: HashMap<String, HashMap<String, String>>,
    children: HashMap<String, HashMap<String, ChildSummary>>,
    shared: HashMap<String, HashMap<String, Vec<FieldOption>>>,
    choices: HashMap<String, Vec<FieldOption>>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_parent(&mut self, relationship: &str, key: impl Into<String>, label: impl Into<String>) {
        self.parents
            .entry(relationship.to_string())
            .or_default()
            .insert(key.into(), label.into());
    }

    pub fn insert_children(&mut self, relationship: &str, owner: impl Into<String>, summary: ChildSummary) {
        self.children
            .entry(relationship.to_string())
            .or_default()
            .insert(owner.into(), summary);
    }

    pub fn insert_shared(&mut self, relationship: &str, owner: impl Into<String>, items: Vec<FieldOption>) {
        self.shared
            .entry(relationship.to_string())
            .or_default()
            .insert(owner.into(), items);
    }

    pub fn insert_choices(&mut self, relationship: &str, options: Vec<FieldOption>) {
        self.choices.insert(relationship.to_string(), options);
    }
}

impl RelationSource for RelationCache {
    fn parent_label(&self, relationship: &str, key: &str) -> Option<&str> {
        self.parents.get(relationship)?.get(key).map(String::as_str)
    }

    fn children(&self, relationship: &str, owner: &str) -> Option<&ChildSummary> {
        self.children.get(relationship)?.get(owner)
    }

    fn shared(&self, relationship: &str, owner: &str) -> Option<&[FieldOption]> {
        self.shared
            .get(relationship)?
            .get(owner)
            .map(Vec::as_slice)
    }

    fn choices(&self, relationship: &str) -> Option<&[FieldOption]> {
        self.choices.get(relationship).map(Vec::as_slice)
    }
}

/// Store that batch-loads related rows for a page of records
pub trait RelationLoader: Send + Sync {
    /// Parent labels, owned-collection summaries and shared associations for `records`
    fn load_relations(
        &self,
        registry: &FieldRegistry,
        records: &[Record],
    ) -> impl Future<Output = Result<RelationCache>> + Send;

    /// Dropdown choices for every parent reference and shared collection
    fn load_choices(
        &self,
        registry: &FieldRegistry,
        cache: &mut RelationCache,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Label of a related row, falling back to `#key` when the label column is NULL
pub(crate) fn row_label(row: &Record, display_field: &str, key: &str) -> String {
    row.get(display_field)
        .and_then(key_text)
        .unwrap_or_else(|| format!("#{}", key))
}

/// Distinct non-null key values of `field` across `records`, in first-seen order
pub(crate) fn distinct_keys(records: &[Record], field: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in records.iter().filter_map(|r| r.key(field)) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}
