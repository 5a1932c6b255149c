//! In-memory record store
//!
//! Evaluates [`ListingQuery`] predicates and ordering directly against
//! [`Record`]s, mirroring what [`AdminStore`](crate::AdminStore) does in SQL.
//! Join tables are ordinary tables holding the two key columns.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};

use crate::error::Result;
use crate::field::{CollectionBinding, FieldOption, ParentRefBinding, RelationshipBinding, SharedBinding};
use crate::query::{ListingQuery, RecordSource, SortDirection};
use crate::record::Record;
use crate::registry::FieldRegistry;
use crate::render::relations::{ChildSummary, RelationCache, RelationLoader, distinct_keys, row_label};
use crate::sql::condition::{Predicate, compare_json};
use crate::types::ColumnType;

const DEFAULT_MAX_CHOICES: usize = 1000;

/// Tables of records keyed by table name
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    max_choices: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            max_choices: DEFAULT_MAX_CHOICES,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on dropdown choices per relationship
    pub fn with_max_choices(mut self, max_choices: usize) -> Self {
        self.max_choices = max_choices;
        self
    }

    pub fn insert(&self, table: &str, record: Record) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.entry(table.to_string()).or_default().push(record);
    }

    pub fn insert_many(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.entry(table.to_string()).or_default().extend(records);
    }

    /// Number of rows stored in `table`
    pub fn row_count(&self, table: &str) -> usize {
        self.read().get(table).map_or(0, Vec::len)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Record>>> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn matching<'t>(tables: &'t HashMap<String, Vec<Record>>, table: &str, predicate: &Predicate) -> Vec<&'t Record> {
        tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| predicate.matches(row)).collect())
            .unwrap_or_default()
    }

    fn order(query: &ListingQuery, a: &Record, b: &Record) -> Ordering {
        for term in &query.order {
            let name = term.column.name();
            let ordering = compare_json(term.column.column_type(), a.get(name), b.get(name));
            let ordering = match term.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    // =========================================================================
    // Relation Loading
    // =========================================================================

    fn parent_labels(tables: &HashMap<String, Vec<Record>>, binding: &ParentRefBinding, records: &[Record], cache: &mut RelationCache) {
        let keys = distinct_keys(records, &binding.foreign_key);
        let Some(rows) = tables.get(&binding.related) else {
            return;
        };
        for row in rows {
            let Some(key) = row.key(&binding.related_key) else {
                continue;
            };
            if keys.contains(&key) {
                let label = row_label(row, &binding.display_field, &key);
                cache.insert_parent(&binding.relationship, key, label);
            }
        }
    }

    fn children(
        tables: &HashMap<String, Vec<Record>>,
        registry: &FieldRegistry,
        binding: &CollectionBinding,
        owners: &[String],
        cache: &mut RelationCache,
    ) {
        let Some(rows) = tables.get(&binding.related) else {
            return;
        };
        let key_type = key_type(registry, &binding.related, &binding.related_key);
        for owner in owners {
            let mut owned: Vec<&Record> = rows
                .iter()
                .filter(|row| row.key(&binding.foreign_key).as_deref() == Some(owner.as_str()))
                .collect();
            if owned.is_empty() {
                continue;
            }
            owned.sort_by(|a, b| compare_json(&key_type, a.get(&binding.related_key), b.get(&binding.related_key)));
            let labels = owned
                .iter()
                .take(binding.preview_limit)
                .map(|row| {
                    let key = row.key(&binding.related_key).unwrap_or_default();
                    row_label(row, &binding.display_field, &key)
                })
                .collect();
            let summary = ChildSummary {
                count: owned.len() as i64,
                labels,
            };
            cache.insert_children(&binding.relationship, owner.clone(), summary);
        }
    }

    fn shared(tables: &HashMap<String, Vec<Record>>, binding: &SharedBinding, owners: &[String], cache: &mut RelationCache) {
        let (Some(links), Some(rows)) = (tables.get(&binding.join.table), tables.get(&binding.related)) else {
            return;
        };
        for owner in owners {
            let remote: Vec<String> = links
                .iter()
                .filter(|link| link.key(&binding.join.local_key).as_deref() == Some(owner.as_str()))
                .filter_map(|link| link.key(&binding.join.remote_key))
                .collect();
            if remote.is_empty() {
                continue;
            }
            let mut items: Vec<FieldOption> = rows
                .iter()
                .filter_map(|row| {
                    let key = row.key(&binding.related_key)?;
                    remote
                        .contains(&key)
                        .then(|| FieldOption::new(row_label(row, &binding.display_field, &key), key))
                })
                .collect();
            sort_options(&mut items);
            cache.insert_shared(&binding.relationship, owner.clone(), items);
        }
    }

    fn options(
        &self,
        tables: &HashMap<String, Vec<Record>>,
        related: &str,
        related_key: &str,
        display_field: &str,
        scope: Option<&Predicate>,
    ) -> Vec<FieldOption> {
        let mut options: Vec<FieldOption> = Self::matching(tables, related, scope.unwrap_or(&Predicate::True))
            .into_iter()
            .filter_map(|row| {
                let key = row.key(related_key)?;
                Some(FieldOption::new(row_label(row, display_field, &key), key))
            })
            .collect();
        sort_options(&mut options);
        options.truncate(self.max_choices);
        options
    }
}

fn key_type(registry: &FieldRegistry, related: &str, key: &str) -> ColumnType {
    registry
        .related_entity(related)
        .and_then(|entity| entity.column(key))
        .map(|column| column.column_type.clone())
        .unwrap_or(ColumnType::Text)
}

fn sort_options(options: &mut [FieldOption]) {
    options.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.value.cmp(&b.value)));
}

impl RecordSource for MemoryStore {
    async fn count(&self, query: &ListingQuery) -> Result<i64> {
        let tables = self.read();
        Ok(Self::matching(&tables, query.entity.name(), &query.predicate).len() as i64)
    }

    async fn fetch(&self, query: &ListingQuery) -> Result<Vec<Record>> {
        let tables = self.read();
        let mut rows = Self::matching(&tables, query.entity.name(), &query.predicate);
        rows.sort_by(|a, b| Self::order(query, a, b));
        let offset = usize::try_from(query.offset).unwrap_or(0);
        let limit = usize::try_from(query.limit).unwrap_or(0);
        Ok(rows.into_iter().skip(offset).take(limit).cloned().collect())
    }
}

impl RelationLoader for MemoryStore {
    async fn load_relations(&self, registry: &FieldRegistry, records: &[Record]) -> Result<RelationCache> {
        let tables = self.read();
        let mut cache = RelationCache::new();
        let owners = distinct_keys(records, registry.entity().primary_key());

        for binding in registry.relationship_bindings() {
            match binding {
                RelationshipBinding::ParentRef(b) => Self::parent_labels(&tables, b, records, &mut cache),
                RelationshipBinding::OwnedMany(b) | RelationshipBinding::OwnedOne(b) => {
                    Self::children(&tables, registry, b, &owners, &mut cache)
                }
                RelationshipBinding::SharedMany(b) => Self::shared(&tables, b, &owners, &mut cache),
            }
        }
        Ok(cache)
    }

    async fn load_choices(&self, registry: &FieldRegistry, cache: &mut RelationCache) -> Result<()> {
        let tables = self.read();
        for binding in registry.relationship_bindings() {
            let options = match binding {
                RelationshipBinding::ParentRef(b) => {
                    self.options(&tables, &b.related, &b.related_key, &b.display_field, b.scope.as_ref())
                }
                RelationshipBinding::SharedMany(b) => {
                    self.options(&tables, &b.related, &b.related_key, &b.display_field, None)
                }
                _ => continue,
            };
            cache.insert_choices(binding.relationship(), options);
        }
        Ok(())
    }
}
