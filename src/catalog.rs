//! Schema reflection
//!
//! A [`SchemaReflector`] hands out immutable [`EntityType`]s. [`StaticCatalog`]
//! holds entities declared in code; [`PgCatalog`] introspects a PostgreSQL
//! schema once at startup and infers relationships from its foreign keys.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{AdminError, Result};
use crate::schema::{EntityType, JoinTable, Relationship, RelationshipKind};
use crate::types::{ColumnDefinition, ColumnType};

/// Source of entity type descriptions
///
/// Implementations must be deterministic and free of side effects; lookups
/// happen at registration time, never per request.
pub trait SchemaReflector: Send + Sync {
    /// Look up an entity type; an unknown name is a configuration error
    fn entity(&self, name: &str) -> Result<Arc<EntityType>>;

    fn columns(&self, name: &str) -> Result<Vec<ColumnDefinition>> {
        Ok(self.entity(name)?.columns().to_vec())
    }

    fn relationships(&self, name: &str) -> Result<Vec<Relationship>> {
        Ok(self.entity(name)?.relationships().to_vec())
    }
}

// ============================================================================
// Static Catalog
// ============================================================================

/// Entities declared in code
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entities: BTreeMap<String, Arc<EntityType>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, builder style
    pub fn with_entity(mut self, entity: EntityType) -> Self {
        self.insert(entity);
        self
    }

    /// Add or replace an entity
    pub fn insert(&mut self, entity: EntityType) {
        self.entities
            .insert(entity.name().to_string(), Arc::new(entity));
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check that every relationship targets a known entity with the expected key columns
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            for rel in entity.relationships() {
                let related = self.entities.get(&rel.related).ok_or_else(|| {
                    AdminError::unknown_entity(format!(
                        "{} (target of relationship '{}' on '{}')",
                        rel.related,
                        rel.name,
                        entity.name()
                    ))
                })?;

                match &rel.kind {
                    RelationshipKind::ParentRef { .. } => {}
                    RelationshipKind::OwnedMany { foreign_key }
                    | RelationshipKind::OwnedOne { foreign_key } => {
                        if !related.has_column(foreign_key) {
                            return Err(AdminError::configuration(format!(
                                "Relationship '{}' on '{}' expects column '{}' on '{}'",
                                rel.name,
                                entity.name(),
                                foreign_key,
                                related.name()
                            )));
                        }
                    }
                    RelationshipKind::SharedMany { join } => {
                        if let Some(table) = self.entities.get(&join.table) {
                            for key in [&join.local_key, &join.remote_key] {
                                if !table.has_column(key) {
                                    return Err(AdminError::configuration(format!(
                                        "Join table '{}' has no column '{}'",
                                        join.table, key
                                    )));
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl SchemaReflector for StaticCatalog {
    fn entity(&self, name: &str) -> Result<Arc<EntityType>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| AdminError::unknown_entity(name))
    }
}

// ============================================================================
// PostgreSQL Catalog
// ============================================================================

/// Table description read from `information_schema`
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

/// Single-column foreign key read from `information_schema`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub table: String,
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
}

/// Entities introspected from one PostgreSQL schema
#[derive(Debug, Clone)]
pub struct PgCatalog {
    schema: String,
    catalog: StaticCatalog,
}

impl PgCatalog {
    /// Introspect `schema` with the default audit-column rule
    pub async fn load(pool: &PgPool, schema: &str) -> Result<Self> {
        Self::load_with_config(pool, schema, &EngineConfig::default()).await
    }

    /// Introspect `schema`, using `config` to recognise audit columns in join tables
    pub async fn load_with_config(pool: &PgPool, schema: &str, config: &EngineConfig) -> Result<Self> {
        let column_rows = sqlx::query(
            r#"
            SELECT table_name::text AS table_name, column_name::text AS column_name,
                   data_type::text AS data_type, is_nullable::text AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = $1
            ORDER BY table_name, ordinal_position
            "#,
        )
        .bind(schema)
        .fetch_all(pool)
        .await?;

        let key_rows = sqlx::query(
            r#"
            SELECT tc.table_name::text AS table_name, kcu.column_name::text AS column_name,
                   tc.constraint_type::text AS constraint_type,
                   COUNT(*) OVER (PARTITION BY tc.constraint_name) AS width
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            WHERE tc.table_schema = $1
              AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
            ORDER BY tc.table_name, kcu.ordinal_position
            "#,
        )
        .bind(schema)
        .fetch_all(pool)
        .await?;

        let fk_rows = sqlx::query(
            r#"
            SELECT kcu.table_name::text AS table_name, kcu.column_name::text AS column_name,
                   ccu.table_name::text AS foreign_table, ccu.column_name::text AS foreign_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1
            ORDER BY kcu.table_name, kcu.ordinal_position
            "#,
        )
        .bind(schema)
        .fetch_all(pool)
        .await?;

        let mut primary_keys: HashMap<String, Vec<String>> = HashMap::new();
        let mut unique_columns: HashSet<(String, String)> = HashSet::new();
        for row in &key_rows {
            let table: String = row.try_get("table_name")?;
            let column: String = row.try_get("column_name")?;
            let constraint: String = row.try_get("constraint_type")?;
            let width: i64 = row.try_get("width")?;
            if constraint == "PRIMARY KEY" {
                primary_keys.entry(table).or_default().push(column);
            } else if width == 1 {
                unique_columns.insert((table, column));
            }
        }

        let mut tables: Vec<TableInfo> = Vec::new();
        for row in &column_rows {
            let table: String = row.try_get("table_name")?;
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            let is_nullable: String = row.try_get("is_nullable")?;

            let mut column = ColumnDefinition::new(name, ColumnType::from_pg(&data_type));
            column.nullable = is_nullable == "YES";
            column.unique = unique_columns.contains(&(table.clone(), column.name.clone()));

            match tables.last_mut() {
                Some(info) if info.name == table => info.columns.push(column),
                _ => tables.push(TableInfo {
                    primary_key: primary_keys.get(&table).cloned().unwrap_or_default(),
                    name: table,
                    columns: vec![column],
                }),
            }
        }

        let mut foreign_keys = Vec::with_capacity(fk_rows.len());
        for row in &fk_rows {
            foreign_keys.push(ForeignKeyInfo {
                table: row.try_get("table_name")?,
                column: row.try_get("column_name")?,
                foreign_table: row.try_get("foreign_table")?,
                foreign_column: row.try_get("foreign_column")?,
            });
        }

        let catalog = infer_catalog(&tables, &foreign_keys, config);
        debug!(schema, entities = catalog.len(), "Introspected schema");

        Ok(Self {
            schema: schema.to_string(),
            catalog,
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn catalog(&self) -> &StaticCatalog {
        &self.catalog
    }
}

impl SchemaReflector for PgCatalog {
    fn entity(&self, name: &str) -> Result<Arc<EntityType>> {
        self.catalog.entity(name)
    }
}

/// Build entities and infer relationships from introspected tables
///
/// - a foreign key on `T` is a parent reference on `T` and an owned collection
///   (or owned single row, when the key column is unique) on the referenced table
/// - a table whose only non-key columns are audit columns and which holds exactly
///   two foreign keys is a join table: both referenced tables get a shared relationship
///   and the join table itself is not an entity
///
/// Tables without a single-column primary key, or with identifiers that cannot be
/// quoted safely, are skipped.
pub fn infer_catalog(
    tables: &[TableInfo],
    foreign_keys: &[ForeignKeyInfo],
    config: &EngineConfig,
) -> StaticCatalog {
    let by_name: HashMap<&str, &TableInfo> = tables.iter().map(|t| (t.name.as_str(), t)).collect();
    let single_pk = |table: &str| single_primary_key(&by_name, table);

    // only keys that reference the target's primary key describe relationships
    let usable: Vec<&ForeignKeyInfo> = foreign_keys
        .iter()
        .filter(|fk| single_pk(&fk.foreign_table) == Some(fk.foreign_column.as_str()))
        .collect();

    let join_tables: HashSet<&str> = tables
        .iter()
        .filter(|t| is_join_table(t, &usable, config))
        .map(|t| t.name.as_str())
        .collect();

    let mut relationships: BTreeMap<&str, Vec<Relationship>> = BTreeMap::new();

    for table in tables {
        if join_tables.contains(table.name.as_str()) || single_pk(&table.name).is_none() {
            continue;
        }
        for fk in usable.iter().filter(|fk| fk.table == table.name) {
            let name = fk
                .column
                .strip_suffix("_id")
                .filter(|n| !n.is_empty())
                .unwrap_or(fk.column.as_str());
            let rels = relationships.entry(table.name.as_str()).or_default();
            if !rels.iter().any(|r| r.name == name) {
                rels.push(Relationship::parent_ref(name, &fk.foreign_table, &fk.column));
            }
        }
    }

    for fk in &usable {
        let Some(parent) = by_name.get(fk.foreign_table.as_str()) else {
            continue;
        };
        if join_tables.contains(fk.table.as_str()) || single_pk(&fk.table).is_none() {
            continue;
        }
        let unique = by_name
            .get(fk.table.as_str())
            .and_then(|t| t.columns.iter().find(|c| c.name == fk.column))
            .is_some_and(|c| c.unique);

        let base = if unique {
            fk.table
                .strip_suffix('s')
                .filter(|n| !n.is_empty())
                .unwrap_or(fk.table.as_str())
                .to_string()
        } else {
            fk.table.clone()
        };
        let rels = relationships.entry(parent.name.as_str()).or_default();
        let name = if name_taken(rels, parent, &base) {
            let suffix = fk.column.strip_suffix("_id").unwrap_or(fk.column.as_str());
            format!("{}_{}", base, suffix)
        } else {
            base
        };
        if name_taken(rels, parent, &name) {
            debug!(table = %fk.table, column = %fk.column, "Skipping ambiguous owned relationship");
            continue;
        }

        rels.push(if unique {
            Relationship::owned_one(name, &fk.table, &fk.column)
        } else {
            Relationship::owned_many(name, &fk.table, &fk.column)
        });
    }

    for join in tables.iter().filter(|t| join_tables.contains(t.name.as_str())) {
        let keys: Vec<&&ForeignKeyInfo> = usable.iter().filter(|fk| fk.table == join.name).collect();
        let [left, right] = keys.as_slice() else {
            continue;
        };
        for (local, remote) in [(left, right), (right, left)] {
            let Some(owner) = by_name.get(local.foreign_table.as_str()) else {
                continue;
            };
            let rels = relationships.entry(owner.name.as_str()).or_default();
            let name = if name_taken(rels, owner, &remote.foreign_table) {
                join.name.clone()
            } else {
                remote.foreign_table.clone()
            };
            if name_taken(rels, owner, &name) {
                continue;
            }
            rels.push(Relationship::shared_many(
                name,
                &remote.foreign_table,
                JoinTable::new(&join.name, &local.column, &remote.column),
            ));
        }
    }

    let mut catalog = StaticCatalog::new();
    for table in tables {
        if join_tables.contains(table.name.as_str()) {
            continue;
        }
        let Some(pk) = single_pk(&table.name) else {
            debug!(table = %table.name, "Skipping table without a single-column primary key");
            continue;
        };

        let mut builder = EntityType::builder(&table.name)
            .primary_key(pk)
            .columns(table.columns.iter().cloned());
        for rel in relationships.remove(table.name.as_str()).unwrap_or_default() {
            builder = builder.relationship(rel);
        }

        match builder.build() {
            Ok(entity) => catalog.insert(entity),
            Err(e) => debug!(table = %table.name, error = %e, "Skipping table"),
        }
    }

    catalog
}

fn single_primary_key<'a>(by_name: &HashMap<&str, &'a TableInfo>, table: &str) -> Option<&'a str> {
    by_name
        .get(table)
        .copied()
        .and_then(|t| match t.primary_key.as_slice() {
            [pk] => Some(pk.as_str()),
            _ => None,
        })
}

fn name_taken(rels: &[Relationship], table: &TableInfo, name: &str) -> bool {
    rels.iter().any(|r| r.name == name) || table.columns.iter().any(|c| c.name == name)
}

fn is_join_table(table: &TableInfo, foreign_keys: &[&ForeignKeyInfo], config: &EngineConfig) -> bool {
    let keys: Vec<&str> = foreign_keys
        .iter()
        .filter(|fk| fk.table == table.name)
        .map(|fk| fk.column.as_str())
        .collect();
    if keys.len() != 2 || keys[0] == keys[1] {
        return false;
    }

    table.columns.iter().all(|c| {
        keys.contains(&c.name.as_str())
            || table.primary_key.contains(&c.name)
            || config.is_audit_column(&c.name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, pk: &[&str], columns: Vec<ColumnDefinition>) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            columns,
            primary_key: pk.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn fk(table: &str, column: &str, foreign_table: &str) -> ForeignKeyInfo {
        ForeignKeyInfo {
            table: table.to_string(),
            column: column.to_string(),
            foreign_table: foreign_table.to_string(),
            foreign_column: "id".to_string(),
        }
    }

    fn int(name: &str) -> ColumnDefinition {
        ColumnDefinition::new(name, ColumnType::Integer)
    }

    fn library() -> StaticCatalog {
        let tables = vec![
            table("authors", &["id"], vec![int("id"), ColumnDefinition::new("bio", ColumnType::Text)]),
            table(
                "books",
                &["id"],
                vec![
                    int("id"),
                    ColumnDefinition::new("title", ColumnType::String),
                    int("author_id"),
                ],
            ),
            table("tags", &["id"], vec![int("id"), ColumnDefinition::new("name", ColumnType::String)]),
            table(
                "book_tags",
                &["book_id", "tag_id"],
                vec![
                    int("book_id"),
                    int("tag_id"),
                    ColumnDefinition::new("created_at", ColumnType::Timestamp),
                ],
            ),
            table("profiles", &["id"], vec![int("id"), int("author_id").unique()]),
        ];
        let fks = vec![
            fk("books", "author_id", "authors"),
            fk("book_tags", "book_id", "books"),
            fk("book_tags", "tag_id", "tags"),
            fk("profiles", "author_id", "authors"),
        ];
        infer_catalog(&tables, &fks, &EngineConfig::default())
    }

    // =========================================================================
    // StaticCatalog Tests
    // =========================================================================

    #[test]
    fn test_unknown_entity_is_error() {
        let catalog = StaticCatalog::new();
        let err = catalog.entity("books").unwrap_err();
        assert!(matches!(err, AdminError::UnknownEntity(_)));
    }

    #[test]
    fn test_validate_detects_missing_target() {
        let catalog = StaticCatalog::new().with_entity(
            EntityType::builder("books")
                .column(int("id"))
                .column(int("author_id"))
                .relationship(Relationship::parent_ref("author", "authors", "author_id"))
                .build()
                .unwrap(),
        );
        assert!(matches!(catalog.validate(), Err(AdminError::UnknownEntity(_))));
    }

    #[test]
    fn test_validate_checks_owned_foreign_key() {
        let catalog = StaticCatalog::new()
            .with_entity(
                EntityType::builder("authors")
                    .column(int("id"))
                    .relationship(Relationship::owned_many("books", "books", "writer_id"))
                    .build()
                    .unwrap(),
            )
            .with_entity(EntityType::builder("books").column(int("id")).build().unwrap());
        assert!(matches!(catalog.validate(), Err(AdminError::Configuration(_))));
    }

    #[test]
    fn test_default_trait_methods() {
        let catalog = library();
        assert_eq!(catalog.columns("books").unwrap().len(), 3);
        assert!(!catalog.relationships("books").unwrap().is_empty());
    }

    // =========================================================================
    // Inference Tests
    // =========================================================================

    #[test]
    fn test_infer_parent_and_owned() {
        let catalog = library();
        let books = catalog.entity("books").unwrap();
        let author = books.relationship("author").unwrap();
        assert_eq!(author.related, "authors");
        assert_eq!(
            author.kind,
            RelationshipKind::ParentRef {
                foreign_key: "author_id".to_string()
            }
        );

        let authors = catalog.entity("authors").unwrap();
        let owned = authors.relationship("books").unwrap();
        assert!(matches!(owned.kind, RelationshipKind::OwnedMany { .. }));
    }

    #[test]
    fn test_infer_owned_one_for_unique_key() {
        let authors = library().entity("authors").unwrap();
        let profile = authors.relationship("profile").unwrap();
        assert_eq!(profile.related, "profiles");
        assert!(matches!(profile.kind, RelationshipKind::OwnedOne { .. }));
    }

    #[test]
    fn test_infer_join_table() {
        let catalog = library();
        assert!(catalog.entity("book_tags").is_err());

        let books = catalog.entity("books").unwrap();
        let tags = books.relationship("tags").unwrap();
        assert_eq!(
            tags.kind,
            RelationshipKind::SharedMany {
                join: JoinTable::new("book_tags", "book_id", "tag_id")
            }
        );
        assert!(books.relationship("book_tags").is_none());

        let tag_entity = catalog.entity("tags").unwrap();
        assert!(tag_entity.relationship("books").is_some());
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_infer_disambiguates_repeated_owner() {
        let tables = vec![
            table("people", &["id"], vec![int("id")]),
            table("books", &["id"], vec![int("id"), int("author_id"), int("editor_id")]),
        ];
        let fks = vec![
            fk("books", "author_id", "people"),
            fk("books", "editor_id", "people"),
        ];
        let catalog = infer_catalog(&tables, &fks, &EngineConfig::default());
        let people = catalog.entity("people").unwrap();
        assert!(people.relationship("books").is_some());
        assert!(people.relationship("books_editor").is_some());
    }

    #[test]
    fn test_infer_skips_tables_without_primary_key() {
        let tables = vec![table("events", &[], vec![int("id")])];
        let catalog = infer_catalog(&tables, &[], &EngineConfig::default());
        assert!(catalog.is_empty());
    }
}
