//! Entity types and their relationships
//!
//! An [`EntityType`] is the introspected description of one table: its
//! columns, computed attributes and relationships. It is immutable once built
//! and is the only source of [`ColumnRef`]s, so any identifier that reaches SQL
//! text has been checked against the entity's own column set.

use crate::error::{AdminError, Result};
use crate::sql::sanitize::{quote_identifier, validate_identifier};
use crate::types::{ColumnDefinition, ColumnType};

// ============================================================================
// Relationships
// ============================================================================

/// Association table backing a shared (many-to-many) relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    /// Association table name
    pub table: String,
    /// Column referencing this entity's primary key
    pub local_key: String,
    /// Column referencing the related entity's primary key
    pub remote_key: String,
}

impl JoinTable {
    pub fn new(
        table: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_key: local_key.into(),
            remote_key: remote_key.into(),
        }
    }
}

/// How two entity types are related
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipKind {
    /// This entity holds `foreign_key`, referencing the related primary key
    ParentRef { foreign_key: String },
    /// The related entity holds `foreign_key`, referencing this primary key
    OwnedMany { foreign_key: String },
    /// As `OwnedMany`, with at most one related row
    OwnedOne { foreign_key: String },
    /// Rows are associated through a join table
    SharedMany { join: JoinTable },
}

/// A declared relationship from one entity type to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship name, also the virtual field name for non-parent kinds
    pub name: String,
    /// Human readable name
    pub label: String,
    /// Related entity name
    pub related: String,
    pub kind: RelationshipKind,
}

impl Relationship {
    fn new(name: impl Into<String>, related: impl Into<String>, kind: RelationshipKind) -> Self {
        let name = name.into();
        Self {
            label: humanize(&name),
            name,
            related: related.into(),
            kind,
        }
    }

    /// To-one reference held by this entity in `foreign_key`
    pub fn parent_ref(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            related,
            RelationshipKind::ParentRef {
                foreign_key: foreign_key.into(),
            },
        )
    }

    /// To-many collection whose rows reference this entity through `foreign_key`
    pub fn owned_many(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            related,
            RelationshipKind::OwnedMany {
                foreign_key: foreign_key.into(),
            },
        )
    }

    /// To-one owned row referencing this entity through `foreign_key`
    pub fn owned_one(
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            related,
            RelationshipKind::OwnedOne {
                foreign_key: foreign_key.into(),
            },
        )
    }

    /// Many-to-many association through `join`
    pub fn shared_many(name: impl Into<String>, related: impl Into<String>, join: JoinTable) -> Self {
        Self::new(name, related, RelationshipKind::SharedMany { join })
    }

    /// Override the human readable name
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Name of the field this relationship is configured under
    ///
    /// Parent references live on their foreign-key column; every other kind is a
    /// virtual field named after the relationship.
    pub fn field_name(&self) -> &str {
        match &self.kind {
            RelationshipKind::ParentRef { foreign_key } => foreign_key,
            _ => &self.name,
        }
    }

    pub fn is_parent_ref(&self) -> bool {
        matches!(self.kind, RelationshipKind::ParentRef { .. })
    }
}

// ============================================================================
// Computed Attributes
// ============================================================================

/// A read-only attribute computed by a SQL expression over the entity's row
///
/// The expression is supplied by integrator code, never by request input.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedAttribute {
    pub name: String,
    pub sql: String,
    pub column_type: ColumnType,
}

impl ComputedAttribute {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            column_type,
        }
    }
}

// ============================================================================
// Column References
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum ColumnExpr {
    Column,
    Computed(String),
}

/// A column or computed attribute known to belong to an entity
///
/// Only [`EntityType::column_ref`], [`EntityType::sortable_ref`] and
/// [`EntityType::primary_key_ref`] construct these.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    name: String,
    expr: ColumnExpr,
    column_type: ColumnType,
}

impl ColumnRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.expr, ColumnExpr::Computed(_))
    }

    /// SQL expression for this reference: a quoted identifier or a parenthesized expression
    pub fn to_sql(&self) -> String {
        match &self.expr {
            ColumnExpr::Column => quote_identifier(&self.name),
            ColumnExpr::Computed(sql) => format!("({})", sql),
        }
    }
}

// ============================================================================
// Entity Types
// ============================================================================

/// Introspected description of one relational record kind
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    name: String,
    label: String,
    primary_key: String,
    columns: Vec<ColumnDefinition>,
    attributes: Vec<ComputedAttribute>,
    relationships: Vec<Relationship>,
}

impl EntityType {
    /// Start building an entity backed by the table `name`
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder::new(name)
    }

    /// Entity (and table) name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn attributes(&self) -> &[ComputedAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&ComputedAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Relationship configured under `field` (a foreign-key column or relationship name)
    pub fn relationship_for_field(&self, field: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.field_name() == field)
    }

    /// Parent reference backed by the foreign-key column `foreign_key`
    pub fn parent_ref_for(&self, foreign_key: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| {
            matches!(&r.kind, RelationshipKind::ParentRef { foreign_key: fk } if fk == foreign_key)
        })
    }

    /// Reference to a real column, or `None` if `name` is not one
    pub fn column_ref(&self, name: &str) -> Option<ColumnRef> {
        self.column(name).map(|col| ColumnRef {
            name: col.name.clone(),
            expr: ColumnExpr::Column,
            column_type: col.column_type.clone(),
        })
    }

    /// Reference to a real column or computed attribute
    pub fn sortable_ref(&self, name: &str) -> Option<ColumnRef> {
        self.column_ref(name).or_else(|| self.attribute_ref(name))
    }

    /// Reference to a computed attribute
    pub fn attribute_ref(&self, name: &str) -> Option<ColumnRef> {
        self.attribute(name).map(|attr| ColumnRef {
            name: attr.name.clone(),
            expr: ColumnExpr::Computed(attr.sql.clone()),
            column_type: attr.column_type.clone(),
        })
    }

    pub fn primary_key_ref(&self) -> ColumnRef {
        let column_type = self
            .column(&self.primary_key)
            .map(|c| c.column_type.clone())
            .unwrap_or(ColumnType::Integer);
        ColumnRef {
            name: self.primary_key.clone(),
            expr: ColumnExpr::Column,
            column_type,
        }
    }
}

/// Builder for [`EntityType`]
#[derive(Debug)]
pub struct EntityTypeBuilder {
    name: String,
    label: Option<String>,
    primary_key: String,
    columns: Vec<ColumnDefinition>,
    attributes: Vec<ComputedAttribute>,
    relationships: Vec<Relationship>,
}

impl EntityTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            primary_key: "id".to_string(),
            columns: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Set the human readable name (default: the humanized table name)
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the primary key column (default: "id")
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnDefinition>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn attribute(mut self, attribute: ComputedAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Validate identifiers and key columns, then build the entity
    pub fn build(self) -> Result<EntityType> {
        check_identifier(&self.name)?;

        for (i, col) in self.columns.iter().enumerate() {
            check_identifier(&col.name)?;
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(AdminError::configuration(format!(
                    "Entity '{}' declares column '{}' twice",
                    self.name, col.name
                )));
            }
        }

        if !self.columns.iter().any(|c| c.name == self.primary_key) {
            return Err(AdminError::configuration(format!(
                "Entity '{}' has no primary key column '{}'",
                self.name, self.primary_key
            )));
        }

        for (i, attr) in self.attributes.iter().enumerate() {
            check_identifier(&attr.name)?;
            let clashes = self.columns.iter().any(|c| c.name == attr.name)
                || self.attributes[..i].iter().any(|a| a.name == attr.name);
            if clashes {
                return Err(AdminError::configuration(format!(
                    "Entity '{}' attribute '{}' clashes with another field",
                    self.name, attr.name
                )));
            }
            if attr.sql.trim().is_empty() {
                return Err(AdminError::configuration(format!(
                    "Entity '{}' attribute '{}' has an empty expression",
                    self.name, attr.name
                )));
            }
        }

        for (i, rel) in self.relationships.iter().enumerate() {
            check_identifier(&rel.name)?;
            check_identifier(&rel.related)?;
            if self.relationships[..i].iter().any(|r| r.name == rel.name) {
                return Err(AdminError::configuration(format!(
                    "Entity '{}' declares relationship '{}' twice",
                    self.name, rel.name
                )));
            }

            match &rel.kind {
                RelationshipKind::ParentRef { foreign_key } => {
                    if !self.columns.iter().any(|c| &c.name == foreign_key) {
                        return Err(AdminError::configuration(format!(
                            "Relationship '{}' on '{}' references unknown column '{}'",
                            rel.name, self.name, foreign_key
                        )));
                    }
                }
                RelationshipKind::OwnedMany { foreign_key }
                | RelationshipKind::OwnedOne { foreign_key } => {
                    check_identifier(foreign_key)?;
                    self.check_virtual_name(rel)?;
                }
                RelationshipKind::SharedMany { join } => {
                    check_identifier(&join.table)?;
                    check_identifier(&join.local_key)?;
                    check_identifier(&join.remote_key)?;
                    self.check_virtual_name(rel)?;
                }
            }
        }

        let label = self.label.unwrap_or_else(|| humanize(&self.name));

        Ok(EntityType {
            name: self.name,
            label,
            primary_key: self.primary_key,
            columns: self.columns,
            attributes: self.attributes,
            relationships: self.relationships,
        })
    }

    fn check_virtual_name(&self, rel: &Relationship) -> Result<()> {
        let clashes = self.columns.iter().any(|c| c.name == rel.name)
            || self.attributes.iter().any(|a| a.name == rel.name);
        if clashes {
            return Err(AdminError::configuration(format!(
                "Relationship '{}' on '{}' clashes with a column or attribute",
                rel.name, self.name
            )));
        }
        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<()> {
    validate_identifier(name).map_err(AdminError::invalid_identifier)
}

/// Turn a field or table name into a human readable title
///
/// `author_id` becomes "Author", `hire_date` "Hire date", `displayName` "Display name".
pub fn humanize(name: &str) -> String {
    let base = name.strip_suffix("_id").filter(|b| !b.is_empty()).unwrap_or(name);

    let mut words = String::with_capacity(base.len() + 4);
    let mut prev_lower = false;
    for c in base.chars() {
        if c == '_' {
            words.push(' ');
            prev_lower = false;
        } else if c.is_ascii_uppercase() && prev_lower {
            words.push(' ');
            words.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            words.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }

    let collapsed = words.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books() -> EntityType {
        EntityType::builder("books")
            .column(ColumnDefinition::new("id", ColumnType::Integer).not_null())
            .column(ColumnDefinition::new("title", ColumnType::String))
            .column(ColumnDefinition::new("author_id", ColumnType::Integer))
            .attribute(ComputedAttribute::new(
                "title_length",
                "char_length(\"title\")",
                ColumnType::Integer,
            ))
            .relationship(Relationship::parent_ref("author", "authors", "author_id"))
            .relationship(Relationship::shared_many(
                "tags",
                "tags",
                JoinTable::new("book_tags", "book_id", "tag_id"),
            ))
            .build()
            .unwrap()
    }

    // =========================================================================
    // Builder Tests
    // =========================================================================

    #[test]
    fn test_builder_defaults() {
        let entity = books();
        assert_eq!(entity.name(), "books");
        assert_eq!(entity.label(), "Books");
        assert_eq!(entity.primary_key(), "id");
        assert_eq!(entity.columns().len(), 3);
        assert_eq!(entity.relationships().len(), 2);
    }

    #[test]
    fn test_builder_rejects_missing_primary_key() {
        let result = EntityType::builder("books")
            .column(ColumnDefinition::new("title", ColumnType::String))
            .build();
        assert!(matches!(result, Err(AdminError::Configuration(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_identifiers() {
        let result = EntityType::builder("books; DROP TABLE x")
            .column(ColumnDefinition::new("id", ColumnType::Integer))
            .build();
        assert!(matches!(result, Err(AdminError::InvalidIdentifier(_))));

        let result = EntityType::builder("books")
            .column(ColumnDefinition::new("id", ColumnType::Integer))
            .column(ColumnDefinition::new("ti\"tle", ColumnType::String))
            .build();
        assert!(matches!(result, Err(AdminError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_builder_rejects_duplicate_columns() {
        let result = EntityType::builder("books")
            .column(ColumnDefinition::new("id", ColumnType::Integer))
            .column(ColumnDefinition::new("title", ColumnType::String))
            .column(ColumnDefinition::new("title", ColumnType::Text))
            .build();
        assert!(result.unwrap_err().to_string().contains("twice"));
    }

    #[test]
    fn test_builder_rejects_parent_ref_without_column() {
        let result = EntityType::builder("books")
            .column(ColumnDefinition::new("id", ColumnType::Integer))
            .relationship(Relationship::parent_ref("author", "authors", "author_id"))
            .build();
        assert!(result.unwrap_err().to_string().contains("unknown column 'author_id'"));
    }

    #[test]
    fn test_builder_rejects_virtual_name_clash() {
        let result = EntityType::builder("authors")
            .column(ColumnDefinition::new("id", ColumnType::Integer))
            .column(ColumnDefinition::new("books", ColumnType::Integer))
            .relationship(Relationship::owned_many("books", "books", "author_id"))
            .build();
        assert!(matches!(result, Err(AdminError::Configuration(_))));
    }

    // =========================================================================
    // Lookup Tests
    // =========================================================================

    #[test]
    fn test_relationship_field_names() {
        let entity = books();
        assert_eq!(entity.relationship_for_field("author_id").unwrap().name, "author");
        assert_eq!(entity.relationship_for_field("tags").unwrap().name, "tags");
        assert!(entity.relationship_for_field("author").is_none());
        assert!(entity.parent_ref_for("author_id").is_some());
        assert!(entity.parent_ref_for("title").is_none());
    }

    #[test]
    fn test_column_ref_only_for_real_columns() {
        let entity = books();
        let title = entity.column_ref("title").unwrap();
        assert_eq!(title.to_sql(), "\"title\"");
        assert!(!title.is_computed());

        assert!(entity.column_ref("title_length").is_none());
        assert!(entity.column_ref("title\" OR 1=1 --").is_none());
        assert!(entity.column_ref("tags").is_none());
    }

    #[test]
    fn test_sortable_ref_includes_attributes() {
        let entity = books();
        let attr = entity.sortable_ref("title_length").unwrap();
        assert!(attr.is_computed());
        assert_eq!(attr.to_sql(), "(char_length(\"title\"))");
        assert_eq!(attr.column_type(), &ColumnType::Integer);
        assert!(entity.sortable_ref("unknown").is_none());
    }

    #[test]
    fn test_primary_key_ref() {
        let entity = books();
        let pk = entity.primary_key_ref();
        assert_eq!(pk.name(), "id");
        assert_eq!(pk.to_sql(), "\"id\"");
    }

    // =========================================================================
    // humanize Tests
    // =========================================================================

    #[test]
    fn test_humanize() {
        assert_eq!(humanize("author_id"), "Author");
        assert_eq!(humanize("hire_date"), "Hire date");
        assert_eq!(humanize("displayName"), "Display name");
        assert_eq!(humanize("books"), "Books");
        assert_eq!(humanize("_id"), "Id");
        assert_eq!(humanize("id"), "Id");
    }

    #[test]
    fn test_relationship_label_defaults() {
        let rel = Relationship::owned_many("line_items", "line_items", "order_id");
        assert_eq!(rel.label, "Line items");
        let rel = rel.label("Items");
        assert_eq!(rel.label, "Items");
    }
}
