//! Display dispatch

use std::fmt::{Display, Write};

use serde_json::Value;
use tracing::warn;

use super::{CellState, ListingLink, Presented, Renderer, ValueSource, guarded};
use crate::field::{
    CollectionBinding, DisplayFn, DisplayStrategy, FieldSpec, ParentRefBinding, RelationshipBinding,
    SharedBinding,
};
use crate::record::{Record, key_text};
use crate::types::{ColumnType, parse_bool, parse_date, parse_timestamp};

impl Renderer<'_> {
    /// Present `field` of `record` for a listing cell or detail page
    ///
    /// 1. owned and shared relationships use their relationship renderer
    ///    unless a custom display callback is set
    /// 2. a custom display callback
    /// 3. parent references show the related row's label
    /// 4. static options show the matching option label
    /// 5. the column-type default
    pub fn render_display(&self, record: &Record, field: &str) -> Presented {
        let raw = record.get(field);
        let Some(spec) = self.registry.get(field) else {
            return self.display_default(field, raw);
        };

        let custom = match &spec.display {
            DisplayStrategy::Custom(func) => Some(func),
            _ => None,
        };
        match (&spec.relationship, custom) {
            (Some(RelationshipBinding::OwnedMany(binding)), None) => {
                return self.display_owned_many(record, binding);
            }
            (Some(RelationshipBinding::OwnedOne(binding)), None) => {
                return self.display_owned_one(record, binding);
            }
            (Some(RelationshipBinding::SharedMany(binding)), None) => {
                return self.display_shared(record, binding);
            }
            (_, Some(func)) => return self.display_custom(field, func, raw, record),
            (Some(RelationshipBinding::ParentRef(binding)), None) => {
                return self.display_parent(raw, binding);
            }
            (None, None) => {}
        }

        if let Some(presented) = self.display_option(spec, raw) {
            return presented;
        }
        self.display_default(field, raw)
    }

    fn owner_key(&self, record: &Record) -> Option<String> {
        record.key(self.registry.entity().primary_key())
    }

    fn display_owned_many(&self, record: &Record, binding: &CollectionBinding) -> Presented {
        let Some(owner) = self.owner_key(record) else {
            return Presented::new("0 items", CellState::Empty, ValueSource::Relationship);
        };
        let summary = self.relations.children(&binding.relationship, &owner);
        let count = summary.map(|s| s.count).unwrap_or(0);
        let labels = summary.map(|s| s.labels.as_slice()).unwrap_or_default();

        let mut text = match count {
            1 => "1 item".to_string(),
            n => format!("{} items", n),
        };
        if !labels.is_empty() {
            text.push_str(": ");
            text.push_str(&labels.join(", "));
            if count > labels.len() as i64 {
                text.push_str(", ...");
            }
        }

        let state = if count == 0 {
            CellState::Empty
        } else {
            CellState::Value
        };
        Presented::new(text, state, ValueSource::Relationship).with_link(ListingLink {
            entity: binding.related.clone(),
            field: binding.foreign_key.clone(),
            value: owner,
        })
    }

    fn display_owned_one(&self, record: &Record, binding: &CollectionBinding) -> Presented {
        let config = self.registry.config();
        let found = self.owner_key(record).and_then(|owner| {
            let label = self
                .relations
                .children(&binding.relationship, &owner)?
                .labels
                .first()?
                .clone();
            Some((owner, label))
        });
        match found {
            Some((owner, label)) => {
                Presented::new(label, CellState::Value, ValueSource::Relationship).with_link(
                    ListingLink {
                        entity: binding.related.clone(),
                        field: binding.foreign_key.clone(),
                        value: owner,
                    },
                )
            }
            None => Presented::new(
                config.none_placeholder.clone(),
                CellState::Empty,
                ValueSource::Relationship,
            ),
        }
    }

    fn display_shared(&self, record: &Record, binding: &SharedBinding) -> Presented {
        let items = self
            .owner_key(record)
            .and_then(|owner| self.relations.shared(&binding.relationship, &owner))
            .unwrap_or_default();
        if items.is_empty() {
            return Presented::new(
                self.registry.config().empty_placeholder.clone(),
                CellState::Empty,
                ValueSource::Relationship,
            );
        }
        let labels: Vec<&str> = items.iter().map(|item| item.label.as_str()).collect();
        Presented::new(labels.join(", "), CellState::Value, ValueSource::Relationship)
    }

    fn display_custom(&self, field: &str, func: &DisplayFn, raw: Option<&Value>, record: &Record) -> Presented {
        match guarded(|| func(raw, record)) {
            Ok(text) => Presented::new(text, CellState::Value, ValueSource::Computed),
            Err(message) => {
                warn!(
                    entity = %self.registry.entity().name(),
                    field = %field,
                    error = %message,
                    "Display callback failed"
                );
                let config = self.registry.config();
                let text = if config.environment.is_production() {
                    raw.map(value_text)
                        .unwrap_or_else(|| config.empty_placeholder.clone())
                } else {
                    format!("Error: {}", message)
                };
                Presented::new(text, CellState::Failed, self.source_of(field))
            }
        }
    }

    fn display_parent(&self, raw: Option<&Value>, binding: &ParentRefBinding) -> Presented {
        let Some(key) = raw.and_then(key_text) else {
            return Presented::new(
                self.registry.config().empty_placeholder.clone(),
                CellState::Empty,
                ValueSource::Relationship,
            );
        };
        match self.relations.parent_label(&binding.relationship, &key) {
            Some(label) => Presented::new(label, CellState::Value, ValueSource::Relationship)
                .with_link(ListingLink {
                    entity: binding.related.clone(),
                    field: binding.related_key.clone(),
                    value: key,
                }),
            None => Presented::new(
                format!("#{} (not found)", key),
                CellState::NotFound,
                ValueSource::Relationship,
            ),
        }
    }

    fn display_option(&self, spec: &FieldSpec, raw: Option<&Value>) -> Option<Presented> {
        let options = spec.options.as_ref()?;
        let value = raw.and_then(key_text)?;
        let option = options.iter().find(|o| o.value == value)?;
        Some(Presented::new(
            option.label.clone(),
            CellState::Value,
            ValueSource::Column,
        ))
    }

    fn source_of(&self, field: &str) -> ValueSource {
        if self.registry.entity().has_column(field) {
            ValueSource::Column
        } else {
            ValueSource::Computed
        }
    }

    /// Column-type default: placeholder, glyphs, date formats, truncated text
    fn display_default(&self, field: &str, raw: Option<&Value>) -> Presented {
        let config = self.registry.config();
        let source = self.source_of(field);
        let Some(raw) = raw else {
            return Presented::new(config.empty_placeholder.clone(), CellState::Empty, source);
        };

        let column_type = self
            .registry
            .entity()
            .sortable_ref(field)
            .map(|c| c.column_type().clone());

        let formatted = match column_type {
            Some(ColumnType::Boolean) => truthy(raw).map(|b| {
                if b {
                    config.true_glyph.clone()
                } else {
                    config.false_glyph.clone()
                }
            }),
            Some(ColumnType::Date) => key_text(raw)
                .as_deref()
                .and_then(parse_date)
                .and_then(|d| format_chrono(d.format(&config.date_format))),
            Some(ColumnType::Timestamp) => key_text(raw)
                .as_deref()
                .and_then(parse_timestamp)
                .and_then(|ts| format_chrono(ts.format(&config.datetime_format))),
            _ => None,
        };

        let text = formatted.unwrap_or_else(|| truncate(&value_text(raw), config.truncate_length));
        Presented::new(text, CellState::Value, source)
    }
}

fn truthy(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        other => key_text(other).as_deref().and_then(parse_bool),
    }
}

/// Text form of any JSON value; objects and arrays as compact JSON
fn value_text(raw: &Value) -> String {
    key_text(raw).unwrap_or_else(|| raw.to_string())
}

/// Render a chrono format, `None` if the configured format string is invalid
fn format_chrono(formatted: impl Display) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", formatted).ok()?;
    Some(out)
}

/// Cap `text` at `max` characters, marking the cut with an ellipsis; 0 disables
fn truncate(text: &str, max: usize) -> String {
    if max == 0 || text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::config::{EngineConfig, Environment};
    use crate::field::{FieldOption, FieldSpec};
    use crate::registry::FieldRegistry;
    use crate::render::relations::{ChildSummary, RelationCache};
    use crate::schema::{EntityType, JoinTable, Relationship};
    use crate::types::ColumnDefinition;
    use serde_json::json;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new()
            .with_entity(
                EntityType::builder("authors")
                    .column(ColumnDefinition::new("id", ColumnType::Integer))
                    .column(ColumnDefinition::new("name", ColumnType::String))
                    .relationship(Relationship::owned_many("books", "books", "author_id"))
                    .relationship(Relationship::owned_one("profile", "profiles", "author_id"))
                    .build()
                    .unwrap(),
            )
            .with_entity(
                EntityType::builder("profiles")
                    .column(ColumnDefinition::new("id", ColumnType::Integer))
                    .column(ColumnDefinition::new("headline", ColumnType::String))
                    .column(ColumnDefinition::new("author_id", ColumnType::Integer))
                    .build()
                    .unwrap(),
            )
            .with_entity(
                EntityType::builder("tags")
                    .column(ColumnDefinition::new("id", ColumnType::Integer))
                    .column(ColumnDefinition::new("name", ColumnType::String))
                    .build()
                    .unwrap(),
            )
            .with_entity(
                EntityType::builder("books")
                    .column(ColumnDefinition::new("id", ColumnType::Integer))
                    .column(ColumnDefinition::new("title", ColumnType::String))
                    .column(ColumnDefinition::new("author_id", ColumnType::Integer))
                    .column(ColumnDefinition::new("available", ColumnType::Boolean))
                    .column(ColumnDefinition::new("published_on", ColumnType::Date))
                    .column(ColumnDefinition::new("created_at", ColumnType::Timestamp))
                    .column(ColumnDefinition::new("status", ColumnType::String))
                    .column(ColumnDefinition::new("metadata", ColumnType::Json))
                    .relationship(Relationship::parent_ref("author", "authors", "author_id"))
                    .relationship(Relationship::shared_many(
                        "tags",
                        "tags",
                        JoinTable::new("book_tags", "book_id", "tag_id"),
                    ))
                    .build()
                    .unwrap(),
            )
    }

    fn book() -> Record {
        Record::from_json(json!({
            "id": 1,
            "title": "Pride and Prejudice",
            "author_id": 3,
            "available": true,
            "published_on": "1813-01-28",
            "created_at": "2020-01-31T23:59:00Z",
            "status": "live",
            "metadata": {"pages": 432},
        }))
        .unwrap()
    }

    fn cache() -> RelationCache {
        let mut cache = RelationCache::new();
        cache.insert_parent("author", "3", "Jane Austen");
        cache.insert_shared(
            "tags",
            "1",
            vec![FieldOption::new("Classic", "1"), FieldOption::new("Romance", "2")],
        );
        cache.insert_children(
            "books",
            "3",
            ChildSummary {
                count: 6,
                labels: vec!["Emma".into(), "Persuasion".into(), "Pride and Prejudice".into()],
            },
        );
        cache.insert_children(
            "profile",
            "3",
            ChildSummary {
                count: 1,
                labels: vec!["Novelist".into()],
            },
        );
        cache
    }

    fn build(builder: crate::registry::FieldRegistryBuilder) -> FieldRegistry {
        builder.build(&catalog()).unwrap()
    }

    // =========================================================================
    // Type Default Tests
    // =========================================================================

    #[test]
    fn test_type_defaults() {
        let registry = build(FieldRegistry::builder("books"));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        let record = book();

        assert_eq!(renderer.render_display(&record, "available").text, "✓");
        assert_eq!(renderer.render_display(&record, "published_on").text, "Jan 28, 1813");
        assert_eq!(renderer.render_display(&record, "created_at").text, "Jan 31, 2020 23:59");
        assert_eq!(renderer.render_display(&record, "metadata").text, "{\"pages\":432}");

        let cell = renderer.render_display(&record.clone().with("available", false), "available");
        assert_eq!(cell.text, "✗");
        assert_eq!(cell.source, ValueSource::Column);
    }

    #[test]
    fn test_null_renders_placeholder() {
        let registry = build(FieldRegistry::builder("books"));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        let cell = renderer.render_display(&book().with("title", Value::Null), "title");
        assert_eq!(cell.text, "-");
        assert_eq!(cell.state, CellState::Empty);
    }

    #[test]
    fn test_long_text_truncated() {
        let registry = build(FieldRegistry::builder("books"));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        let cell = renderer.render_display(&book().with("title", "x".repeat(80)), "title");
        assert_eq!(cell.text, format!("{}...", "x".repeat(50)));
        assert_eq!(cell.state, CellState::Value);
    }

    #[test]
    fn test_invalid_date_format_falls_back_to_raw() {
        let config = EngineConfig::builder().date_format("%Q").build();
        let registry = build(FieldRegistry::builder("books").config(config));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(renderer.render_display(&book(), "published_on").text, "1813-01-28");
    }

    #[test]
    fn test_option_label() {
        let registry = build(FieldRegistry::builder("books").field(
            "status",
            FieldSpec::new().options([FieldOption::new("Published", "live")]),
        ));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(renderer.render_display(&book(), "status").text, "Published");
        assert_eq!(
            renderer.render_display(&book().with("status", "draft"), "status").text,
            "draft"
        );
    }

    // =========================================================================
    // Relationship Tests
    // =========================================================================

    #[test]
    fn test_parent_ref_states() {
        let registry = build(FieldRegistry::builder("books"));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);

        let cell = renderer.render_display(&book(), "author_id");
        assert_eq!(cell.text, "Jane Austen");
        assert_eq!(cell.source, ValueSource::Relationship);
        assert_eq!(
            cell.link,
            Some(ListingLink {
                entity: "authors".into(),
                field: "id".into(),
                value: "3".into()
            })
        );

        let cell = renderer.render_display(&book().with("author_id", 99), "author_id");
        assert_eq!(cell.text, "#99 (not found)");
        assert_eq!(cell.state, CellState::NotFound);

        let cell = renderer.render_display(&book().with("author_id", Value::Null), "author_id");
        assert_eq!(cell.state, CellState::Empty);
        assert_eq!(cell.text, "-");
    }

    #[test]
    fn test_shared_many_joined_labels() {
        let registry = build(FieldRegistry::builder("books"));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(renderer.render_display(&book(), "tags").text, "Classic, Romance");

        let cell = renderer.render_display(&book().with("id", 2), "tags");
        assert_eq!(cell.state, CellState::Empty);
    }

    #[test]
    fn test_owned_many_count_and_preview() {
        let registry = build(FieldRegistry::builder("authors"));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        let author = Record::new().with("id", 3).with("name", "Jane Austen");

        let cell = renderer.render_display(&author, "books");
        assert_eq!(cell.text, "6 items: Emma, Persuasion, Pride and Prejudice, ...");
        assert_eq!(
            cell.link,
            Some(ListingLink {
                entity: "books".into(),
                field: "author_id".into(),
                value: "3".into()
            })
        );

        let cell = renderer.render_display(&Record::new().with("id", 4), "books");
        assert_eq!(cell.text, "0 items");
        assert_eq!(cell.state, CellState::Empty);
    }

    #[test]
    fn test_owned_one_label_or_placeholder() {
        let registry = build(FieldRegistry::builder("authors"));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(
            renderer.render_display(&Record::new().with("id", 3), "profile").text,
            "Novelist"
        );
        let cell = renderer.render_display(&Record::new().with("id", 4), "profile");
        assert_eq!(cell.text, "None");
        assert_eq!(cell.state, CellState::Empty);
    }

    // =========================================================================
    // Custom Callback Tests
    // =========================================================================

    #[test]
    fn test_custom_display_beats_relationship_renderer() {
        let registry = build(FieldRegistry::builder("books").field(
            "tags",
            FieldSpec::new()
                .relationship("tags")
                .display(|_, record| Ok(format!("tags of #{}", record.key("id").unwrap_or_default()))),
        ));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        let cell = renderer.render_display(&book(), "tags");
        assert_eq!(cell.text, "tags of #1");
        assert_eq!(cell.source, ValueSource::Computed);
    }

    #[test]
    fn test_custom_display_receives_null_for_virtual_field() {
        let registry = build(FieldRegistry::builder("books").field(
            "summary",
            FieldSpec::new().display(|raw, record| {
                Ok(format!("{} / {}", raw.is_none(), record.key("title").unwrap_or_default()))
            }),
        ));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(
            renderer.render_display(&book(), "summary").text,
            "true / Pride and Prejudice"
        );
    }

    fn failing(environment: Environment) -> FieldRegistry {
        build(
            FieldRegistry::builder("books")
                .config(EngineConfig::builder().environment(environment).build())
                .field("title", FieldSpec::new().display(|_, _| Err("lookup failed".into())))
                .field("status", FieldSpec::new().display(|_, _| panic!("bad state"))),
        )
    }

    #[test]
    fn test_callback_failure_in_development() {
        let registry = failing(Environment::Development);
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);

        let cell = renderer.render_display(&book(), "title");
        assert_eq!(cell.text, "Error: lookup failed");
        assert_eq!(cell.state, CellState::Failed);

        let cell = renderer.render_display(&book(), "status");
        assert_eq!(cell.text, "Error: callback panicked: bad state");
    }

    #[test]
    fn test_callback_failure_in_production() {
        let registry = failing(Environment::Production);
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);

        let cell = renderer.render_display(&book(), "title");
        assert_eq!(cell.text, "Pride and Prejudice");
        assert_eq!(cell.state, CellState::Failed);
        assert_eq!(renderer.render_display(&book(), "status").text, "live");
    }

    #[test]
    fn test_render_row_follows_visible_fields() {
        let registry = build(FieldRegistry::builder("books"));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        let row = renderer.render_row(&book(), crate::field::RenderContext::List);
        let fields: Vec<&str> = row.iter().map(|(f, _)| f.as_str()).collect();
        assert!(!fields.contains(&"created_at"));
        assert_eq!(fields.last(), Some(&"tags"));
        assert_eq!(row[0].1.text, "1");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("héllo", 3), "hél...");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("anything", 0), "anything");
    }
}
