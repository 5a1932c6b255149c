//! Edit dispatch

use serde_json::Value;
use tracing::warn;

use super::{EditWidget, FormContext, InputKind, Renderer, guarded};
use crate::field::{EditFn, EditStrategy, FieldOption, ParentRefBinding, RelationshipBinding, SharedBinding};
use crate::record::{Record, key_text};
use crate::schema::humanize;
use crate::types::{ColumnType, parse_bool, parse_date, parse_timestamp};

impl Renderer<'_> {
    /// Editable representation of `field` of `record`
    ///
    /// 1. read-only fields and owned relationships show their display text
    /// 2. shared collections are a multi-select seeded with the current associations
    /// 3. a custom edit callback
    /// 4. static options are a single-select
    /// 5. parent references are a single-select over the related rows
    /// 6. the column-type default input
    pub fn render_edit(&self, record: &Record, field: &str, form: &FormContext) -> EditWidget {
        let spec = self.registry.get(field);
        let raw = record.get(field);

        if let Some(spec) = spec {
            let owned = spec.relationship.as_ref().is_some_and(RelationshipBinding::is_owned);
            if spec.read_only || owned {
                return self.read_only(record, field);
            }
            if let Some(RelationshipBinding::SharedMany(binding)) = &spec.relationship {
                return self.edit_shared(record, field, binding, form);
            }
            if let EditStrategy::Custom(func) = &spec.edit {
                return self.edit_custom(field, func, raw, record, form);
            }
            if let Some(options) = &spec.options {
                return EditWidget::Select {
                    name: form.input_name(field),
                    options: options.clone(),
                    selected: raw.and_then(key_text),
                    placeholder: None,
                };
            }
            if let Some(RelationshipBinding::ParentRef(binding)) = &spec.relationship {
                return self.edit_parent(field, raw, binding, form);
            }
        }

        self.edit_default(record, field, raw, form)
    }

    fn read_only(&self, record: &Record, field: &str) -> EditWidget {
        EditWidget::ReadOnly {
            text: self.render_display(record, field).text,
        }
    }

    fn edit_shared(&self, record: &Record, field: &str, binding: &SharedBinding, form: &FormContext) -> EditWidget {
        let current = record
            .key(self.registry.entity().primary_key())
            .and_then(|owner| self.relations.shared(&binding.relationship, &owner))
            .unwrap_or_default();
        let mut options = self
            .relations
            .choices(&binding.relationship)
            .unwrap_or_default()
            .to_vec();
        for item in current {
            if !options.iter().any(|o| o.value == item.value) {
                options.push(item.clone());
            }
        }
        EditWidget::MultiSelect {
            name: form.multi_input_name(field),
            options,
            selected: current.iter().map(|item| item.value.clone()).collect(),
        }
    }

    fn edit_custom(
        &self,
        field: &str,
        func: &EditFn,
        raw: Option<&Value>,
        record: &Record,
        form: &FormContext,
    ) -> EditWidget {
        match guarded(|| func(raw, record, form)) {
            Ok(widget) => widget,
            Err(message) => {
                warn!(
                    entity = %self.registry.entity().name(),
                    field = %field,
                    error = %message,
                    "Edit callback failed"
                );
                if self.registry.config().environment.is_production() {
                    EditWidget::Input {
                        name: form.input_name(field),
                        kind: InputKind::Text,
                        value: raw.map(input_text).unwrap_or_default(),
                    }
                } else {
                    EditWidget::Error {
                        name: form.input_name(field),
                        message,
                    }
                }
            }
        }
    }

    fn edit_parent(&self, field: &str, raw: Option<&Value>, binding: &ParentRefBinding, form: &FormContext) -> EditWidget {
        let selected = raw.and_then(key_text);
        let mut options = self
            .relations
            .choices(&binding.relationship)
            .unwrap_or_default()
            .to_vec();

        // keep the current parent selectable even when the scope excludes it
        if let Some(key) = &selected {
            if !options.iter().any(|o| &o.value == key) {
                if let Some(label) = self.relations.parent_label(&binding.relationship, key) {
                    options.insert(0, FieldOption::new(label, key.clone()));
                }
            }
        }

        EditWidget::Select {
            name: form.input_name(field),
            options,
            selected,
            placeholder: Some(binding.placeholder.clone()),
        }
    }

    fn edit_default(&self, record: &Record, field: &str, raw: Option<&Value>, form: &FormContext) -> EditWidget {
        let Some(column) = self.registry.entity().column(field) else {
            // computed attributes and virtual fields have nothing to write back
            return self.read_only(record, field);
        };
        let name = form.input_name(field);
        let text = raw.map(input_text).unwrap_or_default();

        let kind = match &column.column_type {
            ColumnType::Boolean => {
                let checked = raw
                    .and_then(|v| v.as_bool().or_else(|| key_text(v).as_deref().and_then(parse_bool)))
                    .unwrap_or(false);
                return EditWidget::Checkbox { name, checked };
            }
            ColumnType::Enum { values } => {
                return EditWidget::Select {
                    name,
                    options: values
                        .iter()
                        .map(|v| FieldOption::new(humanize(v), v.clone()))
                        .collect(),
                    selected: raw.and_then(key_text),
                    placeholder: column.nullable.then(String::new),
                };
            }
            ColumnType::Date => {
                let value = parse_date(&text)
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or(text);
                return EditWidget::Input {
                    name,
                    kind: InputKind::Date,
                    value,
                };
            }
            ColumnType::Timestamp => {
                let value = parse_timestamp(&text)
                    .map(|ts| ts.format("%Y-%m-%dT%H:%M").to_string())
                    .unwrap_or(text);
                return EditWidget::Input {
                    name,
                    kind: InputKind::DateTime,
                    value,
                };
            }
            ColumnType::Text | ColumnType::Json => InputKind::TextArea,
            ColumnType::Integer | ColumnType::Float => InputKind::Number,
            ColumnType::Decimal { .. } => InputKind::Decimal,
            ColumnType::String | ColumnType::Uuid => InputKind::Text,
        };

        EditWidget::Input {
            name,
            kind,
            value: text,
        }
    }
}

/// Input value of a raw column value; JSON documents are pretty-printed
fn input_text(raw: &Value) -> String {
    match raw {
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string())
        }
        other => key_text(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::config::{EngineConfig, Environment};
    use crate::field::FieldSpec;
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
                    .column(ColumnDefinition::new("active", ColumnType::Boolean))
                    .relationship(Relationship::owned_many("books", "books", "author_id"))
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
                    .column(ColumnDefinition::new("summary", ColumnType::Text))
                    .column(ColumnDefinition::new("author_id", ColumnType::Integer))
                    .column(ColumnDefinition::new("available", ColumnType::Boolean))
                    .column(ColumnDefinition::new("price", ColumnType::decimal(10, 2)))
                    .column(ColumnDefinition::new("pages", ColumnType::Integer))
                    .column(ColumnDefinition::new("published_on", ColumnType::Date))
                    .column(ColumnDefinition::new("created_at", ColumnType::Timestamp))
                    .column(ColumnDefinition::new("status", ColumnType::enumeration(["draft", "live"])).not_null())
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
            "title": "Emma",
            "summary": "Matchmaking in Highbury",
            "author_id": 3,
            "available": true,
            "price": "12.50",
            "pages": 474,
            "published_on": "1815-12-23",
            "created_at": "2020-01-31T23:59:00Z",
            "status": "live",
        }))
        .unwrap()
    }

    fn cache() -> RelationCache {
        let mut cache = RelationCache::new();
        cache.insert_parent("author", "3", "Jane Austen");
        cache.insert_choices(
            "author",
            vec![FieldOption::new("Charlotte Bronte", "4"), FieldOption::new("Jane Austen", "3")],
        );
        cache.insert_choices(
            "tags",
            vec![FieldOption::new("Classic", "1"), FieldOption::new("Romance", "2")],
        );
        cache.insert_shared("tags", "1", vec![FieldOption::new("Romance", "2")]);
        cache.insert_children(
            "books",
            "3",
            ChildSummary {
                count: 1,
                labels: vec!["Emma".into()],
            },
        );
        cache
    }

    fn registry(builder: crate::registry::FieldRegistryBuilder) -> FieldRegistry {
        builder.build(&catalog()).unwrap()
    }

    fn form() -> FormContext {
        FormContext::new("book").update()
    }

    fn input(name: &str, kind: InputKind, value: &str) -> EditWidget {
        EditWidget::Input {
            name: name.into(),
            kind,
            value: value.into(),
        }
    }

    // =========================================================================
    // Type Default Tests
    // =========================================================================

    #[test]
    fn test_type_default_inputs() {
        let registry = registry(FieldRegistry::builder("books"));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        let record = book();
        let edit = |field: &str| renderer.render_edit(&record, field, &form());

        assert_eq!(edit("title"), input("book[title]", InputKind::Text, "Emma"));
        assert_eq!(
            edit("summary"),
            input("book[summary]", InputKind::TextArea, "Matchmaking in Highbury")
        );
        assert_eq!(edit("pages"), input("book[pages]", InputKind::Number, "474"));
        assert_eq!(edit("price"), input("book[price]", InputKind::Decimal, "12.50"));
        assert_eq!(edit("published_on"), input("book[published_on]", InputKind::Date, "1815-12-23"));
        assert_eq!(
            edit("created_at"),
            input("book[created_at]", InputKind::DateTime, "2020-01-31T23:59")
        );
        assert_eq!(
            edit("available"),
            EditWidget::Checkbox {
                name: "book[available]".into(),
                checked: true
            }
        );
    }

    #[test]
    fn test_enum_select() {
        let registry = registry(FieldRegistry::builder("books"));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        let EditWidget::Select {
            options,
            selected,
            placeholder,
            ..
        } = renderer.render_edit(&book(), "status", &form())
        else {
            panic!("Expected select");
        };
        assert_eq!(options[1], FieldOption::new("Live", "live"));
        assert_eq!(selected.as_deref(), Some("live"));
        assert_eq!(placeholder, None);
    }

    #[test]
    fn test_missing_values_render_blank_inputs() {
        let registry = registry(FieldRegistry::builder("books"));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        let form = FormContext::new("book");
        assert_eq!(
            renderer.render_edit(&Record::new(), "title", &form),
            input("book[title]", InputKind::Text, "")
        );
    }

    // =========================================================================
    // Dispatch Order Tests
    // =========================================================================

    #[test]
    fn test_read_only_and_owned_fields() {
        let registry = registry(FieldRegistry::builder("books").field("title", FieldSpec::new().read_only()));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(
            renderer.render_edit(&book(), "title", &form()),
            EditWidget::ReadOnly { text: "Emma".into() }
        );

        let authors = registry_for_authors();
        let renderer = Renderer::new(&authors, &cache);
        let author = Record::new().with("id", 3).with("name", "Jane Austen");
        assert_eq!(
            renderer.render_edit(&author, "books", &FormContext::new("author")),
            EditWidget::ReadOnly {
                text: "1 item: Emma".into()
            }
        );
    }

    fn registry_for_authors() -> FieldRegistry {
        registry(FieldRegistry::builder("authors"))
    }

    fn tags_multi_select() -> EditWidget {
        EditWidget::MultiSelect {
            name: "book[tags][]".into(),
            options: vec![FieldOption::new("Classic", "1"), FieldOption::new("Romance", "2")],
            selected: vec!["2".into()],
        }
    }

    #[test]
    fn test_shared_many_multi_select() {
        let registry = registry(FieldRegistry::builder("books").field("tags", FieldSpec::new().relationship("tags")));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(renderer.render_edit(&book(), "tags", &form()), tags_multi_select());
    }

    #[test]
    fn test_auto_configured_shared_many_is_read_only() {
        let registry = registry(FieldRegistry::builder("books"));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(
            renderer.render_edit(&book(), "tags", &form()),
            EditWidget::ReadOnly { text: "Romance".into() }
        );
    }

    #[test]
    fn test_shared_many_multi_select_ignores_custom_edit() {
        let registry = registry(FieldRegistry::builder("books").field(
            "tags",
            FieldSpec::new().relationship("tags").edit(|_, _, form| {
                Ok(EditWidget::Custom {
                    name: form.input_name("tags"),
                    content: "<tag-picker/>".into(),
                })
            }),
        ));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(renderer.render_edit(&book(), "tags", &form()), tags_multi_select());
    }

    #[test]
    fn test_parent_ref_select() {
        let registry = registry(FieldRegistry::builder("books"));
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        let EditWidget::Select {
            name,
            options,
            selected,
            placeholder,
        } = renderer.render_edit(&book(), "author_id", &form())
        else {
            panic!("Expected select");
        };
        assert_eq!(name, "book[author_id]");
        assert_eq!(options.len(), 2);
        assert_eq!(selected.as_deref(), Some("3"));
        assert_eq!(placeholder.as_deref(), Some("Select Author"));
    }

    #[test]
    fn test_parent_ref_keeps_current_value_outside_scope() {
        let registry = registry(FieldRegistry::builder("books"));
        let mut cache = cache();
        cache.insert_choices("author", vec![FieldOption::new("Charlotte Bronte", "4")]);
        let renderer = Renderer::new(&registry, &cache);
        let EditWidget::Select { options, .. } = renderer.render_edit(&book(), "author_id", &form()) else {
            panic!("Expected select");
        };
        assert_eq!(options[0], FieldOption::new("Jane Austen", "3"));
    }

    #[test]
    fn test_options_select() {
        let registry = registry(FieldRegistry::builder("books").field(
            "title",
            FieldSpec::new().options([FieldOption::new("Emma", "Emma"), FieldOption::new("Persuasion", "Persuasion")]),
        ));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        let EditWidget::Select { options, selected, .. } = renderer.render_edit(&book(), "title", &form()) else {
            panic!("Expected select");
        };
        assert_eq!(options.len(), 2);
        assert_eq!(selected.as_deref(), Some("Emma"));
    }

    #[test]
    fn test_custom_edit_callback() {
        let registry = registry(FieldRegistry::builder("books").field(
            "summary",
            FieldSpec::new().edit(|raw, _, form| {
                Ok(EditWidget::Custom {
                    name: form.input_name("summary"),
                    content: format!("<rich-editor>{}</rich-editor>", raw.and_then(Value::as_str).unwrap_or("")),
                })
            }),
        ));
        let cache = RelationCache::new();
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(
            renderer.render_edit(&book(), "summary", &form()),
            EditWidget::Custom {
                name: "book[summary]".into(),
                content: "<rich-editor>Matchmaking in Highbury</rich-editor>".into(),
            }
        );
    }

    fn failing(environment: Environment) -> FieldRegistry {
        registry(
            FieldRegistry::builder("books")
                .config(EngineConfig::builder().environment(environment).build())
                .field("title", FieldSpec::new().edit(|_, _, _| Err("widget unavailable".into()))),
        )
    }

    #[test]
    fn test_edit_callback_failure() {
        let cache = RelationCache::new();

        let registry = failing(Environment::Development);
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(
            renderer.render_edit(&book(), "title", &form()),
            EditWidget::Error {
                name: "book[title]".into(),
                message: "widget unavailable".into()
            }
        );

        let registry = failing(Environment::Production);
        let renderer = Renderer::new(&registry, &cache);
        assert_eq!(
            renderer.render_edit(&book(), "title", &form()),
            input("book[title]", InputKind::Text, "Emma")
        );
    }

    #[test]
    fn test_render_form_skips_form_hidden_fields() {
        let registry = registry(
            FieldRegistry::builder("books").field("summary", FieldSpec::new().hide_in(crate::field::RenderContext::Form)),
        );
        let cache = cache();
        let renderer = Renderer::new(&registry, &cache);
        let fields: Vec<String> = renderer
            .render_form(&book(), &form())
            .into_iter()
            .map(|(field, _)| field)
            .collect();
        assert!(!fields.contains(&"summary".to_string()));
        assert!(fields.contains(&"tags".to_string()));
    }
}
