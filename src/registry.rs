//! Field metadata registry and column selector
//!
//! A [`FieldRegistry`] is the per-entity configuration object: built once from
//! a [`SchemaReflector`], explicit overrides and the relationship pass, then
//! shared read-only with the query builder and the renderer.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::autoconfig::{auto_configure, bind_relationship};
use crate::catalog::SchemaReflector;
use crate::config::EngineConfig;
use crate::error::{AdminError, Result};
use crate::field::{
    CallbackRegistry, DisplayStrategy, EditStrategy, FieldOption, FieldSpec, FilterKind,
    RelationshipBinding, RelationshipRequest, RenderContext, SpecOrigin, Visibility,
};
use crate::query::{SortDirection, SortSpec};
use crate::schema::{ColumnRef, EntityType, RelationshipKind, humanize};
use crate::sql::condition::Predicate;
use crate::sql::sanitize::validate_identifier;
use crate::types::ColumnType;

/// UI metadata for one filterable field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterDescriptor {
    pub field: String,
    pub title: String,
    pub kind: FilterKind,
    /// Static choices (explicit options or enum values)
    pub options: Vec<FieldOption>,
    /// Parent relationship whose rows provide the choices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

/// Field configuration for one entity type
#[derive(Debug)]
pub struct FieldRegistry {
    entity: Arc<EntityType>,
    related: HashMap<String, Arc<EntityType>>,
    config: Arc<EngineConfig>,
    callbacks: CallbackRegistry,
    specs: HashMap<String, FieldSpec>,
    /// Non-column fields in the order they were first registered
    registration_order: Vec<String>,
    default_sort: SortSpec,
}

/// Register `entity` with explicit field overrides and the default engine configuration
pub fn register_entity<I, S>(
    reflector: &dyn SchemaReflector,
    entity: &str,
    overrides: I,
) -> Result<FieldRegistry>
where
    I: IntoIterator<Item = (S, FieldSpec)>,
    S: Into<String>,
{
    let mut builder = FieldRegistry::builder(entity);
    for (field, spec) in overrides {
        builder = builder.field(field, spec);
    }
    builder.build(reflector)
}

impl FieldRegistry {
    pub fn builder(entity: impl Into<String>) -> FieldRegistryBuilder {
        FieldRegistryBuilder::new(entity)
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn related_entity(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.related.get(name)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Sort applied when a request's sort is missing or invalid
    pub fn default_sort(&self) -> &SortSpec {
        &self.default_sort
    }

    pub fn get(&self, field: &str) -> Option<&FieldSpec> {
        self.specs.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.specs.contains_key(field)
    }

    /// Register or replace the spec for `field`
    ///
    /// Named callbacks and relationship settings are resolved here; anything
    /// that cannot be resolved is a configuration error.
    pub fn register(&mut self, field: impl Into<String>, spec: FieldSpec) -> Result<()> {
        let field = field.into();
        let spec = self.resolve(&field, spec)?;
        self.store(field, spec);
        Ok(())
    }

    pub(crate) fn insert_auto(&mut self, field: String, spec: FieldSpec) {
        self.store(field, spec);
    }

    fn store(&mut self, field: String, spec: FieldSpec) {
        if !self.entity.has_column(&field) && !self.registration_order.contains(&field) {
            self.registration_order.push(field.clone());
        }
        self.specs.insert(field, spec);
    }

    fn resolve(&self, field: &str, mut spec: FieldSpec) -> Result<FieldSpec> {
        validate_identifier(field).map_err(AdminError::invalid_identifier)?;

        let entity = self.entity.name();
        let column = self.entity.column(field);
        let backing_type = column
            .map(|c| &c.column_type)
            .or_else(|| self.entity.attribute(field).map(|a| &a.column_type));

        if backing_type.is_none() {
            if spec.searchable == Some(true) {
                return Err(AdminError::configuration(format!(
                    "Field '{}' on '{}' is not a column or attribute and cannot be searchable",
                    field, entity
                )));
            }
            if spec.filterable == Some(true) {
                return Err(AdminError::configuration(format!(
                    "Field '{}' on '{}' is not a column or attribute and cannot be filterable",
                    field, entity
                )));
            }
        }

        if spec.filter_kind == Some(FilterKind::DateRange)
            && !backing_type.is_some_and(ColumnType::is_temporal)
        {
            return Err(AdminError::configuration(format!(
                "Field '{}' on '{}' uses a date range filter but is not a date or timestamp",
                field, entity
            )));
        }

        if let DisplayStrategy::Named(name) = &spec.display {
            let func = self.callbacks.display_fn(name).ok_or_else(|| {
                AdminError::configuration(format!(
                    "Field '{}' on '{}' names unknown display callback '{}'",
                    field, entity, name
                ))
            })?;
            spec.display = DisplayStrategy::Custom(func.clone());
        }

        if let EditStrategy::Named(name) = &spec.edit {
            let func = self.callbacks.edit_fn(name).ok_or_else(|| {
                AdminError::configuration(format!(
                    "Field '{}' on '{}' names unknown edit callback '{}'",
                    field, entity, name
                ))
            })?;
            spec.edit = EditStrategy::Custom(func.clone());
        }

        if let Some(request) = spec.request.take() {
            spec.relationship = Some(self.resolve_binding(field, &request)?);
        }

        if spec.options.is_some() && matches!(spec.relationship, Some(RelationshipBinding::ParentRef(_))) {
            return Err(AdminError::configuration(format!(
                "Field '{}' on '{}' sets both static options and a parent reference",
                field, entity
            )));
        }

        spec.origin = SpecOrigin::Explicit;
        Ok(spec)
    }

    fn resolve_binding(&self, field: &str, request: &RelationshipRequest) -> Result<RelationshipBinding> {
        let entity = self.entity.name();
        let rel = match &request.relationship {
            Some(name) => self.entity.relationship(name).ok_or_else(|| {
                AdminError::configuration(format!(
                    "Field '{}' on '{}' names unknown relationship '{}'",
                    field, entity, name
                ))
            })?,
            None => self.entity.relationship_for_field(field).ok_or_else(|| {
                AdminError::configuration(format!(
                    "Field '{}' on '{}' has no relationship to configure",
                    field, entity
                ))
            })?,
        };

        if request.parent_only && !rel.is_parent_ref() {
            return Err(AdminError::configuration(format!(
                "Relationship '{}' on '{}' is not a parent reference",
                rel.name, entity
            )));
        }
        if let RelationshipKind::ParentRef { foreign_key } = &rel.kind {
            if foreign_key != field {
                return Err(AdminError::configuration(format!(
                    "Relationship '{}' on '{}' must be configured on its foreign key '{}'",
                    rel.name, entity, foreign_key
                )));
            }
        }

        let related = self
            .related
            .get(&rel.related)
            .ok_or_else(|| AdminError::unknown_entity(rel.related.clone()))?;

        if let Some(display_field) = &request.display_field {
            if !related.has_column(display_field) {
                return Err(AdminError::configuration(format!(
                    "Field '{}' on '{}' labels '{}' rows by unknown column '{}'",
                    field,
                    entity,
                    related.name(),
                    display_field
                )));
            }
        }

        let scope = if request.scope.is_empty() {
            None
        } else {
            if !rel.is_parent_ref() {
                return Err(AdminError::configuration(format!(
                    "Field '{}' on '{}' scopes a relationship that is not a parent reference",
                    field, entity
                )));
            }
            let mut predicates = Vec::with_capacity(request.scope.len());
            for (column, value) in &request.scope {
                let col = related.column_ref(column).ok_or_else(|| {
                    AdminError::configuration(format!(
                        "Field '{}' on '{}' scopes by unknown column '{}' of '{}'",
                        field,
                        entity,
                        column,
                        related.name()
                    ))
                })?;
                let bound = col.column_type().coerce_json(value).ok_or_else(|| {
                    AdminError::configuration(format!(
                        "Field '{}' on '{}' scopes '{}' by a value of the wrong type: {}",
                        field, entity, column, value
                    ))
                })?;
                predicates.push(Predicate::eq(col, bound));
            }
            Some(Predicate::and(predicates))
        };

        Ok(bind_relationship(
            rel,
            related,
            request.display_field.clone(),
            scope,
            &self.config,
        ))
    }

    // =========================================================================
    // Column Selector
    // =========================================================================

    /// Non-column fields with a spec: relationship fields in relationship order,
    /// then everything else in registration order
    pub fn virtual_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .entity
            .relationships()
            .iter()
            .filter(|r| !r.is_parent_ref() && self.specs.contains_key(&r.name))
            .map(|r| r.name.as_str())
            .collect();
        for name in &self.registration_order {
            if !fields.contains(&name.as_str()) && self.specs.contains_key(name) {
                fields.push(name);
            }
        }
        fields
    }

    /// Every configured or column-backed field, columns first
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.entity.columns().iter().map(|c| c.name.as_str()).collect();
        fields.extend(self.virtual_fields());
        fields
    }

    /// Relationship bindings of every configured field, in field order
    pub fn relationship_bindings(&self) -> Vec<&RelationshipBinding> {
        self.fields()
            .into_iter()
            .filter_map(|field| self.specs.get(field)?.relationship.as_ref())
            .collect()
    }

    /// Fields shown in `context`, columns in column order then virtual fields
    pub fn visible_fields(&self, context: RenderContext) -> Vec<String> {
        let columns = self
            .entity
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| self.is_visible(name, context, true));
        let virtuals = self
            .virtual_fields()
            .into_iter()
            .filter(|name| self.is_visible(name, context, false));
        columns.chain(virtuals).map(str::to_string).collect()
    }

    fn is_visible(&self, field: &str, context: RenderContext, is_column: bool) -> bool {
        let spec = self.specs.get(field);
        if spec.is_some_and(|s| s.is_hidden_in(context)) {
            return false;
        }
        match spec.map(|s| s.visible).unwrap_or_default() {
            Visibility::Hidden => false,
            Visibility::Shown => true,
            Visibility::Default => !(is_column && self.config.is_audit_column(field)),
        }
    }

    /// Explicit title, else the relationship label, else the humanized field name
    pub fn title(&self, field: &str) -> String {
        if let Some(title) = self.specs.get(field).and_then(|s| s.title.clone()) {
            return title;
        }
        match self.entity.relationship_for_field(field) {
            Some(rel) => rel.label.clone(),
            None => humanize(field),
        }
    }

    // =========================================================================
    // Search, Filter and Sort Eligibility
    // =========================================================================

    /// Columns searched by free-text queries
    ///
    /// Text columns are searchable unless they carry an audit suffix; a spec can
    /// opt any column or computed attribute in or out.
    pub fn searchable_columns(&self) -> Vec<ColumnRef> {
        let mut refs = Vec::new();
        for col in self.entity.columns() {
            let default = col.column_type.is_textual() && !self.config.is_audit_column(&col.name);
            let searchable = self
                .specs
                .get(&col.name)
                .and_then(|s| s.searchable)
                .unwrap_or(default);
            if searchable {
                refs.extend(self.entity.column_ref(&col.name));
            }
        }
        for attr in self.entity.attributes() {
            if self.specs.get(&attr.name).and_then(|s| s.searchable) == Some(true) {
                refs.extend(self.entity.attribute_ref(&attr.name));
            }
        }
        refs
    }

    pub fn searchable_fields(&self) -> Vec<String> {
        self.searchable_columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Real columns are filterable unless opted out; attributes only when opted in
    pub fn is_filterable(&self, field: &str) -> bool {
        let explicit = self.specs.get(field).and_then(|s| s.filterable);
        if self.entity.has_column(field) {
            explicit.unwrap_or(true)
        } else if self.entity.attribute(field).is_some() {
            explicit.unwrap_or(false)
        } else {
            false
        }
    }

    /// Whitelisted reference for a filter key, or `None` if the field cannot be filtered
    pub fn filter_ref(&self, field: &str) -> Option<ColumnRef> {
        if !self.is_filterable(field) {
            return None;
        }
        self.entity.sortable_ref(field)
    }

    /// Explicit filter kind, else one derived from the column
    pub fn filter_kind(&self, field: &str) -> Option<FilterKind> {
        let spec = self.specs.get(field);
        if let Some(kind) = spec.and_then(|s| s.filter_kind) {
            return Some(kind);
        }
        let column_type = self.entity.sortable_ref(field)?.column_type().clone();
        let has_choices =
            spec.is_some_and(|s| s.options.is_some() || s.parent_binding().is_some());
        Some(match column_type {
            _ if has_choices => FilterKind::Select,
            ColumnType::Boolean => FilterKind::Boolean,
            ColumnType::Date | ColumnType::Timestamp => FilterKind::DateRange,
            ColumnType::String | ColumnType::Text => FilterKind::Text,
            _ => FilterKind::Select,
        })
    }

    /// Filter UI metadata for every filterable field
    pub fn filter_descriptors(&self) -> Vec<FilterDescriptor> {
        let names = self
            .entity
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.entity.attributes().iter().map(|a| a.name.as_str()));

        let mut descriptors = Vec::new();
        for field in names {
            if !self.is_filterable(field) {
                continue;
            }
            let Some(kind) = self.filter_kind(field) else {
                continue;
            };
            let spec = self.specs.get(field);
            let options = match spec.and_then(|s| s.options.clone()) {
                Some(options) => options,
                None => match self.entity.column(field).map(|c| &c.column_type) {
                    Some(ColumnType::Enum { values }) => values
                        .iter()
                        .map(|v| FieldOption::new(humanize(v), v.clone()))
                        .collect(),
                    _ => Vec::new(),
                },
            };
            descriptors.push(FilterDescriptor {
                field: field.to_string(),
                title: self.title(field),
                kind,
                options,
                relationship: spec
                    .and_then(|s| s.parent_binding())
                    .map(|b| b.relationship.clone()),
            });
        }
        descriptors
    }

    /// Columns and computed attributes accepted as sort keys
    pub fn sortable_fields(&self) -> Vec<String> {
        self.entity
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .chain(self.entity.attributes().iter().map(|a| a.name.clone()))
            .collect()
    }

    /// Filterable date and timestamp fields, columns first
    pub fn filterable_temporal_refs(&self) -> Vec<ColumnRef> {
        self.entity
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.entity.attributes().iter().map(|a| a.name.as_str()))
            .filter_map(|field| self.filter_ref(field))
            .filter(|column| column.column_type().is_temporal())
            .collect()
    }
}

/// Builder for [`FieldRegistry`]
#[derive(Debug)]
pub struct FieldRegistryBuilder {
    entity: String,
    config: Arc<EngineConfig>,
    callbacks: CallbackRegistry,
    fields: Vec<(String, FieldSpec)>,
    default_sort: Option<SortSpec>,
    auto_configure: bool,
}

impl FieldRegistryBuilder {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            config: Arc::new(EngineConfig::default()),
            callbacks: CallbackRegistry::default(),
            fields: Vec::new(),
            default_sort: None,
            auto_configure: true,
        }
    }

    /// Engine configuration, owned or shared between registries
    pub fn config(mut self, config: impl Into<Arc<EngineConfig>>) -> Self {
        self.config = config.into();
        self
    }

    pub fn callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Explicit spec for `field`; always wins over relationship auto-configuration
    pub fn field(mut self, field: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((field.into(), spec));
        self
    }

    /// Fallback sort (default: primary key ascending)
    pub fn default_sort(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.default_sort = Some(SortSpec::new(column, direction));
        self
    }

    /// Skip the relationship pass (default: enabled)
    pub fn without_auto_configuration(mut self) -> Self {
        self.auto_configure = false;
        self
    }

    /// Reflect the entity, apply overrides, then auto-configure relationships
    pub fn build(self, reflector: &dyn SchemaReflector) -> Result<FieldRegistry> {
        let entity = reflector.entity(&self.entity)?;

        let mut related = HashMap::new();
        for rel in entity.relationships() {
            if related.contains_key(&rel.related) {
                continue;
            }
            let target = reflector.entity(&rel.related).map_err(|_| {
                AdminError::unknown_entity(format!(
                    "{} (target of relationship '{}' on '{}')",
                    rel.related,
                    rel.name,
                    entity.name()
                ))
            })?;
            related.insert(rel.related.clone(), target);
        }

        let default_sort = self
            .default_sort
            .unwrap_or_else(|| SortSpec::asc(entity.primary_key()));
        if entity.sortable_ref(&default_sort.column).is_none() {
            return Err(AdminError::configuration(format!(
                "Default sort column '{}' is not a column or attribute of '{}'",
                default_sort.column,
                entity.name()
            )));
        }

        let mut registry = FieldRegistry {
            entity,
            related,
            config: self.config,
            callbacks: self.callbacks,
            specs: HashMap::new(),
            registration_order: Vec::new(),
            default_sort,
        };

        for (field, spec) in self.fields {
            registry.register(field, spec)?;
        }

        let auto_configured = if self.auto_configure {
            auto_configure(&mut registry)
        } else {
            0
        };

        info!(
            entity = %registry.entity.name(),
            fields = registry.specs.len(),
            auto_configured,
            "Registered entity"
        );

        Ok(registry)
    }
}
