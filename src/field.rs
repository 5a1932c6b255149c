//! Field configuration model
//!
//! A [`FieldSpec`] governs one field of one entity: its title, visibility,
//! search and filter eligibility, and how it is displayed and edited. Specs
//! are built once at registration time and read concurrently afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;
use crate::render::{EditWidget, FormContext};
use crate::schema::JoinTable;
use crate::sql::condition::Predicate;

/// Tri-state visibility override
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Follow the naming convention (audit columns hidden, everything else shown)
    #[default]
    Default,
    Shown,
    Hidden,
}

/// Where a field list is being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderContext {
    List,
    Detail,
    Form,
}

/// How a field is filtered from the listing UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Case-insensitive contains
    Text,
    /// Truthy/falsy toggle
    Boolean,
    /// Exact match, or set membership for a list of values
    Select,
    /// `<field>From` / `<field>To` bounds
    DateRange,
}

/// One entry of a static dropdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

impl FieldOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Error returned by a custom display or edit callback
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Display callback: `(raw value, record) -> text`; the raw value is `None` for
/// NULL columns and virtual fields
pub type DisplayFn =
    Arc<dyn Fn(Option<&Value>, &Record) -> Result<String, CallbackError> + Send + Sync>;

/// Edit callback: `(raw value, record, form) -> widget`
pub type EditFn = Arc<
    dyn Fn(Option<&Value>, &Record, &FormContext) -> Result<EditWidget, CallbackError>
        + Send
        + Sync,
>;

/// How a field's value is displayed
#[derive(Clone, Default)]
pub enum DisplayStrategy {
    #[default]
    Default,
    /// Callback looked up in the [`CallbackRegistry`] at registration
    Named(String),
    Custom(DisplayFn),
}

impl DisplayStrategy {
    pub fn is_custom(&self) -> bool {
        !matches!(self, DisplayStrategy::Default)
    }
}

impl fmt::Debug for DisplayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStrategy::Default => write!(f, "Default"),
            DisplayStrategy::Named(name) => f.debug_tuple("Named").field(name).finish(),
            DisplayStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// How a field is edited
#[derive(Clone, Default)]
pub enum EditStrategy {
    #[default]
    Default,
    /// Callback looked up in the [`CallbackRegistry`] at registration
    Named(String),
    Custom(EditFn),
}

impl EditStrategy {
    pub fn is_custom(&self) -> bool {
        !matches!(self, EditStrategy::Default)
    }
}

impl fmt::Debug for EditStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditStrategy::Default => write!(f, "Default"),
            EditStrategy::Named(name) => f.debug_tuple("Named").field(name).finish(),
            EditStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Named display and edit callbacks, resolved when fields are registered
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    display: HashMap<String, DisplayFn>,
    edit: HashMap<String, EditFn>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a display callback under `name`
    pub fn display<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Option<&Value>, &Record) -> Result<String, CallbackError> + Send + Sync + 'static,
    {
        self.display.insert(name.into(), Arc::new(func));
        self
    }

    /// Register an edit callback under `name`
    pub fn edit<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Option<&Value>, &Record, &FormContext) -> Result<EditWidget, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.edit.insert(name.into(), Arc::new(func));
        self
    }

    pub fn display_fn(&self, name: &str) -> Option<&DisplayFn> {
        self.display.get(name)
    }

    pub fn edit_fn(&self, name: &str) -> Option<&EditFn> {
        self.edit.get(name)
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut display: Vec<&String> = self.display.keys().collect();
        let mut edit: Vec<&String> = self.edit.keys().collect();
        display.sort();
        edit.sort();
        f.debug_struct("CallbackRegistry")
            .field("display", &display)
            .field("edit", &edit)
            .finish()
    }
}

// ============================================================================
// Relationship Bindings
// ============================================================================

/// Parent reference rendered as a dropdown of the related rows
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRefBinding {
    pub relationship: String,
    pub related: String,
    pub foreign_key: String,
    /// Related primary key the foreign key points at
    pub related_key: String,
    /// Related column used as the row label
    pub display_field: String,
    /// Blank dropdown entry, "Select <relationship>"
    pub placeholder: String,
    /// Narrows the dropdown choices; never applied to label lookups
    pub scope: Option<Predicate>,
}

/// Owned collection (or owned single row) rendered as a count and preview
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionBinding {
    pub relationship: String,
    pub related: String,
    /// Column on the related entity referencing this entity
    pub foreign_key: String,
    pub related_key: String,
    pub display_field: String,
    pub preview_limit: usize,
}

/// Many-to-many association through a join table
#[derive(Debug, Clone, PartialEq)]
pub struct SharedBinding {
    pub relationship: String,
    pub related: String,
    pub join: JoinTable,
    pub related_key: String,
    pub display_field: String,
}

/// Relationship-specific rendering attached to a field
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipBinding {
    ParentRef(ParentRefBinding),
    OwnedMany(CollectionBinding),
    OwnedOne(CollectionBinding),
    SharedMany(SharedBinding),
}

impl RelationshipBinding {
    pub fn relationship(&self) -> &str {
        match self {
            RelationshipBinding::ParentRef(b) => &b.relationship,
            RelationshipBinding::OwnedMany(b) | RelationshipBinding::OwnedOne(b) => &b.relationship,
            RelationshipBinding::SharedMany(b) => &b.relationship,
        }
    }

    pub fn related(&self) -> &str {
        match self {
            RelationshipBinding::ParentRef(b) => &b.related,
            RelationshipBinding::OwnedMany(b) | RelationshipBinding::OwnedOne(b) => &b.related,
            RelationshipBinding::SharedMany(b) => &b.related,
        }
    }

    pub fn display_field(&self) -> &str {
        match self {
            RelationshipBinding::ParentRef(b) => &b.display_field,
            RelationshipBinding::OwnedMany(b) | RelationshipBinding::OwnedOne(b) => &b.display_field,
            RelationshipBinding::SharedMany(b) => &b.display_field,
        }
    }

    /// Owned relationships are never directly editable
    pub fn is_owned(&self) -> bool {
        matches!(
            self,
            RelationshipBinding::OwnedMany(_) | RelationshipBinding::OwnedOne(_)
        )
    }
}

/// Unresolved relationship settings carried by an explicit spec
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RelationshipRequest {
    pub relationship: Option<String>,
    pub parent_only: bool,
    pub display_field: Option<String>,
    pub scope: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum SpecOrigin {
    #[default]
    Explicit,
    Auto,
}

// ============================================================================
// Field Spec
// ============================================================================

/// Configuration of one field
///
/// ```
/// use runtara_object_admin::{FieldOption, FieldSpec, RenderContext};
///
/// let spec = FieldSpec::new()
///     .title("Status")
///     .options([FieldOption::new("Draft", "draft"), FieldOption::new("Live", "live")])
///     .hide_in(RenderContext::Form);
/// assert_eq!(spec.title.as_deref(), Some("Status"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    pub title: Option<String>,
    pub description: Option<String>,
    pub read_only: bool,
    pub visible: Visibility,
    /// Contexts the field is hidden in, regardless of `visible`
    pub hidden_in: Vec<RenderContext>,
    /// `None` follows the column-type default
    pub searchable: Option<bool>,
    /// `None` follows the column default (real columns are filterable)
    pub filterable: Option<bool>,
    pub filter_kind: Option<FilterKind>,
    pub options: Option<Vec<FieldOption>>,
    pub display: DisplayStrategy,
    pub edit: EditStrategy,
    /// Resolved relationship binding; set by registration
    pub relationship: Option<RelationshipBinding>,
    pub(crate) request: Option<RelationshipRequest>,
    pub(crate) origin: SpecOrigin,
}

impl FieldSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Always show the field, even if it looks like an audit column
    pub fn shown(mut self) -> Self {
        self.visible = Visibility::Shown;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = Visibility::Hidden;
        self
    }

    /// Hide the field in one render context only
    pub fn hide_in(mut self, context: RenderContext) -> Self {
        if !self.hidden_in.contains(&context) {
            self.hidden_in.push(context);
        }
        self
    }

    pub fn searchable(mut self, searchable: bool) -> Self {
        self.searchable = Some(searchable);
        self
    }

    pub fn filterable(mut self, filterable: bool) -> Self {
        self.filterable = Some(filterable);
        self
    }

    pub fn filter_kind(mut self, kind: FilterKind) -> Self {
        self.filter_kind = Some(kind);
        self
    }

    /// Render as a single-select over fixed options
    pub fn options(mut self, options: impl IntoIterator<Item = FieldOption>) -> Self {
        self.options = Some(options.into_iter().collect());
        self
    }

    pub fn display<F>(mut self, func: F) -> Self
    where
        F: Fn(Option<&Value>, &Record) -> Result<String, CallbackError> + Send + Sync + 'static,
    {
        self.display = DisplayStrategy::Custom(Arc::new(func));
        self
    }

    /// Display through a callback registered under `name`
    pub fn display_named(mut self, name: impl Into<String>) -> Self {
        self.display = DisplayStrategy::Named(name.into());
        self
    }

    pub fn edit<F>(mut self, func: F) -> Self
    where
        F: Fn(Option<&Value>, &Record, &FormContext) -> Result<EditWidget, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.edit = EditStrategy::Custom(Arc::new(func));
        self
    }

    /// Edit through a callback registered under `name`
    pub fn edit_named(mut self, name: impl Into<String>) -> Self {
        self.edit = EditStrategy::Named(name.into());
        self
    }

    /// Bind to the parent reference `relationship`
    pub fn belongs_to(mut self, relationship: impl Into<String>) -> Self {
        let request = self.request.get_or_insert_with(RelationshipRequest::default);
        request.relationship = Some(relationship.into());
        request.parent_only = true;
        self
    }

    /// Bind to any relationship of the entity by name
    pub fn relationship(mut self, relationship: impl Into<String>) -> Self {
        let request = self.request.get_or_insert_with(RelationshipRequest::default);
        request.relationship = Some(relationship.into());
        self
    }

    /// Label related rows with `field` instead of the heuristic choice
    ///
    /// Without `belongs_to`/`relationship`, binds the relationship whose field
    /// name matches the field this spec is registered under.
    pub fn display_field(mut self, field: impl Into<String>) -> Self {
        let request = self.request.get_or_insert_with(RelationshipRequest::default);
        request.display_field = Some(field.into());
        self
    }

    /// Narrow parent-reference dropdown choices to rows where `column = value`
    pub fn scope_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let request = self.request.get_or_insert_with(RelationshipRequest::default);
        request.scope.push((column.into(), value.into()));
        self
    }

    /// Whether this spec was synthesized from a relationship rather than declared
    pub fn is_auto_configured(&self) -> bool {
        self.origin == SpecOrigin::Auto
    }

    pub fn is_hidden_in(&self, context: RenderContext) -> bool {
        self.hidden_in.contains(&context)
    }

    pub fn parent_binding(&self) -> Option<&ParentRefBinding> {
        match &self.relationship {
            Some(RelationshipBinding::ParentRef(binding)) => Some(binding),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // FieldSpec Builder Tests
    // =========================================================================

    #[test]
    fn test_spec_defaults() {
        let spec = FieldSpec::new();
        assert!(spec.title.is_none());
        assert!(!spec.read_only);
        assert_eq!(spec.visible, Visibility::Default);
        assert!(spec.searchable.is_none());
        assert!(spec.filterable.is_none());
        assert!(!spec.display.is_custom());
        assert!(!spec.edit.is_custom());
        assert!(spec.relationship.is_none());
        assert!(!spec.is_auto_configured());
    }

    #[test]
    fn test_spec_builder() {
        let spec = FieldSpec::new()
            .title("X")
            .description("Shown under the input")
            .read_only()
            .hidden()
            .searchable(false)
            .filterable(true)
            .filter_kind(FilterKind::Select);

        assert_eq!(spec.title.as_deref(), Some("X"));
        assert_eq!(spec.description.as_deref(), Some("Shown under the input"));
        assert!(spec.read_only);
        assert_eq!(spec.visible, Visibility::Hidden);
        assert_eq!(spec.searchable, Some(false));
        assert_eq!(spec.filterable, Some(true));
        assert_eq!(spec.filter_kind, Some(FilterKind::Select));
    }

    #[test]
    fn test_hide_in_deduplicates() {
        let spec = FieldSpec::new()
            .hide_in(RenderContext::List)
            .hide_in(RenderContext::List);
        assert_eq!(spec.hidden_in, vec![RenderContext::List]);
        assert!(spec.is_hidden_in(RenderContext::List));
        assert!(!spec.is_hidden_in(RenderContext::Form));
    }

    #[test]
    fn test_relationship_request_accumulates() {
        let spec = FieldSpec::new()
            .belongs_to("author")
            .display_field("pen_name")
            .scope_eq("active", true);

        let request = spec.request.unwrap();
        assert_eq!(request.relationship.as_deref(), Some("author"));
        assert!(request.parent_only);
        assert_eq!(request.display_field.as_deref(), Some("pen_name"));
        assert_eq!(request.scope, vec![("active".to_string(), json!(true))]);
    }

    #[test]
    fn test_custom_display_callback() {
        let spec = FieldSpec::new().display(|value, _record| {
            Ok(format!("<{}>", value.and_then(Value::as_str).unwrap_or("")))
        });
        let DisplayStrategy::Custom(func) = &spec.display else {
            panic!("Expected custom display");
        };
        let text = func(Some(&json!("emma")), &Record::new()).unwrap();
        assert_eq!(text, "<emma>");
        assert_eq!(format!("{:?}", spec.display), "Custom(..)");
    }

    // =========================================================================
    // CallbackRegistry Tests
    // =========================================================================

    #[test]
    fn test_callback_registry_lookup() {
        let callbacks = CallbackRegistry::new()
            .display("upper", |value, _| {
                Ok(value.and_then(Value::as_str).unwrap_or("").to_uppercase())
            })
            .edit("plain", |_, _, form| {
                Ok(EditWidget::Custom {
                    name: form.input_name("notes"),
                    content: "<textarea></textarea>".to_string(),
                })
            });

        assert!(callbacks.display_fn("upper").is_some());
        assert!(callbacks.display_fn("missing").is_none());
        assert!(callbacks.edit_fn("plain").is_some());
        assert_eq!(
            format!("{:?}", callbacks),
            "CallbackRegistry { display: [\"upper\"], edit: [\"plain\"] }"
        );
    }

    #[test]
    fn test_filter_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&FilterKind::DateRange).unwrap(),
            "\"date_range\""
        );
        let option: FieldOption = serde_json::from_str(r#"{"label":"Draft","value":"draft"}"#).unwrap();
        assert_eq!(option, FieldOption::new("Draft", "draft"));
    }
}
