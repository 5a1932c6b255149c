//! Rendering Dispatcher
//!
//! Turns one `(record, field)` pair into a [`Presented`] cell or an
//! [`EditWidget`], picking the strategy from the layered field configuration:
//! custom callback, relationship renderer, options, then a column-type default.
//! Callback failures are contained here and never abort the surrounding render.

mod display;
mod edit;
pub mod relations;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::{Deserialize, Serialize};

use crate::field::{CallbackError, FieldOption, RenderContext};
use crate::record::Record;
use crate::registry::FieldRegistry;

pub use relations::{ChildSummary, RelationCache, RelationLoader, RelationSource};

/// How a rendered cell relates to its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    Value,
    /// NULL, absent, or an empty relation
    Empty,
    /// Foreign key set but the referenced row is gone
    NotFound,
    /// A custom callback failed; the text is the fallback
    Failed,
}

/// Where a rendered value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Looked up from related rows
    Relationship,
    /// A stored column
    Column,
    /// A custom callback or computed attribute
    Computed,
}

/// Link to a filtered listing of another entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingLink {
    pub entity: String,
    pub field: String,
    pub value: String,
}

/// Display-ready value of one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presented {
    pub text: String,
    pub state: CellState,
    pub source: ValueSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<ListingLink>,
}

impl Presented {
    pub fn new(text: impl Into<String>, state: CellState, source: ValueSource) -> Self {
        Self {
            text: text.into(),
            state,
            source,
            link: None,
        }
    }

    pub fn with_link(mut self, link: ListingLink) -> Self {
        self.link = Some(link);
        self
    }
}

/// Whether a form creates or updates a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMode {
    #[default]
    Create,
    Update,
}

/// Form-level data passed to edit renderers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormContext {
    /// Prefix of every input name, `object[field]`
    pub object_name: String,
    pub mode: FormMode,
}

impl FormContext {
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            mode: FormMode::Create,
        }
    }

    pub fn update(mut self) -> Self {
        self.mode = FormMode::Update;
        self
    }

    pub fn input_name(&self, field: &str) -> String {
        format!("{}[{}]", self.object_name, field)
    }

    /// Input name of a multi-valued field, `object[field][]`
    pub fn multi_input_name(&self, field: &str) -> String {
        format!("{}[{}][]", self.object_name, field)
    }
}

/// HTML-agnostic input kind for type-default widgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    TextArea,
    Number,
    Decimal,
    Date,
    DateTime,
}

/// Editable representation of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum EditWidget {
    ReadOnly {
        text: String,
    },
    Input {
        name: String,
        kind: InputKind,
        value: String,
    },
    Checkbox {
        name: String,
        checked: bool,
    },
    Select {
        name: String,
        options: Vec<FieldOption>,
        selected: Option<String>,
        placeholder: Option<String>,
    },
    MultiSelect {
        name: String,
        options: Vec<FieldOption>,
        selected: Vec<String>,
    },
    /// Markup produced by a custom edit callback
    Custom {
        name: String,
        content: String,
    },
    /// A failed edit callback, shown outside production
    Error {
        name: String,
        message: String,
    },
}

/// Renders cells and form fields of one registered entity
pub struct Renderer<'a> {
    registry: &'a FieldRegistry,
    relations: &'a dyn RelationSource,
}

impl<'a> Renderer<'a> {
    pub fn new(registry: &'a FieldRegistry, relations: &'a dyn RelationSource) -> Self {
        Self {
            registry,
            relations,
        }
    }

    pub fn registry(&self) -> &FieldRegistry {
        self.registry
    }

    /// Visible fields of `context` rendered for display, in column-selector order
    pub fn render_row(&self, record: &Record, context: RenderContext) -> Vec<(String, Presented)> {
        self.registry
            .visible_fields(context)
            .into_iter()
            .map(|field| {
                let cell = self.render_display(record, &field);
                (field, cell)
            })
            .collect()
    }

    /// Visible form fields rendered for editing
    pub fn render_form(&self, record: &Record, form: &FormContext) -> Vec<(String, EditWidget)> {
        self.registry
            .visible_fields(RenderContext::Form)
            .into_iter()
            .map(|field| {
                let widget = self.render_edit(record, &field, form);
                (field, widget)
            })
            .collect()
    }
}

/// Run a callback, turning both errors and panics into a message
fn guarded<T>(call: impl FnOnce() -> Result<T, CallbackError>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("callback panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("callback panicked: {}", msg)
    } else {
        "callback panicked".to_string()
    }
}
