//! # runtara-object-admin
//!
//! Field configuration and identifier-safe dynamic queries for admin listings.
//!
//! This crate turns reflected table metadata plus a small amount of per-field
//! configuration into filtered, sorted, paginated listings and into display or
//! edit renderings of each field. Relationships found in the schema are
//! configured automatically; explicit configuration always wins.
//!
//! ## Features
//!
//! - **Schema Reflection**: Columns, computed attributes and relationships, from PostgreSQL or a static catalog
//! - **Field Registry**: Layered per-field configuration with relationship auto-configuration
//! - **Display-Field Heuristic**: Picks the column that labels a row in dropdowns and previews
//! - **Query Builder**: Search, typed filters, date ranges, whitelisted sorting and pagination
//! - **Rendering Dispatcher**: Display cells and edit widgets, with contained callback failures
//! - **SQL Injection Prevention**: Every identifier is whitelisted against the schema and quoted
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runtara_object_admin::{
//!     AdminStore, BaseCollection, EngineConfig, FieldRegistry, FieldSpec, NoPreferences,
//!     RelationLoader, RenderContext, Renderer, StoreConfig, build_query,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = AdminStore::new(StoreConfig::builder("postgres://localhost/library").build()).await?;
//!     let catalog = store.catalog(&EngineConfig::default()).await?;
//!
//!     let books = FieldRegistry::builder("books")
//!         .field("isbn", FieldSpec::new().title("ISBN").searchable(true))
//!         .field("author_id", FieldSpec::new().belongs_to("author").display_field("full_name"))
//!         .build(&catalog)?;
//!
//!     let (records, total) = build_query(
//!         &books,
//!         &store,
//!         &BaseCollection::all(),
//!         &json!({"q": "pride", "filter": {"available": "true"}}),
//!         &json!("-published_on"),
//!         &json!({"page": 1}),
//!         &NoPreferences,
//!     )
//!     .await?;
//!
//!     let relations = store.load_relations(&books, &records).await?;
//!     let renderer = Renderer::new(&books, &relations);
//!     for record in &records {
//!         for (field, cell) in renderer.render_row(record, RenderContext::List) {
//!             println!("{}: {}", field, cell.text);
//!         }
//!     }
//!     println!("{} matching books", total);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use runtara_object_admin::{EngineConfig, Environment, StoreConfig};
//!
//! let engine = EngineConfig::builder()
//!     .default_page_size(50)          // Rows per page without a request or stored preference
//!     .truncate_length(80)            // Long text is cut at this many characters
//!     .environment(Environment::Development) // Show callback errors instead of hiding them
//!     .build();
//!
//! let store = StoreConfig::builder("postgres://localhost/library")
//!     .schema("library")              // Schema holding the entity tables
//!     .max_choices(500)               // Cap on dropdown choices
//!     .build();
//! # assert_eq!(engine.default_page_size, 50);
//! # assert_eq!(store.schema, "library");
//! ```

pub mod autoconfig;
pub mod catalog;
pub mod config;
pub mod error;
pub mod field;
pub mod heuristic;
pub mod memory;
pub mod preferences;
pub mod query;
pub mod record;
pub mod registry;
pub mod render;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use catalog::{PgCatalog, SchemaReflector, StaticCatalog};
pub use config::{EngineConfig, EngineConfigBuilder, Environment, StoreConfig, StoreConfigBuilder};
pub use error::{AdminError, Result};
pub use field::{
    CallbackError, CallbackRegistry, DisplayStrategy, EditStrategy, FieldOption, FieldSpec, FilterKind,
    RelationshipBinding, RenderContext, Visibility,
};
pub use heuristic::best_display_field;
pub use memory::MemoryStore;
pub use preferences::{MemoryPreferences, NoPreferences, PagePreferences};
pub use query::{
    BaseCollection, FilterCriteria, FilterValue, ListingQuery, PageSpec, QueryBuilder, RecordSource, SortDirection,
    SortSpec, build_query,
};
pub use record::Record;
pub use registry::{FieldRegistry, FieldRegistryBuilder, FilterDescriptor, register_entity};
pub use render::{
    CellState, ChildSummary, EditWidget, FormContext, FormMode, InputKind, ListingLink, Presented, RelationCache,
    RelationLoader, RelationSource, Renderer, ValueSource,
};
pub use schema::{ComputedAttribute, EntityType, JoinTable, Relationship, RelationshipKind};
pub use store::AdminStore;
pub use types::{BindValue, ColumnDefinition, ColumnType};

// Re-export SQL utilities for advanced users
pub use sql::condition::{Predicate, build_condition_clause};
pub use sql::sanitize::{quote_identifier, validate_identifier};
