//! Configuration for the admin engine and its PostgreSQL store
//!
//! Both configurations use the builder pattern and are constructed once,
//! then shared by reference with the registry, query builder and renderer.

use serde::{Deserialize, Serialize};

/// Deployment environment, controls how callback failures are surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Callback errors are shown inline in the rendered cell or form field
    Development,
    /// Callback errors fall back to the nearest safe default
    #[default]
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Engine-wide defaults for field discovery, querying and rendering
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Column-name suffixes that mark audit columns, hidden and unsearched by default
    pub audit_suffixes: Vec<String>,
    /// Ordered candidates for a related entity's label field
    pub display_field_preferences: Vec<String>,
    /// Page size used when neither the request nor a stored preference supplies one
    pub default_page_size: u32,
    /// Upper bound applied to any requested page size
    pub max_page_size: u32,
    /// Maximum characters of a displayed value before truncation
    pub truncate_length: usize,
    /// Number of related labels previewed for owned collections
    pub preview_limit: usize,
    /// Deployment environment
    pub environment: Environment,
    /// Glyph shown for null values
    pub empty_placeholder: String,
    /// Glyph shown for `true`
    pub true_glyph: String,
    /// Glyph shown for `false`
    pub false_glyph: String,
    /// Text shown when an owned single relation is absent
    pub none_placeholder: String,
    /// chrono format for date columns
    pub date_format: String,
    /// chrono format for timestamp columns
    pub datetime_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigBuilder::new().build()
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Whether a column name ends in one of the configured audit suffixes
    pub fn is_audit_column(&self, name: &str) -> bool {
        self.audit_suffixes
            .iter()
            .any(|suffix| !suffix.is_empty() && name.ends_with(suffix.as_str()))
    }
}

/// Builder for EngineConfig
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                audit_suffixes: vec!["_at".to_string()],
                display_field_preferences: [
                    "name",
                    "title",
                    "display_name",
                    "full_name",
                    "label",
                    "description",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                default_page_size: 25,
                max_page_size: 500,
                truncate_length: 50,
                preview_limit: 3,
                environment: Environment::Production,
                empty_placeholder: "-".to_string(),
                true_glyph: "✓".to_string(),
                false_glyph: "✗".to_string(),
                none_placeholder: "None".to_string(),
                date_format: "%b %d, %Y".to_string(),
                datetime_format: "%b %d, %Y %H:%M".to_string(),
            },
        }
    }

    /// Replace the audit suffix list (default: `["_at"]`)
    pub fn audit_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.audit_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the display-field preference list
    pub fn display_field_preferences<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.display_field_preferences = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the default page size (default: 25)
    pub fn default_page_size(mut self, size: u32) -> Self {
        self.config.default_page_size = size.max(1);
        self
    }

    /// Set the maximum page size (default: 500)
    pub fn max_page_size(mut self, size: u32) -> Self {
        self.config.max_page_size = size.max(1);
        self
    }

    /// Set the display truncation length in characters (default: 50)
    pub fn truncate_length(mut self, length: usize) -> Self {
        self.config.truncate_length = length;
        self
    }

    /// Set how many related labels owned collections preview (default: 3)
    pub fn preview_limit(mut self, limit: usize) -> Self {
        self.config.preview_limit = limit;
        self
    }

    /// Set the deployment environment (default: production)
    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    /// Set the glyph used for null values (default: "-")
    pub fn empty_placeholder(mut self, glyph: impl Into<String>) -> Self {
        self.config.empty_placeholder = glyph.into();
        self
    }

    /// Set the glyphs used for booleans
    pub fn boolean_glyphs(mut self, true_glyph: impl Into<String>, false_glyph: impl Into<String>) -> Self {
        self.config.true_glyph = true_glyph.into();
        self.config.false_glyph = false_glyph.into();
        self
    }

    /// Set the text shown for an absent owned single relation (default: "None")
    pub fn none_placeholder(mut self, text: impl Into<String>) -> Self {
        self.config.none_placeholder = text.into();
        self
    }

    /// Set the chrono format used for date columns
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.config.date_format = format.into();
        self
    }

    /// Set the chrono format used for timestamp columns
    pub fn datetime_format(mut self, format: impl Into<String>) -> Self {
        self.config.datetime_format = format.into();
        self
    }

    pub fn build(self) -> EngineConfig {
        let mut config = self.config;
        if config.max_page_size < config.default_page_size {
            config.max_page_size = config.default_page_size;
        }
        config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL database URL
    pub database_url: String,
    /// Database schema that holds the entity tables (default: "public")
    pub schema: String,
    /// Maximum rows loaded as dropdown choices per relationship (default: 1000)
    pub max_choices: i64,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(database_url)
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    database_url: String,
    schema: String,
    max_choices: i64,
}

impl StoreConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            schema: "public".to_string(),
            max_choices: 1000,
        }
    }

    /// Set the database schema (default: "public")
    pub fn schema(mut self, name: impl Into<String>) -> Self {
        self.schema = name.into();
        self
    }

    /// Set the dropdown choice cap (default: 1000)
    pub fn max_choices(mut self, limit: i64) -> Self {
        self.max_choices = limit.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url,
            schema: self.schema,
            max_choices: self.max_choices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // EngineConfig Tests
    // =========================================================================

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.audit_suffixes, vec!["_at"]);
        assert_eq!(config.display_field_preferences[0], "name");
        assert_eq!(config.display_field_preferences.len(), 6);
        assert_eq!(config.default_page_size, 25);
        assert_eq!(config.max_page_size, 500);
        assert_eq!(config.truncate_length, 50);
        assert_eq!(config.preview_limit, 3);
        assert!(config.environment.is_production());
    }

    #[test]
    fn test_audit_column_detection() {
        let config = EngineConfig::default();

        assert!(config.is_audit_column("created_at"));
        assert!(config.is_audit_column("updated_at"));
        assert!(!config.is_audit_column("title"));
        assert!(!config.is_audit_column("attachment"));
    }

    #[test]
    fn test_custom_audit_suffixes() {
        let config = EngineConfig::builder()
            .audit_suffixes(["_at", "_on"])
            .build();

        assert!(config.is_audit_column("published_on"));
        assert!(config.is_audit_column("created_at"));
    }

    #[test]
    fn test_empty_suffix_matches_nothing() {
        let config = EngineConfig::builder().audit_suffixes([""]).build();
        assert!(!config.is_audit_column("title"));
    }

    #[test]
    fn test_max_page_size_never_below_default() {
        let config = EngineConfig::builder()
            .default_page_size(100)
            .max_page_size(10)
            .build();

        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn test_zero_page_size_clamped() {
        let config = EngineConfig::builder().default_page_size(0).build();
        assert_eq!(config.default_page_size, 1);
    }

    #[test]
    fn test_development_environment() {
        let config = EngineConfig::builder()
            .environment(Environment::Development)
            .build();
        assert!(!config.environment.is_production());
    }

    #[test]
    fn test_glyph_overrides() {
        let config = EngineConfig::builder()
            .empty_placeholder("n/a")
            .boolean_glyphs("yes", "no")
            .none_placeholder("(none)")
            .build();

        assert_eq!(config.empty_placeholder, "n/a");
        assert_eq!(config.true_glyph, "yes");
        assert_eq!(config.false_glyph, "no");
        assert_eq!(config.none_placeholder, "(none)");
    }

    // =========================================================================
    // StoreConfig Tests
    // =========================================================================

    #[test]
    fn test_store_defaults() {
        let config = StoreConfig::builder("postgres://localhost/test").build();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.schema, "public");
        assert_eq!(config.max_choices, 1000);
    }

    #[test]
    fn test_store_custom() {
        let config = StoreConfig::builder(String::from("postgres://localhost/db"))
            .schema("admin")
            .max_choices(0)
            .build();

        assert_eq!(config.schema, "admin");
        assert_eq!(config.max_choices, 1);
    }

    #[test]
    fn test_environment_serialization() {
        let json = serde_json::to_string(&Environment::Development).unwrap();
        assert_eq!(json, "\"development\"");
    }
}
