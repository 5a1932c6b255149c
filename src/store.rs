//! AdminStore - PostgreSQL execution of listing queries and relation loading
//!
//! All SQL executed here is produced from validated [`EntityType`] metadata and
//! relationship bindings; request values only ever arrive as bound parameters.

use std::collections::HashMap;

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;

use crate::catalog::PgCatalog;
use crate::config::{EngineConfig, StoreConfig};
use crate::error::{AdminError, Result};
use crate::field::{CollectionBinding, FieldOption, ParentRefBinding, RelationshipBinding, SharedBinding};
use crate::query::{ListingQuery, RecordSource};
use crate::record::Record;
use crate::registry::FieldRegistry;
use crate::render::relations::{ChildSummary, RelationCache, RelationLoader, distinct_keys};
use crate::schema::EntityType;
use crate::sql::condition::{Predicate, build_condition_clause};
use crate::sql::sanitize::quote_identifier;
use crate::sql::select::{SqlStatement, qualified_table};
use crate::types::{BindValue, ColumnType};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL-backed record source and relation loader
///
/// Entity tables live in one configurable schema (default: `public`).
pub struct AdminStore {
    /// Database connection pool
    pool: PgPool,
    /// Store configuration
    config: StoreConfig,
}

impl AdminStore {
    /// Connect to the database described by `config`
    pub async fn new(config: StoreConfig) -> Result<Self> {
        let pool = PgPool::connect(&config.database_url)
            .await
            .map_err(|e| AdminError::Connection(format!("Database connection failed: {}", e)))?;

        Ok(Self { pool, config })
    }

    /// Create an AdminStore from an existing pool
    pub fn from_pool(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Introspect the configured schema
    pub async fn catalog(&self, config: &EngineConfig) -> Result<PgCatalog> {
        PgCatalog::load_with_config(&self.pool, &self.config.schema, config).await
    }

    fn table(&self, name: &str) -> String {
        qualified_table(Some(&self.config.schema), name)
    }

    async fn fetch_rows(&self, statement: &SqlStatement) -> Result<Vec<PgRow>> {
        debug!(sql = %statement.sql, params = statement.params.len(), "Executing query");
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = Self::bind_value(query, param);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    fn bind_value<'q>(query: PgQuery<'q>, value: &BindValue) -> PgQuery<'q> {
        match value {
            BindValue::Text(s) => query.bind(s.clone()),
            BindValue::Int(i) => query.bind(*i),
            BindValue::Float(f) => query.bind(*f),
            BindValue::Decimal(d) => query.bind(*d),
            BindValue::Bool(b) => query.bind(*b),
            BindValue::Date(d) => query.bind(*d),
            BindValue::Timestamp(ts) => query.bind(*ts),
            BindValue::Uuid(u) => query.bind(*u),
            BindValue::IntList(items) => query.bind(items.clone()),
            BindValue::DecimalList(items) => query.bind(items.clone()),
            BindValue::FloatList(items) => query.bind(items.clone()),
            BindValue::TextList(items) => query.bind(items.clone()),
        }
    }

    fn row_to_record(row: &PgRow, entity: &EntityType) -> Record {
        let mut record = Record::new();
        let columns = entity
            .columns()
            .iter()
            .map(|c| (c.name.as_str(), &c.column_type))
            .chain(entity.attributes().iter().map(|a| (a.name.as_str(), &a.column_type)));
        for (name, column_type) in columns {
            let value = Self::extract_column_value(row, name, column_type).unwrap_or(serde_json::Value::Null);
            record.insert(name, value);
        }
        record
    }

    fn extract_column_value(row: &PgRow, name: &str, column_type: &ColumnType) -> Option<serde_json::Value> {
        match column_type {
            ColumnType::String | ColumnType::Text | ColumnType::Enum { .. } => row
                .try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(serde_json::Value::String),
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(name)
                .or_else(|_| row.try_get::<Option<i32>, _>(name).map(|v| v.map(i64::from)))
                .or_else(|_| row.try_get::<Option<i16>, _>(name).map(|v| v.map(i64::from)))
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(serde_json::Number::from(v))),
            ColumnType::Float => row
                .try_get::<Option<f64>, _>(name)
                .or_else(|_| row.try_get::<Option<f32>, _>(name).map(|v| v.map(f64::from)))
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number),
            // decimals travel as strings so no precision is lost
            ColumnType::Decimal { .. } => row
                .try_get::<Option<rust_decimal::Decimal>, _>(name)
                .ok()
                .flatten()
                .map(|d| serde_json::Value::String(d.to_string())),
            ColumnType::Boolean => row
                .try_get::<Option<bool>, _>(name)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool),
            ColumnType::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(name)
                .ok()
                .flatten()
                .map(|d| serde_json::Value::String(d.format("%Y-%m-%d").to_string())),
            ColumnType::Timestamp => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)
                .or_else(|_| {
                    row.try_get::<Option<chrono::NaiveDateTime>, _>(name)
                        .map(|v| v.map(|naive| naive.and_utc()))
                })
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_rfc3339())),
            ColumnType::Json => row
                .try_get::<Option<serde_json::Value>, _>(name)
                .ok()
                .flatten(),
            ColumnType::Uuid => row
                .try_get::<Option<uuid::Uuid>, _>(name)
                .ok()
                .flatten()
                .map(|u| serde_json::Value::String(u.to_string())),
        }
    }

    // =========================================================================
    // Relation Loading
    // =========================================================================

    async fn load_parent_labels(
        &self,
        binding: &ParentRefBinding,
        records: &[Record],
        cache: &mut RelationCache,
    ) -> Result<()> {
        let keys = distinct_keys(records, &binding.foreign_key);
        if keys.is_empty() {
            return Ok(());
        }
        let key = quote_identifier(&binding.related_key);
        let statement = SqlStatement {
            sql: format!(
                "SELECT {key}::text AS \"key\", {label}::text AS \"label\" FROM {table} WHERE {key}::text = ANY($1)",
                key = key,
                label = quote_identifier(&binding.display_field),
                table = self.table(&binding.related),
            ),
            params: vec![BindValue::TextList(keys)],
        };
        for row in self.fetch_rows(&statement).await? {
            let (key, label) = key_and_label(&row)?;
            cache.insert_parent(&binding.relationship, key, label);
        }
        Ok(())
    }

    async fn load_children(
        &self,
        binding: &CollectionBinding,
        owners: &[String],
        cache: &mut RelationCache,
    ) -> Result<()> {
        let fk = quote_identifier(&binding.foreign_key);
        let pk = quote_identifier(&binding.related_key);
        let statement = SqlStatement {
            sql: format!(
                "SELECT \"owner\", \"key\", \"label\", \"total\" FROM (\
                 SELECT {fk}::text AS \"owner\", {pk}::text AS \"key\", {label}::text AS \"label\", \
                 COUNT(*) OVER (PARTITION BY {fk}) AS \"total\", \
                 ROW_NUMBER() OVER (PARTITION BY {fk} ORDER BY {pk}) AS \"rn\" \
                 FROM {table} WHERE {fk}::text = ANY($1)\
                 ) ranked WHERE \"rn\" <= GREATEST($2, 1) ORDER BY \"owner\", \"rn\"",
                fk = fk,
                pk = pk,
                label = quote_identifier(&binding.display_field),
                table = self.table(&binding.related),
            ),
            params: vec![
                BindValue::TextList(owners.to_vec()),
                BindValue::Int(binding.preview_limit as i64),
            ],
        };

        let mut summaries: HashMap<String, ChildSummary> = HashMap::new();
        for row in self.fetch_rows(&statement).await? {
            let owner: String = row.try_get("owner")?;
            let (_, label) = key_and_label(&row)?;
            let total: i64 = row.try_get("total")?;
            let summary = summaries.entry(owner).or_default();
            summary.count = total;
            if summary.labels.len() < binding.preview_limit {
                summary.labels.push(label);
            }
        }
        for (owner, summary) in summaries {
            cache.insert_children(&binding.relationship, owner, summary);
        }
        Ok(())
    }

    async fn load_shared(&self, binding: &SharedBinding, owners: &[String], cache: &mut RelationCache) -> Result<()> {
        let pk = quote_identifier(&binding.related_key);
        let statement = SqlStatement {
            sql: format!(
                "SELECT j.{local}::text AS \"owner\", r.{pk}::text AS \"key\", r.{label}::text AS \"label\" \
                 FROM {join} j JOIN {table} r ON r.{pk} = j.{remote} \
                 WHERE j.{local}::text = ANY($1) ORDER BY \"owner\", \"label\", \"key\"",
                local = quote_identifier(&binding.join.local_key),
                remote = quote_identifier(&binding.join.remote_key),
                pk = pk,
                label = quote_identifier(&binding.display_field),
                join = self.table(&binding.join.table),
                table = self.table(&binding.related),
            ),
            params: vec![BindValue::TextList(owners.to_vec())],
        };

        let mut items: HashMap<String, Vec<FieldOption>> = HashMap::new();
        for row in self.fetch_rows(&statement).await? {
            let owner: String = row.try_get("owner")?;
            let (key, label) = key_and_label(&row)?;
            items.entry(owner).or_default().push(FieldOption::new(label, key));
        }
        for (owner, options) in items {
            cache.insert_shared(&binding.relationship, owner, options);
        }
        Ok(())
    }

    async fn load_options(
        &self,
        related: &str,
        related_key: &str,
        display_field: &str,
        scope: Option<&Predicate>,
    ) -> Result<Vec<FieldOption>> {
        let mut params = Vec::new();
        let where_clause = match scope {
            Some(predicate) => build_condition_clause(predicate, &mut params),
            None => "TRUE".to_string(),
        };
        let sql = format!(
            "SELECT {key}::text AS \"key\", {label}::text AS \"label\" FROM {table} WHERE {where_clause} \
             ORDER BY \"label\", \"key\" LIMIT ${limit}",
            key = quote_identifier(related_key),
            label = quote_identifier(display_field),
            table = self.table(related),
            where_clause = where_clause,
            limit = params.len() + 1,
        );
        params.push(BindValue::Int(self.config.max_choices));

        let rows = self.fetch_rows(&SqlStatement { sql, params }).await?;
        let mut options = Vec::with_capacity(rows.len());
        for row in &rows {
            let (key, label) = key_and_label(row)?;
            options.push(FieldOption::new(label, key));
        }
        Ok(options)
    }
}

/// Key and label columns of a relation query; NULL labels become `#key`
fn key_and_label(row: &PgRow) -> Result<(String, String)> {
    let key: String = row.try_get("key")?;
    let label: Option<String> = row.try_get("label")?;
    let label = label.unwrap_or_else(|| format!("#{}", key));
    Ok((key, label))
}

impl RecordSource for AdminStore {
    async fn count(&self, query: &ListingQuery) -> Result<i64> {
        let statement = query.count_statement(Some(&self.config.schema));
        let rows = self.fetch_rows(&statement).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
            None => Ok(0),
        }
    }

    async fn fetch(&self, query: &ListingQuery) -> Result<Vec<Record>> {
        let statement = query.select_statement(Some(&self.config.schema));
        let rows = self.fetch_rows(&statement).await?;
        Ok(rows
            .iter()
            .map(|row| Self::row_to_record(row, &query.entity))
            .collect())
    }
}

impl RelationLoader for AdminStore {
    async fn load_relations(&self, registry: &FieldRegistry, records: &[Record]) -> Result<RelationCache> {
        let mut cache = RelationCache::new();
        let owners = distinct_keys(records, registry.entity().primary_key());

        for binding in registry.relationship_bindings() {
            match binding {
                RelationshipBinding::ParentRef(b) => self.load_parent_labels(b, records, &mut cache).await?,
                RelationshipBinding::OwnedMany(b) | RelationshipBinding::OwnedOne(b) => {
                    if !owners.is_empty() {
                        self.load_children(b, &owners, &mut cache).await?;
                    }
                }
                RelationshipBinding::SharedMany(b) => {
                    if !owners.is_empty() {
                        self.load_shared(b, &owners, &mut cache).await?;
                    }
                }
            }
        }
        Ok(cache)
    }

    async fn load_choices(&self, registry: &FieldRegistry, cache: &mut RelationCache) -> Result<()> {
        for binding in registry.relationship_bindings() {
            let options = match binding {
                RelationshipBinding::ParentRef(b) => {
                    self.load_options(&b.related, &b.related_key, &b.display_field, b.scope.as_ref())
                        .await?
                }
                RelationshipBinding::SharedMany(b) => {
                    self.load_options(&b.related, &b.related_key, &b.display_field, None)
                        .await?
                }
                _ => continue,
            };
            cache.insert_choices(binding.relationship(), options);
        }
        Ok(())
    }
}
