//! Query Builder: search, filters, sort and pagination over one entity
//!
//! Raw request parameters arrive as decoded JSON. Every field name in them is
//! resolved through the entity's whitelist before it can contribute to a
//! predicate or ORDER BY term; anything that does not resolve, parse or
//! coerce is dropped with a debug log and the query continues without it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::field::FilterKind;
use crate::preferences::PagePreferences;
use crate::record::{Record, key_text};
use crate::registry::FieldRegistry;
use crate::schema::{ColumnRef, EntityType};
use crate::sql::condition::Predicate;
use crate::types::{BindValue, ColumnType, is_date_only, parse_date, parse_timestamp};

// ============================================================================
// Filter Criteria
// ============================================================================

/// One raw filter input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    List(Vec<String>),
    Range {
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },
}

impl FilterValue {
    /// Decode a query-string value; `None` for nulls and unrecognized shapes
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(FilterValue::List(items.iter().filter_map(key_text).collect())),
            Value::Object(map) if map.contains_key("from") || map.contains_key("to") => {
                Some(FilterValue::Range {
                    from: map.get("from").and_then(key_text),
                    to: map.get("to").and_then(key_text),
                })
            }
            other => key_text(other).map(FilterValue::Single),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            FilterValue::Single(raw) => raw.trim().is_empty(),
            FilterValue::List(items) => items.iter().all(|item| item.trim().is_empty()),
            FilterValue::Range { from, to } => {
                from.as_deref().is_none_or(|s| s.trim().is_empty())
                    && to.as_deref().is_none_or(|s| s.trim().is_empty())
            }
        }
    }

    fn as_single(&self) -> Option<&str> {
        match self {
            FilterValue::Single(raw) => Some(raw),
            _ => None,
        }
    }
}

/// Search text plus per-field filters for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub query: Option<String>,
    pub filters: BTreeMap<String, FilterValue>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `{"q": "...", "filter": {field: value}}`
    pub fn from_params(params: &Value) -> Self {
        let query = params
            .get("q")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut filters = BTreeMap::new();
        if let Some(Value::Object(map)) = params.get("filter") {
            for (field, raw) in map {
                match FilterValue::from_json(raw) {
                    Some(value) => {
                        filters.insert(field.clone(), value);
                    }
                    None => debug!(field = %field, "Ignoring filter value of unsupported shape"),
                }
            }
        }

        Self { query, filters }
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), FilterValue::Single(value.into()));
        self
    }

    /// Set-membership filter
    pub fn filter_any<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.insert(field.into(), FilterValue::List(values));
        self
    }

    /// Inclusive date range; either bound may be open
    pub fn filter_range(mut self, field: impl Into<String>, from: Option<&str>, to: Option<&str>) -> Self {
        self.filters.insert(
            field.into(),
            FilterValue::Range {
                from: from.map(str::to_string),
                to: to.map(str::to_string),
            },
        );
        self
    }
}

// ============================================================================
// Sort and Page
// ============================================================================

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Asc),
            "desc" | "descending" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Requested sort column and direction, not yet validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Desc)
    }

    /// Decode `{"sort": "title", "direction": "desc"}`, `{"sort": "-title"}` or `"title"`
    ///
    /// A missing or unrecognized direction takes `fallback`'s direction.
    pub fn from_params(params: &Value, fallback: &SortSpec) -> Option<Self> {
        let (raw_column, raw_direction) = match params {
            Value::String(column) => (column.as_str(), None),
            Value::Object(map) => (
                map.get("sort").and_then(Value::as_str)?,
                map.get("direction").and_then(Value::as_str),
            ),
            _ => return None,
        };

        let raw_column = raw_column.trim();
        let (column, prefixed) = match raw_column.strip_prefix('-') {
            Some(rest) => (rest, Some(SortDirection::Desc)),
            None => (raw_column, None),
        };
        if column.is_empty() {
            return None;
        }

        let direction = raw_direction
            .and_then(SortDirection::parse)
            .or(prefixed)
            .unwrap_or(fallback.direction);
        Some(Self::new(column, direction))
    }
}

/// Resolved page number and size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpec {
    /// 1-based
    pub page: u32,
    pub per_page: u32,
}

impl PageSpec {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    /// Decode `{"page": 2, "per_page": 50}`
    ///
    /// The page size comes from the request, else `stored`, else the configured
    /// default, and is capped at the configured maximum. Page numbers below 1 or
    /// that fail to parse become 1.
    pub fn resolve(params: &Value, stored: Option<u32>, config: &EngineConfig) -> Self {
        let page = positive(params.get("page")).unwrap_or(1);
        let per_page = positive(params.get("per_page"))
            .or(stored.filter(|size| *size > 0))
            .unwrap_or(config.default_page_size)
            .min(config.max_page_size);
        Self::new(page, per_page)
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

fn positive(value: Option<&Value>) -> Option<u32> {
    let number = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(number).ok().filter(|n| *n > 0)
}

// ============================================================================
// Base Collection
// ============================================================================

/// Listing scoped to the children of one parent row
#[derive(Debug, Clone, PartialEq)]
pub struct ParentScope {
    /// Foreign-key column holding the parent reference
    pub foreign_key: String,
    pub value: Value,
}

/// Integrator-provided starting point of a listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseCollection {
    /// Predicates applied to every listing (soft delete, tenancy)
    pub scopes: Vec<Predicate>,
    pub parent: Option<ParentScope>,
}

impl BaseCollection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn scope(mut self, predicate: Predicate) -> Self {
        self.scopes.push(predicate);
        self
    }

    /// Only rows whose `foreign_key` references `value`
    pub fn within_parent(mut self, foreign_key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parent = Some(ParentScope {
            foreign_key: foreign_key.into(),
            value: value.into(),
        });
        self
    }
}

// ============================================================================
// Listing Query
// ============================================================================

/// One ORDER BY term over a whitelisted reference
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

/// Fully validated listing query, ready to render as SQL or evaluate in memory
#[derive(Debug, Clone, PartialEq)]
pub struct ListingQuery {
    pub entity: Arc<EntityType>,
    pub predicate: Predicate,
    pub order: Vec<OrderTerm>,
    pub limit: i64,
    pub offset: i64,
}

/// Backing store that executes listing queries
pub trait RecordSource: Send + Sync {
    /// Rows matching the predicate, ignoring order and pagination
    fn count(&self, query: &ListingQuery) -> impl Future<Output = Result<i64>> + Send;

    /// One page of matching rows in query order
    fn fetch(&self, query: &ListingQuery) -> impl Future<Output = Result<Vec<Record>>> + Send;
}

/// Turns request input into a [`ListingQuery`] for one registered entity
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    registry: &'a FieldRegistry,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(registry: &'a FieldRegistry) -> Self {
        Self { registry }
    }

    /// Compose the listing query from the base collection and the request
    pub fn plan(
        &self,
        base: &BaseCollection,
        criteria: &FilterCriteria,
        sort: Option<&SortSpec>,
        page: PageSpec,
    ) -> ListingQuery {
        let mut predicates = base.scopes.clone();
        predicates.extend(base.parent.as_ref().and_then(|p| self.parent_predicate(p)));
        predicates.extend(self.search_predicate(criteria.query.as_deref()));
        predicates.extend(self.field_predicates(&criteria.filters));
        predicates.extend(self.date_range_predicates(&criteria.filters));

        ListingQuery {
            entity: self.registry.entity().clone(),
            predicate: Predicate::and(predicates),
            order: self.order_terms(sort),
            limit: page.limit(),
            offset: page.offset(),
        }
    }

    fn entity_name(&self) -> &str {
        self.registry.entity().name()
    }

    fn parent_predicate(&self, scope: &ParentScope) -> Option<Predicate> {
        let entity = self.registry.entity();
        if entity.parent_ref_for(&scope.foreign_key).is_none() {
            debug!(
                entity = %self.entity_name(),
                foreign_key = %scope.foreign_key,
                "Ignoring parent scope on a column that is not a parent reference"
            );
            return None;
        }
        let column = entity.column_ref(&scope.foreign_key)?;
        match column.column_type().coerce_json(&scope.value) {
            Some(value) => Some(Predicate::eq(column, value)),
            None => {
                debug!(
                    entity = %self.entity_name(),
                    foreign_key = %scope.foreign_key,
                    value = %scope.value,
                    "Ignoring parent scope with a value of the wrong type"
                );
                None
            }
        }
    }

    fn search_predicate(&self, query: Option<&str>) -> Option<Predicate> {
        let query = query.map(str::trim).filter(|q| !q.is_empty())?;
        let columns = self.registry.searchable_columns();
        if columns.is_empty() {
            debug!(entity = %self.entity_name(), "Search requested but no field is searchable");
            return None;
        }
        Some(Predicate::or(
            columns
                .into_iter()
                .map(|column| Predicate::contains(column, query)),
        ))
    }

    fn field_predicates(&self, filters: &BTreeMap<String, FilterValue>) -> Vec<Predicate> {
        let mut predicates = Vec::new();
        for (field, value) in filters {
            let Some(column) = self.registry.filter_ref(field) else {
                if self.range_companion(field).is_none() {
                    debug!(entity = %self.entity_name(), field = %field, "Ignoring unknown filter field");
                }
                continue;
            };
            if value.is_blank() {
                debug!(entity = %self.entity_name(), field = %field, "Ignoring blank filter value");
                continue;
            }

            let kind = self.registry.filter_kind(field).unwrap_or(FilterKind::Select);
            let predicate = match value {
                // ranges are applied with the companion keys
                FilterValue::Range { .. } => continue,
                FilterValue::List(items) => self.membership(field, column, items),
                FilterValue::Single(raw) => self.single(field, column, kind, raw.trim()),
            };
            predicates.extend(predicate);
        }
        predicates
    }

    fn single(&self, field: &str, column: ColumnRef, kind: FilterKind, raw: &str) -> Option<Predicate> {
        let predicate = match kind {
            FilterKind::Text => Some(Predicate::contains(column, raw)),
            FilterKind::DateRange => {
                // a single date selects that whole day
                let lower = date_bound(&column, raw)?;
                let upper = lower.clone();
                Some(Predicate::and([
                    Predicate::gte(column.clone(), lower),
                    Predicate::lte(column, upper),
                ]))
            }
            FilterKind::Boolean | FilterKind::Select => column
                .column_type()
                .coerce(raw)
                .map(|value| Predicate::eq(column, value)),
        };
        if predicate.is_none() {
            debug!(
                entity = %self.entity_name(),
                field = %field,
                value = %raw,
                "Ignoring filter value that does not match the column type"
            );
        }
        predicate
    }

    fn membership(&self, field: &str, column: ColumnRef, items: &[String]) -> Option<Predicate> {
        let mut values = Vec::with_capacity(items.len());
        for item in items.iter().filter(|item| !item.trim().is_empty()) {
            match column.column_type().coerce(item) {
                Some(value) => values.push(value),
                None => debug!(
                    entity = %self.entity_name(),
                    field = %field,
                    value = %item,
                    "Ignoring list filter item that does not match the column type"
                ),
            }
        }
        if values.is_empty() {
            return None;
        }
        Some(Predicate::in_list(column, values))
    }

    /// Temporal field a companion key such as `hire_dateFrom` bounds, if any
    fn range_companion(&self, key: &str) -> Option<String> {
        ["From", "To", "_from", "_to"].iter().find_map(|suffix| {
            let field = key.strip_suffix(suffix)?;
            self.registry
                .filter_ref(field)
                .filter(|c| c.column_type().is_temporal())
                .map(|_| field.to_string())
        })
    }

    fn date_range_predicates(&self, filters: &BTreeMap<String, FilterValue>) -> Vec<Predicate> {
        let mut predicates = Vec::new();
        for column in self.registry.filterable_temporal_refs() {
            let field = column.name().to_string();
            let (mut from, mut to) = (None, None);
            if let Some(FilterValue::Range { from: f, to: t }) = filters.get(&field) {
                from = f.clone();
                to = t.clone();
            }
            let companion = |suffixes: [&str; 2]| {
                suffixes.iter().find_map(|suffix| {
                    filters
                        .get(&format!("{}{}", field, suffix))
                        .and_then(FilterValue::as_single)
                        .map(str::to_string)
                })
            };
            from = from.or_else(|| companion(["From", "_from"]));
            to = to.or_else(|| companion(["To", "_to"]));

            for (raw, lower) in [(from, true), (to, false)] {
                let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
                    continue;
                };
                match date_bound(&column, &raw) {
                    Some(bound) if lower => predicates.push(Predicate::gte(column.clone(), bound)),
                    Some(bound) => predicates.push(Predicate::lte(column.clone(), bound)),
                    None => debug!(
                        entity = %self.entity_name(),
                        field = %field,
                        value = %raw,
                        "Ignoring malformed date bound"
                    ),
                }
            }
        }
        predicates
    }

    fn order_terms(&self, sort: Option<&SortSpec>) -> Vec<OrderTerm> {
        let entity = self.registry.entity();
        let fallback = self.registry.default_sort();

        let requested = sort.and_then(|spec| match entity.sortable_ref(&spec.column) {
            Some(column) => Some((column, spec.direction)),
            None => {
                debug!(
                    entity = %self.entity_name(),
                    column = %spec.column,
                    "Ignoring sort on unknown column, using default"
                );
                None
            }
        });
        let Some((column, direction)) = requested
            .or_else(|| entity.sortable_ref(&fallback.column).map(|c| (c, fallback.direction)))
        else {
            return vec![OrderTerm {
                column: entity.primary_key_ref(),
                direction: SortDirection::Asc,
            }];
        };

        let mut order = Vec::with_capacity(2);
        let is_primary_key = !column.is_computed() && column.name() == entity.primary_key();
        order.push(OrderTerm { column, direction });
        if !is_primary_key {
            order.push(OrderTerm {
                column: entity.primary_key_ref(),
                direction: SortDirection::Asc,
            });
        }
        order
    }
}

/// Parse a range bound for a temporal column
///
/// Date-only input against a timestamp column stays a date so the bound is
/// compared by calendar day.
fn date_bound(column: &ColumnRef, raw: &str) -> Option<BindValue> {
    match column.column_type() {
        ColumnType::Date => parse_date(raw).map(BindValue::Date),
        ColumnType::Timestamp if is_date_only(raw) => parse_date(raw).map(BindValue::Date),
        ColumnType::Timestamp => parse_timestamp(raw).map(BindValue::Timestamp),
        _ => None,
    }
}

/// Run a listing request end to end: count, then fetch one page
///
/// `raw_filter`, `raw_sort` and `raw_page` are the decoded request parameters.
/// Returns the page of records and the total number of matching rows.
pub async fn build_query<S>(
    registry: &FieldRegistry,
    source: &S,
    base: &BaseCollection,
    raw_filter: &Value,
    raw_sort: &Value,
    raw_page: &Value,
    preferences: &dyn PagePreferences,
) -> Result<(Vec<Record>, i64)>
where
    S: RecordSource,
{
    let criteria = FilterCriteria::from_params(raw_filter);
    let sort = SortSpec::from_params(raw_sort, registry.default_sort());
    let stored = preferences.page_size(registry.entity().name());
    let page = PageSpec::resolve(raw_page, stored, registry.config());

    let query = QueryBuilder::new(registry).plan(base, &criteria, sort.as_ref(), page);

    let total = source.count(&query).await?;
    if total == 0 {
        return Ok((Vec::new(), 0));
    }
    let records = source.fetch(&query).await?;
    Ok((records, total))
}
