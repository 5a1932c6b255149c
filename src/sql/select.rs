//! SELECT and COUNT statement assembly for listing queries

use crate::query::{ListingQuery, OrderTerm};
use crate::schema::EntityType;
use crate::sql::condition::build_condition_clause;
use crate::sql::sanitize::quote_identifier;
use crate::types::{BindValue, ColumnType};

/// SQL text plus the values bound to its `$n` placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<BindValue>,
}

/// Quoted table reference, schema-qualified when a schema is given
pub fn qualified_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

/// Columns and computed attributes of `entity`, in declaration order
///
/// Enum columns are read through their text form.
pub fn select_list(entity: &EntityType) -> String {
    let mut items: Vec<String> = entity
        .columns()
        .iter()
        .map(|c| match c.column_type {
            ColumnType::Enum { .. } => {
                let name = quote_identifier(&c.name);
                format!("{}::text AS {}", name, name)
            }
            _ => quote_identifier(&c.name),
        })
        .collect();
    for attr in entity.attributes() {
        items.push(format!("({}) AS {}", attr.sql, quote_identifier(&attr.name)));
    }
    items.join(", ")
}

/// Build the ORDER BY clause body (without the keywords)
///
/// Every term comes from a validated column or attribute reference.
pub fn build_order_by_clause(order: &[OrderTerm]) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    let terms: Vec<String> = order
        .iter()
        .map(|term| format!("{} {}", term.column.to_sql(), term.direction.as_sql()))
        .collect();
    Some(terms.join(", "))
}

impl ListingQuery {
    /// Page query: filtered, ordered, limited and offset
    pub fn select_statement(&self, schema: Option<&str>) -> SqlStatement {
        let mut params = Vec::new();
        let where_clause = build_condition_clause(&self.predicate, &mut params);

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            select_list(&self.entity),
            qualified_table(schema, self.entity.name()),
            where_clause
        );

        if let Some(order_by) = build_order_by_clause(&self.order) {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by);
        }

        sql.push_str(&format!(
            " LIMIT ${} OFFSET ${}",
            params.len() + 1,
            params.len() + 2
        ));
        params.push(BindValue::Int(self.limit));
        params.push(BindValue::Int(self.offset));

        SqlStatement { sql, params }
    }

    /// Total-count query over the same predicate, before pagination
    pub fn count_statement(&self, schema: Option<&str>) -> SqlStatement {
        let mut params = Vec::new();
        let where_clause = build_condition_clause(&self.predicate, &mut params);
        SqlStatement {
            sql: format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                qualified_table(schema, self.entity.name()),
                where_clause
            ),
            params,
        }
    }
}
