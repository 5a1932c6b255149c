//! SQL utilities for the admin engine
//!
//! Provides identifier sanitization, the predicate AST and listing statement assembly.

pub mod condition;
pub mod sanitize;
pub mod select;

pub use condition::{CompareOp, Predicate, build_condition_clause};
pub use sanitize::{escape_like, quote_identifier, validate_identifier};
pub use select::{SqlStatement, build_order_by_clause, qualified_table};
