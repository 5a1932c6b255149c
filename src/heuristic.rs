//! Display-field heuristic: which column labels a related row

use crate::config::EngineConfig;
use crate::schema::EntityType;

/// Pick the column that best labels rows of `entity`
///
/// 1. the first configured preference that exists as a column, compared
///    case-insensitively and ignoring underscores (`displayName` matches `display_name`)
/// 2. the first text column that is neither the primary key nor an audit column
/// 3. the primary key
pub fn best_display_field(entity: &EntityType, config: &EngineConfig) -> String {
    for preference in &config.display_field_preferences {
        let wanted = normalize(preference);
        if let Some(col) = entity.columns().iter().find(|c| normalize(&c.name) == wanted) {
            return col.name.clone();
        }
    }

    entity
        .columns()
        .iter()
        .find(|c| {
            c.column_type.is_textual()
                && c.name != entity.primary_key()
                && !config.is_audit_column(&c.name)
        })
        .map(|c| c.name.clone())
        .unwrap_or_else(|| entity.primary_key().to_string())
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}
