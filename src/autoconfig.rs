//! Relationship auto-configuration
//!
//! Synthesizes a [`FieldSpec`] for every relationship of an entity that has no
//! spec yet. Existing specs are never touched, so explicit configuration wins
//! whether it is registered before or after this pass.

use crate::config::EngineConfig;
use crate::field::{
    CollectionBinding, FieldSpec, FilterKind, ParentRefBinding, RelationshipBinding, SharedBinding,
    SpecOrigin,
};
use crate::heuristic::best_display_field;
use crate::registry::FieldRegistry;
use crate::schema::{EntityType, Relationship, RelationshipKind};
use crate::sql::condition::Predicate;

/// Register default specs for unconfigured relationships, returning how many were added
pub fn auto_configure(registry: &mut FieldRegistry) -> usize {
    let entity = registry.entity().clone();
    let mut added = 0;

    for rel in entity.relationships() {
        let field = rel.field_name();
        if registry.contains(field) {
            continue;
        }
        let Some(related) = registry.related_entity(&rel.related).cloned() else {
            continue;
        };

        let spec = default_spec(rel, &related, registry.config());
        registry.insert_auto(field.to_string(), spec);
        added += 1;
    }

    added
}

/// Default spec for one relationship
///
/// - parent reference: dropdown labelled by the related display field
/// - owned collection / owned row: read-only count and preview
/// - shared collection: read-only comma-joined labels
pub fn default_spec(
    rel: &Relationship,
    related: &EntityType,
    config: &EngineConfig,
) -> FieldSpec {
    let binding = bind_relationship(rel, related, None, None, config);
    let mut spec = FieldSpec {
        relationship: Some(binding),
        origin: SpecOrigin::Auto,
        ..FieldSpec::default()
    };

    match rel.kind {
        RelationshipKind::ParentRef { .. } => {
            spec.filter_kind = Some(FilterKind::Select);
        }
        RelationshipKind::OwnedMany { .. } | RelationshipKind::OwnedOne { .. } => {
            spec.read_only = true;
            spec.searchable = Some(false);
            spec.filterable = Some(false);
        }
        RelationshipKind::SharedMany { .. } => {
            spec.read_only = true;
            spec.searchable = Some(false);
            spec.filterable = Some(false);
        }
    }

    spec
}

/// Build the binding for `rel`, using the heuristic display field unless one is given
pub(crate) fn bind_relationship(
    rel: &Relationship,
    related: &EntityType,
    display_field: Option<String>,
    scope: Option<Predicate>,
    config: &EngineConfig,
) -> RelationshipBinding {
    let display_field = display_field.unwrap_or_else(|| best_display_field(related, config));
    let related_key = related.primary_key().to_string();

    match &rel.kind {
        RelationshipKind::ParentRef { foreign_key } => {
            RelationshipBinding::ParentRef(ParentRefBinding {
                relationship: rel.name.clone(),
                related: rel.related.clone(),
                foreign_key: foreign_key.clone(),
                related_key,
                display_field,
                placeholder: format!("Select {}", rel.label),
                scope,
            })
        }
        RelationshipKind::OwnedMany { foreign_key } => {
            RelationshipBinding::OwnedMany(CollectionBinding {
                relationship: rel.name.clone(),
                related: rel.related.clone(),
                foreign_key: foreign_key.clone(),
                related_key,
                display_field,
                preview_limit: config.preview_limit,
            })
        }
        RelationshipKind::OwnedOne { foreign_key } => {
            RelationshipBinding::OwnedOne(CollectionBinding {
                relationship: rel.name.clone(),
                related: rel.related.clone(),
                foreign_key: foreign_key.clone(),
                related_key,
                display_field,
                preview_limit: 1,
            })
        }
        RelationshipKind::SharedMany { join } => RelationshipBinding::SharedMany(SharedBinding {
            relationship: rel.name.clone(),
            related: rel.related.clone(),
            join: join.clone(),
            related_key,
            display_field,
        }),
    }
}
