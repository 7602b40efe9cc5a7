use std::collections::HashSet;

use indexmap::IndexMap;

use super::{
    error::EngineError,
    metadata::EntityModel,
    result::{Entity, FieldValue, FlattenedResult},
};

/// Replaces every nested strong entity with an entry in the related map,
/// keyed by its type's collection name and deduplicated by `(collection, id)`.
/// Navigations are nulled and collections emptied either way, so the output
/// graph is one level deep: entities reference each other only through their
/// foreign-key scalars.
pub fn flatten(
    primary: Vec<Entity>,
    model: &EntityModel,
) -> Result<FlattenedResult, EngineError> {
    let mut visited: HashSet<(String, i64)> = HashSet::new();
    let mut related: IndexMap<String, Vec<Entity>> = IndexMap::new();

    // the primaries count as seen up front, so a nested reference back to a
    // primary entity is nulled without duplicating it under related
    let mut primary = primary;
    for entity in &primary {
        visited.insert((collection_of(entity, model)?, entity.id));
    }
    for entity in &mut primary {
        detach_children(entity, model, &mut visited, &mut related)?;
    }

    Ok(FlattenedResult { primary, related })
}

fn collection_of(entity: &Entity, model: &EntityModel) -> Result<String, EngineError> {
    Ok(model.entity_type(&entity.type_name)?.collection_name.clone())
}

fn detach_children(
    entity: &mut Entity,
    model: &EntityModel,
    visited: &mut HashSet<(String, i64)>,
    related: &mut IndexMap<String, Vec<Entity>>,
) -> Result<(), EngineError> {
    for value in entity.values.values_mut() {
        match value {
            FieldValue::Scalar(_) => (),
            FieldValue::One(child) => {
                if let Some(child) = child.take() {
                    relocate(*child, model, visited, related)?;
                }
            }
            FieldValue::Many(children) => {
                for child in std::mem::take(children) {
                    relocate(child, model, visited, related)?;
                }
            }
        }
    }
    Ok(())
}

fn relocate(
    mut child: Entity,
    model: &EntityModel,
    visited: &mut HashSet<(String, i64)>,
    related: &mut IndexMap<String, Vec<Entity>>,
) -> Result<(), EngineError> {
    let collection = collection_of(&child, model)?;
    let first_visit = visited.insert((collection.clone(), child.id));
    // even a duplicate copy may carry grandchildren nobody else holds
    detach_children(&mut child, model, visited, related)?;
    if first_visit {
        related.entry(collection).or_default().push(child);
    }
    Ok(())
}
