use crate::config::{StrategyKind, TreeConfig};
use crate::error::TreeError;
use crate::metadata::{EntityFields, FieldKind};

const TREE_TYPES: &[FieldKind] = &[FieldKind::Integer];
const ROOT_TYPES: &[FieldKind] = &[FieldKind::Integer, FieldKind::String, FieldKind::Uuid];
const PATH_TYPES: &[FieldKind] = &[FieldKind::String];
const PATH_SOURCE_TYPES: &[FieldKind] = &[FieldKind::Integer, FieldKind::String, FieldKind::Float];
const PATH_HASH_TYPES: &[FieldKind] = &[FieldKind::String];
const LOCK_TIME_TYPES: &[FieldKind] = &[FieldKind::Temporal];

/// Check a tree mapping against the column types of its entity.
///
/// Never coerces: the first unsound field is reported by name.
pub fn validate(config: &TreeConfig, fields: &EntityFields) -> Result<(), TreeError> {
    let entity = config.entity_name();

    let mut missing = Vec::new();
    if !fields.contains(config.parent_column()) {
        missing.push("ancestor");
    }
    match config.strategy() {
        StrategyKind::Nested => {
            if config.left_column().is_none() {
                missing.push("left");
            }
            if config.right_column().is_none() {
                missing.push("right");
            }
        }
        StrategyKind::MaterializedPath => {
            if config.path_column().is_none() {
                missing.push("path");
            }
            if config.path_source_column().is_none() {
                missing.push("path_source");
            }
        }
        StrategyKind::Closure => {
            if config.closure_table().is_none() {
                missing.push("closure table");
            }
        }
    }
    if !missing.is_empty() {
        return Err(TreeError::configuration(format!(
            "Missing properties: {} in entity - {entity}",
            missing.join(", ")
        )));
    }

    if !fields.contains(config.id_column()) {
        return Err(TreeError::configuration(format!(
            "Identifier field - [{}] does not exist in entity - {entity}",
            config.id_column()
        )));
    }

    let checks = [
        ("left", config.left_column(), TREE_TYPES),
        ("right", config.right_column(), TREE_TYPES),
        ("level", config.level_column(), TREE_TYPES),
        ("root", config.root_column(), ROOT_TYPES),
        ("path", config.path_column(), PATH_TYPES),
        ("path source", config.path_source_column(), PATH_SOURCE_TYPES),
        ("path hash", config.path_hash_column(), PATH_HASH_TYPES),
        ("lock time", config.lock_time_column(), LOCK_TIME_TYPES),
    ];
    for (role, column, allowed) in checks {
        if let Some(column) = column {
            check_kind(entity, fields, role, column, allowed)?;
        }
    }

    if config.strategy() == StrategyKind::MaterializedPath
        && config.path_separator().chars().count() != 1
    {
        return Err(TreeError::configuration(format!(
            "Tree path separator [{}] must be exactly one character in entity - {entity}",
            config.path_separator()
        )));
    }

    if config.activate_locking() {
        if config.strategy() != StrategyKind::MaterializedPath {
            return Err(TreeError::configuration(format!(
                "Tree locking is only supported by the materialized path strategy in entity - {entity}"
            )));
        }
        if config.lock_time_column().is_none() {
            return Err(TreeError::configuration(format!(
                "Tree locking requires a lock time field in entity - {entity}"
            )));
        }
    }

    Ok(())
}

fn check_kind(
    entity: &str,
    fields: &EntityFields,
    role: &str,
    column: &str,
    allowed: &[FieldKind],
) -> Result<(), TreeError> {
    match fields.kind(column) {
        None => Err(TreeError::configuration(format!(
            "Tree {role} field - [{column}] does not exist in entity - {entity}"
        ))),
        Some(kind) if allowed.contains(&kind) => Ok(()),
        Some(kind) => {
            let expected = allowed
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(" or ");
            Err(TreeError::configuration(format!(
                "Tree {role} field - [{column}] type {} is not valid and must be {expected} in entity - {entity}",
                kind.name()
            )))
        }
    }
}
