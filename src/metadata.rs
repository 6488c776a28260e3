//! Reflection over SeaORM entity metadata: column lookup by name, column kinds and the
//! conversions between structural integers/strings and SeaORM [`Value`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::{ColumnTrait, ColumnType, EntityTrait, IdenStatic, Iterable, Value};

use crate::config::TreeConfig;
use crate::error::TreeError;

/// Coarse classification of a column type used by the validator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Integer,
    Float,
    String,
    Uuid,
    Temporal,
    Boolean,
    Other,
}

impl FieldKind {
    pub fn of(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::TinyInteger
            | ColumnType::SmallInteger
            | ColumnType::Integer
            | ColumnType::BigInteger
            | ColumnType::TinyUnsigned
            | ColumnType::SmallUnsigned
            | ColumnType::Unsigned
            | ColumnType::BigUnsigned => FieldKind::Integer,
            ColumnType::Float | ColumnType::Double | ColumnType::Decimal(_) => FieldKind::Float,
            ColumnType::Char(_) | ColumnType::String(_) | ColumnType::Text => FieldKind::String,
            ColumnType::Uuid => FieldKind::Uuid,
            ColumnType::DateTime
            | ColumnType::Timestamp
            | ColumnType::TimestampWithTimeZone
            | ColumnType::Date
            | ColumnType::Time => FieldKind::Temporal,
            ColumnType::Boolean => FieldKind::Boolean,
            _ => FieldKind::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::String => "string",
            FieldKind::Uuid => "uuid",
            FieldKind::Temporal => "datetime",
            FieldKind::Boolean => "boolean",
            FieldKind::Other => "other",
        }
    }
}

/// Column name to kind map of one entity.
#[derive(Clone, Debug, Default)]
pub struct EntityFields {
    kinds: BTreeMap<String, FieldKind>,
}

impl EntityFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the column list of a SeaORM entity.
    pub fn of<E: EntityTrait>() -> Self {
        let kinds = E::Column::iter()
            .map(|column| {
                let kind = FieldKind::of(column.def().get_column_type());
                (column.as_str().to_string(), kind)
            })
            .collect();
        Self { kinds }
    }

    pub fn with(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.kinds.insert(name.into(), kind);
        self
    }

    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        self.kinds.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }
}

/// Look up an entity column by its database name.
pub fn find_column<C: ColumnTrait>(name: &str) -> Option<C> {
    C::iter().find(|column| column.as_str() == name)
}

fn resolve<C: ColumnTrait>(config: &TreeConfig, name: Option<&str>) -> Result<Option<C>, TreeError> {
    match name {
        Some(name) => find_column::<C>(name).map(Some).ok_or_else(|| {
            TreeError::configuration(format!(
                "column [{name}] does not exist on entity {}",
                config.entity_name()
            ))
        }),
        None => Ok(None),
    }
}

/// The structural columns of an entity, resolved once per strategy.
#[derive(Clone, Debug)]
pub struct TreeColumns<C> {
    pub left: Option<C>,
    pub right: Option<C>,
    pub level: Option<C>,
    pub root: Option<C>,
    pub path: Option<C>,
    pub path_source: Option<C>,
    pub path_hash: Option<C>,
    pub lock_time: Option<C>,
}

impl<C: ColumnTrait> TreeColumns<C> {
    pub fn resolve(config: &TreeConfig) -> Result<Self, TreeError> {
        Ok(Self {
            left: resolve(config, config.left_column())?,
            right: resolve(config, config.right_column())?,
            level: resolve(config, config.level_column())?,
            root: resolve(config, config.root_column())?,
            path: resolve(config, config.path_column())?,
            path_source: resolve(config, config.path_source_column())?,
            path_hash: resolve(config, config.path_hash_column())?,
            lock_time: resolve(config, config.lock_time_column())?,
        })
    }
}

/// Unwrap an optional column the strategy cannot work without.
pub fn required<C: Copy>(column: Option<C>, role: &str, config: &TreeConfig) -> Result<C, TreeError> {
    column.ok_or_else(|| {
        TreeError::configuration(format!(
            "tree {role} column is not mapped on entity {}",
            config.entity_name()
        ))
    })
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::TinyInt(Some(v)) => Some(i64::from(*v)),
        Value::SmallInt(Some(v)) => Some(i64::from(*v)),
        Value::Int(Some(v)) => Some(i64::from(*v)),
        Value::BigInt(Some(v)) => Some(*v),
        Value::TinyUnsigned(Some(v)) => Some(i64::from(*v)),
        Value::SmallUnsigned(Some(v)) => Some(i64::from(*v)),
        Value::Unsigned(Some(v)) => Some(i64::from(*v)),
        Value::BigUnsigned(Some(v)) => i64::try_from(*v).ok(),
        _ => None,
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(Some(v)) => Some(v.as_ref().clone()),
        Value::Char(Some(v)) => Some(v.to_string()),
        _ => None,
    }
}

/// Textual form of a scalar value, used for path segments and scope keys.
pub fn display_value(value: &Value) -> Option<String> {
    if let Some(v) = value_as_i64(value) {
        return Some(v.to_string());
    }
    if let Some(v) = value_as_string(value) {
        return Some(v);
    }
    match value {
        Value::BigUnsigned(Some(v)) => Some(v.to_string()),
        Value::Float(Some(v)) => Some(v.to_string()),
        Value::Double(Some(v)) => Some(v.to_string()),
        Value::Bool(Some(v)) => Some(v.to_string()),
        Value::Uuid(Some(v)) => Some(v.to_string()),
        _ => None,
    }
}

/// Whether `value` is SQL `NULL`, whatever its type.
pub fn is_null_value(value: &Value) -> bool {
    *value == value.as_null()
}

/// Key grouping the rows of one forest tree. `None` only for `NULL`.
pub fn scope_key(value: &Value) -> Option<String> {
    if is_null_value(value) {
        return None;
    }
    Some(display_value(value).unwrap_or_else(|| format!("{value:?}")))
}

/// Typed value for an integer column so `ActiveModel::set` receives the variant it expects.
pub fn integer_value(column_type: &ColumnType, value: i64) -> Result<Value, TreeError> {
    let overflow = |_| TreeError::invariant(format!("structural value {value} overflows its column"));
    let value = match column_type {
        ColumnType::TinyInteger => Value::from(i8::try_from(value).map_err(overflow)?),
        ColumnType::SmallInteger => Value::from(i16::try_from(value).map_err(overflow)?),
        ColumnType::BigInteger => Value::from(value),
        ColumnType::TinyUnsigned => Value::from(u8::try_from(value).map_err(overflow)?),
        ColumnType::SmallUnsigned => Value::from(u16::try_from(value).map_err(overflow)?),
        ColumnType::Unsigned => Value::from(u32::try_from(value).map_err(overflow)?),
        ColumnType::BigUnsigned => Value::from(u64::try_from(value).map_err(overflow)?),
        _ => Value::from(i32::try_from(value).map_err(overflow)?),
    };
    Ok(value)
}

/// Integer value typed for `column`.
pub fn column_integer<C: ColumnTrait>(column: C, value: i64) -> Result<Value, TreeError> {
    integer_value(column.def().get_column_type(), value)
}

/// Current time typed for a lock timestamp column.
pub fn timestamp_value<C: ColumnTrait>(column: C, at: DateTime<Utc>) -> Value {
    match column.def().get_column_type() {
        ColumnType::TimestampWithTimeZone => Value::from(at),
        _ => Value::from(at.naive_utc()),
    }
}

/// `NULL` typed for a lock timestamp column.
pub fn null_timestamp<C: ColumnTrait>(column: C) -> Value {
    match column.def().get_column_type() {
        ColumnType::TimestampWithTimeZone => Value::from(None::<DateTime<Utc>>),
        _ => Value::from(None::<NaiveDateTime>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::StringLen;

    #[test]
    fn integer_values_follow_column_width() {
        assert_eq!(
            integer_value(&ColumnType::Integer, 7).expect("fits"),
            Value::Int(Some(7))
        );
        assert_eq!(
            integer_value(&ColumnType::BigInteger, 7).expect("fits"),
            Value::BigInt(Some(7))
        );
        assert!(integer_value(&ColumnType::TinyInteger, 300).is_err());
    }

    #[test]
    fn values_convert_to_text() {
        assert_eq!(display_value(&Value::Int(Some(3))), Some("3".to_string()));
        assert_eq!(
            display_value(&Value::from("fruit")),
            Some("fruit".to_string())
        );
        assert_eq!(display_value(&Value::Int(None)), None);
        assert_eq!(value_as_i64(&Value::from("3")), None);
    }

    #[test]
    fn scope_keys_separate_every_non_null_value() {
        let id = sea_orm::prelude::Uuid::from_u128(0x7b);
        assert_eq!(scope_key(&Value::from(id)), Some(id.to_string()));
        assert_eq!(scope_key(&Value::Int(Some(4))), Some("4".to_string()));
        assert_eq!(scope_key(&Value::Uuid(None)), None);

        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date");
        assert!(!is_null_value(&Value::from(date)));
        assert!(scope_key(&Value::from(date)).is_some());
        assert!(is_null_value(&Value::Int(None)));
    }

    #[test]
    fn column_kinds() {
        assert_eq!(FieldKind::of(&ColumnType::Integer), FieldKind::Integer);
        assert_eq!(FieldKind::of(&ColumnType::String(StringLen::None)), FieldKind::String);
        assert_eq!(FieldKind::of(&ColumnType::Text), FieldKind::String);
        assert_eq!(FieldKind::of(&ColumnType::DateTime), FieldKind::Temporal);
        assert_eq!(FieldKind::of(&ColumnType::Json), FieldKind::Other);
    }
}
