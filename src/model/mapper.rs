//! Conversion between generic table rows and typed records.
//!
//! Each record declares its property table once through [`table_record!`];
//! the macro expands to plain `match` arms, so mapping never inspects types
//! at runtime. Reading copies properties named in the table, ignores
//! unknown properties, and leaves absent or mistyped ones at their default.

use crate::core::Value;
use crate::table::{ETag, TableEntity};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Key and version metadata shared by every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMeta {
    pub partition_key: String,
    pub row_key: String,
    pub etag: ETag,
    pub timestamp: Option<DateTime<Utc>>,
}

pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

pub trait IntoValue {
    fn to_value(&self) -> Value;
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl IntoValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl FromValue for Option<String> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            Value::Text(s) => Some(Some(s.clone())),
            _ => None,
        }
    }
}

impl IntoValue for Option<String> {
    fn to_value(&self) -> Value {
        self.clone().into()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl IntoValue for bool {
    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|i| i32::try_from(i).ok())
    }
}

impl IntoValue for i32 {
    fn to_value(&self) -> Value {
        Value::from(*self)
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl IntoValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl IntoValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl FromValue for Option<DateTime<Utc>> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            Value::DateTime(dt) => Some(Some(*dt)),
            _ => None,
        }
    }
}

impl IntoValue for Option<DateTime<Utc>> {
    fn to_value(&self) -> Value {
        (*self).into()
    }
}

/// A typed view of one table row.
pub trait TableRecord: Default {
    /// Property names this record reads and writes.
    const PROPERTIES: &'static [&'static str];

    fn row(&self) -> &RowMeta;
    fn row_mut(&mut self) -> &mut RowMeta;

    /// Assigns one property; unknown names and mistyped values are ignored.
    fn read_property(&mut self, name: &str, value: &Value);

    /// Writes every non-null declared property.
    fn write_properties(&self, out: &mut BTreeMap<String, Value>);

    fn from_entity(entity: &TableEntity) -> Self {
        let mut record = Self::default();
        *record.row_mut() = RowMeta {
            partition_key: entity.partition_key.clone(),
            row_key: entity.row_key.clone(),
            etag: entity.etag.clone(),
            timestamp: entity.timestamp,
        };
        for (name, value) in &entity.properties {
            record.read_property(name, value);
        }
        record
    }

    fn to_entity(&self) -> TableEntity {
        let row = self.row();
        let mut entity = TableEntity::new(row.partition_key.clone(), row.row_key.clone());
        entity.etag = row.etag.clone();
        entity.timestamp = row.timestamp;
        self.write_properties(&mut entity.properties);
        entity
    }
}

macro_rules! table_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$field_meta:meta])* $property:literal => $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            pub row: $crate::model::mapper::RowMeta,
            $( $(#[$field_meta])* pub $field: $ty, )+
        }

        impl $crate::model::mapper::TableRecord for $name {
            const PROPERTIES: &'static [&'static str] = &[$($property),+];

            fn row(&self) -> &$crate::model::mapper::RowMeta {
                &self.row
            }

            fn row_mut(&mut self) -> &mut $crate::model::mapper::RowMeta {
                &mut self.row
            }

            fn read_property(&mut self, name: &str, value: &$crate::core::Value) {
                match name {
                    $(
                        $property => {
                            if let Some(parsed) =
                                <$ty as $crate::model::mapper::FromValue>::from_value(value)
                            {
                                self.$field = parsed;
                            }
                        }
                    )+
                    _ => {}
                }
            }

            fn write_properties(
                &self,
                out: &mut ::std::collections::BTreeMap<String, $crate::core::Value>,
            ) {
                $(
                    let value = $crate::model::mapper::IntoValue::to_value(&self.$field);
                    if !value.is_null() {
                        out.insert($property.to_string(), value);
                    }
                )+
            }
        }
    };
}

pub(crate) use table_record;
