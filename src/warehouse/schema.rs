// src/warehouse/schema.rs

use serde::Serialize;
use std::fmt;

use crate::error::SchemaError;
use crate::schema::{Field, FieldType};

/// Warehouse column types the pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Float,
    String,
}

impl ColumnType {
    pub fn for_field(ty: FieldType) -> Self {
        match ty {
            FieldType::Integer | FieldType::Year => ColumnType::Integer,
            FieldType::Number => ColumnType::Float,
            FieldType::String => ColumnType::String,
        }
    }

    /// Map a raw type name; unknown names are rejected, never defaulted.
    pub fn for_type_name(field: &str, ty: &str) -> Result<Self, SchemaError> {
        FieldType::parse(field, ty).map(Self::for_field)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::String => "STRING",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub description: String,
}

/// Nullable warehouse columns for a resolved year schema, in field order.
pub fn columns(fields: &[Field]) -> Vec<Column> {
    fields
        .iter()
        .map(|f| Column {
            name: f.name.clone(),
            ty: ColumnType::for_field(f.ty),
            description: f.original_description.clone(),
        })
        .collect()
}
