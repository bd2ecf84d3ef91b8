// src/schema/types.rs

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};

use crate::error::SchemaError;

/// Header name of the archive year column when the document does not say otherwise.
pub const DEFAULT_ARCHIVE_YEAR_COLUMN: &str = "Archive Version Year";

/// Abstract column type, as written in the schema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    String,
    Year,
    Number,
}

impl FieldType {
    /// Strict parse: anything outside the four known names is an error.
    pub fn parse(field: &str, ty: &str) -> Result<Self, SchemaError> {
        match ty {
            "integer" => Ok(FieldType::Integer),
            "string" => Ok(FieldType::String),
            "year" => Ok(FieldType::Year),
            "number" => Ok(FieldType::Number),
            other => Err(SchemaError::UnknownType {
                field: field.to_string(),
                ty: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::String => "string",
            FieldType::Year => "year",
            FieldType::Number => "number",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One canonical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub original_name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub original_description: String,
}

/// Years sharing the same set of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldList {
    pub years: Vec<i32>,
    pub fields: Vec<String>,
}

/// Zero-pad a numeric column to `width` digits in the listed years.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWidthRule {
    pub years: Vec<i32>,
    pub field: String,
    pub width: usize,
}

// ─── wire format ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawField {
    pub name: String,
    pub original_name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub original_description: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSchemaDocument {
    pub fields: Vec<RawField>,
    pub field_lists: Vec<FieldList>,
    #[serde(default)]
    pub fixed_width: Vec<FixedWidthRule>,
    #[serde(default)]
    pub archive_year_column: Option<String>,
}

/// The parsed and cross-checked schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    /// Master field order.
    pub fields: Vec<Field>,
    pub field_lists: Vec<FieldList>,
    pub fixed_width: Vec<FixedWidthRule>,
    pub archive_year_column: String,
}

impl TryFrom<RawSchemaDocument> for SchemaDocument {
    type Error = SchemaError;

    fn try_from(raw: RawSchemaDocument) -> Result<Self, Self::Error> {
        let fields = raw
            .fields
            .into_iter()
            .map(|f| {
                Ok(Field {
                    ty: FieldType::parse(&f.name, &f.ty)?,
                    name: f.name,
                    original_name: f.original_name,
                    original_description: f.original_description,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        let doc = SchemaDocument {
            fields,
            field_lists: raw.field_lists,
            fixed_width: raw.fixed_width,
            archive_year_column: raw
                .archive_year_column
                .unwrap_or_else(|| DEFAULT_ARCHIVE_YEAR_COLUMN.to_string()),
        };
        doc.check_references()?;
        Ok(doc)
    }
}

impl SchemaDocument {
    /// Every name used by a field list or a fixed-width rule must be a defined field.
    pub fn check_references(&self) -> Result<(), SchemaError> {
        let known: HashSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        for fl in &self.field_lists {
            if let Some(missing) = fl.fields.iter().find(|n| !known.contains(n.as_str())) {
                return Err(SchemaError::UndefinedField {
                    field: missing.clone(),
                    years: fl.years.clone(),
                });
            }
        }
        for rule in &self.fixed_width {
            if !known.contains(rule.field.as_str()) {
                return Err(SchemaError::UnknownPaddingField {
                    field: rule.field.clone(),
                    years: rule.years.clone(),
                });
            }
        }
        Ok(())
    }
}
