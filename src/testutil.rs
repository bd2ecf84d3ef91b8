//! Shared fixtures for unit tests.

use std::{path::Path, sync::Arc};

use crate::schema::{parse_document, SchemaDocument};

pub const SCHEMA_JSON: &str = r#"{
    "fields": [
        {"name": "company", "originalName": "Company", "type": "string", "originalDescription": "Business name"},
        {"name": "zip", "originalName": "ZipCode", "type": "string", "originalDescription": "5-digit ZIP"},
        {"name": "county_code", "originalName": "County Code", "type": "string", "originalDescription": "FIPS county"},
        {"name": "employees", "originalName": "Employee Size", "type": "integer", "originalDescription": "Employees on site"},
        {"name": "sales", "originalName": "Sales Volume", "type": "number", "originalDescription": "Sales in $k"},
        {"name": "archive_year", "originalName": "Archive Version Year", "type": "year", "originalDescription": "Archive year"}
    ],
    "field_lists": [
        {"years": [1997, 1998], "fields": ["company", "zip", "employees", "sales", "archive_year"]},
        {"years": [1999, 2009], "fields": ["company", "zip", "county_code", "employees", "sales", "archive_year"]}
    ],
    "fixed_width": [
        {"years": [2009], "field": "zip", "width": 5},
        {"years": [2009], "field": "county_code", "width": 3}
    ]
}"#;

pub fn schema() -> Arc<SchemaDocument> {
    Arc::new(parse_document(Path::new("schema.json"), SCHEMA_JSON).expect("fixture schema"))
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
