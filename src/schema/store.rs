use once_cell::sync::Lazy;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};
use tracing::debug;

use super::types::{RawSchemaDocument, SchemaDocument};
use crate::error::SchemaError;

/// Process-wide cache of parsed schema documents.
/// An entry is reused only while the file's modification time is unchanged.
static DOCUMENTS: Lazy<RwLock<HashMap<PathBuf, (Option<SystemTime>, Arc<SchemaDocument>)>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Parse a schema document from JSON text.
pub fn parse_document(path: &Path, text: &str) -> Result<SchemaDocument, SchemaError> {
    let raw: RawSchemaDocument =
        serde_json::from_str(text).map_err(|source| SchemaError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    SchemaDocument::try_from(raw)
}

/// Load the schema document at `path`, re-reading it only when it changed on disk.
pub fn load_document<P: AsRef<Path>>(path: P) -> Result<Arc<SchemaDocument>, SchemaError> {
    let path = path.as_ref();
    let read_err = |source| SchemaError::Read {
        path: path.to_path_buf(),
        source,
    };

    let modified = fs::metadata(path)
        .map_err(read_err)?
        .modified()
        .ok();

    // fast path
    {
        let cache = DOCUMENTS.read().unwrap_or_else(|e| e.into_inner());
        if let Some((stamp, doc)) = cache.get(path) {
            if *stamp == modified && modified.is_some() {
                return Ok(Arc::clone(doc));
            }
        }
    }

    debug!(path = %path.display(), "parsing schema document");
    let text = fs::read_to_string(path).map_err(read_err)?;
    let doc = Arc::new(parse_document(path, &text)?);

    let mut cache = DOCUMENTS.write().unwrap_or_else(|e| e.into_inner());
    cache.insert(path.to_path_buf(), (modified, Arc::clone(&doc)));
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use std::io::Write;
    use tempfile::tempdir;

    const DOC: &str = r#"{
        "fields": [
            {"name": "company", "originalName": "Company", "type": "string", "originalDescription": "Name"},
            {"name": "archive_year", "originalName": "Archive Version Year", "type": "year", "originalDescription": "Year"}
        ],
        "field_lists": [{"years": [2000], "fields": ["company", "archive_year"]}]
    }"#;

    #[test]
    fn parses_field_types_and_defaults() -> anyhow::Result<()> {
        let doc = parse_document(Path::new("schema.json"), DOC)?;
        assert_eq!(doc.fields[1].ty, FieldType::Year);
        assert_eq!(doc.archive_year_column, "Archive Version Year");
        assert!(doc.fixed_width.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_type_is_rejected() {
        let text = DOC.replace(r#""type": "year""#, r#""type": "date""#);
        let err = parse_document(Path::new("schema.json"), &text).unwrap_err();
        assert!(
            matches!(err, SchemaError::UnknownType { ref ty, .. } if ty == "date"),
            "{err}"
        );
    }

    #[test]
    fn undefined_field_in_list_is_rejected() {
        let text = DOC.replace(r#"["company", "archive_year"]"#, r#"["company", "phone"]"#);
        let err = parse_document(Path::new("schema.json"), &text).unwrap_err();
        assert!(matches!(err, SchemaError::UndefinedField { ref field, .. } if field == "phone"));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = parse_document(Path::new("schema.json"), "{\"fields\": 3}").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn reload_picks_up_changes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("schema.json");
        fs::write(&path, DOC)?;
        let first = load_document(&path)?;
        let again = load_document(&path)?;
        assert!(Arc::ptr_eq(&first, &again));

        // rewrite with a different modification time
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        let mut f = fs::OpenOptions::new().write(true).truncate(true).open(&path)?;
        f.write_all(DOC.replace("\"Name\"", "\"Company name\"").as_bytes())?;
        f.set_modified(later)?;
        drop(f);

        let second = load_document(&path)?;
        assert_eq!(second.fields[0].original_description, "Company name");
        Ok(())
    }

    #[test]
    fn missing_document_is_a_read_error() {
        let dir = tempdir().unwrap();
        let err = load_document(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SchemaError::Read { .. }));
    }
}
