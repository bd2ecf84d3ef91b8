pub mod resolve;
pub mod store;
pub mod types;

pub use resolve::rename_map;
pub use store::{load_document, parse_document};
pub use types::{Field, FieldList, FieldType, FixedWidthRule, SchemaDocument};
