use std::collections::{HashMap, HashSet};

use super::types::{Field, FieldList, FixedWidthRule, SchemaDocument};
use crate::error::SchemaError;

impl SchemaDocument {
    /// The field list covering `year`, if any. The first matching entry wins.
    pub fn field_list(&self, year: i32) -> Option<&FieldList> {
        self.field_lists.iter().find(|fl| fl.years.contains(&year))
    }

    /// Fields applicable to `year`, in master field order.
    pub fn resolve(&self, year: i32) -> Result<Vec<Field>, SchemaError> {
        let fl = self.field_list(year).ok_or(SchemaError::NoFieldList(year))?;

        let defined: HashSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        if let Some(missing) = fl.fields.iter().find(|n| !defined.contains(n.as_str())) {
            return Err(SchemaError::UndefinedField {
                field: missing.clone(),
                years: fl.years.clone(),
            });
        }

        let used: HashSet<&str> = fl.fields.iter().map(String::as_str).collect();
        Ok(self
            .fields
            .iter()
            .filter(|f| used.contains(f.name.as_str()))
            .cloned()
            .collect())
    }

    /// Check that every year has a field list. Run before any fan-out.
    pub fn ensure_years(&self, years: &[i32]) -> Result<(), SchemaError> {
        for &y in years {
            self.resolve(y)?;
        }
        Ok(())
    }

    /// Year whose resolved schema has the most fields; ties go to the earliest year.
    pub fn richest_year(&self, years: &[i32]) -> Result<Option<i32>, SchemaError> {
        let mut best: Option<(usize, i32)> = None;
        for &y in years {
            let n = self.resolve(y)?.len();
            match best {
                Some((bn, by)) if bn > n || (bn == n && by < y) => {}
                _ => best = Some((n, y)),
            }
        }
        Ok(best.map(|(_, y)| y))
    }

    /// Fixed-width rules in force for `year`, in document order.
    pub fn padding_rules(&self, year: i32) -> Vec<&FixedWidthRule> {
        self.fixed_width
            .iter()
            .filter(|r| r.years.contains(&year))
            .collect()
    }
}

/// `originalName → name` lookup for a resolved field set.
pub fn rename_map(fields: &[Field]) -> HashMap<&str, &str> {
    fields
        .iter()
        .map(|f| (f.original_name.as_str(), f.name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_document, FieldType};
    use std::path::Path;

    fn doc() -> SchemaDocument {
        parse_document(
            Path::new("schema.json"),
            r#"{
                "fields": [
                    {"name": "company", "originalName": "Company", "type": "string", "originalDescription": ""},
                    {"name": "zip", "originalName": "ZipCode", "type": "string", "originalDescription": ""},
                    {"name": "county_code", "originalName": "County Code", "type": "string", "originalDescription": ""},
                    {"name": "sales", "originalName": "Sales Volume", "type": "number", "originalDescription": ""},
                    {"name": "archive_year", "originalName": "Archive Version Year", "type": "year", "originalDescription": ""}
                ],
                "field_lists": [
                    {"years": [1997, 1998], "fields": ["archive_year", "company", "zip"]},
                    {"years": [1999], "fields": ["company", "zip", "county_code", "sales", "archive_year"]},
                    {"years": [2009], "fields": ["company", "zip", "county_code", "archive_year"]}
                ],
                "fixed_width": [
                    {"years": [2009], "field": "zip", "width": 5},
                    {"years": [2009], "field": "county_code", "width": 3}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolve_keeps_master_order() {
        let names: Vec<String> = doc()
            .resolve(1997)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["company", "zip", "archive_year"]);
    }

    #[test]
    fn resolve_matches_field_list_for_every_declared_year() {
        let d = doc();
        for fl in &d.field_lists {
            for &y in &fl.years {
                let got: HashSet<String> = d.resolve(y).unwrap().into_iter().map(|f| f.name).collect();
                let want: HashSet<String> = fl.fields.iter().cloned().collect();
                assert_eq!(got, want, "year {y}");
            }
        }
    }

    #[test]
    fn undeclared_year_fails() {
        assert!(matches!(doc().resolve(2020), Err(SchemaError::NoFieldList(2020))));
        assert!(doc().ensure_years(&[1997, 2020]).is_err());
    }

    #[test]
    fn richest_year_picks_widest_schema() {
        let d = doc();
        assert_eq!(d.richest_year(&[1997, 1998, 1999, 2009]).unwrap(), Some(1999));
        assert_eq!(d.richest_year(&[1997, 1998]).unwrap(), Some(1997));
        assert_eq!(d.richest_year(&[]).unwrap(), None);
    }

    #[test]
    fn padding_rules_are_year_scoped() {
        let d = doc();
        assert_eq!(d.padding_rules(2009).len(), 2);
        assert!(d.padding_rules(1999).is_empty());
    }

    #[test]
    fn rename_map_uses_original_names() {
        let fields = doc().resolve(1999).unwrap();
        let map = rename_map(&fields);
        assert_eq!(map.get("Sales Volume"), Some(&"sales"));
        assert_eq!(fields[3].ty, FieldType::Number);
    }
}
