use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::value::{ColumnType, Row, Value};

/// Field descriptor: a column name and the type stored under it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered, duplicate-free list of fields.
///
/// Column order is part of the schema's identity: two schemas with the same
/// fields in a different order are different schemas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, rejecting empty, blank, or duplicate column names.
    pub fn new(fields: Vec<Field>) -> Result<Self, TypeError> {
        if fields.is_empty() {
            return Err(TypeError::EmptySchema);
        }
        let mut seen = HashSet::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(TypeError::EmptyColumnName(i));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(TypeError::DuplicateColumn(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    /// Schema with synthesized names `c0, c1, ...`.
    pub fn with_default_names(types: &[ColumnType]) -> Result<Self, TypeError> {
        Self::new(
            types
                .iter()
                .enumerate()
                .map(|(i, ty)| Field::new(format!("c{i}"), *ty))
                .collect(),
        )
    }

    /// Derive names and types from a name-bearing prototype row.
    pub fn from_prototype<S: AsRef<str>>(prototype: &[(S, Value)]) -> Result<Self, TypeError> {
        Self::new(
            prototype
                .iter()
                .map(|(name, value)| Field::new(name.as_ref(), value.column_type()))
                .collect(),
        )
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always `false` for a constructed schema; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn types(&self) -> impl Iterator<Item = ColumnType> + '_ {
        self.fields.iter().map(|f| f.ty)
    }

    /// Position of the column with the given name.
    pub fn column_number(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Rename one column. Fails on a bad position, a blank name, or a
    /// duplicate name; the schema is left untouched on failure.
    pub fn rename(&mut self, i: usize, name: &str) -> Result<(), TypeError> {
        let n_columns = self.fields.len();
        if i >= n_columns {
            return Err(TypeError::ColumnOutOfRange {
                column: i,
                n_columns,
            });
        }
        if name.is_empty() {
            return Err(TypeError::EmptyColumnName(i));
        }
        if let Some(existing) = self.column_number(name) {
            if existing != i {
                return Err(TypeError::DuplicateColumn(name.to_string()));
            }
        }
        self.fields[i].name = name.to_string();
        Ok(())
    }

    /// A row of default values for every column.
    pub fn default_row(&self) -> Row {
        self.fields.iter().map(|f| f.ty.default_value()).collect()
    }

    /// Check that `row` has this schema's arity and per-column types.
    pub fn check_row(&self, row: &[Value]) -> Result<(), TypeError> {
        if row.len() != self.fields.len() {
            return Err(TypeError::ValueMismatch {
                expected: format!("{} columns", self.fields.len()),
                actual: format!("{} columns", row.len()),
            });
        }
        for (field, value) in self.fields.iter().zip(row) {
            if value.column_type() != field.ty {
                return Err(TypeError::ValueMismatch {
                    expected: format!("{} for column {}", field.ty, field.name),
                    actual: value.column_type().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn two_columns() -> Schema {
        Schema::new(vec![
            Field::new("x", ColumnType::I32),
            Field::new("y", ColumnType::F64),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = Schema::new(vec![
            Field::new("a", ColumnType::I32),
            Field::new("a", ColumnType::F64),
        ])
        .unwrap_err();
        assert_eq!(err, TypeError::DuplicateColumn("a".into()));
    }

    #[test]
    fn empty_name_rejected() {
        let err = Schema::new(vec![
            Field::new("a", ColumnType::I32),
            Field::new("", ColumnType::F64),
        ])
        .unwrap_err();
        assert_eq!(err, TypeError::EmptyColumnName(1));
    }

    #[test]
    fn empty_schema_rejected() {
        assert_eq!(Schema::new(vec![]).unwrap_err(), TypeError::EmptySchema);
    }

    #[test]
    fn default_names() {
        let schema =
            Schema::with_default_names(&[ColumnType::I32, ColumnType::Str, ColumnType::Bool])
                .unwrap();
        let names: Vec<_> = schema.names().collect();
        assert_eq!(names, ["c0", "c1", "c2"]);
    }

    #[test]
    fn prototype_derives_names_and_types() {
        let schema =
            Schema::from_prototype(&[("id", Value::U64(0)), ("label", Value::from(""))]).unwrap();
        assert_eq!(schema.field(0), Some(&Field::new("id", ColumnType::U64)));
        assert_eq!(schema.field(1), Some(&Field::new("label", ColumnType::Str)));
    }

    #[test]
    fn rename_checks_duplicates() {
        let mut schema = two_columns();
        assert_eq!(
            schema.rename(0, "y").unwrap_err(),
            TypeError::DuplicateColumn("y".into())
        );
        // Renaming a column to its own name is fine.
        schema.rename(0, "x").unwrap();
        schema.rename(0, "z").unwrap();
        assert_eq!(schema.column_number("z"), Some(0));
        assert_eq!(schema.column_number("x"), None);
    }

    #[test]
    fn rename_out_of_range_is_an_error() {
        let mut schema = Schema::with_default_names(&[ColumnType::U32]).unwrap();
        assert_eq!(
            schema.rename(7, "z").unwrap_err(),
            TypeError::ColumnOutOfRange {
                column: 7,
                n_columns: 1
            }
        );
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["c0"]);
    }

    #[test]
    fn check_row_arity_and_types() {
        let schema = two_columns();
        assert!(schema.check_row(&[Value::I32(1), Value::F64(2.0)]).is_ok());
        assert!(schema.check_row(&[Value::I32(1)]).is_err());
        assert!(schema.check_row(&[Value::F64(2.0), Value::I32(1)]).is_err());
    }

    #[test]
    fn default_row_matches_schema() {
        let schema = two_columns();
        let row = schema.default_row();
        assert!(schema.check_row(&row).is_ok());
    }

    proptest! {
        #[test]
        fn unique_names_always_accepted(
            names in proptest::collection::hash_set("[a-z]{1,8}", 1..16)
        ) {
            let fields: Vec<Field> = names
                .iter()
                .map(|n| Field::new(n.clone(), ColumnType::I64))
                .collect();
            let schema = Schema::new(fields).unwrap();
            prop_assert_eq!(schema.len(), names.len());
            for name in &names {
                prop_assert!(schema.column_number(name).is_some());
            }
        }
    }
}
