use std::collections::HashSet;

use tpk_types::Schema;

use crate::error::{PackError, PackResult};

/// Which stored columns to materialize when a column packer is read back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ColumnRequest {
    /// Every stored column, in stored order.
    #[default]
    All,
    /// Exactly the prototype's columns, in the prototype's order. Each name
    /// must exist in the stored schema with the same type.
    Prototype(Schema),
    /// The full stored layout, with only the named columns read back.
    Select(Vec<String>),
}

/// Mapping from the columns a packer exposes to the columns it stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Projection {
    original: Schema,
    columns: Vec<usize>,
    mask: Vec<bool>,
}

impl Projection {
    pub fn identity(schema: &Schema) -> Self {
        Self {
            original: schema.clone(),
            columns: (0..schema.len()).collect(),
            mask: vec![true; schema.len()],
        }
    }

    /// Resolve `request` against the stored schema. Returns the schema the
    /// packer exposes together with the mapping.
    pub fn resolve(original: &Schema, request: &ColumnRequest) -> PackResult<(Schema, Self)> {
        match request {
            ColumnRequest::All => Ok((original.clone(), Self::identity(original))),
            ColumnRequest::Prototype(prototype) => {
                let mut columns = Vec::with_capacity(prototype.len());
                for field in prototype.fields() {
                    let stored = original.column_number(&field.name).ok_or_else(|| {
                        PackError::SchemaMismatch(format!(
                            "column {:?} is not stored",
                            field.name
                        ))
                    })?;
                    let stored_ty = original.fields()[stored].ty;
                    if stored_ty != field.ty {
                        return Err(PackError::SchemaMismatch(format!(
                            "column {:?} is stored as {stored_ty}, requested as {}",
                            field.name, field.ty
                        )));
                    }
                    columns.push(stored);
                }
                let projection = Self {
                    original: original.clone(),
                    columns,
                    mask: vec![true; prototype.len()],
                };
                Ok((prototype.clone(), projection))
            }
            ColumnRequest::Select(names) => {
                let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
                if let Some(missing) = wanted.iter().find(|n| original.column_number(n).is_none()) {
                    return Err(PackError::SchemaMismatch(format!(
                        "column {missing:?} is not stored"
                    )));
                }
                let mask = original.names().map(|n| wanted.contains(n)).collect();
                let projection = Self {
                    original: original.clone(),
                    columns: (0..original.len()).collect(),
                    mask,
                };
                Ok((original.clone(), projection))
            }
        }
    }

    /// Stored layout with every column read back in its stored position.
    pub fn is_original(&self) -> bool {
        self.columns.len() == self.original.len()
            && self.columns.iter().enumerate().all(|(i, &c)| i == c)
            && self.mask.iter().all(|&m| m)
    }

    pub fn original(&self) -> &Schema {
        &self.original
    }

    /// Stored column behind exposed column `column`.
    pub fn stored_column(&self, column: usize) -> Option<usize> {
        self.columns.get(column).copied()
    }

    pub fn is_read_back(&self, column: usize) -> bool {
        self.mask.get(column).copied().unwrap_or(false)
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn n_read_back(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}
