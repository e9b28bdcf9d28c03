//! Table schema: named, typed, non-nullable columns.

use crate::config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    UInt64,
    Float32,
    Float64,
    Utf8,
    /// Fixed-width float32 vector of the given dimension.
    Vector(usize),
}

impl DataType {
    /// Scalar types are sortable and can be filtered on or scalar-indexed.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, DataType::Vector(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int64 | DataType::UInt64 | DataType::Float32 | DataType::Float64
        )
    }

    pub fn vector_dim(&self) -> Option<usize> {
        match self {
            DataType::Vector(dim) => Some(*dim),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => f.write_str("boolean"),
            DataType::Int64 => f.write_str("int64"),
            DataType::UInt64 => f.write_str("uint64"),
            DataType::Float32 => f.write_str("float32"),
            DataType::Float64 => f.write_str("float64"),
            DataType::Utf8 => f.write_str("utf8"),
            DataType::Vector(dim) => write!(f, "vector[{dim}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields with unique names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, rejecting duplicate names, the names of columns that
    /// queries append (`_distance`, `_rowid`), and out-of-range vector
    /// dimensions.
    pub fn try_new(fields: Vec<Field>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(Error::config("column names must be non-empty"));
            }
            if config::RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(Error::config(format!(
                    "column name '{}' is reserved for query results",
                    field.name
                )));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::config(format!("duplicate column '{}'", field.name)));
            }
            if let DataType::Vector(dim) = field.data_type {
                if dim == 0 || dim > config::MAX_DIMENSION {
                    return Err(Error::config(format!(
                        "vector column '{}' dimension must be in 1..={}, got {}",
                        field.name,
                        config::MAX_DIMENSION,
                        dim
                    )));
                }
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Look up a column, failing with a config error naming it when absent.
    pub fn require(&self, name: &str) -> Result<&Field> {
        self.field(name)
            .ok_or_else(|| Error::config(format!("column '{name}' does not exist")))
    }

    /// Sub-schema with the named columns, in the requested order.
    pub fn project(&self, columns: &[String]) -> Result<Schema> {
        let fields = columns
            .iter()
            .map(|c| self.require(c).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema { fields })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub(crate) fn push(&mut self, field: Field) {
        self.fields.push(field);
    }
}
