//! Columnar record batches.

use crate::error::{Error, Result};
use crate::table::schema::{DataType, Field, Schema};
use crate::table::value::ScalarValue;

/// Values of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Boolean(Vec<bool>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    /// Row-major arena of `len × dim` floats.
    Vector { dim: usize, values: Vec<f32> },
}

impl ColumnData {
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => ColumnData::Boolean(Vec::new()),
            DataType::Int64 => ColumnData::Int64(Vec::new()),
            DataType::UInt64 => ColumnData::UInt64(Vec::new()),
            DataType::Float32 => ColumnData::Float32(Vec::new()),
            DataType::Float64 => ColumnData::Float64(Vec::new()),
            DataType::Utf8 => ColumnData::Utf8(Vec::new()),
            DataType::Vector(dim) => ColumnData::Vector {
                dim,
                values: Vec::new(),
            },
        }
    }

    /// Build a vector column from per-row vectors. All rows must have length `dim`.
    pub fn vectors(dim: usize, rows: &[Vec<f32>]) -> Result<Self> {
        let mut values = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::config(format!(
                    "vector at row {i} has dimension {}, expected {dim}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }
        Ok(ColumnData::Vector { dim, values })
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Boolean(_) => DataType::Boolean,
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::UInt64(_) => DataType::UInt64,
            ColumnData::Float32(_) => DataType::Float32,
            ColumnData::Float64(_) => DataType::Float64,
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Vector { dim, .. } => DataType::Vector(*dim),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::UInt64(v) => v.len(),
            ColumnData::Float32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Vector { dim, values } => {
                if *dim == 0 {
                    0
                } else {
                    values.len() / dim
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scalar value at row `i`. `None` for vector columns.
    pub fn value(&self, i: usize) -> Option<ScalarValue> {
        match self {
            ColumnData::Boolean(v) => Some(ScalarValue::Boolean(v[i])),
            ColumnData::Int64(v) => Some(ScalarValue::Int64(v[i])),
            ColumnData::UInt64(v) => Some(ScalarValue::UInt64(v[i])),
            ColumnData::Float32(v) => Some(ScalarValue::float(v[i] as f64)),
            ColumnData::Float64(v) => Some(ScalarValue::float(v[i])),
            ColumnData::Utf8(v) => Some(ScalarValue::Utf8(v[i].clone())),
            ColumnData::Vector { .. } => None,
        }
    }

    /// Vector at row `i`. `None` for scalar columns.
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        match self {
            ColumnData::Vector { dim, values } => Some(&values[i * dim..(i + 1) * dim]),
            _ => None,
        }
    }

    /// String at row `i`. `None` for non-Utf8 columns.
    pub fn text(&self, i: usize) -> Option<&str> {
        match self {
            ColumnData::Utf8(v) => Some(v[i].as_str()),
            _ => None,
        }
    }

    /// Append row `i` of `src` (same type) to this column.
    pub fn push_from(&mut self, src: &ColumnData, i: usize) {
        match (self, src) {
            (ColumnData::Boolean(d), ColumnData::Boolean(s)) => d.push(s[i]),
            (ColumnData::Int64(d), ColumnData::Int64(s)) => d.push(s[i]),
            (ColumnData::UInt64(d), ColumnData::UInt64(s)) => d.push(s[i]),
            (ColumnData::Float32(d), ColumnData::Float32(s)) => d.push(s[i]),
            (ColumnData::Float64(d), ColumnData::Float64(s)) => d.push(s[i]),
            (ColumnData::Utf8(d), ColumnData::Utf8(s)) => d.push(s[i].clone()),
            (ColumnData::Vector { values: d, .. }, ColumnData::Vector { dim, values: s }) => {
                d.extend_from_slice(&s[i * dim..(i + 1) * dim])
            }
            (dst, src) => unreachable!(
                "push_from type mismatch: {} <- {}",
                dst.data_type(),
                src.data_type()
            ),
        }
    }

    /// Rows `offset..offset + len` as a new column.
    pub fn slice(&self, offset: usize, len: usize) -> ColumnData {
        let r = offset..offset + len;
        match self {
            ColumnData::Boolean(v) => ColumnData::Boolean(v[r].to_vec()),
            ColumnData::Int64(v) => ColumnData::Int64(v[r].to_vec()),
            ColumnData::UInt64(v) => ColumnData::UInt64(v[r].to_vec()),
            ColumnData::Float32(v) => ColumnData::Float32(v[r].to_vec()),
            ColumnData::Float64(v) => ColumnData::Float64(v[r].to_vec()),
            ColumnData::Utf8(v) => ColumnData::Utf8(v[r].to_vec()),
            ColumnData::Vector { dim, values } => ColumnData::Vector {
                dim: *dim,
                values: values[offset * dim..(offset + len) * dim].to_vec(),
            },
        }
    }

    /// Gather rows by position.
    pub fn take(&self, indices: &[usize]) -> ColumnData {
        let mut out = ColumnData::empty(self.data_type());
        for &i in indices {
            out.push_from(self, i);
        }
        out
    }
}

/// A batch of rows in columnar layout, with the table row id of every row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    schema: Schema,
    columns: Vec<ColumnData>,
    row_ids: Vec<u64>,
}

impl RecordBatch {
    /// Build a batch, checking column count, types, and equal lengths.
    ///
    /// Row ids default to `0..num_rows`; tables assign real ids on write.
    pub fn try_new(schema: Schema, columns: Vec<ColumnData>) -> Result<Self> {
        if schema.len() != columns.len() {
            return Err(Error::config(format!(
                "schema has {} columns, batch has {}",
                schema.len(),
                columns.len()
            )));
        }
        let num_rows = columns.first().map_or(0, |c| c.len());
        for (field, col) in schema.fields().iter().zip(&columns) {
            if field.data_type != col.data_type() {
                return Err(Error::config(format!(
                    "column '{}' declared {} but holds {}",
                    field.name,
                    field.data_type,
                    col.data_type()
                )));
            }
            if col.len() != num_rows {
                return Err(Error::config(format!(
                    "column '{}' has {} rows, expected {}",
                    field.name,
                    col.len(),
                    num_rows
                )));
            }
        }
        Ok(Self {
            schema,
            columns,
            row_ids: (0..num_rows as u64).collect(),
        })
    }

    pub fn empty(schema: Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| ColumnData::empty(f.data_type))
            .collect();
        Self {
            schema,
            columns,
            row_ids: Vec::new(),
        }
    }

    pub(crate) fn with_row_ids(mut self, row_ids: Vec<u64>) -> Self {
        debug_assert_eq!(row_ids.len(), self.num_rows());
        self.row_ids = row_ids;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn columns(&self) -> &[ColumnData] {
        &self.columns
    }

    pub fn row_ids(&self) -> &[u64] {
        &self.row_ids
    }

    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, i: usize) -> &ColumnData {
        &self.columns[i]
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnData> {
        self.schema.index_of(name).map(|i| &self.columns[i])
    }

    /// Keep only the named columns, in the requested order.
    pub fn project(&self, columns: &[String]) -> Result<RecordBatch> {
        let schema = self.schema.project(columns)?;
        let cols = columns
            .iter()
            .filter_map(|c| self.column_by_name(c).cloned())
            .collect();
        Ok(RecordBatch {
            schema,
            columns: cols,
            row_ids: self.row_ids.clone(),
        })
    }

    pub fn slice(&self, offset: usize, len: usize) -> RecordBatch {
        RecordBatch {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.slice(offset, len)).collect(),
            row_ids: self.row_ids[offset..offset + len].to_vec(),
        }
    }

    pub fn take(&self, indices: &[usize]) -> RecordBatch {
        RecordBatch {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            row_ids: indices.iter().map(|&i| self.row_ids[i]).collect(),
        }
    }

    /// Append a trailing column. Used for computed outputs such as `_distance`.
    pub fn append_column(&mut self, field: Field, column: ColumnData) -> Result<()> {
        if self.schema.field(&field.name).is_some() {
            return Err(Error::config(format!(
                "column '{}' already present in batch",
                field.name
            )));
        }
        if column.len() != self.num_rows() {
            return Err(Error::config(format!(
                "appended column '{}' has {} rows, expected {}",
                field.name,
                column.len(),
                self.num_rows()
            )));
        }
        self.schema.push(field);
        self.columns.push(column);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RecordBatch {
        let schema = Schema::try_new(vec![
            Field::new("id", DataType::Int64),
            Field::new("v", DataType::Vector(2)),
        ])
        .unwrap();
        RecordBatch::try_new(
            schema,
            vec![
                ColumnData::Int64(vec![1, 2, 3]),
                ColumnData::Vector {
                    dim: 2,
                    values: vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let schema = Schema::try_new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Int64),
        ])
        .unwrap();
        let err = RecordBatch::try_new(
            schema,
            vec![ColumnData::Int64(vec![1, 2]), ColumnData::Int64(vec![1])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_take_and_slice() {
        let b = batch();
        let t = b.take(&[2, 0]);
        assert_eq!(t.column(0), &ColumnData::Int64(vec![3, 1]));
        assert_eq!(t.column(1).vector(0), Some(&[2.0f32, 2.0][..]));
        assert_eq!(t.row_ids(), &[2, 0]);
        let s = b.slice(1, 2);
        assert_eq!(s.num_rows(), 2);
        assert_eq!(s.row_ids(), &[1, 2]);
    }

    #[test]
    fn test_append_column_checks_length() {
        let mut b = batch();
        assert!(b
            .append_column(
                Field::new("_distance", DataType::Float32),
                ColumnData::Float32(vec![0.1])
            )
            .is_err());
        b.append_column(
            Field::new("_distance", DataType::Float32),
            ColumnData::Float32(vec![0.1, 0.2, 0.3]),
        )
        .unwrap();
        assert_eq!(b.num_columns(), 3);
    }
}
