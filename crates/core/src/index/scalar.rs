//! Scalar index: an ordered map from column value to the set of row ids
//! holding it, answering equality, range and membership lookups.

use crate::query::predicate::CmpOp;
use crate::table::schema::DataType;
use crate::table::value::ScalarValue;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::mem;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarIndex {
    pub data_type: DataType,
    values: BTreeMap<ScalarValue, RoaringTreemap>,
}

impl ScalarIndex {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, value: ScalarValue, row_id: u64) {
        self.values.entry(value).or_default().insert(row_id);
    }

    pub fn num_distinct(&self) -> usize {
        self.values.len()
    }

    pub fn num_rows(&self) -> u64 {
        self.values.values().map(RoaringTreemap::len).sum()
    }

    /// Rows whose value satisfies `value <op> literal`.
    ///
    /// Returns `None` when the literal's type differs from the stored key type
    /// (for example a float literal against an integer column); the caller then
    /// evaluates the comparison by scanning. NaN keys never match, matching the
    /// row-by-row evaluation where NaN is incomparable.
    pub fn lookup(&self, op: CmpOp, literal: &ScalarValue) -> Option<RoaringTreemap> {
        if !self.key_compatible(literal) {
            return None;
        }
        if literal.is_nan() {
            return Some(RoaringTreemap::new());
        }
        let bounds: (Bound<&ScalarValue>, Bound<&ScalarValue>) = match op {
            CmpOp::Eq => {
                return Some(self.values.get(literal).cloned().unwrap_or_default());
            }
            CmpOp::NotEq => {
                return Some(self.union_where(|v| v != literal));
            }
            CmpOp::Lt => (Bound::Unbounded, Bound::Excluded(literal)),
            CmpOp::LtEq => (Bound::Unbounded, Bound::Included(literal)),
            CmpOp::Gt => (Bound::Excluded(literal), Bound::Unbounded),
            CmpOp::GtEq => (Bound::Included(literal), Bound::Unbounded),
        };
        let mut out = RoaringTreemap::new();
        for (_, rows) in self
            .values
            .range::<ScalarValue, _>(bounds)
            .filter(|(v, _)| !v.is_nan())
        {
            out |= rows;
        }
        Some(out)
    }

    /// Rows whose value equals any of `literals`.
    pub fn lookup_in(&self, literals: &[ScalarValue]) -> Option<RoaringTreemap> {
        if !literals.iter().all(|l| self.key_compatible(l)) {
            return None;
        }
        let mut out = RoaringTreemap::new();
        for l in literals.iter().filter(|l| !l.is_nan()) {
            if let Some(rows) = self.values.get(l) {
                out |= rows;
            }
        }
        Some(out)
    }

    fn union_where(&self, keep: impl Fn(&ScalarValue) -> bool) -> RoaringTreemap {
        let mut out = RoaringTreemap::new();
        for (v, rows) in &self.values {
            if !v.is_nan() && keep(v) {
                out |= rows;
            }
        }
        out
    }

    fn key_compatible(&self, literal: &ScalarValue) -> bool {
        match self.values.keys().next() {
            Some(key) => mem::discriminant(key) == mem::discriminant(literal),
            // No keys: every lookup is empty regardless of type.
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ScalarIndex {
        let mut idx = ScalarIndex::new(DataType::Int64);
        for (row, v) in [5i64, 1, 3, 3, 9, 1].into_iter().enumerate() {
            idx.insert(ScalarValue::Int64(v), row as u64);
        }
        idx
    }

    fn rows(bm: RoaringTreemap) -> Vec<u64> {
        bm.iter().collect()
    }

    #[test]
    fn test_equality_and_not_equal() {
        let idx = index();
        assert_eq!(rows(idx.lookup(CmpOp::Eq, &ScalarValue::Int64(3)).unwrap()), vec![2, 3]);
        assert_eq!(
            rows(idx.lookup(CmpOp::NotEq, &ScalarValue::Int64(1)).unwrap()),
            vec![0, 2, 3, 4]
        );
        assert!(idx.lookup(CmpOp::Eq, &ScalarValue::Int64(7)).unwrap().is_empty());
    }

    #[test]
    fn test_ranges() {
        let idx = index();
        assert_eq!(rows(idx.lookup(CmpOp::Lt, &ScalarValue::Int64(3)).unwrap()), vec![1, 5]);
        assert_eq!(
            rows(idx.lookup(CmpOp::LtEq, &ScalarValue::Int64(3)).unwrap()),
            vec![1, 2, 3, 5]
        );
        assert_eq!(rows(idx.lookup(CmpOp::Gt, &ScalarValue::Int64(5)).unwrap()), vec![4]);
        assert_eq!(
            rows(idx.lookup(CmpOp::GtEq, &ScalarValue::Int64(5)).unwrap()),
            vec![0, 4]
        );
    }

    #[test]
    fn test_in_list() {
        let idx = index();
        let hit = idx
            .lookup_in(&[ScalarValue::Int64(9), ScalarValue::Int64(1), ScalarValue::Int64(4)])
            .unwrap();
        assert_eq!(rows(hit), vec![1, 4, 5]);
    }

    #[test]
    fn test_mismatched_literal_type_declines() {
        let idx = index();
        assert!(idx.lookup(CmpOp::Lt, &ScalarValue::float(2.5)).is_none());
        assert!(idx
            .lookup_in(&[ScalarValue::Int64(1), ScalarValue::Utf8("x".into())])
            .is_none());
    }

    #[test]
    fn test_nan_keys_never_match() {
        let mut idx = ScalarIndex::new(DataType::Float64);
        for (row, v) in [1.0, f64::NAN, 10.0].into_iter().enumerate() {
            idx.insert(ScalarValue::float(v), row as u64);
        }
        let five = ScalarValue::float(5.0);
        assert_eq!(rows(idx.lookup(CmpOp::Gt, &five).unwrap()), vec![2]);
        assert_eq!(rows(idx.lookup(CmpOp::GtEq, &five).unwrap()), vec![2]);
        assert_eq!(rows(idx.lookup(CmpOp::Lt, &five).unwrap()), vec![0]);
        assert_eq!(
            rows(idx.lookup(CmpOp::NotEq, &ScalarValue::float(1.0)).unwrap()),
            vec![2]
        );
        let nan = ScalarValue::float(f64::NAN);
        assert!(idx.lookup(CmpOp::Eq, &nan).unwrap().is_empty());
        assert!(idx.lookup_in(&[nan]).unwrap().is_empty());
    }

    #[test]
    fn test_counts() {
        let idx = index();
        assert_eq!(idx.num_distinct(), 4);
        assert_eq!(idx.num_rows(), 6);
    }
}
