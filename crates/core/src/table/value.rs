//! Typed scalar values used by predicates and scalar indexes.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single scalar cell value.
///
/// Totally ordered (floats via [`OrderedFloat`]) so values can key a `BTreeMap`.
/// Within one column every value has the same variant; cross-variant ordering
/// only exists to satisfy `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Boolean(bool),
    Int64(i64),
    UInt64(u64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
}

impl ScalarValue {
    pub fn float(v: f64) -> Self {
        ScalarValue::Float64(OrderedFloat(v))
    }

    /// True for a NaN float.
    pub fn is_nan(&self) -> bool {
        matches!(self, ScalarValue::Float64(f) if f.0.is_nan())
    }

    /// Numeric view for cross-type comparisons. `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(i) => Some(*i as f64),
            ScalarValue::UInt64(u) => Some(*u as f64),
            ScalarValue::Float64(f) => Some(f.0),
            _ => None,
        }
    }

    /// Compare two values of possibly different numeric variants.
    ///
    /// Same-variant pairs use their natural order; mixed numeric pairs compare as
    /// f64; anything else is incomparable. NaN is incomparable with every value,
    /// unlike the total order `Ord` gives it for map keys.
    pub fn compare(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => Some(a.cmp(b)),
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
            (ScalarValue::UInt64(a), ScalarValue::UInt64(b)) => Some(a.cmp(b)),
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => a.0.partial_cmp(&b.0),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Boolean(b) => write!(f, "{b}"),
            ScalarValue::Int64(i) => write!(f, "{i}"),
            ScalarValue::UInt64(u) => write!(f, "{u}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(s) => write!(f, "'{s}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_numeric_compare() {
        assert_eq!(
            ScalarValue::Int64(10).compare(&ScalarValue::float(9.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            ScalarValue::UInt64(3).compare(&ScalarValue::Int64(3)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_nan_is_incomparable() {
        let nan = ScalarValue::float(f64::NAN);
        assert!(nan.is_nan());
        assert_eq!(nan.compare(&ScalarValue::float(1.0)), None);
        assert_eq!(nan.compare(&nan), None);
        assert_eq!(nan.compare(&ScalarValue::Int64(1)), None);
        assert!(!ScalarValue::float(1.0).is_nan());
    }

    #[test]
    fn test_incomparable_types() {
        assert_eq!(
            ScalarValue::Utf8("a".into()).compare(&ScalarValue::Int64(1)),
            None
        );
        assert_eq!(
            ScalarValue::Boolean(true).compare(&ScalarValue::Int64(1)),
            None
        );
    }
}
