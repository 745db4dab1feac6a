//! The total order over document field values (component A).
//!
//! Every `ORDER BY` result carries a tuple of [`Value`]s, one per sort expression. The
//! merge engine (`crate::merge`) and the resume filter (`crate::resume`) both need a single,
//! never-failing comparison over these values that matches the database's documented
//! cross-type ordering rules.

use std::cmp::Ordering;

/// A single document field value, as produced by the server for an `ORDER BY` expression.
///
/// `Undefined` is distinct from `Null`: it represents a missing property (the expression
/// didn't resolve for that document), while `Null` is an explicit JSON null.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    /// The fixed type precedence used to order values of different types:
    /// `Undefined < Null < Bool < Number < String < Array < Object`.
    fn type_ordinal(&self) -> u8 {
        match self {
            Value::Undefined => 0,
            Value::Null => 1,
            Value::Bool(_) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    /// Compares two values according to the database's total order.
    ///
    /// This never fails. NaN is not a representable [`Value::Number`] (callers must reject it
    /// before constructing one), so the `f64` comparison below never observes NaN and we can
    /// use `partial_cmp().expect(..)` without risk.
    pub fn compare(&self, other: &Value) -> Ordering {
        let (left_ord, right_ord) = (self.type_ordinal(), other.type_ordinal());
        if left_ord != right_ord {
            return left_ord.cmp(&right_ord);
        }

        match (self, other) {
            (Value::Undefined, Value::Undefined) => Ordering::Equal,
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a
                .partial_cmp(b)
                .expect("Value::Number must never hold NaN"),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let cmp = x.compare(y);
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                // Shorter-is-smaller on a common prefix.
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                let mut a_sorted = a.clone();
                let mut b_sorted = b.clone();
                a_sorted.sort_by(|x, y| x.0.cmp(&y.0));
                b_sorted.sort_by(|x, y| x.0.cmp(&y.0));
                for ((ka, va), (kb, vb)) in a_sorted.iter().zip(b_sorted.iter()) {
                    let key_cmp = ka.cmp(kb);
                    if key_cmp != Ordering::Equal {
                        return key_cmp;
                    }
                    let val_cmp = va.compare(vb);
                    if val_cmp != Ordering::Equal {
                        return val_cmp;
                    }
                }
                a_sorted.len().cmp(&b_sorted.len())
            }
            // Same type ordinal but neither arm above matched: unreachable given the match
            // above covers every variant pairing with equal ordinals.
            _ => unreachable!("type_ordinal partition guarantees matching variants here"),
        }
    }

    /// Builds a [`Value::Number`] from an `f64`, rejecting NaN per the database's rule that
    /// NaN is not a comparable value.
    pub fn number(n: f64) -> crate::Result<Value> {
        if n.is_nan() {
            return Err(crate::ErrorKind::InternalInvariant
                .with_message("NaN is not a valid ORDER BY value"));
        }
        Ok(Value::Number(n))
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect())
            }
        }
    }
}

/// The sentinel JSON object used to round-trip [`Value::Undefined`] through the continuation
/// token, since plain JSON has no "undefined" literal.
const UNDEFINED_SENTINEL_KEY: &str = "$undefined";

impl Value {
    /// Encodes this value as plain JSON, suitable for embedding in a continuation token.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined => {
                serde_json::json!({ UNDEFINED_SENTINEL_KEY: true })
            }
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Decodes a value previously produced by [`Value::to_json`].
    pub fn from_json(json: &serde_json::Value) -> Value {
        if let serde_json::Value::Object(map) = json {
            if map.len() == 1 && map.get(UNDEFINED_SENTINEL_KEY) == Some(&serde_json::Value::Bool(true))
            {
                return Value::Undefined;
            }
        }
        Value::from(json)
    }
}

#[cfg(test)]
mod json_roundtrip_tests {
    use super::*;

    #[test]
    pub fn roundtrips_every_variant() {
        let values = [
            Value::Undefined,
            Value::Null,
            Value::Bool(true),
            Value::Number(3.25),
            Value::String("hi".into()),
            Value::Array(vec![Value::Number(1.0), Value::Bool(false)]),
            Value::Object(vec![("k".into(), Value::String("v".into()))]),
        ];
        for v in &values {
            let round_tripped = Value::from_json(&v.to_json());
            assert_eq!(Ordering::Equal, v.compare(&round_tripped), "{v:?}");
        }
    }
}
