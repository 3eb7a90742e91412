//! Script-side value representation carried through ops.
//!
//! Op arguments and success payloads travel as [`JSValue`]. Unlike
//! `serde_json::Value` it keeps `undefined` apart from `null` and can hold
//! NaN and ±Infinity, which the host is free to return.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A script value as seen on the op boundary.
///
/// The Serialize/Deserialize impls are written by hand: `Undefined` has no
/// wire form of its own and is written as `null`, and integers that fit in an
/// `i64` must stay integers instead of collapsing into floats.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum JSValue {
    /// `undefined`, the result of ops that resolve with nothing
    #[default]
    Undefined,
    /// `null`
    Null,
    Bool(bool),
    /// Integer within i64 range
    Int(i64),
    /// Float, including NaN and ±Infinity
    Float(f64),
    String(String),
    Array(Vec<JSValue>),
    /// Object with insertion order preserved
    Object(IndexMap<String, JSValue>),
}

impl JSValue {
    /// Name of the value's script type, as `typeof` would report it
    /// (with `null` and arrays reported separately).
    pub fn type_name(&self) -> &'static str {
        match self {
            JSValue::Undefined => "undefined",
            JSValue::Null => "null",
            JSValue::Bool(_) => "boolean",
            JSValue::Int(_) | JSValue::Float(_) => "number",
            JSValue::String(_) => "string",
            JSValue::Array(_) => "array",
            JSValue::Object(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JSValue::Undefined | JSValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JSValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JSValue::Int(i) => Some(*i),
            // 2^63 itself is out of range; -2^63 is i64::MIN.
            JSValue::Float(f)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
            {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JSValue::Int(i) => Some(*i as f64),
            JSValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JSValue> {
        match self {
            JSValue::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<bool> for JSValue {
    fn from(value: bool) -> Self {
        JSValue::Bool(value)
    }
}

impl From<i64> for JSValue {
    fn from(value: i64) -> Self {
        JSValue::Int(value)
    }
}

impl From<f64> for JSValue {
    fn from(value: f64) -> Self {
        JSValue::Float(value)
    }
}

impl From<&str> for JSValue {
    fn from(value: &str) -> Self {
        JSValue::String(value.to_owned())
    }
}

impl From<String> for JSValue {
    fn from(value: String) -> Self {
        JSValue::String(value)
    }
}

impl From<Vec<JSValue>> for JSValue {
    fn from(value: Vec<JSValue>) -> Self {
        JSValue::Array(value)
    }
}

impl From<serde_json::Value> for JSValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => JSValue::Null,
            serde_json::Value::Bool(b) => JSValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => JSValue::Int(i),
                None => JSValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => JSValue::String(s),
            serde_json::Value::Array(items) => {
                JSValue::Array(items.into_iter().map(JSValue::from).collect())
            }
            serde_json::Value::Object(map) => JSValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, JSValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for JSValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            JSValue::Undefined | JSValue::Null => serializer.serialize_none(),
            JSValue::Bool(b) => serializer.serialize_bool(*b),
            JSValue::Int(i) => serializer.serialize_i64(*i),
            JSValue::Float(f) => serializer.serialize_f64(*f),
            JSValue::String(s) => serializer.serialize_str(s),
            JSValue::Array(arr) => arr.serialize(serializer),
            JSValue::Object(obj) => obj.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for JSValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct JSValueVisitor;

        impl<'de> Visitor<'de> for JSValueVisitor {
            type Value = JSValue;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a script value (null, bool, number, string, array, or object)")
            }

            fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E> {
                Ok(JSValue::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
                Ok(JSValue::Int(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
                match i64::try_from(value) {
                    Ok(i) => Ok(JSValue::Int(i)),
                    Err(_) => Ok(JSValue::Float(value as f64)),
                }
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E> {
                Ok(JSValue::Float(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E> {
                Ok(JSValue::String(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E> {
                Ok(JSValue::String(value))
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(JSValue::Null)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(JSValue::Null)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(elem) = seq.next_element()? {
                    items.push(elem);
                }
                Ok(JSValue::Array(items))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut obj = IndexMap::new();
                while let Some((key, value)) = map.next_entry()? {
                    obj.insert(key, value);
                }
                Ok(JSValue::Object(obj))
            }
        }

        deserializer.deserialize_any(JSValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(JSValue::Undefined.type_name(), "undefined");
        assert_eq!(JSValue::Null.type_name(), "null");
        assert_eq!(JSValue::Int(1).type_name(), "number");
        assert_eq!(JSValue::Float(f64::NAN).type_name(), "number");
        assert_eq!(JSValue::from("x").type_name(), "string");
        assert_eq!(JSValue::Array(vec![]).type_name(), "array");
        assert_eq!(JSValue::Object(IndexMap::new()).type_name(), "object");
    }

    #[test]
    fn test_from_json_keeps_integers_and_order() {
        let value = JSValue::from(serde_json::json!({"b": 1, "a": [2.5, null, "s"]}));
        let JSValue::Object(map) = &value else {
            panic!("expected object");
        };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(value.get("b"), Some(&JSValue::Int(1)));
        assert_eq!(
            value.get("a"),
            Some(&JSValue::Array(vec![
                JSValue::Float(2.5),
                JSValue::Null,
                JSValue::from("s")
            ]))
        );
    }

    #[test]
    fn test_undefined_serializes_as_null() {
        let json = serde_json::to_string(&JSValue::Array(vec![
            JSValue::Undefined,
            JSValue::Int(3),
        ]))
        .unwrap();
        assert_eq!(json, "[null,3]");
    }

    #[test]
    fn test_deserialize_large_unsigned_as_float() {
        let value: JSValue = serde_json::from_str("18446744073709551615").unwrap();
        assert!(matches!(value, JSValue::Float(_)));
        let value: JSValue = serde_json::from_str("42").unwrap();
        assert_eq!(value, JSValue::Int(42));
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(JSValue::Float(7.0).as_i64(), Some(7));
        assert_eq!(JSValue::Float(7.5).as_i64(), None);
        assert_eq!(JSValue::Float(f64::INFINITY).as_i64(), None);
        assert_eq!(JSValue::Int(3).as_f64(), Some(3.0));
        assert!(JSValue::Null.is_nullish());
        assert!(!JSValue::Bool(false).is_nullish());
    }

    #[test]
    fn test_as_i64_rejects_out_of_range_floats() {
        assert_eq!(JSValue::Float(1e300).as_i64(), None);
        assert_eq!(JSValue::Float(-1e300).as_i64(), None);
        assert_eq!(JSValue::Float(9_223_372_036_854_775_808.0).as_i64(), None);
        assert_eq!(JSValue::Float(-9_223_372_036_854_775_808.0).as_i64(), Some(i64::MIN));
        assert_eq!(JSValue::Float(f64::NAN).as_i64(), None);
    }
}
