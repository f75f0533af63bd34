//! Immutable scalar values.

use crate::actor::hex;

/// An immutable scalar stored in an object member or array slot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Primitive {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the unix epoch.
    Date(i64),
}

impl Primitive {
    pub fn type_name(&self) -> &'static str {
        return match self {
            Primitive::Null => "null",
            Primitive::Boolean(_) => "boolean",
            Primitive::Integer(_) => "integer",
            Primitive::Long(_) => "long",
            Primitive::Double(_) => "double",
            Primitive::String(_) => "string",
            Primitive::Bytes(_) => "bytes",
            Primitive::Date(_) => "date",
        };
    }

    /// True for the variants a counter can be built from or increased by.
    pub fn is_numeric(&self) -> bool {
        return matches!(
            self,
            Primitive::Integer(_) | Primitive::Long(_) | Primitive::Double(_)
        );
    }

    /// Render as a JSON value. Bytes become a hex string, dates a number.
    pub fn to_json(&self) -> String {
        return match self {
            Primitive::Null => "null".to_string(),
            Primitive::Boolean(value) => value.to_string(),
            Primitive::Integer(value) => value.to_string(),
            Primitive::Long(value) => value.to_string(),
            Primitive::Double(value) => double_to_json(*value),
            Primitive::String(value) => quote(value),
            Primitive::Bytes(value) => quote(&hex(value)),
            Primitive::Date(value) => value.to_string(),
        };
    }
}

/// JSON string literal with escaping.
pub(crate) fn quote(text: &str) -> String {
    return serde_json::Value::String(text.to_string()).to_string();
}

pub(crate) fn double_to_json(value: f64) -> String {
    return match serde_json::Number::from_f64(value) {
        Some(number) => number.to_string(),
        None => "null".to_string(),
    };
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        return Primitive::Boolean(value);
    }
}

impl From<i32> for Primitive {
    fn from(value: i32) -> Self {
        return Primitive::Integer(value);
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        return Primitive::Long(value);
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        return Primitive::Double(value);
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        return Primitive::String(value.to_string());
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        return Primitive::String(value);
    }
}

impl From<Vec<u8>> for Primitive {
    fn from(value: Vec<u8>) -> Self {
        return Primitive::Bytes(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_projection() {
        assert_eq!(Primitive::Null.to_json(), "null");
        assert_eq!(Primitive::from(true).to_json(), "true");
        assert_eq!(Primitive::from(7).to_json(), "7");
        assert_eq!(Primitive::from(1i64 << 40).to_json(), "1099511627776");
        assert_eq!(Primitive::from(1.5).to_json(), "1.5");
        assert_eq!(Primitive::Double(f64::NAN).to_json(), "null");
        assert_eq!(Primitive::from("a\"b").to_json(), "\"a\\\"b\"");
        assert_eq!(Primitive::from(vec![0x0a, 0xff]).to_json(), "\"0aff\"");
        assert_eq!(Primitive::Date(1_700_000_000_000).to_json(), "1700000000000");
    }

    #[test]
    fn numeric_variants() {
        assert!(Primitive::from(1).is_numeric());
        assert!(Primitive::from(1.0).is_numeric());
        assert!(!Primitive::from("1").is_numeric());
        assert!(!Primitive::Date(0).is_numeric());
    }
}
