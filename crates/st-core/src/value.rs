use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ScalarValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    VariableRef(String),
}

impl ScalarValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::VariableRef(_) => "variableRef",
        }
    }
}

impl fmt::Display for ScalarValue {
    /// Plain-text rendering: strings bare, booleans lowercase, whole-valued
    /// floats keep a trailing `.0` so the float type survives a re-parse.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{:.1}", value)
                } else {
                    write!(f, "{}", value)
                }
            }
            Self::Boolean(value) => write!(f, "{}", value),
            Self::VariableRef(name) => write!(f, "${}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedVariable {
    pub name: String,
    pub value: ScalarValue,
}

impl TypedVariable {
    pub fn new(name: impl Into<String>, value: ScalarValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_each_kind() {
        assert_eq!(ScalarValue::String("a b".to_string()).to_string(), "a b");
        assert_eq!(ScalarValue::Integer(-3).to_string(), "-3");
        assert_eq!(ScalarValue::Float(2.5).to_string(), "2.5");
        assert_eq!(ScalarValue::Float(2.0).to_string(), "2.0");
        assert_eq!(ScalarValue::Boolean(true).to_string(), "true");
        assert_eq!(
            ScalarValue::VariableRef("probe".to_string()).to_string(),
            "$probe"
        );
    }

    #[test]
    fn serde_round_trips_tagged_values() {
        let value = ScalarValue::Integer(7);
        let json = serde_json::to_string(&value).expect("serializes");
        assert_eq!(json, r#"{"kind":"integer","value":7}"#);
        let back: ScalarValue = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, value);
    }
}
