use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::message::Extra;

/// Optional discriminant a producer may write next to `value`.
pub const VALUE_KIND_KEY: &str = "valueKind";
pub const VALUE_KEY: &str = "value";
pub const ACCESS_KEY: &str = "access";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyShape {
    Simple,
    Struct,
    Sequence,
    StructSequence,
}

impl PropertyShape {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "simple" => Some(PropertyShape::Simple),
            "struct" => Some(PropertyShape::Struct),
            "sequence" => Some(PropertyShape::Sequence),
            "structsequence" => Some(PropertyShape::StructSequence),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            PropertyShape::Simple => "simple",
            PropertyShape::Struct => "struct",
            PropertyShape::Sequence => "sequence",
            PropertyShape::StructSequence => "structsequence",
        }
    }

    /// Shape a raw value has when nobody told us what it is.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Array(items) => match items.first() {
                Some(Value::Object(_)) => PropertyShape::StructSequence,
                _ => PropertyShape::Sequence,
            },
            Value::Object(_) => PropertyShape::Struct,
            _ => PropertyShape::Simple,
        }
    }
}

impl fmt::Display for PropertyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A property's `value`, discriminated by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Simple(Value),
    Struct(Map<String, Value>),
    Sequence(Vec<Value>),
    StructSequence(Vec<Map<String, Value>>),
}

impl PropertyValue {
    /// Reads `value` out of a property message's extra mapping.
    ///
    /// When the producer wrote `valueKind` the value must have that shape;
    /// otherwise the shape is inferred from the value itself.
    pub fn from_extra(extra: &Extra) -> Result<Self, ProtocolError> {
        let value = extra.get(VALUE_KEY).cloned().unwrap_or(Value::Null);
        let found = PropertyShape::infer(&value);
        let shape = match extra.get_str(VALUE_KIND_KEY) {
            Some(tag) => {
                let expected = PropertyShape::from_tag(tag)
                    .ok_or_else(|| ProtocolError::UnknownValueKind(tag.to_string()))?;
                let compatible = expected == found
                    || (expected == PropertyShape::StructSequence
                        && value.as_array().is_some_and(|items| items.is_empty()));
                if !compatible {
                    return Err(ProtocolError::PropertyShape { expected, found });
                }
                expected
            }
            None => found,
        };
        Self::with_shape(shape, value)
    }

    fn with_shape(shape: PropertyShape, value: Value) -> Result<Self, ProtocolError> {
        Ok(match (shape, value) {
            (PropertyShape::Struct, Value::Object(map)) => PropertyValue::Struct(map),
            (PropertyShape::Sequence, Value::Array(items)) => PropertyValue::Sequence(items),
            (PropertyShape::StructSequence, Value::Array(items)) => {
                let mut structs = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    match item {
                        Value::Object(map) => structs.push(map),
                        _ => return Err(ProtocolError::StructSequenceElement { index }),
                    }
                }
                PropertyValue::StructSequence(structs)
            }
            (_, other) => PropertyValue::Simple(other),
        })
    }

    pub fn shape(&self) -> PropertyShape {
        match self {
            PropertyValue::Simple(_) => PropertyShape::Simple,
            PropertyValue::Struct(_) => PropertyShape::Struct,
            PropertyValue::Sequence(_) => PropertyShape::Sequence,
            PropertyValue::StructSequence(_) => PropertyShape::StructSequence,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            PropertyValue::Simple(value) => value,
            PropertyValue::Struct(map) => Value::Object(map),
            PropertyValue::Sequence(items) => Value::Array(items),
            PropertyValue::StructSequence(structs) => {
                Value::Array(structs.into_iter().map(Value::Object).collect())
            }
        }
    }
}
