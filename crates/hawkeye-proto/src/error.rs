use thiserror::Error;

use crate::property::PropertyShape;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed batch: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown property value kind: {0}")]
    UnknownValueKind(String),
    #[error("property tagged {expected} but value is shaped as {found}")]
    PropertyShape {
        expected: PropertyShape,
        found: PropertyShape,
    },
    #[error("struct sequence element {index} is not a struct")]
    StructSequenceElement { index: usize },
}
