use crate::parser::schema::FieldType;
use thiserror::Error;

/// Why a generator response was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("response is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("response is neither YAML nor JSON: {0}")]
    Undecodable(String),

    #[error("response decoded to a {found}, expected a mapping")]
    NotAMapping { found: &'static str },

    #[error("required field '{0}' is missing")]
    MissingField(String),

    #[error("field '{field}' should be a {expected}, found {found}")]
    WrongType {
        field: String,
        expected: FieldType,
        found: &'static str,
    },
}
