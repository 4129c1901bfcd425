//! Recovers structured records from free-form generator output.
//!
//! Generators are asked for YAML but routinely wrap it in prose, fence it with the wrong label,
//! indent it, or answer in JSON. The parser tries fenced blocks first, then the whole text,
//! decoding YAML before JSON, and only accepts a mapping. Every failure is reported as a
//! [`ParseError`] by the `try_*` methods and collapses to `None` elsewhere.

pub mod error;
pub mod fence;
pub mod schema;

pub use error::ParseError;
pub use schema::{FieldType, Schema, value_kind};

use crate::core::NodeValue;

/// A decoded response: string keys, arbitrary values.
pub type Record = serde_json::Map<String, NodeValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Inputs longer than this are rejected without decoding
    pub max_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { max_bytes: 50_000 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser {
    config: ParserConfig,
}

impl ResponseParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Extracts and validates a record, or `None` on any failure.
    pub fn parse(&self, text: &str, schema: &Schema) -> Option<Record> {
        self.try_parse(text, schema)
            .inspect_err(|err| log::warn!("structured response rejected: {err}"))
            .ok()
    }

    /// Extracts a record without schema validation.
    pub fn extract_only(&self, text: &str) -> Option<Record> {
        self.try_extract(text)
            .inspect_err(|err| log::warn!("structured response rejected: {err}"))
            .ok()
    }

    pub fn try_parse(&self, text: &str, schema: &Schema) -> Result<Record, ParseError> {
        let record = self.try_extract(text)?;
        schema.validate(&record)?;
        Ok(record)
    }

    pub fn try_extract(&self, text: &str) -> Result<Record, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        if text.len() > self.config.max_bytes {
            return Err(ParseError::TooLarge {
                size: text.len(),
                max: self.config.max_bytes,
            });
        }
        log::debug!("parsing response: {}", preview(text, 120));

        for block in fence::fenced_blocks(text) {
            match decode(&fence::dedent(block)) {
                Ok(record) => return Ok(record),
                Err(err) => log::debug!("fenced block skipped: {err}"),
            }
        }
        decode(&fence::dedent(text))
    }
}

/// [`ResponseParser::parse`] with the default configuration.
pub fn parse(text: &str, schema: &Schema) -> Option<Record> {
    ResponseParser::default().parse(text, schema)
}

/// [`ResponseParser::extract_only`] with the default configuration.
pub fn extract_only(text: &str) -> Option<Record> {
    ResponseParser::default().extract_only(text)
}

/// YAML first, JSON second; only a mapping counts as success.
fn decode(payload: &str) -> Result<Record, ParseError> {
    let yaml_failure = match serde_yaml::from_str::<NodeValue>(payload) {
        Ok(NodeValue::Object(map)) => return Ok(map),
        Ok(other) => ParseError::NotAMapping {
            found: value_kind(&other),
        },
        Err(err) => ParseError::Undecodable(err.to_string()),
    };

    match serde_json::from_str::<NodeValue>(payload) {
        Ok(NodeValue::Object(map)) => Ok(map),
        Ok(other) => Err(ParseError::NotAMapping {
            found: value_kind(&other),
        }),
        Err(_) => Err(yaml_failure),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        out.push_str("...");
    }
    out
}
