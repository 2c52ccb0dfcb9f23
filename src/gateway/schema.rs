//! Strict validation of raw model output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shape a request type's response must have.
///
/// Only required top-level fields are checked; anything else in the object
/// is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSchema {
    pub required: Vec<String>,
}

impl ResponseSchema {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    fn missing<'a>(&'a self, object: &Map<String, Value>) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|f| !object.contains_key(f.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// One-line description for correction prompts.
    pub fn describe(&self) -> Option<String> {
        if self.required.is_empty() {
            None
        } else {
            Some(format!("Required fields: {}.", self.required.join(", ")))
        }
    }
}

/// Why a raw reply was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    NotJson(String),
    NotObject,
    MissingFields(Vec<String>),
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotJson(e) => write!(f, "not valid JSON: {}", e),
            Self::NotObject => f.write_str("JSON is not an object"),
            Self::MissingFields(fields) => write!(f, "missing fields: {}", fields.join(", ")),
        }
    }
}

/// Parse `raw` as a JSON object, checking `schema` if one is registered.
///
/// Surrounding whitespace is tolerated. Prose around the JSON, code fences,
/// or trailing text are not.
pub fn parse_strict(
    raw: &str,
    schema: Option<&ResponseSchema>,
) -> std::result::Result<Map<String, Value>, ParseFailure> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|e| ParseFailure::NotJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ParseFailure::NotObject);
    };
    if let Some(schema) = schema {
        let missing = schema.missing(&object);
        if !missing.is_empty() {
            return Err(ParseFailure::MissingFields(
                missing.into_iter().map(String::from).collect(),
            ));
        }
    }
    Ok(object)
}
