//! Decoded payload formats.
//!
//! Badges carry a JSON object `{"id": ..., "name": ...}`. Anything that is not
//! a JSON object is taken as a bare student id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::Student;

/// The JSON printed on a student's QR badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentBadge {
    /// Student document id.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl StudentBadge {
    /// Render the badge payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&Student> for StudentBadge {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id.clone(),
            name: student.name.clone(),
        }
    }
}

/// A payload after parsing, before identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPayload {
    /// A JSON object with an id and maybe a name.
    Structured {
        /// Student id.
        id: String,
        /// Name carried on the badge, if any.
        name: Option<String>,
    },
    /// A JSON object without a usable id.
    Invalid,
    /// Plain text to look up as a student id.
    Raw(String),
}

impl ScanPayload {
    /// Classify a decoded payload.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) else {
            return Self::Raw(text.to_string());
        };

        let id = match object.get("id") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if id.is_empty() {
            return Self::Invalid;
        }

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self::Structured { id, name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_payload() {
        assert_eq!(
            ScanPayload::parse(r#"{"id":"s1","name":"Sara"}"#),
            ScanPayload::Structured {
                id: "s1".to_string(),
                name: Some("Sara".to_string())
            }
        );
    }

    #[test]
    fn test_structured_payload_without_name() {
        assert_eq!(
            ScanPayload::parse(r#"{"id":"s1"}"#),
            ScanPayload::Structured {
                id: "s1".to_string(),
                name: None
            }
        );
    }

    #[test]
    fn test_numeric_id_is_accepted() {
        assert_eq!(
            ScanPayload::parse(r#"{"id":42,"name":""}"#),
            ScanPayload::Structured {
                id: "42".to_string(),
                name: None
            }
        );
    }

    #[test]
    fn test_object_without_id_is_invalid() {
        assert_eq!(ScanPayload::parse(r#"{"name":"Sara"}"#), ScanPayload::Invalid);
        assert_eq!(ScanPayload::parse(r#"{"id":"  "}"#), ScanPayload::Invalid);
        assert_eq!(ScanPayload::parse(r#"{"id":null}"#), ScanPayload::Invalid);
    }

    #[test]
    fn test_plain_text_is_raw() {
        assert_eq!(
            ScanPayload::parse("a8f3k2"),
            ScanPayload::Raw("a8f3k2".to_string())
        );
    }

    #[test]
    fn test_non_object_json_is_raw() {
        assert_eq!(ScanPayload::parse("12345"), ScanPayload::Raw("12345".to_string()));
        assert_eq!(
            ScanPayload::parse(r#""quoted""#),
            ScanPayload::Raw(r#""quoted""#.to_string())
        );
    }

    #[test]
    fn test_badge_encodes_as_structured_payload() {
        let badge = StudentBadge {
            id: "s9".to_string(),
            name: "Lina".to_string(),
        };
        let encoded = badge.encode().unwrap();
        assert_eq!(
            ScanPayload::parse(&encoded),
            ScanPayload::Structured {
                id: "s9".to_string(),
                name: Some("Lina".to_string())
            }
        );
    }
}
