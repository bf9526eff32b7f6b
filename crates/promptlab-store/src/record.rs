//! Record shapes stored in the per-user tables.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row type with a fixed, ordered column set.
///
/// `COLUMNS` must list the serialized field names in declaration order; the
/// CSV codec writes the header from it and relies on serde emitting fields in
/// the same order.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLUMNS: &'static [&'static str];
}

/// One answer to one quiz question. Unique per `(email, question_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub email: String,
    pub question_number: i64,
    pub answer: String,
    pub ai_usage: String,
    pub time_taken: i64,
    pub submitted_at: String,
}

impl Record for AnswerRecord {
    const COLUMNS: &'static [&'static str] = &[
        "email",
        "question_number",
        "answer",
        "ai_usage",
        "time_taken",
        "submitted_at",
    ];
}

impl AnswerRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        email: &str,
        question_number: i64,
        answer: &str,
        ai_usage: &str,
        time_taken: i64,
    ) -> Self {
        Self {
            email: email.to_string(),
            question_number,
            answer: answer.to_string(),
            ai_usage: ai_usage.to_string(),
            time_taken,
            submitted_at: now_timestamp(),
        }
    }

    /// True if this record occupies the `(email, question_number)` slot.
    pub fn same_slot(&self, email: &str, question_number: i64) -> bool {
        self.email == email && self.question_number == question_number
    }
}

/// One prompt sent from the playground. Append-only, never deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub email: String,
    pub question_number: i64,
    pub prompt: String,
    /// Model parameters, stored as JSON text in a single CSV cell.
    #[serde(with = "json_cell")]
    pub parameters: Map<String, Value>,
    pub response: String,
    pub timestamp: String,
}

impl Record for InteractionRecord {
    const COLUMNS: &'static [&'static str] = &[
        "email",
        "question_number",
        "prompt",
        "parameters",
        "response",
        "timestamp",
    ];
}

impl InteractionRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        email: &str,
        question_number: i64,
        prompt: &str,
        parameters: Map<String, Value>,
        response: &str,
    ) -> Self {
        Self {
            email: email.to_string(),
            question_number,
            prompt: prompt.to_string(),
            parameters,
            response: response.to_string(),
            timestamp: now_timestamp(),
        }
    }
}

/// RFC 3339 UTC timestamp with microsecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serde adapter for a JSON object kept as text inside one cell.
mod json_cell {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::{Map, Value};

    pub fn serialize<S: Serializer>(map: &Map<String, Value>, ser: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(map).map_err(<S::Error as serde::ser::Error>::custom)?;
        ser.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Map<String, Value>, D::Error> {
        let text = String::deserialize(de)?;
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text).map_err(<D::Error as de::Error>::custom)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(de::Error::custom(format!(
                "parameters must be a JSON object, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_columns_match_fields() {
        let rec = AnswerRecord::new("a@x.com", 1, "yes", "none", 30);
        let value = serde_json::to_value(&rec).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, AnswerRecord::COLUMNS);
    }

    #[test]
    fn test_interaction_parameters_serialize_as_text() {
        let mut params = Map::new();
        params.insert("temperature".into(), Value::from(0.7));
        let rec = InteractionRecord::new("a@x.com", 2, "p", params, "r");
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["parameters"], Value::from(r#"{"temperature":0.7}"#));
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, InteractionRecord::COLUMNS);
    }

    #[test]
    fn test_same_slot() {
        let rec = AnswerRecord::new("a@x.com", 3, "a1", "none", 10);
        assert!(rec.same_slot("a@x.com", 3));
        assert!(!rec.same_slot("a@x.com", 4));
        assert!(!rec.same_slot("b@x.com", 3));
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
