//! Wire formats shared with the Resque ecosystem
//!
//! Queue entries, worker status records and failure records are JSON
//! documents whose field names are fixed by the external producers and
//! dashboards reading the same keys.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Serialization errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Malformed JSON or a document of the wrong shape
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Job envelope without a class name
    #[error("job envelope has an empty class")]
    EmptyClass,
}

/// Job envelope: `{"class": "...", "args": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub class: String,

    /// Absent and `null` args both decode as empty
    #[serde(default, deserialize_with = "null_as_empty")]
    pub args: Vec<Value>,
}

impl Payload {
    pub fn new(class: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            class: class.into(),
            args,
        }
    }

    /// Canonical string form of the arguments, used for duplicate detection
    pub fn args_signature(&self) -> String {
        Value::Array(self.args.clone()).to_string()
    }

    /// Whether two envelopes name the same class with the same arguments
    ///
    /// Numbers compare by value, so `1` and `1.0` are the same argument.
    pub fn same_job(&self, other: &Payload) -> bool {
        self.class == other.class
            && self.args.len() == other.args.len()
            && self.args.iter().zip(&other.args).all(|(a, b)| same_value(a, b))
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A job taken off a queue, on its way to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub queue: String,
    pub payload: Payload,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: Payload) -> Self {
        Self {
            queue: queue.into(),
            payload,
        }
    }
}

/// What a worker is doing right now, stored under `worker:<id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStatus {
    pub queue: String,
    pub run_at: DateTime<Utc>,
    pub payload: Payload,
}

/// A failed job, appended to the `failed` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub failed_at: DateTime<Utc>,
    pub payload: Payload,
    pub exception: String,
    pub error: String,
    pub worker: String,
    pub queue: String,
}

/// Encode any wire document
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode any wire document
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(raw)?)
}

/// Encode a job envelope, rejecting an empty class
pub fn encode_payload(payload: &Payload) -> Result<String, CodecError> {
    if payload.class.is_empty() {
        return Err(CodecError::EmptyClass);
    }
    encode(payload)
}

/// Decode a job envelope, rejecting an empty class
pub fn decode_payload(raw: &str) -> Result<Payload, CodecError> {
    let payload: Payload = decode(raw)?;
    if payload.class.is_empty() {
        return Err(CodecError::EmptyClass);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_roundtrip_with_mixed_args() {
        let payload = Payload::new(
            "SendEmail",
            vec![json!("foo"), json!(true), json!(1), json!(0.999999), json!(null)],
        );

        let raw = encode_payload(&payload).unwrap();
        let decoded = decode_payload(&raw).unwrap();

        assert_eq!(decoded.class, "SendEmail");
        assert_eq!(decoded.args, payload.args);
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = Payload::new("Archive", vec![json!(42)]);
        assert_eq!(
            encode_payload(&payload).unwrap(),
            r#"{"class":"Archive","args":[42]}"#
        );
    }

    #[test]
    fn test_absent_or_null_args_decode_empty() {
        assert!(decode_payload(r#"{"class":"A"}"#).unwrap().args.is_empty());
        assert!(decode_payload(r#"{"class":"A","args":null}"#)
            .unwrap()
            .args
            .is_empty());
    }

    #[test]
    fn test_empty_class_rejected() {
        assert!(matches!(
            decode_payload(r#"{"class":"","args":[]}"#),
            Err(CodecError::EmptyClass)
        ));
        assert!(matches!(
            encode_payload(&Payload::new("", vec![])),
            Err(CodecError::EmptyClass)
        ));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(decode_payload("{not json"), Err(CodecError::Json(_))));
        assert!(matches!(decode_payload(r#"{"args":[]}"#), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_same_job_compares_class_and_args() {
        let a = Payload::new("A", vec![json!(1), json!("x")]);
        assert!(a.same_job(&Payload::new("A", vec![json!(1), json!("x")])));
        assert!(!a.same_job(&Payload::new("A", vec![json!(2), json!("x")])));
        assert!(!a.same_job(&Payload::new("B", vec![json!(1), json!("x")])));
        assert!(!a.same_job(&Payload::new("A", vec![json!(1)])));
    }

    #[test]
    fn test_same_job_compares_numbers_by_value() {
        let a = Payload::new("A", vec![json!(1), json!({ "n": [2, 3.5] })]);
        let decoded = decode_payload(r#"{"class":"A","args":[1.0,{"n":[2.0,3.5]}]}"#).unwrap();
        assert!(a.same_job(&decoded));
        assert!(!a.same_job(&Payload::new("A", vec![json!(1.5), json!({ "n": [2, 3.5] })])));
        assert!(!a.same_job(&Payload::new("A", vec![json!("1"), json!({ "n": [2, 3.5] })])));
    }

    #[test]
    fn test_status_and_failure_field_names() {
        let run_at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let status = WorkStatus {
            queue: "high".into(),
            run_at,
            payload: Payload::new("A", vec![]),
        };
        let value: Value = serde_json::from_str(&encode(&status).unwrap()).unwrap();
        assert_eq!(value["queue"], "high");
        assert_eq!(value["run_at"], "2024-05-01T10:00:00Z");
        assert_eq!(value["payload"]["class"], "A");

        let failure = Failure {
            failed_at: run_at,
            payload: Payload::new("A", vec![]),
            exception: "Error".into(),
            error: "boom".into(),
            worker: "host:1-0:high".into(),
            queue: "high".into(),
        };
        let value: Value = serde_json::from_str(&encode(&failure).unwrap()).unwrap();
        let mut fields: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        fields.sort();
        assert_eq!(
            fields,
            vec!["error", "exception", "failed_at", "payload", "queue", "worker"]
        );
    }
}
