//! Canonical event representation.
//!
//! Every inbound notification, however it was authenticated, ends up as an
//! [`Event`]. Events are built once per request and handed to handlers behind
//! an `Arc`, so nothing downstream can mutate them.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Registered JWT claims that never leak into an event body.
const REGISTERED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

/// Well-known Canvas live-event type names.
pub mod event_types {
    pub const ASSIGNMENT_CREATED: &str = "assignment_created";
    pub const ASSIGNMENT_UPDATED: &str = "assignment_updated";
    pub const ATTACHMENT_CREATED: &str = "attachment_created";
    pub const CONVERSATION_CREATED: &str = "conversation_created";
    pub const COURSE_CREATED: &str = "course_created";
    pub const COURSE_UPDATED: &str = "course_updated";
    pub const DISCUSSION_ENTRY_CREATED: &str = "discussion_entry_created";
    pub const DISCUSSION_TOPIC_CREATED: &str = "discussion_topic_created";
    pub const ENROLLMENT_CREATED: &str = "enrollment_created";
    pub const ENROLLMENT_UPDATED: &str = "enrollment_updated";
    pub const GRADE_CHANGE: &str = "grade_change";
    pub const LOGGED_IN: &str = "logged_in";
    pub const QUIZ_SUBMITTED: &str = "quiz_submitted";
    pub const SUBMISSION_CREATED: &str = "submission_created";
    pub const SUBMISSION_UPDATED: &str = "submission_updated";
    pub const USER_CREATED: &str = "user_created";
    pub const WIKI_PAGE_CREATED: &str = "wiki_page_created";
}

/// A normalized inbound notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Publisher-assigned event id, if one was sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Event type used for handler routing; empty when the payload named none
    pub event_type: String,

    /// When the publisher says the event happened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,

    /// Event payload, in publisher key order. Never absent.
    pub body: Map<String, Value>,
}

/// Errors decoding a JSON-shaped webhook body.
#[derive(Debug, Error)]
pub enum EventBodyError {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("body must be a JSON object")]
    NotAnObject,

    #[error("field `{0}` has the wrong type")]
    WrongFieldType(&'static str),
}

/// Wire shape of a plain JSON webhook body.
#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    event_time: Option<Value>,
    #[serde(default)]
    body: Option<Value>,
}

impl Event {
    /// Create an event with an empty body.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            event_time: None,
            body: Map::new(),
        }
    }

    /// Set the event id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the event body.
    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    /// Map decoded token claims onto an event.
    ///
    /// The event type comes from `metadata.event_name`, falling back to
    /// `event_type`. The body prefers `body`, then `data`, then every claim
    /// that is not a registered JWT claim. A malformed `event_time` is
    /// dropped rather than failing the mapping.
    pub fn from_claims(claims: Map<String, Value>) -> Self {
        let event_type = claims
            .get("metadata")
            .and_then(|m| m.get("event_name"))
            .and_then(Value::as_str)
            .or_else(|| claims.get("event_type").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let id = claims.get("id").and_then(value_to_id);

        let event_time = claims.get("event_time").and_then(parse_event_time);

        let body = match (claims.get("body"), claims.get("data")) {
            (Some(Value::Object(body)), _) => body.clone(),
            (_, Some(Value::Object(data))) => data.clone(),
            _ => claims
                .iter()
                .filter(|(k, _)| !REGISTERED_CLAIMS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        Self {
            id,
            event_type,
            event_time,
            body,
        }
    }

    /// Decode a plain JSON webhook body (`{id?, event_type, event_time?, body?}`).
    pub fn from_json_slice(raw: &[u8]) -> Result<Self, EventBodyError> {
        let value: Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(EventBodyError::NotAnObject);
        }

        let envelope: JsonEnvelope = serde_json::from_value(value)?;

        let body = match envelope.body {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(body)) => body,
            Some(_) => return Err(EventBodyError::WrongFieldType("body")),
        };

        Ok(Self {
            id: envelope.id.as_ref().and_then(value_to_id),
            event_type: envelope.event_type.unwrap_or_default(),
            event_time: envelope.event_time.as_ref().and_then(parse_event_time),
            body,
        })
    }

    /// Look up a top-level body field.
    pub fn body_value(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Look up a top-level body field as a string. Non-strings yield `None`.
    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    /// Decode the body into a typed view.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.body.clone()))
    }

    pub fn is_empty_body(&self) -> bool {
        self.body.is_empty()
    }
}

/// Ids are usually strings, but some publishers send numbers.
fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_event_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("claims must be an object"),
        }
    }

    #[test]
    fn test_event_type_prefers_metadata_event_name() {
        let event = Event::from_claims(claims(json!({
            "metadata": {"event_name": "submission_created"},
            "event_type": "ignored",
        })));
        assert_eq!(event.event_type, "submission_created");
    }

    #[test]
    fn test_event_type_falls_back_to_claim_then_empty() {
        let event = Event::from_claims(claims(json!({"event_type": "grade_change"})));
        assert_eq!(event.event_type, "grade_change");

        let event = Event::from_claims(claims(json!({"metadata": {"other": 1}})));
        assert_eq!(event.event_type, "");
    }

    #[test]
    fn test_body_prefers_body_then_data() {
        let event = Event::from_claims(claims(json!({
            "body": {"a": 1},
            "data": {"b": 2},
        })));
        assert_eq!(event.body_value("a"), Some(&json!(1)));
        assert!(event.body_value("b").is_none());

        let event = Event::from_claims(claims(json!({"body": "not a map", "data": {"b": 2}})));
        assert_eq!(event.body_value("b"), Some(&json!(2)));
    }

    #[test]
    fn test_body_falls_back_to_non_registered_claims() {
        let event = Event::from_claims(claims(json!({
            "iss": "canvas",
            "sub": "user",
            "aud": "me",
            "exp": 1,
            "nbf": 1,
            "iat": 1,
            "jti": "x",
            "event_type": "course_created",
            "course_id": "42",
        })));

        assert_eq!(event.body_str("course_id"), Some("42"));
        assert_eq!(event.body_str("event_type"), Some("course_created"));
        for claim in REGISTERED_CLAIMS {
            assert!(event.body_value(claim).is_none(), "{claim} leaked");
        }
    }

    #[test]
    fn test_event_time_soft_fails() {
        let event = Event::from_claims(claims(json!({
            "id": "evt-1",
            "event_time": "2024-03-01T12:30:00Z",
        })));
        assert_eq!(event.id.as_deref(), Some("evt-1"));
        assert_eq!(
            event.event_time.map(|t| t.to_rfc3339()),
            Some("2024-03-01T12:30:00+00:00".to_string())
        );

        let event = Event::from_claims(claims(json!({"event_time": "yesterday"})));
        assert!(event.event_time.is_none());
    }

    #[test]
    fn test_numeric_id_is_stringified() {
        let event = Event::from_claims(claims(json!({"id": 1234})));
        assert_eq!(event.id.as_deref(), Some("1234"));
    }

    #[test]
    fn test_from_json_slice() {
        let raw = br#"{"id":"e1","event_type":"user_created","event_time":"2024-01-01T00:00:00+02:00","body":{"user_id":"7"}}"#;
        let event = Event::from_json_slice(raw).unwrap();

        assert_eq!(event.id.as_deref(), Some("e1"));
        assert_eq!(event.event_type, "user_created");
        assert!(event.event_time.is_some());
        assert_eq!(event.body_str("user_id"), Some("7"));
    }

    #[test]
    fn test_from_json_slice_defaults_body() {
        let event = Event::from_json_slice(br#"{"event_type":"logged_in"}"#).unwrap();
        assert!(event.is_empty_body());

        let event = Event::from_json_slice(br#"{"event_type":"logged_in","body":null}"#).unwrap();
        assert!(event.is_empty_body());
    }

    #[test]
    fn test_from_json_slice_rejects_wrong_shapes() {
        assert!(matches!(
            Event::from_json_slice(b"not json"),
            Err(EventBodyError::InvalidJson(_))
        ));
        assert!(matches!(
            Event::from_json_slice(b"[1,2]"),
            Err(EventBodyError::NotAnObject)
        ));
        assert!(matches!(
            Event::from_json_slice(br#"{"event_type":"x","body":[1]}"#),
            Err(EventBodyError::WrongFieldType("body"))
        ));
    }

    #[test]
    fn test_body_preserves_key_order() {
        let event = Event::from_json_slice(br#"{"event_type":"x","body":{"z":1,"a":2,"m":3}}"#)
            .unwrap();
        let keys: Vec<&str> = event.body.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_decode_body() {
        #[derive(Deserialize)]
        struct Submission {
            submission_id: String,
        }

        let event = Event::from_json_slice(
            br#"{"event_type":"submission_created","body":{"submission_id":"99","extra":true}}"#,
        )
        .unwrap();
        let submission: Submission = event.decode_body().unwrap();
        assert_eq!(submission.submission_id, "99");
    }
}
