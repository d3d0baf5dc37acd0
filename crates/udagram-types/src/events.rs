use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event type published by the user service after a profile change.
pub const USER_UPDATED: &str = "UserUpdated";

/// An application event as published to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl EventMessage {
    pub fn new<T: Serialize>(event_type: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event_type: event_type.to_string(),
            data: serde_json::to_value(payload)?,
            timestamp: Utc::now(),
        })
    }

    /// Decode a queue message body. Accepts the topic's notification envelope
    /// as well as a bare event (raw message delivery).
    pub fn decode(body: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(body)?;
        match value.get("Message").and_then(Value::as_str) {
            Some(inner) => serde_json::from_str(inner),
            None => serde_json::from_value(value),
        }
    }
}

/// Payload of a `UserUpdated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Transport envelope a topic wraps around every published message.
/// `message` holds the serialized [`EventMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    #[serde(rename = "Type")]
    pub kind: String,
    pub message_id: Uuid,
    pub topic_arn: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn wrap(topic: &str, message: String) -> Self {
        Self {
            kind: "Notification".to_string(),
            message_id: Uuid::new_v4(),
            topic_arn: topic.to_string(),
            message,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> EventMessage {
        EventMessage::new(
            USER_UPDATED,
            &UserUpdated {
                id: Uuid::new_v4(),
                name: "Ada".into(),
                avatar_url: Some("http://localhost/objects/avatars/a.png".into()),
            },
        )
        .unwrap()
    }

    #[test]
    fn decode_unwraps_notification_envelope() {
        let event = sample_event();
        let envelope = Notification::wrap("user-events", serde_json::to_string(&event).unwrap());
        let body = serde_json::to_string(&envelope).unwrap();

        assert!(body.contains("\"Type\":\"Notification\""));
        assert_eq!(EventMessage::decode(&body).unwrap(), event);
    }

    #[test]
    fn decode_accepts_raw_event() {
        let event = sample_event();
        let body = serde_json::to_string(&event).unwrap();
        assert!(body.contains("\"eventType\":\"UserUpdated\""));
        assert_eq!(EventMessage::decode(&body).unwrap(), event);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(EventMessage::decode("not json").is_err());
        assert!(EventMessage::decode(r#"{"Message":"{oops"}"#).is_err());
    }

    #[test]
    fn user_updated_tolerates_missing_avatar() {
        let payload: UserUpdated =
            serde_json::from_str(r#"{"id":"00000000-0000-0000-0000-000000000007","name":"Bo"}"#)
                .unwrap();
        assert_eq!(payload.avatar_url, None);
    }
}
