//! Typed event payloads.
//!
//! Known event types get a concrete payload struct implementing
//! [`EventPayload`]; the raw `event_data` map remains the representation
//! for types a process does not know, e.g. older schema versions met
//! during replay.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::Clock;
use crate::error::EventError;
use crate::event::DomainEvent;

/// A payload bound to one event type.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync {
    /// The `event_type` discriminator this payload is published under.
    const EVENT_TYPE: &'static str;

    /// Schema version written with new events.
    const SCHEMA_VERSION: i32 = 1;
}

impl DomainEvent {
    /// Creates an event from a typed payload.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Validation` if the payload does not serialize
    /// to a JSON object.
    pub fn from_payload<P: EventPayload>(
        aggregate_id: impl Into<String>,
        payload: &P,
        clock: &dyn Clock,
    ) -> Result<Self, EventError> {
        let serde_json::Value::Object(event_data) = serde_json::to_value(payload)? else {
            return Err(EventError::Validation(format!(
                "payload for {} must serialize to an object",
                P::EVENT_TYPE
            )));
        };
        Ok(Self::new(aggregate_id, P::EVENT_TYPE, event_data, clock)
            .with_schema_version(P::SCHEMA_VERSION))
    }

    /// Decodes `event_data` into the typed payload for this event type.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Validation` if the event type does not match
    /// `P::EVENT_TYPE` or the data does not fit the payload shape.
    pub fn decode<P: EventPayload>(&self) -> Result<P, EventError> {
        if self.event_type() != P::EVENT_TYPE {
            return Err(EventError::Validation(format!(
                "cannot decode {} as {}",
                self.event_type(),
                P::EVENT_TYPE
            )));
        }
        serde_json::from_value(serde_json::Value::Object(self.event_data().clone())).map_err(
            |e| {
                EventError::Validation(format!(
                    "event {} (schema v{}) does not match {}: {e}",
                    self.event_id(),
                    self.schema_version(),
                    P::EVENT_TYPE
                ))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::Deserialize;

    struct TestClock;

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct UserRegistered {
        email: String,
    }

    impl EventPayload for UserRegistered {
        const EVENT_TYPE: &'static str = "UserRegistered";
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SubscriptionActivated {
        plan: String,
    }

    impl EventPayload for SubscriptionActivated {
        const EVENT_TYPE: &'static str = "SubscriptionActivated";
        const SCHEMA_VERSION: i32 = 2;
    }

    #[test]
    fn test_from_payload_sets_type_and_version() {
        let payload = SubscriptionActivated {
            plan: "pro".into(),
        };

        let event = DomainEvent::from_payload("S1", &payload, &TestClock).unwrap();

        assert_eq!(event.event_type(), "SubscriptionActivated");
        assert_eq!(event.schema_version(), 2);
        assert_eq!(event.event_data()["plan"], "pro");
    }

    #[test]
    fn test_decode_returns_typed_payload() {
        let payload = UserRegistered {
            email: "a@b.com".into(),
        };
        let event = DomainEvent::from_payload("U1", &payload, &TestClock).unwrap();

        let decoded: UserRegistered = event.decode().unwrap();

        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_decode_rejects_mismatched_event_type() {
        let payload = UserRegistered {
            email: "a@b.com".into(),
        };
        let event = DomainEvent::from_payload("U1", &payload, &TestClock).unwrap();

        let result = event.decode::<SubscriptionActivated>();

        assert!(matches!(result, Err(EventError::Validation(_))));
    }

    #[test]
    fn test_from_payload_rejects_non_object_payload() {
        #[derive(Serialize, Deserialize)]
        struct Scalar(u32);

        impl EventPayload for Scalar {
            const EVENT_TYPE: &'static str = "CounterBumped";
        }

        let result = DomainEvent::from_payload("C1", &Scalar(3), &TestClock);

        assert!(matches!(result, Err(EventError::Validation(_))));
    }
}
