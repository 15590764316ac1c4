use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_core::AggregateId;

use crate::Event;

/// Envelope for a committed event, carrying stream metadata.
///
/// `sequence_number` is the aggregate version reached once this event was
/// applied, so consumers can detect gaps and duplicates per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,
    sequence_number: u64,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            sequence_number,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event + Serialize> EventEnvelope<E> {
    /// Wrap a typed event; stream and type names and `occurred_at` come from the event itself.
    pub fn wrap(aggregate_id: AggregateId, sequence_number: u64, payload: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            aggregate_id,
            E::AGGREGATE_TYPE,
            payload.event_type(),
            sequence_number,
            payload.occurred_at(),
            payload,
        )
    }

    /// Erase the payload type for transport over a JSON bus.
    pub fn to_json(&self) -> Result<EventEnvelope<serde_json::Value>, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type.clone(),
            event_type: self.event_type.clone(),
            sequence_number: self.sequence_number,
            occurred_at: self.occurred_at,
            payload: serde_json::to_value(&self.payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Counted {
        at: DateTime<Utc>,
        amount: u32,
    }

    impl Event for Counted {
        const AGGREGATE_TYPE: &'static str = "counter";

        fn event_type(&self) -> &'static str {
            "counter.counted"
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn wrap_takes_names_and_time_from_the_event() {
        let at = Utc::now();
        let aggregate_id = AggregateId::new();
        let envelope = EventEnvelope::wrap(aggregate_id, 3, Counted { at, amount: 7 });

        assert_eq!(envelope.aggregate_type(), "counter");
        assert_eq!(envelope.event_type(), "counter.counted");
        assert_eq!(envelope.occurred_at(), at);
        assert_eq!(envelope.sequence_number(), 3);

        let json = envelope.to_json().unwrap();
        assert_eq!(json.aggregate_id(), aggregate_id);
        assert_eq!(json.payload()["amount"], 7);
    }
}
