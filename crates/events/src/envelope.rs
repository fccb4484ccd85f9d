use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Envelope for a committed event, carrying stream metadata.
///
/// `stream_id` names the ordered stream the event belongs to (for the ledger:
/// one stream per variant + warehouse). `sequence_number` is strictly
/// increasing within a stream and equals the commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream_id: String,
    event_type: String,
    event_version: u32,
    sequence_number: u64,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        stream_id: impl Into<String>,
        event_type: impl Into<String>,
        event_version: u32,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id: stream_id.into(),
            event_type: event_type.into(),
            event_version,
            sequence_number,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
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

impl EventEnvelope<serde_json::Value> {
    /// Wrap a typed event as a JSON envelope, keeping its metadata.
    pub fn from_typed<E>(
        event_id: Uuid,
        stream_id: impl Into<String>,
        sequence_number: u64,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            event_id,
            stream_id,
            event.event_type(),
            event.version(),
            sequence_number,
            event.occurred_at(),
            payload,
        ))
    }
}
