//! Event-bus payload types (§4.I).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::JobStatus;

/// One envelope published on the event bus and forwarded to every
/// subscriber in publish order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// Sent once, immediately after a subscriber registers.
    Connected,
    /// Sent when no other event has been published for the heartbeat
    /// interval.
    Heartbeat,
    /// A job transitioned to a new status.
    JobStatusChange {
        /// The job that transitioned.
        job_id: String,
        /// Its new status.
        status: JobStatus,
        /// The node whose state change triggered this, if applicable.
        #[serde(skip_serializing_if = "Option::is_none")]
        node_name: Option<String>,
    },
    /// The ingester upserted one or more `diagnostic_results` rows.
    DiagnosticResultsUpdated,
}

/// The wire envelope: `{type, timestamp, ...payload}`.
#[derive(Debug, Clone, Serialize)]
pub struct BusEnvelope {
    /// When this event was published.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub event: BusEvent,
}

impl BusEnvelope {
    /// Wrap an event with the current timestamp.
    #[must_use]
    pub fn now(event: BusEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_type_tag() {
        let env = BusEnvelope::now(BusEvent::DiagnosticResultsUpdated);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "diagnostic_results_updated");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn job_status_change_carries_optional_node_name() {
        let env = BusEnvelope::now(BusEvent::JobStatusChange {
            job_id: "j1".into(),
            status: JobStatus::Running,
            node_name: None,
        });
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("node_name").is_none());
    }
}
