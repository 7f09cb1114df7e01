//! Domain event vocabulary
//!
//! The fixed set of event names the server pushes. Payloads stay opaque
//! `serde_json::Value`s; only the navigation hint has a typed view.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Named domain events pushed by the realtime server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    QueueUpdated,
    NewCheckin,
    VisitStatusChanged,
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentCancelled,
    PatientCreated,
    PatientUpdated,
    PaymentProcessed,
    QueueReordered,
    WalkinAdded,
    VisitCancelled,
    CurrentAppointmentAvailable,
}

impl EventName {
    /// Every event in the vocabulary
    pub const ALL: [EventName; 13] = [
        EventName::QueueUpdated,
        EventName::NewCheckin,
        EventName::VisitStatusChanged,
        EventName::AppointmentCreated,
        EventName::AppointmentUpdated,
        EventName::AppointmentCancelled,
        EventName::PatientCreated,
        EventName::PatientUpdated,
        EventName::PaymentProcessed,
        EventName::QueueReordered,
        EventName::WalkinAdded,
        EventName::VisitCancelled,
        EventName::CurrentAppointmentAvailable,
    ];

    /// Events that change reception dashboard aggregates
    pub const DASHBOARD: [EventName; 9] = [
        EventName::QueueUpdated,
        EventName::NewCheckin,
        EventName::VisitStatusChanged,
        EventName::AppointmentCreated,
        EventName::AppointmentUpdated,
        EventName::AppointmentCancelled,
        EventName::PatientCreated,
        EventName::PatientUpdated,
        EventName::PaymentProcessed,
    ];

    /// Events that change a queue listing
    pub const QUEUE: [EventName; 5] = [
        EventName::QueueUpdated,
        EventName::QueueReordered,
        EventName::WalkinAdded,
        EventName::VisitCancelled,
        EventName::VisitStatusChanged,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::QueueUpdated => "queue_updated",
            EventName::NewCheckin => "new_checkin",
            EventName::VisitStatusChanged => "visit_status_changed",
            EventName::AppointmentCreated => "appointment_created",
            EventName::AppointmentUpdated => "appointment_updated",
            EventName::AppointmentCancelled => "appointment_cancelled",
            EventName::PatientCreated => "patient_created",
            EventName::PatientUpdated => "patient_updated",
            EventName::PaymentProcessed => "payment_processed",
            EventName::QueueReordered => "queue_reordered",
            EventName::WalkinAdded => "walkin_added",
            EventName::VisitCancelled => "visit_cancelled",
            EventName::CurrentAppointmentAvailable => "current_appointment_available",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name outside the vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event name: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventName {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Typed view of a `current_appointment_available` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentAppointmentHint {
    /// User the hint is addressed to
    pub target_user_id: u64,
    /// Whether the receiving view should navigate to the appointment
    pub navigate: bool,
}

impl CurrentAppointmentHint {
    /// Lenient parse; `None` when no usable target user is present.
    /// The target may arrive as a number or a numeric string.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let target = payload
            .get("target_user_id")
            .or_else(|| payload.get("user_id"))?;
        let target_user_id = match target {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        let navigate = payload
            .get("navigate")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Some(Self {
            target_user_id,
            navigate,
        })
    }

    /// Whether this hint is addressed to `user_id`
    pub fn is_for(&self, user_id: u64) -> bool {
        self.target_user_id == user_id
    }
}
