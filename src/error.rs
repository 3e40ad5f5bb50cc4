use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::persistence::PersistenceError;

/// Record kinds the engine can fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Professional,
    Patient,
    Service,
    Facility,
    Appointment,
    AvailabilityWindow,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Professional => "professional",
            Entity::Patient => "patient",
            Entity::Service => "service",
            Entity::Facility => "facility",
            Entity::Appointment => "appointment",
            Entity::AvailabilityWindow => "availability window",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by slot generation, booking and cancellation.
///
/// Every variant is recoverable by the caller: a conflict means "choose another
/// time", the rest mean "fix the input".
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("cannot book in the past: {requested} is before {now}")]
    PastTime {
        requested: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("slot no longer available: professional {professional_id} at {start}")]
    Conflict {
        professional_id: i64,
        start: DateTime<Utc>,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("availability window {window_id} does not belong to professional {professional_id}")]
    NotOwner { window_id: i64, professional_id: i64 },

    #[error("appointments can only be cancelled at least {notice_hours} hours in advance")]
    CancellationTooLate { notice_hours: i64 },

    #[error("storage error: {0}")]
    Persistence(PersistenceError),
}

impl BookingError {
    pub fn not_found(entity: Entity, id: i64) -> Self {
        BookingError::NotFound { entity, id }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        BookingError::Validation(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BookingError::Conflict { .. })
    }
}

impl From<PersistenceError> for BookingError {
    fn from(value: PersistenceError) -> Self {
        match value {
            PersistenceError::Conflict {
                professional_id,
                start,
            } => BookingError::Conflict {
                professional_id,
                start,
            },
            PersistenceError::InvalidData(message) => BookingError::Validation(message),
            other => BookingError::Persistence(other),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn store_conflict_becomes_booking_conflict() {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let err = BookingError::from(PersistenceError::Conflict {
            professional_id: 7,
            start,
        });
        assert!(err.is_conflict());
        assert!(err.to_string().contains("slot no longer available"));
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = BookingError::not_found(Entity::Service, 4);
        assert_eq!(err.to_string(), "service 4 not found");
    }
}
