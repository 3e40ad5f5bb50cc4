use crate::appointment::{Appointment, BookedRange, NewAppointment};
use crate::availability::{self, NewWindow, WeeklyAvailability};
use chrono::{DateTime, Utc};
use serde_json::Error as SerdeJsonError;
use std::collections::HashSet;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("serialization error: {0}")]
    Serialization(#[from] SerdeJsonError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// The `(professional_id, start_time)` pair is already taken.
    #[error("professional {professional_id} already has an appointment at {start}")]
    Conflict {
        professional_id: i64,
        start: DateTime<Utc>,
    },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Recurring availability windows, owned per professional.
pub trait ScheduleStore: Send + Sync {
    /// Every window of the professional, blocked ones included, ordered by
    /// weekday then start time.
    fn windows(&self, professional_id: i64) -> PersistenceResult<Vec<WeeklyAvailability>>;

    fn window(&self, window_id: i64) -> PersistenceResult<Option<WeeklyAvailability>>;

    /// Get-or-create keyed on `(professional_id, weekday, start_time)`.
    /// The flag is `true` when a new row was written.
    fn insert_window(&self, window: NewWindow) -> PersistenceResult<(WeeklyAvailability, bool)>;

    fn update_blocked(
        &self,
        window_id: i64,
        blocked: bool,
    ) -> PersistenceResult<Option<WeeklyAvailability>>;

    fn all_windows(&self) -> PersistenceResult<Vec<WeeklyAvailability>>;

    /// Unblocked windows only; this is what slot generation sees.
    fn availability(&self, professional_id: i64) -> PersistenceResult<Vec<WeeklyAvailability>> {
        let mut windows = self.windows(professional_id)?;
        windows.retain(|w| !w.blocked);
        Ok(windows)
    }
}

/// Committed appointments. `insert_unique` is the only write path and must
/// reject a second row for the same `(professional_id, start_time)` atomically.
pub trait BookingStore: Send + Sync {
    fn booked_starts(
        &self,
        professional_id: i64,
        range: BookedRange,
    ) -> PersistenceResult<HashSet<DateTime<Utc>>>;

    fn is_booked(&self, professional_id: i64, start: DateTime<Utc>) -> PersistenceResult<bool>;

    fn patient_appointments_at(
        &self,
        patient_id: i64,
        start: DateTime<Utc>,
    ) -> PersistenceResult<Vec<Appointment>>;

    fn insert_unique(&self, appointment: NewAppointment) -> PersistenceResult<Appointment>;

    fn appointment(&self, id: i64) -> PersistenceResult<Option<Appointment>>;

    fn delete(&self, id: i64) -> PersistenceResult<bool>;

    /// Ascending by start time.
    fn for_professional(&self, professional_id: i64) -> PersistenceResult<Vec<Appointment>>;

    /// Ascending by start time.
    fn for_patient(&self, patient_id: i64) -> PersistenceResult<Vec<Appointment>>;
}

pub fn validate_new_window(window: &NewWindow) -> PersistenceResult<()> {
    availability::validate_new_window(window)
        .map_err(|err| PersistenceError::InvalidData(err.to_string()))
}

pub fn validate_windows(windows: &[WeeklyAvailability]) -> PersistenceResult<()> {
    availability::validate_window_collection(windows)
        .map_err(|err| PersistenceError::InvalidData(err.to_string()))
}

pub mod file;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::{
    load_windows_from_csv, load_windows_from_json, save_windows_to_csv, save_windows_to_json,
};
pub use memory::{InMemoryBookingStore, InMemoryScheduleStore};
