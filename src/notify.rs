use crate::appointment::Appointment;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("notification dispatch failed: {0}")]
pub struct NotifyError(pub String);

/// Receives booking events the engine does not wait on.
pub trait Notifier: Send + Sync {
    fn appointment_booked(&self, appointment: &Appointment) -> Result<(), NotifyError>;
}

/// Writes the event to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn appointment_booked(&self, appointment: &Appointment) -> Result<(), NotifyError> {
        info!(
            appointment_id = appointment.id,
            patient_id = appointment.patient_id,
            professional_id = appointment.professional_id,
            start = %appointment.start_time,
            "patient notified of appointment booked on their behalf"
        );
        Ok(())
    }
}

/// Keeps every event in memory; handy for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    booked: Mutex<Vec<Appointment>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn booked(&self) -> Vec<Appointment> {
        self.booked.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn appointment_booked(&self, appointment: &Appointment) -> Result<(), NotifyError> {
        self.booked.lock().push(appointment.clone());
        Ok(())
    }
}
