use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed booking. Duration is the system-wide slot length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub professional_id: i64,
    pub patient_id: i64,
    pub service_id: i64,
    pub facility_id: i64,
    pub start_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input to the booking transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub patient_id: i64,
    pub professional_id: i64,
    pub service_id: i64,
    pub facility_id: i64,
    /// Must fall on a whole second; stores keep no finer precision.
    pub start: DateTime<Utc>,
}

/// Row handed to a booking store for an atomic unique insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub professional_id: i64,
    pub patient_id: i64,
    pub service_id: i64,
    pub facility_id: i64,
    pub start_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewAppointment {
    pub fn from_request(request: &BookingRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            professional_id: request.professional_id,
            patient_id: request.patient_id,
            service_id: request.service_id,
            facility_id: request.facility_id,
            start_time: request.start,
            created_at,
        }
    }

    pub fn into_appointment(self, id: i64) -> Appointment {
        Appointment {
            id,
            professional_id: self.professional_id,
            patient_id: self.patient_id,
            service_id: self.service_id,
            facility_id: self.facility_id,
            start_time: self.start_time,
            created_at: self.created_at,
        }
    }
}

/// Which booked instants a slot query needs to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookedRange {
    /// Everything starting at or after the instant.
    From(DateTime<Utc>),
    /// Half-open `[start, end)`.
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl BookedRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        match *self {
            BookedRange::From(start) => instant >= start,
            BookedRange::Between(start, end) => instant >= start && instant < end,
        }
    }
}

/// Non-fatal findings attached to a professional-initiated booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingWarning {
    /// The patient already holds another appointment at the same instant.
    PatientDoubleBooked {
        patient_id: i64,
        start: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub appointment: Appointment,
    #[serde(default)]
    pub warnings: Vec<BookingWarning>,
}
