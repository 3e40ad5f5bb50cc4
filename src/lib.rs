pub mod appointment;
pub mod availability;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
#[cfg(feature = "http_api")]
pub mod http_api;
pub mod notify;
pub mod persistence;
pub mod projection;
pub mod slots;

pub use appointment::{Appointment, BookingReceipt, BookingRequest, BookingWarning};
pub use availability::{NewWindow, WeeklyAvailability, WeeklySchedule};
pub use config::{ConfigError, EngineConfig, ServerConfig};
pub use directory::{Directory, Facility, InMemoryDirectory, Role, Service, User};
pub use engine::BookingEngine;
pub use error::{BookingError, BookingResult, Entity};
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
#[cfg(feature = "sqlite")]
pub use persistence::sqlite::SqliteStore;
pub use persistence::{
    BookingStore, InMemoryBookingStore, InMemoryScheduleStore, PersistenceError, ScheduleStore,
    load_windows_from_csv, load_windows_from_json, save_windows_to_csv, save_windows_to_json,
};
pub use projection::CalendarEvent;
pub use slots::{DateRange, SlotCandidate};
