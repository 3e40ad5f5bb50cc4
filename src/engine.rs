use crate::appointment::{
    Appointment, BookedRange, BookingReceipt, BookingRequest, BookingWarning, NewAppointment,
};
use crate::availability::{self, NewWindow, WeeklyAvailability, WeeklySchedule};
use crate::config::EngineConfig;
use crate::directory::{Directory, Role, Service, User};
use crate::error::{BookingError, BookingResult, Entity};
use crate::notify::{LogNotifier, Notifier};
use crate::persistence::{
    BookingStore, InMemoryBookingStore, InMemoryScheduleStore, ScheduleStore,
};
use crate::projection::{self, CalendarEvent};
use crate::slots::{self, DateRange, SlotCandidate};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Availability and booking operations over injected stores.
///
/// The engine keeps no state of its own: every call reads the stores afresh,
/// and the only write that matters for correctness is
/// [`BookingStore::insert_unique`]. Cloning is cheap and clones share stores.
#[derive(Clone)]
pub struct BookingEngine {
    schedules: Arc<dyn ScheduleStore>,
    bookings: Arc<dyn BookingStore>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl BookingEngine {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        bookings: Arc<dyn BookingStore>,
        directory: Arc<dyn Directory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            schedules,
            bookings,
            directory,
            notifier: Arc::new(LogNotifier),
            config,
        }
    }

    /// Fresh in-memory schedule and booking stores.
    pub fn in_memory(directory: Arc<dyn Directory>, config: EngineConfig) -> Self {
        Self::new(
            Arc::new(InMemoryScheduleStore::new()),
            Arc::new(InMemoryBookingStore::new()),
            directory,
            config,
        )
    }

    /// One SQLite database serving as schedule store, booking store and directory.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(store: Arc<crate::persistence::sqlite::SqliteStore>, config: EngineConfig) -> Self {
        Self::new(store.clone(), store.clone(), store, config)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timezone(&self) -> FixedOffset {
        self.config.timezone()
    }

    /// The clinic's civil date at `now`.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        slots::local_date(&self.timezone(), now).unwrap_or_else(|| now.date_naive())
    }

    fn require_user(&self, id: i64, role: Role) -> BookingResult<User> {
        let entity = match role {
            Role::Professional => Entity::Professional,
            Role::Patient | Role::Admin => Entity::Patient,
        };
        self.directory
            .user(id)?
            .filter(|user| user.role == role)
            .ok_or(BookingError::not_found(entity, id))
    }

    fn require_service(&self, id: i64) -> BookingResult<Service> {
        self.directory
            .service(id)?
            .ok_or(BookingError::not_found(Entity::Service, id))
    }

    fn require_facility(&self, id: i64) -> BookingResult<()> {
        match self.directory.facility(id)? {
            Some(_) => Ok(()),
            None => Err(BookingError::not_found(Entity::Facility, id)),
        }
    }

    fn check_range(&self, range_days: u32) -> BookingResult<()> {
        if range_days > self.config.max_range_days {
            return Err(BookingError::invalid(format!(
                "range of {range_days} days exceeds the maximum of {}",
                self.config.max_range_days
            )));
        }
        Ok(())
    }

    fn free_slots(
        &self,
        professional_id: i64,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> BookingResult<Vec<SlotCandidate>> {
        let windows = self.schedules.availability(professional_id)?;
        let schedule = WeeklySchedule::from_windows(&windows);
        let (from, until) = range.utc_envelope();
        let booked = self
            .bookings
            .booked_starts(professional_id, BookedRange::Between(from, until))?;
        let candidates = slots::generate(
            &schedule,
            &booked,
            range.dates(),
            now,
            self.config.slot_length(),
            &self.timezone(),
        );
        debug!(
            professional_id,
            range_start = %range.range_start,
            range_days = range.range_days,
            windows = windows.len(),
            booked = booked.len(),
            free = candidates.len(),
            "generated slots"
        );
        Ok(candidates)
    }

    /// Free slots for `range_days` dates starting at `range_start`.
    ///
    /// Both the professional and the service must exist. A date whose weekday
    /// has no unblocked window contributes nothing.
    pub fn generate_slots(
        &self,
        professional_id: i64,
        service_id: i64,
        range_start: NaiveDate,
        range_days: u32,
        now: DateTime<Utc>,
    ) -> BookingResult<Vec<SlotCandidate>> {
        self.require_user(professional_id, Role::Professional)?;
        self.require_service(service_id)?;
        self.check_range(range_days)?;
        self.free_slots(professional_id, DateRange::new(range_start, range_days), now)
    }

    /// Slots for the default horizon starting today.
    pub fn upcoming_slots(
        &self,
        professional_id: i64,
        service_id: i64,
        now: DateTime<Utc>,
    ) -> BookingResult<Vec<SlotCandidate>> {
        self.generate_slots(
            professional_id,
            service_id,
            self.today(now),
            self.config.horizon_days,
            now,
        )
    }

    /// Calendar feed for a professional's own widget: every free slot that
    /// starts in `[start, end)`.
    pub fn calendar_feed(
        &self,
        professional_id: i64,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        now: DateTime<Utc>,
    ) -> BookingResult<Vec<CalendarEvent>> {
        if end <= start {
            return Err(BookingError::invalid(format!(
                "calendar range end {end} must be after start {start}"
            )));
        }
        self.require_user(professional_id, Role::Professional)?;
        let tz = self.timezone();
        let local = |instant: DateTime<FixedOffset>| {
            slots::local_date(&tz, instant.with_timezone(&Utc)).ok_or_else(|| {
                BookingError::invalid(format!("{instant} is outside the supported calendar"))
            })
        };
        let range = DateRange::inclusive(local(start)?, local(end)?);
        self.check_range(range.range_days)?;
        let (start, end) = (start.with_timezone(&Utc), end.with_timezone(&Utc));
        let candidates: Vec<SlotCandidate> = self
            .free_slots(professional_id, range, now)?
            .into_iter()
            .filter(|slot| slot.start >= start && slot.start < end)
            .collect();
        Ok(projection::project(&candidates, &tz))
    }

    fn commit(&self, request: &BookingRequest, now: DateTime<Utc>) -> BookingResult<Appointment> {
        self.require_user(request.professional_id, Role::Professional)?;
        self.require_service(request.service_id)?;
        self.require_user(request.patient_id, Role::Patient)?;
        self.require_facility(request.facility_id)?;

        if request.start < now {
            return Err(BookingError::PastTime {
                requested: request.start,
                now,
            });
        }

        if request.start.timestamp_subsec_nanos() != 0 {
            return Err(BookingError::invalid(format!(
                "appointment start {} must be a whole second",
                request.start
            )));
        }

        if self.config.enforce_availability {
            let windows = self.schedules.availability(request.professional_id)?;
            let schedule = WeeklySchedule::from_windows(&windows);
            if !slots::is_offered(
                &schedule,
                request.start,
                self.config.slot_length(),
                &self.timezone(),
            ) {
                return Err(BookingError::invalid(format!(
                    "{} is not an offered slot for professional {}",
                    request.start, request.professional_id
                )));
            }
        }

        let conflict = || BookingError::Conflict {
            professional_id: request.professional_id,
            start: request.start,
        };

        // Fast path only; the store's unique insert below is what enforces.
        if self.bookings.is_booked(request.professional_id, request.start)? {
            warn!(
                professional_id = request.professional_id,
                start = %request.start,
                "booking rejected: slot already taken"
            );
            return Err(conflict());
        }

        let appointment = self
            .bookings
            .insert_unique(NewAppointment::from_request(request, now))
            .map_err(BookingError::from)
            .inspect_err(|err| {
                if err.is_conflict() {
                    warn!(
                        professional_id = request.professional_id,
                        start = %request.start,
                        "booking lost race for slot"
                    );
                }
            })?;

        info!(
            appointment_id = appointment.id,
            professional_id = appointment.professional_id,
            patient_id = appointment.patient_id,
            start = %appointment.start_time,
            "appointment booked"
        );
        Ok(appointment)
    }

    /// Patient self-service booking.
    ///
    /// Checks, in order: referenced records exist (`NotFound`), the start is
    /// not in the past (`PastTime`), the start is a whole second and
    /// optionally an offered slot (`Validation`), and the slot is free
    /// (`Conflict`). Two concurrent calls
    /// for the same professional and instant produce exactly one appointment.
    pub fn book(&self, request: &BookingRequest, now: DateTime<Utc>) -> BookingResult<Appointment> {
        self.commit(request, now)
    }

    /// Booking made by a professional for a patient. Same contract as
    /// [`book`](Self::book), plus a warning when the patient already holds an
    /// appointment at that instant, and a notification after commit.
    pub fn book_on_behalf(
        &self,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> BookingResult<BookingReceipt> {
        let clashes = self
            .bookings
            .patient_appointments_at(request.patient_id, request.start)?;
        let appointment = self.commit(request, now)?;

        let mut warnings = Vec::new();
        if clashes
            .iter()
            .any(|a| a.professional_id != request.professional_id)
        {
            warn!(
                patient_id = request.patient_id,
                start = %request.start,
                "patient already has another appointment at this time"
            );
            warnings.push(BookingWarning::PatientDoubleBooked {
                patient_id: request.patient_id,
                start: request.start,
            });
        }

        if let Err(err) = self.notifier.appointment_booked(&appointment) {
            error!(appointment_id = appointment.id, error = %err, "notification dispatch failed");
        }

        Ok(BookingReceipt {
            appointment,
            warnings,
        })
    }

    /// Deletes a patient's own appointment when it is far enough ahead.
    pub fn cancel(
        &self,
        appointment_id: i64,
        patient_id: i64,
        now: DateTime<Utc>,
    ) -> BookingResult<Appointment> {
        let appointment = self
            .bookings
            .appointment(appointment_id)?
            .filter(|a| a.patient_id == patient_id)
            .ok_or(BookingError::not_found(Entity::Appointment, appointment_id))?;

        if appointment.start_time - now < self.config.cancellation_notice() {
            return Err(BookingError::CancellationTooLate {
                notice_hours: self.config.cancellation_notice_hours,
            });
        }

        if !self.bookings.delete(appointment_id)? {
            return Err(BookingError::not_found(Entity::Appointment, appointment_id));
        }
        info!(
            appointment_id,
            patient_id,
            professional_id = appointment.professional_id,
            "appointment cancelled"
        );
        Ok(appointment)
    }

    pub fn upcoming_for_patient(
        &self,
        patient_id: i64,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BookingResult<Vec<Appointment>> {
        Ok(self
            .bookings
            .for_patient(patient_id)?
            .into_iter()
            .filter(|a| a.start_time >= now)
            .take(limit)
            .collect())
    }

    /// Past appointments, most recent first.
    pub fn history_for_patient(
        &self,
        patient_id: i64,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BookingResult<Vec<Appointment>> {
        Ok(self
            .bookings
            .for_patient(patient_id)?
            .into_iter()
            .rev()
            .filter(|a| a.start_time < now)
            .take(limit)
            .collect())
    }

    pub fn upcoming_for_professional(
        &self,
        professional_id: i64,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BookingResult<Vec<Appointment>> {
        Ok(self
            .bookings
            .for_professional(professional_id)?
            .into_iter()
            .filter(|a| a.start_time >= now)
            .take(limit)
            .collect())
    }

    /// All windows of the professional, blocked ones included.
    pub fn windows(&self, professional_id: i64) -> BookingResult<Vec<WeeklyAvailability>> {
        self.require_user(professional_id, Role::Professional)?;
        Ok(self.schedules.windows(professional_id)?)
    }

    /// Every stored window across professionals, for export.
    pub fn all_windows(&self) -> BookingResult<Vec<WeeklyAvailability>> {
        Ok(self.schedules.all_windows()?)
    }

    pub fn add_window(&self, window: NewWindow) -> BookingResult<WeeklyAvailability> {
        self.require_user(window.professional_id, Role::Professional)?;
        availability::validate_new_window(&window)
            .map_err(|err| BookingError::invalid(err.to_string()))?;
        let (record, created) = self.schedules.insert_window(window)?;
        if created {
            info!(
                window_id = record.id,
                professional_id = record.professional_id,
                weekday = %record.weekday,
                "availability window created"
            );
        }
        Ok(record)
    }

    /// Bulk insert; windows already present are left untouched. Returns how
    /// many were new.
    pub fn import_windows<I>(&self, windows: I) -> BookingResult<usize>
    where
        I: IntoIterator<Item = NewWindow>,
    {
        let mut created = 0;
        for window in windows {
            self.require_user(window.professional_id, Role::Professional)?;
            let (_, is_new) = self.schedules.insert_window(window)?;
            if is_new {
                created += 1;
            }
        }
        info!(created, "availability windows imported");
        Ok(created)
    }

    /// Monday to Friday, morning and afternoon blocks.
    pub fn seed_standard_week(&self, professional_id: i64) -> BookingResult<usize> {
        self.import_windows(availability::standard_week(professional_id))
    }

    /// Blocks or unblocks a window. Only the owning professional may do so.
    pub fn set_blocked(
        &self,
        window_id: i64,
        professional_id: i64,
        blocked: bool,
    ) -> BookingResult<WeeklyAvailability> {
        let window = self
            .schedules
            .window(window_id)?
            .ok_or(BookingError::not_found(Entity::AvailabilityWindow, window_id))?;
        if window.professional_id != professional_id {
            return Err(BookingError::NotOwner {
                window_id,
                professional_id,
            });
        }
        let updated = self
            .schedules
            .update_blocked(window_id, blocked)?
            .ok_or(BookingError::not_found(Entity::AvailabilityWindow, window_id))?;
        info!(window_id, professional_id, blocked, "availability window updated");
        Ok(updated)
    }

    pub fn toggle_blocked(
        &self,
        window_id: i64,
        professional_id: i64,
    ) -> BookingResult<WeeklyAvailability> {
        let current = self
            .schedules
            .window(window_id)?
            .ok_or(BookingError::not_found(Entity::AvailabilityWindow, window_id))?;
        self.set_blocked(window_id, professional_id, !current.blocked)
    }
}
