use super::{BookingStore, PersistenceError, PersistenceResult, ScheduleStore};
use crate::appointment::{Appointment, BookedRange, NewAppointment};
use crate::availability::{NewWindow, WeeklyAvailability, weekday_index};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
struct WindowTable {
    last_id: i64,
    rows: BTreeMap<i64, WeeklyAvailability>,
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    table: RwLock<WindowTable>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_windows(windows: &mut [WeeklyAvailability]) {
    windows.sort_by_key(|w| (weekday_index(w.weekday), w.start_time, w.id));
}

impl ScheduleStore for InMemoryScheduleStore {
    fn windows(&self, professional_id: i64) -> PersistenceResult<Vec<WeeklyAvailability>> {
        let mut windows: Vec<WeeklyAvailability> = self
            .table
            .read()
            .rows
            .values()
            .filter(|w| w.professional_id == professional_id)
            .cloned()
            .collect();
        sort_windows(&mut windows);
        Ok(windows)
    }

    fn window(&self, window_id: i64) -> PersistenceResult<Option<WeeklyAvailability>> {
        Ok(self.table.read().rows.get(&window_id).cloned())
    }

    fn insert_window(&self, window: NewWindow) -> PersistenceResult<(WeeklyAvailability, bool)> {
        super::validate_new_window(&window)?;
        let mut table = self.table.write();
        if let Some(existing) = table.rows.values().find(|w| {
            w.professional_id == window.professional_id
                && w.weekday == window.weekday
                && w.start_time == window.start_time
        }) {
            return Ok((existing.clone(), false));
        }
        table.last_id += 1;
        let record = window.into_window(table.last_id);
        table.rows.insert(record.id, record.clone());
        Ok((record, true))
    }

    fn update_blocked(
        &self,
        window_id: i64,
        blocked: bool,
    ) -> PersistenceResult<Option<WeeklyAvailability>> {
        let mut table = self.table.write();
        Ok(table.rows.get_mut(&window_id).map(|window| {
            window.blocked = blocked;
            window.clone()
        }))
    }

    fn all_windows(&self) -> PersistenceResult<Vec<WeeklyAvailability>> {
        Ok(self.table.read().rows.values().cloned().collect())
    }
}

type Ledger = Arc<Mutex<BTreeMap<DateTime<Utc>, Appointment>>>;

/// Appointments keyed by professional. Each professional has its own ledger
/// behind its own mutex, so the check-and-insert for one professional never
/// waits on bookings for another.
#[derive(Debug)]
pub struct InMemoryBookingStore {
    last_id: AtomicI64,
    ledgers: RwLock<HashMap<i64, Ledger>>,
    owners: RwLock<HashMap<i64, i64>>,
}

impl Default for InMemoryBookingStore {
    fn default() -> Self {
        Self {
            last_id: AtomicI64::new(0),
            ledgers: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self, professional_id: i64) -> Ledger {
        if let Some(ledger) = self.ledgers.read().get(&professional_id) {
            return ledger.clone();
        }
        self.ledgers
            .write()
            .entry(professional_id)
            .or_default()
            .clone()
    }

    fn existing_ledger(&self, professional_id: i64) -> Option<Ledger> {
        self.ledgers.read().get(&professional_id).cloned()
    }

    fn all_ledgers(&self) -> Vec<Ledger> {
        self.ledgers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.all_ledgers().iter().map(|l| l.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BookingStore for InMemoryBookingStore {
    fn booked_starts(
        &self,
        professional_id: i64,
        range: BookedRange,
    ) -> PersistenceResult<HashSet<DateTime<Utc>>> {
        let Some(ledger) = self.existing_ledger(professional_id) else {
            return Ok(HashSet::new());
        };
        let guard = ledger.lock();
        Ok(guard
            .keys()
            .copied()
            .filter(|start| range.contains(*start))
            .collect())
    }

    fn is_booked(&self, professional_id: i64, start: DateTime<Utc>) -> PersistenceResult<bool> {
        Ok(self
            .existing_ledger(professional_id)
            .is_some_and(|ledger| ledger.lock().contains_key(&start)))
    }

    fn patient_appointments_at(
        &self,
        patient_id: i64,
        start: DateTime<Utc>,
    ) -> PersistenceResult<Vec<Appointment>> {
        let mut found = Vec::new();
        for ledger in self.all_ledgers() {
            if let Some(appointment) = ledger.lock().get(&start) {
                if appointment.patient_id == patient_id {
                    found.push(appointment.clone());
                }
            }
        }
        found.sort_by_key(|a| a.id);
        Ok(found)
    }

    fn insert_unique(&self, appointment: NewAppointment) -> PersistenceResult<Appointment> {
        let ledger = self.ledger(appointment.professional_id);
        let mut guard = ledger.lock();
        if guard.contains_key(&appointment.start_time) {
            return Err(PersistenceError::Conflict {
                professional_id: appointment.professional_id,
                start: appointment.start_time,
            });
        }
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = appointment.into_appointment(id);
        guard.insert(record.start_time, record.clone());
        self.owners.write().insert(id, record.professional_id);
        Ok(record)
    }

    fn appointment(&self, id: i64) -> PersistenceResult<Option<Appointment>> {
        let Some(professional_id) = self.owners.read().get(&id).copied() else {
            return Ok(None);
        };
        let Some(ledger) = self.existing_ledger(professional_id) else {
            return Ok(None);
        };
        let guard = ledger.lock();
        Ok(guard.values().find(|a| a.id == id).cloned())
    }

    fn delete(&self, id: i64) -> PersistenceResult<bool> {
        let Some(professional_id) = self.owners.read().get(&id).copied() else {
            return Ok(false);
        };
        let Some(ledger) = self.existing_ledger(professional_id) else {
            return Ok(false);
        };
        let mut guard = ledger.lock();
        let Some(start) = guard.values().find(|a| a.id == id).map(|a| a.start_time) else {
            return Ok(false);
        };
        guard.remove(&start);
        self.owners.write().remove(&id);
        Ok(true)
    }

    fn for_professional(&self, professional_id: i64) -> PersistenceResult<Vec<Appointment>> {
        Ok(self
            .existing_ledger(professional_id)
            .map(|ledger| ledger.lock().values().cloned().collect())
            .unwrap_or_default())
    }

    fn for_patient(&self, patient_id: i64) -> PersistenceResult<Vec<Appointment>> {
        let mut found: Vec<Appointment> = Vec::new();
        for ledger in self.all_ledgers() {
            found.extend(
                ledger
                    .lock()
                    .values()
                    .filter(|a| a.patient_id == patient_id)
                    .cloned(),
            );
        }
        found.sort_by_key(|a| (a.start_time, a.id));
        Ok(found)
    }
}
