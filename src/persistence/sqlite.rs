use super::{BookingStore, PersistenceError, PersistenceResult, ScheduleStore};
use crate::appointment::{Appointment, BookedRange, NewAppointment};
use crate::availability::{NewWindow, WeeklyAvailability, weekday_from_index, weekday_index};
use crate::directory::{Directory, Facility, Role, Service, User};
use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use std::collections::HashSet;

/// SQLite-backed schedule, booking and directory store.
///
/// `appointments` carries `UNIQUE (professional_id, start_time)`; that index,
/// not the pre-insert lookup, is what keeps two bookings off the same slot,
/// including across processes sharing the database file.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

const TIME_FORMAT: &str = "%H:%M:%S";

impl SqliteStore {
    pub fn new<P: AsRef<std::path::Path>>(path: P) -> PersistenceResult<Self> {
        let connection = Connection::open(path)?;
        Self::from_connection(connection)
    }

    pub fn in_memory() -> PersistenceResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> PersistenceResult<Self> {
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn initialize_schema(connection: &Connection) -> PersistenceResult<()> {
        let ddl = r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                role TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS services (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT
            );
            CREATE TABLE IF NOT EXISTS facilities (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                address TEXT
            );
            CREATE TABLE IF NOT EXISTS availability_windows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                professional_id INTEGER NOT NULL,
                weekday INTEGER NOT NULL CHECK (weekday BETWEEN 0 AND 6),
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                blocked INTEGER NOT NULL DEFAULT 0,
                CHECK (start_time < end_time),
                UNIQUE (professional_id, weekday, start_time)
            );
            CREATE TABLE IF NOT EXISTS appointments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                professional_id INTEGER NOT NULL,
                patient_id INTEGER NOT NULL,
                service_id INTEGER NOT NULL,
                facility_id INTEGER NOT NULL,
                start_time INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (professional_id, start_time)
            );
            CREATE INDEX IF NOT EXISTS appointments_by_patient
                ON appointments (patient_id, start_time);
        "#;
        connection.execute_batch(ddl)?;
        Ok(())
    }

    pub fn upsert_user(&self, user: &User) -> PersistenceResult<()> {
        let conn = self.connection.lock();
        conn.execute(
            "INSERT INTO users (id, name, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, role = excluded.role",
            params![user.id, user.name, user.role.as_str()],
        )?;
        Ok(())
    }

    pub fn upsert_service(&self, service: &Service) -> PersistenceResult<()> {
        let conn = self.connection.lock();
        conn.execute(
            "INSERT INTO services (id, name, kind) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, kind = excluded.kind",
            params![service.id, service.name, service.kind],
        )?;
        Ok(())
    }

    pub fn upsert_facility(&self, facility: &Facility) -> PersistenceResult<()> {
        let conn = self.connection.lock();
        conn.execute(
            "INSERT INTO facilities (id, name, address) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, address = excluded.address",
            params![facility.id, facility.name, facility.address],
        )?;
        Ok(())
    }

    pub fn users_with_role(&self, role: Role) -> PersistenceResult<Vec<User>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare("SELECT id, name FROM users WHERE role = ?1 ORDER BY name, id")?;
        let rows = stmt.query_map(params![role.as_str()], |row| {
            Ok(User::new(row.get(0)?, row.get::<_, String>(1)?, role))
        })?;
        let mut users = Vec::new();
        for user in rows {
            users.push(user?);
        }
        Ok(users)
    }
}

struct WindowRow {
    id: i64,
    professional_id: i64,
    weekday: i64,
    start_time: String,
    end_time: String,
    blocked: bool,
}

const WINDOW_COLUMNS: &str = "id, professional_id, weekday, start_time, end_time, blocked";

impl WindowRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            professional_id: row.get(1)?,
            weekday: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            blocked: row.get(5)?,
        })
    }
}

impl TryFrom<WindowRow> for WeeklyAvailability {
    type Error = PersistenceError;

    fn try_from(row: WindowRow) -> Result<Self, Self::Error> {
        let weekday = u8::try_from(row.weekday)
            .ok()
            .and_then(weekday_from_index)
            .ok_or_else(|| {
                PersistenceError::InvalidData(format!(
                    "window {} has invalid weekday {}",
                    row.id, row.weekday
                ))
            })?;
        Ok(WeeklyAvailability {
            id: row.id,
            professional_id: row.professional_id,
            weekday,
            start_time: parse_time(&row.start_time)?,
            end_time: parse_time(&row.end_time)?,
            blocked: row.blocked,
        })
    }
}

fn parse_time(value: &str) -> PersistenceResult<NaiveTime> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|_| PersistenceError::InvalidData(format!("invalid stored time '{value}'")))
}

fn to_micros(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

fn from_micros(value: i64) -> PersistenceResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| PersistenceError::InvalidData(format!("invalid stored instant {value}")))
}

struct AppointmentRow {
    id: i64,
    professional_id: i64,
    patient_id: i64,
    service_id: i64,
    facility_id: i64,
    start_time: i64,
    created_at: i64,
}

const APPOINTMENT_COLUMNS: &str =
    "id, professional_id, patient_id, service_id, facility_id, start_time, created_at";

impl AppointmentRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            professional_id: row.get(1)?,
            patient_id: row.get(2)?,
            service_id: row.get(3)?,
            facility_id: row.get(4)?,
            start_time: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = PersistenceError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            professional_id: row.professional_id,
            patient_id: row.patient_id,
            service_id: row.service_id,
            facility_id: row.facility_id,
            start_time: from_micros(row.start_time)?,
            created_at: from_micros(row.created_at)?,
        })
    }
}

fn collect_windows<I>(rows: I) -> PersistenceResult<Vec<WeeklyAvailability>>
where
    I: Iterator<Item = rusqlite::Result<WindowRow>>,
{
    let mut windows = Vec::new();
    for row in rows {
        windows.push(WeeklyAvailability::try_from(row?)?);
    }
    Ok(windows)
}

fn collect_appointments<I>(rows: I) -> PersistenceResult<Vec<Appointment>>
where
    I: Iterator<Item = rusqlite::Result<AppointmentRow>>,
{
    let mut appointments = Vec::new();
    for row in rows {
        appointments.push(Appointment::try_from(row?)?);
    }
    Ok(appointments)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl ScheduleStore for SqliteStore {
    fn windows(&self, professional_id: i64) -> PersistenceResult<Vec<WeeklyAvailability>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WINDOW_COLUMNS} FROM availability_windows
             WHERE professional_id = ?1 ORDER BY weekday, start_time, id"
        ))?;
        let rows = stmt.query_map(params![professional_id], WindowRow::read)?;
        collect_windows(rows)
    }

    fn window(&self, window_id: i64) -> PersistenceResult<Option<WeeklyAvailability>> {
        let conn = self.connection.lock();
        let row = conn
            .query_row(
                &format!("SELECT {WINDOW_COLUMNS} FROM availability_windows WHERE id = ?1"),
                params![window_id],
                WindowRow::read,
            )
            .optional()?;
        row.map(WeeklyAvailability::try_from).transpose()
    }

    fn insert_window(&self, window: NewWindow) -> PersistenceResult<(WeeklyAvailability, bool)> {
        super::validate_new_window(&window)?;
        let mut conn = self.connection.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let start = window.start_time.format(TIME_FORMAT).to_string();
        let end = window.end_time.format(TIME_FORMAT).to_string();
        let weekday = weekday_index(window.weekday);
        let inserted = tx.execute(
            "INSERT INTO availability_windows
                 (professional_id, weekday, start_time, end_time, blocked)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(professional_id, weekday, start_time) DO NOTHING",
            params![window.professional_id, weekday, start, end, window.blocked],
        )?;
        let row = tx.query_row(
            &format!(
                "SELECT {WINDOW_COLUMNS} FROM availability_windows
                 WHERE professional_id = ?1 AND weekday = ?2 AND start_time = ?3"
            ),
            params![window.professional_id, weekday, start],
            WindowRow::read,
        )?;
        tx.commit()?;
        Ok((WeeklyAvailability::try_from(row)?, inserted > 0))
    }

    fn update_blocked(
        &self,
        window_id: i64,
        blocked: bool,
    ) -> PersistenceResult<Option<WeeklyAvailability>> {
        {
            let conn = self.connection.lock();
            let updated = conn.execute(
                "UPDATE availability_windows SET blocked = ?1 WHERE id = ?2",
                params![blocked, window_id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
        }
        self.window(window_id)
    }

    fn all_windows(&self) -> PersistenceResult<Vec<WeeklyAvailability>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {WINDOW_COLUMNS} FROM availability_windows
             ORDER BY professional_id, weekday, start_time, id"
        ))?;
        let rows = stmt.query_map([], WindowRow::read)?;
        collect_windows(rows)
    }
}

impl BookingStore for SqliteStore {
    fn booked_starts(
        &self,
        professional_id: i64,
        range: BookedRange,
    ) -> PersistenceResult<HashSet<DateTime<Utc>>> {
        let conn = self.connection.lock();
        let (from, until) = match range {
            BookedRange::From(start) => (to_micros(start), i64::MAX),
            BookedRange::Between(start, end) => (to_micros(start), to_micros(end)),
        };
        let mut stmt = conn.prepare(
            "SELECT start_time FROM appointments
             WHERE professional_id = ?1 AND start_time >= ?2 AND start_time < ?3",
        )?;
        let rows = stmt.query_map(params![professional_id, from, until], |row| {
            row.get::<_, i64>(0)
        })?;
        let mut booked = HashSet::new();
        for value in rows {
            booked.insert(from_micros(value?)?);
        }
        Ok(booked)
    }

    fn is_booked(&self, professional_id: i64, start: DateTime<Utc>) -> PersistenceResult<bool> {
        let conn = self.connection.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM appointments WHERE professional_id = ?1 AND start_time = ?2",
                params![professional_id, to_micros(start)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn patient_appointments_at(
        &self,
        patient_id: i64,
        start: DateTime<Utc>,
    ) -> PersistenceResult<Vec<Appointment>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE patient_id = ?1 AND start_time = ?2 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![patient_id, to_micros(start)], AppointmentRow::read)?;
        collect_appointments(rows)
    }

    fn insert_unique(&self, appointment: NewAppointment) -> PersistenceResult<Appointment> {
        let conflict = || PersistenceError::Conflict {
            professional_id: appointment.professional_id,
            start: appointment.start_time,
        };
        let mut conn = self.connection.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = tx.execute(
            "INSERT INTO appointments
                 (professional_id, patient_id, service_id, facility_id, start_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                appointment.professional_id,
                appointment.patient_id,
                appointment.service_id,
                appointment.facility_id,
                to_micros(appointment.start_time),
                to_micros(appointment.created_at),
            ],
        );
        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(conflict()),
            Err(err) => return Err(err.into()),
        }
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(appointment.into_appointment(id))
    }

    fn appointment(&self, id: i64) -> PersistenceResult<Option<Appointment>> {
        let conn = self.connection.lock();
        let row = conn
            .query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                params![id],
                AppointmentRow::read,
            )
            .optional()?;
        row.map(Appointment::try_from).transpose()
    }

    fn delete(&self, id: i64) -> PersistenceResult<bool> {
        let conn = self.connection.lock();
        let removed = conn.execute("DELETE FROM appointments WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn for_professional(&self, professional_id: i64) -> PersistenceResult<Vec<Appointment>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE professional_id = ?1 ORDER BY start_time, id"
        ))?;
        let rows = stmt.query_map(params![professional_id], AppointmentRow::read)?;
        collect_appointments(rows)
    }

    fn for_patient(&self, patient_id: i64) -> PersistenceResult<Vec<Appointment>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE patient_id = ?1 ORDER BY start_time, id"
        ))?;
        let rows = stmt.query_map(params![patient_id], AppointmentRow::read)?;
        collect_appointments(rows)
    }
}

impl Directory for SqliteStore {
    fn user(&self, id: i64) -> PersistenceResult<Option<User>> {
        let conn = self.connection.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT name, role FROM users WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(name, role)| -> PersistenceResult<User> {
            let role = role
                .parse::<Role>()
                .map_err(PersistenceError::InvalidData)?;
            Ok(User::new(id, name, role))
        })
        .transpose()
    }

    fn service(&self, id: i64) -> PersistenceResult<Option<Service>> {
        let conn = self.connection.lock();
        Ok(conn
            .query_row(
                "SELECT name, kind FROM services WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Service {
                        id,
                        name: row.get(0)?,
                        kind: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    fn facility(&self, id: i64) -> PersistenceResult<Option<Facility>> {
        let conn = self.connection.lock();
        Ok(conn
            .query_row(
                "SELECT name, address FROM facilities WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Facility {
                        id,
                        name: row.get(0)?,
                        address: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }
}
