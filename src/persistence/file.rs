use super::{PersistenceError, PersistenceResult};
use crate::availability::{NewWindow, WeeklyAvailability, weekday_from_index, weekday_index};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct AvailabilitySnapshot {
    windows: Vec<NewWindow>,
}

impl AvailabilitySnapshot {
    fn from_windows(windows: &[WeeklyAvailability]) -> PersistenceResult<Self> {
        super::validate_windows(windows)?;
        let mut sorted = windows.to_vec();
        sorted.sort_by_key(|w| (w.professional_id, weekday_index(w.weekday), w.start_time));
        Ok(Self {
            windows: sorted.into_iter().map(new_window_of).collect(),
        })
    }

    fn into_windows(self) -> PersistenceResult<Vec<NewWindow>> {
        for window in &self.windows {
            super::validate_new_window(window)?;
        }
        Ok(self.windows)
    }
}

fn new_window_of(window: WeeklyAvailability) -> NewWindow {
    NewWindow {
        professional_id: window.professional_id,
        weekday: window.weekday,
        start_time: window.start_time,
        end_time: window.end_time,
        blocked: window.blocked,
    }
}

pub fn save_windows_to_json<P: AsRef<Path>>(
    windows: &[WeeklyAvailability],
    path: P,
) -> PersistenceResult<()> {
    let snapshot = AvailabilitySnapshot::from_windows(windows)?;
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &snapshot)?;
    Ok(())
}

/// Windows come back without ids; insert them through a `ScheduleStore`.
pub fn load_windows_from_json<P: AsRef<Path>>(path: P) -> PersistenceResult<Vec<NewWindow>> {
    let file = File::open(path)?;
    let snapshot: AvailabilitySnapshot = serde_json::from_reader(file)?;
    snapshot.into_windows()
}

#[derive(Default, Serialize, Deserialize)]
struct WindowCsvRecord {
    professional_id: i64,
    weekday: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    blocked: String,
}

impl From<&WeeklyAvailability> for WindowCsvRecord {
    fn from(window: &WeeklyAvailability) -> Self {
        Self {
            professional_id: window.professional_id,
            weekday: weekday_index(window.weekday).to_string(),
            start_time: format_time(window.start_time),
            end_time: format_time(window.end_time),
            blocked: window.blocked.to_string(),
        }
    }
}

impl TryFrom<WindowCsvRecord> for NewWindow {
    type Error = PersistenceError;

    fn try_from(record: WindowCsvRecord) -> Result<Self, Self::Error> {
        let window = NewWindow {
            professional_id: record.professional_id,
            weekday: parse_weekday(&record.weekday)?,
            start_time: parse_time(&record.start_time)?,
            end_time: parse_time(&record.end_time)?,
            blocked: parse_bool(&record.blocked)?,
        };
        super::validate_new_window(&window)?;
        Ok(window)
    }
}

pub fn save_windows_to_csv<P: AsRef<Path>>(
    windows: &[WeeklyAvailability],
    path: P,
) -> PersistenceResult<()> {
    super::validate_windows(windows)?;
    let mut sorted: Vec<&WeeklyAvailability> = windows.iter().collect();
    sorted.sort_by_key(|w| (w.professional_id, weekday_index(w.weekday), w.start_time));
    let mut writer = csv::Writer::from_path(path)?;
    for window in sorted {
        writer.serialize(WindowCsvRecord::from(window))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_windows_from_csv<P: AsRef<Path>>(path: P) -> PersistenceResult<Vec<NewWindow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut windows = Vec::new();
    for record in reader.deserialize::<WindowCsvRecord>() {
        windows.push(NewWindow::try_from(record?)?);
    }
    Ok(windows)
}

fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn parse_time(value: &str) -> PersistenceResult<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| PersistenceError::InvalidData(format!("invalid time '{value}'")))
}

/// Accepts a Monday-based index (`0`..`6`) or a weekday name.
fn parse_weekday(value: &str) -> PersistenceResult<Weekday> {
    let value = value.trim();
    if let Ok(index) = value.parse::<u8>() {
        return weekday_from_index(index)
            .ok_or_else(|| PersistenceError::InvalidData(format!("invalid weekday index {index}")));
    }
    value
        .parse::<Weekday>()
        .map_err(|_| PersistenceError::InvalidData(format!("invalid weekday '{value}'")))
}

fn parse_bool(value: &str) -> PersistenceResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Ok(false),
        "true" | "1" | "yes" => Ok(true),
        other => Err(PersistenceError::InvalidData(format!(
            "invalid boolean '{other}'"
        ))),
    }
}
