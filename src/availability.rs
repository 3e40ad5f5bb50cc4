use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// A recurring weekly interval during which a professional accepts bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    pub id: i64,
    pub professional_id: i64,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub blocked: bool,
}

/// Window data before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWindow {
    pub professional_id: i64,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub blocked: bool,
}

impl NewWindow {
    pub fn new(
        professional_id: i64,
        weekday: Weekday,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Self {
        Self {
            professional_id,
            weekday,
            start_time,
            end_time,
            blocked: false,
        }
    }

    pub fn into_window(self, id: i64) -> WeeklyAvailability {
        WeeklyAvailability {
            id,
            professional_id: self.professional_id,
            weekday: self.weekday,
            start_time: self.start_time,
            end_time: self.end_time,
            blocked: self.blocked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WindowValidationError {
    message: String,
}

impl WindowValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Monday-based index (0 = Monday .. 6 = Sunday) used by the stores.
pub fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_monday() as u8
}

pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    ALL_WEEKDAYS.get(index as usize).copied()
}

pub fn validate_interval(
    weekday: Weekday,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> Result<(), WindowValidationError> {
    if start_time >= end_time {
        return Err(WindowValidationError::new(format!(
            "window on {weekday} must start before it ends (got {start_time}-{end_time})"
        )));
    }
    Ok(())
}

pub fn validate_new_window(window: &NewWindow) -> Result<(), WindowValidationError> {
    validate_interval(window.weekday, window.start_time, window.end_time)
}

pub fn validate_window_collection(
    windows: &[WeeklyAvailability],
) -> Result<(), WindowValidationError> {
    let mut seen_ids = HashSet::with_capacity(windows.len());
    for window in windows {
        if !seen_ids.insert(window.id) {
            return Err(WindowValidationError::new(format!(
                "duplicate window id {}",
                window.id
            )));
        }
        validate_interval(window.weekday, window.start_time, window.end_time)?;
    }
    Ok(())
}

/// Unblocked windows of one professional grouped by weekday.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeeklySchedule {
    by_weekday: BTreeMap<u8, Vec<(NaiveTime, NaiveTime)>>,
}

impl WeeklySchedule {
    /// Blocked windows are dropped; the rest are kept in start order.
    pub fn from_windows<'a, I>(windows: I) -> Self
    where
        I: IntoIterator<Item = &'a WeeklyAvailability>,
    {
        let mut by_weekday: BTreeMap<u8, Vec<(NaiveTime, NaiveTime)>> = BTreeMap::new();
        for window in windows.into_iter().filter(|w| !w.blocked) {
            by_weekday
                .entry(weekday_index(window.weekday))
                .or_default()
                .push((window.start_time, window.end_time));
        }
        for intervals in by_weekday.values_mut() {
            intervals.sort();
        }
        Self { by_weekday }
    }

    pub fn intervals(&self, weekday: Weekday) -> &[(NaiveTime, NaiveTime)] {
        self.by_weekday
            .get(&weekday_index(weekday))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Monday to Friday, 09:00-13:00 and 14:00-18:00.
pub fn standard_week(professional_id: i64) -> Vec<NewWindow> {
    let mut windows = Vec::with_capacity(10);
    for (start, end) in [(hm(9, 0), hm(13, 0)), (hm(14, 0), hm(18, 0))] {
        for weekday in &ALL_WEEKDAYS[..5] {
            windows.push(NewWindow::new(professional_id, *weekday, start, end));
        }
    }
    windows
}
