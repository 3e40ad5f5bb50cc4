//! Free-slot generation.
//!
//! [`generate`] is a pure function over a snapshot of one professional's
//! weekly windows and booked instants; the engine feeds it from the stores on
//! every call, so the result is always a live view.

use crate::availability::WeeklySchedule;
use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A bookable interval offered to a caller. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotCandidate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// `range_days` consecutive calendar dates starting at `range_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub range_start: NaiveDate,
    pub range_days: u32,
}

impl DateRange {
    pub fn new(range_start: NaiveDate, range_days: u32) -> Self {
        Self {
            range_start,
            range_days,
        }
    }

    /// Inclusive on both ends; an inverted pair yields an empty range.
    pub fn inclusive(first: NaiveDate, last: NaiveDate) -> Self {
        let days = (last - first).num_days() + 1;
        Self::new(first, u32::try_from(days.max(0)).unwrap_or(0))
    }

    /// The dates in order, stopping early at the end of the calendar.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let start = self.range_start;
        (0..u64::from(self.range_days))
            .map_while(move |offset| start.checked_add_days(Days::new(offset)))
    }

    /// Instants that can possibly hold a slot on one of the dates, whatever
    /// the zone offset. Used to bound the booked-instant lookup.
    ///
    /// Saturates at the representable extremes instead of overflowing.
    pub fn utc_envelope(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = self
            .range_start
            .checked_sub_days(Days::new(1))
            .map_or(DateTime::<Utc>::MIN_UTC, |date| {
                date.and_time(NaiveTime::MIN).and_utc()
            });
        let until = self
            .range_start
            .checked_add_days(Days::new(u64::from(self.range_days) + 1))
            .map_or(DateTime::<Utc>::MAX_UTC, |date| {
                date.and_time(NaiveTime::MIN).and_utc()
            });
        (from, until)
    }
}

/// Resolves a local civil time to an instant. Times skipped by a DST jump
/// yield `None`; repeated times take the earlier instant.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// The civil date of `instant` in `tz`, or `None` when that date is outside
/// the representable calendar.
pub fn local_date<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> Option<NaiveDate> {
    let utc = instant.naive_utc();
    utc.checked_add_offset(tz.offset_from_utc_datetime(&utc).fix())
        .map(|local| local.date())
}

fn slot_starts<'a, Tz: TimeZone>(
    schedule: &'a WeeklySchedule,
    date: NaiveDate,
    slot: Duration,
    tz: &'a Tz,
) -> impl Iterator<Item = DateTime<Utc>> + 'a {
    schedule
        .intervals(date.weekday())
        .iter()
        .flat_map(move |&(start, end)| {
            let stop = date.and_time(end);
            std::iter::successors(Some(date.and_time(start)), move |cursor| {
                cursor.checked_add_signed(slot)
            })
            .take_while(move |cursor| *cursor < stop)
        })
        .filter_map(move |local| resolve_local(tz, local))
}

/// Free slots for every date in `dates`, ascending and without duplicates.
///
/// A slot is emitted when it starts strictly after `now` and its start is
/// not in `booked`. Overlapping windows on the same weekday collapse to one
/// slot per instant.
pub fn generate<Tz, I>(
    schedule: &WeeklySchedule,
    booked: &HashSet<DateTime<Utc>>,
    dates: I,
    now: DateTime<Utc>,
    slot: Duration,
    tz: &Tz,
) -> Vec<SlotCandidate>
where
    Tz: TimeZone,
    I: IntoIterator<Item = NaiveDate>,
{
    if slot <= Duration::zero() {
        return Vec::new();
    }
    let mut free = BTreeSet::new();
    for date in dates {
        free.extend(
            slot_starts(schedule, date, slot, tz)
                .filter(|start| *start > now && !booked.contains(start)),
        );
    }
    // A start whose end is not representable is dropped.
    free.into_iter()
        .filter_map(|start| {
            start
                .checked_add_signed(slot)
                .map(|end| SlotCandidate { start, end })
        })
        .collect()
}

/// Whether `instant` is one of the slot starts the windows produce on its
/// local date, ignoring bookings and the clock.
pub fn is_offered<Tz: TimeZone>(
    schedule: &WeeklySchedule,
    instant: DateTime<Utc>,
    slot: Duration,
    tz: &Tz,
) -> bool {
    if slot <= Duration::zero() {
        return false;
    }
    let Some(date) = local_date(tz, instant) else {
        return false;
    };
    slot_starts(schedule, date, slot, tz).any(|start| start == instant)
}
