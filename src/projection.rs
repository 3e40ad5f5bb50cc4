use crate::slots::SlotCandidate;
use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};

pub const AVAILABLE_TITLE: &str = "Available";

/// One entry of the calendar feed consumed by front-end calendar widgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// Renders slot candidates in the given zone, preserving their order.
pub fn project<Tz: TimeZone>(candidates: &[SlotCandidate], tz: &Tz) -> Vec<CalendarEvent> {
    candidates
        .iter()
        .map(|slot| CalendarEvent {
            title: AVAILABLE_TITLE.to_string(),
            start: slot.start.with_timezone(tz).fixed_offset(),
            end: slot.end.with_timezone(tz).fixed_offset(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn events_carry_local_offset_and_slot_end() {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let candidates = [SlotCandidate {
            start,
            end: start + Duration::minutes(30),
        }];
        let tz = FixedOffset::west_opt(3 * 3600).unwrap();
        let events = project(&candidates, &tz);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Available");
        assert_eq!(events[0].start.to_rfc3339(), "2025-03-03T09:00:00-03:00");
        assert_eq!(events[0].end.to_rfc3339(), "2025-03-03T09:30:00-03:00");
    }

    #[test]
    fn empty_input_projects_to_empty_feed() {
        assert!(project(&[], &Utc).is_empty());
    }
}
