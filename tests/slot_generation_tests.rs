use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use clinic_scheduler::{
    DateRange, NewWindow, WeeklyAvailability, WeeklySchedule,
    slots::{self, SlotCandidate},
};
use std::collections::HashSet;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn chile() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap()
}

fn schedule(windows: &[(Weekday, NaiveTime, NaiveTime)]) -> WeeklySchedule {
    let windows: Vec<WeeklyAvailability> = windows
        .iter()
        .enumerate()
        .map(|(i, (wd, s, e))| NewWindow::new(7, *wd, *s, *e).into_window(i as i64 + 1))
        .collect();
    WeeklySchedule::from_windows(&windows)
}

fn local(date: NaiveDate, h: u32, m: u32) -> DateTime<Utc> {
    chile()
        .from_local_datetime(&date.and_time(t(h, m)))
        .unwrap()
        .with_timezone(&Utc)
}

fn generate(
    schedule: &WeeklySchedule,
    booked: &HashSet<DateTime<Utc>>,
    range: DateRange,
    now: DateTime<Utc>,
) -> Vec<SlotCandidate> {
    slots::generate(
        schedule,
        booked,
        range.dates(),
        now,
        Duration::minutes(30),
        &chile(),
    )
}

fn long_ago() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

#[test]
fn only_configured_weekdays_produce_slots() {
    let schedule = schedule(&[(Weekday::Mon, t(9, 0), t(13, 0))]);
    let range = DateRange::new(d(2025, 3, 1), 7);

    let slots = generate(&schedule, &HashSet::new(), range, long_ago());
    assert_eq!(slots.len(), 8);
    let chile = chile();
    assert!(
        slots
            .iter()
            .all(|s| s.start.with_timezone(&chile).weekday() == Weekday::Mon)
    );
    assert_eq!(slots[0].start, local(d(2025, 3, 3), 9, 0));
    assert_eq!(slots[7].start, local(d(2025, 3, 3), 12, 30));
}

#[test]
fn slots_at_or_before_now_are_dropped() {
    let schedule = schedule(&[(Weekday::Mon, t(9, 0), t(11, 0))]);
    let monday = d(2025, 3, 3);
    let now = local(monday, 9, 30);

    let slots = generate(&schedule, &HashSet::new(), DateRange::new(monday, 1), now);
    let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![local(monday, 10, 0), local(monday, 10, 30)]);
}

#[test]
fn booked_instants_are_excluded() {
    let schedule = schedule(&[(Weekday::Mon, t(9, 0), t(10, 30))]);
    let monday = d(2025, 3, 3);
    let booked: HashSet<_> = [local(monday, 9, 30)].into_iter().collect();

    let slots = generate(&schedule, &booked, DateRange::new(monday, 1), long_ago());
    let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![local(monday, 9, 0), local(monday, 10, 0)]);
}

#[test]
fn multi_week_output_is_sorted_across_days() {
    let schedule = schedule(&[
        (Weekday::Wed, t(14, 0), t(15, 0)),
        (Weekday::Mon, t(9, 0), t(10, 0)),
    ]);
    let slots = generate(
        &schedule,
        &HashSet::new(),
        DateRange::new(d(2025, 3, 3), 14),
        long_ago(),
    );
    assert_eq!(slots.len(), 8);
    assert!(slots.windows(2).all(|pair| pair[0].start < pair[1].start));
    assert!(slots.iter().all(|s| s.end - s.start == Duration::minutes(30)));
}

#[test]
fn late_evening_slots_land_on_the_next_utc_day() {
    let schedule = schedule(&[(Weekday::Mon, t(22, 0), t(23, 0))]);
    let range = DateRange::new(d(2025, 3, 3), 1);
    let slots = generate(&schedule, &HashSet::new(), range, long_ago());

    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].start, Utc.with_ymd_and_hms(2025, 3, 4, 1, 0, 0).unwrap());

    let (from, until) = range.utc_envelope();
    assert!(slots.iter().all(|s| s.start >= from && s.start < until));
}

#[test]
fn empty_range_or_schedule_yields_nothing() {
    let schedule_with_windows = schedule(&[(Weekday::Mon, t(9, 0), t(10, 0))]);
    assert!(
        generate(
            &schedule_with_windows,
            &HashSet::new(),
            DateRange::new(d(2025, 3, 3), 0),
            long_ago()
        )
        .is_empty()
    );
    assert!(
        generate(
            &WeeklySchedule::default(),
            &HashSet::new(),
            DateRange::new(d(2025, 3, 3), 7),
            long_ago()
        )
        .is_empty()
    );
}

#[test]
fn offered_instants_follow_the_grid() {
    let schedule = schedule(&[(Weekday::Mon, t(9, 0), t(10, 0))]);
    let monday = d(2025, 3, 3);
    let slot = Duration::minutes(30);
    assert!(slots::is_offered(&schedule, local(monday, 9, 30), slot, &chile()));
    assert!(!slots::is_offered(&schedule, local(monday, 9, 15), slot, &chile()));
    assert!(!slots::is_offered(&schedule, local(d(2025, 3, 4), 9, 0), slot, &chile()));
}
