use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use clinic_scheduler::{
    BookingEngine, BookingError, BookingRequest, BookingStore, BookingWarning, Directory,
    EngineConfig, Entity, Facility, InMemoryBookingStore, InMemoryDirectory,
    InMemoryScheduleStore, NewWindow, RecordingNotifier, Role, Service, User,
};
use std::sync::{Arc, Barrier};
use std::thread;

const PRO: i64 = 10;
const OTHER_PRO: i64 = 11;
const PATIENT: i64 = 20;
const OTHER_PATIENT: i64 = 21;
const SERVICE: i64 = 1;
const FACILITY: i64 = 1;

fn directory() -> Arc<dyn Directory> {
    Arc::new(
        InMemoryDirectory::new()
            .with_user(User::new(PRO, "Dra. Rojas", Role::Professional))
            .with_user(User::new(OTHER_PRO, "Dr. Soto", Role::Professional))
            .with_user(User::new(PATIENT, "Ana", Role::Patient))
            .with_user(User::new(OTHER_PATIENT, "Luis", Role::Patient))
            .with_service(Service::new(SERVICE, "Medicina general"))
            .with_facility(Facility::new(FACILITY, "Cesfam Centro")),
    )
}

fn engine() -> BookingEngine {
    BookingEngine::in_memory(directory(), EngineConfig::default())
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
}

/// Saturday before `monday()`.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// Monday at the given clinic-local time (UTC-3).
fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, h + 3, m, 0).unwrap()
}

fn request(professional_id: i64, patient_id: i64, start: DateTime<Utc>) -> BookingRequest {
    BookingRequest {
        patient_id,
        professional_id,
        service_id: SERVICE,
        facility_id: FACILITY,
        start,
    }
}

fn add_window(engine: &BookingEngine, pro: i64, weekday: Weekday, start: NaiveTime, end: NaiveTime) {
    engine
        .add_window(NewWindow::new(pro, weekday, start, end))
        .unwrap();
}

#[test]
fn monday_morning_window_yields_eight_slots_over_a_week() {
    let engine = engine();
    add_window(&engine, PRO, Weekday::Mon, hm(9, 0), hm(13, 0));

    let slots = engine
        .generate_slots(PRO, SERVICE, monday() - Duration::days(2), 7, now())
        .unwrap();

    assert_eq!(slots.len(), 8);
    for (i, slot) in slots.iter().enumerate() {
        let expected = monday_at(9, 0) + Duration::minutes(30 * i as i64);
        assert_eq!(slot.start, expected);
        assert_eq!(slot.end, expected + Duration::minutes(30));
    }
}

#[test]
fn booking_removes_slot_and_second_booking_conflicts() {
    let engine = engine();
    add_window(&engine, PRO, Weekday::Mon, hm(9, 0), hm(10, 0));

    let before = engine.generate_slots(PRO, SERVICE, monday(), 1, now()).unwrap();
    let starts: Vec<_> = before.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![monday_at(9, 0), monday_at(9, 30)]);

    let appointment = engine.book(&request(PRO, PATIENT, monday_at(9, 0)), now()).unwrap();
    assert_eq!(appointment.start_time, monday_at(9, 0));
    assert_eq!(appointment.created_at, now());

    let after = engine.generate_slots(PRO, SERVICE, monday(), 1, now()).unwrap();
    let starts: Vec<_> = after.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![monday_at(9, 30)]);

    let err = engine
        .book(&request(PRO, OTHER_PATIENT, monday_at(9, 0)), now())
        .unwrap_err();
    assert!(matches!(err, BookingError::Conflict { professional_id: PRO, .. }));
}

#[test]
fn generation_is_idempotent_without_writes() {
    let engine = engine();
    add_window(&engine, PRO, Weekday::Mon, hm(9, 0), hm(13, 0));
    add_window(&engine, PRO, Weekday::Wed, hm(14, 0), hm(18, 0));
    engine.book(&request(PRO, PATIENT, monday_at(10, 0)), now()).unwrap();

    let first = engine.generate_slots(PRO, SERVICE, monday(), 7, now()).unwrap();
    let second = engine.generate_slots(PRO, SERVICE, monday(), 7, now()).unwrap();
    assert_eq!(first, second);
    assert!(!first.iter().any(|s| s.start == monday_at(10, 0)));
}

#[test]
fn booking_a_second_ago_is_past_time_and_writes_nothing() {
    let bookings = Arc::new(InMemoryBookingStore::new());
    let engine = BookingEngine::new(
        Arc::new(InMemoryScheduleStore::new()),
        bookings.clone(),
        directory(),
        EngineConfig::default(),
    );

    let err = engine
        .book(&request(PRO, PATIENT, now() - Duration::seconds(1)), now())
        .unwrap_err();
    assert!(matches!(err, BookingError::PastTime { .. }));

    let yesterday = now() - Duration::days(1);
    let err = engine.book(&request(PRO, PATIENT, yesterday), now()).unwrap_err();
    assert!(matches!(err, BookingError::PastTime { .. }));
    assert!(bookings.is_empty());
}

#[test]
fn booking_exactly_now_is_allowed() {
    let engine = engine();
    engine.book(&request(PRO, PATIENT, now()), now()).unwrap();
}

#[test]
fn missing_records_fail_before_time_checks() {
    let engine = engine();
    let past = now() - Duration::days(1);

    let err = engine.book(&request(99, PATIENT, past), now()).unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: Entity::Professional, id: 99 }));

    let err = engine.book(&request(PRO, 99, past), now()).unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: Entity::Patient, id: 99 }));

    let mut bad_service = request(PRO, PATIENT, past);
    bad_service.service_id = 42;
    let err = engine.book(&bad_service, now()).unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: Entity::Service, id: 42 }));

    let mut bad_facility = request(PRO, PATIENT, past);
    bad_facility.facility_id = 7;
    let err = engine.book(&bad_facility, now()).unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: Entity::Facility, id: 7 }));
}

#[test]
fn patient_cannot_stand_in_for_professional() {
    let engine = engine();
    let err = engine
        .book(&request(PATIENT, OTHER_PATIENT, monday_at(9, 0)), now())
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: Entity::Professional, .. }));
}

#[test]
fn same_instant_with_different_professionals_is_fine() {
    let engine = engine();
    engine.book(&request(PRO, PATIENT, monday_at(9, 0)), now()).unwrap();
    engine.book(&request(OTHER_PRO, OTHER_PATIENT, monday_at(9, 0)), now()).unwrap();
}

#[test]
fn concurrent_bookings_for_one_slot_commit_exactly_once() {
    let bookings = Arc::new(InMemoryBookingStore::new());
    let engine = BookingEngine::new(
        Arc::new(InMemoryScheduleStore::new()),
        bookings.clone(),
        directory(),
        EngineConfig::default(),
    );
    let contenders = 16;
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let patient = if i % 2 == 0 { PATIENT } else { OTHER_PATIENT };
                barrier.wait();
                engine.book(&request(PRO, patient, monday_at(9, 0)), now())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(BookingError::is_conflict)
    );
    assert_eq!(bookings.len(), 1);
    assert!(bookings.is_booked(PRO, monday_at(9, 0)).unwrap());
}

#[test]
fn professional_booking_warns_on_patient_double_booking_and_notifies() {
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = engine().with_notifier(notifier.clone());

    let first = engine
        .book_on_behalf(&request(PRO, PATIENT, monday_at(9, 0)), now())
        .unwrap();
    assert!(first.warnings.is_empty());

    let second = engine
        .book_on_behalf(&request(OTHER_PRO, PATIENT, monday_at(9, 0)), now())
        .unwrap();
    assert_eq!(
        second.warnings,
        vec![BookingWarning::PatientDoubleBooked {
            patient_id: PATIENT,
            start: monday_at(9, 0),
        }]
    );

    let notified: Vec<i64> = notifier.booked().iter().map(|a| a.id).collect();
    assert_eq!(notified, vec![first.appointment.id, second.appointment.id]);
}

#[test]
fn professional_booking_still_refuses_taken_slot() {
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = engine().with_notifier(notifier.clone());
    engine.book(&request(PRO, OTHER_PATIENT, monday_at(9, 0)), now()).unwrap();

    let err = engine
        .book_on_behalf(&request(PRO, PATIENT, monday_at(9, 0)), now())
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(notifier.booked().is_empty());
}

#[test]
fn enforced_availability_rejects_off_grid_starts() {
    let engine = BookingEngine::in_memory(
        directory(),
        EngineConfig::default().with_enforce_availability(true),
    );
    add_window(&engine, PRO, Weekday::Mon, hm(9, 0), hm(10, 0));

    let err = engine
        .book(&request(PRO, PATIENT, monday_at(9, 15)), now())
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let err = engine
        .book(&request(PRO, PATIENT, monday_at(10, 0)), now())
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    engine.book(&request(PRO, PATIENT, monday_at(9, 30)), now()).unwrap();
}

#[test]
fn blocking_a_window_hides_its_slots_and_only_owner_may_toggle() {
    let engine = engine();
    let window = engine
        .add_window(NewWindow::new(PRO, Weekday::Mon, hm(9, 0), hm(10, 0)))
        .unwrap();

    let err = engine.set_blocked(window.id, OTHER_PRO, true).unwrap_err();
    assert!(matches!(err, BookingError::NotOwner { .. }));

    let blocked = engine.set_blocked(window.id, PRO, true).unwrap();
    assert!(blocked.blocked);
    assert!(engine.generate_slots(PRO, SERVICE, monday(), 1, now()).unwrap().is_empty());
    assert_eq!(engine.windows(PRO).unwrap().len(), 1);

    let reopened = engine.toggle_blocked(window.id, PRO).unwrap();
    assert!(!reopened.blocked);
    assert_eq!(engine.generate_slots(PRO, SERVICE, monday(), 1, now()).unwrap().len(), 2);

    let err = engine.set_blocked(999, PRO, true).unwrap_err();
    assert!(matches!(
        err,
        BookingError::NotFound { entity: Entity::AvailabilityWindow, id: 999 }
    ));
}

#[test]
fn overlapping_windows_do_not_duplicate_slots() {
    let engine = engine();
    add_window(&engine, PRO, Weekday::Mon, hm(9, 0), hm(11, 0));
    add_window(&engine, PRO, Weekday::Mon, hm(10, 0), hm(12, 0));

    let slots = engine.generate_slots(PRO, SERVICE, monday(), 1, now()).unwrap();
    assert_eq!(slots.len(), 6);
    assert!(slots.windows(2).all(|pair| pair[0].start < pair[1].start));
}

#[test]
fn seeded_week_is_idempotent() {
    let engine = engine();
    assert_eq!(engine.seed_standard_week(PRO).unwrap(), 10);
    assert_eq!(engine.seed_standard_week(PRO).unwrap(), 0);
    assert_eq!(engine.windows(PRO).unwrap().len(), 10);

    // 9-13 and 14-18 give 16 slots on each weekday.
    let slots = engine.generate_slots(PRO, SERVICE, monday(), 7, now()).unwrap();
    assert_eq!(slots.len(), 5 * 16);
}

#[test]
fn unknown_service_or_oversized_range_is_rejected() {
    let engine = engine();
    let err = engine.generate_slots(PRO, 77, monday(), 7, now()).unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: Entity::Service, id: 77 }));

    let err = engine.generate_slots(PRO, SERVICE, monday(), 365, now()).unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
}

#[test]
fn calendar_feed_filters_to_requested_range() {
    let engine = engine();
    add_window(&engine, PRO, Weekday::Mon, hm(9, 0), hm(11, 0));
    engine.book(&request(PRO, PATIENT, monday_at(9, 30)), now()).unwrap();

    let tz = engine.timezone();
    let start = monday_at(9, 0).with_timezone(&tz);
    let end = monday_at(10, 30).with_timezone(&tz);
    let events = engine.calendar_feed(PRO, start, end, now()).unwrap();

    let starts: Vec<String> = events.iter().map(|e| e.start.to_rfc3339()).collect();
    assert_eq!(
        starts,
        vec!["2025-03-03T09:00:00-03:00", "2025-03-03T10:00:00-03:00"]
    );
    assert!(events.iter().all(|e| e.title == "Available"));
    assert_eq!(events[0].end.to_rfc3339(), "2025-03-03T09:30:00-03:00");
}

#[test]
fn calendar_feed_rejects_inverted_range() {
    let engine = engine();
    let tz = engine.timezone();
    let start = monday_at(10, 0).with_timezone(&tz);
    let err = engine.calendar_feed(PRO, start, start, now()).unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
}

#[test]
fn cancellation_needs_notice_and_ownership() {
    let engine = engine();
    let appointment = engine.book(&request(PRO, PATIENT, monday_at(9, 0)), now()).unwrap();

    let err = engine.cancel(appointment.id, OTHER_PATIENT, now()).unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: Entity::Appointment, .. }));

    let late = monday_at(9, 0) - Duration::hours(2);
    let err = engine.cancel(appointment.id, PATIENT, late).unwrap_err();
    assert!(matches!(err, BookingError::CancellationTooLate { notice_hours: 24 }));

    let cancelled = engine.cancel(appointment.id, PATIENT, now()).unwrap();
    assert_eq!(cancelled.id, appointment.id);

    // The slot is free again.
    engine.book(&request(PRO, OTHER_PATIENT, monday_at(9, 0)), now()).unwrap();
}

#[test]
fn listings_split_upcoming_from_history() {
    let engine = engine();
    let early = engine.book(&request(PRO, PATIENT, monday_at(9, 0)), now()).unwrap();
    let late = engine.book(&request(PRO, PATIENT, monday_at(11, 0)), now()).unwrap();
    engine.book(&request(OTHER_PRO, OTHER_PATIENT, monday_at(9, 0)), now()).unwrap();

    let upcoming = engine.upcoming_for_patient(PATIENT, now(), 10).unwrap();
    assert_eq!(
        upcoming.iter().map(|a| a.id).collect::<Vec<_>>(),
        vec![early.id, late.id]
    );

    let midday = monday_at(12, 0);
    let history = engine.history_for_patient(PATIENT, midday, 10).unwrap();
    assert_eq!(
        history.iter().map(|a| a.id).collect::<Vec<_>>(),
        vec![late.id, early.id]
    );
    assert!(engine.upcoming_for_patient(PATIENT, midday, 10).unwrap().is_empty());

    let for_pro = engine.upcoming_for_professional(PRO, now(), 1).unwrap();
    assert_eq!(for_pro.len(), 1);
    assert_eq!(for_pro[0].id, early.id);
}

fn add_daily_window(engine: &BookingEngine, start: NaiveTime, end: NaiveTime) {
    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ] {
        add_window(engine, PRO, weekday, start, end);
    }
}

#[test]
fn slot_queries_at_the_calendar_edges_stay_within_range() {
    let engine = engine();
    add_daily_window(&engine, hm(9, 0), hm(10, 0));

    // Only the last two dates of the calendar remain in a 14-day range.
    let second_last = NaiveDate::MAX.pred_opt().unwrap();
    let slots = engine
        .generate_slots(PRO, SERVICE, second_last, 14, now())
        .unwrap();
    assert_eq!(slots.len(), 4);

    let last_slot = slots[3].start;
    engine.book(&request(PRO, PATIENT, last_slot), now()).unwrap();
    let slots = engine
        .generate_slots(PRO, SERVICE, second_last, 14, now())
        .unwrap();
    assert_eq!(slots.len(), 3);
    assert!(slots.iter().all(|s| s.start != last_slot));

    assert!(
        engine
            .generate_slots(PRO, SERVICE, NaiveDate::MIN, 14, now())
            .unwrap()
            .is_empty()
    );
    let slots = engine
        .generate_slots(PRO, SERVICE, NaiveDate::MIN, 14, DateTime::<Utc>::MIN_UTC)
        .unwrap();
    assert_eq!(slots.len(), 28);
}

#[test]
fn calendar_feed_at_the_calendar_edges() {
    let engine = engine();
    add_daily_window(&engine, hm(9, 0), hm(10, 0));
    let tz = engine.timezone();

    let second_last = NaiveDate::MAX.pred_opt().unwrap();
    let start = tz
        .from_local_datetime(&second_last.and_time(NaiveTime::MIN))
        .unwrap();
    let end = tz
        .from_local_datetime(&NaiveDate::MAX.and_time(hm(12, 0)))
        .unwrap();
    let events = engine.calendar_feed(PRO, start, end, now()).unwrap();
    assert_eq!(events.len(), 4);

    // Instants whose clinic-local date falls off the calendar.
    let start = DateTime::<Utc>::MIN_UTC.fixed_offset();
    let err = engine
        .calendar_feed(PRO, start, start + Duration::hours(1), now())
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)), "{err}");

    let east = BookingEngine::in_memory(
        directory(),
        EngineConfig::default().with_utc_offset_minutes(5 * 60),
    );
    let end = DateTime::<Utc>::MAX_UTC.fixed_offset();
    let err = east
        .calendar_feed(PRO, end - Duration::hours(1), end, now())
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)), "{err}");
}

#[test]
fn sub_second_start_is_rejected_before_writing() {
    let engine = engine();
    let start = monday_at(9, 0) + Duration::milliseconds(500);

    let err = engine.book(&request(PRO, PATIENT, start), now()).unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)), "{err}");
    let err = engine
        .book_on_behalf(&request(PRO, PATIENT, start), now())
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)), "{err}");
    assert!(engine.upcoming_for_patient(PATIENT, now(), 10).unwrap().is_empty());

    engine.book(&request(PRO, PATIENT, monday_at(9, 0)), now()).unwrap();
}
