use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use clinic_scheduler::{
    Appointment, BookingEngine, BookingRequest, EngineConfig, Facility, NewWindow, Role,
    Service, SqliteStore, User, WeeklyAvailability, load_windows_from_csv,
    load_windows_from_json, save_windows_to_csv, save_windows_to_json,
};
use std::io::{self, Write};
use std::str::{FromStr, SplitWhitespace};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

const DB_ENV: &str = "CLINIC_SCHEDULER_DB";
const LIST_LIMIT: usize = 20;

struct Session {
    store: Arc<SqliteStore>,
    engine: BookingEngine,
}

type CommandResult = Result<(), String>;

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut out = String::from("|");
    for (ci, cell) in cells.enumerate() {
        out.push(' ');
        out.push_str(cell);
        out.push_str(&" ".repeat(widths[ci].saturating_sub(cell.len())));
        out.push_str(" |");
    }
    out
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (ci, cell) in row.iter().enumerate() {
            if cell.len() > widths[ci] {
                widths[ci] = cell.len();
            }
        }
    }

    let mut sep = String::from("+");
    for w in &widths {
        sep.push_str(&"-".repeat(*w + 2));
        sep.push('+');
    }

    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&render_row(headers.iter().copied(), &widths));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for row in rows {
        out.push_str(&render_row(row.iter().map(String::as_str), &widths));
        out.push('\n');
    }
    out.push_str(&sep);
    out
}

fn render_windows(windows: &[WeeklyAvailability]) -> String {
    let rows: Vec<Vec<String>> = windows
        .iter()
        .map(|w| {
            vec![
                w.id.to_string(),
                w.professional_id.to_string(),
                w.weekday.to_string(),
                w.start_time.format("%H:%M").to_string(),
                w.end_time.format("%H:%M").to_string(),
                w.blocked.to_string(),
            ]
        })
        .collect();
    render_table(
        &["id", "professional", "weekday", "start", "end", "blocked"],
        &rows,
    )
}

fn render_appointments(appointments: &[Appointment]) -> String {
    let rows: Vec<Vec<String>> = appointments
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.professional_id.to_string(),
                a.patient_id.to_string(),
                a.service_id.to_string(),
                a.facility_id.to_string(),
                a.start_time.to_rfc3339(),
            ]
        })
        .collect();
    render_table(
        &["id", "professional", "patient", "service", "facility", "start"],
        &rows,
    )
}

fn print_help() {
    println!(
        "Commands:\n  help                                         Show this help\n  user add <id> <patient|professional|admin> <name...>\n                                               Register or rename a user\n  users <role>                                 List users with a role\n  service add <id> <name...>                   Register a service\n  facility add <id> <name...>                  Register a facility\n  window add <pro> <weekday> <HH:MM> <HH:MM>   Add a weekly availability window\n  window seed <pro>                            Add the standard Mon-Fri week\n  window list <pro>                            Show a professional's windows\n  window block|unblock|toggle <pro> <window>   Change a window's blocked flag\n  slots <pro> <service> <YYYY-MM-DD> [days]    Free slots starting at a date\n  calendar <pro> <start> <end>                 Calendar feed between RFC 3339 instants\n  book <patient> <pro> <service> <facility> <start>\n                                               Book as the patient\n  book-for <pro> <patient> <service> <facility> <start>\n                                               Book on a patient's behalf\n  cancel <appointment> <patient>               Cancel a patient's appointment\n  appointments <patient|professional|history> <id>\n                                               List appointments\n  export <json|csv> <path>                     Save all windows to disk\n  import <json|csv> <path>                     Load windows from disk\n  quit|exit                                    Exit"
    );
}

fn arg<T: FromStr>(parts: &mut SplitWhitespace<'_>, what: &str) -> Result<T, String> {
    let raw = parts.next().ok_or_else(|| format!("Missing {what}"))?;
    raw.parse::<T>().map_err(|_| format!("Invalid {what}: {raw}"))
}

fn time_arg(parts: &mut SplitWhitespace<'_>, what: &str) -> Result<NaiveTime, String> {
    let raw = parts.next().ok_or_else(|| format!("Missing {what}"))?;
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| format!("Invalid {what} (HH:MM): {raw}"))
}

fn instant_arg(parts: &mut SplitWhitespace<'_>, what: &str) -> Result<DateTime<Utc>, String> {
    let raw = parts.next().ok_or_else(|| format!("Missing {what}"))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("Invalid {what} (RFC 3339): {raw}"))
}

fn rest(parts: SplitWhitespace<'_>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}

fn user_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    match parts.next() {
        Some("add") => {
            let id: i64 = arg(&mut parts, "id")?;
            let role: Role = arg(&mut parts, "role")?;
            let name = rest(parts);
            if name.is_empty() {
                return Err("Usage: user add <id> <patient|professional|admin> <name...>".into());
            }
            session
                .store
                .upsert_user(&User::new(id, name, role))
                .map_err(|e| e.to_string())?;
            println!("User {id} saved as {role}.");
            Ok(())
        }
        _ => Err("Usage: user add <id> <patient|professional|admin> <name...>".into()),
    }
}

fn users_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let role: Role = arg(&mut parts, "role")?;
    let users = session
        .store
        .users_with_role(role)
        .map_err(|e| e.to_string())?;
    let rows: Vec<Vec<String>> = users
        .iter()
        .map(|u| vec![u.id.to_string(), u.name.clone()])
        .collect();
    println!("{}", render_table(&["id", "name"], &rows));
    Ok(())
}

fn catalog_command(session: &Session, kind: &str, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let usage = format!("Usage: {kind} add <id> <name...>");
    if parts.next() != Some("add") {
        return Err(usage);
    }
    let id: i64 = arg(&mut parts, "id")?;
    let name = rest(parts);
    if name.is_empty() {
        return Err(usage);
    }
    let saved = if kind == "service" {
        session.store.upsert_service(&Service::new(id, name))
    } else {
        session.store.upsert_facility(&Facility::new(id, name))
    };
    saved.map_err(|e| e.to_string())?;
    println!("{} {id} saved.", capitalize(kind));
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn window_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let engine = &session.engine;
    match parts.next() {
        Some("add") => {
            let professional_id: i64 = arg(&mut parts, "professional id")?;
            let weekday: Weekday = arg(&mut parts, "weekday")?;
            let start = time_arg(&mut parts, "start time")?;
            let end = time_arg(&mut parts, "end time")?;
            let window = engine
                .add_window(NewWindow::new(professional_id, weekday, start, end))
                .map_err(|e| e.to_string())?;
            println!("Window {} saved.", window.id);
            Ok(())
        }
        Some("seed") => {
            let professional_id: i64 = arg(&mut parts, "professional id")?;
            let created = engine
                .seed_standard_week(professional_id)
                .map_err(|e| e.to_string())?;
            println!("Seeded {created} windows for professional {professional_id}.");
            Ok(())
        }
        Some("list") => {
            let professional_id: i64 = arg(&mut parts, "professional id")?;
            let windows = engine.windows(professional_id).map_err(|e| e.to_string())?;
            println!("{}", render_windows(&windows));
            Ok(())
        }
        Some(action @ ("block" | "unblock" | "toggle")) => {
            let professional_id: i64 = arg(&mut parts, "professional id")?;
            let window_id: i64 = arg(&mut parts, "window id")?;
            let updated = match action {
                "block" => engine.set_blocked(window_id, professional_id, true),
                "unblock" => engine.set_blocked(window_id, professional_id, false),
                _ => engine.toggle_blocked(window_id, professional_id),
            }
            .map_err(|e| e.to_string())?;
            let state = if updated.blocked { "blocked" } else { "open" };
            println!("Window {window_id} is now {state}.");
            Ok(())
        }
        _ => Err("Usage: window <add|seed|list|block|unblock|toggle> ...".into()),
    }
}

fn slots_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let engine = &session.engine;
    let professional_id: i64 = arg(&mut parts, "professional id")?;
    let service_id: i64 = arg(&mut parts, "service id")?;
    let start: NaiveDate = arg(&mut parts, "date (YYYY-MM-DD)")?;
    let days = match parts.next() {
        Some(raw) => raw.parse::<u32>().map_err(|_| format!("Invalid days: {raw}"))?,
        None => engine.config().horizon_days,
    };
    let slots = engine
        .generate_slots(professional_id, service_id, start, days, Utc::now())
        .map_err(|e| e.to_string())?;
    let tz = engine.timezone();
    let rows: Vec<Vec<String>> = slots
        .iter()
        .map(|s| {
            vec![
                s.start.with_timezone(&tz).to_rfc3339(),
                s.end.with_timezone(&tz).to_rfc3339(),
            ]
        })
        .collect();
    println!("{} free slots", slots.len());
    println!("{}", render_table(&["start", "end"], &rows));
    Ok(())
}

fn calendar_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let professional_id: i64 = arg(&mut parts, "professional id")?;
    let start = instant_arg(&mut parts, "start")?;
    let end = instant_arg(&mut parts, "end")?;
    let events = session
        .engine
        .calendar_feed(
            professional_id,
            start.fixed_offset(),
            end.fixed_offset(),
            Utc::now(),
        )
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&events).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn book_command(
    session: &Session,
    on_behalf: bool,
    mut parts: SplitWhitespace<'_>,
) -> CommandResult {
    let (first, second) = if on_behalf {
        ("professional id", "patient id")
    } else {
        ("patient id", "professional id")
    };
    let a: i64 = arg(&mut parts, first)?;
    let b: i64 = arg(&mut parts, second)?;
    let (patient_id, professional_id) = if on_behalf { (b, a) } else { (a, b) };
    let service_id: i64 = arg(&mut parts, "service id")?;
    let facility_id: i64 = arg(&mut parts, "facility id")?;
    let start = instant_arg(&mut parts, "start")?;
    let request = BookingRequest {
        patient_id,
        professional_id,
        service_id,
        facility_id,
        start,
    };

    let now = Utc::now();
    if on_behalf {
        let receipt = session
            .engine
            .book_on_behalf(&request, now)
            .map_err(|e| e.to_string())?;
        println!("Booked appointment {}.", receipt.appointment.id);
        for warning in &receipt.warnings {
            println!("Warning: {}", serde_json::to_string(warning).map_err(|e| e.to_string())?);
        }
    } else {
        let appointment = session
            .engine
            .book(&request, now)
            .map_err(|e| e.to_string())?;
        println!("Booked appointment {}.", appointment.id);
    }
    Ok(())
}

fn cancel_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let appointment_id: i64 = arg(&mut parts, "appointment id")?;
    let patient_id: i64 = arg(&mut parts, "patient id")?;
    session
        .engine
        .cancel(appointment_id, patient_id, Utc::now())
        .map_err(|e| e.to_string())?;
    println!("Cancelled appointment {appointment_id}.");
    Ok(())
}

fn appointments_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let engine = &session.engine;
    let now = Utc::now();
    let listed = match parts.next() {
        Some("patient") => {
            engine.upcoming_for_patient(arg(&mut parts, "patient id")?, now, LIST_LIMIT)
        }
        Some("history") => {
            engine.history_for_patient(arg(&mut parts, "patient id")?, now, LIST_LIMIT)
        }
        Some("professional") => engine.upcoming_for_professional(
            arg(&mut parts, "professional id")?,
            now,
            LIST_LIMIT,
        ),
        _ => return Err("Usage: appointments <patient|professional|history> <id>".into()),
    };
    let appointments = listed.map_err(|e| e.to_string())?;
    println!("{}", render_appointments(&appointments));
    Ok(())
}

fn export_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let (Some(format), Some(path)) = (parts.next(), parts.next()) else {
        return Err("Usage: export <json|csv> <path>".into());
    };
    let windows = session.engine.all_windows().map_err(|e| e.to_string())?;
    let saved = match format {
        "json" => save_windows_to_json(&windows, path),
        "csv" => save_windows_to_csv(&windows, path),
        _ => return Err("Usage: export <json|csv> <path>".into()),
    };
    saved.map_err(|e| e.to_string())?;
    println!("Exported {} windows to {path}.", windows.len());
    Ok(())
}

fn import_command(session: &Session, mut parts: SplitWhitespace<'_>) -> CommandResult {
    let (Some(format), Some(path)) = (parts.next(), parts.next()) else {
        return Err("Usage: import <json|csv> <path>".into());
    };
    let windows = match format {
        "json" => load_windows_from_json(path),
        "csv" => load_windows_from_csv(path),
        _ => return Err("Usage: import <json|csv> <path>".into()),
    }
    .map_err(|e| e.to_string())?;
    let created = session
        .engine
        .import_windows(windows)
        .map_err(|e| e.to_string())?;
    println!("Imported {created} new windows from {path}.");
    Ok(())
}

fn open_session() -> Result<Session, String> {
    let config = EngineConfig::from_env().map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    let store = match std::env::var(DB_ENV) {
        Ok(path) if !path.trim().is_empty() => SqliteStore::new(path.trim()),
        _ => SqliteStore::in_memory(),
    }
    .map_err(|e| e.to_string())?;
    let store = Arc::new(store);
    let engine = BookingEngine::with_sqlite(store.clone(), config);
    Ok(Session { store, engine })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Level::WARN.to_string())),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let session = match open_session() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    println!("Clinic Scheduler (CLI) - type 'help' for commands\n");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("");

        let outcome = match cmd {
            "help" => {
                print_help();
                Ok(())
            }
            "quit" | "exit" => break,
            "user" => user_command(&session, parts),
            "users" => users_command(&session, parts),
            "service" | "facility" => catalog_command(&session, cmd, parts),
            "window" => window_command(&session, parts),
            "slots" => slots_command(&session, parts),
            "calendar" => calendar_command(&session, parts),
            "book" => book_command(&session, false, parts),
            "book-for" => book_command(&session, true, parts),
            "cancel" => cancel_command(&session, parts),
            "appointments" => appointments_command(&session, parts),
            "export" => export_command(&session, parts),
            "import" => import_command(&session, parts),
            other => Err(format!("Unknown command '{other}'. Type 'help'.")),
        };
        if let Err(message) = outcome {
            println!("Error: {message}");
        }
    }
}
