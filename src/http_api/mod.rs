use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::{
    Appointment, BookingEngine, BookingError, BookingReceipt, BookingRequest, CalendarEvent,
    NewWindow, SlotCandidate, WeeklyAvailability,
};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    engine: BookingEngine,
    clock: Clock,
}

impl AppState {
    pub fn new(engine: BookingEngine) -> Self {
        Self {
            engine,
            clock: Arc::new(Utc::now),
        }
    }

    /// Pins "now" for every request; used by tests and replays.
    pub fn with_clock<F>(engine: BookingEngine, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            engine,
            clock: Arc::new(clock),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Conflict(String),
    PastTime(String),
    CancellationWindow(String),
    Forbidden(String),
    Invalid(String),
    Internal(String),
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        ApiError::Invalid(message.into())
    }
}

impl From<BookingError> for ApiError {
    fn from(value: BookingError) -> Self {
        let message = value.to_string();
        match value {
            BookingError::NotFound { .. } => ApiError::NotFound(message),
            BookingError::Conflict { .. } => ApiError::Conflict(message),
            BookingError::PastTime { .. } => ApiError::PastTime(message),
            BookingError::CancellationTooLate { .. } => ApiError::CancellationWindow(message),
            BookingError::NotOwner { .. } => ApiError::Forbidden(message),
            BookingError::Validation(_) => ApiError::Invalid(message),
            BookingError::Persistence(err) => {
                error!(error = %err, "storage failure while serving request");
                ApiError::Internal(message)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        ApiError::Invalid(value.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        ApiError::Invalid(value.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        ApiError::Invalid(value.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            ApiError::PastTime(message) => (StatusCode::UNPROCESSABLE_ENTITY, "past_time", message),
            ApiError::CancellationWindow(message) => {
                (StatusCode::CONFLICT, "cancellation_window", message)
            }
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, "forbidden", message),
            ApiError::Invalid(message) => (StatusCode::BAD_REQUEST, "invalid_request", message),
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SlotsQuery {
    service_id: i64,
    start: Option<NaiveDate>,
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CalendarQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PatientBookingPayload {
    patient_id: i64,
    professional_id: i64,
    service_id: i64,
    facility_id: Option<i64>,
    start: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ProfessionalBookingPayload {
    patient_id: i64,
    service_id: i64,
    facility_id: Option<i64>,
    start: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CancelQuery {
    patient_id: i64,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WindowPayload {
    weekday: Weekday,
    start_time: NaiveTime,
    end_time: NaiveTime,
    #[serde(default)]
    blocked: bool,
}

#[derive(Debug, Deserialize)]
struct BlockedPayload {
    blocked: bool,
}

const DEFAULT_LIST_LIMIT: usize = 10;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/professionals/:id/slots", get(list_slots))
        .route("/professionals/:id/calendar", get(calendar_feed))
        .route(
            "/professionals/:id/windows",
            get(list_windows).post(create_window),
        )
        .route(
            "/professionals/:id/windows/:window_id/blocked",
            put(set_window_blocked),
        )
        .route(
            "/professionals/:id/appointments",
            get(professional_appointments).post(book_for_patient),
        )
        .route("/patients/:id/appointments", get(patient_appointments))
        .route("/patients/:id/history", get(patient_history))
        .route("/appointments", post(book_appointment))
        .route("/appointments/:id", axum::routing::delete(cancel_appointment))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, engine: BookingEngine) -> std::io::Result<()> {
    let app = router(AppState::new(engine));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn resolve_facility(state: &AppState, facility_id: Option<i64>) -> Result<i64, ApiError> {
    facility_id
        .or(state.engine.config().default_facility_id)
        .ok_or_else(|| ApiError::invalid("facility_id is required"))
}

/// Runs an engine call on tokio's blocking pool. Store calls may wait on
/// SQLite locks and must not stall the async workers.
async fn run_engine<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&BookingEngine, DateTime<Utc>) -> Result<T, BookingError> + Send + 'static,
{
    let engine = state.engine.clone();
    let now = state.now();
    let outcome = tokio::task::spawn_blocking(move || call(&engine, now))
        .await
        .map_err(|err| {
            error!(error = %err, "engine task did not complete");
            ApiError::Internal("request could not be completed".to_string())
        })?;
    Ok(outcome?)
}

async fn list_slots(
    State(state): State<AppState>,
    professional_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> Result<Json<Vec<SlotCandidate>>, ApiError> {
    let Path(professional_id) = professional_id?;
    let Query(query) = query?;
    let slots = run_engine(&state, move |engine, now| {
        let start = query.start.unwrap_or_else(|| engine.today(now));
        let days = query.days.unwrap_or(engine.config().horizon_days);
        engine.generate_slots(professional_id, query.service_id, start, days, now)
    })
    .await?;
    Ok(Json(slots))
}

async fn calendar_feed(
    State(state): State<AppState>,
    professional_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<CalendarQuery>, QueryRejection>,
) -> Result<Json<Vec<CalendarEvent>>, ApiError> {
    let Path(professional_id) = professional_id?;
    let Query(query) = query?;
    let (Some(start), Some(end)) = (query.start, query.end) else {
        return Err(ApiError::invalid("missing start or end parameter"));
    };
    let parse = |value: &str| {
        DateTime::parse_from_rfc3339(value.trim())
            .map_err(|_| ApiError::invalid(format!("invalid date format '{value}'")))
    };
    let (start, end) = (parse(&start)?, parse(&end)?);
    let events = run_engine(&state, move |engine, now| {
        engine.calendar_feed(professional_id, start, end, now)
    })
    .await?;
    Ok(Json(events))
}

async fn list_windows(
    State(state): State<AppState>,
    professional_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<WeeklyAvailability>>, ApiError> {
    let Path(professional_id) = professional_id?;
    let windows = run_engine(&state, move |engine, _| engine.windows(professional_id)).await?;
    Ok(Json(windows))
}

async fn create_window(
    State(state): State<AppState>,
    professional_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<WindowPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<WeeklyAvailability>), ApiError> {
    let Path(professional_id) = professional_id?;
    let Json(payload) = payload?;
    let window = NewWindow {
        professional_id,
        weekday: payload.weekday,
        start_time: payload.start_time,
        end_time: payload.end_time,
        blocked: payload.blocked,
    };
    let created = run_engine(&state, move |engine, _| engine.add_window(window)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn set_window_blocked(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
    payload: Result<Json<BlockedPayload>, JsonRejection>,
) -> Result<Json<WeeklyAvailability>, ApiError> {
    let Path((professional_id, window_id)) = ids?;
    let Json(payload) = payload?;
    let window = run_engine(&state, move |engine, _| {
        engine.set_blocked(window_id, professional_id, payload.blocked)
    })
    .await?;
    Ok(Json(window))
}

async fn book_appointment(
    State(state): State<AppState>,
    payload: Result<Json<PatientBookingPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let Json(payload) = payload?;
    let request = BookingRequest {
        patient_id: payload.patient_id,
        professional_id: payload.professional_id,
        service_id: payload.service_id,
        facility_id: resolve_facility(&state, payload.facility_id)?,
        start: payload.start,
    };
    let appointment = run_engine(&state, move |engine, now| engine.book(&request, now)).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn book_for_patient(
    State(state): State<AppState>,
    professional_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ProfessionalBookingPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingReceipt>), ApiError> {
    let Path(professional_id) = professional_id?;
    let Json(payload) = payload?;
    let request = BookingRequest {
        patient_id: payload.patient_id,
        professional_id,
        service_id: payload.service_id,
        facility_id: resolve_facility(&state, payload.facility_id)?,
        start: payload.start,
    };
    let receipt = run_engine(&state, move |engine, now| {
        engine.book_on_behalf(&request, now)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn cancel_appointment(
    State(state): State<AppState>,
    appointment_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<CancelQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(appointment_id) = appointment_id?;
    let Query(query) = query?;
    run_engine(&state, move |engine, now| {
        engine.cancel(appointment_id, query.patient_id, now)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn patient_appointments(
    State(state): State<AppState>,
    patient_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let Path(patient_id) = patient_id?;
    let limit = query?.0.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let appointments = run_engine(&state, move |engine, now| {
        engine.upcoming_for_patient(patient_id, now, limit)
    })
    .await?;
    Ok(Json(appointments))
}

async fn patient_history(
    State(state): State<AppState>,
    patient_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let Path(patient_id) = patient_id?;
    let limit = query?.0.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let appointments = run_engine(&state, move |engine, now| {
        engine.history_for_patient(patient_id, now, limit)
    })
    .await?;
    Ok(Json(appointments))
}

async fn professional_appointments(
    State(state): State<AppState>,
    professional_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let Path(professional_id) = professional_id?;
    let limit = query?.0.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let appointments = run_engine(&state, move |engine, now| {
        engine.upcoming_for_professional(professional_id, now, limit)
    })
    .await?;
    Ok(Json(appointments))
}
