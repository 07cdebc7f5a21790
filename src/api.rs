use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use ulid::Ulid;

use crate::auth::CronGuard;
use crate::engine::{
    AssignmentQuery, AvailabilityQuery, BlockRequest, CancelRequest, Engine, EngineError,
    FinishRequest, NewBooking, RescheduleRequest, SlotKind,
};
use crate::model::*;
use crate::sweeper;

pub struct AppState {
    pub engine: Arc<Engine>,
    pub cron: CronGuard,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Bookings
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/notifications", get(booking_notifications))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/reschedule", post(reschedule_booking))
        .route("/bookings/{id}/confirm", post(confirm_booking))
        .route("/bookings/{id}/check-in", post(check_in))
        .route("/bookings/{id}/finish", post(finish_booking))
        .route("/bookings/{id}/attendance", post(record_attendance))
        .route("/availability", get(availability))
        .route("/assignment", get(preview_assignment))
        // Time blocks
        .route("/blocks", get(list_blocks).post(block_time))
        .route("/blocks/{id}", delete(unblock_time))
        // Sweeps, driven by an external scheduler
        .route("/cron/reminders", get(cron_reminders).post(cron_reminders))
        .route("/cron/no-shows", get(cron_no_shows).post(cron_no_shows))
        // Reference data
        .route("/professionals", get(list_professionals))
        .route("/admin/professionals/{id}", put(put_professional))
        .route(
            "/admin/professionals/{id}/webhook",
            put(put_professional_webhook),
        )
        .route("/admin/services/{id}", put(put_service))
        .route("/admin/packages/{id}", put(put_package))
        .route("/admin/settings", get(get_settings).put(put_settings))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

// ── Envelope ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    message: String,
    errors: Vec<String>,
    data: Option<T>,
}

fn reply<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> Response {
    let body = Envelope {
        success: true,
        message: message.into(),
        errors: Vec::new(),
        data: Some(data),
    };
    (status, Json(body)).into_response()
}

fn failure(
    status: StatusCode,
    message: impl Into<String>,
    errors: Vec<String>,
    data: Option<serde_json::Value>,
) -> Response {
    let body = Envelope {
        success: false,
        message: message.into(),
        errors,
        data,
    };
    (status, Json(body)).into_response()
}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
    Unauthorized,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Engine(e) => e.into_response(),
            ApiError::BadRequest(msg) => {
                failure(StatusCode::BAD_REQUEST, "Invalid request", vec![msg], None)
            }
            ApiError::Unauthorized => {
                failure(StatusCode::UNAUTHORIZED, "Unauthorized", Vec::new(), None)
            }
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        match self {
            EngineError::Validation(errors) => {
                failure(StatusCode::BAD_REQUEST, "Invalid input", errors, None)
            }
            EngineError::NotFound(_) => {
                failure(StatusCode::NOT_FOUND, self.to_string(), Vec::new(), None)
            }
            EngineError::Conflict {
                ref professional,
                date,
                start,
                conflicting,
                kind,
                ref suggestions,
            } => {
                let mut data = serde_json::json!({
                    "professional": professional,
                    "date": date,
                    "time": start,
                    "suggestions": suggestions,
                });
                let field = match kind {
                    SlotKind::Booking => "conflicting_booking",
                    SlotKind::Block => "conflicting_block",
                };
                data[field] = serde_json::json!(conflicting);
                failure(StatusCode::CONFLICT, self.to_string(), Vec::new(), Some(data))
            }
            EngineError::AllProfessionalsBusy {
                date,
                start,
                checked,
            } => {
                let data = serde_json::json!({
                    "date": date,
                    "time": start,
                    "professionals_checked": checked,
                });
                failure(StatusCode::CONFLICT, self.to_string(), Vec::new(), Some(data))
            }
            EngineError::DeadlineNotMet {
                hours_remaining,
                minimum_hours,
            } => {
                let data = serde_json::json!({
                    "hours_remaining": (hours_remaining * 100.0).round() / 100.0,
                    "minimum_hours": minimum_hours,
                });
                failure(StatusCode::BAD_REQUEST, self.to_string(), Vec::new(), Some(data))
            }
            EngineError::InvalidTransition { .. }
            | EngineError::BusinessClosed(_)
            | EngineError::LimitExceeded(_) => {
                failure(StatusCode::BAD_REQUEST, self.to_string(), Vec::new(), None)
            }
            EngineError::NoActiveProfessionals => failure(
                StatusCode::SERVICE_UNAVAILABLE,
                self.to_string(),
                Vec::new(),
                None,
            ),
            EngineError::WalError(ref detail) => {
                error!(error = %detail, "request failed on journal write");
                failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error",
                    Vec::new(),
                    None,
                )
            }
        }
    }
}

type ApiResult = Result<Response, ApiError>;

fn parse_id(raw: &str, kind: &str) -> Result<Ulid, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {kind} id '{raw}'")))
}

/// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn to_cents(amount: f64, field: &str) -> Result<Cents, ApiError> {
    if !amount.is_finite() {
        return Err(ApiError::BadRequest(format!("{field} must be a number")));
    }
    Ok((amount * 100.0).round() as Cents)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(crate::observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

// ── Handlers ─────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Response {
    reply(
        StatusCode::OK,
        "ok",
        serde_json::json!({
            "status": "ok",
            "bookings": state.engine.store.booking_count(),
        }),
    )
}

#[derive(Debug, Deserialize)]
struct DateParam {
    date: Option<String>,
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DateParam>,
) -> ApiResult {
    let bookings = match params.date.filter(|d| !d.trim().is_empty()) {
        Some(date) => state.engine.bookings_on(&date)?,
        None => state.engine.store.bookings_on(state.engine.clock().today()),
    };
    Ok(reply(StatusCode::OK, format!("{} bookings", bookings.len()), bookings))
}

async fn create_booking(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let req: NewBooking = parse_body(&body)?;
    let receipt = state.engine.create_booking(req).await?;
    Ok(reply(StatusCode::CREATED, "Booking created", receipt))
}

#[derive(Debug, Serialize)]
struct BookingView {
    booking: Booking,
    cancellation: Option<CancellationRecord>,
}

async fn get_booking(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let booking = state.engine.get_booking(id)?;
    let cancellation = state.engine.cancellation_for(id)?;
    Ok(reply(StatusCode::OK, "ok", BookingView { booking, cancellation }))
}

async fn booking_notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let records = state.engine.notifications_for(id)?;
    Ok(reply(StatusCode::OK, format!("{} notifications", records.len()), records))
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let req: CancelRequest = parse_body(&body)?;
    let outcome = state.engine.cancel_booking(id, req).await?;
    Ok(reply(StatusCode::OK, "Booking canceled", outcome))
}

async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let req: RescheduleRequest = parse_body(&body)?;
    let receipt = state.engine.reschedule_booking(id, req).await?;
    Ok(reply(StatusCode::OK, "Booking rescheduled", receipt))
}

async fn confirm_booking(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let receipt = state.engine.confirm_booking(id).await?;
    Ok(reply(StatusCode::OK, "Booking confirmed", receipt))
}

async fn check_in(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let booking = state.engine.check_in(id).await?;
    Ok(reply(StatusCode::OK, "Client checked in", booking))
}

async fn finish_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let req: FinishRequest = parse_body(&body)?;
    let booking = state.engine.finish_booking(id, req).await?;
    Ok(reply(StatusCode::OK, "Booking finished", booking))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AttendanceBody {
    attended: Option<bool>,
    notes: Option<String>,
}

async fn record_attendance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&id, "booking")?;
    let req: AttendanceBody = parse_body(&body)?;
    let attended = req
        .attended
        .ok_or_else(|| ApiError::BadRequest("attended is required".into()))?;
    let booking = state.engine.record_attendance(id, attended, req.notes).await?;
    Ok(reply(StatusCode::OK, "Attendance recorded", booking))
}

#[derive(Debug, Deserialize)]
struct AvailabilityParams {
    date: Option<String>,
    professional: Option<String>,
    /// Comma-separated service ids.
    service_ids: Option<String>,
}

async fn availability(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AvailabilityParams>,
) -> ApiResult {
    let query = AvailabilityQuery {
        date: params.date,
        professional: params.professional,
        service_ids: params
            .service_ids
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    };
    let report = state.engine.availability(query).await?;
    let message = format!("{} slots available", report.available.len());
    Ok(reply(StatusCode::OK, message, report))
}

#[derive(Debug, Deserialize)]
struct AssignmentParams {
    date: Option<String>,
    time: Option<String>,
    duration_minutes: Option<String>,
}

async fn preview_assignment(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AssignmentParams>,
) -> ApiResult {
    let duration_minutes = match params.duration_minutes.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<Minutes>().map_err(|_| {
            ApiError::BadRequest(format!("invalid duration_minutes '{raw}'"))
        })?),
    };
    let preview = state
        .engine
        .preview_assignment(AssignmentQuery {
            date: params.date,
            time: params.time,
            duration_minutes,
        })
        .await?;
    let message = format!("{} is free", preview.professional_name);
    Ok(reply(StatusCode::OK, message, preview))
}

async fn list_blocks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DateParam>,
) -> ApiResult {
    let blocks = match params.date.filter(|d| !d.trim().is_empty()) {
        Some(date) => state.engine.blocks_on(&date)?,
        None => state.engine.store.blocks_on(state.engine.clock().today()),
    };
    Ok(reply(StatusCode::OK, format!("{} blocks", blocks.len()), blocks))
}

async fn block_time(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let req: BlockRequest = parse_body(&body)?;
    let block = state.engine.block_time(req).await?;
    Ok(reply(StatusCode::CREATED, "Time blocked", block))
}

async fn unblock_time(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id, "time block")?;
    let block = state.engine.unblock_time(id).await?;
    Ok(reply(StatusCode::OK, "Time unblocked", block))
}

fn authorize_cron(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if state.cron.authorize(header) {
        Ok(())
    } else {
        warn!("cron request rejected: bad or missing bearer token");
        Err(ApiError::Unauthorized)
    }
}

async fn cron_reminders(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    authorize_cron(&state, &headers)?;
    let report = sweeper::sweep_reminders(&state.engine).await;
    let message = format!(
        "{} sent, {} failed",
        report.total_sent(),
        report.total_failed()
    );
    Ok(reply(StatusCode::OK, message, report))
}

async fn cron_no_shows(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    authorize_cron(&state, &headers)?;
    let report = sweeper::sweep_no_shows(&state.engine).await;
    let message = format!("{} of {} marked as no-show", report.marked, report.checked);
    Ok(reply(StatusCode::OK, message, report))
}

async fn list_professionals(State(state): State<Arc<AppState>>) -> Response {
    let professionals = state.engine.list_professionals();
    reply(StatusCode::OK, "ok", professionals)
}

// ── Admin ────────────────────────────────────────────────

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ProfessionalBody {
    #[serde(default)]
    name: String,
    #[serde(default = "default_active")]
    active: bool,
}

impl Default for ProfessionalBody {
    fn default() -> Self {
        Self {
            name: String::new(),
            active: true,
        }
    }
}

async fn put_professional(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&id, "professional")?;
    let req: ProfessionalBody = parse_body(&body)?;
    let professional = state
        .engine
        .upsert_professional(id, req.name, req.active)
        .await?;
    Ok(reply(StatusCode::OK, "Professional saved", professional))
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    url: String,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    events: Vec<EventKind>,
}

impl Default for WebhookBody {
    fn default() -> Self {
        Self {
            url: String::new(),
            active: true,
            events: Vec::new(),
        }
    }
}

async fn put_professional_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let professional_id = parse_id(&id, "professional")?;
    let req: WebhookBody = parse_body(&body)?;
    let webhook = state
        .engine
        .set_professional_webhook(ProfessionalWebhook {
            professional_id,
            url: req.url.trim().to_string(),
            active: req.active,
            events: req.events,
        })
        .await?;
    Ok(reply(StatusCode::OK, "Webhook saved", webhook))
}

#[derive(Debug, Deserialize)]
struct ServiceBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    duration_minutes: Option<Minutes>,
    #[serde(default = "default_active")]
    active: bool,
}

impl Default for ServiceBody {
    fn default() -> Self {
        Self {
            name: String::new(),
            price: 0.0,
            duration_minutes: None,
            active: true,
        }
    }
}

async fn put_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&id, "service")?;
    let req: ServiceBody = parse_body(&body)?;
    let service = state
        .engine
        .upsert_service(Service {
            id,
            name: req.name.trim().to_string(),
            price: to_cents(req.price, "price")?,
            duration_minutes: req.duration_minutes,
            active: req.active,
        })
        .await?;
    Ok(reply(StatusCode::OK, "Service saved", service))
}

#[derive(Debug, Deserialize)]
struct PackageBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    total_value: f64,
    #[serde(default = "default_active")]
    active: bool,
}

impl Default for PackageBody {
    fn default() -> Self {
        Self {
            name: String::new(),
            total_value: 0.0,
            active: true,
        }
    }
}

async fn put_package(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&id, "package")?;
    let req: PackageBody = parse_body(&body)?;
    let package = state
        .engine
        .upsert_package(Package {
            id,
            name: req.name.trim().to_string(),
            total_value: to_cents(req.total_value, "total_value")?,
            active: req.active,
        })
        .await?;
    Ok(reply(StatusCode::OK, "Package saved", package))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Response {
    reply(StatusCode::OK, "ok", state.engine.settings())
}

async fn put_settings(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let settings: Settings = parse_body(&body)?;
    let settings = state.engine.update_settings(settings).await?;
    Ok(reply(StatusCode::OK, "Settings saved", settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn conflict_maps_to_409_with_suggestions() {
        let err = EngineError::Conflict {
            professional: "Hiago".into(),
            date: "2025-12-10".parse().unwrap(),
            start: CivilTime::hm(10, 0).unwrap(),
            conflicting: Ulid::nil(),
            kind: SlotKind::Booking,
            suggestions: vec![CivilTime::hm(10, 30).unwrap(), CivilTime::hm(11, 0).unwrap()],
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["suggestions"][0], "10:30");
        assert_eq!(body["data"]["date"], "10/12/2025");
        assert_eq!(body["data"]["conflicting_booking"], Ulid::nil().to_string());
    }

    #[tokio::test]
    async fn block_conflict_names_the_block() {
        let err = EngineError::Conflict {
            professional: "Hiago".into(),
            date: "2025-12-10".parse().unwrap(),
            start: CivilTime::hm(12, 0).unwrap(),
            conflicting: Ulid::nil(),
            kind: SlotKind::Block,
            suggestions: Vec::new(),
        };
        let body = body_json(err.into_response()).await;
        assert_eq!(body["data"]["conflicting_block"], Ulid::nil().to_string());
        assert!(body["data"].get("conflicting_booking").is_none());
        assert_eq!(body["message"], "Hiago is blocked at 12:00 on 10/12/2025");
    }

    #[tokio::test]
    async fn deadline_carries_diagnostics() {
        let err = EngineError::DeadlineNotMet {
            hours_remaining: 0.999_722,
            minimum_hours: 2,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["data"]["hours_remaining"], 1.0);
        assert_eq!(body["data"]["minimum_hours"], 2);
    }

    #[tokio::test]
    async fn status_codes() {
        let cases = [
            (EngineError::invalid("x"), StatusCode::BAD_REQUEST),
            (EngineError::NotFound("booking".into()), StatusCode::NOT_FOUND),
            (EngineError::NoActiveProfessionals, StatusCode::SERVICE_UNAVAILABLE),
            (
                EngineError::AllProfessionalsBusy {
                    date: "2025-12-10".parse().unwrap(),
                    start: CivilTime::hm(10, 0).unwrap(),
                    checked: 2,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::LimitExceeded("x"), StatusCode::BAD_REQUEST),
            (EngineError::WalError("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn journal_detail_is_not_leaked() {
        let body = body_json(EngineError::WalError("/data/x: disk full".into()).into_response()).await;
        assert_eq!(body["message"], "Internal error");
        assert!(!body.to_string().contains("disk full"));
    }

    #[test]
    fn empty_body_is_default() {
        let req: CancelRequest = parse_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(!req.force);
        assert!(parse_body::<CancelRequest>(&Bytes::from_static(b"{oops")).is_err());
    }
}
