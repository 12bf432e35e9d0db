//! HTTP surface over the engine.
//!
//! Every response is JSON `{"success": true, "data": ...}` or
//! `{"success": false, "error": "..."}`, except receipts which are plain text.

use std::io;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use ulid::Ulid;

use crate::auth::{Identity, IdentityProvider};
use crate::blob::BlobStore;
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_COORDINATE_PART;
use crate::model::*;
use crate::receipt::ReceiptRenderer;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub identity: Arc<dyn IdentityProvider>,
    pub blobs: Arc<dyn BlobStore>,
    pub receipts: Arc<dyn ReceiptRenderer>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/topology", get(topology))
        .route("/bookings", get(list_bookings).post(reserve))
        .route("/bookings/available", get(available))
        .route("/bookings/shift", post(shift))
        .route(
            "/bookings/{id}",
            get(get_booking).put(update_booking).delete(release_booking),
        )
        .route("/payments", get(list_payments).post(record_payment))
        .route("/payments/user/{id}", get(user_payments))
        .route("/payments/{id}/receipt", get(receipt))
        .route("/payments/{id}", delete(delete_payment))
        .route("/overview", get(overview))
        .route(
            "/uploads",
            post(upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthenticated,
    Forbidden,
    BadRequest(String),
    Upload(io::Error),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::Conflict(_) => StatusCode::CONFLICT,
                EngineError::InvalidCoordinate(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::NotFound(_) | EngineError::BookingNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidAuthorization => StatusCode::FORBIDDEN,
                EngineError::Validation(_)
                | EngineError::InvalidQuery(_)
                | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
                EngineError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upload(e) if e.kind() == io::ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ApiError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Engine(e) => e.to_string(),
            ApiError::Unauthenticated => "authentication required".into(),
            ApiError::Forbidden => "not allowed".into(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Upload(e) => format!("upload failed: {e}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!("request failed: {message}");
        }
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, ok(data)).into_response()
}

// ── Caller identity ──────────────────────────────────────

/// The authenticated caller. Rejects anonymous requests with 401.
pub struct Caller(pub Identity);

impl Caller {
    fn require_staff(&self) -> Result<(), ApiError> {
        if self.0.is_staff {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    /// Authorization codes are shown to staff only.
    fn payment_view(&self, payment: Payment) -> Payment {
        if self.0.is_staff {
            payment
        } else {
            payment.redacted()
        }
    }

    fn require_access(&self, owner: &str) -> Result<(), ApiError> {
        if self.0.may_access(owner) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        let user = parts.headers.get("x-user-id").and_then(|v| v.to_str().ok());
        state
            .identity
            .identify(bearer, user)
            .map(Caller)
            .ok_or(ApiError::Unauthenticated)
    }
}

// ── Input normalization ──────────────────────────────────

/// A floor, room or bed number as sent by clients: JSON number or numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumOrText {
    Num(u64),
    Text(String),
}

fn parse_part(raw: &NumOrText, what: &str) -> Result<u32, ApiError> {
    let n = match raw {
        NumOrText::Num(n) => *n,
        NumOrText::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| ApiError::BadRequest(format!("{what} must be a number")))?,
    };
    u32::try_from(n)
        .ok()
        .filter(|n| *n <= MAX_COORDINATE_PART)
        .ok_or(ApiError::Engine(EngineError::LimitExceeded("coordinate out of range")))
}

fn coordinate(floor: &NumOrText, room: &NumOrText, bed: &NumOrText) -> Result<Coordinate, ApiError> {
    Ok(Coordinate::new(
        parse_part(floor, "floor")?,
        parse_part(room, "room")?,
        parse_part(bed, "bed")?,
    ))
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw.trim()).map_err(|_| ApiError::BadRequest(format!("invalid id: {raw}")))
}

#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    pub floor: NumOrText,
    pub room: NumOrText,
    pub bed: NumOrText,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    pub alt_phone: Option<String>,
    #[serde(default)]
    pub email: String,
    pub national_id: Option<String>,
    #[serde(default)]
    pub join_date: String,
    pub photo: Option<String>,
    pub id_document: Option<String>,
    /// Honoured only for staff callers.
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShiftBody {
    pub booking_id: String,
    pub floor: NumOrText,
    pub room: NumOrText,
    pub bed: NumOrText,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateBody {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub alt_phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentBody {
    pub user_id: Option<String>,
    pub booking_id: Option<String>,
    pub amount: i64,
    pub authorization_code: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub room_label: Option<String>,
    pub bed_label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub floor: String,
    pub room: String,
}

// ── Handlers ─────────────────────────────────────────────

async fn health() -> Response {
    Json(json!({ "success": true, "status": "ok" })).into_response()
}

async fn topology(State(state): State<AppState>) -> Response {
    let topology = state.engine.topology();
    ok(json!({
        "layout": topology.as_ref(),
        "total_beds": topology.total_beds(),
        "classes": topology.capacity_classes(),
    }))
}

async fn list_bookings(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<SearchQuery>,
) -> ApiResult {
    caller.require_staff()?;
    let bookings = state
        .engine
        .search_bookings(query.q.as_deref().unwrap_or(""))
        .await?;
    Ok(ok(bookings))
}

async fn reserve(State(state): State<AppState>, caller: Caller, Json(body): Json<ReserveBody>) -> ApiResult {
    let coordinate = coordinate(&body.floor, &body.room, &body.bed)?;
    let user_id = if caller.0.is_staff {
        body.user_id
    } else {
        Some(caller.0.user_id.clone())
    };
    let occupant = Occupant {
        name: body.name,
        phone: body.phone,
        alt_phone: body.alt_phone,
        email: body.email,
        national_id: body.national_id,
        join_date: body.join_date,
        photo: body.photo,
        id_document: body.id_document,
    };
    let booking = state.engine.reserve(coordinate, occupant, user_id).await?;
    Ok(created(booking))
}

async fn available(State(state): State<AppState>, Query(query): Query<AvailableQuery>) -> ApiResult {
    let floor = parse_part(&NumOrText::Text(query.floor), "floor")?;
    let room = parse_part(&NumOrText::Text(query.room), "room")?;
    let beds = state.engine.list_available(floor, room)?;
    Ok(ok(json!({ "floor": floor, "room": room, "beds": beds })))
}

async fn shift(State(state): State<AppState>, caller: Caller, Json(body): Json<ShiftBody>) -> ApiResult {
    caller.require_staff()?;
    let id = parse_id(&body.booking_id)?;
    let target = coordinate(&body.floor, &body.room, &body.bed)?;
    let booking = state.engine.shift(id, target).await?;
    Ok(ok(booking))
}

async fn get_booking(State(state): State<AppState>, caller: Caller, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    let booking = state
        .engine
        .booking(id)
        .await
        .ok_or(EngineError::NotFound(id))?;
    caller.require_access(&booking.user_id)?;
    Ok(ok(booking))
}

async fn update_booking(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> ApiResult {
    let id = parse_id(&id)?;
    if !caller.0.is_staff {
        let booking = state
            .engine
            .booking(id)
            .await
            .ok_or(EngineError::NotFound(id))?;
        caller.require_access(&booking.user_id)?;
    }
    let patch = BookingPatch {
        name: body.name,
        phone: body.phone,
        alt_phone: body.alt_phone,
        email: body.email,
    };
    let booking = state.engine.update(id, patch).await?;
    Ok(ok(booking))
}

async fn release_booking(State(state): State<AppState>, caller: Caller, Path(id): Path<String>) -> ApiResult {
    caller.require_staff()?;
    let id = parse_id(&id)?;
    state.engine.release(id).await?;
    Ok(ok(json!({ "id": id })))
}

async fn record_payment(State(state): State<AppState>, caller: Caller, Json(body): Json<PaymentBody>) -> ApiResult {
    let booking_id = body.booking_id.as_deref().map(parse_id).transpose()?;
    let user_id = if caller.0.is_staff {
        body.user_id
    } else {
        if let Some(bid) = booking_id
            && let Some(booking) = state.engine.booking(bid).await
        {
            caller.require_access(&booking.user_id)?;
        }
        Some(caller.0.user_id.clone())
    };
    let request = PaymentRequest {
        user_id,
        booking_id,
        amount: body.amount,
        authorization_code: body.authorization_code,
        name: body.name,
        phone: body.phone,
        room_label: body.room_label,
        bed_label: body.bed_label,
    };
    let payment = state.engine.record_payment(request).await?;
    Ok(created(caller.payment_view(payment)))
}

async fn list_payments(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<SearchQuery>,
) -> ApiResult {
    caller.require_staff()?;
    let groups = state
        .engine
        .search_payment_groups(query.q.as_deref().unwrap_or(""))?;
    Ok(ok(groups))
}

async fn user_payments(State(state): State<AppState>, caller: Caller, Path(user_id): Path<String>) -> ApiResult {
    caller.require_access(&user_id)?;
    let payments: Vec<Payment> = state
        .engine
        .payments_for_user(&user_id)
        .into_iter()
        .map(|p| caller.payment_view(p))
        .collect();
    Ok(ok(payments))
}

async fn receipt(State(state): State<AppState>, caller: Caller, Path(id): Path<String>) -> ApiResult {
    let id = parse_id(&id)?;
    let payment = state.engine.payment(id).ok_or(EngineError::NotFound(id))?;
    caller.require_access(&payment.user_id)?;
    let body = state.receipts.render(&payment);
    Ok(([(header::CONTENT_TYPE, state.receipts.content_type())], body).into_response())
}

async fn delete_payment(State(state): State<AppState>, caller: Caller, Path(id): Path<String>) -> ApiResult {
    caller.require_staff()?;
    let id = parse_id(&id)?;
    state.engine.delete_payment(id).await?;
    Ok(ok(json!({ "id": id })))
}

async fn overview(State(state): State<AppState>, caller: Caller) -> ApiResult {
    caller.require_staff()?;
    Ok(ok(state.engine.overview()))
}

async fn upload(State(state): State<AppState>, _caller: Caller, body: Bytes) -> ApiResult {
    let reference = state.blobs.put(&body).await.map_err(ApiError::Upload)?;
    Ok(created(json!({ "reference": reference })))
}
