use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::{canonical_time, db_error, not_found, parse_date};
use crate::{auth, models::*, notify::OutgoingEmail, AppState};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: i64,
}

// ── Bookings ──

/// GET /api/admin/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<BookingWithCustomer>> {
    auth::require_admin(&headers, &state.session_secret)?;
    let bookings = state
        .store
        .list_all_with_customers()
        .await
        .map_err(|e| db_error("admin_list_bookings", e))?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// PUT /api/admin/bookings/{id}/reschedule
///
/// Staff override: no availability check is made.
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<RescheduleRequest>,
) -> ApiResult<Booking> {
    let admin = auth::require_admin(&headers, &state.session_secret)?;
    let date = parse_date(&body.date)?;
    let time = canonical_time(&body.time)?;

    let booking = state
        .store
        .reschedule(id, date, &time)
        .await
        .map_err(|e| db_error("reschedule_booking", e))?
        .ok_or_else(|| not_found("Booking"))?;

    tracing::info!("Booking {} moved to {} {} by {}", id, date, time, admin.id);
    Ok(Json(ApiResponse::success(booking)))
}

// ── Catalog ──

fn validate_price(price: f64) -> Result<(), ApiError> {
    if !price.is_finite() || price < 0.0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "Price must be zero or more"));
    }
    Ok(())
}

/// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> ApiResult<Service> {
    auth::require_admin(&headers, &state.session_secret)?;
    if body.title.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Title is required"));
    }
    validate_price(body.price)?;

    let service = state
        .store
        .create_service(&body)
        .await
        .map_err(|e| db_error("create_service", e))?;
    tracing::info!("Service {} created: {}", service.id, service.title);
    Ok(Json(ApiResponse::success(service)))
}

/// PUT /api/admin/services/{id}
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> ApiResult<Service> {
    auth::require_admin(&headers, &state.session_secret)?;
    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Title cannot be empty"));
    }
    if let Some(price) = body.price {
        validate_price(price)?;
    }

    let service = state
        .store
        .update_service(id, &body)
        .await
        .map_err(|e| db_error("update_service", e))?
        .ok_or_else(|| not_found("Service"))?;
    Ok(Json(ApiResponse::success(service)))
}

/// DELETE /api/admin/services/{id}
///
/// Existing bookings keep their snapshot of the service.
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    auth::require_admin(&headers, &state.session_secret)?;
    let deleted = state
        .store
        .delete_service(id)
        .await
        .map_err(|e| db_error("delete_service", e))?;
    if !deleted {
        return Err(not_found("Service"));
    }
    tracing::info!("Service {} deleted", id);
    Ok(Json(ApiResponse::success(Deleted { id })))
}

/// POST /api/admin/services/{id}/variants
pub async fn create_variant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(service_id): Path<i64>,
    Json(body): Json<CreateVariantRequest>,
) -> ApiResult<ServiceVariant> {
    auth::require_admin(&headers, &state.session_secret)?;
    if body.variant_name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Option name is required"));
    }
    validate_price(body.price)?;

    let variant = state
        .store
        .create_variant(service_id, &body)
        .await
        .map_err(|e| db_error("create_variant", e))?
        .ok_or_else(|| not_found("Service"))?;
    Ok(Json(ApiResponse::success(variant)))
}

/// DELETE /api/admin/variants/{id}
pub async fn delete_variant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    auth::require_admin(&headers, &state.session_secret)?;
    let deleted = state
        .store
        .delete_variant(id)
        .await
        .map_err(|e| db_error("delete_variant", e))?;
    if !deleted {
        return Err(not_found("Service option"));
    }
    Ok(Json(ApiResponse::success(Deleted { id })))
}

// ── Customer e-mail ──

#[derive(Debug, Serialize)]
pub struct EmailSent {
    pub to: String,
}

/// POST /api/admin/email
pub async fn send_email(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendEmailRequest>,
) -> ApiResult<EmailSent> {
    let admin = auth::require_admin(&headers, &state.session_secret)?;

    let to = body.to.trim();
    if !to.contains('@') {
        return Err(api_error(StatusCode::BAD_REQUEST, "A valid recipient is required"));
    }
    if body.subject.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Subject is required"));
    }

    let text = match body.customer_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("Hi {name},\n\n{}", body.message),
        _ => body.message.clone(),
    };
    let email = OutgoingEmail {
        to: to.to_string(),
        subject: body.subject.trim().to_string(),
        text,
    };

    if let Err(e) = state.notifier.send_message(&email).await {
        tracing::warn!("Admin e-mail to {} failed: {:#}", email.to, e);
        return Err(api_error(StatusCode::BAD_GATEWAY, "Failed to send e-mail"));
    }
    tracing::info!("Admin {} e-mailed {}", admin.id, email.to);
    Ok(Json(ApiResponse::success(EmailSent { to: email.to })))
}
