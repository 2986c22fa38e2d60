use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use super::{db_error, not_found, parse_date};
use crate::{
    auth::{self, SessionUser},
    booking::{Customer, Submission, SubmissionError, GUEST_USER_ID},
    models::*,
    notify::{CancellationNotice, DEFAULT_CUSTOMER_NAME},
    repository::{BookingRepository, ServiceCatalog, TimeOffRepository, UserDirectory},
    time::extract_duration_minutes,
    AppState,
};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ── Catalog ──

/// GET /api/services?category=
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ServicesQuery>,
) -> ApiResult<Vec<Service>> {
    let category = query.category.as_deref().filter(|c| !c.is_empty());
    let services = state
        .store
        .list_services(category)
        .await
        .map_err(|e| db_error("list_services", e))?;
    Ok(Json(ApiResponse::success(services)))
}

/// GET /api/services/{id}
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<ServiceWithVariants> {
    let service = state
        .store
        .get_service(id)
        .await
        .map_err(|e| db_error("get_service", e))?
        .ok_or_else(|| not_found("Service"))?;
    let variants = state
        .store
        .list_variants(id)
        .await
        .map_err(|e| db_error("list_variants", e))?;
    Ok(Json(ApiResponse::success(ServiceWithVariants { service, variants })))
}

// ── Availability ──

/// GET /api/bookings/availability?date=
///
/// Active bookings without personal data.
pub async fn availability_feed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Vec<AvailabilityBooking>> {
    let date = query.date.as_deref().map(parse_date).transpose()?;
    let bookings = state
        .store
        .list_active_for_availability(date)
        .await
        .map_err(|e| db_error("availability_feed", e))?;
    Ok(Json(ApiResponse::success(
        bookings.iter().map(AvailabilityBooking::from).collect(),
    )))
}

/// GET /api/appointments/slots?service_id=&variant_id=&date=
pub async fn appointment_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> ApiResult<SlotsResponse> {
    let date = parse_date(&query.date)?;

    let service = state
        .store
        .get_service(query.service_id)
        .await
        .map_err(|e| db_error("appointment_slots", e))?
        .ok_or_else(|| not_found("Service"))?;
    let duration_label = match query.variant_id {
        Some(variant_id) => {
            state
                .store
                .get_variant(variant_id)
                .await
                .map_err(|e| db_error("appointment_slots", e))?
                .filter(|v| v.service_id == service.id)
                .ok_or_else(|| not_found("Service option"))?
                .duration
        }
        None => service.duration,
    };
    let duration = extract_duration_minutes(&duration_label);

    let bookings = state
        .store
        .list_active_for_availability(Some(date))
        .await
        .map_err(|e| db_error("appointment_slots", e))?;
    let time_off = state
        .store
        .list_covering(date)
        .await
        .map_err(|e| db_error("appointment_slots", e))?;

    Ok(Json(ApiResponse::success(SlotsResponse {
        date,
        duration_minutes: duration,
        business_hours: state.hours.hours_for(date),
        slots: state.resolver.resolve(date, duration, &bookings, &time_off),
    })))
}

/// GET /api/business-hours?date=&slot_minutes=
pub async fn business_hours(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> ApiResult<CandidateSlotsResponse> {
    let date = parse_date(&query.date)?;
    let slot_minutes = query.slot_minutes.unwrap_or(60);
    Ok(Json(ApiResponse::success(CandidateSlotsResponse {
        date,
        hours: state.hours.hours_for(date),
        slots: state.hours.candidate_slots(date, slot_minutes),
    })))
}

/// GET /api/time-off?date=
pub async fn list_time_off(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Vec<TimeOffView>> {
    let date = parse_date(&query.date)?;
    let time_off = state
        .store
        .list_covering(date)
        .await
        .map_err(|e| db_error("list_time_off", e))?;
    Ok(Json(ApiResponse::success(
        time_off.iter().map(TimeOffView::from).collect(),
    )))
}

// ── Booking submission ──

fn submission_error(e: SubmissionError) -> ApiError {
    use SubmissionError::*;
    let status = match &e {
        MissingDate | MissingTime | InvalidDate(_) | InvalidTime(_) | VariantRequired
        | OutsideBusinessHours(_) => StatusCode::BAD_REQUEST,
        ServiceNotFound | VariantNotFound => StatusCode::NOT_FOUND,
        SlotUnavailable(_) => StatusCode::CONFLICT,
        AvailabilityUnknown(source) => {
            tracing::error!("Time-off lookup failed during booking: {}", source);
            StatusCode::SERVICE_UNAVAILABLE
        }
        Store(source) => {
            tracing::error!("Booking store error: {}", source);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Checkout(_) => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string())
}

/// POST /api/bookings
///
/// Guests may book; a session, if sent, must verify.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> ApiResult<CreateBookingResponse> {
    let customer = match auth::user_from_headers(&headers, &state.session_secret) {
        None => Customer::guest(),
        Some(user) => {
            let user = user?;
            remember_user(&state, &user).await;
            Customer {
                user_id: user.id,
                email: user.email,
            }
        }
    };

    let submission = Submission {
        bookings: &state.store,
        time_off: &state.store,
        catalog: &state.store,
        checkout: state.checkout.as_ref(),
        hours: &state.hours,
    };
    let resp = submission
        .submit(&customer, &body)
        .await
        .map_err(submission_error)?;
    Ok(Json(ApiResponse::success(resp)))
}

async fn remember_user(state: &AppState, user: &SessionUser) {
    if let Err(e) = state
        .store
        .upsert_user(
            &user.id,
            user.name.as_deref(),
            user.email.as_deref(),
            user.role.as_str(),
        )
        .await
    {
        tracing::warn!("Could not store contact for {}: {}", user.id, e);
    }
}

// ── Customer bookings ──

/// GET /api/bookings/my
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<Booking>> {
    let user = auth::require_user(&headers, &state.session_secret)?;
    let bookings = state
        .store
        .list_for_user(&user.id)
        .await
        .map_err(|e| db_error("my_bookings", e))?;
    Ok(Json(ApiResponse::success(bookings)))
}

/// GET /api/bookings/my/counts
pub async fn my_booking_counts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<BookingCounts> {
    let user = auth::require_user(&headers, &state.session_secret)?;
    let counts = state
        .store
        .counts_for_user(&user.id)
        .await
        .map_err(|e| db_error("my_booking_counts", e))?;
    Ok(Json(ApiResponse::success(counts)))
}

/// Load a booking the caller owns (or any booking, for admins).
async fn owned_booking(state: &AppState, user: &SessionUser, id: i64) -> Result<Booking, ApiError> {
    let booking = state
        .store
        .find_by_id(id)
        .await
        .map_err(|e| db_error("find_booking", e))?
        .ok_or_else(|| not_found("Booking"))?;
    if booking.user_id != user.id && !user.is_admin() {
        return Err(api_error(StatusCode::FORBIDDEN, "Not your booking"));
    }
    Ok(booking)
}

/// GET /api/bookings/{id}
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<BookingWithCustomer> {
    let user = auth::require_user(&headers, &state.session_secret)?;
    let found = state
        .store
        .find_with_customer(id)
        .await
        .map_err(|e| db_error("get_booking", e))?
        .ok_or_else(|| not_found("Booking"))?;
    if found.booking.user_id != user.id && !user.is_admin() {
        return Err(api_error(StatusCode::FORBIDDEN, "Not your booking"));
    }
    Ok(Json(ApiResponse::success(found)))
}

/// POST /api/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Booking> {
    let user = auth::require_user(&headers, &state.session_secret)?;
    let booking = owned_booking(&state, &user, id).await?;

    let cancelled = state
        .store
        .cancel(id)
        .await
        .map_err(|e| db_error("cancel_booking", e))?;
    if !cancelled {
        return Err(api_error(
            StatusCode::CONFLICT,
            "Only pending or confirmed bookings can be cancelled",
        ));
    }
    tracing::info!("Booking {} cancelled by {}", id, user.id);

    send_cancellation_notice(&state, &booking).await;

    let updated = state
        .store
        .find_by_id(id)
        .await
        .map_err(|e| db_error("cancel_booking", e))?
        .ok_or_else(|| not_found("Booking"))?;
    Ok(Json(ApiResponse::success(updated)))
}

/// Best effort; the cancellation stands either way.
async fn send_cancellation_notice(state: &AppState, booking: &Booking) {
    if booking.user_id == GUEST_USER_ID {
        return;
    }
    let contact = match state.store.find_contact(&booking.user_id).await {
        Ok(Some(contact)) => contact,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Cancellation notice for booking {}: {}", booking.id, e);
            return;
        }
    };
    let Some(to) = contact.email.filter(|e| !e.is_empty()) else {
        return;
    };

    let notice = CancellationNotice {
        to,
        customer_name: contact
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string()),
        service_name: booking.service_name.clone(),
        date: booking.appointment_date,
        time: booking.appointment_time.clone(),
    };
    if let Err(e) = state.notifier.send_cancellation_notice(&notice).await {
        tracing::warn!("Failed to send cancellation notice for booking {}: {:#}", booking.id, e);
    }
}

// ── Account ──

/// DELETE /api/account
///
/// Erases the caller's profile and bookings. The confirmation code can be
/// quoted back to staff; the status URL points at the storefront page that
/// shows it.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<DataDeletionStatus> {
    let user = auth::require_user(&headers, &state.session_secret)?;
    if user.id == GUEST_USER_ID {
        return Err(api_error(StatusCode::BAD_REQUEST, "Guest bookings have no account"));
    }

    let deleted = state
        .store
        .delete_user_data(&user.id)
        .await
        .map_err(|e| db_error("delete_account", e))?;
    tracing::info!(
        "Deleted data for {}: {} bookings, profile={}",
        user.id,
        deleted.bookings,
        deleted.profile
    );

    let confirmation_code = format!("{}_{}", user.id, chrono::Utc::now().timestamp_millis());
    let mut status_url = state
        .site_url
        .join("data-deletion-status")
        .map_err(|e| {
            tracing::error!("Bad deletion status URL: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Could not build status URL")
        })?;
    status_url
        .query_pairs_mut()
        .append_pair("code", &confirmation_code);

    Ok(Json(ApiResponse::success(DataDeletionStatus {
        confirmation_code,
        status_url: status_url.into(),
        bookings_deleted: deleted.bookings,
        profile_deleted: deleted.profile,
    })))
}
