use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    models::{api_error, ApiError, ApiResponse},
    payment::{CompletedCheckout, ConfirmError, ConfirmOutcome, Confirmation},
    repository::BookingRepository,
    stripe::{self, CheckoutSessionObject, WebhookEvent},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ConfirmOutcome>,
    /// Booking freed by an expired checkout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_booking: Option<i64>,
}

impl WebhookAck {
    fn received() -> Self {
        Self {
            received: true,
            outcome: None,
            released_booking: None,
        }
    }
}

fn confirm_error(e: ConfirmError) -> ApiError {
    match e {
        ConfirmError::MissingMetadata(field) => {
            tracing::warn!("Checkout session without {} metadata", field);
            api_error(StatusCode::BAD_REQUEST, format!("Missing metadata: {field}"))
        }
        other => {
            tracing::error!("Payment confirmation failed: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Payment confirmation failed")
        }
    }
}

/// POST /api/webhooks/stripe
///
/// Needs the raw body: the signature covers the exact bytes Stripe sent.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookAck>>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing Stripe-Signature header"))?;

    if state.webhook_secret.is_empty() {
        tracing::error!("Stripe webhook received but STRIPE_WEBHOOK_SECRET is not set");
        return Err(api_error(StatusCode::BAD_REQUEST, "Webhook not configured"));
    }
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = stripe::verify_signature(&body, signature, &state.webhook_secret, now) {
        tracing::warn!("Rejected Stripe webhook: {}", e);
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid signature"));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid event: {e}")))?;
    tracing::info!("Stripe webhook: id={}, type={}", event.id, event.event_type);

    let is_checkout_event = [stripe::CHECKOUT_COMPLETED, stripe::CHECKOUT_EXPIRED]
        .contains(&event.event_type.as_str());
    if !is_checkout_event {
        return Ok(Json(ApiResponse::success(WebhookAck::received())));
    }

    let session: CheckoutSessionObject = serde_json::from_value(event.data.object)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid checkout session: {e}")))?;

    if event.event_type == stripe::CHECKOUT_EXPIRED {
        let released = state
            .store
            .release_expired_checkout(&session.id)
            .await
            .map_err(|e| {
                tracing::error!("Releasing expired checkout {} failed: {}", session.id, e);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "Could not release booking")
            })?;
        if let Some(id) = released {
            tracing::info!("Checkout {} expired, booking {} cancelled", session.id, id);
        }
        return Ok(Json(ApiResponse::success(WebhookAck {
            released_booking: released,
            ..WebhookAck::received()
        })));
    }

    let checkout = CompletedCheckout::try_from(session).map_err(confirm_error)?;

    let confirmation = Confirmation {
        bookings: &state.store,
        users: &state.store,
        notifier: state.notifier.as_ref(),
    };
    let outcome = confirmation.confirm(&checkout).await.map_err(confirm_error)?;

    Ok(Json(ApiResponse::success(WebhookAck {
        outcome: Some(outcome),
        ..WebhookAck::received()
    })))
}
