//! Payment confirmation for completed checkout sessions.
//!
//! Webhook deliveries may repeat or race. The flow is safe under both:
//! replays hit the session-id guard, and concurrent deliveries contend on a
//! compare-and-set that only moves a booking out of `pending` once.

use serde::Serialize;
use thiserror::Error;

use crate::booking::GUEST_USER_ID;
use crate::models::{Booking, BookingStatus, PaymentRecord, PaymentStatus};
use crate::notify::{Notifier, PaymentReceipt, DEFAULT_CUSTOMER_NAME};
use crate::repository::{BookingRepository, StoreError, UserDirectory};
use crate::stripe::CheckoutSessionObject;

/// A completed checkout, reduced to what confirmation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCheckout {
    pub session_id: String,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub booking_id: i64,
    pub user_id: String,
    pub service_id: i64,
}

impl TryFrom<CheckoutSessionObject> for CompletedCheckout {
    type Error = ConfirmError;

    fn try_from(session: CheckoutSessionObject) -> Result<Self, Self::Error> {
        let field = |key: &'static str| {
            session
                .metadata
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or(ConfirmError::MissingMetadata(key))
        };
        let id = |key: &'static str| {
            field(key)?
                .parse::<i64>()
                .map_err(|_| ConfirmError::MissingMetadata(key))
        };

        let booking_id = id("bookingId")?;
        let user_id = field("userId")?.to_string();
        let service_id = id("serviceId")?;

        Ok(Self {
            session_id: session.id,
            payment_intent: session.payment_intent,
            amount_total: session.amount_total,
            booking_id,
            user_id,
            service_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// This delivery moved the booking to confirmed/paid.
    Confirmed,
    /// An earlier or concurrent delivery already did.
    AlreadyProcessed,
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("missing or invalid checkout metadata: {0}")]
    MissingMetadata(&'static str),
    #[error("booking {0} not found")]
    BookingNotFound(i64),
    #[error("booking {id} cannot be confirmed from status {status:?}/{payment:?}")]
    InvalidState {
        id: i64,
        status: BookingStatus,
        payment: PaymentStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Collaborators the confirmation flow needs.
pub struct Confirmation<'a> {
    pub bookings: &'a dyn BookingRepository,
    pub users: &'a dyn UserDirectory,
    pub notifier: &'a dyn Notifier,
}

impl Confirmation<'_> {
    pub async fn confirm(&self, checkout: &CompletedCheckout) -> Result<ConfirmOutcome, ConfirmError> {
        if let Some(existing) = self
            .bookings
            .find_paid_by_session(&checkout.session_id)
            .await?
        {
            tracing::info!(
                "Checkout session {} already applied to booking {}",
                checkout.session_id,
                existing.id
            );
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }

        let booking = self
            .bookings
            .find_by_id(checkout.booking_id)
            .await?
            .ok_or(ConfirmError::BookingNotFound(checkout.booking_id))?;

        let record = PaymentRecord {
            checkout_session_id: checkout.session_id.clone(),
            payment_intent: checkout.payment_intent.clone(),
            amount_paid: checkout
                .amount_total
                .map(|cents| cents as f64 / 100.0)
                .unwrap_or(booking.price),
        };

        if !self.bookings.confirm_if_pending(booking.id, &record).await? {
            return self.resolve_lost_race(booking.id).await;
        }

        tracing::info!(
            "Booking {} confirmed, paid {:.2} via session {}",
            booking.id,
            record.amount_paid,
            record.checkout_session_id
        );
        self.send_receipt(&booking, record.amount_paid).await;
        Ok(ConfirmOutcome::Confirmed)
    }

    /// The CAS found the booking no longer pending: either a concurrent
    /// delivery confirmed it, or it is in a state payment cannot fix.
    async fn resolve_lost_race(&self, id: i64) -> Result<ConfirmOutcome, ConfirmError> {
        let current = self
            .bookings
            .find_by_id(id)
            .await?
            .ok_or(ConfirmError::BookingNotFound(id))?;

        if current.status == BookingStatus::Confirmed && current.payment_status == PaymentStatus::Paid {
            tracing::info!("Booking {} was confirmed by a concurrent delivery", id);
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }

        Err(ConfirmError::InvalidState {
            id,
            status: current.status,
            payment: current.payment_status,
        })
    }

    /// Best effort: a failed receipt never fails the confirmation.
    async fn send_receipt(&self, booking: &Booking, amount_paid: f64) {
        if booking.user_id == GUEST_USER_ID {
            return;
        }

        let contact = match self.users.find_contact(&booking.user_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Receipt for booking {}: contact lookup failed: {}", booking.id, e);
                return;
            }
        };
        let Some(to) = contact.email.filter(|e| !e.is_empty()) else {
            return;
        };

        let receipt = PaymentReceipt {
            to,
            customer_name: contact
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string()),
            booking_id: booking.id,
            service_name: booking.service_name.clone(),
            date: booking.appointment_date,
            time: booking.appointment_time.clone(),
            amount_paid,
        };
        if let Err(e) = self.notifier.send_payment_receipt(&receipt).await {
            tracing::error!("Failed to send receipt for booking {}: {:#}", booking.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::repository::fixtures::{self, new_booking};
    use crate::repository::SqliteStore;
    use std::collections::HashMap;

    const DAY: &str = "2026-03-02";

    fn completed(session: &str, booking_id: i64, amount_total: Option<i64>) -> CompletedCheckout {
        CompletedCheckout {
            session_id: session.into(),
            payment_intent: Some("pi_1".into()),
            amount_total,
            booking_id,
            user_id: "user-1".into(),
            service_id: 2,
        }
    }

    fn flow<'a>(store: &'a SqliteStore, notifier: &'a RecordingNotifier) -> Confirmation<'a> {
        Confirmation {
            bookings: store,
            users: store,
            notifier,
        }
    }

    async fn pending(store: &SqliteStore, user: &str) -> i64 {
        store
            .create_pending(&new_booking(user, DAY, "9:00 AM"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_confirms_pending_booking() {
        let store = fixtures::store().await;
        store
            .upsert_user("user-1", None, Some("ana@example.com"), "customer")
            .await
            .unwrap();
        let id = pending(&store, "user-1").await;
        let notifier = RecordingNotifier::default();

        let outcome = flow(&store, &notifier)
            .confirm(&completed("cs_1", id, Some(6500)))
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Confirmed);

        let booking = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, PaymentStatus::Paid);
        assert_eq!(booking.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(booking.amount_paid, 65.0);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ana@example.com");
        assert!(sent[0].text.starts_with("Hi Valued Customer,"));
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let store = fixtures::store().await;
        store
            .upsert_user("user-1", Some("Ana"), Some("ana@example.com"), "customer")
            .await
            .unwrap();
        let id = pending(&store, "user-1").await;
        let notifier = RecordingNotifier::default();
        let flow = flow(&store, &notifier);
        let event = completed("cs_1", id, Some(6500));

        assert_eq!(flow.confirm(&event).await.unwrap(), ConfirmOutcome::Confirmed);
        let first = store.find_by_id(id).await.unwrap().unwrap();

        assert_eq!(
            flow.confirm(&event).await.unwrap(),
            ConfirmOutcome::AlreadyProcessed
        );
        let second = store.find_by_id(id).await.unwrap().unwrap();

        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(second.checkout_session_id.as_deref(), Some("cs_1"));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_booking_fails_without_creating() {
        let store = fixtures::store().await;
        let notifier = RecordingNotifier::default();

        let err = flow(&store, &notifier)
            .confirm(&completed("cs_1", 42, Some(6500)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::BookingNotFound(42)));
        assert!(store.find_by_id(42).await.unwrap().is_none());
        assert!(store.list_active_for_availability(None).await.unwrap().is_empty());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_winner_counts_as_processed() {
        let store = fixtures::store().await;
        let id = pending(&store, "user-1").await;
        // Another delivery (different session id) got there first.
        store
            .confirm_if_pending(id, &fixtures::payment("cs_other"))
            .await
            .unwrap();
        let notifier = RecordingNotifier::default();

        let outcome = flow(&store, &notifier)
            .confirm(&completed("cs_1", id, Some(6500)))
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::AlreadyProcessed);

        let booking = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(booking.checkout_session_id.as_deref(), Some("cs_other"));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_booking_is_integrity_error() {
        let store = fixtures::store().await;
        let id = pending(&store, "user-1").await;
        store.cancel(id).await.unwrap();
        let notifier = RecordingNotifier::default();

        let err = flow(&store, &notifier)
            .confirm(&completed("cs_1", id, Some(6500)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConfirmError::InvalidState {
                status: BookingStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_amount_falls_back_to_price_snapshot() {
        let store = fixtures::store().await;
        let id = pending(&store, "user-1").await;
        let notifier = RecordingNotifier::default();

        flow(&store, &notifier)
            .confirm(&completed("cs_1", id, None))
            .await
            .unwrap();
        let booking = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(booking.amount_paid, 65.0);
    }

    #[tokio::test]
    async fn test_receipt_failure_is_swallowed() {
        let store = fixtures::store().await;
        store
            .upsert_user("user-1", Some("Ana"), Some("ana@example.com"), "customer")
            .await
            .unwrap();
        let id = pending(&store, "user-1").await;
        let notifier = RecordingNotifier::failing();

        let outcome = flow(&store, &notifier)
            .confirm(&completed("cs_1", id, Some(6500)))
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Confirmed);
        assert_eq!(notifier.sent().len(), 1);
        assert!(notifier.sent()[0].text.starts_with("Hi Ana,"));
    }

    #[tokio::test]
    async fn test_no_receipt_for_guests_or_unknown_users() {
        let store = fixtures::store().await;
        let guest = pending(&store, GUEST_USER_ID).await;
        let unknown = pending(&store, "user-9").await;
        let notifier = RecordingNotifier::default();
        let flow = flow(&store, &notifier);

        flow.confirm(&completed("cs_1", guest, None)).await.unwrap();
        flow.confirm(&completed("cs_2", unknown, None)).await.unwrap();
        assert!(notifier.sent().is_empty());
    }

    fn session(metadata: &[(&str, &str)]) -> CheckoutSessionObject {
        CheckoutSessionObject {
            id: "cs_1".into(),
            payment_intent: None,
            amount_total: Some(100),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_metadata_extraction() {
        let checkout = CompletedCheckout::try_from(session(&[
            ("bookingId", "12"),
            ("userId", "user-1"),
            ("serviceId", "2"),
            ("date", "2026-03-02"),
        ]))
        .unwrap();
        assert_eq!(checkout.booking_id, 12);
        assert_eq!(checkout.user_id, "user-1");
        assert_eq!(checkout.service_id, 2);
    }

    #[test]
    fn test_missing_metadata_named() {
        let err = CompletedCheckout::try_from(session(&[("bookingId", "12"), ("serviceId", "2")]))
            .unwrap_err();
        assert!(matches!(err, ConfirmError::MissingMetadata("userId")));

        let err = CompletedCheckout::try_from(session(&[
            ("bookingId", "abc"),
            ("userId", "u"),
            ("serviceId", "2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfirmError::MissingMetadata("bookingId")));
    }
}
