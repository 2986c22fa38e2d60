//! Booking submission: validate, snapshot, hold the slot, open checkout.

use chrono::NaiveDate;
use thiserror::Error;

use crate::availability::time_off_conflict;
use crate::hours::BusinessHours;
use crate::models::{CreateBookingRequest, CreateBookingResponse, NewBooking};
use crate::repository::{BookingRepository, ServiceCatalog, StoreError, TimeOffRepository};
use crate::stripe::{CheckoutProvider, CheckoutRequest};
use crate::time::{extract_duration_minutes, minutes_to_display_time, parse_display_time};

/// User id recorded for bookings made without a session.
pub const GUEST_USER_ID: &str = "guest";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Please select a date")]
    MissingDate,
    #[error("Please select a time")]
    MissingTime,
    #[error("Invalid date \"{0}\", expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("Invalid time \"{0}\", expected a time like 9:00 AM")]
    InvalidTime(String),
    #[error("Please select a service option")]
    VariantRequired,
    #[error("Service not found")]
    ServiceNotFound,
    #[error("Service option not found")]
    VariantNotFound,
    #[error("{0}")]
    OutsideBusinessHours(String),
    #[error("This time is no longer available: {0}")]
    SlotUnavailable(String),
    #[error("Could not verify availability, please try again")]
    AvailabilityUnknown(#[source] StoreError),
    #[error("Could not save booking")]
    Store(#[from] StoreError),
    #[error("Could not start checkout, please try again")]
    Checkout(#[source] anyhow::Error),
}

/// Who is booking.
#[derive(Debug, Clone)]
pub struct Customer {
    pub user_id: String,
    pub email: Option<String>,
}

impl Customer {
    pub fn guest() -> Self {
        Self {
            user_id: GUEST_USER_ID.to_string(),
            email: None,
        }
    }
}

/// Collaborators the submission flow needs.
pub struct Submission<'a> {
    pub bookings: &'a dyn BookingRepository,
    pub time_off: &'a dyn TimeOffRepository,
    pub catalog: &'a dyn ServiceCatalog,
    pub checkout: &'a dyn CheckoutProvider,
    pub hours: &'a BusinessHours,
}

/// Price, duration and display name frozen onto the booking.
#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    service_name: String,
    price: f64,
    duration: String,
}

impl Submission<'_> {
    pub async fn submit(
        &self,
        customer: &Customer,
        req: &CreateBookingRequest,
    ) -> Result<CreateBookingResponse, SubmissionError> {
        let raw_date = non_empty(req.date.as_deref()).ok_or(SubmissionError::MissingDate)?;
        let raw_time = non_empty(req.time.as_deref()).ok_or(SubmissionError::MissingTime)?;
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
            .map_err(|_| SubmissionError::InvalidDate(raw_date.to_string()))?;
        let start = parse_display_time(raw_time)
            .map_err(|_| SubmissionError::InvalidTime(raw_time.to_string()))?;
        // Stored in canonical form so availability parsing never trips on it.
        let time = minutes_to_display_time(start);

        let snapshot = self.snapshot(req.service_id, req.variant_id).await?;
        let duration = extract_duration_minutes(&snapshot.duration);

        let fit = self.hours.validate_fit(date, start, duration);
        if !fit.valid {
            return Err(SubmissionError::OutsideBusinessHours(
                fit.reason.unwrap_or_default(),
            ));
        }

        let time_off = self
            .time_off
            .list_covering(date)
            .await
            .map_err(SubmissionError::AvailabilityUnknown)?;
        if let Some(reason) = time_off_conflict(date, start, duration, &time_off) {
            return Err(SubmissionError::SlotUnavailable(reason));
        }

        let booking_id = self
            .bookings
            .create_pending(&NewBooking {
                user_id: customer.user_id.clone(),
                service_id: req.service_id,
                variant_id: req.variant_id,
                service_name: snapshot.service_name.clone(),
                price: snapshot.price,
                duration: snapshot.duration.clone(),
                appointment_date: date,
                appointment_time: time.clone(),
            })
            .await?;
        tracing::info!(
            "Booking {} created (pending) for {} on {} at {}",
            booking_id,
            customer.user_id,
            date,
            time
        );

        let checkout = CheckoutRequest {
            booking_id,
            user_id: customer.user_id.clone(),
            service_id: req.service_id,
            service_name: snapshot.service_name.clone(),
            price: snapshot.price,
            date,
            time: time.clone(),
            customer_email: customer.email.clone(),
        };
        let session = match self.checkout.create_session(&checkout).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Checkout failed for booking {}: {:#}", booking_id, e);
                // Release the slot; a failure here leaves a pending row behind.
                if let Err(cancel_err) = self.bookings.cancel(booking_id).await {
                    tracing::error!(
                        "Failed to release booking {} after checkout error: {}",
                        booking_id,
                        cancel_err
                    );
                }
                return Err(SubmissionError::Checkout(e));
            }
        };

        self.bookings
            .attach_checkout_session(booking_id, &session.id)
            .await?;

        Ok(CreateBookingResponse {
            booking_id,
            service_name: snapshot.service_name,
            price: snapshot.price,
            duration: snapshot.duration,
            date,
            time,
            redirect_url: session.url,
        })
    }

    async fn snapshot(
        &self,
        service_id: i64,
        variant_id: Option<i64>,
    ) -> Result<Snapshot, SubmissionError> {
        let service = self
            .catalog
            .get_service(service_id)
            .await?
            .ok_or(SubmissionError::ServiceNotFound)?;

        let Some(variant_id) = variant_id else {
            if service.has_variants {
                return Err(SubmissionError::VariantRequired);
            }
            return Ok(Snapshot {
                service_name: service.title,
                price: service.price,
                duration: service.duration,
            });
        };

        let variant = self
            .catalog
            .get_variant(variant_id)
            .await?
            .filter(|v| v.service_id == service.id)
            .ok_or(SubmissionError::VariantNotFound)?;

        Ok(Snapshot {
            service_name: format!("{} - {}", service.title, variant.variant_name),
            price: variant.price,
            duration: variant.duration,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
