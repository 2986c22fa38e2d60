use axum::{http::StatusCode, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::time::{
    extract_duration_minutes, parse_clock_time, parse_display_time, TimeParseError,
    DEFAULT_DURATION_MINUTES,
};

// ── Status enums ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Pending and confirmed bookings occupy their slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
    Failed,
}

// ── Catalog ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub description: String,
    pub price: f64,
    /// Free-text duration label, e.g. "60 min".
    pub duration: String,
    pub has_variants: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceVariant {
    pub id: i64,
    pub service_id: i64,
    pub variant_name: String,
    pub price: f64,
    pub duration: String,
    pub requirements: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Serialize)]
pub struct ServiceWithVariants {
    #[serde(flatten)]
    pub service: Service,
    pub variants: Vec<ServiceVariant>,
}

// ── Time off ──

/// A time-off row as stored. Converted to [`TimeOff`] before use.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimeOffRow {
    pub id: i64,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_all_day: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blackout {
    AllDay,
    /// Minutes since midnight, `[start, end)`.
    Window { start: u32, end: u32 },
}

/// Administrator-declared blackout covering `start_date..=end_date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeOff {
    pub id: i64,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub blackout: Blackout,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("time off {0} is not all-day but lacks a start or end time")]
    MissingWindow(i64),
    #[error("record {id}: {source}")]
    BadTime {
        id: i64,
        #[source]
        source: TimeParseError,
    },
    #[error("booking {0} is not active")]
    Inactive(i64),
}

impl TimeOff {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

impl TryFrom<TimeOffRow> for TimeOff {
    type Error = RecordError;

    fn try_from(row: TimeOffRow) -> Result<Self, Self::Error> {
        let blackout = if row.is_all_day {
            Blackout::AllDay
        } else {
            let (Some(start), Some(end)) = (&row.start_time, &row.end_time) else {
                return Err(RecordError::MissingWindow(row.id));
            };
            let bad_time = |source| RecordError::BadTime { id: row.id, source };
            Blackout::Window {
                start: parse_clock_time(start).map_err(bad_time)?,
                end: parse_clock_time(end).map_err(bad_time)?,
            }
        };
        Ok(Self {
            id: row.id,
            title: row.title,
            start_date: row.start_date,
            end_date: row.end_date,
            blackout,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TimeOffView {
    pub id: i64,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_all_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl From<&TimeOff> for TimeOffView {
    fn from(t: &TimeOff) -> Self {
        let (is_all_day, start_time, end_time) = match t.blackout {
            Blackout::AllDay => (true, None, None),
            Blackout::Window { start, end } => (
                false,
                Some(crate::time::minutes_to_display_time(start)),
                Some(crate::time::minutes_to_display_time(end)),
            ),
        };
        Self {
            id: t.id,
            title: t.title.clone(),
            start_date: t.start_date,
            end_date: t.end_date,
            is_all_day,
            start_time,
            end_time,
        }
    }
}

// ── Bookings ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub user_id: String,
    pub service_id: i64,
    pub variant_id: Option<i64>,
    pub service_name: String,
    pub price: f64,
    pub duration: Option<String>,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub payment_intent: Option<String>,
    pub amount_paid: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BookingWithCustomer {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub booking: Booking,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
}

/// Fields of a booking about to be created as pending/unpaid.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: String,
    pub service_id: i64,
    pub variant_id: Option<i64>,
    pub service_name: String,
    pub price: f64,
    pub duration: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
}

/// What the provider reported for a successful checkout.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub checkout_session_id: String,
    pub payment_intent: Option<String>,
    pub amount_paid: f64,
}

/// Availability row: no personal data.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveBookingRow {
    pub id: i64,
    pub service_id: i64,
    pub service_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub status: BookingStatus,
    /// Booking snapshot, falling back to the service's current duration.
    pub duration: Option<String>,
}

/// A booking that occupies `[start, start + duration)` on `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBooking {
    pub id: i64,
    pub service_id: i64,
    pub service_name: String,
    pub date: NaiveDate,
    pub status: BookingStatus,
    pub start: u32,
    pub duration: u32,
}

impl TryFrom<ActiveBookingRow> for ActiveBooking {
    type Error = RecordError;

    fn try_from(row: ActiveBookingRow) -> Result<Self, Self::Error> {
        if !row.status.is_active() {
            return Err(RecordError::Inactive(row.id));
        }
        let start = parse_display_time(&row.appointment_time)
            .map_err(|source| RecordError::BadTime { id: row.id, source })?;
        let duration = row
            .duration
            .as_deref()
            .map(extract_duration_minutes)
            .unwrap_or(DEFAULT_DURATION_MINUTES);
        Ok(Self {
            id: row.id,
            service_id: row.service_id,
            service_name: row.service_name,
            date: row.appointment_date,
            status: row.status,
            start,
            duration,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AvailabilityBooking {
    pub id: i64,
    pub service_id: i64,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub status: BookingStatus,
}

impl From<&ActiveBooking> for AvailabilityBooking {
    fn from(b: &ActiveBooking) -> Self {
        Self {
            id: b.id,
            service_id: b.service_id,
            appointment_date: b.date,
            appointment_time: crate::time::minutes_to_display_time(b.start),
            status: b.status,
        }
    }
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct BookingCounts {
    pub pending: i64,
    pub confirmed: i64,
    pub completed: i64,
    pub cancelled: i64,
}

/// What a customer data deletion removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletedUserData {
    pub bookings: u64,
    pub profile: bool,
}

/// Name and e-mail of a registered customer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Contact {
    pub name: Option<String>,
    pub email: Option<String>,
}

// ── API request/response types ──

#[derive(Debug, Default, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: i64,
    pub variant_id: Option<i64>,
    pub date: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub booking_id: i64,
    pub service_name: String,
    pub price: f64,
    pub duration: String,
    pub date: NaiveDate,
    pub time: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ServicesQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: String,
    pub slot_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub service_id: i64,
    pub variant_id: Option<i64>,
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct CandidateSlotsResponse {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub hours: crate::hours::DaySchedule,
    pub slots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub date: NaiveDate,
    pub duration_minutes: u32,
    pub business_hours: crate::hours::DaySchedule,
    pub slots: Vec<crate::availability::TimeSlot>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub title: String,
    pub category: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration: String,
    #[serde(default)]
    pub has_variants: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub title: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub duration: Option<String>,
    pub has_variants: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVariantRequest {
    pub variant_name: String,
    pub price: f64,
    pub duration: String,
    pub requirements: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub subject: String,
    pub message: String,
    pub customer_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DataDeletionStatus {
    pub confirmation_code: String,
    pub status_url: String,
    pub bookings_deleted: u64,
    pub profile_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Error half of every JSON handler's result.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

pub fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(msg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn time_off_row(all_day: bool, start: Option<&str>, end: Option<&str>) -> TimeOffRow {
        TimeOffRow {
            id: 7,
            title: "Training".into(),
            start_date: date("2026-03-02"),
            end_date: date("2026-03-04"),
            is_all_day: all_day,
            start_time: start.map(String::from),
            end_time: end.map(String::from),
        }
    }

    fn booking_row(status: BookingStatus, time: &str, duration: Option<&str>) -> ActiveBookingRow {
        ActiveBookingRow {
            id: 1,
            service_id: 2,
            service_name: "Classic Fill".into(),
            appointment_date: date("2026-03-02"),
            appointment_time: time.into(),
            status,
            duration: duration.map(String::from),
        }
    }

    #[test]
    fn test_active_statuses() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(!BookingStatus::Completed.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
    }

    #[test]
    fn test_time_off_all_day() {
        let t = TimeOff::try_from(time_off_row(true, None, None)).unwrap();
        assert_eq!(t.blackout, Blackout::AllDay);
    }

    #[test]
    fn test_time_off_window() {
        let t = TimeOff::try_from(time_off_row(false, Some("13:00"), Some("14:00:00"))).unwrap();
        assert_eq!(t.blackout, Blackout::Window { start: 780, end: 840 });
    }

    #[test]
    fn test_time_off_partial_requires_both_times() {
        assert_eq!(
            TimeOff::try_from(time_off_row(false, Some("13:00"), None)),
            Err(RecordError::MissingWindow(7))
        );
    }

    #[test]
    fn test_time_off_rejects_bad_clock() {
        assert!(matches!(
            TimeOff::try_from(time_off_row(false, Some("1pm"), Some("14:00"))),
            Err(RecordError::BadTime { id: 7, .. })
        ));
    }

    #[test]
    fn test_time_off_covers_inclusive_range() {
        let t = TimeOff::try_from(time_off_row(true, None, None)).unwrap();
        assert!(!t.covers(date("2026-03-01")));
        assert!(t.covers(date("2026-03-02")));
        assert!(t.covers(date("2026-03-04")));
        assert!(!t.covers(date("2026-03-05")));
    }

    #[test]
    fn test_active_booking_duration_from_snapshot() {
        let b = ActiveBooking::try_from(booking_row(
            BookingStatus::Confirmed,
            "9:00 AM",
            Some("90 min"),
        ))
        .unwrap();
        assert_eq!((b.start, b.duration), (540, 90));
    }

    #[test]
    fn test_active_booking_default_duration() {
        let b = ActiveBooking::try_from(booking_row(BookingStatus::Pending, "1:00 PM", None)).unwrap();
        assert_eq!(b.duration, 60);
    }

    #[test]
    fn test_active_booking_rejects_cancelled() {
        assert_eq!(
            ActiveBooking::try_from(booking_row(BookingStatus::Cancelled, "9:00 AM", None)),
            Err(RecordError::Inactive(1))
        );
    }

    #[test]
    fn test_active_booking_rejects_bad_time() {
        assert!(ActiveBooking::try_from(booking_row(BookingStatus::Pending, "09:00", None)).is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&BookingStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );
        assert_eq!(serde_json::to_string(&PaymentStatus::Unpaid).unwrap(), "\"unpaid\"");
    }
}
