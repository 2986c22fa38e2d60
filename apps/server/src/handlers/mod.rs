pub mod admin;
pub mod client;
pub mod health;
pub mod payment;

use axum::http::StatusCode;
use chrono::NaiveDate;

use crate::models::{api_error, ApiError};
use crate::repository::StoreError;
use crate::time::{minutes_to_display_time, parse_display_time};

/// `YYYY-MM-DD` from a query or body field.
pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid date \"{raw}\", expected YYYY-MM-DD"),
        )
    })
}

/// A 12-hour label, normalised ("9:00 am" becomes "9:00 AM").
pub(crate) fn canonical_time(raw: &str) -> Result<String, ApiError> {
    parse_display_time(raw)
        .map(minutes_to_display_time)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

pub(crate) fn db_error(context: &str, e: StoreError) -> ApiError {
    tracing::error!("{}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

pub(crate) fn not_found(what: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("{what} not found"))
}
