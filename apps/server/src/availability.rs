//! Slot availability for one date.
//!
//! The studio publishes a fixed list of start times. For a requested
//! duration each label is checked against time off first and existing
//! bookings second; the first conflict found becomes the slot's reason.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{ActiveBooking, Blackout, TimeOff};
use crate::time::{minutes_to_display_time, parse_display_time, ranges_overlap, TimeParseError};

/// Start times offered on the booking page, in minutes since midnight.
const PUBLISHED_SLOTS: [u32; 7] = [
    9 * 60,
    10 * 60,
    11 * 60,
    13 * 60,
    14 * 60,
    15 * 60,
    16 * 60,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub label: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Resolves the published slot list against bookings and time off.
#[derive(Debug, Clone)]
pub struct Resolver {
    slots: Vec<u32>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            slots: PUBLISHED_SLOTS.to_vec(),
        }
    }
}

impl Resolver {
    /// Resolver over a custom list of 12-hour labels.
    pub fn with_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self, TimeParseError> {
        let slots = labels
            .iter()
            .map(|l| parse_display_time(l.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { slots })
    }

    pub fn labels(&self) -> Vec<String> {
        self.slots.iter().map(|&m| minutes_to_display_time(m)).collect()
    }

    /// Availability of every published slot on `date` for an appointment of
    /// `duration` minutes. `bookings` must hold active bookings only.
    pub fn resolve(
        &self,
        date: NaiveDate,
        duration: u32,
        bookings: &[ActiveBooking],
        time_off: &[TimeOff],
    ) -> Vec<TimeSlot> {
        self.slots
            .iter()
            .map(|&start| {
                let reason = time_off_conflict(date, start, duration, time_off)
                    .or_else(|| booking_conflict(date, start, duration, bookings));
                TimeSlot {
                    label: minutes_to_display_time(start),
                    available: reason.is_none(),
                    reason,
                }
            })
            .collect()
    }
}

/// First time-off window on `date` that blocks `[start, start + duration)`.
pub fn time_off_conflict(
    date: NaiveDate,
    start: u32,
    duration: u32,
    time_off: &[TimeOff],
) -> Option<String> {
    time_off
        .iter()
        .filter(|t| t.covers(date))
        .find_map(|t| match t.blackout {
            Blackout::AllDay => Some(format!("Unavailable due to {}", t.title)),
            Blackout::Window { start: off_start, end: off_end } => {
                let off_len = off_end.saturating_sub(off_start);
                ranges_overlap(start, duration, off_start, off_len).then(|| {
                    format!(
                        "Conflicts with {} ({} - {})",
                        t.title,
                        minutes_to_display_time(off_start),
                        minutes_to_display_time(off_end)
                    )
                })
            }
        })
}

/// First active booking on `date` overlapping `[start, start + duration)`.
pub fn booking_conflict(
    date: NaiveDate,
    start: u32,
    duration: u32,
    bookings: &[ActiveBooking],
) -> Option<String> {
    bookings
        .iter()
        .filter(|b| b.date == date)
        .find(|b| ranges_overlap(start, duration, b.start, b.duration))
        .map(|b| {
            format!(
                "Conflicts with {} from {} to {}",
                b.service_name,
                minutes_to_display_time(b.start),
                minutes_to_display_time(b.start.saturating_add(b.duration))
            )
        })
}
