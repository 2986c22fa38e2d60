use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::time::{minutes_to_display_time, parse_clock_time, TimeParseError};

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// One weekday as written in configuration (24-hour clock strings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayConfig {
    pub is_open: bool,
    pub open_time: String,
    pub close_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DayHours {
    is_open: bool,
    open: u32,
    close: u32,
}

/// Weekly opening schedule, indexed 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone)]
pub struct BusinessHours {
    days: [DayHours; 7],
}

/// Result of checking an appointment against the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoursCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Opening hours for one date, formatted for display.
#[derive(Debug, Clone, Serialize)]
pub struct DaySchedule {
    pub is_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_time: Option<String>,
}

impl Default for BusinessHours {
    /// The studio's regular week: closed Sunday, short Friday and Saturday.
    fn default() -> Self {
        let open = |open: u32, close: u32| DayHours {
            is_open: true,
            open: open * 60,
            close: close * 60,
        };
        let closed = DayHours {
            is_open: false,
            open: 0,
            close: 0,
        };
        Self {
            days: [
                closed,
                open(6, 20),
                open(6, 20),
                open(6, 20),
                open(6, 20),
                open(6, 15),
                open(6, 13),
            ],
        }
    }
}

impl BusinessHours {
    /// Build a schedule from seven configured days (Sunday first).
    pub fn from_config(days: &[DayConfig; 7]) -> Result<Self, TimeParseError> {
        let mut parsed = [DayHours {
            is_open: false,
            open: 0,
            close: 0,
        }; 7];
        for (slot, day) in parsed.iter_mut().zip(days) {
            if day.is_open {
                *slot = DayHours {
                    is_open: true,
                    open: parse_clock_time(&day.open_time)?,
                    close: parse_clock_time(&day.close_time)?,
                };
            }
        }
        Ok(Self { days: parsed })
    }

    fn day(&self, date: NaiveDate) -> (usize, DayHours) {
        let index = date.weekday().num_days_from_sunday() as usize;
        (index, self.days[index])
    }

    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        self.day(date).1.is_open
    }

    pub fn hours_for(&self, date: NaiveDate) -> DaySchedule {
        let (_, day) = self.day(date);
        if !day.is_open {
            return DaySchedule {
                is_open: false,
                open_time: None,
                close_time: None,
            };
        }
        DaySchedule {
            is_open: true,
            open_time: Some(minutes_to_display_time(day.open)),
            close_time: Some(minutes_to_display_time(day.close)),
        }
    }

    /// Slot labels from opening to closing in `slot_minutes` steps. A slot is
    /// emitted only when it also ends by closing time.
    pub fn candidate_slots(&self, date: NaiveDate, slot_minutes: u32) -> Vec<String> {
        let (_, day) = self.day(date);
        if !day.is_open || slot_minutes == 0 {
            return Vec::new();
        }

        let mut slots = Vec::new();
        let mut start = day.open;
        while start.saturating_add(slot_minutes) <= day.close {
            slots.push(minutes_to_display_time(start));
            start += slot_minutes;
        }
        slots
    }

    /// Check that `[start, start + duration)` lies within the day's hours.
    pub fn validate_fit(&self, date: NaiveDate, start: u32, duration: u32) -> HoursCheck {
        let (index, day) = self.day(date);
        let reject = |reason: String| HoursCheck {
            valid: false,
            reason: Some(reason),
        };

        if !day.is_open {
            return reject(format!("We are closed on {}s", DAY_NAMES[index]));
        }
        if start < day.open {
            return reject(format!(
                "Appointment starts before business hours (opens at {})",
                minutes_to_display_time(day.open)
            ));
        }
        if start.saturating_add(duration) > day.close {
            return reject(format!(
                "Appointment would end after business hours (closes at {})",
                minutes_to_display_time(day.close)
            ));
        }
        HoursCheck {
            valid: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    // 2026-03-01 is a Sunday.
    const SUNDAY: &str = "2026-03-01";
    const MONDAY: &str = "2026-03-02";
    const FRIDAY: &str = "2026-03-06";
    const SATURDAY: &str = "2026-03-07";

    #[test]
    fn test_default_open_days() {
        let hours = BusinessHours::default();
        assert!(!hours.is_open_on(date(SUNDAY)));
        assert!(hours.is_open_on(date(MONDAY)));
        assert!(hours.is_open_on(date(SATURDAY)));
    }

    #[test]
    fn test_candidate_slots_hourly_saturday() {
        let slots = BusinessHours::default().candidate_slots(date(SATURDAY), 60);
        assert_eq!(
            slots,
            vec!["6:00 AM", "7:00 AM", "8:00 AM", "9:00 AM", "10:00 AM", "11:00 AM", "12:00 PM"]
        );
    }

    #[test]
    fn test_candidate_slots_last_slot_must_end_by_close() {
        // Friday closes at 15:00; 90-minute steps from 06:00 end at 13:30.
        let slots = BusinessHours::default().candidate_slots(date(FRIDAY), 90);
        assert_eq!(slots.last().map(String::as_str), Some("1:30 PM"));
        assert_eq!(slots.len(), 6);
    }

    #[test]
    fn test_candidate_slots_closed_day_and_zero_step() {
        let hours = BusinessHours::default();
        assert!(hours.candidate_slots(date(SUNDAY), 60).is_empty());
        assert!(hours.candidate_slots(date(MONDAY), 0).is_empty());
    }

    #[test]
    fn test_candidate_slots_step_longer_than_day() {
        let hours = BusinessHours::default();
        assert!(hours.candidate_slots(date(MONDAY), u32::MAX).is_empty());
    }

    #[test]
    fn test_validate_closed_day() {
        let check = BusinessHours::default().validate_fit(date(SUNDAY), 600, 60);
        assert!(!check.valid);
        assert_eq!(check.reason.as_deref(), Some("We are closed on Sundays"));
    }

    #[test]
    fn test_validate_starts_too_early() {
        let check = BusinessHours::default().validate_fit(date(MONDAY), 5 * 60, 60);
        assert_eq!(
            check.reason.as_deref(),
            Some("Appointment starts before business hours (opens at 6:00 AM)")
        );
    }

    #[test]
    fn test_validate_ends_too_late() {
        // Friday 4:00 PM is one of the published labels but the studio closes at 3.
        let check = BusinessHours::default().validate_fit(date(FRIDAY), 16 * 60, 60);
        assert_eq!(
            check.reason.as_deref(),
            Some("Appointment would end after business hours (closes at 3:00 PM)")
        );
    }

    #[test]
    fn test_validate_huge_duration_ends_too_late() {
        let check = BusinessHours::default().validate_fit(date(MONDAY), 9 * 60, u32::MAX);
        assert!(!check.valid);
        assert_eq!(
            check.reason.as_deref(),
            Some("Appointment would end after business hours (closes at 8:00 PM)")
        );
    }

    #[test]
    fn test_validate_exact_close_is_ok() {
        let check = BusinessHours::default().validate_fit(date(SATURDAY), 12 * 60, 60);
        assert_eq!(
            check,
            HoursCheck {
                valid: true,
                reason: None
            }
        );
    }

    #[test]
    fn test_from_config() {
        let open = DayConfig {
            is_open: true,
            open_time: "10:00".into(),
            close_time: "12:00".into(),
        };
        let closed = DayConfig {
            is_open: false,
            open_time: String::new(),
            close_time: String::new(),
        };
        let week = [
            open.clone(),
            closed.clone(),
            closed.clone(),
            closed.clone(),
            closed.clone(),
            closed.clone(),
            closed,
        ];
        let hours = BusinessHours::from_config(&week).unwrap();
        assert!(hours.is_open_on(date(SUNDAY)));
        assert!(!hours.is_open_on(date(MONDAY)));
        assert_eq!(hours.candidate_slots(date(SUNDAY), 60), vec!["10:00 AM", "11:00 AM"]);
    }

    #[test]
    fn test_from_config_rejects_bad_clock() {
        let mut week: [DayConfig; 7] = std::array::from_fn(|_| DayConfig {
            is_open: false,
            open_time: String::new(),
            close_time: String::new(),
        });
        week[1] = DayConfig {
            is_open: true,
            open_time: "9am".into(),
            close_time: "17:00".into(),
        };
        assert!(BusinessHours::from_config(&week).is_err());
    }

    #[test]
    fn test_hours_for_display() {
        let hours = BusinessHours::default();
        let friday = hours.hours_for(date(FRIDAY));
        assert_eq!(friday.open_time.as_deref(), Some("6:00 AM"));
        assert_eq!(friday.close_time.as_deref(), Some("3:00 PM"));
        assert!(!hours.hours_for(date(SUNDAY)).is_open);
    }
}
