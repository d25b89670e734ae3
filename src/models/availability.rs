use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::service::SlotKey;

/// How many upcoming dates an availability report lists.
pub const UPCOMING_DATES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpcomingDate {
    pub date: NaiveDate,
    pub remaining_spots: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityReport {
    pub service_id: String,
    pub service_name: String,
    pub requested_date: NaiveDate,
    pub is_available: bool,
    pub remaining_spots: i64,
    pub next_available_date: Option<NaiveDate>,
    pub availability_status: String,
    pub upcoming_dates: Vec<UpcomingDate>,
    pub is_recurring: bool,
    pub recurring_start_date: Option<NaiveDate>,
    /// Counter a reservation on `requested_date` would draw on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotKey>,
}

pub fn status_message(
    is_available: bool,
    remaining_spots: i64,
    next_available: Option<NaiveDate>,
) -> String {
    if is_available {
        if remaining_spots <= 0 {
            return "Fully Booked".to_string();
        }
        if remaining_spots <= 3 {
            return format!("Limited Availability - {remaining_spots} spots left");
        }
        return format!("Available - {remaining_spots} spots left");
    }

    match next_available {
        Some(date) => format!("Next Available on {}", date.format("%Y-%m-%d")),
        None => "Currently Unavailable".to_string(),
    }
}

pub fn not_started_message(start: NaiveDate) -> String {
    format!("Service starts on {}", start.format("%Y-%m-%d"))
}
