use chrono::NaiveDate;

use crate::models::availability::{not_started_message, status_message, UPCOMING_DATES};
use crate::models::{Availability, AvailabilityReport, DayOfWeek, Service, SlotKey, UpcomingDate};

/// Answers whether `service` can be booked on `requested` (or `today` when
/// no date is given), how many spots remain, and which dates come next.
///
/// `is_available` is only true when a slot matches the date and still has
/// room; a matching but full slot reports "Fully Booked" and still sets
/// `slot` so a reservation attempt can fail with the capacity error.
pub fn compute_availability(
    service: &Service,
    requested: Option<NaiveDate>,
    today: NaiveDate,
) -> AvailabilityReport {
    let requested_date = requested.unwrap_or(today);

    let mut report = AvailabilityReport {
        service_id: service.id.clone(),
        service_name: service.name.clone(),
        requested_date,
        is_available: false,
        remaining_spots: 0,
        next_available_date: None,
        availability_status: String::new(),
        upcoming_dates: vec![],
        is_recurring: false,
        recurring_start_date: None,
        slot: None,
    };

    match &service.availability {
        Availability::Dated { dates } => {
            let mut future: Vec<_> = dates.iter().filter(|d| d.date >= requested_date).collect();
            future.sort_by_key(|d| d.date);

            report.upcoming_dates = future
                .iter()
                .take(UPCOMING_DATES)
                .map(|d| UpcomingDate {
                    date: d.date,
                    remaining_spots: d.total_capacity as i64 - d.bookings_made as i64,
                })
                .collect();

            if let Some(nearest) = future.first() {
                report.next_available_date = Some(nearest.date);
                if nearest.date == requested_date {
                    report.slot = Some(SlotKey::Date(nearest.date));
                    report.remaining_spots =
                        nearest.total_capacity as i64 - nearest.bookings_made as i64;
                }
            }
        }
        Availability::Recurring {
            recurring_start_date,
            days_of_week,
        } => {
            report.is_recurring = true;
            report.recurring_start_date = Some(*recurring_start_date);

            if requested_date < *recurring_start_date {
                report.availability_status = not_started_message(*recurring_start_date);
                return report;
            }

            let weekday = DayOfWeek::of(requested_date);
            if let Some(entry) = days_of_week.iter().find(|d| d.day_of_week == weekday) {
                report.slot = Some(SlotKey::Weekday(weekday));
                report.remaining_spots = entry.total_capacity as i64 - entry.bookings_made as i64;
            }

            report.upcoming_dates = next_recurring_dates(service, requested_date, UPCOMING_DATES);

            report.next_available_date = if report.slot.is_none() {
                report.upcoming_dates.first().map(|d| d.date)
            } else {
                None
            };
        }
    }

    let matched = report.slot.is_some();
    report.is_available = matched && report.remaining_spots > 0;

    if matched && !report.is_available {
        report.next_available_date = report
            .upcoming_dates
            .iter()
            .find(|d| d.date > requested_date && d.remaining_spots > 0)
            .map(|d| d.date);
    }

    report.availability_status = status_message(
        matched,
        report.remaining_spots,
        report.next_available_date,
    );
    report
}

/// Scans forward from `start` (inclusive) for dates whose weekday is
/// configured. Gives up after `count` full weeks.
fn next_recurring_dates(service: &Service, start: NaiveDate, count: usize) -> Vec<UpcomingDate> {
    let Availability::Recurring { days_of_week, .. } = &service.availability else {
        return vec![];
    };

    let mut dates = vec![];
    let mut current = start;
    for _ in 0..(count * 7) {
        if dates.len() >= count {
            break;
        }
        let weekday = DayOfWeek::of(current);
        if let Some(entry) = days_of_week.iter().find(|d| d.day_of_week == weekday) {
            dates.push(UpcomingDate {
                date: current,
                remaining_spots: entry.total_capacity as i64 - entry.bookings_made as i64,
            });
        }
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}
