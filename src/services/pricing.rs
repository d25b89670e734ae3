use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{
    AppliedSpecialPrice, BookedWindow, DayOfWeek, PriceConditions, PricingModel, PricingSnapshot,
    Service, SpecialPrice,
};

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;
const HOURS_PER_NIGHT: u32 = 24;

/// Itemises the price of a prospective booking.
///
/// Pure: reads the service's pricing and payment settings and never
/// mutates them. A window carrying `nights` is priced as a lodging stay.
pub fn compute_price(
    service: &Service,
    number_of_people: u32,
    booking_date: NaiveDate,
    window: &BookedWindow,
) -> PricingSnapshot {
    let pricing = &service.pricing;
    let settings = &service.payment_settings;

    let special = find_special_price(&pricing.special_prices, booking_date, number_of_people);
    let unit_price = special.map(|s| s.price).unwrap_or(pricing.base_price);

    let billable_units = billable_units(pricing.pricing_model, number_of_people, window);
    let subtotal = unit_price * Decimal::from(billable_units);

    let tax_amount = percent_of(subtotal, settings.tax_rate);
    let deposit_amount = if settings.deposit.enabled {
        percent_of(subtotal, settings.deposit.percentage)
    } else {
        Decimal::ZERO
    };

    PricingSnapshot {
        base_price_used: unit_price,
        special_price: special.map(|s| AppliedSpecialPrice {
            name: s.name.clone(),
            price: s.price,
        }),
        billable_units,
        subtotal,
        tax_amount,
        deposit_amount,
        total_amount: subtotal + tax_amount,
    }
}

/// First entry whose conditions match wins. Conditions are OR'd and an
/// unset condition counts as satisfied, so only an entry with all three
/// set and none met is skipped.
pub fn find_special_price(
    special_prices: &[SpecialPrice],
    booking_date: NaiveDate,
    number_of_people: u32,
) -> Option<&SpecialPrice> {
    special_prices
        .iter()
        .find(|sp| conditions_match(&sp.conditions, booking_date, number_of_people))
}

fn conditions_match(conditions: &PriceConditions, date: NaiveDate, people: u32) -> bool {
    let weekday = DayOfWeek::of(date);

    conditions.days_of_week.is_empty()
        || conditions.days_of_week.contains(&weekday)
        || conditions.specific_dates.is_empty()
        || conditions.specific_dates.contains(&date)
        || conditions.min_people.map_or(true, |min| people >= min)
}

/// Number of units the unit price is multiplied by.
pub fn billable_units(model: PricingModel, number_of_people: u32, window: &BookedWindow) -> u32 {
    if let Some(nights) = window.nights {
        return match model {
            PricingModel::PerPerson => number_of_people,
            PricingModel::PerHour => nights * HOURS_PER_NIGHT,
            PricingModel::PerDay | PricingModel::Fixed => nights,
        };
    }

    let seconds = (window.end_time - window.start_time).num_seconds().max(0);
    match model {
        PricingModel::PerPerson => number_of_people,
        PricingModel::PerHour => ceil_div(seconds, SECONDS_PER_HOUR),
        PricingModel::PerDay => ceil_div(seconds, SECONDS_PER_DAY),
        PricingModel::Fixed => 1,
    }
}

fn ceil_div(value: i64, unit: i64) -> u32 {
    let units = (value + unit - 1) / unit;
    u32::try_from(units).unwrap_or(u32::MAX)
}

/// `amount * percent / 100`, rounded to cents.
fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    (amount * percent / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
