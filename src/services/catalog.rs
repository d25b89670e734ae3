use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::BookingStore;
use crate::errors::{AppError, AppResult};
use crate::models::{
    page_bounds, Availability, AvailabilityReport, BookingSettings, CancellationPolicy, Category,
    Page, PaymentSettings, Pricing, Service,
};
use crate::services::availability::compute_availability;
use crate::services::clock::Clock;
use crate::services::identity::{require_owner, Actor};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewService {
    pub business_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub pricing: Option<Pricing>,
    pub payment_settings: Option<PaymentSettings>,
    pub booking_settings: Option<BookingSettings>,
    pub cancellation_policy: Option<CancellationPolicy>,
    pub availability: Option<Availability>,
    pub custom_details: Option<serde_json::Value>,
}

/// Partial update of a service's descriptive fields. Absent fields keep
/// their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceInfoUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub media_urls: Option<Vec<String>>,
    pub custom_details: Option<serde_json::Value>,
}

/// Service CRUD. Every write is restricted to the owner of the business
/// that publishes the service.
pub struct Catalog {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    page_size: i64,
}

impl Catalog {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, page_size: i64) -> Self {
        Self {
            store,
            clock,
            page_size,
        }
    }

    pub fn create_service(&self, actor: &Actor, req: NewService) -> AppResult<Service> {
        let mut missing = vec![];
        if blank(&req.business_id) {
            missing.push("business_id");
        }
        if blank(&req.name) {
            missing.push("name");
        }
        if blank(&req.category) {
            missing.push("category");
        }
        if req.pricing.is_none() {
            missing.push("pricing");
        }
        if req.availability.is_none() {
            missing.push("availability");
        }
        let (Some(business_id), Some(name), Some(category), Some(pricing), Some(availability)) = (
            req.business_id,
            req.name,
            req.category,
            req.pricing,
            req.availability,
        ) else {
            return Err(AppError::MissingFields(missing.join(", ")));
        };
        if !missing.is_empty() {
            return Err(AppError::MissingFields(missing.join(", ")));
        }

        if self.store.find_business(&business_id)?.is_none() {
            return Err(AppError::NotFound("business".to_string()));
        }
        require_owner(self.store.as_ref(), &business_id, actor)?;

        let category = parse_category(&category)?;
        let payment_settings = req.payment_settings.unwrap_or_default();
        let booking_settings = req.booking_settings.unwrap_or_default();
        let cancellation_policy = req.cancellation_policy.unwrap_or_default();

        validate_pricing(&pricing)?;
        validate_payment_settings(&payment_settings)?;
        validate_booking_settings(&booking_settings)?;
        validate_cancellation_policy(&cancellation_policy)?;
        validate_availability(&availability)?;

        let now = self.clock.now();
        let service = Service {
            id: uuid::Uuid::new_v4().to_string(),
            business_id,
            name: name.trim().to_string(),
            description: req.description,
            category,
            media_urls: req.media_urls,
            pricing,
            payment_settings,
            booking_settings,
            cancellation_policy,
            availability: with_empty_counters(availability),
            custom_details: req.custom_details.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_service(&service)?;
        tracing::info!(
            service_id = %service.id,
            business_id = %service.business_id,
            category = service.category.as_str(),
            "service created"
        );
        Ok(service)
    }

    pub fn get_service(&self, id: &str) -> AppResult<Service> {
        self.store
            .find_service(id)?
            .ok_or_else(|| AppError::NotFound("service".to_string()))
    }

    pub fn get_availability(
        &self,
        service_id: &str,
        date: Option<NaiveDate>,
    ) -> AppResult<AvailabilityReport> {
        let service = self.get_service(service_id)?;
        let today = self.clock.now().date_naive();
        Ok(compute_availability(&service, date, today))
    }

    pub fn list_by_business(&self, business_id: &str, page: i64) -> AppResult<Page<Service>> {
        let (page, limit, offset) = page_bounds(page, self.page_size);
        let (items, total) = self
            .store
            .list_services_by_business(business_id, limit, offset)?;
        Ok(Page::new(items, page, self.page_size, total))
    }

    pub fn list_by_category(&self, category: &str, page: i64) -> AppResult<Page<Service>> {
        let category = parse_category(category)?;
        let (page, limit, offset) = page_bounds(page, self.page_size);
        let (items, total) = self
            .store
            .list_services_by_category(category, limit, offset)?;
        Ok(Page::new(items, page, self.page_size, total))
    }

    pub fn update_info(
        &self,
        actor: &Actor,
        service_id: &str,
        update: ServiceInfoUpdate,
    ) -> AppResult<Service> {
        let mut service = self.owned_service(actor, service_id)?;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(AppError::InvalidRequest("name cannot be empty".to_string()));
            }
            service.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            service.description = Some(description);
        }
        if let Some(category) = update.category {
            service.category = parse_category(&category)?;
        }
        if let Some(media_urls) = update.media_urls {
            service.media_urls = media_urls;
        }
        if let Some(custom_details) = update.custom_details {
            service.custom_details = custom_details;
        }

        self.save(service, "info")
    }

    pub fn update_pricing(
        &self,
        actor: &Actor,
        service_id: &str,
        pricing: Pricing,
    ) -> AppResult<Service> {
        let mut service = self.owned_service(actor, service_id)?;
        validate_pricing(&pricing)?;
        service.pricing = pricing;
        self.save(service, "pricing")
    }

    pub fn update_payment_settings(
        &self,
        actor: &Actor,
        service_id: &str,
        settings: PaymentSettings,
    ) -> AppResult<Service> {
        let mut service = self.owned_service(actor, service_id)?;
        validate_payment_settings(&settings)?;
        service.payment_settings = settings;
        self.save(service, "payment_settings")
    }

    pub fn update_booking_settings(
        &self,
        actor: &Actor,
        service_id: &str,
        settings: BookingSettings,
    ) -> AppResult<Service> {
        let mut service = self.owned_service(actor, service_id)?;
        validate_booking_settings(&settings)?;
        service.booking_settings = settings;
        self.save(service, "booking_settings")
    }

    pub fn update_cancellation_policy(
        &self,
        actor: &Actor,
        service_id: &str,
        policy: CancellationPolicy,
    ) -> AppResult<Service> {
        let mut service = self.owned_service(actor, service_id)?;
        validate_cancellation_policy(&policy)?;
        service.cancellation_policy = policy;
        self.save(service, "cancellation_policy")
    }

    /// Replaces the availability layout. Slots that survive keep their
    /// booked counts; the store rejects layouts that would strand bookings.
    pub fn update_availability(
        &self,
        actor: &Actor,
        service_id: &str,
        availability: Availability,
    ) -> AppResult<Service> {
        self.owned_service(actor, service_id)?;
        validate_availability(&availability)?;

        let availability = with_empty_counters(availability);
        self.store
            .replace_availability(service_id, &availability, self.clock.now())?;
        tracing::info!(
            service_id,
            mode = availability.mode_str(),
            slots = availability.slots().len(),
            "service availability replaced"
        );
        self.get_service(service_id)
    }

    pub fn delete_service(&self, actor: &Actor, service_id: &str) -> AppResult<()> {
        self.owned_service(actor, service_id)?;

        let active = self.store.count_active_bookings(service_id)?;
        if active > 0 {
            return Err(AppError::InvalidRequest(format!(
                "service has {active} active bookings"
            )));
        }

        if !self.store.delete_service(service_id)? {
            return Err(AppError::NotFound("service".to_string()));
        }
        tracing::info!(service_id, "service deleted");
        Ok(())
    }

    fn owned_service(&self, actor: &Actor, service_id: &str) -> AppResult<Service> {
        let service = self.get_service(service_id)?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;
        Ok(service)
    }

    fn save(&self, mut service: Service, section: &str) -> AppResult<Service> {
        service.updated_at = self.clock.now();
        self.store.update_service(&service)?;
        tracing::info!(service_id = %service.id, section, "service updated");
        Ok(service)
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn parse_category(raw: &str) -> AppResult<Category> {
    Category::parse(raw.trim())
        .ok_or_else(|| AppError::InvalidRequest(format!("invalid category: {raw}")))
}

/// Counters are owned by the booking lifecycle; callers cannot seed them.
fn with_empty_counters(availability: Availability) -> Availability {
    match availability {
        Availability::Dated { mut dates } => {
            for d in &mut dates {
                d.bookings_made = 0;
            }
            Availability::Dated { dates }
        }
        Availability::Recurring {
            recurring_start_date,
            mut days_of_week,
        } => {
            for d in &mut days_of_week {
                d.bookings_made = 0;
            }
            Availability::Recurring {
                recurring_start_date,
                days_of_week,
            }
        }
    }
}

fn percentage_in_range(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= Decimal::ONE_HUNDRED
}

pub fn validate_pricing(pricing: &Pricing) -> AppResult<()> {
    if pricing.base_price < Decimal::ZERO {
        return Err(AppError::InvalidPricingConfig(
            "base price cannot be negative".to_string(),
        ));
    }

    for special in &pricing.special_prices {
        if special.name.trim().is_empty() {
            return Err(AppError::InvalidPricingConfig(
                "special price name is required".to_string(),
            ));
        }
        if special.price < Decimal::ZERO {
            return Err(AppError::InvalidPricingConfig(format!(
                "special price '{}' cannot be negative",
                special.name
            )));
        }
        if special.conditions.min_people == Some(0) {
            return Err(AppError::InvalidPricingConfig(format!(
                "special price '{}' needs a minimum of at least 1 person",
                special.name
            )));
        }
    }
    Ok(())
}

pub fn validate_payment_settings(settings: &PaymentSettings) -> AppResult<()> {
    if !percentage_in_range(settings.tax_rate) {
        return Err(AppError::InvalidPaymentConfig(
            "tax rate must be between 0 and 100".to_string(),
        ));
    }
    if !percentage_in_range(settings.deposit.percentage) {
        return Err(AppError::InvalidPaymentConfig(
            "deposit percentage must be between 0 and 100".to_string(),
        ));
    }
    if settings.charge_on_no_show.amount < Decimal::ZERO {
        return Err(AppError::InvalidPaymentConfig(
            "no-show charge cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// Ten years.
pub const MAX_ADVANCE_DAYS: i64 = 3_650;
/// One week.
pub const MAX_BOOKING_TIMEOUT_MINUTES: i64 = 10_080;
/// One year.
pub const MAX_FREE_CANCELLATION_HOURS: i64 = 8_760;

pub fn validate_booking_settings(settings: &BookingSettings) -> AppResult<()> {
    if settings.min_advance_booking < 0 {
        return Err(AppError::InvalidBookingConfig(
            "minimum advance booking cannot be negative".to_string(),
        ));
    }
    if settings.max_advance_booking < 0 {
        return Err(AppError::InvalidBookingConfig(
            "maximum advance booking cannot be negative".to_string(),
        ));
    }
    if settings.booking_timeout < 0 {
        return Err(AppError::InvalidBookingConfig(
            "booking timeout cannot be negative".to_string(),
        ));
    }
    if settings.max_advance_booking > MAX_ADVANCE_DAYS {
        return Err(AppError::InvalidBookingConfig(format!(
            "maximum advance booking cannot exceed {MAX_ADVANCE_DAYS} days"
        )));
    }
    if settings.booking_timeout > MAX_BOOKING_TIMEOUT_MINUTES {
        return Err(AppError::InvalidBookingConfig(format!(
            "booking timeout cannot exceed {MAX_BOOKING_TIMEOUT_MINUTES} minutes"
        )));
    }
    if settings.min_advance_booking > settings.max_advance_booking.saturating_mul(24) {
        return Err(AppError::InvalidBookingConfig(
            "minimum advance booking exceeds the maximum window".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_cancellation_policy(policy: &CancellationPolicy) -> AppResult<()> {
    if policy.free_cancellation_hours < 0 {
        return Err(AppError::InvalidCancellationConfig(
            "free cancellation hours cannot be negative".to_string(),
        ));
    }
    if policy.free_cancellation_hours > MAX_FREE_CANCELLATION_HOURS {
        return Err(AppError::InvalidCancellationConfig(format!(
            "free cancellation hours cannot exceed {MAX_FREE_CANCELLATION_HOURS}"
        )));
    }
    if policy.cancellation_fee < Decimal::ZERO {
        return Err(AppError::InvalidCancellationConfig(
            "cancellation fee cannot be negative".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_availability(availability: &Availability) -> AppResult<()> {
    let slots = availability.slots();
    if slots.is_empty() {
        return Err(AppError::InvalidAvailabilityConfig(
            "at least one date or weekday is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for slot in &slots {
        if !seen.insert(slot.key) {
            return Err(AppError::InvalidAvailabilityConfig(format!(
                "{} is listed more than once",
                slot.key.as_key()
            )));
        }
        if slot.bookings_made > slot.total_capacity {
            return Err(AppError::InvalidAvailabilityConfig(format!(
                "{} has more bookings than capacity",
                slot.key.as_key()
            )));
        }
    }
    Ok(())
}
