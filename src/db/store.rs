use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::queries::{self, ReplaceOutcome};
use crate::errors::{AppError, AppResult};
use crate::models::{Availability, Booking, Business, Category, Service, SlotKey, User};

/// Result of an atomic conditional capacity increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityUpdate {
    Reserved,
    Exceeded,
}

/// Persistence collaborator for services, bookings and capacity counters.
///
/// `try_increment_capacity` is the only write path that can consume
/// capacity and it must be a single conditional operation, never a
/// read followed by a write.
pub trait BookingStore: Send + Sync {
    fn find_service(&self, id: &str) -> AppResult<Option<Service>>;
    fn insert_service(&self, service: &Service) -> AppResult<()>;
    fn update_service(&self, service: &Service) -> AppResult<()>;
    fn replace_availability(
        &self,
        service_id: &str,
        availability: &Availability,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()>;
    fn delete_service(&self, id: &str) -> AppResult<bool>;
    fn list_services_by_business(
        &self,
        business_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Service>, i64)>;
    fn list_services_by_category(
        &self,
        category: Category,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Service>, i64)>;

    fn find_user(&self, id: &str) -> AppResult<Option<User>>;
    fn find_business(&self, id: &str) -> AppResult<Option<Business>>;

    fn find_booking(&self, id: &str) -> AppResult<Option<Booking>>;
    fn create_booking(&self, booking: &Booking) -> AppResult<()>;
    /// Optimistic save keyed on `booking.version`. Returns false when the
    /// stored booking moved on since it was read.
    fn save_booking(&self, booking: &Booking) -> AppResult<bool>;
    fn list_bookings_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Booking>, i64)>;
    fn list_bookings_by_service(
        &self,
        service_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Booking>, i64)>;
    fn count_active_bookings(&self, service_id: &str) -> AppResult<i64>;

    fn try_increment_capacity(
        &self,
        service_id: &str,
        key: &SlotKey,
        delta: u32,
        ceiling: u32,
    ) -> AppResult<CapacityUpdate>;
    fn release_capacity(&self, service_id: &str, key: &SlotKey, delta: u32) -> AppResult<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(super::init_db(path)?))
    }

    /// Seeds or updates a user record. Identity lives upstream; this keeps
    /// the local copy that bookings reference.
    pub fn save_user(&self, user: &User) -> AppResult<()> {
        Ok(queries::save_user(&*self.lock()?, user)?)
    }

    pub fn save_business(&self, business: &Business) -> AppResult<()> {
        Ok(queries::save_business(&*self.lock()?, business)?)
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal(anyhow!("database mutex poisoned")))
    }
}

impl BookingStore for SqliteStore {
    fn find_service(&self, id: &str) -> AppResult<Option<Service>> {
        Ok(queries::get_service(&*self.lock()?, id)?)
    }

    fn insert_service(&self, service: &Service) -> AppResult<()> {
        Ok(queries::insert_service(&*self.lock()?, service)?)
    }

    fn update_service(&self, service: &Service) -> AppResult<()> {
        if !queries::update_service(&*self.lock()?, service)? {
            return Err(AppError::NotFound("service".to_string()));
        }
        Ok(())
    }

    fn replace_availability(
        &self,
        service_id: &str,
        availability: &Availability,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let outcome =
            queries::replace_availability(&*self.lock()?, service_id, availability, &updated_at)?;
        match outcome {
            ReplaceOutcome::Replaced => Ok(()),
            ReplaceOutcome::SlotInUse(slot) => Err(AppError::InvalidAvailabilityConfig(format!(
                "{slot} still has active bookings and cannot be removed"
            ))),
            ReplaceOutcome::BelowBooked { slot, booked } => {
                Err(AppError::InvalidAvailabilityConfig(format!(
                    "capacity for {slot} cannot drop below the {booked} spots already booked"
                )))
            }
        }
    }

    fn delete_service(&self, id: &str) -> AppResult<bool> {
        Ok(queries::delete_service(&*self.lock()?, id)?)
    }

    fn list_services_by_business(
        &self,
        business_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Service>, i64)> {
        Ok(queries::list_services_by_business(
            &*self.lock()?,
            business_id,
            limit,
            offset,
        )?)
    }

    fn list_services_by_category(
        &self,
        category: Category,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Service>, i64)> {
        Ok(queries::list_services_by_category(
            &*self.lock()?,
            category,
            limit,
            offset,
        )?)
    }

    fn find_user(&self, id: &str) -> AppResult<Option<User>> {
        Ok(queries::get_user(&*self.lock()?, id)?)
    }

    fn find_business(&self, id: &str) -> AppResult<Option<Business>> {
        Ok(queries::get_business(&*self.lock()?, id)?)
    }

    fn find_booking(&self, id: &str) -> AppResult<Option<Booking>> {
        Ok(queries::get_booking(&*self.lock()?, id)?)
    }

    fn create_booking(&self, booking: &Booking) -> AppResult<()> {
        Ok(queries::insert_booking(&*self.lock()?, booking)?)
    }

    fn save_booking(&self, booking: &Booking) -> AppResult<bool> {
        Ok(queries::update_booking(&*self.lock()?, booking)?)
    }

    fn list_bookings_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Booking>, i64)> {
        Ok(queries::list_bookings_by_user(
            &*self.lock()?,
            user_id,
            limit,
            offset,
        )?)
    }

    fn list_bookings_by_service(
        &self,
        service_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Booking>, i64)> {
        Ok(queries::list_bookings_by_service(
            &*self.lock()?,
            service_id,
            limit,
            offset,
        )?)
    }

    fn count_active_bookings(&self, service_id: &str) -> AppResult<i64> {
        Ok(queries::count_active_bookings(&*self.lock()?, service_id)?)
    }

    fn try_increment_capacity(
        &self,
        service_id: &str,
        key: &SlotKey,
        delta: u32,
        ceiling: u32,
    ) -> AppResult<CapacityUpdate> {
        let reserved =
            queries::increment_capacity(&*self.lock()?, service_id, key, delta, ceiling)?;
        Ok(if reserved {
            CapacityUpdate::Reserved
        } else {
            CapacityUpdate::Exceeded
        })
    }

    fn release_capacity(&self, service_id: &str, key: &SlotKey, delta: u32) -> AppResult<()> {
        if !queries::release_capacity(&*self.lock()?, service_id, key, delta)? {
            tracing::warn!(
                service_id,
                slot = %key.as_key(),
                delta,
                "capacity release matched no counter"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BookingSettings, CancellationPolicy, DatedSlot, PaymentSettings, Pricing, PricingModel,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::thread;

    fn store_with_service(capacity: u32) -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .save_user(&User {
                id: "owner".to_string(),
                name: "Olive".to_string(),
                email: None,
            })
            .unwrap();
        store
            .save_business(&Business {
                id: "biz".to_string(),
                owner_id: "owner".to_string(),
                name: "Harbor Tours".to_string(),
            })
            .unwrap();

        let now = Utc::now();
        let service = Service {
            id: "svc".to_string(),
            business_id: "biz".to_string(),
            name: "Kayak rental".to_string(),
            description: None,
            category: Category::Entertainment,
            media_urls: vec![],
            pricing: Pricing {
                pricing_model: PricingModel::Fixed,
                base_price: dec!(50),
                special_prices: vec![],
            },
            payment_settings: PaymentSettings::default(),
            booking_settings: BookingSettings::default(),
            cancellation_policy: CancellationPolicy::default(),
            availability: Availability::Dated {
                dates: vec![DatedSlot {
                    date: NaiveDate::from_ymd_opt(2025, 6, 18).unwrap(),
                    total_capacity: capacity,
                    bookings_made: 0,
                }],
            },
            custom_details: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        store.insert_service(&service).unwrap();
        store
    }

    fn key() -> SlotKey {
        SlotKey::Date(NaiveDate::from_ymd_opt(2025, 6, 18).unwrap())
    }

    #[test]
    fn test_concurrent_increments_never_oversell() {
        let store = store_with_service(4);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.try_increment_capacity("svc", &key(), 1, 4).unwrap())
            })
            .collect();

        let reserved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r == CapacityUpdate::Reserved)
            .count();
        assert_eq!(reserved, 4);

        let service = store.find_service("svc").unwrap().unwrap();
        assert_eq!(service.availability.slot(&key()).unwrap().bookings_made, 4);
    }

    #[test]
    fn test_two_parties_of_three_against_four() {
        let store = store_with_service(4);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.try_increment_capacity("svc", &key(), 3, 4).unwrap())
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == CapacityUpdate::Reserved)
                .count(),
            1
        );
        assert!(outcomes.contains(&CapacityUpdate::Exceeded));
    }

    #[test]
    fn test_release_restores_capacity() {
        let store = store_with_service(4);
        assert_eq!(
            store.try_increment_capacity("svc", &key(), 4, 4).unwrap(),
            CapacityUpdate::Reserved
        );
        store.release_capacity("svc", &key(), 4).unwrap();
        // A release with nothing held is ignored rather than going negative.
        store.release_capacity("svc", &key(), 1).unwrap();

        let service = store.find_service("svc").unwrap().unwrap();
        assert_eq!(service.availability.slot(&key()).unwrap().bookings_made, 0);
    }

    #[test]
    fn test_replace_availability_maps_conflicts_to_config_error() {
        let store = store_with_service(4);
        store.try_increment_capacity("svc", &key(), 2, 4).unwrap();
        let err = store
            .replace_availability("svc", &Availability::Dated { dates: vec![] }, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidAvailabilityConfig(_)));
    }

    #[test]
    fn test_update_missing_service_is_not_found() {
        let store = store_with_service(4);
        let mut service = store.find_service("svc").unwrap().unwrap();
        service.id = "ghost".to_string();
        assert!(matches!(
            store.update_service(&service),
            Err(AppError::NotFound(_))
        ));
    }
}
