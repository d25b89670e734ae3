use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::{BookingStore, CapacityUpdate};
use crate::errors::{AppError, AppResult};
use crate::models::{
    page_bounds, BookedWindow, Booking, BookingStatus, Cancellation, Page, PaymentStatus,
    Service, SlotKey, Transaction, TransactionKind, TransactionStatus,
};
use crate::services::availability::compute_availability;
use crate::services::clock::Clock;
use crate::services::identity::{is_business_owner, require_owner, Actor};
use crate::services::payment::{
    execute_plan, new_transaction_id, plan_payment, PaymentDetails, PaymentProvider,
};
use crate::services::pricing::compute_price;
use crate::services::scheduler::ExpiryScheduler;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSlotRequest {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Check-out side of a lodging stay. Check-in is the booking date.
#[derive(Debug, Clone, Deserialize)]
pub struct StayRequest {
    pub check_out_date: NaiveDate,
    pub number_of_nights: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBooking {
    pub service_id: Option<String>,
    pub booking_date: Option<NaiveDate>,
    pub time_slot: Option<TimeSlotRequest>,
    pub number_of_people: Option<u32>,
    pub stay: Option<StayRequest>,
    pub payment_method: Option<String>,
    pub payment_details: Option<serde_json::Value>,
}

/// Owns the booking state machine and the capacity counters it draws on.
///
/// ```text
/// pending ──approve/confirm──▶ confirmed ──complete──▶ completed
///    │                            │    └──no-show───▶ no-show
///    ├──reject──▶ rejected        │
///    └──cancel──▶ cancelled ◀─cancel
/// ```
pub struct BookingManager {
    store: Arc<dyn BookingStore>,
    payments: Arc<dyn PaymentProvider>,
    scheduler: Arc<dyn ExpiryScheduler>,
    clock: Arc<dyn Clock>,
    page_size: i64,
}

impl BookingManager {
    pub fn new(
        store: Arc<dyn BookingStore>,
        payments: Arc<dyn PaymentProvider>,
        scheduler: Arc<dyn ExpiryScheduler>,
        clock: Arc<dyn Clock>,
        page_size: i64,
    ) -> Self {
        Self {
            store,
            payments,
            scheduler,
            clock,
            page_size,
        }
    }

    pub async fn create(&self, actor: &Actor, req: NewBooking) -> AppResult<Booking> {
        let user_id = actor.user_id().ok_or(AppError::Unauthorized)?.to_string();

        let mut missing = vec![];
        if req.service_id.as_deref().map_or(true, str::is_empty) {
            missing.push("service_id");
        }
        if req.booking_date.is_none() {
            missing.push("booking_date");
        }
        if req.number_of_people.is_none() {
            missing.push("number_of_people");
        }
        let slot_times = req
            .time_slot
            .as_ref()
            .and_then(|t| Some((t.start_time.as_deref()?, t.end_time.as_deref()?)));
        if slot_times.is_none() {
            missing.push("time_slot");
        }
        let (Some(service_id), Some(booking_date), Some(people), Some((start_raw, end_raw))) = (
            req.service_id.as_deref().filter(|s| !s.is_empty()),
            req.booking_date,
            req.number_of_people,
            slot_times,
        ) else {
            return Err(AppError::MissingFields(missing.join(", ")));
        };
        if people == 0 {
            return Err(AppError::InvalidRequest(
                "number of people must be at least 1".to_string(),
            ));
        }

        let service = self
            .store
            .find_service(service_id)?
            .ok_or_else(|| AppError::NotFound("service".to_string()))?;
        if self.store.find_user(&user_id)?.is_none() {
            return Err(AppError::NotFound("user".to_string()));
        }

        let window = booked_window(&service, booking_date, start_raw, end_raw, req.stay.as_ref())?;
        let now = self.clock.now();
        check_booking_window(&service, &window, now)?;

        let report = compute_availability(&service, Some(booking_date), now.date_naive());
        let Some(slot_key) = report.slot else {
            return Err(AppError::ServiceUnavailable(
                booking_date.format("%Y-%m-%d").to_string(),
            ));
        };
        if report.remaining_spots < people as i64 {
            return Err(AppError::InsufficientCapacity {
                requested: people,
                remaining: report.remaining_spots.max(0),
            });
        }
        let ceiling = service
            .availability
            .slot(&slot_key)
            .map(|s| s.total_capacity)
            .unwrap_or(0);

        let pricing = compute_price(&service, people, booking_date, &window);
        let requires_approval = service.booking_settings.requires_approval;

        let details = match (req.payment_method, req.payment_details) {
            (Some(method), Some(details)) if !method.trim().is_empty() => Some(PaymentDetails {
                method,
                details,
            }),
            _ => None,
        };
        let plan = plan_payment(
            &service.payment_settings,
            &pricing,
            details.as_ref(),
            requires_approval,
        )?;
        let deadline = payment_deadline(&service, now)?;

        // The earlier read may be stale; this is the authoritative check.
        match self
            .store
            .try_increment_capacity(&service.id, &slot_key, people, ceiling)?
        {
            CapacityUpdate::Reserved => {}
            CapacityUpdate::Exceeded => {
                let remaining = self.current_remaining(&service.id, &slot_key);
                tracing::info!(
                    service_id = %service.id,
                    slot = %slot_key.as_key(),
                    requested = people,
                    remaining,
                    "capacity exhausted at reservation time"
                );
                return Err(AppError::InsufficientCapacity {
                    requested: people,
                    remaining,
                });
            }
        }

        let payment =
            match execute_plan(self.payments.as_ref(), &plan, details.as_ref(), now).await {
                Ok(payment) => payment,
                Err(e) => {
                    self.compensate(&service.id, &slot_key, people, "payment failed");
                    return Err(e);
                }
            };

        let expires_at = deadline.filter(|_| payment.status == PaymentStatus::Pending);

        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            service_id: service.id.clone(),
            booking_date,
            time_slot: window,
            number_of_people: people,
            status: if requires_approval {
                BookingStatus::Pending
            } else {
                BookingStatus::Confirmed
            },
            slot: slot_key,
            pricing,
            payment,
            cancellation: None,
            expires_at,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        if let Err(e) = self.store.create_booking(&booking) {
            self.compensate(&service.id, &slot_key, people, "booking persistence failed");
            return Err(e);
        }

        tracing::info!(
            booking_id = %booking.id,
            service_id = %booking.service_id,
            status = %booking.status,
            payment_status = booking.payment.status.as_str(),
            total = %booking.pricing.total_amount,
            people,
            "booking created"
        );

        if let Some(at) = booking.expires_at {
            if let Err(e) = self.scheduler.schedule_expiry(&booking.id, at) {
                tracing::error!(booking_id = %booking.id, error = %e, "failed to schedule booking expiry");
            }
        }

        Ok(booking)
    }

    pub fn approve(&self, actor: &Actor, booking_id: &str) -> AppResult<Booking> {
        let (mut booking, service) = self.load(booking_id)?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;
        expect_status(&booking, &[BookingStatus::Pending], "approve")?;

        booking.status = BookingStatus::Confirmed;
        self.commit(booking, "approve")
    }

    pub fn reject(
        &self,
        actor: &Actor,
        booking_id: &str,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        let (mut booking, service) = self.load(booking_id)?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;
        expect_status(&booking, &[BookingStatus::Pending], "reject")?;

        let now = self.clock.now();
        let refund = self.refund_remaining(&mut booking, now);
        booking.status = BookingStatus::Rejected;
        booking.cancellation = Some(Cancellation {
            cancelled_at: now,
            cancelled_by: actor.label(),
            reason,
            fee: Decimal::ZERO,
            refund_amount: refund,
        });

        let booking = self.commit(booking, "reject")?;
        self.release(&booking)?;
        Ok(booking)
    }

    /// Cancels a pending or confirmed booking. Inside the free-cancellation
    /// window nothing is withheld; otherwise the policy fee is kept out of
    /// whatever was paid and the rest is refunded.
    pub fn cancel(
        &self,
        actor: &Actor,
        booking_id: &str,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        let (booking, service) = self.load(booking_id)?;

        let is_customer = actor.is(&booking.user_id);
        if !is_customer
            && *actor != Actor::System
            && !is_business_owner(self.store.as_ref(), &service.business_id, actor)?
        {
            return Err(AppError::Unauthorized);
        }
        if is_customer && !service.cancellation_policy.allow_cancellation {
            return Err(AppError::CancellationNotAllowed);
        }
        expect_status(
            &booking,
            &[BookingStatus::Pending, BookingStatus::Confirmed],
            "cancel",
        )?;

        let now = self.clock.now();
        let fee = cancellation_fee(&service, &booking, now)?;
        self.cancel_with_fee(booking, actor, reason, fee, now)
    }

    /// Called by the external scheduler once a booking's payment window may
    /// have closed. Only cancels if payment is still pending and the expiry
    /// time has passed; otherwise returns the booking unchanged.
    pub fn expire(&self, actor: &Actor, booking_id: &str) -> AppResult<Booking> {
        if *actor != Actor::System {
            return Err(AppError::Unauthorized);
        }
        let (booking, _) = self.load(booking_id)?;
        let now = self.clock.now();

        let due = booking.expires_at.is_some_and(|at| now >= at);
        let unpaid = booking.payment.status == PaymentStatus::Pending;
        if !due || booking.status.is_terminal() || !unpaid {
            tracing::debug!(booking_id, status = %booking.status, "expiry check: nothing to do");
            return Ok(booking);
        }

        self.cancel_with_fee(
            booking,
            actor,
            Some("payment timeout".to_string()),
            Decimal::ZERO,
            now,
        )
    }

    /// Operator confirmation. Confirming an already confirmed booking is a
    /// no-op.
    pub fn confirm(&self, actor: &Actor, booking_id: &str) -> AppResult<Booking> {
        let (mut booking, service) = self.load(booking_id)?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;
        if booking.status == BookingStatus::Confirmed {
            return Ok(booking);
        }
        expect_status(&booking, &[BookingStatus::Pending], "confirm")?;

        booking.status = BookingStatus::Confirmed;
        self.commit(booking, "confirm")
    }

    pub fn complete(&self, actor: &Actor, booking_id: &str) -> AppResult<Booking> {
        let (mut booking, service) = self.load(booking_id)?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;
        expect_status(&booking, &[BookingStatus::Confirmed], "complete")?;

        booking.status = BookingStatus::Completed;
        self.commit(booking, "complete")
    }

    /// The slot stays consumed: the business held it for the customer.
    pub fn mark_no_show(&self, actor: &Actor, booking_id: &str) -> AppResult<Booking> {
        let (mut booking, service) = self.load(booking_id)?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;
        expect_status(&booking, &[BookingStatus::Confirmed], "mark as no-show")?;

        // Recorded as owed; collecting it is up to the business.
        let policy = &service.payment_settings.charge_on_no_show;
        if policy.enabled && policy.amount > Decimal::ZERO {
            let method = booking.payment.last_method();
            booking.payment.transactions.push(Transaction {
                kind: TransactionKind::NoShowCharge,
                amount: policy.amount,
                date: self.clock.now(),
                status: TransactionStatus::Pending,
                method,
                transaction_id: new_transaction_id(),
            });
        }

        booking.status = BookingStatus::NoShow;
        self.commit(booking, "mark as no-show")
    }

    /// Refunds `amount` (all that is refundable when omitted). Allowed in
    /// any state as long as something was paid and not yet returned.
    pub fn process_refund(
        &self,
        actor: &Actor,
        booking_id: &str,
        amount: Option<Decimal>,
    ) -> AppResult<Booking> {
        let (mut booking, service) = self.load(booking_id)?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;

        let refundable = booking.payment.refundable();
        if refundable <= Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "booking has no paid amount to refund".to_string(),
            ));
        }
        let amount = amount.unwrap_or(refundable);
        if amount <= Decimal::ZERO || amount > refundable {
            return Err(AppError::InvalidRequest(format!(
                "refund must be between 0 and {refundable}"
            )));
        }

        push_refund(&mut booking, amount, self.clock.now());
        self.commit(booking, "refund")
    }

    /// Visible to the customer who booked and to the business owner.
    pub fn get(&self, actor: &Actor, booking_id: &str) -> AppResult<Booking> {
        let (booking, service) = self.load(booking_id)?;
        if actor.is(&booking.user_id)
            || is_business_owner(self.store.as_ref(), &service.business_id, actor)?
        {
            Ok(booking)
        } else {
            Err(AppError::Unauthorized)
        }
    }

    pub fn list_for_user(
        &self,
        actor: &Actor,
        user_id: &str,
        page: i64,
    ) -> AppResult<Page<Booking>> {
        if !actor.is(user_id) {
            return Err(AppError::Unauthorized);
        }
        let (page, limit, offset) = page_bounds(page, self.page_size);
        let (items, total) = self.store.list_bookings_by_user(user_id, limit, offset)?;
        Ok(Page::new(items, page, self.page_size, total))
    }

    pub fn list_for_service(
        &self,
        actor: &Actor,
        service_id: &str,
        page: i64,
    ) -> AppResult<Page<Booking>> {
        let service = self
            .store
            .find_service(service_id)?
            .ok_or_else(|| AppError::NotFound("service".to_string()))?;
        require_owner(self.store.as_ref(), &service.business_id, actor)?;

        let (page, limit, offset) = page_bounds(page, self.page_size);
        let (items, total) = self
            .store
            .list_bookings_by_service(service_id, limit, offset)?;
        Ok(Page::new(items, page, self.page_size, total))
    }

    fn load(&self, booking_id: &str) -> AppResult<(Booking, Service)> {
        let booking = self
            .store
            .find_booking(booking_id)?
            .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
        let service = self
            .store
            .find_service(&booking.service_id)?
            .ok_or_else(|| AppError::NotFound("service".to_string()))?;
        Ok((booking, service))
    }

    fn cancel_with_fee(
        &self,
        mut booking: Booking,
        actor: &Actor,
        reason: Option<String>,
        fee: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<Booking> {
        if fee > Decimal::ZERO {
            let available = booking.payment.refundable();
            let withheld = fee.min(available);
            let method = booking.payment.last_method();
            if withheld > Decimal::ZERO {
                booking.payment.transactions.push(Transaction {
                    kind: TransactionKind::CancellationFee,
                    amount: withheld,
                    date: now,
                    status: TransactionStatus::Completed,
                    method: method.clone(),
                    transaction_id: new_transaction_id(),
                });
            }
            // Whatever the payments could not cover is still owed.
            let outstanding = fee - withheld;
            if outstanding > Decimal::ZERO {
                booking.payment.transactions.push(Transaction {
                    kind: TransactionKind::CancellationFee,
                    amount: outstanding,
                    date: now,
                    status: TransactionStatus::Pending,
                    method,
                    transaction_id: new_transaction_id(),
                });
            }
        }

        let refund = self.refund_remaining(&mut booking, now);
        booking.status = BookingStatus::Cancelled;
        booking.cancellation = Some(Cancellation {
            cancelled_at: now,
            cancelled_by: actor.label(),
            reason,
            fee,
            refund_amount: refund,
        });

        let booking = self.commit(booking, "cancel")?;
        self.release(&booking)?;
        Ok(booking)
    }

    fn refund_remaining(&self, booking: &mut Booking, now: DateTime<Utc>) -> Decimal {
        let refund = booking.payment.refundable();
        if refund > Decimal::ZERO {
            push_refund(booking, refund, now);
        }
        refund
    }

    /// Optimistic save. A concurrent transition that got there first turns
    /// this one into an invalid transition from whatever state it left.
    fn commit(&self, mut booking: Booking, requested: &'static str) -> AppResult<Booking> {
        booking.updated_at = self.clock.now();
        if !self.store.save_booking(&booking)? {
            let current = self
                .store
                .find_booking(&booking.id)?
                .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
            return Err(AppError::InvalidStateTransition {
                current: current.status,
                requested,
            });
        }
        booking.version += 1;

        tracing::info!(
            booking_id = %booking.id,
            status = %booking.status,
            payment_status = booking.payment.status.as_str(),
            action = requested,
            "booking updated"
        );
        Ok(booking)
    }

    fn release(&self, booking: &Booking) -> AppResult<()> {
        self.store
            .release_capacity(&booking.service_id, &booking.slot, booking.number_of_people)
            .inspect_err(|e| {
                tracing::error!(
                    booking_id = %booking.id,
                    error = %e,
                    "booking closed but capacity was not released"
                );
            })
    }

    fn compensate(&self, service_id: &str, key: &SlotKey, people: u32, cause: &str) {
        tracing::warn!(
            service_id,
            slot = %key.as_key(),
            people,
            cause,
            "rolling back capacity reservation"
        );
        if let Err(e) = self.store.release_capacity(service_id, key, people) {
            tracing::error!(service_id, error = %e, "capacity rollback failed");
        }
    }

    fn current_remaining(&self, service_id: &str, key: &SlotKey) -> i64 {
        match self.store.find_service(service_id) {
            Ok(Some(service)) => service
                .availability
                .slot(key)
                .map(|s| s.remaining().max(0))
                .unwrap_or(0),
            _ => 0,
        }
    }
}

fn expect_status(
    booking: &Booking,
    allowed: &[BookingStatus],
    requested: &'static str,
) -> AppResult<()> {
    if allowed.contains(&booking.status) {
        Ok(())
    } else {
        Err(AppError::InvalidStateTransition {
            current: booking.status,
            requested,
        })
    }
}

fn push_refund(booking: &mut Booking, amount: Decimal, now: DateTime<Utc>) {
    let method = booking.payment.last_method();
    booking.payment.transactions.push(Transaction {
        kind: TransactionKind::Refund,
        amount,
        date: now,
        status: TransactionStatus::Completed,
        method,
        transaction_id: new_transaction_id(),
    });
    if booking.payment.refundable() <= Decimal::ZERO {
        booking.payment.status = PaymentStatus::Refunded;
    }
}

/// Free when at least `free_cancellation_hours` remain before the start.
pub fn cancellation_fee(
    service: &Service,
    booking: &Booking,
    now: DateTime<Utc>,
) -> AppResult<Decimal> {
    let policy = &service.cancellation_policy;
    let free_window = Duration::try_hours(policy.free_cancellation_hours).ok_or_else(|| {
        AppError::InvalidCancellationConfig(format!(
            "free cancellation window of {} hours is out of range",
            policy.free_cancellation_hours
        ))
    })?;
    let notice = booking.time_slot.start_time.signed_duration_since(now);
    Ok(if notice >= free_window {
        Decimal::ZERO
    } else {
        policy.cancellation_fee
    })
}

/// When an unpaid booking made at `now` lapses. `None` when the service has
/// no timeout.
fn payment_deadline(service: &Service, now: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
    let timeout = service.booking_settings.booking_timeout;
    if timeout <= 0 {
        return Ok(None);
    }
    Duration::try_minutes(timeout)
        .and_then(|d| now.checked_add_signed(d))
        .map(Some)
        .ok_or_else(|| {
            AppError::InvalidBookingConfig(format!(
                "booking timeout of {timeout} minutes is out of range"
            ))
        })
}

fn shifted(
    now: DateTime<Utc>,
    delta: Option<Duration>,
    what: &str,
) -> AppResult<DateTime<Utc>> {
    delta
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| AppError::InvalidBookingConfig(format!("{what} is out of range")))
}

fn parse_time(raw: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|_| AppError::InvalidRequest(format!("invalid time: {raw}")))
}

/// Turns the request's wall-clock times into an absolute window. Times are
/// UTC. A lodging stay ends on its check-out date.
fn booked_window(
    service: &Service,
    booking_date: NaiveDate,
    start_raw: &str,
    end_raw: &str,
    stay: Option<&StayRequest>,
) -> AppResult<BookedWindow> {
    let start_time = parse_time(start_raw)?;
    let end_time = parse_time(end_raw)?;

    match (service.category.is_lodging(), stay) {
        (true, None) => Err(AppError::InvalidRequest(
            "this service requires stay details (check-out date and nights)".to_string(),
        )),
        (false, Some(_)) => Err(AppError::InvalidRequest(
            "stay details were provided for a service that is not lodging".to_string(),
        )),
        (true, Some(stay)) => {
            if stay.number_of_nights == 0 {
                return Err(AppError::InvalidRequest(
                    "a stay must be at least one night".to_string(),
                ));
            }
            let nights = (stay.check_out_date - booking_date).num_days();
            if nights != stay.number_of_nights as i64 {
                return Err(AppError::InvalidRequest(format!(
                    "check-out date implies {nights} nights, not {}",
                    stay.number_of_nights
                )));
            }
            Ok(BookedWindow {
                start_time: booking_date.and_time(start_time).and_utc(),
                end_time: stay.check_out_date.and_time(end_time).and_utc(),
                nights: Some(stay.number_of_nights),
            })
        }
        (false, None) => Ok(BookedWindow {
            start_time: booking_date.and_time(start_time).and_utc(),
            end_time: booking_date.and_time(end_time).and_utc(),
            nights: None,
        }),
    }
}

fn check_booking_window(
    service: &Service,
    window: &BookedWindow,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let settings = &service.booking_settings;
    let earliest = shifted(
        now,
        Duration::try_hours(settings.min_advance_booking),
        "minimum advance booking",
    )?;
    let latest = shifted(
        now,
        Duration::try_days(settings.max_advance_booking),
        "maximum advance booking",
    )?;

    if window.start_time < earliest {
        return Err(AppError::BookingWindowViolation(format!(
            "bookings must be made at least {} hours in advance",
            settings.min_advance_booking
        )));
    }
    if window.start_time > latest {
        return Err(AppError::BookingWindowViolation(format!(
            "bookings can be made at most {} days in advance",
            settings.max_advance_booking
        )));
    }
    if window.end_time <= window.start_time {
        return Err(AppError::InvalidTimeRange);
    }
    Ok(())
}
