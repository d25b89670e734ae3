pub mod availability;
pub mod booking;
pub mod page;
pub mod service;
pub mod user;

pub use availability::{AvailabilityReport, UpcomingDate};
pub use booking::{
    AppliedSpecialPrice, BookedWindow, Booking, BookingStatus, Cancellation, Payment,
    PaymentStatus, PricingSnapshot, Transaction, TransactionKind, TransactionStatus,
};
pub use page::{page_bounds, Page};
pub use service::{
    Availability, BookingSettings, CancellationPolicy, CapacitySlot, Category, DatedSlot,
    DayOfWeek, DepositPolicy, NoShowPolicy, PaymentSettings, PriceConditions, Pricing,
    PricingModel, Service, SlotKey, SpecialPrice, WeekdaySlot,
};
pub use user::{Business, User};
