pub mod availability;
pub mod booking;
pub mod catalog;
pub mod clock;
pub mod identity;
pub mod payment;
pub mod pricing;
pub mod scheduler;
