use crate::services::booking::BookingManager;
use crate::services::catalog::Catalog;

pub struct AppState {
    pub catalog: Catalog,
    pub bookings: BookingManager,
}
