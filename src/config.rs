use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub services_page_size: i64,
    pub bookings_page_size: i64,
    /// `simulated` approves every charge, `decline` refuses every charge.
    pub payment_gateway: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "servicebook.db".to_string()),
            services_page_size: env::var("SERVICES_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(6),
            bookings_page_size: env::var("BOOKINGS_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
            payment_gateway: env::var("PAYMENT_GATEWAY")
                .unwrap_or_else(|_| "simulated".to_string()),
        }
    }
}
