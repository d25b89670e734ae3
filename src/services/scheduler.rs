use chrono::{DateTime, Utc};

/// External timer that calls back into `ExpireBooking` once a booking's
/// payment window closes. The core only registers the request.
pub trait ExpiryScheduler: Send + Sync {
    fn schedule_expiry(&self, booking_id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Records requests in the log. Deployments wire a real job runner in.
pub struct LoggingScheduler;

impl ExpiryScheduler for LoggingScheduler {
    fn schedule_expiry(&self, booking_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        tracing::info!(booking_id, expires_at = %at, "booking expiry scheduled");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingScheduler;
