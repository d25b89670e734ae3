use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::service::SlotKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    pub booking_date: NaiveDate,
    pub time_slot: BookedWindow,
    pub number_of_people: u32,
    pub status: BookingStatus,
    /// The capacity counter this booking draws on.
    pub slot: SlotKey,
    pub pricing: PricingSnapshot,
    pub payment: Payment,
    pub cancellation: Option<Cancellation>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every save; a save against a stale version is refused.
    pub version: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookedWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Set for lodging stays.
    pub nights: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rejected,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no-show",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => BookingStatus::Confirmed,
            "cancelled" => BookingStatus::Cancelled,
            "rejected" => BookingStatus::Rejected,
            "completed" => BookingStatus::Completed,
            "no-show" => BookingStatus::NoShow,
            _ => BookingStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Whether the capacity this booking holds has been handed back.
    pub fn releases_capacity(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Rejected)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedSpecialPrice {
    pub name: String,
    pub price: Decimal,
}

/// Price breakdown captured once at creation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingSnapshot {
    pub base_price_used: Decimal,
    pub special_price: Option<AppliedSpecialPrice>,
    /// People, hours, days or nights depending on the pricing model.
    pub billable_units: u32,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub deposit_amount: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotRequired,
    Pending,
    DepositPaid,
    FullyPaid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::NotRequired => "not_required",
            PaymentStatus::Pending => "pending",
            PaymentStatus::DepositPaid => "deposit_paid",
            PaymentStatus::FullyPaid => "fully_paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    FullPayment,
    CancellationFee,
    NoShowCharge,
    Refund,
}

impl TransactionKind {
    /// Money moving from the customer to the business.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            TransactionKind::Deposit | TransactionKind::FullPayment | TransactionKind::NoShowCharge
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub status: TransactionStatus,
    pub method: Option<String>,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub status: PaymentStatus,
    /// Append-only.
    pub transactions: Vec<Transaction>,
}

impl Payment {
    /// Completed inbound payments.
    pub fn amount_paid(&self) -> Decimal {
        self.completed_sum(|k| k.is_inbound())
    }

    pub fn amount_refunded(&self) -> Decimal {
        self.completed_sum(|k| k == TransactionKind::Refund)
    }

    /// Fees withheld from what was paid.
    pub fn fees_withheld(&self) -> Decimal {
        self.completed_sum(|k| k == TransactionKind::CancellationFee)
    }

    pub fn refundable(&self) -> Decimal {
        (self.amount_paid() - self.amount_refunded() - self.fees_withheld()).max(Decimal::ZERO)
    }

    pub fn last_method(&self) -> Option<String> {
        self.transactions
            .iter()
            .rev()
            .find(|t| t.kind.is_inbound() && t.method.is_some())
            .and_then(|t| t.method.clone())
    }

    fn completed_sum(&self, pred: impl Fn(TransactionKind) -> bool) -> Decimal {
        self.transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Completed && pred(t.kind))
            .map(|t| t.amount)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: String,
    pub reason: Option<String>,
    pub fee: Decimal,
    pub refund_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn txn(kind: TransactionKind, amount: Decimal, status: TransactionStatus) -> Transaction {
        Transaction {
            kind,
            amount,
            date: Utc::now(),
            status,
            method: Some("card".to_string()),
            transaction_id: "txn_test".to_string(),
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(BookingStatus::NoShow.as_str(), "no-show");
        assert_eq!(BookingStatus::parse("no-show"), BookingStatus::NoShow);
        assert_eq!(
            serde_json::to_string(&BookingStatus::NoShow).unwrap(),
            r#""no-show""#
        );
        assert_eq!(BookingStatus::parse("garbage"), BookingStatus::Pending);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::NoShow.is_terminal());
        assert!(BookingStatus::Rejected.releases_capacity());
        assert!(!BookingStatus::NoShow.releases_capacity());
    }

    #[test]
    fn test_refundable_ignores_failed_and_subtracts_fees() {
        let payment = Payment {
            status: PaymentStatus::FullyPaid,
            transactions: vec![
                txn(TransactionKind::FullPayment, dec!(100), TransactionStatus::Completed),
                txn(TransactionKind::Deposit, dec!(50), TransactionStatus::Failed),
                txn(TransactionKind::CancellationFee, dec!(15), TransactionStatus::Completed),
                txn(TransactionKind::Refund, dec!(20), TransactionStatus::Completed),
            ],
        };
        assert_eq!(payment.amount_paid(), dec!(100));
        assert_eq!(payment.refundable(), dec!(65));
        assert_eq!(payment.last_method().as_deref(), Some("card"));
    }
}
