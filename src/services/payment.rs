use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::{
    Payment, PaymentSettings, PaymentStatus, PricingSnapshot, Transaction, TransactionKind,
    TransactionStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// External payment capability. Implementations own all network I/O; the
/// core only decides whether and how much to charge.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn charge(
        &self,
        method: &str,
        details: &serde_json::Value,
        amount: Decimal,
    ) -> anyhow::Result<ChargeOutcome>;
}

/// Approves every charge. Stands in for a real gateway in development.
pub struct SimulatedGateway;

#[async_trait]
impl PaymentProvider for SimulatedGateway {
    async fn charge(
        &self,
        method: &str,
        _details: &serde_json::Value,
        amount: Decimal,
    ) -> anyhow::Result<ChargeOutcome> {
        tracing::info!(%amount, method, "simulated charge approved");
        Ok(ChargeOutcome::Approved {
            transaction_id: new_transaction_id(),
        })
    }
}

/// Declines every charge.
pub struct DecliningGateway;

#[async_trait]
impl PaymentProvider for DecliningGateway {
    async fn charge(
        &self,
        method: &str,
        _details: &serde_json::Value,
        amount: Decimal,
    ) -> anyhow::Result<ChargeOutcome> {
        tracing::info!(%amount, method, "simulated charge declined");
        Ok(ChargeOutcome::Declined {
            reason: "card declined".to_string(),
        })
    }
}

pub fn new_transaction_id() -> String {
    format!("txn_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentDetails {
    pub method: String,
    pub details: serde_json::Value,
}

/// What the orchestrator decided to do at creation time.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentPlan {
    /// Nothing is charged now.
    Defer(PaymentStatus),
    Charge {
        kind: TransactionKind,
        amount: Decimal,
    },
}

/// Decides the up-front payment action. Runs before any mutation so a
/// missing-details error leaves no trace.
pub fn plan_payment(
    settings: &PaymentSettings,
    pricing: &PricingSnapshot,
    details: Option<&PaymentDetails>,
    requires_approval: bool,
) -> AppResult<PaymentPlan> {
    if pricing.total_amount <= Decimal::ZERO {
        return Ok(PaymentPlan::Defer(PaymentStatus::NotRequired));
    }

    // Cash on site.
    if !settings.accept_online_payment {
        return Ok(PaymentPlan::Defer(PaymentStatus::Pending));
    }

    if details.is_none() {
        if requires_approval {
            return Ok(PaymentPlan::Defer(PaymentStatus::Pending));
        }
        return Err(AppError::PaymentDetailsRequired);
    }

    if settings.deposit.enabled && pricing.deposit_amount > Decimal::ZERO {
        return Ok(PaymentPlan::Charge {
            kind: TransactionKind::Deposit,
            amount: pricing.deposit_amount,
        });
    }

    if !requires_approval {
        return Ok(PaymentPlan::Charge {
            kind: TransactionKind::FullPayment,
            amount: pricing.total_amount,
        });
    }

    Ok(PaymentPlan::Defer(PaymentStatus::Pending))
}

/// Carries out `plan` against the payment capability. A decline and a
/// transport error are both reported as `PaymentFailed`.
pub async fn execute_plan(
    provider: &dyn PaymentProvider,
    plan: &PaymentPlan,
    details: Option<&PaymentDetails>,
    now: DateTime<Utc>,
) -> AppResult<Payment> {
    let (kind, amount) = match plan {
        PaymentPlan::Defer(status) => {
            return Ok(Payment {
                status: *status,
                transactions: vec![],
            })
        }
        PaymentPlan::Charge { kind, amount } => (*kind, *amount),
    };

    let details = details.ok_or(AppError::PaymentDetailsRequired)?;

    let outcome = provider
        .charge(&details.method, &details.details, amount)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, %amount, "payment capability errored");
            AppError::PaymentFailed("payment could not be processed".to_string())
        })?;

    match outcome {
        ChargeOutcome::Approved { transaction_id } => {
            let status = match kind {
                TransactionKind::Deposit => PaymentStatus::DepositPaid,
                _ => PaymentStatus::FullyPaid,
            };
            Ok(Payment {
                status,
                transactions: vec![Transaction {
                    kind,
                    amount,
                    date: now,
                    status: TransactionStatus::Completed,
                    method: Some(details.method.clone()),
                    transaction_id,
                }],
            })
        }
        ChargeOutcome::Declined { reason } => {
            tracing::info!(%amount, reason = %reason, "payment declined");
            Err(AppError::PaymentFailed(reason))
        }
    }
}

/// Plans and executes in one step.
pub async fn resolve_payment(
    provider: &dyn PaymentProvider,
    settings: &PaymentSettings,
    pricing: &PricingSnapshot,
    details: Option<&PaymentDetails>,
    requires_approval: bool,
    now: DateTime<Utc>,
) -> AppResult<Payment> {
    let plan = plan_payment(settings, pricing, details, requires_approval)?;
    execute_plan(provider, &plan, details, now).await
}
