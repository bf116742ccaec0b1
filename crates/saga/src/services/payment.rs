//! Payment processor contract, settlement policies, and in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::Money;
use rand::Rng;
use resilience::Retryable;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors returned by a payment processor.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// No payment exists for the order.
    #[error("Payment not found for order {0}")]
    NotFound(OrderId),

    /// The payment is not in a status that allows the operation.
    #[error("Payment for order {order_id} is {status}; cannot {action}")]
    IllegalState {
        order_id: OrderId,
        status: PaymentStatus,
        action: &'static str,
    },

    /// The processor could not be reached.
    #[error("Payment processor unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into a record.
    #[error("Corrupt payment record: {0}")]
    CorruptRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PaymentError {
    /// Returns true for callers breaking the processor's state contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PaymentError::IllegalState { .. } | PaymentError::CorruptRecord(_)
        )
    }
}

impl Retryable for PaymentError {
    fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Unavailable(_) | PaymentError::Database(_))
    }
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    BankTransfer,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::DebitCard => "DEBIT_CARD",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Wallet => "WALLET",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREDIT_CARD" => Ok(PaymentMethod::CreditCard),
            "DEBIT_CARD" => Ok(PaymentMethod::DebitCard),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "WALLET" => Ok(PaymentMethod::Wallet),
            _ => Err(format!("unknown payment method: {s}")),
        }
    }
}

/// Lifecycle of a payment record.
///
/// ```text
/// Processing ──┬──► Completed ──► Refunded
///              └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Decision of a settlement policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Approved,
    Declined(String),
}

/// The payment record kept per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Set only once the payment completed.
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates a record in `Processing`.
    pub fn processing(
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id,
            amount,
            method,
            status: PaymentStatus::Processing,
            transaction_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a settlement decision to a `Processing` record.
    pub fn settle(&mut self, settlement: Settlement) -> Result<PaymentOutcome, PaymentError> {
        if self.status != PaymentStatus::Processing {
            return Err(PaymentError::IllegalState {
                order_id: self.order_id,
                status: self.status,
                action: "settle",
            });
        }

        self.updated_at = Utc::now();
        match settlement {
            Settlement::Approved => {
                let transaction_ref = new_transaction_ref();
                self.status = PaymentStatus::Completed;
                self.transaction_ref = Some(transaction_ref.clone());
                Ok(PaymentOutcome::Success { transaction_ref })
            }
            Settlement::Declined(reason) => {
                self.status = PaymentStatus::Failed;
                Ok(PaymentOutcome::Rejected { reason })
            }
        }
    }

    /// Moves a completed payment to `Refunded`.
    pub fn refund(&mut self) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Completed {
            return Err(PaymentError::IllegalState {
                order_id: self.order_id,
                status: self.status,
                action: "refund",
            });
        }
        self.status = PaymentStatus::Refunded;
        self.updated_at = Utc::now();
        Ok(())
    }
}

pub(crate) fn new_transaction_ref() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("TXN-{}", id[..12].to_uppercase())
}

/// Result of a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success { transaction_ref: String },
    Rejected { reason: String },
}

impl PaymentOutcome {
    /// The rejection returned when the order already has a payment.
    pub fn duplicate(order_id: OrderId, status: PaymentStatus) -> Self {
        PaymentOutcome::Rejected {
            reason: format!("Duplicate payment: order {order_id} already has a {status} payment"),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        PaymentOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, PaymentOutcome::Success { .. })
    }

    pub fn transaction_ref(&self) -> Option<&str> {
        match self {
            PaymentOutcome::Success { transaction_ref } => Some(transaction_ref),
            PaymentOutcome::Rejected { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            PaymentOutcome::Success { .. } => "Payment processed successfully".to_string(),
            PaymentOutcome::Rejected { reason } => reason.clone(),
        }
    }
}

/// Decides whether a charge settles.
pub trait SettlementPolicy: Send + Sync + std::fmt::Debug {
    fn settle(&self, amount: Money, method: PaymentMethod) -> Settlement;
}

/// Approves every charge.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl SettlementPolicy for ApproveAll {
    fn settle(&self, _amount: Money, _method: PaymentMethod) -> Settlement {
        Settlement::Approved
    }
}

/// Declines every charge with a fixed reason.
#[derive(Debug, Clone)]
pub struct DeclineAll {
    pub reason: String,
}

impl DeclineAll {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl SettlementPolicy for DeclineAll {
    fn settle(&self, _amount: Money, _method: PaymentMethod) -> Settlement {
        Settlement::Declined(self.reason.clone())
    }
}

/// Declines charges above a limit.
#[derive(Debug, Clone, Copy)]
pub struct AmountLimit {
    pub limit: Money,
}

impl SettlementPolicy for AmountLimit {
    fn settle(&self, amount: Money, _method: PaymentMethod) -> Settlement {
        if amount > self.limit {
            Settlement::Declined(format!("Amount {amount} exceeds limit {}", self.limit))
        } else {
            Settlement::Approved
        }
    }
}

/// Approves charges with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalRate {
    /// Probability in `[0.0, 1.0]`.
    pub rate: f64,
}

impl SettlementPolicy for ApprovalRate {
    fn settle(&self, _amount: Money, _method: PaymentMethod) -> Settlement {
        if rand::thread_rng().gen_bool(self.rate.clamp(0.0, 1.0)) {
            Settlement::Approved
        } else {
            Settlement::Declined("Payment declined by issuer".to_string())
        }
    }
}

/// Per-order payment processing.
///
/// At most one record exists per order. A second request for the same order
/// is rejected as a duplicate whatever the existing record's status.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Charges an order.
    async fn process_payment(
        &self,
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<PaymentOutcome, PaymentError>;

    /// Refunds a completed payment.
    async fn refund_payment(&self, order_id: OrderId) -> Result<(), PaymentError>;

    /// Loads the payment record for an order.
    async fn payment(&self, order_id: OrderId) -> Result<Option<PaymentRecord>, PaymentError>;
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_process: AtomicBool,
    fail_on_refund: AtomicBool,
    settlement_delay: std::sync::Mutex<Option<Duration>>,
    process_calls: AtomicUsize,
    refund_calls: AtomicUsize,
}

/// In-memory payment processor.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentProcessor {
    payments: Arc<Mutex<HashMap<OrderId, PaymentRecord>>>,
    policy: Arc<dyn SettlementPolicy>,
    faults: Arc<Faults>,
}

impl Default for InMemoryPaymentProcessor {
    fn default() -> Self {
        Self::with_policy(ApproveAll)
    }
}

impl InMemoryPaymentProcessor {
    /// Creates a processor that approves every charge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a processor with the given settlement policy.
    pub fn with_policy(policy: impl SettlementPolicy + 'static) -> Self {
        Self {
            payments: Arc::default(),
            policy: Arc::new(policy),
            faults: Arc::default(),
        }
    }

    /// Makes process calls fail as unavailable before any record is written.
    pub fn set_fail_on_process(&self, fail: bool) {
        self.faults.fail_on_process.store(fail, Ordering::SeqCst);
    }

    /// Makes refund calls fail as unavailable.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.faults.fail_on_refund.store(fail, Ordering::SeqCst);
    }

    /// Delays settlement while the record sits in `Processing`.
    pub fn set_settlement_delay(&self, delay: Option<Duration>) {
        *self
            .faults
            .settlement_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn process_calls(&self) -> usize {
        self.faults.process_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.faults.refund_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of payment records.
    pub async fn payment_count(&self) -> usize {
        self.payments.lock().await.len()
    }

    /// Returns the number of records with the given status.
    pub async fn count_with_status(&self, status: PaymentStatus) -> usize {
        self.payments
            .lock()
            .await
            .values()
            .filter(|record| record.status == status)
            .count()
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    #[tracing::instrument(skip(self))]
    async fn process_payment(
        &self,
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<PaymentOutcome, PaymentError> {
        self.faults.process_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_on_process.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable(
                "process failure injected".to_string(),
            ));
        }
        if amount.is_negative() {
            return Ok(PaymentOutcome::rejected(format!("Invalid amount {amount}")));
        }

        {
            let mut payments = self.payments.lock().await;
            if let Some(existing) = payments.get(&order_id) {
                tracing::warn!(status = %existing.status, "duplicate payment request");
                metrics::counter!("payment_duplicates_total").increment(1);
                return Ok(PaymentOutcome::duplicate(order_id, existing.status));
            }
            payments.insert(
                order_id,
                PaymentRecord::processing(order_id, user_id, amount, method),
            );
        }

        let delay = *self
            .faults
            .settlement_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let settlement = self.policy.settle(amount, method);

        let mut payments = self.payments.lock().await;
        let record = payments
            .get_mut(&order_id)
            .ok_or(PaymentError::NotFound(order_id))?;
        let outcome = record.settle(settlement)?;
        tracing::info!(status = %record.status, "payment settled");
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn refund_payment(&self, order_id: OrderId) -> Result<(), PaymentError> {
        self.faults.refund_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_on_refund.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable(
                "refund failure injected".to_string(),
            ));
        }

        let mut payments = self.payments.lock().await;
        let record = payments
            .get_mut(&order_id)
            .ok_or(PaymentError::NotFound(order_id))?;
        record.refund().inspect_err(|err| {
            tracing::error!(error = %err, "payment contract violation");
        })
    }

    async fn payment(&self, order_id: OrderId) -> Result<Option<PaymentRecord>, PaymentError> {
        Ok(self.payments.lock().await.get(&order_id).cloned())
    }
}
