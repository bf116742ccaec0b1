//! Inventory ledger contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, ProductCode};
use domain::Money;
use resilience::Retryable;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::catalog::{ProductCatalog, ProductSnapshot};

/// Errors returned by an inventory ledger.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// No record exists for the product.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductCode),

    /// Available stock is short of the requested quantity.
    #[error("Insufficient stock for {product_code}: requested {requested}, available {available}")]
    InsufficientStock {
        product_code: ProductCode,
        requested: u32,
        available: u32,
    },

    /// Quantities must be positive.
    #[error("Invalid quantity for {product_code}: {quantity}")]
    InvalidQuantity {
        product_code: ProductCode,
        quantity: u32,
    },

    /// Confirm asked for more than is reserved.
    #[error("Cannot confirm {requested} of {product_code}: only {reserved} reserved")]
    ConfirmExceedsReserved {
        product_code: ProductCode,
        requested: u32,
        reserved: u32,
    },

    /// Cancel asked to release more than is reserved.
    #[error("Cannot cancel {requested} of {product_code}: only {reserved} reserved")]
    CancelExceedsReserved {
        product_code: ProductCode,
        requested: u32,
        reserved: u32,
    },

    /// Restock would overflow the stock counter.
    #[error("Stock overflow for {0}")]
    StockOverflow(ProductCode),

    /// The ledger could not be reached.
    #[error("Inventory unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into a record.
    #[error("Corrupt inventory record: {0}")]
    CorruptRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InventoryError {
    /// Returns true for expected business outcomes that end a saga without
    /// indicating anything is broken.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            InventoryError::UnknownProduct(_)
                | InventoryError::InsufficientStock { .. }
                | InventoryError::InvalidQuantity { .. }
        )
    }

    /// Returns true for callers breaking the reserve/confirm/cancel contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            InventoryError::ConfirmExceedsReserved { .. }
                | InventoryError::CancelExceedsReserved { .. }
                | InventoryError::StockOverflow(_)
                | InventoryError::CorruptRecord(_)
        )
    }
}

impl Retryable for InventoryError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::Unavailable(_) | InventoryError::Database(_)
        )
    }
}

/// Stock counters for one product.
///
/// `0 <= reserved_stock <= stock` holds after every operation; the methods
/// below refuse any change that would break it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_code: ProductCode,
    pub product_name: String,
    pub stock: u32,
    pub reserved_stock: u32,
    pub unit_price: Money,
}

impl InventoryRecord {
    /// Creates a record with nothing reserved.
    pub fn new(
        product_code: impl Into<ProductCode>,
        product_name: impl Into<String>,
        stock: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_code: product_code.into(),
            product_name: product_name.into(),
            stock,
            reserved_stock: 0,
            unit_price,
        }
    }

    /// Stock not earmarked by any reservation.
    pub fn available(&self) -> u32 {
        self.stock - self.reserved_stock
    }

    pub fn can_reserve(&self, quantity: u32) -> bool {
        self.available() >= quantity
    }

    /// Earmarks `quantity` units; leaves the record untouched on failure.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        self.check_quantity(quantity)?;
        if !self.can_reserve(quantity) {
            return Err(InventoryError::InsufficientStock {
                product_code: self.product_code.clone(),
                requested: quantity,
                available: self.available(),
            });
        }
        self.reserved_stock += quantity;
        Ok(())
    }

    /// Consumes `quantity` reserved units.
    pub fn confirm(&mut self, quantity: u32) -> Result<(), InventoryError> {
        self.check_quantity(quantity)?;
        if quantity > self.reserved_stock {
            return Err(InventoryError::ConfirmExceedsReserved {
                product_code: self.product_code.clone(),
                requested: quantity,
                reserved: self.reserved_stock,
            });
        }
        self.stock -= quantity;
        self.reserved_stock -= quantity;
        Ok(())
    }

    /// Releases `quantity` reserved units back to availability.
    pub fn cancel(&mut self, quantity: u32) -> Result<(), InventoryError> {
        self.check_quantity(quantity)?;
        if quantity > self.reserved_stock {
            return Err(InventoryError::CancelExceedsReserved {
                product_code: self.product_code.clone(),
                requested: quantity,
                reserved: self.reserved_stock,
            });
        }
        self.reserved_stock -= quantity;
        Ok(())
    }

    /// Adds stock and refreshes the catalog fields.
    pub fn restock(
        &mut self,
        product_name: String,
        unit_price: Money,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        self.stock = self
            .stock
            .checked_add(quantity)
            .ok_or_else(|| InventoryError::StockOverflow(self.product_code.clone()))?;
        self.product_name = product_name;
        self.unit_price = unit_price;
        Ok(())
    }

    fn check_quantity(&self, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_code: self.product_code.clone(),
                quantity,
            });
        }
        Ok(())
    }
}

/// Reply to a reservation request.
///
/// Business rejections are replies, not errors, so that retries and the
/// circuit breaker only ever see infrastructure failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReserveReply {
    Reserved { quantity: u32 },
    Rejected { reason: String },
    Unavailable { reason: String },
}

impl ReserveReply {
    /// Splits a ledger result into a reply, passing transient errors through.
    pub fn from_result(
        quantity: u32,
        result: Result<(), InventoryError>,
    ) -> Result<Self, InventoryError> {
        match result {
            Ok(()) => Ok(ReserveReply::Reserved { quantity }),
            Err(err) if err.is_rejection() => Ok(ReserveReply::Rejected {
                reason: err.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ReserveReply::Reserved { .. })
    }

    pub fn quantity_reserved(&self) -> Option<u32> {
        match self {
            ReserveReply::Reserved { quantity } => Some(*quantity),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ReserveReply::Reserved { quantity } => format!("Reserved {quantity} unit(s)"),
            ReserveReply::Rejected { reason } | ReserveReply::Unavailable { reason } => {
                reason.clone()
            }
        }
    }
}

/// Per-product stock ledger.
///
/// Operations on one product are linearizable; there is no cross-product
/// transaction. `order_id` identifies the caller for logging only.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Returns true if `quantity` units are currently available.
    async fn can_reserve(
        &self,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<bool, InventoryError>;

    /// Earmarks stock for an order.
    async fn reserve(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError>;

    /// Consumes previously reserved stock.
    async fn confirm(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError>;

    /// Releases previously reserved stock.
    async fn cancel(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError>;

    /// Creates the product or adds stock to it, refreshing name and price.
    async fn restock(
        &self,
        product_code: &ProductCode,
        product_name: &str,
        unit_price: Money,
        quantity: u32,
    ) -> Result<InventoryRecord, InventoryError>;

    /// Loads the current counters for a product.
    async fn record(
        &self,
        product_code: &ProductCode,
    ) -> Result<Option<InventoryRecord>, InventoryError>;
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_reserve: AtomicBool,
    fail_on_confirm: AtomicBool,
    fail_on_cancel: AtomicBool,
    reserve_delay: std::sync::Mutex<Option<Duration>>,
    reserve_calls: AtomicUsize,
    confirm_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

/// In-memory inventory ledger.
///
/// Each product record sits behind its own mutex, so operations on one
/// product serialize while different products proceed in parallel.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryLedger {
    records: Arc<RwLock<HashMap<ProductCode, Arc<Mutex<InventoryRecord>>>>>,
    faults: Arc<Faults>,
}

impl InMemoryInventoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with records.
    pub fn with_records(records: impl IntoIterator<Item = InventoryRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.product_code.clone(), Arc::new(Mutex::new(record))))
            .collect();
        Self {
            records: Arc::new(RwLock::new(records)),
            faults: Arc::default(),
        }
    }

    /// Makes reserve calls fail as unavailable.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.faults.fail_on_reserve.store(fail, Ordering::SeqCst);
    }

    /// Makes confirm calls fail as unavailable.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.faults.fail_on_confirm.store(fail, Ordering::SeqCst);
    }

    /// Makes cancel calls fail as unavailable.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.faults.fail_on_cancel.store(fail, Ordering::SeqCst);
    }

    /// Delays every reserve call.
    pub fn set_reserve_delay(&self, delay: Option<Duration>) {
        *self
            .faults
            .reserve_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of reserve calls received, including failed ones.
    pub fn reserve_calls(&self) -> usize {
        self.faults.reserve_calls.load(Ordering::SeqCst)
    }

    /// Number of confirm calls received.
    pub fn confirm_calls(&self) -> usize {
        self.faults.confirm_calls.load(Ordering::SeqCst)
    }

    /// Number of cancel calls received.
    pub fn cancel_calls(&self) -> usize {
        self.faults.cancel_calls.load(Ordering::SeqCst)
    }

    async fn entry(
        &self,
        product_code: &ProductCode,
    ) -> Result<Arc<Mutex<InventoryRecord>>, InventoryError> {
        self.records
            .read()
            .await
            .get(product_code)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownProduct(product_code.clone()))
    }

    fn injected(flag: &AtomicBool, operation: &str) -> Result<(), InventoryError> {
        if flag.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable(format!(
                "{operation} failure injected"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn can_reserve(
        &self,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<bool, InventoryError> {
        let entry = self.entry(product_code).await?;
        let record = entry.lock().await;
        Ok(record.can_reserve(quantity))
    }

    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        self.faults.reserve_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .faults
            .reserve_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::injected(&self.faults.fail_on_reserve, "reserve")?;

        let entry = self.entry(product_code).await?;
        let mut record = entry.lock().await;
        record.reserve(quantity)?;
        tracing::debug!(
            reserved = record.reserved_stock,
            available = record.available(),
            "stock reserved"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn confirm(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        self.faults.confirm_calls.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.faults.fail_on_confirm, "confirm")?;

        let entry = self.entry(product_code).await?;
        let mut record = entry.lock().await;
        record.confirm(quantity).inspect_err(|err| {
            tracing::error!(error = %err, "inventory contract violation");
        })
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(
        &self,
        order_id: OrderId,
        product_code: &ProductCode,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        self.faults.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.faults.fail_on_cancel, "cancel")?;

        let entry = self.entry(product_code).await?;
        let mut record = entry.lock().await;
        record.cancel(quantity).inspect_err(|err| {
            tracing::error!(error = %err, "inventory contract violation");
        })
    }

    async fn restock(
        &self,
        product_code: &ProductCode,
        product_name: &str,
        unit_price: Money,
        quantity: u32,
    ) -> Result<InventoryRecord, InventoryError> {
        let entry = {
            let mut records = self.records.write().await;
            records
                .entry(product_code.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(InventoryRecord::new(
                        product_code.clone(),
                        product_name,
                        0,
                        unit_price,
                    )))
                })
                .clone()
        };

        let mut record = entry.lock().await;
        record.restock(product_name.to_string(), unit_price, quantity)?;
        Ok(record.clone())
    }

    async fn record(
        &self,
        product_code: &ProductCode,
    ) -> Result<Option<InventoryRecord>, InventoryError> {
        let entry = self.records.read().await.get(product_code).cloned();
        match entry {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryInventoryLedger {
    async fn product(
        &self,
        product_code: &ProductCode,
    ) -> Result<Option<ProductSnapshot>, InventoryError> {
        Ok(self
            .record(product_code)
            .await?
            .map(|record| ProductSnapshot::from(&record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(stock: u32) -> InventoryRecord {
        InventoryRecord::new("SKU-001", "Widget", stock, Money::from_cents(1000))
    }

    fn assert_invariant(record: &InventoryRecord) {
        assert!(record.reserved_stock <= record.stock, "{record:?}");
    }

    #[test]
    fn test_record_reserve_confirm_cancel() {
        let mut record = widget(10);
        record.reserve(4).unwrap();
        assert_eq!(record.available(), 6);

        record.confirm(3).unwrap();
        assert_eq!((record.stock, record.reserved_stock), (7, 1));

        record.cancel(1).unwrap();
        assert_eq!((record.stock, record.reserved_stock), (7, 0));
    }

    #[test]
    fn test_record_rejects_over_reservation_without_mutation() {
        let mut record = widget(3);
        let err = record.reserve(4).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(record, widget(3));
    }

    #[test]
    fn test_record_contract_violations() {
        let mut record = widget(10);
        record.reserve(2).unwrap();

        let err = record.confirm(3).unwrap_err();
        assert!(err.is_contract_violation());
        assert!(!err.is_retryable());

        let err = record.cancel(3).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::CancelExceedsReserved { reserved: 2, .. }
        ));
        assert_eq!(record.reserved_stock, 2);
    }

    #[test]
    fn test_invariant_holds_for_mixed_sequence() {
        let mut record = widget(5);
        let ops: [(&str, u32); 10] = [
            ("reserve", 3),
            ("reserve", 3),
            ("confirm", 2),
            ("cancel", 2),
            ("reserve", 4),
            ("confirm", 5),
            ("cancel", 1),
            ("reserve", 1),
            ("confirm", 4),
            ("cancel", 0),
        ];
        for (op, qty) in ops {
            let _ = match op {
                "reserve" => record.reserve(qty),
                "confirm" => record.confirm(qty),
                _ => record.cancel(qty),
            };
            assert_invariant(&record);
        }
    }

    #[test]
    fn test_reply_classification() {
        let reply = ReserveReply::from_result(2, Ok(())).unwrap();
        assert!(reply.success());
        assert_eq!(reply.quantity_reserved(), Some(2));

        let reply = ReserveReply::from_result(
            2,
            Err(InventoryError::UnknownProduct(ProductCode::new("NOPE"))),
        )
        .unwrap();
        assert!(!reply.success());
        assert_eq!(reply.message(), "Unknown product: NOPE");

        let err =
            ReserveReply::from_result(2, Err(InventoryError::Unavailable("down".into())))
                .unwrap_err();
        assert!(err.is_retryable());
    }

    // Scenario: reserve 5 of 10, then 6 more.
    #[tokio::test]
    async fn test_second_reservation_exceeding_availability_fails() {
        let ledger = InMemoryInventoryLedger::with_records([widget(10)]);
        let code = ProductCode::new("SKU-001");

        ledger.reserve(OrderId::new(), &code, 5).await.unwrap();
        let err = ledger.reserve(OrderId::new(), &code, 6).await.unwrap_err();

        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                requested: 6,
                available: 5,
                ..
            }
        ));
        let record = ledger.record(&code).await.unwrap().unwrap();
        assert_eq!(record.reserved_stock, 5);
        assert!(ledger.can_reserve(&code, 5).await.unwrap());
        assert!(!ledger.can_reserve(&code, 6).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let ledger = InMemoryInventoryLedger::new();
        let err = ledger
            .reserve(OrderId::new(), &ProductCode::new("SKU-404"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::UnknownProduct(_)));
        assert!(ledger.record(&ProductCode::new("SKU-404")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restock_creates_then_adds() {
        let ledger = InMemoryInventoryLedger::new();
        let code = ProductCode::new("SKU-009");

        let record = ledger
            .restock(&code, "Sprocket", Money::from_cents(250), 4)
            .await
            .unwrap();
        assert_eq!(record.stock, 4);

        ledger.reserve(OrderId::new(), &code, 3).await.unwrap();
        let record = ledger
            .restock(&code, "Sprocket v2", Money::from_cents(300), 6)
            .await
            .unwrap();
        assert_eq!((record.stock, record.reserved_stock), (10, 3));
        assert_eq!(record.product_name, "Sprocket v2");

        let snapshot = ledger.product(&code).await.unwrap().unwrap();
        assert_eq!(snapshot.unit_price, Money::from_cents(300));
    }

    #[tokio::test]
    async fn test_fail_on_reserve_is_retryable_and_counted() {
        let ledger = InMemoryInventoryLedger::with_records([widget(10)]);
        ledger.set_fail_on_reserve(true);

        let err = ledger
            .reserve(OrderId::new(), &ProductCode::new("SKU-001"), 1)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ledger.reserve_calls(), 1);

        let record = ledger.record(&ProductCode::new("SKU-001")).await.unwrap().unwrap();
        assert_eq!(record.reserved_stock, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() {
        let ledger = InMemoryInventoryLedger::with_records([widget(10)]);
        let code = ProductCode::new("SKU-001");

        let mut handles = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(OrderId::new(), &code, 1).await.is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        let record = ledger.record(&code).await.unwrap().unwrap();
        assert_eq!(record.reserved_stock, 10);
        assert_eq!(record.available(), 0);
    }
}
