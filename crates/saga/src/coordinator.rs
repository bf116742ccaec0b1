//! Saga coordinator for the order creation saga.

use std::sync::Arc;

use common::{OrderId, ProductCode, UserId};
use domain::{Order, OrderError, OrderLine, OrderStatus, OrderStore};
use resilience::{CircuitBreaker, FaultEnvelope};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::execution::SagaExecution;
use crate::outcome::{CompensationFailure, SagaFailure, SagaOutcome};
use crate::services::{
    InventoryError, InventoryLedger, PaymentMethod, PaymentOutcome, PaymentProcessor,
    ProductCatalog, ReserveReply,
};
use crate::step::{
    SAGA_TYPE, STEP_INVENTORY_CONFIRM, STEP_INVENTORY_RESERVE, STEP_PAYMENT, STEP_PERSIST_ORDER,
    SagaStep,
};

/// One requested line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_code: ProductCode,
    pub quantity: u32,
}

impl OrderItem {
    pub fn new(product_code: impl Into<ProductCode>, quantity: u32) -> Self {
        Self {
            product_code: product_code.into(),
            quantity,
        }
    }
}

/// Orchestrates the order creation saga.
///
/// The coordinator drives a 3-step saga (reserve inventory → charge payment
/// → confirm inventory). A failure before confirmation undoes the completed
/// steps in reverse order and marks the order `FAILED`. Every remote call
/// goes through its own [`FaultEnvelope`], and the saga as a whole sits
/// behind a circuit breaker that trips on systemic failures.
///
/// Clones share the collaborators and every breaker. Each execution runs on
/// its own task and reaches `COMPLETED` or `FAILED` even if the caller stops
/// waiting for it.
pub struct SagaCoordinator<O, I, P>
where
    O: OrderStore,
    I: InventoryLedger + ProductCatalog,
    P: PaymentProcessor,
{
    orders: Arc<O>,
    inventory: Arc<I>,
    payment: Arc<P>,
    reserve_envelope: FaultEnvelope,
    payment_envelope: FaultEnvelope,
    confirm_envelope: FaultEnvelope,
    compensation_envelope: FaultEnvelope,
    saga_breaker: Arc<CircuitBreaker>,
}

impl<O, I, P> Clone for SagaCoordinator<O, I, P>
where
    O: OrderStore,
    I: InventoryLedger + ProductCatalog,
    P: PaymentProcessor,
{
    fn clone(&self) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
            inventory: Arc::clone(&self.inventory),
            payment: Arc::clone(&self.payment),
            reserve_envelope: self.reserve_envelope.clone(),
            payment_envelope: self.payment_envelope.clone(),
            confirm_envelope: self.confirm_envelope.clone(),
            compensation_envelope: self.compensation_envelope.clone(),
            saga_breaker: Arc::clone(&self.saga_breaker),
        }
    }
}

impl<O, I, P> SagaCoordinator<O, I, P>
where
    O: OrderStore + 'static,
    I: InventoryLedger + ProductCatalog + 'static,
    P: PaymentProcessor + 'static,
{
    /// Creates a coordinator with the default envelope settings.
    pub fn new(orders: O, inventory: I, payment: P) -> Self {
        Self::with_config(orders, inventory, payment, SagaConfig::default())
    }

    /// Creates a coordinator with explicit envelope settings.
    pub fn with_config(orders: O, inventory: I, payment: P, config: SagaConfig) -> Self {
        Self {
            orders: Arc::new(orders),
            inventory: Arc::new(inventory),
            payment: Arc::new(payment),
            reserve_envelope: FaultEnvelope::new("inventory.reserve", config.reserve),
            payment_envelope: FaultEnvelope::new("payment.process", config.payment),
            confirm_envelope: FaultEnvelope::new("inventory.confirm", config.confirm),
            compensation_envelope: FaultEnvelope::new("saga.compensate", config.compensation),
            saga_breaker: Arc::new(CircuitBreaker::new("saga.execute", config.saga_breaker)),
        }
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn payment(&self) -> &P {
        &self.payment
    }

    /// Returns the breaker guarding whole saga executions.
    pub fn saga_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.saga_breaker
    }

    /// Validates a request, snapshots product names and prices, stores the
    /// `PENDING` order, and runs the saga for it.
    #[tracing::instrument(skip(self, items), fields(saga_type = SAGA_TYPE, items = items.len()))]
    pub async fn place_order(
        &self,
        user_id: UserId,
        items: Vec<OrderItem>,
        payment_method: PaymentMethod,
    ) -> Result<SagaOutcome> {
        if items.is_empty() {
            return Err(OrderError::NoItems.into());
        }

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_code: item.product_code.to_string(),
                    quantity: item.quantity,
                }
                .into());
            }
            let product = self
                .inventory
                .product(&item.product_code)
                .await
                .map_err(SagaError::Catalog)?
                .ok_or(SagaError::UnknownProduct(item.product_code))?;
            lines.push(OrderLine::new(
                product.product_code,
                product.product_name,
                item.quantity,
                product.unit_price,
            ));
        }

        let order = Order::new(user_id, lines)?;
        self.orders.insert(&order).await?;
        tracing::info!(order_id = %order.id(), total = %order.total_amount(), "order created");

        self.execute_saga(order, payment_method).await
    }

    /// Runs the saga for a stored `PENDING` order.
    ///
    /// Business rejections and unavailable collaborators produce a failed
    /// [`SagaOutcome`] after compensation. Only store failures and a failed
    /// confirmation after payment are returned as errors.
    ///
    /// The saga runs on a spawned task. Dropping the returned future stops
    /// waiting for the result but not the saga.
    #[tracing::instrument(skip(self, order), fields(saga_type = SAGA_TYPE, order_id = %order.id()))]
    pub async fn execute_saga(
        &self,
        order: Order,
        payment_method: PaymentMethod,
    ) -> Result<SagaOutcome> {
        if order.status() != OrderStatus::Pending {
            return Err(SagaError::Transition(OrderError::InvalidStatusTransition {
                current_status: order.status(),
                action: "execute saga",
            }));
        }

        let order_id = order.id();
        let coordinator = self.clone();
        tokio::spawn(
            async move { coordinator.drive(order, payment_method).await }.in_current_span(),
        )
        .await
        .map_err(|err| {
            tracing::error!(%order_id, error = %err, "saga task did not finish");
            SagaError::Interrupted {
                order_id,
                reason: err.to_string(),
            }
        })?
    }

    /// Loads an order by ID.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.get(order_id).await?)
    }

    /// Lists a user's orders, oldest first.
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.orders.list_by_user(user_id).await?)
    }

    async fn drive(&self, order: Order, payment_method: PaymentMethod) -> Result<SagaOutcome> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        let Some(permit) = self.saga_breaker.try_acquire() else {
            return self.short_circuit(order).await;
        };

        let result = self.run(order, payment_method).await;
        match &result {
            Ok(outcome) if outcome.failure.as_ref().is_some_and(SagaFailure::is_systemic) => {
                permit.record_failure()
            }
            Ok(_) => permit.record_success(),
            Err(_) => permit.record_failure(),
        }

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, mut order: Order, payment_method: PaymentMethod) -> Result<SagaOutcome> {
        let order_id = order.id();
        let mut execution = SagaExecution::start(order_id);

        // 1. Reserve every line
        tracing::info!(step = STEP_INVENTORY_RESERVE, "saga step started");
        let mut failure = None;
        for line in order.lines() {
            match self.reserve_line(order_id, line).await {
                Ok(()) => execution.record_reservation(line.product_code.clone(), line.quantity)?,
                Err(reason) => {
                    failure = Some(reason);
                    break;
                }
            }
        }
        if let Some(failure) = failure {
            return self.compensate(order, execution, failure).await;
        }

        // 2. Persist INVENTORY_RESERVED
        execution.begin_payment()?;
        order
            .mark_inventory_reserved()
            .map_err(SagaError::Transition)?;
        self.persist(&order, &mut execution).await?;

        // 3. Charge the order total
        tracing::info!(step = STEP_PAYMENT, total = %order.total_amount(), "saga step started");
        match self.charge(&order, payment_method).await {
            Ok(transaction_ref) => execution.record_payment(transaction_ref)?,
            Err(failure) => return self.compensate(order, execution, failure).await,
        }

        // 4. Persist PAYMENT_PROCESSING
        order
            .mark_payment_processing()
            .map_err(SagaError::Transition)?;
        self.persist(&order, &mut execution).await?;

        // 5. Confirm every reservation; never compensated
        execution.begin_confirmation()?;
        tracing::info!(step = STEP_INVENTORY_CONFIRM, "saga step started");
        for line in order.lines() {
            let confirmed = self
                .confirm_envelope
                .call(|| {
                    self.inventory
                        .confirm(order_id, &line.product_code, line.quantity)
                })
                .await;

            if let Err(err) = confirmed {
                execution.mark_inconsistent()?;
                metrics::counter!("saga_confirm_inconsistencies_total").increment(1);
                tracing::error!(
                    %order_id,
                    product_code = %line.product_code,
                    transaction_ref = ?execution.transaction_ref(),
                    error = %err,
                    "inventory confirmation failed after payment; order left in PAYMENT_PROCESSING"
                );
                return Err(SagaError::ConfirmFailed {
                    order_id,
                    product_code: line.product_code.clone(),
                    reason: err.to_string(),
                });
            }
        }

        // 6. Persist COMPLETED
        order.complete().map_err(SagaError::Transition)?;
        self.orders.update_status(&order).await?;
        execution.complete()?;

        metrics::counter!("saga_completed").increment(1);
        tracing::info!(%order_id, total = %order.total_amount(), "saga completed successfully");
        Ok(SagaOutcome::completed(order))
    }

    async fn reserve_line(
        &self,
        order_id: OrderId,
        line: &OrderLine,
    ) -> std::result::Result<(), SagaFailure> {
        let reply = self
            .reserve_envelope
            .call_with_fallback(
                || self.try_reserve(order_id, line),
                |err| ReserveReply::Unavailable {
                    reason: err.to_string(),
                },
            )
            .await;

        match reply {
            ReserveReply::Reserved { .. } => Ok(()),
            ReserveReply::Rejected { reason } => Err(SagaFailure::ReservationRejected {
                product_code: line.product_code.to_string(),
                reason,
            }),
            ReserveReply::Unavailable { reason } => Err(SagaFailure::Unavailable {
                step: STEP_INVENTORY_RESERVE,
                reason,
            }),
        }
    }

    async fn try_reserve(
        &self,
        order_id: OrderId,
        line: &OrderLine,
    ) -> std::result::Result<ReserveReply, InventoryError> {
        let result = self
            .inventory
            .reserve(order_id, &line.product_code, line.quantity)
            .await;
        ReserveReply::from_result(line.quantity, result)
    }

    async fn charge(
        &self,
        order: &Order,
        payment_method: PaymentMethod,
    ) -> std::result::Result<String, SagaFailure> {
        let result = self
            .payment_envelope
            .call(|| {
                self.payment.process_payment(
                    order.id(),
                    order.user_id(),
                    order.total_amount(),
                    payment_method,
                )
            })
            .await;

        match result {
            Ok(PaymentOutcome::Success { transaction_ref }) => Ok(transaction_ref),
            Ok(PaymentOutcome::Rejected { reason }) => {
                Err(SagaFailure::PaymentRejected { reason })
            }
            Err(err) => Err(SagaFailure::Unavailable {
                step: STEP_PAYMENT,
                reason: err.to_string(),
            }),
        }
    }

    /// Persists a status change made before confirmation. If the store fails,
    /// the completed steps are undone before the error is returned.
    async fn persist(&self, order: &Order, execution: &mut SagaExecution) -> Result<()> {
        let Err(source) = self.orders.update_status(order).await else {
            return Ok(());
        };

        tracing::error!(order_id = %order.id(), error = %source, "failed to persist order status");
        execution.begin_compensation(SagaFailure::Unavailable {
            step: STEP_PERSIST_ORDER,
            reason: source.to_string(),
        })?;
        let (compensated, compensation_failures) = self.run_compensation(execution).await;
        execution.finish_failed()?;

        metrics::counter!("saga_failed").increment(1);
        Err(SagaError::PersistFailed {
            order_id: order.id(),
            source,
            compensated,
            compensation_failures,
        })
    }

    async fn compensate(
        &self,
        mut order: Order,
        mut execution: SagaExecution,
        failure: SagaFailure,
    ) -> Result<SagaOutcome> {
        tracing::warn!(
            order_id = %order.id(),
            reason = %failure,
            completed_steps = execution.completed_steps().len(),
            "saga step failed, compensating"
        );
        execution.begin_compensation(failure.clone())?;
        let (compensated, compensation_failures) = self.run_compensation(&execution).await;
        execution.finish_failed()?;

        order.fail().map_err(SagaError::Transition)?;
        self.orders.update_status(&order).await?;

        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(order_id = %order.id(), reason = %failure, "saga failed");
        Ok(SagaOutcome::failed(
            order,
            failure,
            compensated,
            compensation_failures,
        ))
    }

    /// Undoes completed steps most recent first. Each action is attempted
    /// regardless of earlier failures.
    #[tracing::instrument(skip(self, execution), fields(order_id = %execution.order_id()))]
    async fn run_compensation(
        &self,
        execution: &SagaExecution,
    ) -> (Vec<SagaStep>, Vec<CompensationFailure>) {
        let order_id = execution.order_id();
        let mut compensated = Vec::new();
        let mut failures = Vec::new();

        for step in execution.compensation_plan() {
            let result = match step {
                SagaStep::Payment { order_id } => self
                    .compensation_envelope
                    .call(|| self.payment.refund_payment(*order_id))
                    .await
                    .map_err(|err| err.to_string()),
                SagaStep::InventoryReserve {
                    product_code,
                    quantity,
                } => self
                    .compensation_envelope
                    .call(|| self.inventory.cancel(order_id, product_code, *quantity))
                    .await
                    .map_err(|err| err.to_string()),
            };

            match result {
                Ok(()) => {
                    tracing::info!(%step, "compensation step completed");
                    compensated.push(step.clone());
                }
                Err(reason) => {
                    tracing::warn!(%step, %reason, "compensation step failed");
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    failures.push(CompensationFailure {
                        step: step.clone(),
                        reason,
                    });
                }
            }
        }

        (compensated, failures)
    }

    async fn short_circuit(&self, mut order: Order) -> Result<SagaOutcome> {
        metrics::counter!("saga_short_circuited").increment(1);
        tracing::warn!(
            order_id = %order.id(),
            breaker = %self.saga_breaker.name(),
            "saga breaker open, failing order without calling collaborators"
        );

        order.fail().map_err(SagaError::Transition)?;
        self.orders.update_status(&order).await?;

        metrics::counter!("saga_failed").increment(1);
        Ok(SagaOutcome::failed(
            order,
            SagaFailure::ShortCircuited,
            Vec::new(),
            Vec::new(),
        ))
    }
}
