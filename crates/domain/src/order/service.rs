//! Order service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use outbox::InMemoryOutboxStore;
use tokio::sync::RwLock;

use crate::error::{DomainError, Result};
use crate::event::DomainEvent;

use super::{CreateOrder, Order, OrderEvent};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    by_saga: HashMap<SagaId, OrderId>,
}

/// Service for managing orders.
///
/// Each change is committed together with its outbox event.
#[derive(Clone)]
pub struct OrderService {
    state: Arc<RwLock<State>>,
    outbox: InMemoryOutboxStore,
}

impl OrderService {
    pub fn new(outbox: InMemoryOutboxStore) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            outbox,
        }
    }

    /// Creates a pending order, or returns the one this saga already created.
    #[tracing::instrument(skip(self), fields(saga_id = %cmd.saga_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .by_saga
            .get(&cmd.saga_id)
            .and_then(|id| state.orders.get(id))
        {
            tracing::debug!(order_id = %existing.id, "order already created for saga");
            return Ok(existing.clone());
        }

        let (order, event) = Order::create(&cmd, Utc::now())?;
        let record = event.to_outbox()?;
        let order = self
            .outbox
            .transaction(|tx| {
                tx.stage(record);
                state.by_saga.insert(order.saga_id.clone(), order.id);
                state.orders.insert(order.id, order.clone());
                Ok::<_, DomainError>(order)
            })
            .await?;
        tracing::info!(order_id = %order.id, order_number = %order.order_number, "order created");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.state
            .read()
            .await
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(DomainError::OrderNotFound(order_id))
    }

    /// Looks up the order a saga created.
    pub async fn find_by_saga(&self, saga_id: &SagaId) -> Option<Order> {
        let state = self.state.read().await;
        state
            .by_saga
            .get(saga_id)
            .and_then(|id| state.orders.get(id))
            .cloned()
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm_order(&self, order_id: OrderId) -> Result<Order> {
        self.transition(order_id, Order::confirm).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, order_id: OrderId) -> Result<Order> {
        self.transition(order_id, Order::complete).await
    }

    /// Cancels an order. Cancelling twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        self.transition(order_id, Order::cancel).await
    }

    async fn transition<F>(&self, order_id: OrderId, change: F) -> Result<Order>
    where
        F: FnOnce(&mut Order, DateTime<Utc>) -> Result<Option<OrderEvent>>,
    {
        let mut state = self.state.write().await;
        let mut order = state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(DomainError::OrderNotFound(order_id))?;
        let Some(event) = change(&mut order, Utc::now())? else {
            return Ok(order);
        };
        let event_type = event.event_type();
        let record = event.to_outbox()?;
        let order = self
            .outbox
            .transaction(|tx| {
                tx.stage(record);
                state.orders.insert(order_id, order.clone());
                Ok::<_, DomainError>(order)
            })
            .await?;
        tracing::info!(%order_id, status = %order.status, event_type, "order updated");
        Ok(order)
    }
}
