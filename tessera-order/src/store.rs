use crate::models::{Order, OrderStatus};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Concurrent order store with atomic read-modify-write on single orders.
///
/// Every mutation runs under the store lock, so a closure passed to
/// `with_order` observes and produces a consistent aggregate and
/// `compare_and_set_status` gives the exclusive guard required for
/// money-moving transitions.
pub struct OrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, order: Order) -> Uuid {
        let id = order.id;
        self.orders.lock().unwrap().insert(id, order);
        id
    }

    pub fn get(&self, order_id: Uuid) -> Option<Order> {
        self.orders.lock().unwrap().get(&order_id).cloned()
    }

    /// Atomically read-modify-write one order.
    pub fn with_order<R>(
        &self,
        order_id: Uuid,
        f: impl FnOnce(&mut Order) -> R,
    ) -> Result<R, StoreError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound(order_id))?;
        Ok(f(order))
    }

    /// Transition the order's status only if it currently matches
    /// `expected`. Two concurrent attempts on the same order cannot both
    /// succeed.
    pub fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        new_status: OrderStatus,
    ) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound(order_id))?;

        if order.status != expected {
            return Err(StoreError::InvalidTransition {
                expected: format!("{:?}", expected),
                actual: format!("{:?}", order.status),
            });
        }

        order.update_status(new_status);
        Ok(())
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state transition: expected {expected}, found {actual}")]
    InvalidTransition { expected: String, actual: String },
}
