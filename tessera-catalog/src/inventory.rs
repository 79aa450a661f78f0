use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// A limited pool of sellable capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub id: Uuid,
    pub total_capacity: i32,
    pub available: i32,
    pub reserved: i32,
}

/// Quota bookkeeping shared by all concurrent checkout sessions.
///
/// All mutation happens under one lock so a multi-quota reservation is an
/// atomic all-or-nothing compare-and-decrement; concurrent attempts can
/// never oversell.
pub struct InventoryPool {
    quotas: Mutex<HashMap<Uuid, Quota>>,
}

impl InventoryPool {
    pub fn new() -> Self {
        Self {
            quotas: Mutex::new(HashMap::new()),
        }
    }

    /// Register a quota with its total capacity.
    pub fn initialize(&self, quota_id: Uuid, total_capacity: i32) {
        let mut quotas = self.quotas.lock().unwrap();
        quotas.insert(
            quota_id,
            Quota {
                id: quota_id,
                total_capacity,
                available: total_capacity,
                reserved: 0,
            },
        );
    }

    pub fn get(&self, quota_id: &Uuid) -> Option<Quota> {
        self.quotas.lock().unwrap().get(quota_id).cloned()
    }

    pub fn available(&self, quota_id: &Uuid) -> Option<i32> {
        self.quotas.lock().unwrap().get(quota_id).map(|q| q.available)
    }

    /// Reserve capacity across several quotas in one atomic step.
    ///
    /// Either every requested unit is granted or nothing is; a shortfall on
    /// any quota surfaces as `QuotaExceeded` without a partial grant.
    pub fn reserve_all(&self, wants: &[(Uuid, i32)]) -> Result<(), InventoryError> {
        let mut quotas = self.quotas.lock().unwrap();

        // Aggregate per quota first so two lines on the same quota are
        // checked against the combined demand.
        let mut demand: HashMap<Uuid, i32> = HashMap::new();
        for (quota_id, qty) in wants {
            *demand.entry(*quota_id).or_insert(0) += qty;
        }

        for (quota_id, qty) in &demand {
            let quota = quotas
                .get(quota_id)
                .ok_or(InventoryError::NotFound(*quota_id))?;
            if quota.available < *qty {
                return Err(InventoryError::QuotaExceeded {
                    quota_id: *quota_id,
                    requested: *qty,
                    available: quota.available,
                });
            }
        }

        for (quota_id, qty) in &demand {
            let quota = quotas.get_mut(quota_id).unwrap();
            quota.available -= qty;
            quota.reserved += qty;
        }

        Ok(())
    }

    /// Return reserved capacity to its quotas (hold expired or released).
    pub fn release_all(&self, held: &[(Uuid, i32)]) {
        let mut quotas = self.quotas.lock().unwrap();
        for (quota_id, qty) in held {
            if let Some(quota) = quotas.get_mut(quota_id) {
                quota.available += qty;
                quota.reserved = quota.reserved.saturating_sub(*qty);
            }
        }
    }

    /// Convert reserved capacity into sold capacity (checkout confirmed).
    pub fn commit_all(&self, held: &[(Uuid, i32)]) {
        let mut quotas = self.quotas.lock().unwrap();
        for (quota_id, qty) in held {
            if let Some(quota) = quotas.get_mut(quota_id) {
                quota.reserved = quota.reserved.saturating_sub(*qty);
            }
        }
    }
}

impl Default for InventoryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Quota not found: {0}")]
    NotFound(Uuid),

    #[error("Quota {quota_id} exceeded: requested {requested}, available {available}")]
    QuotaExceeded {
        quota_id: Uuid,
        requested: i32,
        available: i32,
    },
}
