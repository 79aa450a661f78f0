use crate::inventory::InventoryPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// One person waiting for capacity on a sold-out product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingListEntry {
    pub id: Uuid,
    pub email: String,
    pub item_id: Uuid,
    pub variation_id: Option<Uuid>,
    pub quota_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Voucher granted once capacity freed up; `None` while still waiting.
    pub voucher: Option<Uuid>,
}

/// Queue of buyers waiting for sold-out products.
///
/// Whenever a hold is released or swept back into the pool, `assign_available`
/// hands the freed capacity to waiting buyers in signup order. Each grant
/// reserves one unit of the entry's quota and attaches a voucher id, so the
/// capacity cannot be bought out from under the invited buyer.
pub struct WaitingList {
    entries: Mutex<Vec<WaitingListEntry>>,
}

impl WaitingList {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Add a buyer to the queue for one product (variation).
    ///
    /// A buyer may only wait once per product and variation; a second join
    /// before a voucher was assigned is rejected.
    pub fn join(
        &self,
        email: impl Into<String>,
        item_id: Uuid,
        variation_id: Option<Uuid>,
        quota_id: Uuid,
    ) -> Result<Uuid, WaitingListError> {
        let email = email.into();
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| {
            e.voucher.is_none()
                && e.email == email
                && e.item_id == item_id
                && e.variation_id == variation_id
        }) {
            return Err(WaitingListError::AlreadyWaiting { email, item_id });
        }

        let entry = WaitingListEntry {
            id: Uuid::new_v4(),
            email,
            item_id,
            variation_id,
            quota_id,
            created_at: Utc::now(),
            voucher: None,
        };
        let id = entry.id;
        entries.push(entry);
        Ok(id)
    }

    pub fn get(&self, entry_id: Uuid) -> Option<WaitingListEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == entry_id)
            .cloned()
    }

    /// Number of buyers still waiting for the given product (variation).
    pub fn waiting(&self, item_id: Uuid, variation_id: Option<Uuid>) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.voucher.is_none() && e.item_id == item_id && e.variation_id == variation_id
            })
            .count()
    }

    /// Hand freed capacity to waiting buyers, oldest entry first.
    ///
    /// Every grant reserves one unit of the entry's quota; entries whose
    /// quota is still exhausted simply keep waiting. Returns the assigned
    /// entries.
    pub fn assign_available(&self, pool: &InventoryPool) -> Vec<WaitingListEntry> {
        let mut entries = self.entries.lock().unwrap();
        let mut assigned = Vec::new();
        for entry in entries.iter_mut().filter(|e| e.voucher.is_none()) {
            if pool.reserve_all(&[(entry.quota_id, 1)]).is_ok() {
                entry.voucher = Some(Uuid::new_v4());
                assigned.push(entry.clone());
            }
        }
        assigned
    }
}

impl Default for WaitingList {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitingListError {
    #[error("{email} is already on the waiting list for item {item_id}")]
    AlreadyWaiting { email: String, item_id: Uuid },
}
