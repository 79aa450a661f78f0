use crate::inventory::{InventoryError, InventoryPool};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One line of a cart hold: an item (optionally a variation) drawing
/// `quantity` units from a quota at a listed unit price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationLine {
    pub item_id: Uuid,
    pub variation_id: Option<Uuid>,
    pub quota_id: Uuid,
    pub quantity: i32,
    /// Listed unit price in minor currency units at the time of reservation.
    pub unit_price: i64,
    /// Tax rule to price the line under; `None` falls back to the event's
    /// default rule at checkout.
    pub tax_rule: Option<Uuid>,
}

/// A time-bounded hold on inventory while a buyer checks out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartReservation {
    pub token: Uuid,
    /// Owning cart session or customer reference.
    pub owner: String,
    pub lines: Vec<ReservationLine>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CartReservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    fn quota_lines(&self) -> Vec<(Uuid, i32)> {
        self.lines.iter().map(|l| (l.quota_id, l.quantity)).collect()
    }

    pub fn total(&self) -> i64 {
        self.lines
            .iter()
            .map(|l| l.unit_price * l.quantity as i64)
            .sum()
    }
}

/// Grants and tracks cart reservations against the shared inventory pool.
///
/// The holds map and the inventory pool use separate locks; exactly-once
/// release is guaranteed by removing the hold from the map (atomic) before
/// touching the pool, so a concurrent sweep and an explicit release can
/// never both return the same capacity.
pub struct ReservationManager {
    inventory: Arc<InventoryPool>,
    holds: Mutex<HashMap<Uuid, CartReservation>>,
}

impl ReservationManager {
    pub fn new(inventory: Arc<InventoryPool>) -> Self {
        Self {
            inventory,
            holds: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a hold on all lines at once, valid for `ttl`.
    ///
    /// All-or-nothing: a shortfall on any quota fails the whole request
    /// without a partial grant.
    pub fn reserve(
        &self,
        owner: &str,
        lines: Vec<ReservationLine>,
        ttl: Duration,
    ) -> Result<Uuid, ReservationError> {
        let wants: Vec<(Uuid, i32)> = lines.iter().map(|l| (l.quota_id, l.quantity)).collect();
        self.inventory.reserve_all(&wants)?;

        let now = Utc::now();
        let reservation = CartReservation {
            token: Uuid::new_v4(),
            owner: owner.to_string(),
            lines,
            created_at: now,
            expires_at: now + ttl,
        };
        let token = reservation.token;

        self.holds.lock().unwrap().insert(token, reservation);
        tracing::debug!(%token, owner, "cart reservation granted");
        Ok(token)
    }

    /// Extend a hold's lifetime. The expiry never moves backwards: the new
    /// expiry is the later of the current one and `now + new_ttl`.
    pub fn extend(&self, token: Uuid, new_ttl: Duration) -> Result<DateTime<Utc>, ReservationError> {
        let mut holds = self.holds.lock().unwrap();
        let reservation = holds
            .get_mut(&token)
            .ok_or(ReservationError::NotFound(token))?;

        let candidate = Utc::now() + new_ttl;
        if candidate > reservation.expires_at {
            reservation.expires_at = candidate;
        }
        Ok(reservation.expires_at)
    }

    /// Give up a hold, returning its capacity to the quotas.
    pub fn release(&self, token: Uuid) -> Result<(), ReservationError> {
        let reservation = self
            .holds
            .lock()
            .unwrap()
            .remove(&token)
            .ok_or(ReservationError::NotFound(token))?;

        self.inventory.release_all(&reservation.quota_lines());
        Ok(())
    }

    /// Consume a hold at checkout confirmation: reserved capacity becomes
    /// sold and the reservation record is destroyed.
    ///
    /// An expired hold is released back to its quotas and the confirmation
    /// fails with `Expired`.
    pub fn confirm(&self, token: Uuid) -> Result<CartReservation, ReservationError> {
        let reservation = self
            .holds
            .lock()
            .unwrap()
            .remove(&token)
            .ok_or(ReservationError::NotFound(token))?;

        if reservation.is_expired(Utc::now()) {
            self.inventory.release_all(&reservation.quota_lines());
            return Err(ReservationError::Expired(token));
        }

        self.inventory.commit_all(&reservation.quota_lines());
        Ok(reservation)
    }

    /// Release every hold that has expired as of `now`. Safe to run
    /// concurrently with acquisition and release; each hold is released
    /// exactly once because removal from the map is atomic.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let expired: Vec<CartReservation> = {
            let mut holds = self.holds.lock().unwrap();
            let tokens: Vec<Uuid> = holds
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.token)
                .collect();
            tokens.iter().filter_map(|t| holds.remove(t)).collect()
        };

        let mut released = Vec::with_capacity(expired.len());
        for reservation in expired {
            self.inventory.release_all(&reservation.quota_lines());
            released.push(reservation.token);
        }
        if !released.is_empty() {
            tracing::debug!(count = released.len(), "swept expired reservations");
        }
        released
    }

    /// Countdown remaining on a hold, clamped to zero. Derived, not stored.
    pub fn remaining(&self, token: Uuid, now: DateTime<Utc>) -> Option<Duration> {
        self.holds.lock().unwrap().get(&token).map(|r| {
            let left = r.expires_at - now;
            if left < Duration::zero() {
                Duration::zero()
            } else {
                left
            }
        })
    }

    pub fn get(&self, token: Uuid) -> Option<CartReservation> {
        self.holds.lock().unwrap().get(&token).cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Reservation not found: {0}")]
    NotFound(Uuid),

    #[error("Reservation expired: {0}")]
    Expired(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quota_id: Uuid, quantity: i32, unit_price: i64) -> ReservationLine {
        ReservationLine {
            item_id: Uuid::new_v4(),
            variation_id: None,
            quota_id,
            quantity,
            unit_price,
            tax_rule: None,
        }
    }

    fn setup(capacity: i32) -> (Arc<InventoryPool>, ReservationManager, Uuid) {
        let pool = Arc::new(InventoryPool::new());
        let quota = Uuid::new_v4();
        pool.initialize(quota, capacity);
        let manager = ReservationManager::new(Arc::clone(&pool));
        (pool, manager, quota)
    }

    #[test]
    fn test_reserve_and_release() {
        let (pool, manager, quota) = setup(10);

        let token = manager
            .reserve("session-1", vec![line(quota, 4, 2500)], Duration::minutes(30))
            .unwrap();
        assert_eq!(pool.available(&quota), Some(6));

        manager.release(token).unwrap();
        assert_eq!(pool.available(&quota), Some(10));
        assert!(matches!(
            manager.release(token),
            Err(ReservationError::NotFound(_))
        ));
    }

    #[test]
    fn test_reserve_quota_exceeded_is_all_or_nothing() {
        let (pool, manager, quota) = setup(3);
        let other = Uuid::new_v4();
        pool.initialize(other, 10);

        let result = manager.reserve(
            "session-1",
            vec![line(other, 2, 1000), line(quota, 5, 1000)],
            Duration::minutes(30),
        );
        assert!(matches!(
            result,
            Err(ReservationError::Inventory(
                InventoryError::QuotaExceeded { .. }
            ))
        ));
        assert_eq!(pool.available(&other), Some(10));
        assert_eq!(pool.available(&quota), Some(3));
    }

    #[test]
    fn test_sweep_releases_exactly_once() {
        let (pool, manager, quota) = setup(10);

        let token = manager
            .reserve("session-1", vec![line(quota, 4, 2500)], Duration::minutes(30))
            .unwrap();

        let later = Utc::now() + Duration::hours(1);
        let swept = manager.sweep_expired(later);
        assert_eq!(swept, vec![token]);
        assert_eq!(pool.available(&quota), Some(10));

        // Second sweep finds nothing; capacity is not double-released.
        assert!(manager.sweep_expired(later).is_empty());
        assert_eq!(pool.available(&quota), Some(10));

        // Extend after sweep fails.
        assert!(matches!(
            manager.extend(token, Duration::minutes(10)),
            Err(ReservationError::NotFound(_))
        ));
    }

    #[test]
    fn test_extend_never_shortens() {
        let (_pool, manager, quota) = setup(10);

        let token = manager
            .reserve("session-1", vec![line(quota, 1, 2500)], Duration::minutes(30))
            .unwrap();
        let original = manager.get(token).unwrap().expires_at;

        // Asking for a shorter TTL keeps the original expiry.
        let expiry = manager.extend(token, Duration::minutes(1)).unwrap();
        assert_eq!(expiry, original);

        let expiry = manager.extend(token, Duration::hours(2)).unwrap();
        assert!(expiry > original);
    }

    #[test]
    fn test_confirm_consumes_capacity() {
        let (pool, manager, quota) = setup(10);

        let token = manager
            .reserve("session-1", vec![line(quota, 4, 2500)], Duration::minutes(30))
            .unwrap();
        let reservation = manager.confirm(token).unwrap();
        assert_eq!(reservation.total(), 10000);

        // Sold units stay gone; nothing left to sweep.
        assert_eq!(pool.available(&quota), Some(6));
        assert!(manager.sweep_expired(Utc::now() + Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_confirm_expired_hold_fails_and_releases() {
        let (pool, manager, quota) = setup(10);

        let token = manager
            .reserve("session-1", vec![line(quota, 4, 2500)], Duration::seconds(-1))
            .unwrap();

        assert!(matches!(
            manager.confirm(token),
            Err(ReservationError::Expired(_))
        ));
        assert_eq!(pool.available(&quota), Some(10));
    }

    #[test]
    fn test_remaining_clamped_to_zero() {
        let (_pool, manager, quota) = setup(10);

        let token = manager
            .reserve("session-1", vec![line(quota, 1, 2500)], Duration::minutes(30))
            .unwrap();

        let now = Utc::now();
        let remaining = manager.remaining(token, now).unwrap();
        assert!(remaining > Duration::minutes(29));

        let remaining = manager.remaining(token, now + Duration::hours(2)).unwrap();
        assert_eq!(remaining, Duration::zero());
    }
}
