pub mod inventory;
pub mod reservation;
pub mod tax;
pub mod waitinglist;

pub use inventory::{InventoryError, InventoryPool, Quota};
pub use reservation::{CartReservation, ReservationError, ReservationLine, ReservationManager};
pub use tax::{TaxError, TaxRule, TaxRuleSet, TaxedPrice};
pub use waitinglist::{WaitingList, WaitingListEntry, WaitingListError};
