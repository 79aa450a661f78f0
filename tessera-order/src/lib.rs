pub mod cancellation;
pub mod changes;
pub mod checkout;
pub mod config;
pub mod models;
pub mod refund;
pub mod store;

pub use cancellation::{CancellationDecision, CancellationOutcome};
pub use changes::ChangeDecision;
pub use checkout::{Advance, CheckoutFlow, CheckoutState, CheckoutStepKind};
pub use config::{PolicyConfig, PriceChangeMode};
pub use models::{Order, OrderPosition, OrderStatus, RefundInstruction};
pub use refund::{RefundCoordinator, RefundOutcome};
pub use store::OrderStore;
