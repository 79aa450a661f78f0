pub mod notify;
pub mod payment;
