//! Hardware allocation domain module.
//!
//! Capacity accounting for pools of interchangeable hardware units and the
//! checkout/check-in rules over allocation records, implemented as
//! deterministic domain logic (no IO, no HTTP, no storage). The planners take
//! current state and a command and return the decided next state; persisting
//! it atomically is the caller's job.

pub mod allocation;
pub mod checkin;
pub mod checkout;
pub mod error;
pub mod kind;
pub mod quantity;

pub use allocation::{AllocationRecord, FifoKey};
pub use checkin::{outstanding, plan_checkin, Checkin, CheckinOutcome};
pub use checkout::{plan_checkout, Checkout, CheckoutOutcome};
pub use error::AllocationError;
pub use kind::HardwareKind;
pub use quantity::Quantity;
