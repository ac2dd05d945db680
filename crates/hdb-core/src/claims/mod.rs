//! Ticket claim coordination: who owns a posted ticket notification.

pub mod coordinator;
pub mod local;
pub mod notifier;
pub mod record;
pub mod store;

pub use coordinator::{ClaimCoordinator, ClaimError, ClaimOutcome, ClaimResult, UnclaimOutcome};
pub use record::{ClaimHolder, ClaimKey, PreviousState, TicketClaimRecord};
pub use store::{ClaimStore, Decide, StoreBackend, StoreError};
