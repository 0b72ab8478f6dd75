//! Domain model (IDs, work items, leases, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod item;
pub mod lease;
pub mod outcome;

pub use errors::OrchestratorError;
pub use ids::{ItemId, RunId};
pub use item::WorkItem;
pub use lease::{Lease, LeaseOwner};
pub use outcome::{Outcome, OutcomeStatus, Verdict, format_timestamp};
