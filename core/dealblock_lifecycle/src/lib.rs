//! # DealBlock milestone lifecycle
//!
//! Client-side model of the DealBlock escrow contract: projects, milestones,
//! the six-status milestone lifecycle, and everything derived from them.
//!
//! | Concern              | Module           |
//! |----------------------|------------------|
//! | Data model           | [`types`]        |
//! | Transition guards    | [`machine`]      |
//! | Viewer roles         | [`viewer`]       |
//! | Derived values       | [`aggregate`]    |
//! | Draft validation     | [`validation`]   |
//! | Token amounts        | [`amount`]       |
//! | Error taxonomy       | [`errors`]       |
//!
//! ## Architecture
//!
//! Every function in this crate is pure. Custody, approval thresholds and
//! transfers are enforced by the contract; this crate decides what to offer
//! a viewer and what to refuse before a transaction is ever built.

pub mod aggregate;
pub mod amount;
pub mod errors;
pub mod machine;
pub mod types;
pub mod validation;
pub mod viewer;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod property_tests;
#[cfg(test)]
mod test_aggregate;
#[cfg(test)]
mod test_machine;
#[cfg(test)]
mod test_support;

pub use aggregate::{
    active_milestones, approval_progress, days_remaining, deadline, progress, total_value,
    value_locked, ApprovalProgress, DashboardStats, Deadline, Progress,
};
pub use errors::{ContractErrorCode, ErrorClass, TransitionError, ValidationError};
pub use machine::{
    available_actions, check_add_milestone, check_transition, Action, GuardContext,
    ReleasePolicy, Transition,
};
pub use types::{Address, Approvers, Milestone, MilestoneStatus, Project, StatusDisplay, Task};
pub use viewer::{pending_approvals_count, ViewerContext};
