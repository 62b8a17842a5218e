//! Human-in-the-loop approval workflow.
//!
//! Requests are markdown files whose folder is their state:
//! `Pending_Approval/` -> `Approved/` | `Rejected/` -> `Done/`.

pub mod lifecycle;
pub mod manager;
pub mod policy;
pub mod watcher;

pub use lifecycle::{validate_transition, Stage};
pub use manager::{ApprovalManager, NewApproval, APPROVAL_PREFIX, EXPIRED_NOTE};
pub use policy::ExpiryPolicy;
pub use watcher::ApprovalWatcher;
