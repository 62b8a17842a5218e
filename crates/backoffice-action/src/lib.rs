//! Claim, approval and dispatch engine for the back-office agents.
//!
//! Agents coordinate through a shared vault of markdown files: tasks are
//! claimed by moving them into `In_Progress/<agent>/`, side-effecting
//! actions wait in `Pending_Approval/` until a human moves them, and
//! approved actions are executed through pluggable handlers.

pub mod approval;
pub mod claim;
pub mod cloud;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod rate_limit;
pub mod reasoner;
pub mod retry;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use approval::{ApprovalManager, ApprovalWatcher, ExpiryPolicy, NewApproval};
pub use claim::{Claim, ClaimManager};
pub use cloud::CloudAgent;
pub use dispatcher::ApprovalDispatcher;
pub use error::{ActionError, SchedulerError};
pub use handler::{ActionDispatcher, ActionHandler, ActionRegistry, MessageClient};
pub use orchestrator::{ActionOutcome, Orchestrator};
pub use rate_limit::RateLimiter;
pub use reasoner::{CommandReasoner, Reasoner, ReasoningMode};
pub use retry::{RetryPolicy, RetryingClient};
pub use scheduler::{Schedule, Scheduler};
pub use types::{ActionResult, Decision, SendReceipt};
pub use worker::{TaskOutcome, TaskWorker};
