//! Shared vault model for the back-office agents.
//!
//! Folder layout, front-matter records, the audit log, configuration and
//! the clock abstraction used by every other crate.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod types;
pub mod vault;

pub use audit::{AuditEntry, AuditEvent, AuditLogger};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BackofficeConfig;
pub use error::{Result, VaultError};
pub use frontmatter::{ApprovalRequest, Document, FrontMatter, TaskItem};
pub use types::*;
pub use vault::{Folder, Vault};
