//! Chain-of-custody audit log.
//!
//! Every lifecycle transition of a run, its units and their artifacts is
//! appended here as an [`AuditEvent`]. The log is:
//!
//! - **Ordered**: sequence numbers start at 1 and never skip
//! - **Durable**: each append is synced to disk before it is acknowledged
//! - **Tamper-evident**: each event carries the hash of its predecessor
//!
//! The exported JSON Lines file can be checked independently of the
//! collector with [`verify_chain`] after loading it through [`read_log`].

mod event;
mod store;

pub use event::{AuditEvent, AuditEventKind, NewAuditEvent};
pub use store::{read_log, verify_chain, AuditLog, ChainError};
