//! Chat module - sessions, messages and the streaming send
//!
//! - `ledger`: in-memory sessions and messages
//! - `orchestrator`: runs a send through the upstream provider and relays it
//! - `locks`: one writer per session

pub mod ledger;
pub mod locks;
pub mod orchestrator;
pub mod types;

pub use ledger::Ledger;
pub use locks::SessionLocks;
pub use orchestrator::{ChatOrchestrator, SendOutcome, SendState};
pub use types::{FileInfo, Message, NewMessage, Role, Session, is_placeholder};
