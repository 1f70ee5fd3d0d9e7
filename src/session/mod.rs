//! Session orchestration
//!
//! The orchestrator owns the browser for the process lifetime and drives
//! the fixed state sequence; storage snapshots make authenticated sessions
//! survive across runs.

pub mod orchestrator;
pub mod storage;

pub use orchestrator::run;
pub use storage::{OriginState, StorageState, StoredCookie};
