//! Core selection logic.
//!
//! This module contains:
//! - Selector: random draw without repeats, cycle reset
//! - SyncEngine: one cycle from remote check to commit
//! - StateLock: one cycle at a time per output directory

pub mod engine;
pub mod lock;
pub mod selector;

// Re-export commonly used types
pub use engine::{EngineConfig, SyncEngine, SyncError, DEFAULT_MAX_ATTEMPTS};
pub use lock::{LockFailure, StateLock};
pub use selector::{choose, SelectError, Selection};
