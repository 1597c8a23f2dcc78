//! Persisted invoice sync marker
//!
//! Atomic JSON writes plus an advisory lock so overlapping runs fail fast.

pub mod lock;
pub mod state;

pub use lock::RunLock;
pub use state::{Checkpoint, CheckpointError, CheckpointStore, MAX_CHECKPOINT_FILE_SIZE};
