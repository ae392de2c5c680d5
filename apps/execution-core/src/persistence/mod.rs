//! State persistence for restart recovery.
//!
//! The risk gate's counters and the tail of the resilience history are
//! written to a JSON snapshot (atomic temp-file + rename) periodically and on
//! shutdown, and reapplied on startup.

mod snapshot;

pub use snapshot::{
    PersistenceError, SNAPSHOT_VERSION, SnapshotStore, StateSnapshot, run_snapshot_loop,
};
