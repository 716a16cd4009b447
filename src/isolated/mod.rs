//! Isolated execution context for the processing stage
//!
//! This module runs a transform in a separate OS process so that it gets
//! its own scheduler slot on multi-core hosts and cannot take the host down
//! when it misbehaves. Nothing is shared with the host except two pipes
//! and, optionally, one shared memory region for results.
//!
//! # Architecture
//!
//! ```text
//!  host process                                   frame-worker process
//! ┌──────────────────────────────┐  stdin pipe  ┌────────────────────────┐
//! │ ProcessingWorker loop        │─────────────▶│ run_worker()           │
//! │   └─ IsolatedHost            │  Bootstrap   │   TransformRegistry    │
//! │        writer thread         │  Frame       │   Box<dyn Transform>   │
//! │        reader thread         │  Settings    │                        │
//! │        SharedRegionReader ◀──┼──────────────┼── SharedRegionWriter   │
//! │                              │◀─────────────│                        │
//! └──────────────────────────────┘  stdout pipe └────────────────────────┘
//!                                   Ready / Frame / Written / Failed
//! ```
//!
//! Batching and pause stay on the host side. At most `max_in_flight`
//! batches are sent ahead of their results, so any backlog accumulates in
//! the host's bounded channel where the drop-oldest policy applies.
//! With a shared region the limit is 1, since the region holds a single
//! result.

pub mod host;
pub mod process;
pub mod protocol;
#[cfg(unix)]
pub mod shared_region;
pub mod worker;

pub use host::{IsolatedHost, WorkerReply};
pub use process::{default_worker_path, ProcessHandle, WORKER_BINARY};
pub use protocol::{HostMessage, RegionSpec, WorkerMessage};
#[cfg(unix)]
pub use shared_region::{SharedRegion, SharedRegionReader, SharedRegionWriter};
pub use worker::run_worker;
