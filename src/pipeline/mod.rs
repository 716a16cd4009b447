//! Real-time frame pipeline.
//!
//! A producer (the acquisition worker polling a [`FrameSource`]) and a
//! consumer (the processing worker running a [`Transform`]) are decoupled by
//! bounded drop-oldest channels, so the most recent data always wins when a
//! stage falls behind.
//!
//! # Architecture
//!
//! ```text
//! [FrameSource] ─► AcquisitionWorker ─► [BoundedChannel] ─► ProcessingWorker ─► [BoundedChannel] ─► consumer
//!                                                               ▲
//!                                            SettingsSender ────┘
//! ```
//!
//! # Design
//!
//! - **Drop-oldest everywhere**: producers never block; overflow evicts the
//!   `drop_count` oldest elements and counts them.
//! - **One thread per worker**: each worker owns a dedicated thread and
//!   shares only channels and atomics with its controller.
//! - **Settings by message**: transform updates travel through a one-way
//!   channel and are applied between invocations, which also works when the
//!   transform lives in another process.
//!
//! [`FrameSource`]: crate::source::FrameSource
//! [`Transform`]: crate::transform::Transform

pub mod acquisition;
pub mod batch;
pub mod builder;
pub mod channel;
pub mod processing;
pub mod rate;
pub mod settings;

pub use acquisition::{AcquisitionStats, AcquisitionWorker};
pub use batch::combine_batch;
pub use builder::{Pipeline, PipelineStats};
pub use channel::{BoundedChannel, DrainLock, FrameChannel, ShapeChannel};
pub use processing::{ProcessingStats, ProcessingWorker};
pub use rate::RateMeter;
pub use settings::{settings_channel, SettingsMessage, SettingsReceiver, SettingsSender};
