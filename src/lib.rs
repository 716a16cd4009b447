//! # framepipe: real-time frame acquisition and processing
//!
//! A camera-style producer/consumer pipeline. An acquisition worker polls a
//! frame source on its own thread and a processing worker runs a transform
//! over the acquired frames, either on a thread of this process or in a
//! separate `frame-worker` process. The stages are joined by bounded
//! channels that drop the oldest frames on overflow, so a slow stage never
//! stalls a fast one.
//!
//! ## Architecture
//!
//! - **Sources**: [`source::FrameSource`] implementations resolved by kind
//!   through a [`source::SourceRegistry`]
//! - **Transforms**: [`transform::Transform`] implementations resolved the
//!   same way, in either process
//! - **Pipeline**: channels, workers, batching and the settings channel
//! - **Isolated**: the worker process, its wire protocol and the
//!   shared-memory result region
//!
//! ## Configuration
//!
//! Pipelines are described by a TOML file, by default at
//! `<config dir>/framepipe/pipeline.toml`:
//!
//! ```toml
//! [acquisition]
//! capacity = 16
//!
//! [acquisition.source]
//! kind = "synthetic"
//! params = { rows = 480, cols = 640, fps = 30.0 }
//!
//! [processing]
//! batch_size = 4
//! mode = "isolated"
//!
//! [processing.transform]
//! kind = "mean"
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use framepipe::{Pipeline, PipelineConfig, SourceRegistry, TransformRegistry};
//!
//! let config = PipelineConfig::load_or_default("pipeline.toml");
//! let mut pipeline = Pipeline::from_config(
//!     &config,
//!     &SourceRegistry::with_builtins(),
//!     &TransformRegistry::with_builtins(),
//! )?;
//! pipeline.start()?;
//! if let Some(frame) = pipeline.latest_output() {
//!     println!("{} frame #{}", frame.shape(), frame.seq());
//! }
//! pipeline.stop();
//! ```

pub mod config;
pub mod error;
pub mod isolated;
pub mod pipeline;
pub mod source;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use config::{ExecutionMode, PipelineConfig};
pub use error::{PipelineError, Result, ResultExt};
pub use pipeline::{AcquisitionWorker, FrameChannel, Pipeline, ProcessingWorker, SettingsMessage};
pub use source::{FrameSource, SourceRegistry};
pub use transform::{Transform, TransformRegistry};
pub use types::{ComponentConfig, Frame, FrameShape, ParamValue, WorkerState};
