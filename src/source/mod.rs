//! Frame sources and the registry that constructs them by kind.
//!
//! This module provides a common trait for everything the acquisition worker
//! can poll, enabling both real cameras and synthetic/file sources for
//! testing. Sources are selected at startup from a [`ComponentConfig`]
//! through a [`SourceRegistry`], a mapping from kind to constructor.
//!
//! # Components
//!
//! - [`FrameSource`] - Lifecycle and polling contract
//! - [`SyntheticSource`] - Pattern generator with optional pacing
//! - [`FileSource`] - Frames decoded from an image file or directory

pub mod file;
pub mod synthetic;

pub use file::FileSource;
pub use synthetic::{SyntheticPattern, SyntheticSource};

use crate::error::{PipelineError, Result};
use crate::types::{ComponentConfig, Frame};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unified interface for frame sources
///
/// `next_frame` must not block: a source with nothing ready returns
/// `Ok(None)`, which the acquisition worker treats as an ordinary idle poll.
/// Implementations must be `Send` to move onto the acquisition thread.
///
/// # Example
///
/// ```ignore
/// fn grab_one(source: &mut dyn FrameSource) -> Result<Option<Frame>> {
///     source.open()?;
///     let frame = source.next_frame()?;
///     source.close()?;
///     source.dispose()?;
///     Ok(frame)
/// }
/// ```
pub trait FrameSource: Send {
    /// Human-readable name for logs
    fn name(&self) -> &str {
        "frame source"
    }

    /// Prepare the device or file for reading
    fn open(&mut self) -> Result<()>;

    /// Return the next frame if one is ready
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Stop streaming
    fn close(&mut self) -> Result<()>;

    /// Release everything held by the source
    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Constructor for a source kind
pub type SourceFactory = Arc<dyn Fn(&ComponentConfig) -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// Mapping from source kind to constructor
#[derive(Clone, Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with `synthetic` and `file` registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("synthetic", |cfg| Ok(Box::new(SyntheticSource::from_config(cfg)?)));
        registry.register("file", |cfg| Ok(Box::new(FileSource::from_config(cfg)?)));
        registry
    }

    /// Register (or replace) the constructor for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn FrameSource>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Build a source from its configuration
    pub fn build(&self, config: &ComponentConfig) -> Result<Box<dyn FrameSource>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| PipelineError::UnknownSource(config.kind.clone()))?;
        factory(config)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds in sorted order
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
