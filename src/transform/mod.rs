//! Frame transforms and the registry that constructs them by kind.
//!
//! A [`Transform`] is the external collaborator that turns one input frame
//! (or one stacked batch) into one output frame. The pipeline never looks
//! inside it; it only calls [`Transform::process`] between settings updates
//! and routes named commands to [`Transform::invoke`].
//!
//! Transforms are built from a [`ComponentConfig`] through a
//! [`TransformRegistry`]. The same registry is used by an isolated worker
//! process, which is why configuration crosses the process boundary as data
//! rather than as a live object.
//!
//! # Example
//!
//! ```ignore
//! use framepipe::transform::TransformRegistry;
//! use framepipe::types::ComponentConfig;
//!
//! let registry = TransformRegistry::with_builtins();
//! let mut scale = registry.build(&ComponentConfig::new("scale").with("gain", 2.0))?;
//! scale.invoke("set_offset", &10.0.into())?;
//! let out = scale.process(&frame)?;
//! ```

pub mod builtin;

pub use builtin::{IdentityTransform, MeanTransform, ScaleTransform};

use crate::error::{PipelineError, Result};
use crate::types::{ComponentConfig, Frame, ParamValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unified interface for frame transforms
///
/// Implementations must be `Send` so they can move onto a worker thread.
pub trait Transform: Send {
    /// Human-readable name of this transform
    fn name(&self) -> &str;

    /// Produce a new frame from `input`.
    ///
    /// `input` has `batch_size` planes when batch aggregation is enabled.
    fn process(&mut self, input: &Frame) -> Result<Frame>;

    /// Apply an incremental update by name.
    ///
    /// The default implementation knows no commands.
    fn invoke(&mut self, command: &str, _arg: &ParamValue) -> Result<()> {
        Err(PipelineError::UnknownCommand {
            transform: self.name().to_string(),
            command: command.to_string(),
        })
    }
}

impl<F> Transform for F
where
    F: FnMut(&Frame) -> Result<Frame> + Send,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn process(&mut self, input: &Frame) -> Result<Frame> {
        self(input)
    }
}

/// Constructor for a transform kind
pub type TransformFactory = Arc<dyn Fn(&ComponentConfig) -> Result<Box<dyn Transform>> + Send + Sync>;

/// Mapping from transform kind to constructor
#[derive(Clone, Default)]
pub struct TransformRegistry {
    factories: BTreeMap<String, TransformFactory>,
}

impl TransformRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with `identity`, `mean` and `scale` registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("identity", |_| Ok(Box::new(IdentityTransform)));
        registry.register("mean", |_| Ok(Box::new(MeanTransform)));
        registry.register("scale", |cfg| Ok(Box::new(ScaleTransform::from_config(cfg)?)));
        registry
    }

    /// Register (or replace) the constructor for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Box<dyn Transform>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Build a transform from its configuration
    pub fn build(&self, config: &ComponentConfig) -> Result<Box<dyn Transform>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| PipelineError::UnknownTransform(config.kind.clone()))?;
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

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
