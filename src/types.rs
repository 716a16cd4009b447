//! Core data types for the frame pipeline
//!
//! This module contains the fundamental data structures that flow through
//! the pipeline, including:
//!
//! - [`Frame`] - An immutable image buffer with its arrival-order sequence number
//! - [`FrameShape`] - Rows, columns and planes of a frame
//! - [`ParamValue`] - Typed value carried by configuration and commands
//! - [`ComponentConfig`] - Registry key plus parameters for sources and transforms
//! - [`WorkerState`] - Lifecycle state shared by both workers
//!
//! # Frame Layout
//!
//! Samples are `f32`, stored plane-major: all of plane 0 row by row, then
//! plane 1, and so on. A 2D frame is a frame with one plane, so a batch of
//! K single-plane frames is just their planes laid end to end.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dimensions of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameShape {
    pub rows: usize,
    pub cols: usize,
    #[serde(default = "default_planes")]
    pub planes: usize,
}

fn default_planes() -> usize {
    1
}

impl FrameShape {
    /// Sentinel shape meaning "nothing written yet"
    pub const EMPTY: FrameShape = FrameShape {
        rows: 0,
        cols: 0,
        planes: 0,
    };

    /// Shape of a single-plane (2D) frame
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            planes: 1,
        }
    }

    /// Shape of a multi-plane (3D) frame
    pub const fn with_planes(rows: usize, cols: usize, planes: usize) -> Self {
        Self { rows, cols, planes }
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.rows * self.cols * self.planes
    }

    /// Number of samples in one plane
    pub fn plane_len(&self) -> usize {
        self.rows * self.cols
    }

    /// Whether this is the empty sentinel (or otherwise holds no samples)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a frame of `other` shape fits inside a region of this shape
    pub fn contains(&self, other: &FrameShape) -> bool {
        other.rows <= self.rows && other.cols <= self.cols && other.planes <= self.planes
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.planes == 1 {
            write!(f, "{}x{}", self.rows, self.cols)
        } else {
            write!(f, "{}x{}x{}", self.rows, self.cols, self.planes)
        }
    }
}

/// One image buffer produced by a source or a transform
///
/// A frame is never mutated after it has been queued: the fields are private
/// and only readable, and a transform always builds a new frame. Handing a
/// frame to a channel moves it, so the producer cannot keep a live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    seq: u64,
    shape: FrameShape,
    data: Vec<f32>,
}

impl Frame {
    /// Create a frame from raw samples in plane-major order
    pub fn new(shape: FrameShape, data: Vec<f32>) -> Result<Self> {
        if shape.len() != data.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "shape {} needs {} samples, got {}",
                shape,
                shape.len(),
                data.len()
            )));
        }
        Ok(Self {
            seq: 0,
            shape,
            data,
        })
    }

    /// Create a frame filled with zeros
    pub fn zeros(shape: FrameShape) -> Self {
        Self {
            seq: 0,
            shape,
            data: vec![0.0; shape.len()],
        }
    }

    /// Create a frame from a function of (row, col, plane)
    pub fn from_fn(shape: FrameShape, mut f: impl FnMut(usize, usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(shape.len());
        for p in 0..shape.planes {
            for r in 0..shape.rows {
                for c in 0..shape.cols {
                    data.push(f(r, c, p));
                }
            }
        }
        Self {
            seq: 0,
            shape,
            data,
        }
    }

    /// Builder-style sequence number assignment
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Arrival-order position assigned by the producer
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows
    }

    pub fn cols(&self) -> usize {
        self.shape.cols
    }

    pub fn planes(&self) -> usize {
        self.shape.planes
    }

    /// All samples in plane-major order
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume the frame and return its samples
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Samples of a single plane, or `None` if out of range
    pub fn plane(&self, index: usize) -> Option<&[f32]> {
        if index >= self.shape.planes {
            return None;
        }
        let len = self.shape.plane_len();
        Some(&self.data[index * len..(index + 1) * len])
    }

    /// Sample at (row, col, plane), or `None` if out of range
    pub fn get(&self, row: usize, col: usize, plane: usize) -> Option<f32> {
        if row >= self.shape.rows || col >= self.shape.cols || plane >= self.shape.planes {
            return None;
        }
        let idx = plane * self.shape.plane_len() + row * self.shape.cols + col;
        self.data.get(idx).copied()
    }

    /// Payload size in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Typed value for component parameters and command arguments
///
/// Untagged so that TOML configuration reads naturally (`gain = 2.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value; integers are widened
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Registry key plus parameters for a source or a transform
///
/// This is the serializable "freshly constructed configuration object"
/// that crosses into an isolated worker, and the table that appears in
/// the TOML configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Registry key (e.g. `"synthetic"`, `"mean"`)
    pub kind: String,
    /// Kind-specific parameters
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    /// Builder-style parameter insertion
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Float parameter with a default; wrong types are an error
    pub fn float_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.params.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_float()
                .ok_or_else(|| PipelineError::invalid_parameter(name, "expected a number")),
        }
    }

    /// Non-negative integer parameter with a default; wrong types are an error
    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.params.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_int()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| {
                    PipelineError::invalid_parameter(name, "expected a non-negative integer")
                }),
        }
    }

    /// Boolean parameter with a default; wrong types are an error
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.params.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| PipelineError::invalid_parameter(name, "expected a boolean")),
        }
    }

    /// Optional string parameter; wrong types are an error
    pub fn str_opt(&self, name: &str) -> Result<Option<&str>> {
        match self.params.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| PipelineError::invalid_parameter(name, "expected a string")),
        }
    }
}

/// Lifecycle state of a worker
///
/// `Stopped` is both the initial and the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl WorkerState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            WorkerState::Stopped => 0,
            WorkerState::Running => 1,
            WorkerState::Paused => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Running,
            2 => WorkerState::Paused,
            _ => WorkerState::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "Stopped"),
            WorkerState::Running => write!(f, "Running"),
            WorkerState::Paused => write!(f, "Paused"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new_checks_length() {
        assert!(Frame::new(FrameShape::new(2, 2), vec![0.0; 4]).is_ok());
        let err = Frame::new(FrameShape::new(2, 2), vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch(_)));
    }

    #[test]
    fn test_frame_indexing_is_plane_major() {
        let frame = Frame::from_fn(FrameShape::with_planes(2, 3, 2), |r, c, p| {
            (p * 100 + r * 10 + c) as f32
        });
        assert_eq!(frame.get(1, 2, 0), Some(12.0));
        assert_eq!(frame.get(0, 1, 1), Some(101.0));
        assert_eq!(frame.get(2, 0, 0), None);
        assert_eq!(frame.plane(1).unwrap()[0], 100.0);
        assert!(frame.plane(2).is_none());
        assert_eq!(frame.size_bytes(), 12 * 4);
    }

    #[test]
    fn test_shape_empty_sentinel() {
        assert!(FrameShape::EMPTY.is_empty());
        assert!(!FrameShape::new(1, 1).is_empty());
        assert_eq!(FrameShape::new(4, 5).to_string(), "4x5");
        assert_eq!(FrameShape::with_planes(4, 5, 3).to_string(), "4x5x3");
    }

    #[test]
    fn test_shape_contains() {
        let region = FrameShape::new(100, 200);
        assert!(region.contains(&FrameShape::new(100, 200)));
        assert!(region.contains(&FrameShape::new(10, 20)));
        assert!(!region.contains(&FrameShape::new(101, 20)));
        assert!(!region.contains(&FrameShape::with_planes(10, 20, 2)));
    }

    #[test]
    fn test_param_value_accessors() {
        assert_eq!(ParamValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ParamValue::Int(42).as_int(), Some(42));
        assert_eq!(ParamValue::Int(42).as_float(), Some(42.0));
        assert_eq!(ParamValue::Float(1.5).as_float(), Some(1.5));
        assert_eq!(ParamValue::Text("hi".into()).as_str(), Some("hi"));
        assert!(ParamValue::Text("hi".into()).as_float().is_none());
    }

    #[test]
    fn test_component_config_from_toml() {
        let cfg: ComponentConfig = toml::from_str(
            r#"
            kind = "scale"
            [params]
            gain = 2.5
            offset = 1
            label = "x"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.kind, "scale");
        assert_eq!(cfg.float_or("gain", 1.0).unwrap(), 2.5);
        assert_eq!(cfg.float_or("offset", 0.0).unwrap(), 1.0);
        assert_eq!(cfg.float_or("missing", 7.0).unwrap(), 7.0);
        assert!(cfg.usize_or("label", 0).is_err());
        assert_eq!(cfg.str_opt("label").unwrap(), Some("x"));
    }

    #[test]
    fn test_worker_state_roundtrip_u8() {
        for state in [WorkerState::Stopped, WorkerState::Running, WorkerState::Paused] {
            assert_eq!(WorkerState::from_u8(state.to_u8()), state);
        }
    }
}
