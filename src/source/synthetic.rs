//! Synthetic frame source for testing and demos
//!
//! This module provides a frame source that needs no hardware. It generates
//! frames from a configurable pattern and can pace itself to a target frame
//! rate without ever blocking the caller.
//!
//! # Patterns
//!
//! - [`SyntheticPattern::Counter`] - Every sample equals the frame index (frame identity is visible in the data)
//! - [`SyntheticPattern::Constant`] - Fixed value
//! - [`SyntheticPattern::Gradient`] - Horizontal ramp that scrolls one column per frame
//! - [`SyntheticPattern::Sine`] - Uniform brightness following a sine wave over time
//!
//! # Example
//!
//! ```ignore
//! use framepipe::source::{SyntheticPattern, SyntheticSource};
//!
//! let mut source = SyntheticSource::new(480, 640)
//!     .with_pattern(SyntheticPattern::Gradient)
//!     .with_fps(50.0);
//! source.open()?;
//! let frame = source.next_frame()?; // None until the next frame is due
//! ```

use super::FrameSource;
use crate::error::{PipelineError, Result};
use crate::types::{ComponentConfig, Frame, FrameShape};
use std::time::{Duration, Instant};

/// Pattern for generating synthetic frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyntheticPattern {
    /// Sample value = frame index
    Counter,
    /// Constant value
    Constant(f32),
    /// Scrolling horizontal ramp
    Gradient,
    /// Sine wave with frequency (Hz) and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
}

impl Default for SyntheticPattern {
    fn default() -> Self {
        SyntheticPattern::Counter
    }
}

/// Frame source generating patterns in memory
#[derive(Debug)]
pub struct SyntheticSource {
    shape: FrameShape,
    pattern: SyntheticPattern,
    /// Target interval between frames (None = as fast as polled)
    interval: Option<Duration>,
    /// Stop producing after this many frames
    max_frames: Option<u64>,
    produced: u64,
    next_due: Option<Instant>,
    start: Instant,
    open: bool,
}

impl SyntheticSource {
    /// Create an unpaced counter source
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            shape: FrameShape::new(rows, cols),
            pattern: SyntheticPattern::default(),
            interval: None,
            max_frames: None,
            produced: 0,
            next_due: None,
            start: Instant::now(),
            open: false,
        }
    }

    pub fn with_pattern(mut self, pattern: SyntheticPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Pace to `fps` frames per second; 0 disables pacing
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }

    /// Stop producing after `n` frames
    pub fn with_max_frames(mut self, n: u64) -> Self {
        self.max_frames = Some(n);
        self
    }

    /// Build from `rows`, `cols`, `fps`, `pattern`, `value`, `frequency`,
    /// `amplitude`, `offset` and `max_frames` parameters
    pub fn from_config(config: &ComponentConfig) -> Result<Self> {
        let rows = config.usize_or("rows", 480)?;
        let cols = config.usize_or("cols", 640)?;
        let pattern = match config.str_opt("pattern")?.unwrap_or("counter") {
            "counter" => SyntheticPattern::Counter,
            "constant" => SyntheticPattern::Constant(config.float_or("value", 0.0)? as f32),
            "gradient" => SyntheticPattern::Gradient,
            "sine" => SyntheticPattern::Sine {
                frequency: config.float_or("frequency", 1.0)?,
                amplitude: config.float_or("amplitude", 100.0)?,
                offset: config.float_or("offset", 100.0)?,
            },
            other => {
                return Err(PipelineError::invalid_parameter(
                    "pattern",
                    format!("unknown pattern '{}'", other),
                ))
            }
        };

        let mut source = Self::new(rows, cols)
            .with_pattern(pattern)
            .with_fps(config.float_or("fps", 0.0)?);
        if let Some(n) = config.get("max_frames") {
            let n = n
                .as_int()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| PipelineError::invalid_parameter("max_frames", "expected a non-negative integer"))?;
            source = source.with_max_frames(n);
        }
        Ok(source)
    }

    /// Frames produced since open
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn generate(&self) -> Frame {
        let index = self.produced;
        match self.pattern {
            SyntheticPattern::Counter => Frame::from_fn(self.shape, |_, _, _| index as f32),
            SyntheticPattern::Constant(v) => Frame::from_fn(self.shape, |_, _, _| v),
            SyntheticPattern::Gradient => {
                let cols = self.shape.cols.max(1);
                Frame::from_fn(self.shape, |_, c, _| {
                    ((c + index as usize) % cols) as f32 / cols as f32
                })
            }
            SyntheticPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => {
                let t = self.start.elapsed().as_secs_f64();
                let v = (offset + amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()) as f32;
                Frame::from_fn(self.shape, |_, _, _| v)
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        self.produced = 0;
        self.start = Instant::now();
        self.next_due = None;
        tracing::debug!("Synthetic source opened ({}, {:?})", self.shape, self.pattern);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(PipelineError::Source("synthetic source is not open".to_string()));
        }
        if self.max_frames.is_some_and(|max| self.produced >= max) {
            return Ok(None);
        }

        if let Some(interval) = self.interval {
            let now = Instant::now();
            match self.next_due {
                Some(due) if now < due => return Ok(None),
                // Far behind schedule: restart pacing from now instead of bursting
                Some(due) if now.duration_since(due) > interval * 4 => self.next_due = Some(now + interval),
                Some(due) => self.next_due = Some(due + interval),
                None => self.next_due = Some(now + interval),
            }
        }

        let frame = self.generate();
        self.produced += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
