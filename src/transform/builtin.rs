//! Built-in transforms available to every worker.

use super::Transform;
use crate::error::{PipelineError, Result};
use crate::types::{ComponentConfig, Frame, FrameShape, ParamValue};

/// Copies the input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn name(&self) -> &str {
        "identity"
    }

    fn process(&mut self, input: &Frame) -> Result<Frame> {
        Ok(input.clone())
    }
}

/// Averages all planes into one, e.g. a batch of K noisy frames
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanTransform;

impl Transform for MeanTransform {
    fn name(&self) -> &str {
        "mean"
    }

    fn process(&mut self, input: &Frame) -> Result<Frame> {
        let shape = input.shape();
        if shape.planes == 0 {
            return Err(PipelineError::Transform("cannot average zero planes".to_string()));
        }
        let plane_len = shape.plane_len();
        let mut acc = vec![0.0f32; plane_len];
        for plane in input.data().chunks_exact(plane_len.max(1)) {
            for (a, v) in acc.iter_mut().zip(plane) {
                *a += v;
            }
        }
        let n = shape.planes as f32;
        acc.iter_mut().for_each(|a| *a /= n);
        Ok(Frame::new(FrameShape::new(shape.rows, shape.cols), acc)?.with_seq(input.seq()))
    }
}

/// `out = in * gain + offset`, sample by sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTransform {
    pub gain: f32,
    pub offset: f32,
}

impl Default for ScaleTransform {
    fn default() -> Self {
        Self {
            gain: 1.0,
            offset: 0.0,
        }
    }
}

impl ScaleTransform {
    pub fn new(gain: f32, offset: f32) -> Self {
        Self { gain, offset }
    }

    /// Read `gain` and `offset` parameters, defaulting to 1 and 0
    pub fn from_config(config: &ComponentConfig) -> Result<Self> {
        Ok(Self {
            gain: config.float_or("gain", 1.0)? as f32,
            offset: config.float_or("offset", 0.0)? as f32,
        })
    }
}

fn number(command: &str, arg: &ParamValue) -> Result<f32> {
    arg.as_float()
        .map(|v| v as f32)
        .ok_or_else(|| PipelineError::invalid_parameter(command, "expected a number"))
}

impl Transform for ScaleTransform {
    fn name(&self) -> &str {
        "scale"
    }

    fn process(&mut self, input: &Frame) -> Result<Frame> {
        let data = input
            .data()
            .iter()
            .map(|v| v * self.gain + self.offset)
            .collect();
        Ok(Frame::new(input.shape(), data)?.with_seq(input.seq()))
    }

    fn invoke(&mut self, command: &str, arg: &ParamValue) -> Result<()> {
        match command {
            "set_gain" => self.gain = number(command, arg)?,
            "set_offset" => self.offset = number(command, arg)?,
            "set_gain_offset" => {
                let pair = arg
                    .as_list()
                    .filter(|l| l.len() == 2)
                    .ok_or_else(|| PipelineError::invalid_parameter(command, "expected [gain, offset]"))?;
                self.gain = number(command, &pair[0])?;
                self.offset = number(command, &pair[1])?;
            }
            _ => {
                return Err(PipelineError::UnknownCommand {
                    transform: self.name().to_string(),
                    command: command.to_string(),
                })
            }
        }
        Ok(())
    }
}
