//! Batch aggregation: K consecutive frames become one multi-plane frame.

use crate::error::{PipelineError, Result};
use crate::types::{Frame, FrameShape};

/// Stack `frames` into one buffer in arrival order (plane 0 = oldest).
///
/// All frames must share rows and columns. A single frame is returned
/// unchanged. The result carries the sequence number of the newest input.
pub fn combine_batch(mut frames: Vec<Frame>) -> Result<Frame> {
    match frames.len() {
        0 => Err(PipelineError::ShapeMismatch("empty batch".to_string())),
        1 => Ok(frames.remove(0)),
        _ => {
            let first = frames[0].shape();
            let mut planes = 0;
            for frame in &frames {
                let shape = frame.shape();
                if shape.rows != first.rows || shape.cols != first.cols {
                    return Err(PipelineError::ShapeMismatch(format!(
                        "batch mixes {}x{} and {}x{} frames",
                        first.rows, first.cols, shape.rows, shape.cols
                    )));
                }
                planes += shape.planes;
            }

            let seq = frames.last().map(Frame::seq).unwrap_or(0);
            let shape = FrameShape::with_planes(first.rows, first.cols, planes);
            let mut data = Vec::with_capacity(shape.len());
            for frame in frames {
                data.extend_from_slice(frame.data());
            }
            Ok(Frame::new(shape, data)?.with_seq(seq))
        }
    }
}
