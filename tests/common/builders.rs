//! Test data builders for creating test objects

use framepipe::{Frame, FrameShape};

/// Builder for creating test Frames
pub struct FrameBuilder {
    rows: usize,
    cols: usize,
    planes: usize,
    value: f32,
    seq: u64,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            rows: 2,
            cols: 2,
            planes: 1,
            value: 0.0,
            seq: 0,
        }
    }

    pub fn shape(mut self, rows: usize, cols: usize) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    pub fn planes(mut self, planes: usize) -> Self {
        self.planes = planes;
        self
    }

    /// Fill every sample with `value`
    pub fn value(mut self, value: f32) -> Self {
        self.value = value;
        self
    }

    pub fn seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn build(self) -> Frame {
        let value = self.value;
        Frame::from_fn(FrameShape::with_planes(self.rows, self.cols, self.planes), |_, _, _| value)
            .with_seq(self.seq)
    }
}

/// Frame `seq` whose samples all equal `seq`, handy for tracking identity
pub fn numbered(seq: u64) -> Frame {
    FrameBuilder::new().value(seq as f32).seq(seq).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::new().shape(3, 4).planes(2).value(1.5).seq(7).build();
        assert_eq!(frame.shape(), FrameShape::with_planes(3, 4, 2));
        assert_eq!(frame.seq(), 7);
        assert!(frame.data().iter().all(|&v| v == 1.5));
    }
}
