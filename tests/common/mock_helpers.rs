//! Mock construction helpers

use super::builders::numbered;
use framepipe::pipeline::FrameChannel;
use framepipe::{Frame, FrameSource, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Create an input/output channel pair with default size
pub fn create_test_channels(capacity: usize) -> (Arc<FrameChannel>, Arc<FrameChannel>) {
    (FrameChannel::shared(capacity, 1), FrameChannel::shared(capacity, 1))
}

/// Source that always has a frame ready, numbered from 1, until `exhausted` is set
pub struct EndlessSource {
    next: u64,
    pub exhausted: Arc<AtomicBool>,
}

impl EndlessSource {
    pub fn new() -> Self {
        Self {
            next: 1,
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl FrameSource for EndlessSource {
    fn name(&self) -> &str {
        "endless"
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.exhausted.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let frame = numbered(self.next);
        self.next += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source that replays a fixed list of frames, then reports nothing ready
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
