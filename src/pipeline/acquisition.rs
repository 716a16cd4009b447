//! Acquisition worker: polls a frame source on a dedicated thread.
//!
//! The worker owns its [`FrameSource`] and pushes every acquired frame into
//! a bounded drop-oldest output channel. It never blocks on the consumer:
//! when the output is full the oldest `drop_count` frames are evicted first.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped --start()--> Running <--pause()/resume()--> Paused
//!    ^                    |                              |
//!    +------stop()--------+-------------stop()-----------+
//! ```
//!
//! `Stopped` is terminal once the source has been released: a stopped
//! worker cannot be started again.
//!
//! # Poll Loop
//!
//! Each iteration, while `Running`:
//!
//! 1. Evict `drop_count` oldest frames if the output is full (under the
//!    shared [`DrainLock`])
//! 2. Ask the source for its next frame
//! 3. Stamp the arrival sequence number and publish to the output (and the
//!    auxiliary channel if enabled), recording the inter-frame interval
//! 4. If nothing was ready, sleep [`IDLE_SLEEP`] and retry
//!
//! Source read errors are treated like "nothing ready": logged, counted,
//! followed by the idle sleep.

use super::channel::{DrainLock, FrameChannel};
use super::rate::RateMeter;
use crate::error::{PipelineError, Result};
use crate::source::FrameSource;
use crate::types::{Frame, WorkerState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Delay between polls when the source has nothing ready
pub const IDLE_SLEEP: Duration = Duration::from_millis(2);

/// Delay between state checks while paused
pub const PAUSED_SLEEP: Duration = Duration::from_millis(10);

/// Snapshot of acquisition statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionStats {
    pub state: WorkerState,
    /// Frames published since start
    pub frames_acquired: u64,
    /// Frames evicted from the output by the overflow policy
    pub frames_dropped: u64,
    /// Frames evicted from the auxiliary channel by the overflow policy
    pub auxiliary_dropped: u64,
    /// Failed `next_frame` calls
    pub source_errors: u64,
    pub measured_fps: f64,
    pub queue_depth: usize,
    pub auxiliary_depth: usize,
}

/// State shared between the controller and the worker thread
struct Shared {
    state: AtomicU8,
    output: Arc<FrameChannel>,
    auxiliary: Arc<FrameChannel>,
    use_auxiliary: AtomicBool,
    drain_lock: DrainLock,
    /// Held while publishing so `pause()` can wait out an in-flight push
    push_gate: Mutex<()>,
    rate: Mutex<RateMeter>,
    latest: Mutex<Option<Frame>>,
    acquired: AtomicU64,
    source_errors: AtomicU64,
}

impl Shared {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Publish one frame. Returns `false` if the worker left `Running` first.
    fn publish(&self, frame: Frame) -> bool {
        let _gate = self.push_gate.lock();
        if self.state() != WorkerState::Running {
            return false;
        }

        self.rate.lock().record(Instant::now());
        *self.latest.lock() = Some(frame.clone());
        if self.use_auxiliary.load(Ordering::Relaxed) {
            self.auxiliary.push(frame.clone());
        }
        self.output.push(frame);
        self.acquired.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Polls a [`FrameSource`] on its own thread
pub struct AcquisitionWorker {
    shared: Arc<Shared>,
    /// The source, while it is not on the worker thread
    source: Option<Box<dyn FrameSource>>,
    handle: Option<JoinHandle<Box<dyn FrameSource>>>,
    /// Set once the source has been released
    released: bool,
}

impl AcquisitionWorker {
    /// Create a stopped worker publishing into `output`
    pub fn new(source: Box<dyn FrameSource>, output: Arc<FrameChannel>) -> Self {
        let auxiliary = FrameChannel::shared(output.capacity(), output.drop_count());
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(WorkerState::Stopped.to_u8()),
                output,
                auxiliary,
                use_auxiliary: AtomicBool::new(false),
                drain_lock: DrainLock::new(),
                push_gate: Mutex::new(()),
                rate: Mutex::new(RateMeter::new()),
                latest: Mutex::new(None),
                acquired: AtomicU64::new(0),
                source_errors: AtomicU64::new(0),
            }),
            source: Some(source),
            handle: None,
            released: false,
        }
    }

    /// Share `lock` with every other component that drains the output
    ///
    /// Must be called before `start()`.
    pub fn with_drain_lock(mut self, lock: DrainLock) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.drain_lock = lock;
        }
        self
    }

    /// Replace the auxiliary channel with one of `capacity` frames
    ///
    /// Must be called before `start()`.
    pub fn with_auxiliary_capacity(mut self, capacity: usize) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.auxiliary = FrameChannel::shared(capacity, shared.output.drop_count());
        }
        self
    }

    /// Open the source and begin polling
    pub fn start(&mut self) -> Result<()> {
        if self.released {
            return Err(PipelineError::InvalidState(
                "acquisition worker was stopped and cannot be restarted".to_string(),
            ));
        }
        if self.handle.is_some() {
            return Err(PipelineError::InvalidState(format!(
                "acquisition worker is already {}",
                self.state()
            )));
        }
        let mut source = self
            .source
            .take()
            .ok_or_else(|| PipelineError::InvalidState("no frame source".to_string()))?;

        if let Err(e) = source.open() {
            tracing::error!("Failed to open source '{}': {}", source.name(), e);
            self.source = Some(source);
            return Err(e);
        }

        self.shared.set_state(WorkerState::Running);
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || run(shared, source));
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The source moved into the failed closure and has been dropped
                self.shared.set_state(WorkerState::Stopped);
                self.released = true;
                Err(e.into())
            }
        }
    }

    /// Stop delivering frames and discard what is queued in the output
    pub fn pause(&self) {
        if self.state() != WorkerState::Running {
            return;
        }
        self.shared.set_state(WorkerState::Paused);
        let _gate = self.shared.push_gate.lock();
        let flushed = self.shared.output.flush();
        tracing::info!("Acquisition paused ({} queued frames flushed)", flushed);
    }

    pub fn resume(&self) {
        if self.state() == WorkerState::Paused {
            self.shared.set_state(WorkerState::Running);
            tracing::info!("Acquisition resumed");
        }
    }

    /// Stop the loop, join the thread and release the source.
    ///
    /// Release failures are logged, never returned: the worker always ends
    /// up `Stopped`. Calling `stop()` twice is harmless.
    pub fn stop(&mut self) {
        self.shared.set_state(WorkerState::Stopped);
        if self.released {
            return;
        }
        self.released = true;

        let mut source = match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(source) => source,
                Err(_) => {
                    tracing::error!("Acquisition thread panicked; source not released");
                    return;
                }
            },
            None => match self.source.take() {
                // Never started: nothing was opened, only dispose
                Some(mut source) => {
                    if let Err(e) = source.dispose() {
                        tracing::warn!("Failed to dispose source '{}': {}", source.name(), e);
                    }
                    return;
                }
                None => return,
            },
        };

        if let Err(e) = source.close() {
            tracing::warn!("Failed to close source '{}': {}", source.name(), e);
        }
        if let Err(e) = source.dispose() {
            tracing::warn!("Failed to dispose source '{}': {}", source.name(), e);
        }
        tracing::info!("Acquisition stopped after {} frames", self.frames_acquired());
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state() == WorkerState::Paused
    }

    /// `1 / last inter-frame interval`, 0 until two frames have been seen
    pub fn measured_fps(&self) -> f64 {
        self.shared.rate.lock().fps()
    }

    /// Most recent inter-frame interval
    pub fn frame_interval(&self) -> Option<Duration> {
        self.shared.rate.lock().interval()
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.shared.rate.lock().last_frame_at()
    }

    /// Frames waiting in the output channel
    pub fn queue_depth(&self) -> usize {
        self.shared.output.len()
    }

    pub fn output(&self) -> &Arc<FrameChannel> {
        &self.shared.output
    }

    pub fn drain_lock(&self) -> &DrainLock {
        &self.shared.drain_lock
    }

    /// Pop the oldest output frame without blocking
    pub fn next_frame(&self) -> Option<Frame> {
        let _guard = self.shared.drain_lock.lock();
        self.shared.output.pop()
    }

    /// Pop the oldest output frame, waiting up to `timeout` for one
    pub fn next_frame_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.next_frame() {
                return Some(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(IDLE_SLEEP.min(deadline - now));
        }
    }

    /// Copy of the most recently acquired frame, even if already drained
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared.latest.lock().clone()
    }

    /// Empty the output channel. Returns how many frames were discarded.
    pub fn flush(&self) -> usize {
        let _guard = self.shared.drain_lock.lock();
        self.shared.output.flush()
    }

    /// Frames evicted per overflow event, on both output and auxiliary
    pub fn set_drop_count(&self, n: usize) {
        self.shared.output.set_drop_count(n);
        self.shared.auxiliary.set_drop_count(n);
    }

    pub fn drop_count(&self) -> usize {
        self.shared.output.drop_count()
    }

    /// Also copy every acquired frame into the auxiliary channel
    pub fn set_use_auxiliary(&self, enabled: bool) {
        self.shared.use_auxiliary.store(enabled, Ordering::Relaxed);
    }

    pub fn uses_auxiliary(&self) -> bool {
        self.shared.use_auxiliary.load(Ordering::Relaxed)
    }

    pub fn auxiliary(&self) -> &Arc<FrameChannel> {
        &self.shared.auxiliary
    }

    pub fn flush_auxiliary(&self) -> usize {
        self.shared.auxiliary.flush()
    }

    pub fn frames_acquired(&self) -> u64 {
        self.shared.acquired.load(Ordering::Relaxed)
    }

    /// Frames lost to the output overflow policy
    pub fn dropped_frames(&self) -> u64 {
        self.shared.output.dropped()
    }

    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            state: self.state(),
            frames_acquired: self.frames_acquired(),
            frames_dropped: self.shared.output.dropped(),
            auxiliary_dropped: self.shared.auxiliary.dropped(),
            source_errors: self.shared.source_errors.load(Ordering::Relaxed),
            measured_fps: self.measured_fps(),
            queue_depth: self.shared.output.len(),
            auxiliary_depth: self.shared.auxiliary.len(),
        }
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for AcquisitionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionWorker")
            .field("state", &self.state())
            .field("queue_depth", &self.queue_depth())
            .field("released", &self.released)
            .finish()
    }
}

/// Worker thread body. Hands the source back for release.
fn run(shared: Arc<Shared>, mut source: Box<dyn FrameSource>) -> Box<dyn FrameSource> {
    tracing::info!("Acquisition worker started (source: {})", source.name());
    let mut seq = 0u64;

    loop {
        match shared.state() {
            WorkerState::Stopped => break,
            WorkerState::Paused => {
                std::thread::sleep(PAUSED_SLEEP);
                continue;
            }
            WorkerState::Running => {}
        }

        {
            let _guard = shared.drain_lock.lock();
            let evicted = shared.output.evict_if_full();
            if evicted > 0 {
                tracing::trace!("Output full, evicted {} oldest frames", evicted);
            }
        }

        match source.next_frame() {
            Ok(Some(frame)) => {
                if shared.publish(frame.with_seq(seq)) {
                    seq += 1;
                }
            }
            Ok(None) => std::thread::sleep(IDLE_SLEEP),
            Err(e) => {
                let n = shared.source_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 || n % 100 == 0 {
                    tracing::warn!("Source read failed ({} so far): {}", n, e);
                }
                std::thread::sleep(IDLE_SLEEP);
            }
        }
    }

    tracing::info!("Acquisition worker stopped");
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticSource;
    use crate::types::FrameShape;
    use mockall::mock;

    mock! {
        pub Source {}
        impl FrameSource for Source {
            fn open(&mut self) -> Result<()>;
            fn next_frame(&mut self) -> Result<Option<Frame>>;
            fn close(&mut self) -> Result<()>;
            fn dispose(&mut self) -> Result<()>;
        }
    }

    fn create_test_worker(capacity: usize) -> AcquisitionWorker {
        let source = SyntheticSource::new(2, 2);
        AcquisitionWorker::new(Box::new(source), FrameChannel::shared(capacity, 1))
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_worker_creation() {
        let worker = create_test_worker(4);
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.measured_fps(), 0.0);
        assert_eq!(worker.queue_depth(), 0);
        assert!(worker.latest_frame().is_none());
    }

    #[test]
    fn test_source_lifecycle_calls() {
        let mut source = MockSource::new();
        source.expect_open().times(1).returning(|| Ok(()));
        source
            .expect_next_frame()
            .returning(|| Ok(Some(Frame::zeros(FrameShape::new(1, 1)))));
        source.expect_close().times(1).returning(|| Ok(()));
        source.expect_dispose().times(1).returning(|| Ok(()));

        let mut worker = AcquisitionWorker::new(Box::new(source), FrameChannel::shared(4, 1));
        worker.start().unwrap();
        assert!(wait_for(|| worker.frames_acquired() > 0));
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_release_failure_is_not_fatal() {
        let mut source = MockSource::new();
        source.expect_open().returning(|| Ok(()));
        source.expect_next_frame().returning(|| Ok(None));
        source
            .expect_close()
            .times(1)
            .returning(|| Err(PipelineError::Source("usb gone".into())));
        source
            .expect_dispose()
            .times(1)
            .returning(|| Err(PipelineError::Source("double free".into())));

        let mut worker = AcquisitionWorker::new(Box::new(source), FrameChannel::shared(4, 1));
        worker.start().unwrap();
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_open_failure_leaves_worker_stopped() {
        let mut source = MockSource::new();
        source
            .expect_open()
            .returning(|| Err(PipelineError::Source("no camera".into())));
        source.expect_dispose().returning(|| Ok(()));

        let mut worker = AcquisitionWorker::new(Box::new(source), FrameChannel::shared(4, 1));
        assert!(worker.start().is_err());
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_source_errors_are_transient() {
        let mut calls = 0;
        let mut source = MockSource::new();
        source.expect_open().returning(|| Ok(()));
        source.expect_next_frame().returning(move || {
            calls += 1;
            if calls % 2 == 0 {
                Err(PipelineError::Source("glitch".into()))
            } else {
                Ok(Some(Frame::zeros(FrameShape::new(1, 1))))
            }
        });
        source.expect_close().returning(|| Ok(()));
        source.expect_dispose().returning(|| Ok(()));

        let mut worker = AcquisitionWorker::new(Box::new(source), FrameChannel::shared(64, 1));
        worker.start().unwrap();
        assert!(wait_for(|| worker.frames_acquired() >= 3));
        worker.stop();
        assert!(worker.stats().source_errors >= 2);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let mut worker = create_test_worker(4);
        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(PipelineError::InvalidState(_))));
        worker.stop();
        assert!(matches!(worker.start(), Err(PipelineError::InvalidState(_))));
        worker.stop();
    }

    #[test]
    fn test_sequence_numbers_in_arrival_order() {
        let mut worker = create_test_worker(1000);
        worker.start().unwrap();
        assert!(wait_for(|| worker.queue_depth() >= 10));
        worker.stop();

        let frames = worker.output().drain_all();
        // Overflow only trims the front, so what remains is one contiguous run
        assert!(frames.len() >= 10);
        assert!(frames.windows(2).all(|w| w[1].seq() == w[0].seq() + 1));
    }

    #[test]
    fn test_output_never_exceeds_capacity() {
        let mut worker = create_test_worker(3);
        worker.start().unwrap();
        assert!(wait_for(|| worker.dropped_frames() > 10));
        assert!(worker.queue_depth() <= 3);
        worker.stop();
    }

    #[test]
    fn test_pause_flushes_and_holds() {
        let mut worker = create_test_worker(8);
        worker.start().unwrap();
        assert!(wait_for(|| worker.queue_depth() > 0));

        worker.pause();
        assert!(worker.is_paused());
        assert_eq!(worker.queue_depth(), 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(worker.queue_depth(), 0);

        worker.resume();
        assert!(wait_for(|| worker.queue_depth() > 0));
        worker.stop();
    }

    #[test]
    fn test_latest_frame_survives_drain() {
        let mut worker = create_test_worker(8);
        worker.start().unwrap();
        assert!(worker.next_frame_timeout(Duration::from_secs(1)).is_some());
        worker.pause();
        assert!(worker.next_frame().is_none());
        assert!(worker.latest_frame().is_some());
        worker.stop();
    }

    #[test]
    fn test_auxiliary_receives_copies() {
        let mut worker = create_test_worker(4).with_auxiliary_capacity(100);
        worker.set_use_auxiliary(true);
        worker.start().unwrap();
        assert!(wait_for(|| worker.auxiliary().len() >= 10));
        worker.stop();

        // Output overflowed at capacity 4 while the larger auxiliary did not
        assert!(worker.queue_depth() <= 4);
        assert!(worker.auxiliary().len() >= 10);
        let depth = worker.stats().auxiliary_depth;
        assert_eq!(worker.flush_auxiliary(), depth);
        assert!(worker.auxiliary().is_empty());
    }

    #[test]
    fn test_set_drop_count_applies_to_both_channels() {
        let worker = create_test_worker(6);
        worker.set_drop_count(3);
        assert_eq!(worker.drop_count(), 3);
        assert_eq!(worker.auxiliary().drop_count(), 3);
    }

    #[test]
    fn test_stop_without_start_disposes_only() {
        let mut source = MockSource::new();
        source.expect_open().never();
        source.expect_close().never();
        source.expect_dispose().times(1).returning(|| Ok(()));

        let mut worker = AcquisitionWorker::new(Box::new(source), FrameChannel::shared(2, 1));
        worker.stop();
        assert!(worker.start().is_err());
    }
}
