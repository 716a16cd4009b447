//! Processing worker: drains an input channel through a transform.
//!
//! The worker pops `batch_size` frames at a time, stacks them into one
//! multi-plane frame (plane 0 = oldest), invokes the transform once and
//! pushes the result into a bounded output channel. When the output is full
//! the oldest `batch_size` results are evicted first, keeping the output
//! aligned with a batch-sized input drop policy.
//!
//! # Execution Modes
//!
//! - **In-thread**: the transform lives behind a mutex in this process. The
//!   caller can reach it directly through [`ProcessingWorker::with_transform`];
//!   changes are visible at the next invocation and never land mid-invocation.
//! - **Isolated**: the transform lives in a `frame-worker` process (see
//!   [`crate::isolated`]). The only way to change it is the settings channel.
//!
//! Settings messages work in both modes. They are applied at the top of
//! each loop iteration, in the order sent, before any further input is
//! drained.
//!
//! # Failures
//!
//! A transform error discards that batch's output, is logged and counted,
//! and the loop carries on. Losing the isolated worker process stops the
//! loop and leaves the worker `Stopped`.

use super::acquisition::{IDLE_SLEEP, PAUSED_SLEEP};
use super::batch::combine_batch;
use super::channel::{DrainLock, FrameChannel};
use super::rate::RateMeter;
use super::settings::{settings_channel, SettingsMessage, SettingsReceiver, SettingsSender};
use crate::config::{ExecutionMode, IsolatedConfig};
use crate::error::{PipelineError, Result};
use crate::isolated::{IsolatedHost, WorkerReply};
use crate::transform::{Transform, TransformRegistry};
use crate::types::{ComponentConfig, Frame, ParamValue, WorkerState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Snapshot of processing statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingStats {
    pub state: WorkerState,
    pub batch_size: usize,
    /// Successful transform invocations
    pub batches_processed: u64,
    /// Invocations whose output was discarded
    pub batches_failed: u64,
    /// Seq of the newest frame in the most recent failed batch
    pub last_failed_seq: Option<u64>,
    /// Shared-region results overwritten before the host read them
    pub results_superseded: u64,
    /// Results evicted from the output by the overflow policy
    pub outputs_dropped: u64,
    /// Output rate, `1 / last interval`
    pub measured_fps: f64,
    pub input_depth: usize,
    pub output_depth: usize,
    /// Batches sent to an isolated worker and not yet answered
    pub in_flight: usize,
}

/// Where the transform lives
enum Backend {
    InThread {
        transform: Arc<Mutex<Box<dyn Transform>>>,
        registry: TransformRegistry,
    },
    Isolated {
        transform: ComponentConfig,
        config: IsolatedConfig,
    },
}

/// State shared between the controller and the worker thread
struct Shared {
    state: AtomicU8,
    input: Arc<FrameChannel>,
    output: Arc<FrameChannel>,
    drain_lock: DrainLock,
    batch_size: AtomicUsize,
    latest_input: Mutex<Option<Frame>>,
    latest_output: Mutex<Option<Frame>>,
    rate: Mutex<RateMeter>,
    processed: AtomicU64,
    failed: AtomicU64,
    last_failed_seq: Mutex<Option<u64>>,
    superseded: AtomicU64,
    in_flight: AtomicUsize,
}

impl Shared {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    /// Pop one full batch under the drain lock and stack it.
    ///
    /// Also returns the seq of the newest popped frame, which is known even
    /// when stacking fails.
    fn next_batch(&self) -> Option<(u64, Result<Frame>)> {
        let frames = {
            let _guard = self.drain_lock.lock();
            self.input.pop_exact(self.batch_size())?
        };
        let seq = frames.last().map(Frame::seq).unwrap_or(0);
        let combined = combine_batch(frames);
        if let Ok(frame) = &combined {
            *self.latest_input.lock() = Some(frame.clone());
        }
        Some((seq, combined))
    }

    fn publish(&self, frame: Frame) {
        self.output.evict_oldest_if_full(self.batch_size());
        *self.latest_output.lock() = Some(frame.clone());
        self.output.push(frame);
        self.rate.lock().record(std::time::Instant::now());
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, seq: u64, reason: &dyn std::fmt::Display) {
        *self.last_failed_seq.lock() = Some(seq);
        let n = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!("Transform failed on batch ending at frame {} ({} so far): {}", seq, n, reason);
    }
}

/// Runs a transform over batches from an input channel
pub struct ProcessingWorker {
    shared: Arc<Shared>,
    backend: Backend,
    settings_tx: SettingsSender,
    settings_rx: Option<SettingsReceiver>,
    handle: Option<JoinHandle<()>>,
    released: bool,
}

impl ProcessingWorker {
    fn with_backend(backend: Backend, input: Arc<FrameChannel>, output: Arc<FrameChannel>) -> Self {
        let (settings_tx, settings_rx) = settings_channel();
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(WorkerState::Stopped.to_u8()),
                input,
                output,
                drain_lock: DrainLock::new(),
                batch_size: AtomicUsize::new(1),
                latest_input: Mutex::new(None),
                latest_output: Mutex::new(None),
                rate: Mutex::new(RateMeter::new()),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                last_failed_seq: Mutex::new(None),
                superseded: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
            }),
            backend,
            settings_tx,
            settings_rx: Some(settings_rx),
            handle: None,
            released: false,
        }
    }

    /// Worker running `transform` on a thread of this process
    pub fn in_thread(
        transform: Box<dyn Transform>,
        input: Arc<FrameChannel>,
        output: Arc<FrameChannel>,
    ) -> Self {
        Self::with_backend(
            Backend::InThread {
                transform: Arc::new(Mutex::new(transform)),
                registry: TransformRegistry::with_builtins(),
            },
            input,
            output,
        )
    }

    /// Worker running the transform described by `transform` in a separate process
    pub fn isolated(
        transform: ComponentConfig,
        config: IsolatedConfig,
        input: Arc<FrameChannel>,
        output: Arc<FrameChannel>,
    ) -> Self {
        Self::with_backend(Backend::Isolated { transform, config }, input, output)
    }

    /// Registry used for in-thread `Replace` messages
    pub fn with_registry(mut self, registry: TransformRegistry) -> Self {
        if let Backend::InThread { registry: r, .. } = &mut self.backend {
            *r = registry;
        }
        self
    }

    /// Share `lock` with every other component that drains the input
    ///
    /// Must be called before `start()`.
    pub fn with_drain_lock(mut self, lock: DrainLock) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.drain_lock = lock;
        }
        self
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        self.set_batch_size(batch_size);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        match self.backend {
            Backend::InThread { .. } => ExecutionMode::InThread,
            Backend::Isolated { .. } => ExecutionMode::Isolated,
        }
    }

    /// Begin draining the input
    ///
    /// In isolated mode this spawns the worker process and waits for it to
    /// report ready, so configuration errors surface here.
    pub fn start(&mut self) -> Result<()> {
        if self.released {
            return Err(PipelineError::InvalidState(
                "processing worker was stopped and cannot be restarted".to_string(),
            ));
        }
        if self.handle.is_some() {
            return Err(PipelineError::InvalidState(format!(
                "processing worker is already {}",
                self.state()
            )));
        }
        let settings = self
            .settings_rx
            .take()
            .ok_or_else(|| PipelineError::InvalidState("settings receiver missing".to_string()))?;

        let shared = self.shared.clone();
        let body: Box<dyn FnOnce() + Send> = match &self.backend {
            Backend::InThread { transform, registry } => {
                let transform = transform.clone();
                let registry = registry.clone();
                Box::new(move || run_in_thread(shared, transform, registry, settings))
            }
            Backend::Isolated { transform, config } => {
                let host = match IsolatedHost::spawn(config, transform.clone()) {
                    Ok(host) => host,
                    Err(e) => {
                        self.settings_rx = Some(settings);
                        return Err(e);
                    }
                };
                Box::new(move || run_isolated(shared, host, settings))
            }
        };

        self.shared.set_state(WorkerState::Running);
        match std::thread::Builder::new().name("processing".to_string()).spawn(body) {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(WorkerState::Stopped);
                self.released = true;
                Err(e.into())
            }
        }
    }

    /// Stop draining the input; upstream drop-oldest takes over
    pub fn pause(&self) {
        if self.state() == WorkerState::Running {
            self.shared.set_state(WorkerState::Paused);
            tracing::info!("Processing paused");
        }
    }

    pub fn resume(&self) {
        if self.state() == WorkerState::Paused {
            self.shared.set_state(WorkerState::Running);
            tracing::info!("Processing resumed");
        }
    }

    /// Stop the loop and, in isolated mode, the worker process
    pub fn stop(&mut self) {
        self.shared.set_state(WorkerState::Stopped);
        self.released = true;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Processing thread panicked");
            }
            tracing::info!(
                "Processing stopped after {} batches ({} failed)",
                self.shared.processed.load(Ordering::Relaxed),
                self.shared.failed.load(Ordering::Relaxed)
            );
        }
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

    /// Run `f` against the in-thread transform, between invocations
    pub fn with_transform<R>(&self, f: impl FnOnce(&mut dyn Transform) -> R) -> Result<R> {
        match &self.backend {
            Backend::InThread { transform, .. } => {
                let mut guard = transform.lock();
                Ok(f(guard.as_mut()))
            }
            Backend::Isolated { .. } => Err(PipelineError::InvalidState(
                "the transform of an isolated worker is only reachable through settings".to_string(),
            )),
        }
    }

    /// Handle for pushing settings from elsewhere
    pub fn settings(&self) -> SettingsSender {
        self.settings_tx.clone()
    }

    /// Queue a replacement transform
    pub fn replace_transform(&self, config: ComponentConfig) -> bool {
        self.settings_tx.send(SettingsMessage::Replace(config))
    }

    /// Queue a named command for the current transform
    pub fn invoke(&self, command: impl Into<String>, arg: impl Into<ParamValue>) -> bool {
        self.settings_tx.invoke(command, arg)
    }

    /// Push a frame into the input, e.g. to reprocess a still image
    pub fn add_frame(&self, frame: Frame) {
        self.shared.input.push(frame);
    }

    pub fn flush_input(&self) -> usize {
        let _guard = self.shared.drain_lock.lock();
        self.shared.input.flush()
    }

    pub fn flush_output(&self) -> usize {
        self.shared.output.flush()
    }

    /// Frames combined per invocation (clamped to at least 1), effective
    /// from the next loop iteration
    pub fn set_batch_size(&self, batch_size: usize) {
        self.shared.batch_size.store(batch_size.max(1), Ordering::Relaxed);
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size()
    }

    /// Copy of the most recent combined input
    pub fn latest_input(&self) -> Option<Frame> {
        self.shared.latest_input.lock().clone()
    }

    /// Copy of the most recent result, even if already drained
    pub fn latest_output(&self) -> Option<Frame> {
        self.shared.latest_output.lock().clone()
    }

    /// Pop the oldest result
    pub fn next_output(&self) -> Option<Frame> {
        self.shared.output.pop()
    }

    pub fn input(&self) -> &Arc<FrameChannel> {
        &self.shared.input
    }

    pub fn output(&self) -> &Arc<FrameChannel> {
        &self.shared.output
    }

    pub fn drain_lock(&self) -> &DrainLock {
        &self.shared.drain_lock
    }

    /// Output rate, 0 until two results have been published
    pub fn measured_fps(&self) -> f64 {
        self.shared.rate.lock().fps()
    }

    pub fn stats(&self) -> ProcessingStats {
        ProcessingStats {
            state: self.state(),
            batch_size: self.batch_size(),
            batches_processed: self.shared.processed.load(Ordering::Relaxed),
            batches_failed: self.shared.failed.load(Ordering::Relaxed),
            last_failed_seq: *self.shared.last_failed_seq.lock(),
            results_superseded: self.shared.superseded.load(Ordering::Relaxed),
            outputs_dropped: self.shared.output.dropped(),
            measured_fps: self.measured_fps(),
            input_depth: self.shared.input.len(),
            output_depth: self.shared.output.len(),
            in_flight: self.shared.in_flight.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ProcessingWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for ProcessingWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingWorker")
            .field("mode", &self.mode())
            .field("state", &self.state())
            .field("batch_size", &self.batch_size())
            .finish()
    }
}

/// In-thread loop body
fn run_in_thread(
    shared: Arc<Shared>,
    transform: Arc<Mutex<Box<dyn Transform>>>,
    registry: TransformRegistry,
    settings: SettingsReceiver,
) {
    tracing::info!("Processing worker started (in-thread, '{}')", transform.lock().name());

    loop {
        let (msgs, _) = settings.drain();
        if !msgs.is_empty() {
            let mut current = transform.lock();
            for msg in msgs {
                if let Err(e) = msg.apply(&mut *current, &registry) {
                    tracing::warn!("Settings update rejected: {}", e);
                }
            }
        }

        match shared.state() {
            WorkerState::Stopped => break,
            WorkerState::Paused => {
                std::thread::sleep(PAUSED_SLEEP);
                continue;
            }
            WorkerState::Running => {}
        }

        let (seq, batch) = match shared.next_batch() {
            Some(batch) => batch,
            None => {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }
        };

        let result = batch.and_then(|input| transform.lock().process(&input).map(|out| out.with_seq(seq)));
        match result {
            Ok(output) => shared.publish(output),
            Err(e) => shared.record_failure(seq, &e),
        }
    }

    tracing::info!("Processing worker stopped");
}

/// Isolated-mode loop body: feeds the worker process and collects results
fn run_isolated(shared: Arc<Shared>, mut host: IsolatedHost, settings: SettingsReceiver) {
    tracing::info!("Processing worker started (isolated, PID {})", host.pid());

    'outer: loop {
        let (msgs, _) = settings.drain();
        for msg in msgs {
            if let Err(e) = host.send_settings(msg) {
                tracing::error!("Lost isolated worker: {}", e);
                break 'outer;
            }
        }

        let mut busy = false;
        loop {
            match host.try_recv() {
                Ok(Some(WorkerReply::Output(frame))) => {
                    shared.publish(frame);
                    busy = true;
                }
                Ok(Some(WorkerReply::Failed { seq, reason })) => {
                    shared.record_failure(seq, &reason);
                    busy = true;
                }
                Ok(Some(WorkerReply::Superseded)) => {
                    let n = shared.superseded.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!("Shared-region result overwritten before read ({} so far)", n);
                    busy = true;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Lost isolated worker: {}", e);
                    break 'outer;
                }
            }
        }
        shared.in_flight.store(host.in_flight(), Ordering::Relaxed);

        match shared.state() {
            WorkerState::Stopped => break,
            WorkerState::Paused => {
                std::thread::sleep(PAUSED_SLEEP);
                continue;
            }
            WorkerState::Running => {}
        }

        if host.can_send() {
            match shared.next_batch() {
                Some((_, Ok(input))) => {
                    if let Err(e) = host.send_frame(input) {
                        tracing::error!("Lost isolated worker: {}", e);
                        break;
                    }
                    busy = true;
                }
                Some((seq, Err(e))) => {
                    shared.record_failure(seq, &e);
                    busy = true;
                }
                None => {}
            }
        }

        if !busy {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    shared.set_state(WorkerState::Stopped);
    shared.in_flight.store(0, Ordering::Relaxed);
    host.shutdown();
    tracing::info!("Processing worker stopped");
}
