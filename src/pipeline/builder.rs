//! Pipeline facade: acquisition plus an optional processing stage.
//!
//! [`Pipeline::from_config`] resolves the configured source and transform
//! through their registries and wires both workers through one shared
//! bounded channel guarded by one [`DrainLock`]:
//!
//! ```text
//! [FrameSource] ─► AcquisitionWorker ─► channel ─► ProcessingWorker ─► output
//!                          └─► auxiliary (optional)
//! ```
//!
//! Consumers poll [`Pipeline::latest_output`] or [`Pipeline::next_output`] at
//! their own cadence. With processing disabled those read the acquisition
//! channel directly.

use super::acquisition::{AcquisitionStats, AcquisitionWorker};
use super::channel::{DrainLock, FrameChannel};
use super::processing::{ProcessingStats, ProcessingWorker};
use super::settings::SettingsSender;
use crate::config::{ExecutionMode, PipelineConfig};
use crate::error::{Result, ResultExt};
use crate::source::SourceRegistry;
use crate::transform::TransformRegistry;
use crate::types::{Frame, WorkerState};
use std::sync::Arc;

/// Combined statistics for both stages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub acquisition: AcquisitionStats,
    pub processing: Option<ProcessingStats>,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let a = &self.acquisition;
        write!(
            f,
            "acquired {} ({:.1} fps, {} dropped, depth {})",
            a.frames_acquired, a.measured_fps, a.frames_dropped, a.queue_depth
        )?;
        if let Some(p) = &self.processing {
            write!(
                f,
                ", processed {} ({:.1} fps, {} failed, {} dropped, depth {})",
                p.batches_processed, p.measured_fps, p.batches_failed, p.outputs_dropped, p.output_depth
            )?;
        }
        Ok(())
    }
}

/// A configured acquisition/processing pair
pub struct Pipeline {
    acquisition: AcquisitionWorker,
    processing: Option<ProcessingWorker>,
    channel: Arc<FrameChannel>,
}

impl Pipeline {
    /// Build both stages from `config`
    pub fn from_config(
        config: &PipelineConfig,
        sources: &SourceRegistry,
        transforms: &TransformRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let acq = &config.acquisition;
        let source = sources
            .build(&acq.source)
            .with_context(|| format!("building source '{}'", acq.source.kind))?;
        let channel = FrameChannel::shared(acq.capacity, acq.drop_count);
        let lock = DrainLock::new();

        let acquisition = AcquisitionWorker::new(source, channel.clone())
            .with_drain_lock(lock.clone())
            .with_auxiliary_capacity(acq.auxiliary_capacity);
        acquisition.set_use_auxiliary(acq.auxiliary);

        let proc = &config.processing;
        let processing = if proc.enabled {
            let output = FrameChannel::shared(proc.output_capacity, 1);
            let worker = match proc.mode {
                ExecutionMode::InThread => {
                    let transform = transforms
                        .build(&proc.transform)
                        .with_context(|| format!("building transform '{}'", proc.transform.kind))?;
                    ProcessingWorker::in_thread(transform, channel.clone(), output)
                        .with_registry(transforms.clone())
                }
                ExecutionMode::Isolated => ProcessingWorker::isolated(
                    proc.transform.clone(),
                    proc.isolated.clone(),
                    channel.clone(),
                    output,
                ),
            };
            Some(worker.with_drain_lock(lock).with_batch_size(proc.batch_size))
        } else {
            None
        };

        tracing::debug!(
            "Pipeline built: source '{}', processing {}",
            acq.source.kind,
            if proc.enabled { proc.transform.kind.as_str() } else { "disabled" }
        );

        Ok(Self {
            acquisition,
            processing,
            channel,
        })
    }

    /// Start processing first, then acquisition
    pub fn start(&mut self) -> Result<()> {
        if let Some(processing) = &mut self.processing {
            processing.start().context("starting processing")?;
        }
        if let Err(e) = self.acquisition.start() {
            if let Some(processing) = &mut self.processing {
                processing.stop();
            }
            return Err(e.with_context("starting acquisition"));
        }
        tracing::info!("Pipeline started");
        Ok(())
    }

    pub fn pause(&self) {
        self.acquisition.pause();
        if let Some(processing) = &self.processing {
            processing.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(processing) = &self.processing {
            processing.resume();
        }
        self.acquisition.resume();
    }

    /// Stop acquisition, then processing. Terminal.
    pub fn stop(&mut self) {
        self.acquisition.stop();
        if let Some(processing) = &mut self.processing {
            processing.stop();
        }
        tracing::info!("Pipeline stopped");
    }

    pub fn state(&self) -> WorkerState {
        self.acquisition.state()
    }

    pub fn acquisition(&self) -> &AcquisitionWorker {
        &self.acquisition
    }

    pub fn processing(&self) -> Option<&ProcessingWorker> {
        self.processing.as_ref()
    }

    /// Channel between the two stages
    pub fn channel(&self) -> &Arc<FrameChannel> {
        &self.channel
    }

    /// Settings handle for the processing stage, if there is one
    pub fn settings(&self) -> Option<SettingsSender> {
        self.processing.as_ref().map(ProcessingWorker::settings)
    }

    /// Copy of the newest frame at the end of the pipeline
    pub fn latest_output(&self) -> Option<Frame> {
        match &self.processing {
            Some(processing) => processing.latest_output(),
            None => self.acquisition.latest_frame(),
        }
    }

    /// Pop the oldest frame at the end of the pipeline
    pub fn next_output(&self) -> Option<Frame> {
        match &self.processing {
            Some(processing) => processing.next_output(),
            None => self.acquisition.next_frame(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            acquisition: self.acquisition.stats(),
            processing: self.processing.as_ref().map(ProcessingWorker::stats),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("acquisition", &self.acquisition)
            .field("processing", &self.processing)
            .finish()
    }
}
