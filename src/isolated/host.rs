//! Host side of an isolated worker process.
//!
//! [`IsolatedHost`] owns the worker process and two helper threads: a
//! writer that serializes [`HostMessage`]s onto the worker's stdin, and a
//! reader that decodes [`WorkerMessage`]s from its stdout. The processing
//! loop only ever touches crossbeam channels, so it never blocks on the pipe.
//!
//! Results come back either inline or, in shared-region mode, as a shape
//! notification that is resolved here into a private copy of the region.

use super::process::{default_worker_path, ProcessHandle};
use super::protocol::{check_frame, read_message, write_message, HostMessage, RegionSpec, WorkerMessage};
use crate::config::IsolatedConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::settings::SettingsMessage;
use crate::types::{ComponentConfig, Frame};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::io::{BufReader, BufWriter};
use std::thread::JoinHandle;

#[cfg(unix)]
use super::shared_region::{SharedRegion, SharedRegionReader};
#[cfg(unix)]
use crate::pipeline::channel::ShapeChannel;

/// What a worker reply resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    /// A result frame, owned by the caller
    Output(Frame),
    /// The transform failed for the batch with this sequence number
    Failed { seq: u64, reason: String },
    /// A shared-region result that was already superseded or delivered
    Superseded,
}

/// Running worker process plus its pipe threads
pub struct IsolatedHost {
    process: ProcessHandle,
    outgoing: Option<Sender<HostMessage>>,
    incoming: Receiver<WorkerMessage>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    #[cfg(unix)]
    region: Option<SharedRegionReader>,
    in_flight: usize,
    max_in_flight: usize,
    config: IsolatedConfig,
}

impl IsolatedHost {
    /// Spawn the worker, hand it `transform` and wait for it to be ready
    pub fn spawn(config: &IsolatedConfig, transform: ComponentConfig) -> Result<Self> {
        let program = match &config.worker_path {
            Some(path) => path.clone(),
            None => default_worker_path()?,
        };

        #[cfg(unix)]
        let (region, region_spec) = if config.shared_region {
            let name = SharedRegion::unique_name();
            let region = SharedRegion::create(&name, config.region_shape)?;
            let spec = RegionSpec {
                name,
                max_shape: config.region_shape,
            };
            (Some(SharedRegionReader::new(region, ShapeChannel::shared(2, 1))), Some(spec))
        } else {
            (None, None)
        };
        #[cfg(not(unix))]
        let region_spec: Option<RegionSpec> = if config.shared_region {
            return Err(PipelineError::SharedRegion(
                "shared regions are only supported on unix".to_string(),
            ));
        } else {
            None
        };

        let mut process = ProcessHandle::spawn(&program, &transform.kind)?;
        let (stdin, stdout) = process.take_pipes()?;
        let mut stdin = BufWriter::new(stdin);
        let mut stdout = BufReader::new(stdout);

        write_message(
            &mut stdin,
            &HostMessage::Bootstrap {
                transform,
                region: region_spec,
            },
        )?;
        match read_message::<_, WorkerMessage>(&mut stdout)? {
            Some(WorkerMessage::Ready) => {}
            Some(WorkerMessage::Failed { reason, .. }) => {
                return Err(PipelineError::Worker(format!("worker bootstrap failed: {}", reason)))
            }
            Some(other) => {
                return Err(PipelineError::Worker(format!(
                    "unexpected bootstrap reply: {:?}",
                    other
                )))
            }
            None => {
                return Err(PipelineError::Worker(
                    "worker exited during bootstrap".to_string(),
                ))
            }
        }

        let (out_tx, out_rx) = unbounded::<HostMessage>();
        let writer = std::thread::Builder::new()
            .name("worker-writer".to_string())
            .spawn(move || {
                for msg in out_rx {
                    if let Err(e) = write_message(&mut stdin, &msg) {
                        tracing::warn!("Failed to write to worker: {}", e);
                        break;
                    }
                }
            })?;

        let (in_tx, in_rx) = unbounded::<WorkerMessage>();
        let reader = std::thread::Builder::new()
            .name("worker-reader".to_string())
            .spawn(move || loop {
                match read_message::<_, WorkerMessage>(&mut stdout) {
                    Ok(Some(msg)) => {
                        if in_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read from worker: {}", e);
                        break;
                    }
                }
            })?;

        // The region holds one result, so a second batch in flight would overwrite it
        let max_in_flight = if config.shared_region { 1 } else { config.max_in_flight.max(1) };
        tracing::info!("Isolated worker ready (PID {}, {} in flight)", process.pid(), max_in_flight);
        Ok(Self {
            process,
            outgoing: Some(out_tx),
            incoming: in_rx,
            writer: Some(writer),
            reader: Some(reader),
            #[cfg(unix)]
            region,
            in_flight: 0,
            max_in_flight,
            config: config.clone(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Whether another batch may be sent before results come back
    pub fn can_send(&self) -> bool {
        self.in_flight < self.max_in_flight
    }

    /// Batches sent whose reply has not arrived yet
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn uses_shared_region(&self) -> bool {
        self.config.shared_region
    }

    fn send(&self, msg: HostMessage) -> Result<()> {
        self.outgoing
            .as_ref()
            .ok_or_else(|| PipelineError::Disconnected("worker is shutting down".to_string()))?
            .send(msg)
            .map_err(|_| PipelineError::Disconnected("worker writer has exited".to_string()))
    }

    /// Queue one (combined) input for the worker
    pub fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.send(HostMessage::Frame(frame))?;
        self.in_flight += 1;
        Ok(())
    }

    /// Forward a settings update; applied before any later frame
    pub fn send_settings(&self, msg: SettingsMessage) -> Result<()> {
        self.send(HostMessage::Settings(msg))
    }

    /// Next resolved reply without blocking.
    ///
    /// `Err(Disconnected)` means the worker process has gone away.
    pub fn try_recv(&mut self) -> Result<Option<WorkerReply>> {
        let msg = match self.incoming.try_recv() {
            Ok(msg) => msg,
            Err(TryRecvError::Empty) => return Ok(None),
            Err(TryRecvError::Disconnected) => {
                return Err(PipelineError::Disconnected(format!(
                    "worker {} closed its output",
                    self.process.pid()
                )))
            }
        };

        match msg {
            WorkerMessage::Frame(frame) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Ok(Some(WorkerReply::Output(check_frame(frame)?)))
            }
            WorkerMessage::Failed { seq, reason } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Ok(Some(WorkerReply::Failed { seq, reason }))
            }
            WorkerMessage::Written { shape, .. } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.resolve_written(shape)
            }
            WorkerMessage::Ready => {
                tracing::warn!("Ignoring unexpected Ready from worker");
                Ok(None)
            }
        }
    }

    #[cfg(unix)]
    fn resolve_written(&mut self, shape: crate::types::FrameShape) -> Result<Option<WorkerReply>> {
        let reader = self.region.as_mut().ok_or_else(|| {
            PipelineError::SharedRegion("worker wrote to a region the host never created".to_string())
        })?;
        reader.shapes().push(shape);
        Ok(Some(match reader.read_next()? {
            Some(frame) => WorkerReply::Output(frame),
            None => WorkerReply::Superseded,
        }))
    }

    #[cfg(not(unix))]
    fn resolve_written(&mut self, _shape: crate::types::FrameShape) -> Result<Option<WorkerReply>> {
        Err(PipelineError::SharedRegion(
            "shared regions are only supported on unix".to_string(),
        ))
    }

    /// Ask the worker to exit, wait for it, then kill it if it does not
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(tx) = self.outgoing.take() {
            let _ = tx.send(HostMessage::Shutdown);
            // Dropping the sender ends the writer thread, which closes stdin
        }
        if let Err(e) = self.process.shutdown(self.config.shutdown_timeout()) {
            tracing::warn!("Failed to shut down worker: {}", e);
        }
        // Once the process is gone a pending write fails instead of blocking
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for IsolatedHost {
    fn drop(&mut self) {
        if self.outgoing.is_some() {
            self.shutdown_inner();
        }
    }
}

impl std::fmt::Debug for IsolatedHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedHost")
            .field("process", &self.process)
            .field("in_flight", &self.in_flight)
            .field("shared_region", &self.config.shared_region)
            .finish()
    }
}
