//! Worker side of the isolated execution context.
//!
//! [`run_worker`] is the whole body of the `frame-worker` executable: it
//! reads a bootstrap message, builds its own transform through a
//! [`TransformRegistry`], then answers every input frame with exactly one
//! reply. Settings updates are applied strictly in the order received and
//! only between frames. Blocking reads are fine here: this process has
//! nothing else to do while waiting for work.

use super::protocol::{check_frame, read_message, write_message, HostMessage, WorkerMessage};
use crate::error::{PipelineError, Result};
use crate::transform::{Transform, TransformRegistry};
use crate::types::Frame;
use std::io::{BufReader, BufWriter, Read, Write};

#[cfg(unix)]
use super::shared_region::{SharedRegion, SharedRegionWriter};

/// Where results are published
enum ResultSink {
    Inline,
    #[cfg(unix)]
    Region(SharedRegionWriter),
}

impl ResultSink {
    fn publish(&mut self, frame: Frame) -> Result<WorkerMessage> {
        match self {
            ResultSink::Inline => Ok(WorkerMessage::Frame(frame)),
            #[cfg(unix)]
            ResultSink::Region(writer) => {
                let shape = writer.write(&frame)?;
                Ok(WorkerMessage::Written {
                    shape,
                    seq: frame.seq(),
                })
            }
        }
    }
}

/// Serve one host connection until shutdown or end of input
pub fn run_worker<R: Read, W: Write>(input: R, output: W, registry: &TransformRegistry) -> Result<()> {
    let mut input = BufReader::new(input);
    let mut output = BufWriter::new(output);

    let (config, region) = match read_message::<_, HostMessage>(&mut input)? {
        Some(HostMessage::Bootstrap { transform, region }) => (transform, region),
        Some(other) => {
            return Err(PipelineError::Worker(format!(
                "expected bootstrap, got {:?}",
                other
            )))
        }
        None => {
            tracing::info!("Host closed the pipe before bootstrap");
            return Ok(());
        }
    };

    let setup = build(registry, &config, region);
    let (mut transform, mut sink) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            write_message(
                &mut output,
                &WorkerMessage::Failed {
                    seq: 0,
                    reason: e.to_string(),
                },
            )?;
            return Err(e);
        }
    };
    write_message(&mut output, &WorkerMessage::Ready)?;
    tracing::info!("Worker ready with transform '{}'", transform.name());

    let mut processed = 0u64;
    let mut failed = 0u64;
    loop {
        match read_message::<_, HostMessage>(&mut input)? {
            Some(HostMessage::Frame(frame)) => {
                let reply = match process_one(transform.as_mut(), &mut sink, frame) {
                    Ok(reply) => {
                        processed += 1;
                        reply
                    }
                    Err((seq, e)) => {
                        failed += 1;
                        tracing::warn!("Transform failed on frame {}: {}", seq, e);
                        WorkerMessage::Failed {
                            seq,
                            reason: e.to_string(),
                        }
                    }
                };
                write_message(&mut output, &reply)?;
            }
            Some(HostMessage::Settings(msg)) => {
                if let Err(e) = msg.apply(&mut transform, registry) {
                    tracing::warn!("Settings update rejected: {}", e);
                }
            }
            Some(HostMessage::Shutdown) => {
                tracing::info!("Shutdown requested");
                break;
            }
            Some(HostMessage::Bootstrap { .. }) => {
                tracing::warn!("Ignoring repeated bootstrap");
            }
            None => {
                tracing::info!("Host closed the pipe");
                break;
            }
        }
    }

    tracing::info!("Worker exiting ({} processed, {} failed)", processed, failed);
    Ok(())
}

fn build(
    registry: &TransformRegistry,
    config: &crate::types::ComponentConfig,
    region: Option<super::protocol::RegionSpec>,
) -> Result<(Box<dyn Transform>, ResultSink)> {
    let transform = registry.build(config)?;
    let sink = match region {
        None => ResultSink::Inline,
        #[cfg(unix)]
        Some(spec) => {
            let region = SharedRegion::attach(&spec.name)?;
            if region.capacity() < spec.max_shape.len() {
                return Err(PipelineError::SharedRegion(format!(
                    "region {} holds {} samples, expected {}",
                    spec.name,
                    region.capacity(),
                    spec.max_shape.len()
                )));
            }
            ResultSink::Region(SharedRegionWriter::new(region))
        }
        #[cfg(not(unix))]
        Some(_) => {
            return Err(PipelineError::SharedRegion(
                "shared regions are only supported on unix".to_string(),
            ))
        }
    };
    Ok((transform, sink))
}

/// Validate, transform and publish one input
fn process_one(
    transform: &mut dyn Transform,
    sink: &mut ResultSink,
    frame: Frame,
) -> std::result::Result<WorkerMessage, (u64, PipelineError)> {
    let seq = frame.seq();
    let run = || -> Result<WorkerMessage> {
        let frame = check_frame(frame)?;
        let output = transform.process(&frame)?.with_seq(seq);
        sink.publish(output)
    };
    run().map_err(|e| (seq, e))
}
