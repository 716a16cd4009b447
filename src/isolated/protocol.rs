//! Wire protocol between the host and an isolated worker process.
//!
//! Every message is a little-endian `u32` byte length followed by that many
//! bytes of MessagePack. The host writes [`HostMessage`]s to the worker's
//! stdin; the worker answers on stdout with [`WorkerMessage`]s. Each
//! `HostMessage::Frame` gets exactly one `Frame`, `Written` or `Failed` reply.

use crate::error::{PipelineError, Result};
use crate::pipeline::settings::SettingsMessage;
use crate::types::{ComponentConfig, Frame, FrameShape};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};

/// Upper bound on a single message, guards against a corrupt length prefix
pub const MAX_MESSAGE_BYTES: usize = 512 * 1024 * 1024;

/// Where the worker should publish results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    /// Name of the shared memory object to attach to
    pub name: String,
    /// Largest frame the region can carry
    pub max_shape: FrameShape,
}

/// Host → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostMessage {
    /// First message: initial transform and optional shared region
    Bootstrap {
        transform: ComponentConfig,
        region: Option<RegionSpec>,
    },
    /// One input (a batch is already combined into one multi-plane frame)
    Frame(Frame),
    Settings(SettingsMessage),
    Shutdown,
}

/// Worker → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Bootstrap succeeded
    Ready,
    /// Result returned inline
    Frame(Frame),
    /// Result placed in the shared region
    Written { shape: FrameShape, seq: u64 },
    /// The transform failed for this input; nothing was published
    Failed { seq: u64, reason: String },
}

/// Encode `msg` and write it with its length prefix
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let payload = rmp_serde::to_vec(msg)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| PipelineError::Worker(format!("message of {} bytes is too large", payload.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one message. Returns `Ok(None)` on a clean end of stream.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(PipelineError::Worker(format!(
                    "stream ended inside a length prefix ({} of 4 bytes)",
                    filled
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(PipelineError::Worker(format!(
            "message length {} exceeds limit",
            len
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

/// Reject a decoded frame whose payload does not match its shape
pub fn check_frame(frame: Frame) -> Result<Frame> {
    let seq = frame.seq();
    let shape = frame.shape();
    Ok(Frame::new(shape, frame.into_data())?.with_seq(seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamValue;
    use std::io::Cursor;

    #[test]
    fn test_stream_of_messages() {
        let frame = Frame::from_fn(FrameShape::with_planes(2, 3, 2), |r, c, p| (r + c + p) as f32).with_seq(41);
        let sent = vec![
            HostMessage::Bootstrap {
                transform: ComponentConfig::new("scale").with("gain", 2.0),
                region: Some(RegionSpec {
                    name: "/framepipe-test".into(),
                    max_shape: FrameShape::new(480, 640),
                }),
            },
            HostMessage::Frame(frame.clone()),
            HostMessage::Settings(SettingsMessage::Invoke {
                command: "set_gain".into(),
                arg: ParamValue::Float(3.0),
            }),
            HostMessage::Shutdown,
        ];

        let mut buf = Vec::new();
        for msg in &sent {
            write_message(&mut buf, msg).unwrap();
        }

        let mut cursor = Cursor::new(buf);
        let mut received = Vec::new();
        while let Some(msg) = read_message::<_, HostMessage>(&mut cursor).unwrap() {
            received.push(msg);
        }
        assert_eq!(received, sent);
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerMessage::Ready).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(read_message::<_, WorkerMessage>(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_empty_stream_is_clean_eof() {
        assert!(read_message::<_, WorkerMessage>(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_truncated_length_prefix_is_an_error() {
        for cut in 1..4 {
            let mut buf = Vec::new();
            write_message(&mut buf, &WorkerMessage::Ready).unwrap();
            buf.truncate(cut);
            let err = read_message::<_, WorkerMessage>(&mut Cursor::new(buf)).unwrap_err();
            assert!(matches!(err, PipelineError::Worker(_)), "cut at {}: {}", cut, err);
        }
    }

    #[test]
    fn test_oversized_length_rejected() {
        let buf = u32::MAX.to_le_bytes().to_vec();
        let err = read_message::<_, WorkerMessage>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, PipelineError::Worker(_)));
    }

    #[test]
    fn test_check_frame_rejects_inconsistent_payload() {
        #[derive(Serialize)]
        struct RawFrame {
            seq: u64,
            shape: FrameShape,
            data: Vec<f32>,
        }
        let raw = RawFrame {
            seq: 1,
            shape: FrameShape::new(2, 2),
            data: vec![0.0; 3],
        };
        let bytes = rmp_serde::to_vec(&raw).unwrap();
        let frame: Frame = rmp_serde::from_slice(&bytes).unwrap();
        assert!(check_frame(frame).is_err());
    }
}
