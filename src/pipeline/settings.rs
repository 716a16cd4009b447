//! One-way settings/command channel into a processing worker.
//!
//! The caller pushes either a complete replacement configuration or a named
//! command; the worker drains the channel at the top of each loop iteration,
//! applying messages strictly in the order they were sent and only between
//! transform invocations. In isolated mode this is the only way to change
//! the worker's transform, because the caller's memory is not visible there.

use crate::error::Result;
use crate::transform::{Transform, TransformRegistry};
use crate::types::{ComponentConfig, ParamValue};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

/// A settings update for a processing worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingsMessage {
    /// Swap in a freshly constructed transform
    Replace(ComponentConfig),
    /// Call a named command on the current transform
    Invoke { command: String, arg: ParamValue },
}

impl SettingsMessage {
    /// Apply to `transform`, building replacements through `registry`.
    ///
    /// A failed replacement leaves the current transform in place.
    pub fn apply(self, transform: &mut Box<dyn Transform>, registry: &TransformRegistry) -> Result<()> {
        match self {
            SettingsMessage::Replace(config) => {
                *transform = registry.build(&config)?;
                tracing::info!("Transform replaced with '{}'", config.kind);
                Ok(())
            }
            SettingsMessage::Invoke { command, arg } => {
                tracing::debug!("Invoking '{}' on '{}'", command, transform.name());
                transform.invoke(&command, &arg)
            }
        }
    }
}

/// Caller-side handle
#[derive(Debug, Clone)]
pub struct SettingsSender {
    tx: Sender<SettingsMessage>,
}

/// Worker-side handle
#[derive(Debug)]
pub struct SettingsReceiver {
    rx: Receiver<SettingsMessage>,
}

/// Create a connected sender/receiver pair
pub fn settings_channel() -> (SettingsSender, SettingsReceiver) {
    let (tx, rx) = unbounded();
    (SettingsSender { tx }, SettingsReceiver { rx })
}

impl SettingsSender {
    /// Queue a message. Returns `false` if the worker has gone away.
    pub fn send(&self, msg: SettingsMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Queue a replacement configuration
    pub fn replace(&self, config: ComponentConfig) -> bool {
        self.send(SettingsMessage::Replace(config))
    }

    /// Queue a command invocation
    pub fn invoke(&self, command: impl Into<String>, arg: impl Into<ParamValue>) -> bool {
        self.send(SettingsMessage::Invoke {
            command: command.into(),
            arg: arg.into(),
        })
    }

    /// Number of messages not yet applied
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl SettingsReceiver {
    /// Take the next pending message without blocking
    pub fn try_recv(&self) -> Option<SettingsMessage> {
        self.rx.try_recv().ok()
    }

    /// Take every pending message in receipt order.
    ///
    /// The second value is `true` once every sender has been dropped.
    pub fn drain(&self) -> (Vec<SettingsMessage>, bool) {
        let mut msgs = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(msg) => msgs.push(msg),
                Err(TryRecvError::Empty) => return (msgs, false),
                Err(TryRecvError::Disconnected) => return (msgs, true),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::IdentityTransform;
    use crate::types::{Frame, FrameShape};

    #[test]
    fn test_order_preserved() {
        let (tx, rx) = settings_channel();
        assert!(tx.replace(ComponentConfig::new("scale")));
        assert!(tx.invoke("set_gain", 2.0));
        assert!(tx.invoke("set_offset", 1.0));
        assert!(tx.invoke("set_gain", 3.0));
        assert_eq!(tx.pending(), 4);

        let (msgs, disconnected) = rx.drain();
        assert!(!disconnected);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], SettingsMessage::Replace(ComponentConfig::new("scale")));
        assert_eq!(
            msgs[3],
            SettingsMessage::Invoke {
                command: "set_gain".into(),
                arg: ParamValue::Float(3.0)
            }
        );
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_apply_in_receipt_order() {
        let registry = TransformRegistry::with_builtins();
        let mut transform: Box<dyn Transform> = Box::new(IdentityTransform);

        let (tx, rx) = settings_channel();
        tx.replace(ComponentConfig::new("scale"));
        tx.invoke("set_gain", 2.0);
        tx.invoke("set_offset", 1.0);
        tx.invoke("set_gain", 3.0);
        for msg in rx.drain().0 {
            msg.apply(&mut transform, &registry).unwrap();
        }

        assert_eq!(transform.name(), "scale");
        let out = transform
            .process(&Frame::from_fn(FrameShape::new(1, 1), |_, _, _| 1.0))
            .unwrap();
        assert_eq!(out.data(), &[4.0]);
    }

    #[test]
    fn test_failed_replace_keeps_transform() {
        let registry = TransformRegistry::with_builtins();
        let mut transform: Box<dyn Transform> = Box::new(IdentityTransform);
        let msg = SettingsMessage::Replace(ComponentConfig::new("sharpen"));
        assert!(msg.apply(&mut transform, &registry).is_err());
        assert_eq!(transform.name(), "identity");
    }

    #[test]
    fn test_disconnect_reported() {
        let (tx, rx) = settings_channel();
        tx.invoke("set_gain", 1.0);
        drop(tx);
        let (msgs, disconnected) = rx.drain();
        assert_eq!(msgs.len(), 1);
        assert!(disconnected);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = settings_channel();
        drop(rx);
        assert!(!tx.invoke("set_gain", 1.0));
    }
}
