use std::fmt;
use thiserror::Error;

use super::event::Event;

/// Abstract event emitter that processors hold through their context.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    /// Emit an event synchronously without blocking.
    fn emit(&self, event: Event) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event bus closed")]
    Closed,
    #[error("event emission failed: {0}")]
    Other(String),
}

impl EmitterError {
    pub fn other(error: impl Into<String>) -> Self {
        Self::Other(error.into())
    }
}

/// Emitter backed by the bus's flume channel. Cheap to clone; every worker
/// and processor context holds one.
#[derive(Debug, Clone)]
pub struct BusEmitter {
    sender: flume::Sender<Event>,
}

impl BusEmitter {
    pub(super) fn new(sender: flume::Sender<Event>) -> Self {
        Self { sender }
    }
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: Event) -> Result<(), EmitterError> {
        self.sender.send(event).map_err(|_| EmitterError::Closed)
    }
}

/// Emitter that discards every event. Useful in unit tests and in contexts
/// assembled without a bus.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: Event) -> Result<(), EmitterError> {
        Ok(())
    }
}
