//! Structured event fan-out for pipeline observability.
//!
//! Processors and workers emit [`Event`]s through an [`EventEmitter`]; the
//! [`EventBus`] broadcasts them to registered [`EventSink`]s. The default
//! sink forwards to `tracing`; tests capture with [`MemorySink`].

pub mod bus;
pub mod emitter;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use emitter::{BusEmitter, EmitterError, EventEmitter, NullEmitter};
pub use event::{DiagnosticEvent, Event, JobEvent, ProviderEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, TracingSink};
