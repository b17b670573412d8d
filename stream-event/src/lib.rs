//! Stream event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of one streamed run event and envelope
//! injection. It does not depend on the core crate; the orchestrator bridges
//! its progress into [`RunEvent`] and the server calls [`to_json`].

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::RunEvent;
