//! intercom-protocol – Nachrichten ueber das Relay
//!
//! Definiert alle Nachrichten, die der Intercom ueber den Relay-Transport
//! einer Produktion austauscht. Der Transport selbst ist nicht Teil dieses
//! Crates; er garantiert weder Reihenfolge noch Exactly-Once-Zustellung.

pub mod relay;
pub mod signal;
pub mod talk;

pub use relay::{
    dekodieren, kodieren, KanalRelay, ProtokollError, RelayInbound, RelayMessage, RelayTransport,
    RosterEntry,
};
pub use signal::{
    IceCandidate, SdpTyp, SessionDescription, SignalEnvelope, SignalPayload, INTERCOM_CONTEXT,
};
pub use talk::{AudioLevelSample, TalkEvent};
