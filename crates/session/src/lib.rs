//! intercom-session – Peer-Sitzungen des Intercom
//!
//! Baut pro Remote-Teilnehmer genau eine Audio-Verbindung auf, haelt sie
//! ueber ein unzuverlaessiges Relay am Leben und repariert sie:
//!
//! - Warm-Start in Stern-Topologie um den Host
//! - Perfect-Negotiation (polite/impolite) gegen Offer-Kollisionen
//! - ICE-Restart in place, danach Neuaufbau mit linearem Backoff
//! - Push-to-Talk ueber das `enabled`-Gate des geteilten Mikrofons
//!
//! Einstiegspunkt fuer die hostende Schicht ist [`IntercomManager`].

pub mod config;
pub mod error;
pub mod manager;
pub mod negotiation;
pub mod peer;
pub mod roster;
pub mod session;
pub mod supervisor;
pub mod table;
pub mod warm_start;

pub use config::IntercomConfig;
pub use error::{SessionError, SessionResult};
pub use manager::{IntercomManager, LocalIdentity, SitzungsInfo};
pub use negotiation::{IgnorierGrund, SignalErgebnis, Signalisierung};
pub use peer::{
    ConnectionState, IceConnectionState, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventSender, SignalingState,
};
pub use roster::{RosterDiff, RosterTracker};
pub use session::{rolle_bestimmen, NegotiationFlags, NegotiationRole, PeerSession};
pub use supervisor::{backoff, Entscheidung, ReconnectSupervisor, MAX_RETRIES};
pub use table::SessionTable;
