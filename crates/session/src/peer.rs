//! Schnittstelle zur transportseitigen Peer-Verbindung
//!
//! Die eigentliche Verbindung (Browser-RTCPeerConnection, webrtc-rs, ...)
//! stellt die hostende Schicht ueber [`PeerConnectionFactory`] bereit. Der
//! Core sieht sie nur ueber [`PeerConnection`] und ueber die
//! [`PeerEvent`]s, die sie auf der uebergebenen Queue meldet.

use async_trait::async_trait;
use intercom_audio::LocalAudioTrack;
use intercom_core::types::UserId;
use intercom_protocol::{IceCandidate, SessionDescription};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Verbindungszustand, wie ihn der Transport meldet
///
/// ```text
/// New -> Connecting -> Connected
///          ^              |
///          +- Disconnected+
/// jeder Zustand -> Failed -> (Closed | Connecting via Restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Signaling-Zustand der Offer/Answer-Aushandlung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// ICE-Zustand (nur `Failed` loest einen In-Place-Restart aus)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks der Verbindung, als Queue-Nachrichten
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Ein lokaler Kandidat wurde gefunden und muss verschickt werden
    IceCandidate(IceCandidate),
    /// Die lokale Beschreibung hat sich geaendert, neue Offer noetig
    NegotiationNeeded,
    ConnectionState(ConnectionState),
    IceConnectionState(IceConnectionState),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Eine transportseitige Peer-Verbindung
///
/// Gehoert exklusiv genau einer Sitzung.
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    fn signaling_state(&self) -> SignalingState;

    /// Erzeugt eine Offer und setzt sie als lokale Beschreibung
    async fn set_local_offer(&self) -> intercom_core::Result<SessionDescription>;

    /// Erzeugt eine Answer auf die anliegende Remote-Offer und setzt sie lokal
    async fn set_local_answer(&self) -> intercom_core::Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> intercom_core::Result<()>;

    /// Verwirft die eigene, noch unbeantwortete Offer
    async fn rollback(&self) -> intercom_core::Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> intercom_core::Result<()>;

    /// Startet ICE neu; die Verbindung meldet danach `NegotiationNeeded`
    fn restart_ice(&self);

    /// Haengt einen (geteilten) lokalen Track an
    fn add_track(&self, track: Arc<LocalAudioTrack>) -> intercom_core::Result<()>;

    fn close(&self);
}

/// Erstellt Peer-Verbindungen (synchron, damit das Einfuegen in die
/// Sitzungstabelle atomar bleibt)
pub trait PeerConnectionFactory: Send + Sync + 'static {
    fn erstellen(
        &self,
        remote: UserId,
        events: PeerEventSender,
    ) -> intercom_core::Result<Arc<dyn PeerConnection>>;
}
