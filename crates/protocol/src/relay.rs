//! Relay-Nachrichten
//!
//! ## Design
//! - JSON-Serialisierung via serde (Relay ist nicht zeitkritisch)
//! - Tagged Enums: `type` traegt den Nachrichtennamen (`signal.send` ...),
//!   `payload` den Inhalt
//! - Ausgehend ([`RelayMessage`]) und eingehend ([`RelayInbound`]) sind
//!   getrennte Typen, damit der Core nie versehentlich ein `*.received`
//!   verschickt

use intercom_core::types::{ProductionId, UserId};
use intercom_core::IntercomError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::signal::SignalEnvelope;
use crate::talk::{AudioLevelSample, TalkEvent};

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler beim Kodieren/Dekodieren von Relay-Nachrichten
#[derive(Debug, Error)]
pub enum ProtokollError {
    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// Ein anwesender Teilnehmer laut Presence-Roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: UserId,
    pub role_name: String,
}

impl RosterEntry {
    pub fn neu(user_id: UserId, role_name: impl Into<String>) -> Self {
        Self {
            user_id,
            role_name: role_name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Nachrichten
// ---------------------------------------------------------------------------

/// Ausgehende Nachrichten (Core -> Relay)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RelayMessage {
    #[serde(rename = "presence.request")]
    PresenceRequest { production_id: ProductionId },
    #[serde(rename = "signal.send")]
    Signal(SignalEnvelope),
    #[serde(rename = "talk.send")]
    Talk(TalkEvent),
    #[serde(rename = "audio_level.send")]
    AudioLevel(AudioLevelSample),
}

impl RelayMessage {
    /// Name der Nachricht fuer Logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::PresenceRequest { .. } => "presence.request",
            Self::Signal(_) => "signal.send",
            Self::Talk(_) => "talk.send",
            Self::AudioLevel(_) => "audio_level.send",
        }
    }
}

/// Eingehende Nachrichten (Relay -> Core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RelayInbound {
    #[serde(rename = "presence.update")]
    Presence { roster: Vec<RosterEntry> },
    #[serde(rename = "signal.received")]
    Signal(SignalEnvelope),
    #[serde(rename = "talk.received")]
    Talk(TalkEvent),
    #[serde(rename = "audio_level.received")]
    AudioLevel(AudioLevelSample),
}

/// Kodiert eine Nachricht als JSON-String
pub fn kodieren<T: Serialize>(nachricht: &T) -> Result<String, ProtokollError> {
    Ok(serde_json::to_string(nachricht)?)
}

/// Dekodiert eine Nachricht aus einem JSON-String
pub fn dekodieren<T: DeserializeOwned>(json: &str) -> Result<T, ProtokollError> {
    Ok(serde_json::from_str(json)?)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Ausgehende Seite des Relay-Transports einer Produktion
///
/// Senden ist nicht-blockierend; die Zustellung ist at-least-once und
/// ungeordnet. Der Core verlaesst sich auf nichts darueber hinaus.
pub trait RelayTransport: Send + Sync + 'static {
    fn senden(&self, nachricht: RelayMessage) -> intercom_core::Result<()>;
}

/// Relay-Transport ueber eine tokio-Queue
///
/// Die hostende Schicht liest die Queue und schreibt auf ihren Socket.
#[derive(Clone, Debug)]
pub struct KanalRelay {
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl KanalRelay {
    /// Erstellt den Transport und gibt die Lese-Seite der Queue zurueck
    pub fn neu() -> (Self, mpsc::UnboundedReceiver<RelayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RelayTransport for KanalRelay {
    fn senden(&self, nachricht: RelayMessage) -> intercom_core::Result<()> {
        let name = nachricht.name();
        self.tx.send(nachricht).map_err(|_| {
            tracing::debug!(nachricht = name, "Relay-Queue geschlossen");
            IntercomError::RelayNichtErreichbar(format!("{name}: Queue geschlossen"))
        })
    }
}
