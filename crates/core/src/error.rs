//! Fehlertypen fuer den Intercom
//!
//! Zentraler Fehler-Enum fuer crate-uebergreifende Fehler. Die Untercrates
//! definieren eigene Fehler und konvertieren bei Bedarf via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer den Intercom
pub type Result<T> = std::result::Result<T, IntercomError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum IntercomError {
    // --- Relay ---
    #[error("Relay nicht erreichbar: {0}")]
    RelayNichtErreichbar(String),

    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Peer-Verbindung ---
    #[error("Peer-Verbindung fehlgeschlagen: {0}")]
    PeerVerbindung(String),

    #[error("Sitzung geschlossen")]
    SitzungGeschlossen,

    // --- Audio ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl IntercomError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler nur eine Sitzung betrifft
    ///
    /// Solche Fehler duerfen andere Sitzungen nie beeinflussen.
    pub fn ist_sitzungslokal(&self) -> bool {
        matches!(self, Self::PeerVerbindung(_) | Self::SitzungGeschlossen)
    }
}
