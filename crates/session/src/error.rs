//! Fehlertypen fuer den Session-Manager

use intercom_audio::CaptureError;
use intercom_core::types::UserId;
use intercom_core::IntercomError;
use intercom_protocol::ProtokollError;
use thiserror::Error;

/// Fehlertyp fuer den Session-Manager
#[derive(Debug, Error)]
pub enum SessionError {
    /// Fehler aus Relay oder Peer-Verbindung
    #[error(transparent)]
    Intercom(#[from] IntercomError),

    /// Relay-Nachricht nicht dekodierbar
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtokollError),

    /// Mikrofon nicht verfuegbar
    #[error("Mikrofon: {0}")]
    Mikrofon(#[from] CaptureError),

    /// Operation vor `beitreten()` bzw. nach `verlassen()`
    #[error("Intercom ist keiner Produktion beigetreten")]
    NichtBeigetreten,

    /// Verbindung zum eigenen Teilnehmer angefordert
    #[error("Keine Sitzung zum eigenen Teilnehmer moeglich")]
    SelbstVerbindung,

    /// Die Sitzung wurde waehrend der Operation geschlossen
    #[error("Sitzung zu {0} wurde geschlossen")]
    SitzungGeschlossen(UserId),
}

pub type SessionResult<T> = Result<T, SessionError>;
