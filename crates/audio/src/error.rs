//! Fehlertypen fuer Mikrofon und Capture

use thiserror::Error;

/// Alle moeglichen Fehler beim Beschaffen des Mikrofons
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Mikrofon-Zugriff verweigert")]
    ZugriffVerweigert,

    #[error("Kein Eingabegeraet verfuegbar")]
    KeinEingabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
