//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable, die Vorrang vor der
//! `[logging]`-Sektion der Konfiguration hat:
//! - `IC_LOG_LEVEL`: Filter-Direktive (trace/debug/info/warn/error oder
//!   `intercom_session=debug,info`), Standard: info
//! - `IC_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Remote-Teilnehmer und Generationen stehen als strukturierte Felder in
//! jedem Event (`remote = %id`), nicht im Nachrichtentext.

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "IC_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "IC_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Parst `text` oder `json` (exakt, Kleinschreibung)
    pub fn parsen(format: &str) -> Option<Self> {
        match format {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingFehler {
    #[error("Ungueltiger Log-Filter '{0}'")]
    Filter(String),

    #[error("Ungueltiges Log-Format '{0}' (erlaubt: text, json)")]
    Format(String),

    #[error("Logging bereits initialisiert")]
    BereitsInitialisiert,
}

/// Initialisiert das Logging-System.
///
/// `IC_LOG_LEVEL` und `IC_LOG_FORMAT` ueberschreiben `level` und `format`.
/// Ein zweiter Aufruf liefert [`LoggingFehler::BereitsInitialisiert`].
pub fn logging_initialisieren(level: &str, format: &str) -> Result<(), LoggingFehler> {
    let level = log_level_aus_env().unwrap_or_else(|| level.to_string());
    let filter = EnvFilter::try_new(&level).map_err(|_| LoggingFehler::Filter(level.clone()))?;

    let format_name = log_format_aus_env().unwrap_or_else(|| format.to_string());
    let format = LogFormat::parsen(&format_name).ok_or(LoggingFehler::Format(format_name))?;

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    ergebnis.map_err(|_| LoggingFehler::BereitsInitialisiert)?;

    tracing::debug!(level = %level, format = ?format, "Logging initialisiert");
    Ok(())
}

/// Logging fuer Tests: Ausgabe ueber den Test-Writer, mehrfach aufrufbar
pub fn logging_fuer_tests() {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Log-Level aus der Umgebung, falls gesetzt und nicht leer
pub fn log_level_aus_env() -> Option<String> {
    std::env::var(ENV_LOG_LEVEL).ok().filter(|s| !s.is_empty())
}

/// Log-Format aus der Umgebung, falls gesetzt und nicht leer
pub fn log_format_aus_env() -> Option<String> {
    std::env::var(ENV_LOG_FORMAT).ok().filter(|s| !s.is_empty())
}
