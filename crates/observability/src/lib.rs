//! # intercom-observability
//!
//! Structured Logging fuer den Intercom: Text- oder JSON-Ausgabe via
//! tracing-subscriber, Level und Format per Konfiguration oder Umgebung.

pub mod logging;

pub use logging::{logging_fuer_tests, logging_initialisieren, LogFormat, LoggingFehler};
