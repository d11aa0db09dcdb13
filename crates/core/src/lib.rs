//! intercom-core – Gemeinsame Typen, Events und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von Protokoll, Audio und
//! Session-Manager gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod rollen;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{IntercomError, Result};
pub use event::IntercomEvent;
pub use rollen::HostRollen;
pub use types::{ProductionId, UserId};
