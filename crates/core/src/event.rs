//! Events die der Intercom an die hostende UI-Schicht meldet
//!
//! Die UI abonniert diese Events (tokio broadcast im Session-Crate) statt
//! den internen Zustand zu pollen.

use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Alle nach aussen sichtbaren Ereignisse des Intercom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntercomEvent {
    /// Eine Sitzung hat `connected` erreicht
    SitzungVerbunden { remote: UserId },
    /// Eine Sitzung wurde geschlossen und aus der Tabelle entfernt
    SitzungGetrennt { remote: UserId },
    /// Der Supervisor hat einen Neuaufbau eingeplant
    Wiederverbindung {
        remote: UserId,
        /// 1-basierte Nummer des Versuchs
        versuch: u32,
        verzoegerung: Duration,
    },
    /// Retry-Budget erschoepft – terminal bis der Teilnehmer neu beitritt
    DauerhafterFehler { remote: UserId },
    /// Mikrofon konnte nicht beschafft werden (kein ausgehendes Audio)
    MikrofonFehler { grund: String },
}

impl IntercomEvent {
    /// Gibt den betroffenen Remote-Teilnehmer zurueck, falls vorhanden
    pub fn remote(&self) -> Option<UserId> {
        match self {
            Self::SitzungVerbunden { remote }
            | Self::SitzungGetrennt { remote }
            | Self::Wiederverbindung { remote, .. }
            | Self::DauerhafterFehler { remote } => Some(*remote),
            Self::MikrofonFehler { .. } => None,
        }
    }
}
