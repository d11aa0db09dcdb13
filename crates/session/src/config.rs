//! Intercom-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Intercom ohne Konfigurationsdatei
//! lauffaehig ist.

use intercom_audio::PttMode;
use intercom_core::HostRollen;
use intercom_protocol::INTERCOM_CONTEXT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Intercom-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntercomConfig {
    /// Verbindungsaufbau und Wiederverbindung
    pub verbindung: VerbindungsEinstellungen,
    /// Mikrofon, Pegel und Push-to-Talk
    pub audio: AudioEinstellungen,
    /// Welche Rollennamen als Host gelten
    pub rollen: RollenEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Verbindungsaufbau und Wiederverbindung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Maximale Anzahl Neuaufbauten pro Teilnehmer
    pub max_retries: u32,
    /// Basis der linearen Backoff-Verzoegerung
    pub basis_verzoegerung_ms: u64,
    /// `context`-Wert der Intercom-Signale
    pub context: String,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            max_retries: 5,
            basis_verzoegerung_ms: 1000,
            context: INTERCOM_CONTEXT.into(),
        }
    }
}

/// Mikrofon, Pegel und Push-to-Talk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Abstand der Pegel-Snapshots in Millisekunden
    pub frame_intervall_ms: u64,
    /// Minimaler Abstand zwischen zwei Pegel-Telemetrien
    pub pegel_drossel_ms: u64,
    /// Pegel darunter gelten als Stille
    pub rauschschwelle: f32,
    /// Push-to-Talk: "hold" oder "toggle"
    pub ptt_modus: PttModusEinstellung,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            frame_intervall_ms: 16,
            pegel_drossel_ms: 100,
            rauschschwelle: 0.05,
            ptt_modus: PttModusEinstellung::Hold,
        }
    }
}

/// Push-to-Talk-Modus in der Konfigurationsdatei
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PttModusEinstellung {
    #[default]
    Hold,
    Toggle,
}

impl From<PttModusEinstellung> for PttMode {
    fn from(modus: PttModusEinstellung) -> Self {
        match modus {
            PttModusEinstellung::Hold => PttMode::Hold,
            PttModusEinstellung::Toggle => PttMode::Toggle,
        }
    }
}

/// Welche Rollennamen als Host gelten
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollenEinstellungen {
    /// Teilstrings, case-insensitiv verglichen
    pub host_rollen: HostRollen,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl IntercomConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    pub fn basis_verzoegerung(&self) -> Duration {
        Duration::from_millis(self.verbindung.basis_verzoegerung_ms)
    }

    pub fn frame_intervall(&self) -> Duration {
        Duration::from_millis(self.audio.frame_intervall_ms.max(1))
    }

    pub fn pegel_drossel(&self) -> Duration {
        Duration::from_millis(self.audio.pegel_drossel_ms)
    }
}
