//! Talk-State- und Pegel-Broadcaster (Sendeseite)
//!
//! - Sprech-Start/-Stopp wird sofort als `talk.send` verschickt
//! - Pegel-Messwerte nur waehrend des Sprechens, maximal einer pro
//!   Drossel-Intervall (Standard 100 ms)
//! - Werte unter der Rauschschwelle gelten als Stille und werden nicht
//!   verschickt

use intercom_core::types::UserId;
use intercom_protocol::{AudioLevelSample, RelayMessage, RelayTransport, TalkEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::ptt::SendeZustand;

/// Minimaler Abstand zwischen zwei `audio_level.send`
pub const PEGEL_DROSSEL: Duration = Duration::from_millis(100);

/// Pegel unterhalb dieser Schwelle gelten als Stille
pub const RAUSCHSCHWELLE: f32 = 0.05;

#[derive(Debug, Default)]
struct Sendeseite {
    spricht: bool,
    letzte_emission: Option<Instant>,
}

/// Verschickt Talk-Events und gedrosselte Pegel des lokalen Teilnehmers
pub struct TalkBroadcaster {
    relay: Arc<dyn RelayTransport>,
    ich: UserId,
    rolle: String,
    drossel: Duration,
    rauschschwelle: f32,
    zustand: Mutex<Sendeseite>,
}

impl TalkBroadcaster {
    pub fn neu(
        relay: Arc<dyn RelayTransport>,
        ich: UserId,
        rolle: impl Into<String>,
        drossel: Duration,
        rauschschwelle: f32,
    ) -> Self {
        Self {
            relay,
            ich,
            rolle: rolle.into(),
            drossel,
            rauschschwelle,
            zustand: Mutex::new(Sendeseite::default()),
        }
    }

    /// Meldet einen Sprech-Wechsel sofort (ungedrosselt)
    pub fn sprechzustand_melden(&self, zustand: SendeZustand) -> intercom_core::Result<()> {
        {
            let mut seite = self.zustand.lock();
            if zustand.spricht && !seite.spricht {
                seite.letzte_emission = None;
            }
            seite.spricht = zustand.spricht;
        }

        let event = TalkEvent {
            sender_user_id: self.ich,
            is_talking: zustand.spricht,
            target_user_id: zustand.ziel,
            sender_role_name: self.rolle.clone(),
        };
        tracing::debug!(
            spricht = zustand.spricht,
            ziel = ?zustand.ziel,
            "Talk-Event verschickt"
        );
        self.relay.senden(RelayMessage::Talk(event))
    }

    /// Verarbeitet einen lokalen Pegel-Messwert
    ///
    /// Gibt `true` zurueck, wenn ein `audio_level.send` verschickt wurde.
    pub fn pegel_messwert(&self, level: f32, jetzt: Instant) -> bool {
        {
            let mut seite = self.zustand.lock();
            if !seite.spricht || level < self.rauschschwelle {
                return false;
            }
            if let Some(letzte) = seite.letzte_emission {
                if jetzt.saturating_duration_since(letzte) < self.drossel {
                    return false;
                }
            }
            seite.letzte_emission = Some(jetzt);
        }

        let sample = AudioLevelSample {
            sender_user_id: self.ich,
            level: level.clamp(0.0, 1.0),
        };
        if let Err(e) = self.relay.senden(RelayMessage::AudioLevel(sample)) {
            tracing::debug!(fehler = %e, "Pegel-Telemetrie nicht zustellbar");
            return false;
        }
        true
    }

    pub fn spricht(&self) -> bool {
        self.zustand.lock().spricht
    }
}
