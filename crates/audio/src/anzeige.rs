//! Sprecher-Anzeige (Empfangsseite)
//!
//! Haelt "wer spricht gerade" und "wer liegt ueber der Rauschschwelle".
//! Single-Writer: nur die Event-Schleife des Intercom schreibt, UI und
//! Telemetrie abonnieren via `watch` statt den Zustand zu pollen.

use intercom_core::rollen::HostRollen;
use intercom_core::types::UserId;
use intercom_protocol::{AudioLevelSample, TalkEvent};
use std::collections::HashMap;
use tokio::sync::watch;

/// An wen sich ein Sprecher richtet, aus Sicht des lokalen Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adressierung {
    /// Durchsage an alle
    Alle,
    /// Whisper an den lokalen Teilnehmer
    AnMich,
    /// Whisper an jemand anderen
    AnAndere,
}

/// Kosmetische Einordnung eines eingehenden Talk-Events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Einordnung {
    /// Sender hat eine Host-/Operator-Rolle
    pub von_host: bool,
    pub adressierung: Adressierung,
}

/// Ordnet ein Talk-Event ein ("Host an alle" vs. "Host an mich" ...)
pub fn einordnen(event: &TalkEvent, ich: &UserId, rollen: &HostRollen) -> Einordnung {
    let adressierung = match event.target_user_id {
        None => Adressierung::Alle,
        Some(ziel) if ziel == *ich => Adressierung::AnMich,
        Some(_) => Adressierung::AnAndere,
    };
    Einordnung {
        von_host: rollen.ist_host(&event.sender_role_name),
        adressierung,
    }
}

/// Ein gerade sprechender Remote-Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSprecher {
    pub rolle: String,
    pub ziel: Option<UserId>,
    pub einordnung: Einordnung,
}

pub type SprecherMap = HashMap<UserId, RemoteSprecher>;
pub type PegelMap = HashMap<UserId, f32>;

/// Empfangsseitiger Zustand aller Remote-Sprecher
pub struct SprecherAnzeige {
    ich: UserId,
    rollen: HostRollen,
    rauschschwelle: f32,
    sprecher_tx: watch::Sender<SprecherMap>,
    pegel_tx: watch::Sender<PegelMap>,
}

impl SprecherAnzeige {
    pub fn neu(ich: UserId, rollen: HostRollen, rauschschwelle: f32) -> Self {
        let (sprecher_tx, _) = watch::channel(SprecherMap::new());
        let (pegel_tx, _) = watch::channel(PegelMap::new());
        Self {
            ich,
            rollen,
            rauschschwelle,
            sprecher_tx,
            pegel_tx,
        }
    }

    /// Verarbeitet ein eingehendes `talk.received`
    pub fn talk_empfangen(&self, event: &TalkEvent) {
        let sender = event.sender_user_id;
        if sender == self.ich {
            return;
        }

        if event.is_talking {
            let sprecher = RemoteSprecher {
                rolle: event.sender_role_name.clone(),
                ziel: event.target_user_id,
                einordnung: einordnen(event, &self.ich, &self.rollen),
            };
            self.sprecher_tx.send_if_modified(|map| {
                map.insert(sender, sprecher.clone()) != Some(sprecher)
            });
        } else {
            self.sprecher_tx
                .send_if_modified(|map| map.remove(&sender).is_some());
            self.pegel_tx
                .send_if_modified(|map| map.remove(&sender).is_some());
        }
    }

    /// Verarbeitet ein eingehendes `audio_level.received`
    ///
    /// Werte unter der Rauschschwelle entfernen den Sender aus der Map.
    pub fn pegel_empfangen(&self, sample: &AudioLevelSample) {
        let sender = sample.sender_user_id;
        if sender == self.ich {
            return;
        }
        if sample.level < self.rauschschwelle {
            self.pegel_tx
                .send_if_modified(|map| map.remove(&sender).is_some());
        } else {
            self.pegel_tx.send_modify(|map| {
                map.insert(sender, sample.level);
            });
        }
    }

    /// Entfernt einen Teilnehmer, der den Raum verlassen hat
    pub fn teilnehmer_entfernen(&self, user_id: &UserId) {
        self.sprecher_tx
            .send_if_modified(|map| map.remove(user_id).is_some());
        self.pegel_tx
            .send_if_modified(|map| map.remove(user_id).is_some());
    }

    /// Leert beide Maps (Raum verlassen)
    pub fn leeren(&self) {
        self.sprecher_tx.send_if_modified(|map| {
            let war_belegt = !map.is_empty();
            map.clear();
            war_belegt
        });
        self.pegel_tx.send_if_modified(|map| {
            let war_belegt = !map.is_empty();
            map.clear();
            war_belegt
        });
    }

    pub fn sprecher_abonnieren(&self) -> watch::Receiver<SprecherMap> {
        self.sprecher_tx.subscribe()
    }

    pub fn pegel_abonnieren(&self) -> watch::Receiver<PegelMap> {
        self.pegel_tx.subscribe()
    }
}
