//! Peer-Sitzung – eine Verbindung zu genau einem Remote-Teilnehmer
//!
//! Die Sitzung besitzt ihre Verbindung exklusiv und traegt die Flags der
//! Perfect-Negotiation. Jede Sitzung hat eine Generation; Callbacks einer
//! abgeloesten Generation werden verworfen.

use intercom_core::types::UserId;
use intercom_protocol::SignalPayload;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::peer::{ConnectionState, PeerConnection};

// ---------------------------------------------------------------------------
// Rolle
// ---------------------------------------------------------------------------

/// Rolle in der Perfect-Negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationRole {
    /// Gibt bei einer Kollision nach (Rollback der eigenen Offer)
    Polite,
    /// Setzt bei einer Kollision die eigene Offer durch
    Impolite,
}

impl NegotiationRole {
    pub fn ist_polite(self) -> bool {
        self == Self::Polite
    }
}

/// Bestimmt die lokale Rolle gegenueber `remote`
///
/// Host ist impolite, Gast polite. Bei gleichen Host-Flags ist die kleinere
/// UserId polite, damit beide Seiten unabhaengig dasselbe Ergebnis finden.
pub fn rolle_bestimmen(
    ich: &UserId,
    ich_host: bool,
    remote: &UserId,
    remote_host: bool,
) -> NegotiationRole {
    let polite = match (ich_host, remote_host) {
        (true, false) => false,
        (false, true) => true,
        _ => ich < remote,
    };
    if polite {
        NegotiationRole::Polite
    } else {
        NegotiationRole::Impolite
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationFlags {
    /// Eine lokale Offer wird gerade erzeugt
    pub making_offer: bool,
    /// Die zuletzt empfangene Offer wurde wegen Kollision verworfen
    pub ignore_offer: bool,
    /// Eine Remote-Answer wird gerade gesetzt
    pub setting_remote_answer_pending: bool,
}

/// Setzt `making_offer` fuer seine Lebensdauer
///
/// Das Flag wird auf jedem Ausgang zurueckgesetzt, auch bei Fehlern und
/// abgebrochenen Tasks.
pub struct OfferGuard<'a> {
    sitzung: &'a PeerSession,
}

impl Drop for OfferGuard<'_> {
    fn drop(&mut self) {
        self.sitzung.flags.lock().making_offer = false;
    }
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// Eine Verbindung zu genau einem Remote-Teilnehmer
pub struct PeerSession {
    remote: UserId,
    generation: u64,
    rolle: NegotiationRole,
    verbindung: Arc<dyn PeerConnection>,
    flags: Mutex<NegotiationFlags>,
    /// Nur vom Zustands-Callback der Verbindung geschrieben
    zustand: Mutex<ConnectionState>,
    /// In-Place-ICE-Restart seit dem letzten `connected` versucht
    ice_restart: AtomicBool,
    /// Fehlschlag bereits an den Supervisor gemeldet
    fehlschlag_gemeldet: AtomicBool,
    geschlossen: AtomicBool,
    /// Eingehende Signale fuer die Ereignisschleife der Sitzung
    postfach: mpsc::UnboundedSender<SignalPayload>,
    schleife: Mutex<Option<JoinHandle<()>>>,
}

impl PeerSession {
    /// Erstellt die Sitzung und gibt die Lese-Seite ihres Postfachs zurueck
    pub fn neu(
        remote: UserId,
        generation: u64,
        rolle: NegotiationRole,
        verbindung: Arc<dyn PeerConnection>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalPayload>) {
        let (postfach, rx) = mpsc::unbounded_channel();
        let sitzung = Arc::new(Self {
            remote,
            generation,
            rolle,
            verbindung,
            flags: Mutex::new(NegotiationFlags::default()),
            zustand: Mutex::new(ConnectionState::New),
            ice_restart: AtomicBool::new(false),
            fehlschlag_gemeldet: AtomicBool::new(false),
            geschlossen: AtomicBool::new(false),
            postfach,
            schleife: Mutex::new(None),
        });
        (sitzung, rx)
    }

    pub fn remote(&self) -> UserId {
        self.remote
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rolle(&self) -> NegotiationRole {
        self.rolle
    }

    pub fn verbindung(&self) -> &Arc<dyn PeerConnection> {
        &self.verbindung
    }

    // ---- Flags ----

    pub fn flags(&self) -> NegotiationFlags {
        *self.flags.lock()
    }

    pub(crate) fn flags_aendern<R>(&self, f: impl FnOnce(&mut NegotiationFlags) -> R) -> R {
        f(&mut self.flags.lock())
    }

    /// Setzt `making_offer` bis der Guard gedroppt wird
    pub fn offer_beginnen(&self) -> OfferGuard<'_> {
        self.flags.lock().making_offer = true;
        OfferGuard { sitzung: self }
    }

    // ---- Zustand ----

    pub fn zustand(&self) -> ConnectionState {
        *self.zustand.lock()
    }

    /// Uebernimmt einen vom Transport gemeldeten Zustand
    pub(crate) fn zustand_setzen(&self, neu: ConnectionState) -> ConnectionState {
        let alt = std::mem::replace(&mut *self.zustand.lock(), neu);
        if neu == ConnectionState::Connected {
            self.ice_restart.store(false, Ordering::Release);
            self.fehlschlag_gemeldet.store(false, Ordering::Release);
        }
        alt
    }

    /// Startet den In-Place-Restart, `false` wenn er schon versucht wurde
    pub(crate) fn ice_restart_beginnen(&self) -> bool {
        !self.ice_restart.swap(true, Ordering::AcqRel)
    }

    pub fn ice_restart_laeuft(&self) -> bool {
        self.ice_restart.load(Ordering::Acquire)
    }

    /// Markiert den Fehlschlag, `false` wenn er schon gemeldet war
    pub(crate) fn fehlschlag_markieren(&self) -> bool {
        !self.fehlschlag_gemeldet.swap(true, Ordering::AcqRel)
    }

    // ---- Lebenszyklus ----

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }

    /// Stellt ein eingehendes Signal in die Ereignisschleife
    pub(crate) fn signal_zustellen(&self, payload: SignalPayload) -> bool {
        !self.ist_geschlossen() && self.postfach.send(payload).is_ok()
    }

    pub(crate) fn schleife_setzen(&self, handle: JoinHandle<()>) {
        if self.ist_geschlossen() {
            handle.abort();
            return;
        }
        *self.schleife.lock() = Some(handle);
    }

    /// Schliesst die Sitzung; `false` wenn sie schon geschlossen war
    ///
    /// Danach verwerfen alle Handler ihre Ergebnisse. Der Verbindungszustand
    /// bleibt unberuehrt; ihn setzt nur der Callback der Verbindung.
    pub fn schliessen(&self) -> bool {
        if self.geschlossen.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(handle) = self.schleife.lock().take() {
            handle.abort();
        }
        self.verbindung.close();
        tracing::debug!(
            remote = %self.remote,
            generation = self.generation,
            "Sitzung geschlossen"
        );
        true
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote", &self.remote)
            .field("generation", &self.generation)
            .field("rolle", &self.rolle)
            .field("zustand", &self.zustand())
            .field("geschlossen", &self.ist_geschlossen())
            .finish_non_exhaustive()
    }
}
