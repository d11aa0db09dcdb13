//! IntercomManager – Einstiegspunkt fuer die hostende Schicht
//!
//! Verbindet Roster, Sitzungstabelle, Negotiation, Supervisor, Mikrofon
//! und Talk-State. Jede Sitzung hat eine eigene Ereignisschleife, die
//! eingehende Signale und Callbacks ihrer Verbindung nacheinander
//! abarbeitet. Nach jedem `.await` prueft ein Handler, ob seine Sitzung
//! noch die lebende ist.
//!
//! Ablauf:
//! ```text
//! presence.update -> Warm-Start -> sitzung_sicherstellen
//!   -> Offer/Answer/ICE ueber das Relay -> Supervisor beobachtet Zustand
//!   -> Talk-State laeuft ueber die stehenden Sitzungen
//! ```

use futures_util::future::{BoxFuture, FutureExt};
use intercom_audio::{
    CaptureManager, MicrophoneSource, MicrophoneStream, PegelMap, PegelSchleife, PttController,
    PttMode, SendeZustand, SprecherAnzeige, SprecherMap, TalkBroadcaster,
};
use intercom_core::types::{ProductionId, UserId};
use intercom_core::{IntercomError, IntercomEvent};
use intercom_protocol::{
    dekodieren, RelayInbound, RelayMessage, RelayTransport, RosterEntry, SignalEnvelope,
    SignalPayload,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::IntercomConfig;
use crate::error::{SessionError, SessionResult};
use crate::negotiation::{self, SignalErgebnis, Signalisierung};
use crate::peer::{ConnectionState, IceConnectionState, PeerConnectionFactory, PeerEvent};
use crate::roster::RosterTracker;
use crate::session::{rolle_bestimmen, NegotiationRole, PeerSession};
use crate::supervisor::{Entscheidung, ReconnectSupervisor};
use crate::table::{Einfuegen, SessionTable};
use crate::warm_start;

/// Groesse des Broadcast-Kanals fuer Intercom-Events
const EVENT_KANAL_GROESSE: usize = 256;

/// Hoechstzahl zurueckgestellter Signale pro unbekanntem Absender
const MAX_ZURUECKGESTELLT: usize = 64;

// ---------------------------------------------------------------------------
// Oeffentliche Typen
// ---------------------------------------------------------------------------

/// Identitaet des lokalen Teilnehmers, von der hostenden Schicht geliefert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub role_name: String,
    pub production_id: ProductionId,
    /// Lokaler Teilnehmer ist Host der Produktion
    ///
    /// Fuer die Rollenwahl zaehlt der Rollenname, denn nur den sieht die
    /// Gegenseite im Roster. Weicht das Flag davon ab, wird gewarnt.
    pub ist_host: bool,
}

/// Momentaufnahme einer Sitzung fuer die UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SitzungsInfo {
    pub remote: UserId,
    pub rolle: NegotiationRole,
    pub zustand: ConnectionState,
    /// Bisherige Neuaufbauten seit dem letzten `connected`
    pub versuche: u32,
}

// ---------------------------------------------------------------------------
// IntercomManager
// ---------------------------------------------------------------------------

/// Session-Manager eines Teilnehmers
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct IntercomManager {
    inner: Arc<Inner>,
}

struct Inner {
    ich: LocalIdentity,
    config: IntercomConfig,
    relay: Arc<dyn RelayTransport>,
    signal: Signalisierung,
    fabrik: Arc<dyn PeerConnectionFactory>,
    capture: CaptureManager,
    ptt: Mutex<PttController>,
    broadcaster: Arc<TalkBroadcaster>,
    anzeige: SprecherAnzeige,
    tabelle: SessionTable,
    supervisor: ReconnectSupervisor,
    roster: RosterTracker,
    /// Signale von Absendern, die der Roster noch nicht kennt
    zurueckgestellt: Mutex<HashMap<UserId, Vec<SignalEnvelope>>>,
    pegel: Mutex<Option<PegelSchleife>>,
    events: broadcast::Sender<IntercomEvent>,
    aktiv: AtomicBool,
    generation: AtomicU64,
}

impl IntercomManager {
    pub fn neu(
        ich: LocalIdentity,
        config: IntercomConfig,
        relay: Arc<dyn RelayTransport>,
        fabrik: Arc<dyn PeerConnectionFactory>,
        mikrofon: Arc<dyn MicrophoneSource>,
    ) -> Self {
        let rollen = config.rollen.host_rollen.clone();
        if rollen.ist_host(&ich.role_name) != ich.ist_host {
            tracing::warn!(
                rolle = %ich.role_name,
                ist_host = ich.ist_host,
                "Host-Flag passt nicht zur Rolle, Rollenname hat Vorrang"
            );
        }
        let broadcaster = Arc::new(TalkBroadcaster::neu(
            Arc::clone(&relay),
            ich.user_id,
            ich.role_name.clone(),
            config.pegel_drossel(),
            config.audio.rauschschwelle,
        ));
        let (events, _) = broadcast::channel(EVENT_KANAL_GROESSE);

        let inner = Inner {
            signal: Signalisierung::neu(
                Arc::clone(&relay),
                ich.user_id,
                config.verbindung.context.clone(),
            ),
            capture: CaptureManager::neu(mikrofon),
            ptt: Mutex::new(PttController::new(config.audio.ptt_modus.into())),
            broadcaster,
            anzeige: SprecherAnzeige::neu(ich.user_id, rollen.clone(), config.audio.rauschschwelle),
            tabelle: SessionTable::neu(),
            supervisor: ReconnectSupervisor::neu(
                config.verbindung.max_retries,
                config.basis_verzoegerung(),
            ),
            roster: RosterTracker::neu(rollen, ich.role_name.clone()),
            zurueckgestellt: Mutex::new(HashMap::new()),
            pegel: Mutex::new(None),
            events,
            aktiv: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            ich,
            config,
            relay,
            fabrik,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn ich(&self) -> &LocalIdentity {
        &self.inner.ich
    }

    /// Host-Flag des lokalen Teilnehmers, wie es die Rollenwahl verwendet
    pub fn ist_host(&self) -> bool {
        self.inner.roster.ich_host()
    }

    pub fn config(&self) -> &IntercomConfig {
        &self.inner.config
    }

    // ---- Raum ----

    /// Tritt der Produktion bei und fordert den Roster an
    pub fn beitreten(&self) -> SessionResult<()> {
        self.inner.aktiv.store(true, Ordering::Release);
        self.inner.relay.senden(RelayMessage::PresenceRequest {
            production_id: self.inner.ich.production_id,
        })?;
        tracing::info!(
            user_id = %self.inner.ich.user_id,
            production_id = %self.inner.ich.production_id.inner(),
            host = self.inner.roster.ich_host(),
            "Intercom beigetreten"
        );
        Ok(())
    }

    /// Verlaesst die Produktion: alle Sitzungen, Auftraege und das Mikrofon
    /// werden freigegeben
    pub fn verlassen(&self) {
        self.inner.verlassen();
    }

    pub fn ist_aktiv(&self) -> bool {
        self.inner.ist_aktiv()
    }

    // ---- Relay-Eingang ----

    /// Verarbeitet eine eingehende Relay-Nachricht
    pub async fn eingang(&self, nachricht: RelayInbound) -> SessionResult<()> {
        self.inner.eingang(nachricht).await
    }

    /// Wie [`eingang`](Self::eingang), fuer rohes JSON vom Socket
    pub async fn eingang_json(&self, json: &str) -> SessionResult<()> {
        let nachricht: RelayInbound = dekodieren(json)?;
        self.eingang(nachricht).await
    }

    /// Startet die Eingangsschleife auf einer Queue der hostenden Schicht
    pub fn starten(&self, mut eingang: mpsc::Receiver<RelayInbound>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(nachricht) = eingang.recv().await {
                if let Err(e) = manager.eingang(nachricht).await {
                    tracing::debug!(fehler = %e, "Relay-Nachricht nicht verarbeitet");
                }
            }
            tracing::info!("Relay-Eingang geschlossen");
        })
    }

    // ---- Sitzungen ----

    /// Stellt sicher, dass eine Sitzung zu `remote` existiert
    ///
    /// Eine bestehende Sitzung wird zurueckgegeben, nie eine zweite erstellt.
    pub async fn sitzung_sicherstellen(&self, remote: UserId) -> SessionResult<Arc<PeerSession>> {
        self.inner.sitzung_sicherstellen(remote, None).await
    }

    /// Legt bei `remote` auf; ein geplanter Neuaufbau wird verworfen
    pub fn auflegen(&self, remote: &UserId) {
        self.inner.auflegen(remote);
    }

    pub fn sitzung(&self, remote: &UserId) -> Option<Arc<PeerSession>> {
        self.inner.tabelle.holen(remote)
    }

    /// Momentaufnahme aller Sitzungen, nach Remote-UserId sortiert
    pub fn sitzungen(&self) -> Vec<SitzungsInfo> {
        let mut liste: Vec<SitzungsInfo> = self
            .inner
            .tabelle
            .alle()
            .into_iter()
            .filter(|s| !s.ist_geschlossen())
            .map(|s| SitzungsInfo {
                remote: s.remote(),
                rolle: s.rolle(),
                zustand: s.zustand(),
                versuche: self.inner.supervisor.versuche(&s.remote()),
            })
            .collect();
        liste.sort_by_key(|i| i.remote);
        liste
    }

    pub fn versuche(&self, remote: &UserId) -> u32 {
        self.inner.supervisor.versuche(remote)
    }

    /// Retry-Budget fuer `remote` erschoepft
    pub fn ist_dauerhaft_getrennt(&self, remote: &UserId) -> bool {
        self.inner.supervisor.ist_erschoepft(remote)
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.inner.roster.alle()
    }

    // ---- Sprechen ----

    /// Push-to-Talk druecken; `ziel` fuer Whisper an einen Teilnehmer
    pub fn sprechen_starten(&self, ziel: Option<UserId>) -> SessionResult<()> {
        if !self.inner.ist_aktiv() {
            return Err(SessionError::NichtBeigetreten);
        }
        let aenderung = self.inner.ptt.lock().druecken(ziel);
        self.inner.sendezustand_anwenden(aenderung)
    }

    /// Push-to-Talk loslassen (im Toggle-Modus ohne Wirkung)
    pub fn sprechen_loslassen(&self) -> SessionResult<()> {
        let aenderung = self.inner.ptt.lock().loslassen();
        self.inner.sendezustand_anwenden(aenderung)
    }

    /// Beendet das Sprechen unabhaengig vom Modus
    pub fn sprechen_stoppen(&self) -> SessionResult<()> {
        let aenderung = self.inner.ptt.lock().stoppen();
        self.inner.sendezustand_anwenden(aenderung)
    }

    pub fn stumm_setzen(&self, stumm: bool) -> SessionResult<()> {
        let aenderung = self.inner.ptt.lock().set_muted(stumm);
        self.inner.sendezustand_anwenden(aenderung)
    }

    pub fn ptt_modus_setzen(&self, modus: PttMode) -> SessionResult<()> {
        let aenderung = self.inner.ptt.lock().set_mode(modus);
        self.inner.sendezustand_anwenden(aenderung)
    }

    pub fn spricht(&self) -> bool {
        self.inner.ptt.lock().is_transmitting()
    }

    // ---- Abos ----

    pub fn events_abonnieren(&self) -> broadcast::Receiver<IntercomEvent> {
        self.inner.events.subscribe()
    }

    /// Wer spricht gerade (Remote-Teilnehmer)
    pub fn sprecher_abonnieren(&self) -> watch::Receiver<SprecherMap> {
        self.inner.anzeige.sprecher_abonnieren()
    }

    /// Remote-Pegel ueber der Rauschschwelle
    pub fn pegel_abonnieren(&self) -> watch::Receiver<PegelMap> {
        self.inner.anzeige.pegel_abonnieren()
    }

    /// Lokaler Mikrofon-Pegel, solange die Pegel-Schleife laeuft
    pub fn lokaler_pegel(&self) -> Option<watch::Receiver<f32>> {
        self.inner
            .pegel
            .lock()
            .as_ref()
            .map(PegelSchleife::pegel_abonnieren)
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

/// Was die Ereignisschleife einer Sitzung verarbeitet
enum SitzungsEingang {
    Signal(SignalPayload),
    Peer(PeerEvent),
}

impl Inner {
    fn ist_aktiv(&self) -> bool {
        self.aktiv.load(Ordering::Acquire)
    }

    fn event(&self, event: IntercomEvent) {
        let _ = self.events.send(event);
    }

    async fn eingang(self: &Arc<Self>, nachricht: RelayInbound) -> SessionResult<()> {
        if !self.ist_aktiv() {
            return Err(SessionError::NichtBeigetreten);
        }
        match nachricht {
            RelayInbound::Presence { roster } => {
                self.roster_anwenden(&roster).await;
                Ok(())
            }
            RelayInbound::Signal(envelope) => self.signal_empfangen(envelope).await,
            RelayInbound::Talk(event) => {
                self.anzeige.talk_empfangen(&event);
                Ok(())
            }
            RelayInbound::AudioLevel(sample) => {
                self.anzeige.pegel_empfangen(&sample);
                Ok(())
            }
        }
    }

    // ---- Roster / Warm-Start ----

    async fn roster_anwenden(self: &Arc<Self>, roster: &[RosterEntry]) {
        let ich = self.ich.user_id;
        let diff = self.roster.aktualisieren(roster, &ich);

        for remote in &diff.entfernt {
            tracing::info!(remote = %remote, "Teilnehmer hat die Produktion verlassen");
            self.supervisor.entfernen(remote);
            if let Some(sitzung) = self.tabelle.holen(remote) {
                self.abbauen(&sitzung);
            }
            self.anzeige.teilnehmer_entfernen(remote);
        }

        // Ein geaendertes Host-Flag verlangt eine Sitzung mit neuer Rolle
        for sitzung in self.tabelle.alle() {
            let remote = sitzung.remote();
            let rolle = self.rolle_gegenueber(&remote);
            if sitzung.ist_geschlossen() || sitzung.rolle() == rolle {
                continue;
            }
            tracing::info!(
                remote = %remote,
                alt = ?sitzung.rolle(),
                neu = ?rolle,
                "Host-Flag geaendert, Sitzung wird neu aufgebaut"
            );
            self.supervisor.geplant_abbrechen(&remote);
            self.abbauen(&sitzung);
            if let Err(e) = self.sitzung_sicherstellen(remote, None).await {
                tracing::warn!(remote = %remote, fehler = %e, "Neuaufbau mit neuer Rolle fehlgeschlagen");
            }
        }

        for eintrag in &diff.hinzugefuegt {
            let wartend = self.zurueckgestellt.lock().remove(&eintrag.user_id);
            for envelope in wartend.into_iter().flatten() {
                tracing::debug!(remote = %eintrag.user_id, "Zurueckgestelltes Signal wird zugestellt");
                if let Err(e) = self.signal_empfangen(envelope).await {
                    tracing::warn!(remote = %eintrag.user_id, fehler = %e, "Zurueckgestelltes Signal nicht verarbeitet");
                }
            }
        }

        let anwesend;
        let kandidaten = if diff.eigener_host_geaendert {
            anwesend = self.roster.alle();
            &anwesend
        } else {
            &diff.hinzugefuegt
        };
        let ziele = warm_start::ziele_bestimmen(
            &ich,
            self.roster.ich_host(),
            kandidaten,
            self.roster.host_rollen(),
        );
        for remote in ziele {
            if let Err(e) = self.sitzung_sicherstellen(remote, None).await {
                tracing::warn!(remote = %remote, fehler = %e, "Warm-Start fehlgeschlagen");
            }
        }
    }

    // ---- Signale ----

    async fn signal_empfangen(self: &Arc<Self>, envelope: SignalEnvelope) -> SessionResult<()> {
        if envelope.context != self.signal.context() {
            tracing::trace!(context = %envelope.context, "Signal fuer anderen Konsumenten ignoriert");
            return Ok(());
        }
        if envelope.target_user_id != self.ich.user_id || envelope.sender_user_id == self.ich.user_id {
            tracing::debug!(
                sender = %envelope.sender_user_id,
                ziel = %envelope.target_user_id,
                "Fehladressiertes Signal ignoriert"
            );
            return Ok(());
        }
        let remote = envelope.sender_user_id;
        if self.supervisor.ist_erschoepft(&remote) {
            tracing::debug!(remote = %remote, "Signal von dauerhaft getrenntem Teilnehmer verworfen");
            return Ok(());
        }

        let ist_offer = matches!(&envelope.payload, SignalPayload::Description(d) if d.ist_offer());

        // Ohne Roster-Eintrag ist das Host-Flag des Absenders unbekannt
        if !self.roster.anwesend(&remote) && self.tabelle.holen(&remote).is_none() {
            self.zurueckstellen(envelope, ist_offer);
            return Ok(());
        }

        // Offer auf eine fehlgeschlagene Sitzung: frisch aufbauen statt flicken
        if ist_offer {
            if let Some(alt) = self.tabelle.holen(&remote) {
                if alt.ist_geschlossen()
                    || matches!(alt.zustand(), ConnectionState::Failed | ConnectionState::Closed)
                {
                    tracing::info!(remote = %remote, "Offer fuer fehlgeschlagene Sitzung, baue neu auf");
                    self.supervisor.geplant_abbrechen(&remote);
                    self.abbauen(&alt);
                }
            }
        }

        let sitzung = match self.tabelle.holen(&remote) {
            Some(sitzung) => sitzung,
            None if ist_offer => self.sitzung_sicherstellen(remote, None).await?,
            None => {
                tracing::debug!(remote = %remote, "Signal ohne Sitzung verworfen");
                return Ok(());
            }
        };

        if !sitzung.signal_zustellen(envelope.payload) {
            tracing::debug!(remote = %remote, "Sitzung geschlossen, Signal verworfen");
        }
        Ok(())
    }

    /// Haelt Offer und nachfolgende Kandidaten zurueck, bis der Roster den
    /// Absender fuehrt
    ///
    /// Answers ohne Sitzung beziehen sich auf keine lebende Offer und
    /// werden verworfen.
    fn zurueckstellen(&self, envelope: SignalEnvelope, ist_offer: bool) {
        let remote = envelope.sender_user_id;
        let ist_answer = matches!(&envelope.payload, SignalPayload::Description(d) if !d.ist_offer());
        let mut zurueckgestellt = self.zurueckgestellt.lock();
        if ist_answer || (!ist_offer && !zurueckgestellt.contains_key(&remote)) {
            tracing::debug!(remote = %remote, "Signal ohne Sitzung verworfen");
            return;
        }
        let wartend = zurueckgestellt.entry(remote).or_default();
        if wartend.len() >= MAX_ZURUECKGESTELLT {
            tracing::warn!(remote = %remote, "Zu viele zurueckgestellte Signale, verworfen");
            return;
        }
        wartend.push(envelope);
        tracing::debug!(
            remote = %remote,
            wartend = wartend.len(),
            "Absender nicht im Roster, Signal zurueckgestellt"
        );
    }

    /// Rolle gegenueber `remote`; beide Host-Flags stammen aus dem Roster
    fn rolle_gegenueber(&self, remote: &UserId) -> NegotiationRole {
        rolle_bestimmen(
            &self.ich.user_id,
            self.roster.ich_host(),
            remote,
            self.roster.ist_host(remote),
        )
    }

    async fn signal_verarbeiten(&self, sitzung: &PeerSession, payload: SignalPayload) {
        let remote = sitzung.remote();
        match payload {
            SignalPayload::Description(description) => {
                match negotiation::description_empfangen(sitzung, description, &self.signal).await {
                    Ok(SignalErgebnis::Angewendet) => {}
                    Ok(SignalErgebnis::Ignoriert(grund)) => {
                        tracing::debug!(remote = %remote, grund = ?grund, "Beschreibung ignoriert");
                    }
                    Err(SessionError::SitzungGeschlossen(_)) => {
                        tracing::debug!(remote = %remote, "Sitzung waehrend der Aushandlung geschlossen");
                    }
                    Err(e) => {
                        tracing::warn!(remote = %remote, fehler = %e, "Beschreibung nicht anwendbar");
                    }
                }
            }
            SignalPayload::Candidate(kandidat) => {
                negotiation::kandidat_empfangen(sitzung, kandidat).await;
            }
        }
    }

    // ---- Sitzungen ----

    async fn sitzung_sicherstellen(
        self: &Arc<Self>,
        remote: UserId,
        auftrag: Option<u64>,
    ) -> SessionResult<Arc<PeerSession>> {
        if remote == self.ich.user_id {
            return Err(SessionError::SelbstVerbindung);
        }
        if !self.ist_aktiv() {
            return Err(SessionError::NichtBeigetreten);
        }
        if let Some(sitzung) = self.tabelle.holen(&remote) {
            return Ok(sitzung);
        }

        let mikrofon = match self.capture.mikrofon().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(remote = %remote, fehler = %e, "Kein Mikrofon, Sitzung nur empfangend");
                self.event(IntercomEvent::MikrofonFehler {
                    grund: e.to_string(),
                });
                None
            }
        };

        // Nach dem Await: noch im Raum, Auftrag noch gueltig?
        if !self.ist_aktiv() {
            return Err(SessionError::NichtBeigetreten);
        }
        if let Some(auftrag) = auftrag {
            if !self.supervisor.auftrag_gueltig(&remote, auftrag) {
                return Err(SessionError::SitzungGeschlossen(remote));
            }
        }

        let rolle = self.rolle_gegenueber(&remote);
        let mut empfaenger = None;
        let einfuegen = self.tabelle.holen_oder_einfuegen(remote, || {
            let (peer_tx, peer_rx) = mpsc::unbounded_channel();
            let verbindung = self.fabrik.erstellen(remote, peer_tx)?;
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let (sitzung, signal_rx) = PeerSession::neu(remote, generation, rolle, verbindung);
            empfaenger = Some((peer_rx, signal_rx));
            Ok::<_, SessionError>(sitzung)
        })?;

        let sitzung = match einfuegen {
            Einfuegen::Vorhanden(sitzung) => return Ok(sitzung),
            Einfuegen::Neu(sitzung) => sitzung,
        };
        let (peer_rx, signal_rx) = empfaenger
            .ok_or_else(|| IntercomError::intern("Neue Sitzung ohne Ereignis-Queues"))?;

        if let Some(stream) = &mikrofon {
            for track in stream.audio_tracks() {
                if let Err(e) = sitzung.verbindung().add_track(Arc::clone(track)) {
                    tracing::warn!(remote = %remote, track = track.id(), fehler = %e, "Track nicht angehaengt");
                }
            }
        }

        let schleife = sitzung_bedienen(
            Arc::downgrade(self),
            Arc::clone(&sitzung),
            peer_rx,
            signal_rx,
        );
        sitzung.schleife_setzen(tokio::spawn(schleife));

        if let Some(stream) = &mikrofon {
            self.pegel_schleife_sicherstellen(stream);
        }

        tracing::info!(
            remote = %remote,
            generation = sitzung.generation(),
            rolle = ?rolle,
            "Sitzung angelegt"
        );
        Ok(sitzung)
    }

    /// Schliesst die Sitzung und entfernt sie aus der Tabelle
    ///
    /// Beruehrt den Supervisor nicht.
    fn abbauen(&self, sitzung: &PeerSession) {
        let remote = sitzung.remote();
        let letzte = self.tabelle.alle().iter().all(|s| s.remote() == remote);
        if letzte {
            self.pegel_schleife_stoppen();
        }

        let war_offen = sitzung.schliessen();
        let entfernt = self
            .tabelle
            .entfernen(&remote, sitzung.generation())
            .is_some();

        if war_offen || entfernt {
            tracing::info!(remote = %remote, generation = sitzung.generation(), "Sitzung abgebaut");
            self.event(IntercomEvent::SitzungGetrennt { remote });
        }
    }

    fn auflegen(&self, remote: &UserId) {
        self.supervisor.entfernen(remote);
        if let Some(sitzung) = self.tabelle.holen(remote) {
            tracing::info!(remote = %remote, "Aufgelegt");
            self.abbauen(&sitzung);
        }
    }

    fn verlassen(&self) {
        if !self.aktiv.swap(false, Ordering::AcqRel) {
            return;
        }

        let aenderung = self.ptt.lock().stoppen();
        if let Some(zustand) = aenderung {
            self.capture.sprechen_setzen(false);
            if let Err(e) = self.broadcaster.sprechzustand_melden(zustand) {
                tracing::debug!(fehler = %e, "Talk-Stopp beim Verlassen nicht zustellbar");
            }
        }

        self.supervisor.alle_abbrechen();
        self.pegel_schleife_stoppen();
        for sitzung in self.tabelle.alle() {
            self.abbauen(&sitzung);
        }
        self.capture.freigeben();
        self.anzeige.leeren();
        self.roster.leeren();
        self.zurueckgestellt.lock().clear();
        tracing::info!(user_id = %self.ich.user_id, "Intercom verlassen");
    }

    // ---- Callbacks der Verbindung ----

    async fn peer_event(self: &Arc<Self>, sitzung: &Arc<PeerSession>, event: PeerEvent) {
        let remote = sitzung.remote();
        match event {
            PeerEvent::IceCandidate(kandidat) => {
                if let Err(e) = self.signal.senden(remote, SignalPayload::Candidate(kandidat)) {
                    tracing::warn!(remote = %remote, fehler = %e, "ICE-Kandidat nicht zustellbar");
                }
            }
            PeerEvent::NegotiationNeeded => {
                match negotiation::negotiation_needed(sitzung, &self.signal).await {
                    Ok(_) => {}
                    Err(SessionError::SitzungGeschlossen(_)) => {}
                    Err(e) => {
                        tracing::warn!(remote = %remote, fehler = %e, "Offer fehlgeschlagen");
                    }
                }
            }
            PeerEvent::ConnectionState(zustand) => self.zustand_geaendert(sitzung, zustand),
            PeerEvent::IceConnectionState(IceConnectionState::Failed) => {
                if sitzung.ice_restart_beginnen() {
                    tracing::info!(remote = %remote, "ICE fehlgeschlagen, Restart in place");
                    sitzung.verbindung().restart_ice();
                } else {
                    self.fehlschlag(sitzung);
                }
            }
            PeerEvent::IceConnectionState(zustand) => {
                tracing::trace!(remote = %remote, ice = ?zustand, "ICE-Zustand");
            }
        }
    }

    fn zustand_geaendert(self: &Arc<Self>, sitzung: &Arc<PeerSession>, neu: ConnectionState) {
        let remote = sitzung.remote();
        let alt = sitzung.zustand_setzen(neu);
        if alt == neu {
            return;
        }
        tracing::debug!(remote = %remote, alt = ?alt, neu = ?neu, "Verbindungszustand geaendert");

        match neu {
            ConnectionState::Connected => {
                self.supervisor.verbunden(&remote);
                tracing::info!(remote = %remote, "Sitzung verbunden");
                self.event(IntercomEvent::SitzungVerbunden { remote });
            }
            ConnectionState::Failed => {
                if sitzung.ice_restart_laeuft() {
                    tracing::debug!(remote = %remote, "Verbindung fehlgeschlagen, ICE-Restart laeuft");
                } else {
                    self.fehlschlag(sitzung);
                }
            }
            ConnectionState::Closed => self.abbauen(sitzung),
            _ => {}
        }
    }

    // ---- Supervisor ----

    fn fehlschlag(self: &Arc<Self>, sitzung: &Arc<PeerSession>) {
        if sitzung.ist_geschlossen() || !sitzung.fehlschlag_markieren() {
            return;
        }
        let remote = sitzung.remote();
        let generation = sitzung.generation();
        let weak = Arc::downgrade(self);

        let entscheidung = self.supervisor.fehlgeschlagen(remote, move |auftrag| async move {
            if let Some(inner) = weak.upgrade() {
                inner.neuaufbau(remote, generation, auftrag).await;
            }
        });

        match entscheidung {
            Entscheidung::NeuaufbauGeplant {
                versuch,
                verzoegerung,
                ..
            } => {
                self.event(IntercomEvent::Wiederverbindung {
                    remote,
                    versuch,
                    verzoegerung,
                });
            }
            Entscheidung::BereitsGeplant => {
                tracing::debug!(remote = %remote, "Neuaufbau bereits geplant");
            }
            Entscheidung::Erschoepft { erstmals } => {
                self.abbauen(sitzung);
                if erstmals {
                    self.event(IntercomEvent::DauerhafterFehler { remote });
                }
            }
        }
    }

    /// Ausfuehrung eines geplanten Neuaufbaus
    async fn neuaufbau(self: &Arc<Self>, remote: UserId, generation: u64, auftrag: u64) {
        if !self.ist_aktiv() || !self.supervisor.auftrag_gueltig(&remote, auftrag) {
            return;
        }
        if let Some(alt) = self.tabelle.holen(&remote) {
            if alt.generation() != generation {
                tracing::debug!(remote = %remote, "Sitzung bereits ersetzt, Neuaufbau entfaellt");
                return;
            }
            self.abbauen(&alt);
        }

        tracing::info!(remote = %remote, auftrag, "Neuaufbau der Sitzung");
        if let Err(e) = self.sitzung_sicherstellen(remote, Some(auftrag)).await {
            tracing::warn!(remote = %remote, fehler = %e, "Neuaufbau fehlgeschlagen");
        }
    }

    // ---- Sprechen / Pegel ----

    fn sendezustand_anwenden(&self, aenderung: Option<SendeZustand>) -> SessionResult<()> {
        let Some(zustand) = aenderung else {
            return Ok(());
        };
        self.capture.sprechen_setzen(zustand.spricht);
        if self.ist_aktiv() {
            self.broadcaster.sprechzustand_melden(zustand)?;
        }
        Ok(())
    }

    fn pegel_schleife_sicherstellen(&self, stream: &MicrophoneStream) {
        let mut pegel = self.pegel.lock();
        if pegel.as_ref().is_some_and(PegelSchleife::laeuft) {
            return;
        }
        *pegel = Some(PegelSchleife::starten(
            stream.analyser(),
            self.config.frame_intervall(),
            Arc::clone(&self.broadcaster),
        ));
    }

    fn pegel_schleife_stoppen(&self) {
        if let Some(schleife) = self.pegel.lock().take() {
            schleife.stoppen();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for sitzung in self.tabelle.alle() {
            sitzung.schliessen();
        }
    }
}

/// Ereignisschleife einer Sitzung
///
/// Signale werden vor Callbacks bedient. Die Schleife endet, sobald die
/// Sitzung geschlossen oder der Manager gedroppt wurde.
fn sitzung_bedienen(
    inner: Weak<Inner>,
    sitzung: Arc<PeerSession>,
    mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    mut signal_rx: mpsc::UnboundedReceiver<SignalPayload>,
) -> BoxFuture<'static, ()> {
    async move {
        loop {
            let eingang = tokio::select! {
                biased;
                Some(payload) = signal_rx.recv() => SitzungsEingang::Signal(payload),
                Some(event) = peer_rx.recv() => SitzungsEingang::Peer(event),
                else => break,
            };
            if sitzung.ist_geschlossen() {
                break;
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match eingang {
                SitzungsEingang::Signal(payload) => inner.signal_verarbeiten(&sitzung, payload).await,
                SitzungsEingang::Peer(event) => inner.peer_event(&sitzung, event).await,
            }
        }
        tracing::trace!(remote = %sitzung.remote(), generation = sitzung.generation(), "Sitzungsschleife beendet");
    }
    .boxed()
}
