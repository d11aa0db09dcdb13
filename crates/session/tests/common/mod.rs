//! Gemeinsame Test-Doubles fuer die Integration-Tests
//!
//! - `SimPeer`: In-Memory-Verbindung mit Signaling-Automat
//! - `SimFabrik`: erzeugt und merkt sich alle `SimPeer`
//! - `SimMikrofon`: Mikrofon mit festem Pegel, optional verweigert
//! - `TestRaum`: Relay zwischen mehreren `IntercomManager`

#![allow(dead_code)]

use async_trait::async_trait;
use intercom_audio::{
    CaptureError, CaptureResult, LevelAnalyser, LocalAudioTrack, MicrophoneSource,
    MicrophoneStream,
};
use intercom_core::types::{ProductionId, UserId};
use intercom_core::{IntercomError, IntercomEvent};
use intercom_protocol::{
    IceCandidate, KanalRelay, RelayInbound, RelayMessage, RosterEntry, SessionDescription,
    SignalPayload,
};
use intercom_session::{
    ConnectionState, IceConnectionState, IntercomConfig, IntercomManager, LocalIdentity,
    PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventSender, SignalingState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

// ---------------------------------------------------------------------------
// SimPeer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SimZustand {
    signaling: Option<SignalingState>,
    lokal: Option<SessionDescription>,
    entfernt: Option<SessionDescription>,
    verbunden: bool,
    restart: bool,
    verhandlung_offen: bool,
    geschlossen: bool,
    zaehler: u32,
    angewendete_remote: Vec<SessionDescription>,
    lokale_offers: Vec<SessionDescription>,
    tracks: Vec<Arc<LocalAudioTrack>>,
    kandidaten: Vec<IceCandidate>,
}

/// In-Memory-Verbindung
///
/// Meldet `connected`, sobald eine Offer/Answer-Runde abgeschlossen ist,
/// und `negotiationneeded` bei neuen Tracks oder einem ICE-Restart.
pub struct SimPeer {
    pub ich: UserId,
    pub remote: UserId,
    events: PeerEventSender,
    zustand: Mutex<SimZustand>,
}

impl SimPeer {
    fn neu(ich: UserId, remote: UserId, events: PeerEventSender) -> Self {
        Self {
            ich,
            remote,
            events,
            zustand: Mutex::new(SimZustand {
                signaling: Some(SignalingState::Stable),
                ..SimZustand::default()
            }),
        }
    }

    fn melden(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn state(z: &SimZustand) -> SignalingState {
        z.signaling.unwrap_or(SignalingState::Stable)
    }

    fn sdp(&self, z: &mut SimZustand, art: &str) -> String {
        z.zaehler += 1;
        format!("{art}:{}->{}:{}", self.ich.inner(), self.remote.inner(), z.zaehler)
    }

    fn nach_stable(&self, z: &mut SimZustand) {
        let ausgehandelt = z.lokal.is_some() && z.entfernt.is_some();
        if ausgehandelt && (!z.verbunden || z.restart) {
            z.verbunden = true;
            z.restart = false;
            self.melden(PeerEvent::ConnectionState(ConnectionState::Connecting));
            self.melden(PeerEvent::IceConnectionState(IceConnectionState::Connected));
            self.melden(PeerEvent::ConnectionState(ConnectionState::Connected));
        }
        if z.verhandlung_offen {
            z.verhandlung_offen = false;
            self.melden(PeerEvent::NegotiationNeeded);
        }
    }

    fn verhandlung_anstossen(&self, z: &mut SimZustand) {
        if Self::state(z) == SignalingState::Stable {
            self.melden(PeerEvent::NegotiationNeeded);
        } else {
            z.verhandlung_offen = true;
        }
    }

    // ---- Test-Hooks ----

    /// Transport meldet `failed`
    pub fn fehler_simulieren(&self) {
        self.melden(PeerEvent::ConnectionState(ConnectionState::Failed));
    }

    /// ICE bricht weg; die Verbindung meldet danach ebenfalls `failed`
    pub fn ice_fehler_simulieren(&self) {
        self.melden(PeerEvent::IceConnectionState(IceConnectionState::Failed));
        self.melden(PeerEvent::ConnectionState(ConnectionState::Failed));
    }

    /// Transport hat die Verbindung von sich aus geschlossen
    pub fn schliessen_simulieren(&self) {
        self.melden(PeerEvent::ConnectionState(ConnectionState::Closed));
    }

    pub fn angewendete_remote(&self) -> Vec<SessionDescription> {
        self.zustand.lock().angewendete_remote.clone()
    }

    pub fn lokale_offers(&self) -> Vec<SessionDescription> {
        self.zustand.lock().lokale_offers.clone()
    }

    pub fn tracks(&self) -> Vec<Arc<LocalAudioTrack>> {
        self.zustand.lock().tracks.clone()
    }

    pub fn kandidaten(&self) -> usize {
        self.zustand.lock().kandidaten.len()
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.zustand.lock().geschlossen
    }
}

fn falscher_zustand(was: &str, state: SignalingState) -> IntercomError {
    IntercomError::PeerVerbindung(format!("{was} im Zustand {state:?} nicht erlaubt"))
}

#[async_trait]
impl PeerConnection for SimPeer {
    fn signaling_state(&self) -> SignalingState {
        let z = self.zustand.lock();
        if z.geschlossen {
            SignalingState::Closed
        } else {
            Self::state(&z)
        }
    }

    async fn set_local_offer(&self) -> intercom_core::Result<SessionDescription> {
        let mut z = self.zustand.lock();
        let state = Self::state(&z);
        if z.geschlossen || state != SignalingState::Stable {
            return Err(falscher_zustand("set_local_offer", state));
        }
        let offer = SessionDescription::offer(self.sdp(&mut z, "offer"));
        z.signaling = Some(SignalingState::HaveLocalOffer);
        z.lokal = Some(offer.clone());
        z.lokale_offers.push(offer.clone());
        self.melden(PeerEvent::IceCandidate(IceCandidate::neu(format!(
            "candidate:{}",
            z.zaehler
        ))));
        Ok(offer)
    }

    async fn set_local_answer(&self) -> intercom_core::Result<SessionDescription> {
        let mut z = self.zustand.lock();
        let state = Self::state(&z);
        if z.geschlossen || state != SignalingState::HaveRemoteOffer {
            return Err(falscher_zustand("set_local_answer", state));
        }
        let answer = SessionDescription::answer(self.sdp(&mut z, "answer"));
        z.signaling = Some(SignalingState::Stable);
        z.lokal = Some(answer.clone());
        self.melden(PeerEvent::IceCandidate(IceCandidate::neu(format!(
            "candidate:{}",
            z.zaehler
        ))));
        self.nach_stable(&mut z);
        Ok(answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> intercom_core::Result<()> {
        let mut z = self.zustand.lock();
        let state = Self::state(&z);
        if z.geschlossen {
            return Err(falscher_zustand("set_remote_description", SignalingState::Closed));
        }
        if description.ist_offer() {
            if state != SignalingState::Stable {
                return Err(falscher_zustand("Remote-Offer", state));
            }
            z.signaling = Some(SignalingState::HaveRemoteOffer);
            z.entfernt = Some(description.clone());
            z.angewendete_remote.push(description);
        } else {
            if state != SignalingState::HaveLocalOffer {
                return Err(falscher_zustand("Remote-Answer", state));
            }
            z.signaling = Some(SignalingState::Stable);
            z.entfernt = Some(description.clone());
            z.angewendete_remote.push(description);
            self.nach_stable(&mut z);
        }
        Ok(())
    }

    async fn rollback(&self) -> intercom_core::Result<()> {
        let mut z = self.zustand.lock();
        let state = Self::state(&z);
        if state != SignalingState::HaveLocalOffer {
            return Err(falscher_zustand("rollback", state));
        }
        z.signaling = Some(SignalingState::Stable);
        z.lokal = None;
        Ok(())
    }

    async fn add_ice_candidate(&self, kandidat: IceCandidate) -> intercom_core::Result<()> {
        let mut z = self.zustand.lock();
        if z.geschlossen || z.entfernt.is_none() {
            return Err(IntercomError::PeerVerbindung(
                "Kandidat ohne Remote-Beschreibung".into(),
            ));
        }
        z.kandidaten.push(kandidat);
        Ok(())
    }

    fn restart_ice(&self) {
        let mut z = self.zustand.lock();
        z.restart = true;
        self.verhandlung_anstossen(&mut z);
    }

    fn add_track(&self, track: Arc<LocalAudioTrack>) -> intercom_core::Result<()> {
        let mut z = self.zustand.lock();
        z.tracks.push(track);
        self.verhandlung_anstossen(&mut z);
        Ok(())
    }

    fn close(&self) {
        let mut z = self.zustand.lock();
        z.geschlossen = true;
        z.signaling = Some(SignalingState::Closed);
    }
}

// ---------------------------------------------------------------------------
// SimFabrik
// ---------------------------------------------------------------------------

/// Erzeugt `SimPeer`s und merkt sich alle
pub struct SimFabrik {
    ich: UserId,
    peers: Mutex<Vec<Arc<SimPeer>>>,
    /// Neue Verbindungen melden sofort `failed`
    pub sofort_scheitern: AtomicBool,
}

impl SimFabrik {
    pub fn neu(ich: UserId) -> Arc<Self> {
        Arc::new(Self {
            ich,
            peers: Mutex::new(Vec::new()),
            sofort_scheitern: AtomicBool::new(false),
        })
    }

    pub fn peers_fuer(&self, remote: &UserId) -> Vec<Arc<SimPeer>> {
        self.peers
            .lock()
            .iter()
            .filter(|p| p.remote == *remote)
            .cloned()
            .collect()
    }

    pub fn anzahl_fuer(&self, remote: &UserId) -> usize {
        self.peers_fuer(remote).len()
    }

    pub fn letzter(&self, remote: &UserId) -> Arc<SimPeer> {
        self.peers_fuer(remote)
            .pop()
            .expect("keine Verbindung zu diesem Teilnehmer")
    }
}

impl PeerConnectionFactory for SimFabrik {
    fn erstellen(
        &self,
        remote: UserId,
        events: PeerEventSender,
    ) -> intercom_core::Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(SimPeer::neu(self.ich, remote, events));
        if self.sofort_scheitern.load(Ordering::SeqCst) {
            peer.fehler_simulieren();
        }
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ---------------------------------------------------------------------------
// SimMikrofon
// ---------------------------------------------------------------------------

struct FesterPegel(Arc<AtomicU8>);

impl LevelAnalyser for FesterPegel {
    fn bins(&self) -> usize {
        16
    }

    fn frequenz_snapshot(&self, puffer: &mut [u8]) {
        puffer.fill(self.0.load(Ordering::Relaxed));
    }
}

/// Mikrofon mit festem Pegel
pub struct SimMikrofon {
    pub verweigern: AtomicBool,
    pub aufrufe: AtomicUsize,
    pub pegel: Arc<AtomicU8>,
}

impl SimMikrofon {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self {
            verweigern: AtomicBool::new(false),
            aufrufe: AtomicUsize::new(0),
            pegel: Arc::new(AtomicU8::new(128)),
        })
    }
}

#[async_trait]
impl MicrophoneSource for SimMikrofon {
    async fn oeffnen(&self) -> CaptureResult<MicrophoneStream> {
        self.aufrufe.fetch_add(1, Ordering::SeqCst);
        if self.verweigern.load(Ordering::SeqCst) {
            return Err(CaptureError::ZugriffVerweigert);
        }
        let track = LocalAudioTrack::neu("mic-0");
        Ok(MicrophoneStream::neu(
            vec![track],
            Arc::new(FesterPegel(Arc::clone(&self.pegel))),
        ))
    }
}

// ---------------------------------------------------------------------------
// TestRaum
// ---------------------------------------------------------------------------

/// Ein Teilnehmer im Testraum
pub struct Teilnehmer {
    pub id: UserId,
    pub rolle: String,
    pub manager: IntercomManager,
    pub fabrik: Arc<SimFabrik>,
    pub mikrofon: Arc<SimMikrofon>,
    pub events: broadcast::Receiver<IntercomEvent>,
    /// Alles was dieser Teilnehmer ans Relay geschickt hat
    pub gesendet: Vec<RelayMessage>,
    ausgang: mpsc::UnboundedReceiver<RelayMessage>,
    beigetreten: bool,
}

impl Teilnehmer {
    /// Anzahl verschickter Offers an `ziel`
    pub fn offers_an(&self, ziel: &UserId) -> usize {
        self.gesendet
            .iter()
            .filter(|m| match m {
                RelayMessage::Signal(env) => {
                    env.target_user_id == *ziel
                        && matches!(&env.payload, SignalPayload::Description(d) if d.ist_offer())
                }
                _ => false,
            })
            .count()
    }

    pub fn pegel_gesendet(&self) -> usize {
        self.gesendet
            .iter()
            .filter(|m| matches!(m, RelayMessage::AudioLevel(_)))
            .count()
    }

    pub fn zustand_zu(&self, remote: &UserId) -> Option<ConnectionState> {
        self.manager.sitzung(remote).map(|s| s.zustand())
    }

    /// Alle bisher eingegangenen Events
    pub fn events_leeren(&mut self) -> Vec<IntercomEvent> {
        let mut liste = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            liste.push(event);
        }
        liste
    }
}

/// Relay zwischen mehreren Managern einer Produktion
pub struct TestRaum {
    pub production_id: ProductionId,
    pub teilnehmer: Vec<Teilnehmer>,
    pub roster: Vec<RosterEntry>,
}

impl TestRaum {
    pub fn neu() -> Self {
        intercom_observability::logging_fuer_tests();
        Self {
            production_id: ProductionId::new(),
            teilnehmer: Vec::new(),
            roster: Vec::new(),
        }
    }

    /// Legt einen Teilnehmer an (noch nicht beigetreten)
    pub fn hinzufuegen(&mut self, rolle: &str) -> usize {
        self.hinzufuegen_mit(rolle, IntercomConfig::default())
    }

    pub fn hinzufuegen_mit(&mut self, rolle: &str, config: IntercomConfig) -> usize {
        let id = UserId::new();
        let ist_host = config.rollen.host_rollen.ist_host(rolle);
        let (relay, ausgang) = KanalRelay::neu();
        let fabrik = SimFabrik::neu(id);
        let mikrofon = SimMikrofon::neu();
        let manager = IntercomManager::neu(
            LocalIdentity {
                user_id: id,
                role_name: rolle.into(),
                production_id: self.production_id,
                ist_host,
            },
            config,
            Arc::new(relay),
            fabrik.clone(),
            mikrofon.clone(),
        );
        let events = manager.events_abonnieren();
        self.teilnehmer.push(Teilnehmer {
            id,
            rolle: rolle.into(),
            manager,
            fabrik,
            mikrofon,
            events,
            gesendet: Vec::new(),
            ausgang,
            beigetreten: false,
        });
        self.teilnehmer.len() - 1
    }

    pub fn id(&self, idx: usize) -> UserId {
        self.teilnehmer[idx].id
    }

    /// Tritt bei; das Relay beantwortet den `presence.request` beim Pumpen
    pub fn beitreten(&mut self, idx: usize) {
        let t = &mut self.teilnehmer[idx];
        t.beigetreten = true;
        self.roster.push(RosterEntry::neu(t.id, t.rolle.clone()));
        t.manager.beitreten().expect("beitreten");
    }

    /// Teilnehmer ohne Manager, nur im Roster sichtbar
    pub fn phantom(&mut self, rolle: &str) -> UserId {
        let id = UserId::new();
        self.roster.push(RosterEntry::neu(id, rolle));
        id
    }

    /// Entfernt einen Teilnehmer aus dem Roster und verteilt das Update
    pub async fn roster_entfernen(&mut self, id: &UserId) {
        self.roster.retain(|e| e.user_id != *id);
        self.presence_verteilen().await;
    }

    /// Schickt den aktuellen Roster an alle Beigetretenen
    pub async fn presence_verteilen(&self) {
        for t in self.teilnehmer.iter().filter(|t| t.beigetreten) {
            let _ = t
                .manager
                .eingang(RelayInbound::Presence {
                    roster: self.roster.clone(),
                })
                .await;
        }
    }

    /// Stellt Nachrichten zu, bis das Relay zur Ruhe kommt
    pub async fn pumpen(&mut self) {
        let mut ruhig = 0;
        let mut runden = 0;
        while ruhig < 3 && runden < 1000 {
            runden += 1;
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
            let nachrichten = self.einsammeln();
            if nachrichten.is_empty() {
                ruhig += 1;
                continue;
            }
            ruhig = 0;
            for (von, nachricht) in nachrichten {
                self.zustellen(von, nachricht).await;
            }
        }
    }

    /// Holt alle ausstehenden Nachrichten aus den Ausgaengen, ohne sie
    /// zuzustellen
    pub fn einsammeln(&mut self) -> Vec<(usize, RelayMessage)> {
        let mut alle = Vec::new();
        for (idx, t) in self.teilnehmer.iter_mut().enumerate() {
            while let Ok(nachricht) = t.ausgang.try_recv() {
                t.gesendet.push(nachricht.clone());
                alle.push((idx, nachricht));
            }
        }
        alle
    }

    pub async fn zustellen(&self, von: usize, nachricht: RelayMessage) {
        match nachricht {
            RelayMessage::PresenceRequest { .. } => self.presence_verteilen().await,
            RelayMessage::Signal(envelope) => {
                if let Some(ziel) = self
                    .teilnehmer
                    .iter()
                    .find(|t| t.beigetreten && t.id == envelope.target_user_id)
                {
                    let _ = ziel.manager.eingang(RelayInbound::Signal(envelope)).await;
                }
            }
            RelayMessage::Talk(event) => {
                for (idx, t) in self.teilnehmer.iter().enumerate() {
                    if idx != von && t.beigetreten {
                        let _ = t.manager.eingang(RelayInbound::Talk(event.clone())).await;
                    }
                }
            }
            RelayMessage::AudioLevel(sample) => {
                for (idx, t) in self.teilnehmer.iter().enumerate() {
                    if idx != von && t.beigetreten {
                        let _ = t
                            .manager
                            .eingang(RelayInbound::AudioLevel(sample.clone()))
                            .await;
                    }
                }
            }
        }
    }
}

/// Laesst die Ereignisschleifen der Sitzungen laufen, ohne zuzustellen
pub async fn abarbeiten() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Host und Gast, beide beigetreten und verbunden
pub async fn verbundenes_paar() -> (TestRaum, usize, usize) {
    let mut raum = TestRaum::neu();
    let host = raum.hinzufuegen("Operator");
    let gast = raum.hinzufuegen("Guest");
    raum.beitreten(host);
    raum.beitreten(gast);
    raum.pumpen().await;

    let (h, g) = (raum.id(host), raum.id(gast));
    assert_eq!(raum.teilnehmer[host].zustand_zu(&g), Some(ConnectionState::Connected));
    assert_eq!(raum.teilnehmer[gast].zustand_zu(&h), Some(ConnectionState::Connected));
    (raum, host, gast)
}
