//! Lokales Mikrofon – genau ein geteilter Stream pro Prozess
//!
//! Das Mikrofon wird lazy beim ersten Bedarf beschafft. Gleichzeitige
//! Aufrufer warten auf dieselbe laufende Beschaffung; ein Fehlschlag wird
//! nicht gecacht, der naechste Aufrufer darf es erneut versuchen.
//!
//! Alle Tracks starten deaktiviert. Sprechen schaltet nur das
//! `enabled`-Flag um, die Tracks bleiben an allen Sitzungen angehaengt.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, CaptureResult};

// ---------------------------------------------------------------------------
// Track
// ---------------------------------------------------------------------------

/// Ein lokaler Audio-Track des geteilten Mikrofon-Streams
///
/// Sitzungen haengen denselben Track an (Arc), sie klonen ihn nie.
#[derive(Debug)]
pub struct LocalAudioTrack {
    id: String,
    enabled: AtomicBool,
}

impl LocalAudioTrack {
    /// Erstellt einen neuen, deaktivierten Track
    pub fn neu(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            enabled: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Stream + Quelle
// ---------------------------------------------------------------------------

/// Liefert Frequenz-Snapshots des Mikrofon-Signals (0–255 pro Bin)
pub trait LevelAnalyser: Send + Sync + 'static {
    /// Anzahl der Frequenz-Bins
    fn bins(&self) -> usize;

    /// Schreibt den aktuellen Snapshot in `puffer` (Laenge = `bins()`)
    fn frequenz_snapshot(&self, puffer: &mut [u8]);
}

/// Der geteilte Mikrofon-Stream
pub struct MicrophoneStream {
    tracks: Vec<Arc<LocalAudioTrack>>,
    analyser: Arc<dyn LevelAnalyser>,
}

impl MicrophoneStream {
    /// Erstellt den Stream; alle Tracks werden deaktiviert
    pub fn neu(tracks: Vec<Arc<LocalAudioTrack>>, analyser: Arc<dyn LevelAnalyser>) -> Self {
        for track in &tracks {
            track.set_enabled(false);
        }
        Self { tracks, analyser }
    }

    pub fn audio_tracks(&self) -> &[Arc<LocalAudioTrack>] {
        &self.tracks
    }

    pub fn analyser(&self) -> Arc<dyn LevelAnalyser> {
        Arc::clone(&self.analyser)
    }

    /// Setzt das `enabled`-Flag aller Tracks
    pub fn set_enabled(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }
}

impl std::fmt::Debug for MicrophoneStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrophoneStream")
            .field("tracks", &self.tracks)
            .finish_non_exhaustive()
    }
}

/// Geraetezugriff der hostenden Schicht (Browser-Medien, cpal, ...)
#[async_trait]
pub trait MicrophoneSource: Send + Sync + 'static {
    async fn oeffnen(&self) -> CaptureResult<MicrophoneStream>;
}

// ---------------------------------------------------------------------------
// CaptureManager
// ---------------------------------------------------------------------------

type Beschaffung = Shared<BoxFuture<'static, CaptureResult<Arc<MicrophoneStream>>>>;

enum Slot {
    Leer,
    Laeuft { versuch: u64, future: Beschaffung },
    Fertig(Arc<MicrophoneStream>),
}

/// Verwaltet den einen Mikrofon-Stream des Prozesses
pub struct CaptureManager {
    quelle: Arc<dyn MicrophoneSource>,
    slot: Mutex<Slot>,
    versuche: AtomicU64,
    /// Aktueller Push-to-Talk-Zustand, wird auch auf spaet beschaffte
    /// Streams angewendet
    sprechen: AtomicBool,
}

impl CaptureManager {
    pub fn neu(quelle: Arc<dyn MicrophoneSource>) -> Self {
        Self {
            quelle,
            slot: Mutex::new(Slot::Leer),
            versuche: AtomicU64::new(0),
            sprechen: AtomicBool::new(false),
        }
    }

    /// Gibt den geteilten Mikrofon-Stream zurueck und beschafft ihn bei Bedarf
    pub async fn mikrofon(&self) -> CaptureResult<Arc<MicrophoneStream>> {
        let (versuch, future) = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Fertig(stream) => return Ok(Arc::clone(stream)),
                Slot::Laeuft { versuch, future } => (*versuch, future.clone()),
                Slot::Leer => {
                    let versuch = self.versuche.fetch_add(1, Ordering::Relaxed) + 1;
                    let quelle = Arc::clone(&self.quelle);
                    let future = async move { quelle.oeffnen().await.map(Arc::new) }
                        .boxed()
                        .shared();
                    debug!(versuch, "Mikrofon-Beschaffung gestartet");
                    *slot = Slot::Laeuft {
                        versuch,
                        future: future.clone(),
                    };
                    (versuch, future)
                }
            }
        };

        let ergebnis = future.await;

        let mut slot = self.slot.lock();
        let noch_aktuell = matches!(&*slot, Slot::Laeuft { versuch: v, .. } if *v == versuch);
        match &ergebnis {
            Ok(stream) => {
                if noch_aktuell {
                    stream.set_enabled(self.sprechen.load(Ordering::Acquire));
                    *slot = Slot::Fertig(Arc::clone(stream));
                    info!(tracks = stream.audio_tracks().len(), "Mikrofon beschafft");
                }
            }
            Err(e) => {
                if noch_aktuell {
                    *slot = Slot::Leer;
                    warn!(fehler = %e, "Mikrofon-Beschaffung fehlgeschlagen");
                }
            }
        }
        ergebnis
    }

    /// Bereits beschaffter Stream, ohne eine Beschaffung auszuloesen
    pub fn aktuell(&self) -> Option<Arc<MicrophoneStream>> {
        match &*self.slot.lock() {
            Slot::Fertig(stream) => Some(Arc::clone(stream)),
            _ => None,
        }
    }

    /// Push-to-Talk-Gate: schaltet nur `enabled`, nie die Tracks selbst
    pub fn sprechen_setzen(&self, aktiv: bool) {
        self.sprechen.store(aktiv, Ordering::Release);
        if let Some(stream) = self.aktuell() {
            stream.set_enabled(aktiv);
        }
    }

    pub fn spricht(&self) -> bool {
        self.sprechen.load(Ordering::Acquire)
    }

    /// Gibt den Stream frei (Teardown der Komponente)
    pub fn freigeben(&self) {
        self.sprechen.store(false, Ordering::Release);
        let alt = std::mem::replace(&mut *self.slot.lock(), Slot::Leer);
        if let Slot::Fertig(stream) = alt {
            stream.set_enabled(false);
            debug!("Mikrofon freigegeben");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
