//! Pegel-Analyse-Schleife
//!
//! Pollt pro Frame-Intervall (Standard 16 ms) einen Frequenz-Snapshot des
//! Mikrofons, berechnet daraus einen Pegel 0.0–1.0 und
//! - publiziert ihn via `watch` fuer die lokale Anzeige
//! - reicht ihn an den [`TalkBroadcaster`] weiter (gedrosselte Telemetrie)
//!
//! Die Schleife ist ein tokio-Task und wird beim Teardown abgebrochen,
//! spaetestens wenn die [`PegelSchleife`] gedroppt wird.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broadcaster::TalkBroadcaster;
use crate::capture::LevelAnalyser;

/// Standard-Frame-Intervall (~60 Hz)
pub const FRAME_INTERVALL: Duration = Duration::from_millis(16);

/// Mittelwert aller Bins, normiert auf 0.0–1.0
pub fn pegel_berechnen(snapshot: &[u8]) -> f32 {
    if snapshot.is_empty() {
        return 0.0;
    }
    let summe: u32 = snapshot.iter().map(|&b| b as u32).sum();
    summe as f32 / snapshot.len() as f32 / 255.0
}

/// Laufende Pegel-Schleife
pub struct PegelSchleife {
    handle: JoinHandle<()>,
    pegel_rx: watch::Receiver<f32>,
}

impl PegelSchleife {
    /// Startet die Schleife auf dem aktuellen tokio-Runtime
    pub fn starten(
        analyser: Arc<dyn LevelAnalyser>,
        intervall: Duration,
        broadcaster: Arc<TalkBroadcaster>,
    ) -> Self {
        let (pegel_tx, pegel_rx) = watch::channel(0.0f32);

        let handle = tokio::spawn(async move {
            let mut puffer = vec![0u8; analyser.bins()];
            let mut ticker = tokio::time::interval(intervall);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                analyser.frequenz_snapshot(&mut puffer);
                let pegel = pegel_berechnen(&puffer);
                pegel_tx.send_replace(pegel);
                broadcaster.pegel_messwert(pegel, Instant::now());
            }
        });

        tracing::debug!(intervall_ms = intervall.as_millis() as u64, "Pegel-Schleife gestartet");
        Self { handle, pegel_rx }
    }

    /// Lokaler Pegel fuer die Anzeige
    pub fn pegel_abonnieren(&self) -> watch::Receiver<f32> {
        self.pegel_rx.clone()
    }

    pub fn stoppen(&self) {
        if !self.handle.is_finished() {
            self.handle.abort();
            tracing::debug!("Pegel-Schleife gestoppt");
        }
    }

    pub fn laeuft(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PegelSchleife {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
