//! Reconnection-Supervisor – Neuaufbau fehlgeschlagener Sitzungen
//!
//! Lineares Backoff: Versuch `n` (0-basiert) wartet `basis * (n + 1)`.
//! Nach `max_retries` Neuaufbauten ist der Teilnehmer terminal fehlerhaft,
//! bis er den Raum verlaesst und neu beitritt.
//!
//! Jeder geplante Neuaufbau ist ein eigener tokio-Task mit Auftrags-ID.
//! Auflegen oder Verlassen bricht ihn ab und macht die Auftrags-ID
//! ungueltig, sodass ein veralteter Neuaufbau keine absichtlich
//! geschlossene Sitzung wiederbelebt.

use dashmap::DashMap;
use intercom_core::types::UserId;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Standard-Obergrenze fuer Neuaufbauten pro Teilnehmer
pub const MAX_RETRIES: u32 = 5;

/// Standard-Basis fuer das lineare Backoff
pub const BASIS_VERZOEGERUNG: Duration = Duration::from_secs(1);

/// Verzoegerung vor Neuaufbau Nummer `versuch` (0-basiert)
pub fn backoff(basis: Duration, versuch: u32) -> Duration {
    basis.saturating_mul(versuch.saturating_add(1))
}

/// Was der Supervisor auf einen Fehlschlag hin entschieden hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entscheidung {
    /// Neuaufbau eingeplant; `versuch` ist 1-basiert
    NeuaufbauGeplant {
        versuch: u32,
        verzoegerung: Duration,
        auftrag: u64,
    },
    /// Fuer diesen Teilnehmer ist bereits ein Neuaufbau geplant
    BereitsGeplant,
    /// Retry-Budget erschoepft; `erstmals` nur beim ersten Erreichen
    Erschoepft { erstmals: bool },
}

struct Auftrag {
    id: u64,
    handle: JoinHandle<()>,
    /// Wartezeit abgelaufen, der Neuaufbau laeuft oder ist fertig
    faellig: Arc<AtomicBool>,
}

impl Auftrag {
    fn wartet(&self) -> bool {
        !self.faellig.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

#[derive(Default)]
struct RetryZustand {
    versuche: u32,
    auftrag: Option<Auftrag>,
    erschoepft: bool,
}

/// Plant und verwaltet Neuaufbauten pro Remote-Teilnehmer
pub struct ReconnectSupervisor {
    max_retries: u32,
    basis: Duration,
    zustaende: Arc<DashMap<UserId, RetryZustand>>,
    naechster_auftrag: AtomicU64,
}

impl ReconnectSupervisor {
    pub fn neu(max_retries: u32, basis: Duration) -> Self {
        Self {
            max_retries,
            basis,
            zustaende: Arc::new(DashMap::new()),
            naechster_auftrag: AtomicU64::new(1),
        }
    }

    /// Meldet einen Fehlschlag und plant ggf. `neuaufbau` ein
    ///
    /// `neuaufbau` erhaelt die Auftrags-ID und sollte vor dem Anlegen der
    /// neuen Sitzung [`auftrag_gueltig`](Self::auftrag_gueltig) pruefen.
    pub fn fehlgeschlagen<F, Fut>(&self, remote: UserId, neuaufbau: F) -> Entscheidung
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut zustand = self.zustaende.entry(remote).or_default();

        // Nur ein noch wartender Auftrag deckt den Fehlschlag ab; die Sitzung
        // eines bereits ausgefuehrten Auftrags darf selbst wieder scheitern
        if zustand.auftrag.as_ref().is_some_and(Auftrag::wartet) {
            return Entscheidung::BereitsGeplant;
        }
        if zustand.versuche >= self.max_retries {
            let erstmals = !zustand.erschoepft;
            zustand.erschoepft = true;
            zustand.auftrag = None;
            if erstmals {
                tracing::warn!(
                    remote = %remote,
                    versuche = zustand.versuche,
                    "Retry-Budget erschoepft, Teilnehmer bleibt getrennt"
                );
            }
            return Entscheidung::Erschoepft { erstmals };
        }

        let verzoegerung = backoff(self.basis, zustand.versuche);
        zustand.versuche += 1;
        let versuch = zustand.versuche;
        let id = self.naechster_auftrag.fetch_add(1, Ordering::Relaxed);

        // Der Eintrag bleibt gesperrt bis der Handle gespeichert ist
        let faellig = Arc::new(AtomicBool::new(false));
        let markierung = Arc::clone(&faellig);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(verzoegerung).await;
            markierung.store(true, Ordering::Release);
            neuaufbau(id).await;
        });
        zustand.auftrag = Some(Auftrag {
            id,
            handle,
            faellig,
        });

        tracing::info!(
            remote = %remote,
            versuch,
            verzoegerung_ms = verzoegerung.as_millis() as u64,
            "Neuaufbau geplant"
        );
        Entscheidung::NeuaufbauGeplant {
            versuch,
            verzoegerung,
            auftrag: id,
        }
    }

    /// Prueft ob der Auftrag `auftrag` fuer `remote` noch ausgefuehrt werden darf
    pub fn auftrag_gueltig(&self, remote: &UserId, auftrag: u64) -> bool {
        self.zustaende
            .get(remote)
            .is_some_and(|z| z.auftrag.as_ref().is_some_and(|a| a.id == auftrag))
    }

    /// Verbindung steht: Zaehler zuruecksetzen, geplanten Neuaufbau verwerfen
    pub fn verbunden(&self, remote: &UserId) {
        if let Some(mut zustand) = self.zustaende.get_mut(remote) {
            if zustand.versuche > 0 {
                tracing::debug!(remote = %remote, versuche = zustand.versuche, "Retry-Zaehler zurueckgesetzt");
            }
            zustand.versuche = 0;
            zustand.erschoepft = false;
            // Ein laufender Neuaufbau hat seine Sitzung bereits angelegt
            zustand.auftrag = None;
        }
    }

    /// Bricht einen geplanten Neuaufbau ab, Zaehler bleiben erhalten
    pub fn geplant_abbrechen(&self, remote: &UserId) {
        if let Some(mut zustand) = self.zustaende.get_mut(remote) {
            if let Some(auftrag) = zustand.auftrag.take() {
                auftrag.handle.abort();
                tracing::debug!(remote = %remote, auftrag = auftrag.id, "Geplanter Neuaufbau abgebrochen");
            }
        }
    }

    /// Vergisst den Teilnehmer komplett (Auflegen, Roster-Austritt)
    pub fn entfernen(&self, remote: &UserId) {
        if let Some((_, zustand)) = self.zustaende.remove(remote) {
            if let Some(auftrag) = zustand.auftrag {
                auftrag.handle.abort();
            }
        }
    }

    /// Bricht alle Auftraege ab und vergisst alle Teilnehmer (Raum verlassen)
    pub fn alle_abbrechen(&self) {
        self.zustaende.retain(|_, zustand| {
            if let Some(auftrag) = zustand.auftrag.take() {
                auftrag.handle.abort();
            }
            false
        });
    }

    pub fn versuche(&self, remote: &UserId) -> u32 {
        self.zustaende.get(remote).map_or(0, |z| z.versuche)
    }

    pub fn ist_erschoepft(&self, remote: &UserId) -> bool {
        self.zustaende.get(remote).is_some_and(|z| z.erschoepft)
    }

    pub fn hat_geplant(&self, remote: &UserId) -> bool {
        self.zustaende
            .get(remote)
            .is_some_and(|z| z.auftrag.as_ref().is_some_and(Auftrag::wartet))
    }
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::neu(MAX_RETRIES, BASIS_VERZOEGERUNG)
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.alle_abbrechen();
    }
}
