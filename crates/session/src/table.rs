//! Sitzungstabelle – hoechstens eine lebende Sitzung pro Remote-Teilnehmer
//!
//! Einfuegen laeuft ueber die Entry-API von DashMap, damit zwei
//! gleichzeitige Aufrufer fuer denselben Teilnehmer nie zwei Verbindungen
//! erzeugen.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use intercom_core::types::UserId;
use std::sync::Arc;

use crate::session::PeerSession;

/// Ergebnis von [`SessionTable::holen_oder_einfuegen`]
#[derive(Debug)]
pub enum Einfuegen {
    /// Es gab bereits eine lebende Sitzung
    Vorhanden(Arc<PeerSession>),
    /// Die Sitzung wurde neu angelegt
    Neu(Arc<PeerSession>),
}

impl Einfuegen {
    pub fn sitzung(&self) -> &Arc<PeerSession> {
        match self {
            Self::Vorhanden(s) | Self::Neu(s) => s,
        }
    }
}

/// Alle Sitzungen dieses Teilnehmers, indiziert nach Remote-UserId
#[derive(Default)]
pub struct SessionTable {
    sitzungen: DashMap<UserId, Arc<PeerSession>>,
}

impl SessionTable {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Lebende Sitzung zu `remote`
    pub fn holen(&self, remote: &UserId) -> Option<Arc<PeerSession>> {
        self.sitzungen
            .get(remote)
            .map(|s| Arc::clone(s.value()))
            .filter(|s| !s.ist_geschlossen())
    }

    /// Gibt die lebende Sitzung zurueck oder legt sie mit `erstellen` an
    ///
    /// Eine geschlossene Sitzung, die noch in der Tabelle steht, wird
    /// ersetzt. `erstellen` laeuft unter dem Shard-Lock und darf die
    /// Tabelle nicht anfassen.
    pub fn holen_oder_einfuegen<E>(
        &self,
        remote: UserId,
        erstellen: impl FnOnce() -> Result<Arc<PeerSession>, E>,
    ) -> Result<Einfuegen, E> {
        match self.sitzungen.entry(remote) {
            Entry::Occupied(e) if !e.get().ist_geschlossen() => {
                Ok(Einfuegen::Vorhanden(Arc::clone(e.get())))
            }
            Entry::Occupied(mut e) => {
                let sitzung = erstellen()?;
                e.insert(Arc::clone(&sitzung));
                Ok(Einfuegen::Neu(sitzung))
            }
            Entry::Vacant(e) => {
                let sitzung = erstellen()?;
                e.insert(Arc::clone(&sitzung));
                Ok(Einfuegen::Neu(sitzung))
            }
        }
    }

    /// Entfernt die Sitzung, aber nur wenn sie noch die Generation `generation` hat
    pub fn entfernen(&self, remote: &UserId, generation: u64) -> Option<Arc<PeerSession>> {
        self.sitzungen
            .remove_if(remote, |_, s| s.generation() == generation)
            .map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sitzungen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sitzungen.is_empty()
    }

    /// Momentaufnahme aller Sitzungen
    pub fn alle(&self) -> Vec<Arc<PeerSession>> {
        self.sitzungen.iter().map(|e| Arc::clone(e.value())).collect()
    }
}
