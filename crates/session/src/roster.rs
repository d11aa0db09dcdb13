//! Roster-Tracker – wer ist in der Produktion anwesend?
//!
//! Das Relay schickt bei jeder Aenderung den kompletten Roster
//! (`presence.update`). Der Tracker haelt den letzten Stand und berechnet
//! daraus, wer hinzugekommen und wer gegangen ist.

use intercom_core::rollen::HostRollen;
use intercom_core::types::UserId;
use intercom_protocol::RosterEntry;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Aenderung zwischen zwei Roster-Staenden
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    /// Neu anwesend oder mit geaenderter Rolle
    pub hinzugefuegt: Vec<RosterEntry>,
    /// Nicht mehr anwesend
    pub entfernt: Vec<UserId>,
    /// Der Roster fuehrt den lokalen Teilnehmer jetzt mit anderem Host-Flag
    pub eigener_host_geaendert: bool,
}

impl RosterDiff {
    pub fn ist_leer(&self) -> bool {
        self.hinzugefuegt.is_empty() && self.entfernt.is_empty() && !self.eigener_host_geaendert
    }
}

/// Letzter bekannter Roster
///
/// Die Remote-Teilnehmer und die eigene Rolle werden getrennt gefuehrt.
/// Beide Host-Flags einer Sitzung kommen so aus derselben Quelle: dem
/// Rollennamen, wie ihn auch die Gegenseite im Roster sieht.
pub struct RosterTracker {
    rollen: HostRollen,
    /// Rollenname aus der `LocalIdentity`, gilt bis der Roster uns fuehrt
    eigene_rolle_lokal: String,
    /// UserId -> Rollenname (ohne den lokalen Teilnehmer)
    teilnehmer: Mutex<HashMap<UserId, String>>,
    /// Eigene Rolle laut letztem Roster
    eigene_rolle: Mutex<Option<String>>,
}

impl RosterTracker {
    pub fn neu(rollen: HostRollen, eigene_rolle: impl Into<String>) -> Self {
        Self {
            rollen,
            eigene_rolle_lokal: eigene_rolle.into(),
            teilnehmer: Mutex::new(HashMap::new()),
            eigene_rolle: Mutex::new(None),
        }
    }

    /// Uebernimmt einen vollstaendigen Roster und gibt die Aenderung zurueck
    pub fn aktualisieren(&self, roster: &[RosterEntry], ich: &UserId) -> RosterDiff {
        let neu: HashMap<UserId, String> = roster
            .iter()
            .filter(|e| e.user_id != *ich)
            .map(|e| (e.user_id, e.role_name.clone()))
            .collect();

        let eigener_host_vorher = self.ich_host();
        if let Some(eintrag) = roster.iter().find(|e| e.user_id == *ich) {
            *self.eigene_rolle.lock() = Some(eintrag.role_name.clone());
        }

        let mut teilnehmer = self.teilnehmer.lock();
        let mut diff = RosterDiff {
            eigener_host_geaendert: self.ich_host() != eigener_host_vorher,
            ..RosterDiff::default()
        };

        for (user_id, rolle) in &neu {
            if teilnehmer.get(user_id) != Some(rolle) {
                diff.hinzugefuegt.push(RosterEntry::neu(*user_id, rolle.clone()));
            }
        }
        for user_id in teilnehmer.keys() {
            if !neu.contains_key(user_id) {
                diff.entfernt.push(*user_id);
            }
        }
        *teilnehmer = neu;

        if !diff.ist_leer() {
            tracing::debug!(
                hinzugefuegt = diff.hinzugefuegt.len(),
                entfernt = diff.entfernt.len(),
                eigener_host_geaendert = diff.eigener_host_geaendert,
                anwesend = teilnehmer.len(),
                "Roster aktualisiert"
            );
        }
        diff
    }

    pub fn anwesend(&self, user_id: &UserId) -> bool {
        self.teilnehmer.lock().contains_key(user_id)
    }

    pub fn rolle(&self, user_id: &UserId) -> Option<String> {
        self.teilnehmer.lock().get(user_id).cloned()
    }

    /// Unbekannte Teilnehmer gelten als Gast
    pub fn ist_host(&self, user_id: &UserId) -> bool {
        self.teilnehmer
            .lock()
            .get(user_id)
            .is_some_and(|rolle| self.rollen.ist_host(rolle))
    }

    /// Host-Flag des lokalen Teilnehmers
    pub fn ich_host(&self) -> bool {
        match self.eigene_rolle.lock().as_deref() {
            Some(rolle) => self.rollen.ist_host(rolle),
            None => self.rollen.ist_host(&self.eigene_rolle_lokal),
        }
    }

    pub fn host_rollen(&self) -> &HostRollen {
        &self.rollen
    }

    pub fn alle(&self) -> Vec<RosterEntry> {
        self.teilnehmer
            .lock()
            .iter()
            .map(|(id, rolle)| RosterEntry::neu(*id, rolle.clone()))
            .collect()
    }

    pub fn leeren(&self) {
        self.teilnehmer.lock().clear();
        *self.eigene_rolle.lock() = None;
    }
}
