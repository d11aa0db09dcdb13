//! Warm-Start – Stern-Topologie um den Host
//!
//! Sobald der Roster bekannt ist, baut jeder Teilnehmer Sitzungen auf,
//! ohne dass jemand spricht:
//! - ein Host zu allen anderen Anwesenden (auch zu weiteren Hosts)
//! - ein Gast nur zu Hosts, nie zu anderen Gaesten
//!
//! Dass Host und Gast dabei gleichzeitig initiieren, ist gewollt; die
//! Sitzungstabelle und die Perfect-Negotiation loesen das auf.

use intercom_core::rollen::HostRollen;
use intercom_core::types::UserId;
use intercom_protocol::RosterEntry;

/// Bestimmt zu wem der lokale Teilnehmer nach einer Roster-Aenderung
/// eine Sitzung sicherstellen soll
///
/// Ohne Host im Raum oeffnet ein Gast nichts und wartet.
pub fn ziele_bestimmen(
    ich: &UserId,
    ich_host: bool,
    hinzugefuegt: &[RosterEntry],
    rollen: &HostRollen,
) -> Vec<UserId> {
    hinzugefuegt
        .iter()
        .filter(|e| e.user_id != *ich)
        .filter(|e| ich_host || rollen.ist_host(&e.role_name))
        .map(|e| e.user_id)
        .collect()
}
