//! Host-Erkennung anhand des Rollennamens
//!
//! Ein Teilnehmer gilt als Host der Produktion, wenn sein Rollenname einen
//! der konfigurierten Host-Rollennamen enthaelt (Gross-/Kleinschreibung
//! egal). "Senior Operator" ist damit Host, "Guest" nicht.

use serde::{Deserialize, Serialize};

/// Standard-Rollennamen, die als Host gelten
pub const STANDARD_HOST_ROLLEN: [&str; 2] = ["admin", "operator"];

/// Menge der Rollennamen, die einen Host kennzeichnen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct HostRollen {
    namen: Vec<String>,
}

impl HostRollen {
    pub fn neu<I, S>(namen: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namen: namen
                .into_iter()
                .map(|n| n.into().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Prueft ob ein Rollenname als Host gilt
    pub fn ist_host(&self, role_name: &str) -> bool {
        let rolle = role_name.to_lowercase();
        self.namen.iter().any(|n| rolle.contains(n.as_str()))
    }
}

impl From<Vec<String>> for HostRollen {
    fn from(namen: Vec<String>) -> Self {
        Self::neu(namen)
    }
}

impl From<HostRollen> for Vec<String> {
    fn from(rollen: HostRollen) -> Self {
        rollen.namen
    }
}

impl Default for HostRollen {
    fn default() -> Self {
        Self::neu(STANDARD_HOST_ROLLEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teilstring_ohne_gross_klein() {
        let rollen = HostRollen::default();
        assert!(rollen.ist_host("Operator"));
        assert!(rollen.ist_host("Senior OPERATOR"));
        assert!(rollen.ist_host("admin"));
        assert!(!rollen.ist_host("Guest"));
        assert!(!rollen.ist_host(""));
    }

    #[test]
    fn leere_namen_matchen_nichts() {
        let rollen = HostRollen::neu(["", "Regie"]);
        assert!(!rollen.ist_host("Guest"));
        assert!(rollen.ist_host("Regieplatz"));
    }

    #[test]
    fn deserialisierung_normalisiert() {
        let rollen: HostRollen = serde_json::from_str(r#"["Regie", ""]"#).unwrap();
        assert_eq!(rollen, HostRollen::neu(["regie"]));
        assert!(rollen.ist_host("BILDREGIE"));
    }
}
