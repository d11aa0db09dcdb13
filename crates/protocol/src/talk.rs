//! Push-to-Talk-Zustand und Pegel-Telemetrie

use intercom_core::types::UserId;
use serde::{Deserialize, Serialize};

/// Sprech-Zustand eines Teilnehmers
///
/// Fehlt `target_user_id`, ist es eine Durchsage an alle. Ist sie gesetzt,
/// spricht der Sender gezielt (Whisper) mit diesem Teilnehmer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalkEvent {
    pub sender_user_id: UserId,
    pub is_talking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    pub sender_role_name: String,
}

impl TalkEvent {
    /// Durchsage an alle
    pub fn ist_durchsage(&self) -> bool {
        self.target_user_id.is_none()
    }

    /// Gezielt an `ich` adressiert
    pub fn ist_an(&self, ich: &UserId) -> bool {
        self.target_user_id.as_ref() == Some(ich)
    }
}

/// Gedrosselter Pegel-Messwert (0.0–1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioLevelSample {
    pub sender_user_id: UserId,
    pub level: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durchsage_ohne_ziel() {
        let ich = UserId::new();
        let ev = TalkEvent {
            sender_user_id: UserId::new(),
            is_talking: true,
            target_user_id: None,
            sender_role_name: "Operator".into(),
        };
        assert!(ev.ist_durchsage());
        assert!(!ev.ist_an(&ich));

        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("targetUserId").is_none());
    }

    #[test]
    fn whisper_an_mich() {
        let ich = UserId::new();
        let ev = TalkEvent {
            sender_user_id: UserId::new(),
            is_talking: true,
            target_user_id: Some(ich),
            sender_role_name: "Operator".into(),
        };
        assert!(!ev.ist_durchsage());
        assert!(ev.ist_an(&ich));
    }
}
