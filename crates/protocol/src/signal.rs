//! Signaling-Nachrichten (Offer/Answer/ICE)
//!
//! Die Wire-Einheit ist der [`SignalEnvelope`]. Er wird adressiert zwischen
//! genau zwei Teilnehmern verschickt und traegt einen `context`, weil sich
//! mehrere Signaling-Konsumenten denselben Relay-Kanal teilen koennen.

use intercom_core::types::UserId;
use serde::{Deserialize, Serialize};

/// Context-Wert, den der Intercom fuer seine Signale verwendet
pub const INTERCOM_CONTEXT: &str = "intercom";

// ---------------------------------------------------------------------------
// Session-Description
// ---------------------------------------------------------------------------

/// Typ einer Session-Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpTyp {
    Offer,
    Answer,
}

/// Lokale oder entfernte Medien-Aushandlungsbeschreibung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub typ: SdpTyp,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            typ: SdpTyp::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            typ: SdpTyp::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn ist_offer(&self) -> bool {
        self.typ == SdpTyp::Offer
    }
}

/// Ein ICE-Kandidat (vorgeschlagener Netzwerkpfad)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn neu(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Nutzlast eines Signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalPayload {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

/// Adressiertes Signal zwischen zwei Teilnehmern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub sender_user_id: UserId,
    pub target_user_id: UserId,
    pub payload: SignalPayload,
    pub context: String,
}

impl SignalEnvelope {
    /// Erstellt ein Intercom-Signal
    pub fn intercom(sender: UserId, ziel: UserId, payload: SignalPayload) -> Self {
        Self {
            sender_user_id: sender,
            target_user_id: ziel,
            payload,
            context: INTERCOM_CONTEXT.to_string(),
        }
    }

    /// Prueft ob das Signal fuer den Intercom bestimmt ist
    pub fn ist_intercom(&self) -> bool {
        self.context == INTERCOM_CONTEXT
    }
}
