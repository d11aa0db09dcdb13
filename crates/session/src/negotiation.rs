//! Perfect-Negotiation – Offer/Answer ohne Deadlock bei Kollision
//!
//! Beide Seiten duerfen jederzeit eine Offer erzeugen. Treffen sich zwei
//! Offers ("Glare"), setzt die impolite Seite ihre durch und verwirft die
//! eingehende; die polite Seite rollt die eigene zurueck und beantwortet
//! die fremde.
//!
//! Nach jedem `.await` wird geprueft, ob die Sitzung inzwischen geschlossen
//! wurde. Ergebnisse einer geschlossenen Sitzung werden verworfen.

use intercom_core::types::UserId;
use intercom_protocol::{
    IceCandidate, RelayMessage, RelayTransport, SessionDescription, SignalEnvelope, SignalPayload,
};
use std::sync::Arc;

use crate::error::{SessionError, SessionResult};
use crate::peer::SignalingState;
use crate::session::PeerSession;

// ---------------------------------------------------------------------------
// Ausgehende Signale
// ---------------------------------------------------------------------------

/// Verschickt adressierte Signale des lokalen Teilnehmers
#[derive(Clone)]
pub struct Signalisierung {
    relay: Arc<dyn RelayTransport>,
    ich: UserId,
    context: String,
}

impl Signalisierung {
    pub fn neu(relay: Arc<dyn RelayTransport>, ich: UserId, context: impl Into<String>) -> Self {
        Self {
            relay,
            ich,
            context: context.into(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn senden(&self, ziel: UserId, payload: SignalPayload) -> intercom_core::Result<()> {
        let mut envelope = SignalEnvelope::intercom(self.ich, ziel, payload);
        envelope.context.clone_from(&self.context);
        self.relay.senden(RelayMessage::Signal(envelope))
    }
}

// ---------------------------------------------------------------------------
// Ergebnis
// ---------------------------------------------------------------------------

/// Warum eine eingehende Beschreibung nicht angewendet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnorierGrund {
    /// Offer-Kollision, lokale Seite ist impolite
    Kollision,
    /// Answer ohne offene eigene Offer
    VeralteteAntwort,
    /// Sitzung wurde waehrend der Verarbeitung geschlossen
    Geschlossen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalErgebnis {
    Angewendet,
    Ignoriert(IgnorierGrund),
}

fn offen(sitzung: &PeerSession) -> SessionResult<()> {
    if sitzung.ist_geschlossen() {
        Err(SessionError::SitzungGeschlossen(sitzung.remote()))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Reaktion auf `negotiationneeded`: eigene Offer erzeugen und verschicken
///
/// Gibt `true` zurueck, wenn eine Offer verschickt wurde.
pub async fn negotiation_needed(
    sitzung: &PeerSession,
    signal: &Signalisierung,
) -> SessionResult<bool> {
    if sitzung.ist_geschlossen() {
        return Ok(false);
    }
    let verbindung = sitzung.verbindung();
    if verbindung.signaling_state() != SignalingState::Stable {
        tracing::debug!(
            remote = %sitzung.remote(),
            state = ?verbindung.signaling_state(),
            "Negotiation-needed ausserhalb von stable ignoriert"
        );
        return Ok(false);
    }

    let _guard = sitzung.offer_beginnen();
    let offer = verbindung.set_local_offer().await?;
    if sitzung.ist_geschlossen() {
        return Ok(false);
    }

    signal.senden(sitzung.remote(), SignalPayload::Description(offer))?;
    tracing::debug!(remote = %sitzung.remote(), "Offer verschickt");
    Ok(true)
}

/// Verarbeitet eine eingehende Offer oder Answer
pub async fn description_empfangen(
    sitzung: &PeerSession,
    description: SessionDescription,
    signal: &Signalisierung,
) -> SessionResult<SignalErgebnis> {
    if sitzung.ist_geschlossen() {
        return Ok(SignalErgebnis::Ignoriert(IgnorierGrund::Geschlossen));
    }
    let remote = sitzung.remote();
    let verbindung = sitzung.verbindung();
    let ist_offer = description.ist_offer();
    let state = verbindung.signaling_state();

    let (kollision, ignorieren) = sitzung.flags_aendern(|f| {
        let bereit = !f.making_offer
            && (state == SignalingState::Stable || f.setting_remote_answer_pending);
        let kollision = ist_offer && !bereit;
        f.ignore_offer = !sitzung.rolle().ist_polite() && kollision;
        (kollision, f.ignore_offer)
    });

    if ignorieren {
        tracing::debug!(remote = %remote, "Offer-Kollision: eingehende Offer verworfen (impolite)");
        return Ok(SignalErgebnis::Ignoriert(IgnorierGrund::Kollision));
    }
    if !ist_offer && state == SignalingState::Stable {
        tracing::debug!(remote = %remote, "Verspaetete Answer verworfen");
        return Ok(SignalErgebnis::Ignoriert(IgnorierGrund::VeralteteAntwort));
    }

    if kollision && state == SignalingState::HaveLocalOffer {
        tracing::debug!(remote = %remote, "Offer-Kollision: eigene Offer zurueckgerollt (polite)");
        verbindung.rollback().await?;
        offen(sitzung)?;
    }

    sitzung.flags_aendern(|f| f.setting_remote_answer_pending = !ist_offer);
    let ergebnis = verbindung.set_remote_description(description).await;
    sitzung.flags_aendern(|f| f.setting_remote_answer_pending = false);
    ergebnis?;
    offen(sitzung)?;

    if ist_offer {
        let answer = verbindung.set_local_answer().await?;
        offen(sitzung)?;
        signal.senden(remote, SignalPayload::Description(answer))?;
        tracing::debug!(remote = %remote, "Answer verschickt");
    }
    Ok(SignalErgebnis::Angewendet)
}

/// Wendet einen eingehenden ICE-Kandidaten an
///
/// Fehler werden nur geloggt: Kandidaten einer verworfenen Offer oder einer
/// geschlossenen Sitzung sind erwartbar.
pub async fn kandidat_empfangen(sitzung: &PeerSession, kandidat: IceCandidate) {
    if sitzung.ist_geschlossen() {
        tracing::debug!(remote = %sitzung.remote(), "Kandidat fuer geschlossene Sitzung verworfen");
        return;
    }
    if let Err(e) = sitzung.verbindung().add_ice_candidate(kandidat).await {
        if sitzung.flags().ignore_offer || sitzung.ist_geschlossen() {
            tracing::debug!(remote = %sitzung.remote(), fehler = %e, "Kandidat verworfen");
        } else {
            tracing::warn!(remote = %sitzung.remote(), fehler = %e, "Kandidat nicht anwendbar");
        }
    }
}
