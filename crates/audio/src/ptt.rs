//! Push-to-Talk Steuerung
//!
//! Unterstuetzt zwei Modi: Hold (Taste halten) und Toggle (Taste
//! umschalten). Optional richtet sich das Sprechen gezielt an einen
//! Teilnehmer (Whisper) statt an alle.

use intercom_core::types::UserId;

/// Betriebsmodus fuer Push-to-Talk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PttMode {
    /// Taste halten um zu senden – loslassen stoppt Uebertragung
    #[default]
    Hold,
    /// Einmal druecken zum Aktivieren, nochmals zum Deaktivieren
    Toggle,
}

/// Beobachtbarer Sende-Zustand nach einer Aenderung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendeZustand {
    pub spricht: bool,
    /// `None` = Durchsage an alle
    pub ziel: Option<UserId>,
}

/// Push-to-Talk Controller
///
/// Jede Methode gibt `Some(zustand)` zurueck, wenn sich der beobachtbare
/// Sende-Zustand geaendert hat, sonst `None`. Nur dann wird ein Talk-Event
/// verschickt.
#[derive(Debug, Default)]
pub struct PttController {
    mode: PttMode,
    /// Hold-Modus: Taste aktuell gedrueckt?
    key_held: bool,
    /// Toggle-Modus: Aktuell aktiv?
    toggle_active: bool,
    /// Globales Mute (ueberschreibt alles)
    muted: bool,
    /// Whisper-Ziel der laufenden Uebertragung
    ziel: Option<UserId>,
}

impl PttController {
    pub fn new(mode: PttMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Taste gedrueckt; `ziel` setzt den Whisper-Empfaenger
    pub fn druecken(&mut self, ziel: Option<UserId>) -> Option<SendeZustand> {
        self.aendern(|ptt| {
            match ptt.mode {
                PttMode::Hold => ptt.key_held = true,
                PttMode::Toggle => ptt.toggle_active = !ptt.toggle_active,
            }
            ptt.ziel = ziel;
        })
    }

    /// Taste losgelassen (im Toggle-Modus ohne Wirkung)
    pub fn loslassen(&mut self) -> Option<SendeZustand> {
        self.aendern(|ptt| {
            if ptt.mode == PttMode::Hold {
                ptt.key_held = false;
            }
        })
    }

    /// Beendet die Uebertragung unabhaengig vom Modus
    pub fn stoppen(&mut self) -> Option<SendeZustand> {
        self.aendern(|ptt| {
            ptt.key_held = false;
            ptt.toggle_active = false;
        })
    }

    /// Modus wechseln – setzt alle Zustaende zurueck
    pub fn set_mode(&mut self, mode: PttMode) -> Option<SendeZustand> {
        self.aendern(|ptt| {
            ptt.mode = mode;
            ptt.key_held = false;
            ptt.toggle_active = false;
        })
    }

    /// Globales Mute setzen
    pub fn set_muted(&mut self, muted: bool) -> Option<SendeZustand> {
        self.aendern(|ptt| ptt.muted = muted)
    }

    /// Gibt zurueck ob aktuell gesendet wird
    pub fn is_transmitting(&self) -> bool {
        if self.muted {
            return false;
        }
        match self.mode {
            PttMode::Hold => self.key_held,
            PttMode::Toggle => self.toggle_active,
        }
    }

    pub fn zustand(&self) -> SendeZustand {
        let spricht = self.is_transmitting();
        SendeZustand {
            spricht,
            ziel: if spricht { self.ziel } else { None },
        }
    }

    pub fn mode(&self) -> PttMode {
        self.mode
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn aendern(&mut self, f: impl FnOnce(&mut Self)) -> Option<SendeZustand> {
        let vorher = self.zustand();
        f(self);
        let nachher = self.zustand();
        (vorher != nachher).then_some(nachher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptt_hold_sendet_nur_waehrend_taste_gedrueckt() {
        let mut ptt = PttController::new(PttMode::Hold);
        assert!(!ptt.is_transmitting());
        assert!(ptt.druecken(None).is_some());
        assert!(ptt.is_transmitting());
        assert!(ptt.loslassen().is_some());
        assert!(!ptt.is_transmitting());
    }

    #[test]
    fn ptt_toggle_wechselt_zustand() {
        let mut ptt = PttController::new(PttMode::Toggle);
        ptt.druecken(None);
        assert!(ptt.is_transmitting());
        assert!(ptt.loslassen().is_none(), "Loslassen ist im Toggle-Modus egal");
        ptt.druecken(None);
        assert!(!ptt.is_transmitting());
    }

    #[test]
    fn ptt_doppeltes_druecken_meldet_keinen_wechsel() {
        let mut ptt = PttController::new(PttMode::Hold);
        assert!(ptt.druecken(None).is_some());
        assert!(ptt.druecken(None).is_none());
    }

    #[test]
    fn ptt_whisper_ziel_wird_gemeldet() {
        let mut ptt = PttController::new(PttMode::Hold);
        let ziel = UserId::new();
        let zustand = ptt.druecken(Some(ziel)).unwrap();
        assert!(zustand.spricht);
        assert_eq!(zustand.ziel, Some(ziel));

        let zustand = ptt.loslassen().unwrap();
        assert_eq!(zustand.ziel, None);
    }

    #[test]
    fn ptt_zielwechsel_ist_ein_wechsel() {
        let mut ptt = PttController::new(PttMode::Hold);
        ptt.druecken(None);
        let zustand = ptt.druecken(Some(UserId::new())).unwrap();
        assert!(zustand.spricht && zustand.ziel.is_some());
    }

    #[test]
    fn ptt_mute_verhindert_sendung() {
        let mut ptt = PttController::new(PttMode::Hold);
        ptt.druecken(None);
        let zustand = ptt.set_muted(true).unwrap();
        assert!(!zustand.spricht, "Mute sollte Sendung verhindern");
        assert!(ptt.set_muted(false).unwrap().spricht);
    }

    #[test]
    fn ptt_modus_wechsel_setzt_zustand_zurueck() {
        let mut ptt = PttController::new(PttMode::Hold);
        ptt.druecken(None);
        ptt.set_mode(PttMode::Toggle);
        assert!(
            !ptt.is_transmitting(),
            "Nach Moduswechsel sollte nichts aktiv sein"
        );
        assert!(!ptt.key_held);
    }

    #[test]
    fn ptt_stoppen_beendet_toggle() {
        let mut ptt = PttController::new(PttMode::Toggle);
        ptt.druecken(None);
        assert!(ptt.stoppen().is_some());
        assert!(!ptt.is_transmitting());
    }

    #[test]
    fn ptt_default_modus_hold() {
        assert_eq!(PttController::new(PttMode::default()).mode(), PttMode::Hold);
    }
}
