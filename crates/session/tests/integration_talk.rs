//! Integration-Tests fuer Push-to-Talk, Talk-Events und Pegel-Telemetrie

mod common;

use common::{verbundenes_paar, TestRaum};
use intercom_audio::{Adressierung, PttMode};
use intercom_protocol::RelayMessage;
use intercom_session::{ConnectionState, SessionError};
use std::time::Duration;

fn talk_events(gesendet: &[RelayMessage]) -> Vec<bool> {
    gesendet
        .iter()
        .filter_map(|m| match m {
            RelayMessage::Talk(event) => Some(event.is_talking),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn sprechen_schaltet_nur_das_gate() {
    let (mut raum, host, gast) = verbundenes_paar().await;
    let g = raum.id(gast);
    let offers_vorher = raum.teilnehmer[host].offers_an(&g);
    let track = raum.teilnehmer[host].fabrik.letzter(&g).tracks()[0].clone();
    assert!(!track.is_enabled(), "Mikrofon startet stumm");

    let manager = raum.teilnehmer[host].manager.clone();
    manager.sprechen_starten(None).expect("start");
    assert!(track.is_enabled());
    assert!(manager.spricht());
    raum.pumpen().await;

    manager.sprechen_stoppen().expect("stopp");
    assert!(!track.is_enabled());
    raum.pumpen().await;

    manager.sprechen_starten(None).expect("start");
    raum.pumpen().await;

    let t = &raum.teilnehmer[host];
    assert_eq!(t.offers_an(&g), offers_vorher, "keine Neuverhandlung");
    assert_eq!(t.fabrik.anzahl_fuer(&g), 1);
    assert_eq!(t.zustand_zu(&g), Some(ConnectionState::Connected));
    assert_eq!(talk_events(&t.gesendet), vec![true, false, true]);
}

#[tokio::test]
async fn sprechen_vor_beitritt_schlaegt_fehl() {
    let mut raum = TestRaum::neu();
    let host = raum.hinzufuegen("Operator");
    assert!(matches!(
        raum.teilnehmer[host].manager.sprechen_starten(None),
        Err(SessionError::NichtBeigetreten)
    ));
}

#[tokio::test]
async fn stummschalten_beendet_das_senden() {
    let (mut raum, host, gast) = verbundenes_paar().await;
    let g = raum.id(gast);
    let track = raum.teilnehmer[host].fabrik.letzter(&g).tracks()[0].clone();
    let manager = raum.teilnehmer[host].manager.clone();

    manager.sprechen_starten(None).expect("start");
    manager.stumm_setzen(true).expect("stumm");
    assert!(!manager.spricht());
    assert!(!track.is_enabled());

    // Druecken waehrend stumm bleibt wirkungslos
    manager.sprechen_starten(None).expect("start");
    assert!(!track.is_enabled());
    raum.pumpen().await;
    assert_eq!(talk_events(&raum.teilnehmer[host].gesendet), vec![true, false]);
}

#[tokio::test]
async fn toggle_modus_ignoriert_loslassen() {
    let (raum, host, _gast) = verbundenes_paar().await;
    let manager = &raum.teilnehmer[host].manager;

    manager.ptt_modus_setzen(PttMode::Toggle).expect("modus");
    manager.sprechen_starten(None).expect("druecken");
    manager.sprechen_loslassen().expect("loslassen");
    assert!(manager.spricht());

    manager.sprechen_starten(None).expect("erneut druecken");
    assert!(!manager.spricht());
}

#[tokio::test]
async fn whisper_wird_beim_empfaenger_eingeordnet() {
    let (mut raum, host, gast) = verbundenes_paar().await;
    let (h, g) = (raum.id(host), raum.id(gast));
    let sprecher_host = raum.teilnehmer[host].manager.sprecher_abonnieren();
    let sprecher_gast = raum.teilnehmer[gast].manager.sprecher_abonnieren();

    // Gast fluestert dem Host zu
    raum.teilnehmer[gast]
        .manager
        .sprechen_starten(Some(h))
        .expect("whisper");
    raum.pumpen().await;
    {
        let map = sprecher_host.borrow();
        let sprecher = map.get(&g).expect("Gast spricht");
        assert_eq!(sprecher.ziel, Some(h));
        assert_eq!(sprecher.einordnung.adressierung, Adressierung::AnMich);
        assert!(!sprecher.einordnung.von_host);
    }

    // Host spricht an alle
    raum.teilnehmer[host]
        .manager
        .sprechen_starten(None)
        .expect("durchsage");
    raum.pumpen().await;
    {
        let map = sprecher_gast.borrow();
        let sprecher = map.get(&h).expect("Host spricht");
        assert_eq!(sprecher.rolle, "Operator");
        assert_eq!(sprecher.einordnung.adressierung, Adressierung::Alle);
        assert!(sprecher.einordnung.von_host);
    }

    raum.teilnehmer[gast]
        .manager
        .sprechen_stoppen()
        .expect("stopp");
    raum.pumpen().await;
    assert!(!sprecher_host.borrow().contains_key(&g));
}

#[tokio::test(start_paused = true)]
async fn pegel_werden_gedrosselt_verschickt() {
    let (mut raum, host, gast) = verbundenes_paar().await;
    let h = raum.id(host);
    let pegel_gast = raum.teilnehmer[gast].manager.pegel_abonnieren();

    // Ohne Sprechen keine Telemetrie
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        raum.pumpen().await;
    }
    assert_eq!(raum.teilnehmer[host].pegel_gesendet(), 0);

    raum.teilnehmer[host]
        .manager
        .sprechen_starten(None)
        .expect("start");
    for _ in 0..19 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        raum.pumpen().await;
    }

    let gesendet = raum.teilnehmer[host].pegel_gesendet();
    assert!(gesendet >= 1, "mindestens ein Pegel");
    assert!(gesendet <= 10, "hoechstens zehn Pegel pro Sekunde, waren {gesendet}");

    let pegel = *pegel_gast.borrow().get(&h).expect("Pegel des Hosts");
    assert!((pegel - 128.0 / 255.0).abs() < 0.01);

    let lokal = raum.teilnehmer[host]
        .manager
        .lokaler_pegel()
        .expect("Pegel-Schleife laeuft");
    assert!(*lokal.borrow() > 0.4);

    // Stopp raeumt den Pegel beim Empfaenger ab
    raum.teilnehmer[host]
        .manager
        .sprechen_stoppen()
        .expect("stopp");
    raum.pumpen().await;
    assert!(!pegel_gast.borrow().contains_key(&h));
}

#[tokio::test]
async fn verlassen_meldet_sprechende_ab() {
    let (mut raum, host, gast) = verbundenes_paar().await;
    let h = raum.id(host);
    let sprecher_gast = raum.teilnehmer[gast].manager.sprecher_abonnieren();

    raum.teilnehmer[host]
        .manager
        .sprechen_starten(None)
        .expect("start");
    raum.pumpen().await;
    assert!(sprecher_gast.borrow().contains_key(&h));

    raum.teilnehmer[host].manager.verlassen();
    raum.pumpen().await;
    assert!(!sprecher_gast.borrow().contains_key(&h));
    assert_eq!(talk_events(&raum.teilnehmer[host].gesendet), vec![true, false]);
}
