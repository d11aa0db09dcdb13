//! intercom-audio – Lokales Mikrofon und Talk-State
//!
//! - Ein geteilter Mikrofon-Stream pro Prozess, lazy und memoisiert
//! - Push-to-Talk (Hold, Toggle, Whisper-Ziel) als `enabled`-Gate
//! - Pegel-Schleife mit gedrosselter Telemetrie
//! - Empfangsseitige Sprecher-Anzeige (single writer, `watch`-Abos)

pub mod anzeige;
pub mod broadcaster;
pub mod capture;
pub mod error;
pub mod level;
pub mod ptt;

// Bequeme Re-Exporte der wichtigsten Typen
pub use anzeige::{
    einordnen, Adressierung, Einordnung, PegelMap, RemoteSprecher, SprecherAnzeige, SprecherMap,
};
pub use broadcaster::{TalkBroadcaster, PEGEL_DROSSEL, RAUSCHSCHWELLE};
pub use capture::{CaptureManager, LevelAnalyser, LocalAudioTrack, MicrophoneSource, MicrophoneStream};
pub use error::{CaptureError, CaptureResult};
pub use level::{pegel_berechnen, PegelSchleife, FRAME_INTERVALL};
pub use ptt::{PttController, PttMode, SendeZustand};
