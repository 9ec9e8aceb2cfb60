//! voicebridge-audio – Relay-Engine
//!
//! Bidirektionales Echtzeit-Audio-Relay zwischen lokalem Audiogeraet
//! und paketiertem Voice-Transport:
//! - Capture-Relay: Geraete-Callback -> Queue -> Opus-Encode -> Transport
//! - Playback-Relay: Transport -> Opus-Decode -> Transform -> Queue -> Geraete-Callback
//! - Frame-Transform: Kanal-Duplikation + Spitzenwert-Kompressor
//! - Shutdown-Signal mit Gnadenfrist
//!
//! Die beiden Relays teilen keinerlei Zustand ausser dem
//! Shutdown-Signal; sie werden pro Session zusammen erstellt und
//! abgebaut.

pub mod capture;
pub mod codec;
pub mod device;
pub mod error;
pub mod playback;
pub mod queue;
pub mod shutdown;
pub mod transform;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{CaptureConfig, CaptureRelay, PaketSender};
pub use codec::{OpusDecoder, OpusEncoder, MAX_PAKET_BYTES};
pub use error::{AudioError, AudioResult};
pub use playback::{PaketEmpfaenger, PlaybackConfig, PlaybackRelay};
pub use queue::{begrenzte_queue, QueueConsumer, QueueProducer};
pub use shutdown::{shutdown_paar, warte_mit_frist, RelayZustand, ShutdownAusloeser, ShutdownSignal};
