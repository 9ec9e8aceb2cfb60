//! Capture-Relay – Mikrofon zu Transport
//!
//! Der cpal-Callback macht nichts ausser Kopieren und try-push in die
//! begrenzte Queue (volle Queue: Frame verwerfen, weiterlaufen – der
//! Geraete-Thread blockiert nie). Ein Worker-Thread holt Frames aus
//! der Queue, kodiert sie mit Opus und reicht die Pakete mit kurzem
//! Timeout an den Transport weiter; beim Timeout wird das Paket
//! verworfen, nie wiederholt.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::SendTimeoutError;
use tracing::{debug, error, trace, warn};

use crate::codec::OpusEncoder;
use crate::error::{AudioError, AudioResult};
use crate::queue::{begrenzte_queue, QueueConsumer, QueueProducer};
use crate::shutdown::{RelayZustand, ShutdownSignal};

/// Ausgehender Transport-Pfad – verlangt den try-send-mit-Timeout-Kontrakt
pub type PaketSender = crossbeam_channel::Sender<Bytes>;

/// Konfiguration des Capture-Relays
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl des Eingabegeraets
    pub kanaele: u16,
    /// Frames pro Geraete-Zyklus (960 bei 48kHz = 20ms)
    pub frames_pro_puffer: u32,
    /// Kapazitaet der Frame-Queue
    pub queue_kapazitaet: usize,
    /// Opus-Bitrate in kbps
    pub bitrate_kbps: u16,
    /// Timeout fuer die Uebergabe an den Transport
    pub sende_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            kanaele: 2,
            frames_pro_puffer: 960,
            queue_kapazitaet: 80,
            bitrate_kbps: 96,
            sende_timeout: Duration::from_millis(50),
        }
    }
}

/// Capture-Relay
///
/// Besitzt die Frame-Queue, den cpal-Stream und den Kodier-Worker.
/// Wird das Relay gedroppt, stoppt die Aufnahme und der Worker wird
/// eingesammelt.
pub struct CaptureRelay {
    stream: Option<Stream>,
    worker: Option<JoinHandle<()>>,
    zustand: RelayZustand,
    config: CaptureConfig,
}

impl CaptureRelay {
    /// Startet das Relay auf dem gegebenen Eingabegeraet.
    ///
    /// Fehler beim Oeffnen des Geraets oder beim Erstellen des Encoders
    /// sind fatal und werden zurueckgegeben; es entsteht dann kein
    /// Worker (`Startet -> Gestoppt`).
    pub fn starten(
        geraet: &Device,
        transport: PaketSender,
        signal: ShutdownSignal,
        config: CaptureConfig,
    ) -> AudioResult<Self> {
        debug!(
            zustand = ?RelayZustand::Startet,
            sample_rate = config.sample_rate,
            kanaele = config.kanaele,
            queue = config.queue_kapazitaet,
            "Capture-Relay startet"
        );

        let encoder = OpusEncoder::neu(
            config.sample_rate,
            config.kanaele,
            config.frames_pro_puffer,
            config.bitrate_kbps,
        )?;

        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(config.queue_kapazitaet);

        let stream = eingabe_stream_bauen(geraet, &config, queue_tx)?;
        stream
            .play()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        let sende_timeout = config.sende_timeout;
        let worker = thread::Builder::new()
            .name("capture-relay".into())
            .spawn(move || {
                kodier_schleife(queue_rx, signal, encoder, transport, sende_timeout);
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        debug!("Capture-Relay laeuft");

        Ok(Self {
            stream: Some(stream),
            worker: Some(worker),
            zustand: RelayZustand::Laeuft,
            config,
        })
    }

    /// Stoppt das Relay. Idempotent, blockiert nicht.
    ///
    /// Der Stream wird gedroppt; damit endet der Geraete-Callback und
    /// die Queue schliesst. Der Worker laeuft natuerlich leer und
    /// beendet sich – auf ihn wartet der Aufrufer ueber
    /// [`worker_uebernehmen`](Self::worker_uebernehmen) bzw. der Drop.
    pub fn stoppen(&mut self) -> AudioResult<()> {
        if self.zustand == RelayZustand::Gestoppt {
            return Ok(());
        }
        self.zustand = RelayZustand::Stoppt;
        debug!("Capture-Relay stoppt");
        self.stream.take();
        self.zustand = RelayZustand::Gestoppt;
        Ok(())
    }

    /// Uebergibt den Worker-Thread an den Aufrufer (fuer die
    /// Frist-Wartung der Session). Danach wartet der Drop nicht mehr.
    pub fn worker_uebernehmen(&mut self) -> Option<JoinHandle<()>> {
        self.worker.take()
    }

    /// Aktueller Relay-Zustand
    pub fn zustand(&self) -> RelayZustand {
        self.zustand
    }

    /// Gibt die Konfiguration des Relays zurueck
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl Drop for CaptureRelay {
    fn drop(&mut self) {
        let _ = self.stoppen();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Baut den cpal-Eingabestream mit dem nicht-blockierenden Callback
fn eingabe_stream_bauen(
    geraet: &Device,
    config: &CaptureConfig,
    queue: QueueProducer<Vec<f32>>,
) -> AudioResult<Stream> {
    let stream_config = StreamConfig {
        channels: config.kanaele,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frames_pro_puffer),
    };

    let err_fn = |err| error!("Capture-Fehler: {}", err);

    let unterstuetzt = geraet
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
                && c.channels() >= config.kanaele
        });

    let sample_format = unterstuetzt
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let stream = match sample_format {
        SampleFormat::F32 => geraet
            .build_input_stream(
                &stream_config,
                move |daten: &[f32], _| {
                    // Nur Kopie + try-push; der Geraete-Thread blockiert nie
                    if !queue.try_push(daten.to_vec()) {
                        warn!("Capture-Queue voll, Frame verworfen");
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => geraet
            .build_input_stream(
                &stream_config,
                move |daten: &[i16], _| {
                    let floats: Vec<f32> =
                        daten.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    if !queue.try_push(floats) {
                        warn!("Capture-Queue voll, Frame verworfen");
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        _ => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {sample_format:?}"
            )))
        }
    };

    Ok(stream)
}

/// Kodier-Schleife des Worker-Threads.
///
/// Endet wenn die Queue schliesst, das Shutdown-Signal feuert oder der
/// Transport geschlossen wird.
fn kodier_schleife(
    queue: QueueConsumer<Vec<f32>>,
    signal: ShutdownSignal,
    mut encoder: OpusEncoder,
    transport: PaketSender,
    sende_timeout: Duration,
) {
    let frame_samples = encoder.frame_samples();
    let mut sammel: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    loop {
        let frame = match queue.pop_oder_abbruch(&signal) {
            Some(frame) => frame,
            None => break,
        };

        sammel.extend_from_slice(&frame);

        // Vollstaendige Codec-Frames kodieren und weiterreichen
        while sammel.len() >= frame_samples {
            let pcm: Vec<f32> = sammel.drain(..frame_samples).collect();

            let paket = match encoder.encode(&pcm) {
                Ok(paket) => paket,
                Err(e) => {
                    warn!("Opus-Encoding fehlgeschlagen, Frame verworfen: {}", e);
                    continue;
                }
            };

            match transport.send_timeout(paket, sende_timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    // Veraltetes Audio ist schlimmer als eine Luecke:
                    // verwerfen, nie wiederholen
                    trace!("Transport-Timeout, Paket verworfen");
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!("Transport geschlossen, Kodier-Schleife endet");
                    return;
                }
            }
        }
    }

    debug!("Kodier-Schleife beendet");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::{shutdown_paar, warte_mit_frist};

    fn test_encoder(kanaele: u16) -> OpusEncoder {
        OpusEncoder::neu(48000, kanaele, 960, 64).unwrap()
    }

    #[test]
    fn capture_config_default() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.kanaele, 2);
        assert_eq!(config.frames_pro_puffer, 960);
        assert!(config.queue_kapazitaet > 0);
    }

    #[test]
    fn kodier_schleife_kodiert_und_sendet() {
        let (_ausloeser, signal) = shutdown_paar();
        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(8);
        let (transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(8);

        // Zwei volle Mono-Frames einreihen, dann Queue schliessen
        queue_tx.try_push(vec![0.1f32; 960]);
        queue_tx.try_push(vec![0.2f32; 960]);
        drop(queue_tx);

        let handle = std::thread::spawn(move || {
            kodier_schleife(
                queue_rx,
                signal,
                test_encoder(1),
                transport_tx,
                Duration::from_millis(50),
            );
        });

        let erstes = transport_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("Erstes Paket sollte ankommen");
        assert!(!erstes.is_empty());
        let zweites = transport_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("Zweites Paket sollte ankommen");
        assert!(!zweites.is_empty());

        assert!(warte_mit_frist(vec![handle], Duration::from_secs(2)));
    }

    #[test]
    fn kodier_schleife_sammelt_teilframes() {
        let (_ausloeser, signal) = shutdown_paar();
        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(8);
        let (transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(8);

        // Vier Viertel-Frames ergeben genau einen Codec-Frame
        for _ in 0..4 {
            queue_tx.try_push(vec![0.0f32; 240]);
        }
        drop(queue_tx);

        let handle = std::thread::spawn(move || {
            kodier_schleife(
                queue_rx,
                signal,
                test_encoder(1),
                transport_tx,
                Duration::from_millis(50),
            );
        });

        assert!(transport_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(warte_mit_frist(vec![handle], Duration::from_secs(2)));
        // Kein zweites Paket aus Restbestand
        assert!(transport_rx.try_recv().is_err());
    }

    #[test]
    fn kodier_schleife_endet_bei_abbruch() {
        let (mut ausloeser, signal) = shutdown_paar();
        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(8);
        let (transport_tx, _transport_rx) = crossbeam_channel::bounded::<Bytes>(8);

        let handle = std::thread::spawn(move || {
            kodier_schleife(
                queue_rx,
                signal,
                test_encoder(1),
                transport_tx,
                Duration::from_millis(50),
            );
        });

        ausloeser.ausloesen();
        assert!(
            warte_mit_frist(vec![handle], Duration::from_secs(1)),
            "Worker sollte beim Abbruch auf leerer Queue sofort enden"
        );
        drop(queue_tx);
    }

    #[test]
    fn sende_timeout_blockiert_nicht_dauerhaft() {
        // Transport mit Kapazitaet 1 und ohne Konsument: Pakete laufen
        // in den Timeout und werden verworfen, der Worker endet trotzdem
        let (_ausloeser, signal) = shutdown_paar();
        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(8);
        let (transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(1);

        for _ in 0..3 {
            queue_tx.try_push(vec![0.0f32; 960]);
        }
        drop(queue_tx);

        let handle = std::thread::spawn(move || {
            kodier_schleife(
                queue_rx,
                signal,
                test_encoder(1),
                transport_tx,
                Duration::from_millis(20),
            );
        });

        assert!(
            warte_mit_frist(vec![handle], Duration::from_secs(2)),
            "Timeout-Pfad darf den Worker nicht dauerhaft blockieren"
        );
        // Genau ein Paket hat Platz gefunden
        assert!(transport_rx.try_recv().is_ok());
        assert!(transport_rx.try_recv().is_err());
    }

    #[test]
    fn stoppen_ist_idempotent() {
        let mut relay = CaptureRelay {
            stream: None,
            worker: None,
            zustand: RelayZustand::Laeuft,
            config: CaptureConfig::default(),
        };
        assert!(relay.stoppen().is_ok());
        assert_eq!(relay.zustand(), RelayZustand::Gestoppt);
        assert!(relay.stoppen().is_ok(), "Zweites Stoppen darf nicht fehlschlagen");
        assert_eq!(relay.zustand(), RelayZustand::Gestoppt);
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn relay_starten_und_stoppen() {
        let geraet = crate::device::eingabegeraet_laden(None).expect("Eingabegeraet");
        let (_ausloeser, signal) = shutdown_paar();
        let (transport_tx, _transport_rx) = crossbeam_channel::bounded::<Bytes>(64);

        let mut relay =
            CaptureRelay::starten(&geraet, transport_tx, signal, CaptureConfig::default())
                .expect("Relay sollte starten");
        assert_eq!(relay.zustand(), RelayZustand::Laeuft);
        assert!(relay.stoppen().is_ok());
        assert!(relay.stoppen().is_ok());
    }
}
