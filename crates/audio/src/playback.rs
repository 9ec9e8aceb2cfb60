//! Playback-Relay – Transport zu Lautsprecher
//!
//! Ein Worker-Thread empfaengt Pakete vom Transport, dekodiert sie,
//! wendet die Frame-Transformation an und legt fertige Frames per
//! try-push in die begrenzte Queue. Der cpal-Ausgabe-Callback holt
//! nicht-blockierend einen Frame und kopiert ihn in den Puffer – ist
//! keiner da, liefert er Stille. Der Callback fuellt den Puffer immer
//! vollstaendig und blockiert nie.

use std::thread::{self, JoinHandle};

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, trace, warn};

use crate::codec::OpusDecoder;
use crate::error::{AudioError, AudioResult};
use crate::queue::{begrenzte_queue, QueueConsumer, QueueProducer};
use crate::shutdown::{RelayZustand, ShutdownSignal};
use crate::transform;

/// Eingehender Transport-Pfad – schliessbarer Kanal von Paketen
pub type PaketEmpfaenger = crossbeam_channel::Receiver<Bytes>;

/// Konfiguration des Playback-Relays
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl des Ausgabegeraets
    pub kanaele: u16,
    /// Kanalanzahl der Transport-Quelle (typisch Mono)
    pub quell_kanaele: u16,
    /// Frames pro Geraete-Zyklus
    pub frames_pro_puffer: u32,
    /// Kapazitaet der Frame-Queue – kleiner als beim Capture, damit die
    /// hoerbare Latenz begrenzt bleibt
    pub queue_kapazitaet: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            kanaele: 2,
            quell_kanaele: 1,
            frames_pro_puffer: 960,
            queue_kapazitaet: 32,
        }
    }
}

/// Playback-Relay
pub struct PlaybackRelay {
    stream: Option<Stream>,
    worker: Option<JoinHandle<()>>,
    // Interne Stopp-Leitung: das Gegenstueck zum Schliessen der Quelle,
    // damit `stoppen` den Worker auch ohne Session-Signal beendet
    stopp_tx: Option<Sender<()>>,
    zustand: RelayZustand,
    config: PlaybackConfig,
}

impl PlaybackRelay {
    /// Startet das Relay auf dem gegebenen Ausgabegeraet.
    ///
    /// Geraete- und Decoder-Fehler sind fatal und werden zurueckgegeben.
    pub fn starten(
        geraet: &Device,
        transport: PaketEmpfaenger,
        signal: ShutdownSignal,
        config: PlaybackConfig,
    ) -> AudioResult<Self> {
        debug!(
            zustand = ?RelayZustand::Startet,
            sample_rate = config.sample_rate,
            kanaele = config.kanaele,
            queue = config.queue_kapazitaet,
            "Playback-Relay startet"
        );

        let decoder = OpusDecoder::neu(
            config.sample_rate,
            config.quell_kanaele,
            config.frames_pro_puffer,
        )?;

        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(config.queue_kapazitaet);

        let stream = ausgabe_stream_bauen(geraet, &config, queue_rx)?;
        stream
            .play()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        let (stopp_tx, stopp_rx) = bounded::<()>(0);
        let kanaele = config.kanaele as usize;
        let worker = thread::Builder::new()
            .name("playback-relay".into())
            .spawn(move || {
                dekodier_schleife(transport, stopp_rx, signal, decoder, queue_tx, kanaele);
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        debug!("Playback-Relay laeuft");

        Ok(Self {
            stream: Some(stream),
            worker: Some(worker),
            stopp_tx: Some(stopp_tx),
            zustand: RelayZustand::Laeuft,
            config,
        })
    }

    /// Stoppt das Relay. Idempotent, blockiert nicht.
    pub fn stoppen(&mut self) -> AudioResult<()> {
        if self.zustand == RelayZustand::Gestoppt {
            return Ok(());
        }
        self.zustand = RelayZustand::Stoppt;
        debug!("Playback-Relay stoppt");
        self.stream.take();
        // Stopp-Leitung kappen: der Worker endet auch wenn der Transport
        // noch offen ist und das Session-Signal nicht gefeuert hat
        self.stopp_tx.take();
        self.zustand = RelayZustand::Gestoppt;
        Ok(())
    }

    /// Uebergibt den Worker-Thread an den Aufrufer (Frist-Wartung)
    pub fn worker_uebernehmen(&mut self) -> Option<JoinHandle<()>> {
        self.worker.take()
    }

    /// Aktueller Relay-Zustand
    pub fn zustand(&self) -> RelayZustand {
        self.zustand
    }

    /// Gibt die Konfiguration des Relays zurueck
    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }
}

impl Drop for PlaybackRelay {
    fn drop(&mut self) {
        let _ = self.stoppen();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Fuellt den Ausgabepuffer aus der Queue.
///
/// Holt nicht-blockierend einen fertigen Frame und kopiert ihn; ist
/// keiner verfuegbar, wird der komplette Puffer mit Stille gefuellt.
/// Der Puffer ist nach der Rueckkehr immer vollstaendig belegt.
fn fuelle_ausgabepuffer(queue: &QueueConsumer<Vec<f32>>, ausgabe: &mut [f32]) {
    match queue.try_pop() {
        Some(frame) => {
            let n = frame.len().min(ausgabe.len());
            ausgabe[..n].copy_from_slice(&frame[..n]);
            ausgabe[n..].fill(0.0);
        }
        None => ausgabe.fill(0.0),
    }
}

/// Baut den cpal-Ausgabestream mit dem nicht-blockierenden Callback
fn ausgabe_stream_bauen(
    geraet: &Device,
    config: &PlaybackConfig,
    queue: QueueConsumer<Vec<f32>>,
) -> AudioResult<Stream> {
    let stream_config = StreamConfig {
        channels: config.kanaele,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frames_pro_puffer),
    };

    let err_fn = |err| error!("Playback-Fehler: {}", err);

    let unterstuetzt = geraet
        .supported_output_configs()
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
            .build_output_stream(
                &stream_config,
                move |daten: &mut [f32], _| {
                    fuelle_ausgabepuffer(&queue, daten);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => geraet
            .build_output_stream(
                &stream_config,
                move |daten: &mut [i16], _| {
                    let mut float_puffer = vec![0.0f32; daten.len()];
                    fuelle_ausgabepuffer(&queue, &mut float_puffer);
                    for (aus, s) in daten.iter_mut().zip(float_puffer.iter()) {
                        *aus = (*s * i16::MAX as f32)
                            .clamp(i16::MIN as f32, i16::MAX as f32)
                            as i16;
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

/// Dekodier-Schleife des Worker-Threads.
///
/// Endet wenn der Transport schliesst, das Shutdown-Signal feuert oder
/// die Stopp-Leitung gekappt wird. Dekodier-Fehler einzelner Pakete
/// sind nicht fatal: Paket verwerfen, weiterlaufen.
fn dekodier_schleife(
    transport: PaketEmpfaenger,
    stopp_rx: crossbeam_channel::Receiver<()>,
    signal: ShutdownSignal,
    mut decoder: OpusDecoder,
    queue: QueueProducer<Vec<f32>>,
    kanaele: usize,
) {
    loop {
        let paket = crossbeam_channel::select! {
            recv(transport) -> ergebnis => match ergebnis {
                Ok(paket) => paket,
                Err(_) => {
                    debug!("Transport geschlossen, Dekodier-Schleife endet");
                    break;
                }
            },
            recv(signal.kanal()) -> _ => break,
            recv(stopp_rx) -> _ => break,
        };

        let pcm = match decoder.decode(&paket) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("Opus-Decoding fehlgeschlagen, Paket verworfen: {}", e);
                continue;
            }
        };

        let frame = transform::wandle_frame(&pcm, kanaele);
        if !queue.try_push(frame) {
            trace!("Wiedergabe-Queue voll, Frame verworfen");
        }
    }

    debug!("Dekodier-Schleife beendet");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpusEncoder;
    use crate::shutdown::{shutdown_paar, warte_mit_frist};
    use std::time::Duration;

    fn test_decoder() -> OpusDecoder {
        OpusDecoder::neu(48000, 1, 960).unwrap()
    }

    fn gueltiges_paket(wert: f32) -> Bytes {
        let mut enc = OpusEncoder::neu(48000, 1, 960, 64).unwrap();
        enc.encode(&vec![wert; 960]).unwrap()
    }

    #[test]
    fn playback_config_default() {
        let config = PlaybackConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.quell_kanaele, 1);
        // Kleiner als die Capture-Queue, damit die Latenz begrenzt bleibt
        let capture = crate::capture::CaptureConfig::default();
        assert!(config.queue_kapazitaet < capture.queue_kapazitaet);
    }

    #[test]
    fn leere_queue_liefert_stille_in_voller_laenge() {
        let (_tx, rx) = begrenzte_queue::<Vec<f32>>(4);
        let mut ausgabe = vec![0.7f32; 1920];
        fuelle_ausgabepuffer(&rx, &mut ausgabe);
        assert_eq!(ausgabe.len(), 1920);
        assert!(ausgabe.iter().all(|&s| s == 0.0), "Puffer sollte Stille sein");
    }

    #[test]
    fn frame_wird_vollstaendig_kopiert() {
        let (tx, rx) = begrenzte_queue::<Vec<f32>>(4);
        tx.try_push(vec![0.25f32; 1920]);
        let mut ausgabe = vec![0.0f32; 1920];
        fuelle_ausgabepuffer(&rx, &mut ausgabe);
        assert!(ausgabe.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn kurzer_frame_wird_mit_stille_aufgefuellt() {
        let (tx, rx) = begrenzte_queue::<Vec<f32>>(4);
        tx.try_push(vec![0.5f32; 100]);
        let mut ausgabe = vec![0.9f32; 1920];
        fuelle_ausgabepuffer(&rx, &mut ausgabe);
        assert!(ausgabe[..100].iter().all(|&s| s == 0.5));
        assert!(ausgabe[100..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn dekodier_schleife_transformiert_und_reiht_ein() {
        let (_ausloeser, signal) = shutdown_paar();
        let (transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(8);
        let (_stopp_tx, stopp_rx) = bounded::<()>(0);
        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(8);

        transport_tx.send(gueltiges_paket(0.3)).unwrap();
        drop(transport_tx);

        let handle = std::thread::spawn(move || {
            dekodier_schleife(transport_rx, stopp_rx, signal, test_decoder(), queue_tx, 2);
        });

        assert!(warte_mit_frist(vec![handle], Duration::from_secs(2)));

        let frame = queue_rx.try_pop().expect("Frame sollte eingereiht sein");
        // Mono-Quelle auf Stereo dupliziert
        assert_eq!(frame.len(), 1920);
        for paar in frame.chunks_exact(2) {
            assert_eq!(paar[0], paar[1], "Kanal-Slots sollten identisch sein");
        }
    }

    #[test]
    fn dekodier_fehler_ist_nicht_fatal() {
        let (_ausloeser, signal) = shutdown_paar();
        let (transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(8);
        let (_stopp_tx, stopp_rx) = bounded::<()>(0);
        let (queue_tx, queue_rx) = begrenzte_queue::<Vec<f32>>(8);

        // Ungueltiges Paket, danach ein gueltiges: die Schleife muss
        // weiterlaufen und das gueltige noch verarbeiten
        transport_tx.send(Bytes::from_static(&[0x03, 0x00])).unwrap();
        transport_tx.send(gueltiges_paket(0.1)).unwrap();
        drop(transport_tx);

        let handle = std::thread::spawn(move || {
            dekodier_schleife(transport_rx, stopp_rx, signal, test_decoder(), queue_tx, 2);
        });

        assert!(warte_mit_frist(vec![handle], Duration::from_secs(2)));
        assert!(queue_rx.try_pop().is_some(), "Gueltiges Paket sollte ankommen");
        assert!(queue_rx.try_pop().is_none(), "Ungueltiges Paket sollte fehlen");
    }

    #[test]
    fn dekodier_schleife_endet_bei_abbruch() {
        let (mut ausloeser, signal) = shutdown_paar();
        let (transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(8);
        let (_stopp_tx, stopp_rx) = bounded::<()>(0);
        let (queue_tx, _queue_rx) = begrenzte_queue::<Vec<f32>>(8);

        let handle = std::thread::spawn(move || {
            dekodier_schleife(transport_rx, stopp_rx, signal, test_decoder(), queue_tx, 2);
        });

        ausloeser.ausloesen();
        assert!(
            warte_mit_frist(vec![handle], Duration::from_secs(1)),
            "Worker sollte beim Abbruch auf leerem Transport sofort enden"
        );
        drop(transport_tx);
    }

    #[test]
    fn stopp_leitung_beendet_den_worker() {
        let (_ausloeser, signal) = shutdown_paar();
        let (transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(8);
        let (stopp_tx, stopp_rx) = bounded::<()>(0);
        let (queue_tx, _queue_rx) = begrenzte_queue::<Vec<f32>>(8);

        let handle = std::thread::spawn(move || {
            dekodier_schleife(transport_rx, stopp_rx, signal, test_decoder(), queue_tx, 2);
        });

        drop(stopp_tx);
        assert!(
            warte_mit_frist(vec![handle], Duration::from_secs(1)),
            "Gekappte Stopp-Leitung sollte den Worker beenden"
        );
        drop(transport_tx);
    }

    #[test]
    fn stoppen_ist_idempotent() {
        let mut relay = PlaybackRelay {
            stream: None,
            worker: None,
            stopp_tx: None,
            zustand: RelayZustand::Laeuft,
            config: PlaybackConfig::default(),
        };
        assert!(relay.stoppen().is_ok());
        assert!(relay.stoppen().is_ok(), "Zweites Stoppen darf nicht fehlschlagen");
        assert_eq!(relay.zustand(), RelayZustand::Gestoppt);
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn relay_starten_und_stoppen() {
        let geraet = crate::device::ausgabegeraet_laden(None).expect("Ausgabegeraet");
        let (_ausloeser, signal) = shutdown_paar();
        let (_transport_tx, transport_rx) = crossbeam_channel::bounded::<Bytes>(64);

        let mut relay =
            PlaybackRelay::starten(&geraet, transport_rx, signal, PlaybackConfig::default())
                .expect("Relay sollte starten");
        assert_eq!(relay.zustand(), RelayZustand::Laeuft);
        assert!(relay.stoppen().is_ok());
        assert!(relay.stoppen().is_ok());
    }
}
