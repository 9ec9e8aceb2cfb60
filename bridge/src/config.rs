//! Bruecken-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass die Bruecke ohne Konfigurationsdatei
//! lauffaehig ist. Eine session-weit konsistente Audio-Konfiguration
//! (48 kHz ueberall) ist der Standard.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use voicebridge_audio::{CaptureConfig, PlaybackConfig};

/// Vollstaendige Konfiguration der Bruecke
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Audio-Einstellungen fuer beide Relays
    pub audio: AudioEinstellungen,
    /// Netzwerk-Einstellungen (Voice-Link)
    pub netzwerk: NetzwerkEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Shutdown-Einstellungen
    pub shutdown: ShutdownEinstellungen,
}

/// Audio-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Eingabegeraet (Namens-Teilstring, None = Standardgeraet)
    pub eingabegeraet: Option<String>,
    /// Ausgabegeraet (Namens-Teilstring, None = Standardgeraet)
    pub ausgabegeraet: Option<String>,
    /// Wiedergabe-Relay ueberhaupt starten (false = nur senden)
    pub wiedergabe_aktiviert: bool,
    /// Session-weite Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl der Aufnahme
    pub aufnahme_kanaele: u16,
    /// Kanalanzahl der Wiedergabe
    pub wiedergabe_kanaele: u16,
    /// Kanalanzahl der Transport-Quelle
    pub quell_kanaele: u16,
    /// Frames pro Geraete-Zyklus (960 bei 48kHz = 20ms)
    pub frames_pro_puffer: u32,
    /// Kapazitaet der Capture-Queue in Frames
    pub aufnahme_queue: usize,
    /// Kapazitaet der Playback-Queue in Frames
    pub wiedergabe_queue: usize,
    /// Opus-Bitrate in kbps
    pub bitrate_kbps: u16,
    /// Timeout fuer die Paket-Uebergabe an den Transport in ms
    pub sende_timeout_ms: u64,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            eingabegeraet: None,
            ausgabegeraet: None,
            wiedergabe_aktiviert: true,
            sample_rate: 48000,
            aufnahme_kanaele: 2,
            wiedergabe_kanaele: 2,
            quell_kanaele: 1,
            frames_pro_puffer: 960,
            aufnahme_queue: 80,
            wiedergabe_queue: 32,
            bitrate_kbps: 96,
            sende_timeout_ms: 50,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Standard-Serveradresse fuer `join` ohne Argument
    pub server_adresse: String,
    /// SSRC der eigenen Sendungen (0 = beim Verbinden zufaellig waehlen)
    pub ssrc: u32,
    /// Kapazitaet der Link-Queues (Pakete je Richtung)
    pub link_queue: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            server_adresse: "127.0.0.1:9987".into(),
            ssrc: 0,
            link_queue: 64,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Shutdown-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownEinstellungen {
    /// Gnadenfrist fuer den Relay-Abbau in ms
    pub frist_ms: u64,
}

impl Default for ShutdownEinstellungen {
    fn default() -> Self {
        Self { frist_ms: 5000 }
    }
}

impl BridgeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Leitet die Capture-Relay-Konfiguration ab
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.audio.sample_rate,
            kanaele: self.audio.aufnahme_kanaele,
            frames_pro_puffer: self.audio.frames_pro_puffer,
            queue_kapazitaet: self.audio.aufnahme_queue,
            bitrate_kbps: self.audio.bitrate_kbps,
            sende_timeout: Duration::from_millis(self.audio.sende_timeout_ms),
        }
    }

    /// Leitet die Playback-Relay-Konfiguration ab
    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.audio.sample_rate,
            kanaele: self.audio.wiedergabe_kanaele,
            quell_kanaele: self.audio.quell_kanaele,
            frames_pro_puffer: self.audio.frames_pro_puffer,
            queue_kapazitaet: self.audio.wiedergabe_queue,
        }
    }

    /// Gnadenfrist fuer den Session-Abbau
    pub fn frist(&self) -> Duration {
        Duration::from_millis(self.shutdown.frist_ms)
    }
}
