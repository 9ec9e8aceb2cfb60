//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus hinter einer f32-PCM-basierten API. Encode und
//! Decode sind synchrone Einzelaufrufe mit fester maximaler
//! Ausgabegroesse; der Encoder schreibt in einen wiederverwendeten
//! Scratch-Puffer.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use bytes::Bytes;
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Obergrenze fuer ein kodiertes Paket – reicht fuer jeden Opus-Frame
pub const MAX_PAKET_BYTES: usize = 4000;

/// Opus-Encoder: kodiert f32-PCM zu Paket-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    frame_samples: usize,
    scratch: Vec<u8>,
}

impl OpusEncoder {
    /// Erstellt einen Encoder fuer die gegebene Session-Konfiguration.
    ///
    /// `frames_pro_puffer` ist die Frame-Laenge pro Kanal (z.B. 960 fuer
    /// 20ms bei 48kHz); die erwartete PCM-Laenge ist
    /// `frames_pro_puffer * kanaele`.
    pub fn neu(
        sample_rate: u32,
        kanaele: u16,
        frames_pro_puffer: u32,
        bitrate_kbps: u16,
    ) -> AudioResult<Self> {
        if !(6..=510).contains(&bitrate_kbps) {
            return Err(AudioError::Konfiguration(format!(
                "Bitrate muss zwischen 6 und 510 kbps liegen (war: {bitrate_kbps})"
            )));
        }

        let mut encoder = Encoder::new(
            rate_zu_audiopus(sample_rate)?,
            kanaele_zu_audiopus(kanaele)?,
            Application::Audio,
        )
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate_kbps as i32 * 1000))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let frame_samples = frames_pro_puffer as usize * kanaele as usize;

        debug!(
            sample_rate,
            kanaele, bitrate_kbps, frame_samples, "OpusEncoder erstellt"
        );

        Ok(Self {
            encoder,
            frame_samples,
            scratch: vec![0u8; MAX_PAKET_BYTES],
        })
    }

    /// Kodiert einen PCM-Frame (f32, interleaved, -1.0..1.0) zu einem Paket.
    ///
    /// Die Eingabe muss exakt `frame_samples()` Samples lang sein.
    pub fn encode(&mut self, pcm: &[f32]) -> AudioResult<Bytes> {
        if pcm.len() != self.frame_samples {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.frame_samples,
                pcm.len()
            )));
        }

        let geschrieben = self
            .encoder
            .encode_float(pcm, &mut self.scratch)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.scratch[..geschrieben]))
    }

    /// Erwartete PCM-Laenge pro Frame (ueber alle Kanaele)
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

/// Opus-Decoder: dekodiert Paket-Bytes zu f32-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    frames_pro_puffer: usize,
    kanaele: usize,
}

impl OpusDecoder {
    /// Erstellt einen Decoder fuer die Quell-Konfiguration des Transports
    pub fn neu(sample_rate: u32, kanaele: u16, frames_pro_puffer: u32) -> AudioResult<Self> {
        let decoder = Decoder::new(
            rate_zu_audiopus(sample_rate)?,
            kanaele_zu_audiopus(kanaele)?,
        )
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        debug!(sample_rate, kanaele, frames_pro_puffer, "OpusDecoder erstellt");

        Ok(Self {
            decoder,
            frames_pro_puffer: frames_pro_puffer as usize,
            kanaele: kanaele as usize,
        })
    }

    /// Dekodiert ein Paket zu f32-PCM (interleaved)
    pub fn decode(&mut self, paket: &[u8]) -> AudioResult<Vec<f32>> {
        let mut ausgabe = vec![0.0f32; self.frames_pro_puffer * self.kanaele];
        let dekodiert = self
            .decoder
            .decode_float(Some(paket), &mut ausgabe, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        ausgabe.truncate(dekodiert * self.kanaele);
        Ok(ausgabe)
    }

    /// Anzahl der Quell-Kanaele
    pub fn kanaele(&self) -> usize {
        self.kanaele
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn rate_zu_audiopus(rate: u32) -> AudioResult<SampleRate> {
    match rate {
        8000 => Ok(SampleRate::Hz8000),
        12000 => Ok(SampleRate::Hz12000),
        16000 => Ok(SampleRate::Hz16000),
        24000 => Ok(SampleRate::Hz24000),
        48000 => Ok(SampleRate::Hz48000),
        andere => Err(AudioError::Konfiguration(format!(
            "Abtastrate {andere} wird von Opus nicht unterstuetzt"
        ))),
    }
}

fn kanaele_zu_audiopus(kanaele: u16) -> AudioResult<Channels> {
    match kanaele {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        andere => Err(AudioError::Konfiguration(format!(
            "Opus unterstuetzt 1 oder 2 Kanaele (war: {andere})"
        ))),
    }
}
