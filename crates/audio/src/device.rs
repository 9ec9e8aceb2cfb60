//! Audio-Geraete-Auswahl
//!
//! Laedt das Standard- oder ein per Namens-Teilstring gewaehltes
//! cpal-Geraet und listet verfuegbare Geraete fuer die Ausgabe im
//! `devices`-Kommando auf.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

use crate::error::{AudioError, AudioResult};

/// Laedt ein Eingabegeraet; `None` waehlt das Standardgeraet
pub fn eingabegeraet_laden(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(AudioError::KeinStandardEingabegeraet),
        Some(n) => {
            let geraete = host
                .input_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            for geraet in geraete {
                if let Ok(geraet_name) = geraet.name() {
                    if geraet_name.contains(n) {
                        return Ok(geraet);
                    }
                }
            }
            Err(AudioError::GeraetNichtGefunden(n.to_string()))
        }
    }
}

/// Laedt ein Ausgabegeraet; `None` waehlt das Standardgeraet
pub fn ausgabegeraet_laden(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(AudioError::KeinStandardAusgabegeraet),
        Some(n) => {
            let geraete = host
                .output_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            for geraet in geraete {
                if let Ok(geraet_name) = geraet.name() {
                    if geraet_name.contains(n) {
                        return Ok(geraet);
                    }
                }
            }
            Err(AudioError::GeraetNichtGefunden(n.to_string()))
        }
    }
}

/// Listet die Namen aller Eingabegeraete auf
pub fn eingabegeraete_auflisten() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let geraete = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    Ok(geraete.filter_map(|g| g.name().ok()).collect())
}

/// Listet die Namen aller Ausgabegeraete auf
pub fn ausgabegeraete_auflisten() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let geraete = host
        .output_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    Ok(geraete.filter_map(|g| g.name().ok()).collect())
}
