//! Frame-Transformationen fuer den Wiedergabe-Pfad
//!
//! Reine, zustandslose Funktionen die auf einen dekodierten Frame
//! angewendet werden bevor er in die Wiedergabe-Queue gelangt:
//! Kanal-Duplikation (Mono-Quelle auf N Ausgabekanaele) und ein
//! Spitzenwert-Kompressor mit weichem Knie. Kein Lookahead, kein
//! Attack/Release – der Kompressor begrenzt Pegelspitzen, er
//! normalisiert nicht.

/// Kompressor-Schwellenwert (linear, bezogen auf Vollaussteuerung)
pub const KOMPRESSOR_SCHWELLE: f32 = 0.5;
/// Kompressionsverhaeltnis oberhalb der Schwelle
pub const KOMPRESSOR_VERHAELTNIS: f32 = 4.0;

/// Komprimiert ein einzelnes Sample.
///
/// Unterhalb (und auf) der Schwelle bleibt das Sample exakt
/// unveraendert; oberhalb wird der Betrag auf
/// `schwelle + (|s| - schwelle) / verhaeltnis` abgebildet, das
/// Vorzeichen bleibt erhalten.
#[inline]
pub fn komprimiere_sample(sample: f32) -> f32 {
    let betrag = sample.abs();
    if betrag <= KOMPRESSOR_SCHWELLE {
        sample
    } else {
        let begrenzt =
            KOMPRESSOR_SCHWELLE + (betrag - KOMPRESSOR_SCHWELLE) / KOMPRESSOR_VERHAELTNIS;
        begrenzt.copysign(sample)
    }
}

/// Komprimiert einen Frame in-place
pub fn komprimiere(samples: &mut [f32]) {
    for sample in samples.iter_mut() {
        *sample = komprimiere_sample(*sample);
    }
}

/// Dupliziert einen Mono-Frame auf `kanaele` interleaved Ausgabekanaele.
///
/// Jedes Sample landet bit-identisch in allen Kanal-Slots – keine
/// Mittelung, kein Dithering. Fuer `kanaele == 1` ist das die Identitaet.
pub fn mono_auf_kanaele(mono: &[f32], kanaele: usize) -> Vec<f32> {
    if kanaele <= 1 {
        return mono.to_vec();
    }
    let mut ausgabe = Vec::with_capacity(mono.len() * kanaele);
    for &sample in mono {
        for _ in 0..kanaele {
            ausgabe.push(sample);
        }
    }
    ausgabe
}

/// Vollstaendige Wiedergabe-Transformation: Kompressor, dann
/// Kanal-Duplikation. Liefert den fertigen interleaved Frame fuer die
/// Wiedergabe-Queue.
pub fn wandle_frame(mono: &[f32], kanaele: usize) -> Vec<f32> {
    let mut frame = mono_auf_kanaele(mono, kanaele);
    komprimiere(&mut frame);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unter_schwelle_exakt_unveraendert() {
        for s in [0.0f32, 0.1, -0.3, 0.5, -0.5, 0.49999] {
            assert_eq!(komprimiere_sample(s), s, "Sample {s} sollte unangetastet bleiben");
        }
    }

    #[test]
    fn ueber_schwelle_auf_knie_abgebildet() {
        // |s| = 0.8 -> 0.5 + (0.8 - 0.5) / 4 = 0.575
        let erwartet = 0.575f32;
        assert!((komprimiere_sample(0.8) - erwartet).abs() < 1e-6);
        assert!((komprimiere_sample(-0.8) + erwartet).abs() < 1e-6);
    }

    #[test]
    fn vorzeichen_bleibt_erhalten() {
        assert!(komprimiere_sample(0.9) > 0.0);
        assert!(komprimiere_sample(-0.9) < 0.0);
    }

    #[test]
    fn kompressor_ist_monoton_begrenzend() {
        // Vollaussteuerung wird auf 0.5 + 0.5/4 = 0.625 gedrueckt
        assert!((komprimiere_sample(1.0) - 0.625).abs() < 1e-6);
        assert!(komprimiere_sample(1.0) > komprimiere_sample(0.8));
    }

    #[test]
    fn mono_auf_stereo_bit_exakt() {
        let mono = vec![0.1f32, -0.2, 0.3];
        let stereo = mono_auf_kanaele(&mono, 2);
        assert_eq!(stereo, vec![0.1, 0.1, -0.2, -0.2, 0.3, 0.3]);
    }

    #[test]
    fn mono_auf_einen_kanal_ist_identitaet() {
        let mono = vec![0.4f32, -0.6];
        assert_eq!(mono_auf_kanaele(&mono, 1), mono);
    }

    #[test]
    fn mono_auf_vier_kanaele() {
        let mono = vec![0.25f32];
        assert_eq!(mono_auf_kanaele(&mono, 4), vec![0.25; 4]);
    }

    #[test]
    fn wandle_frame_ende_zu_ende() {
        // 960 Mono-Samples konstant 0.8 -> 1920 Stereo-Samples,
        // jeder Slot exakt 0.575
        let mono = vec![0.8f32; 960];
        let stereo = wandle_frame(&mono, 2);
        assert_eq!(stereo.len(), 1920);
        for (i, &s) in stereo.iter().enumerate() {
            assert!(
                (s - 0.575).abs() < 1e-6,
                "Slot {i} sollte 0.575 sein, war {s}"
            );
        }
    }

    #[test]
    fn leerer_frame_bleibt_leer() {
        assert!(wandle_frame(&[], 2).is_empty());
    }
}
