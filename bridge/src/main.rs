//! voicebridge – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und nimmt
//! Kommandos von stdin entgegen. Ctrl-C entspricht `quit`: eine aktive
//! Session wird beendet (mit Gnadenfrist), danach der Link getrennt.

use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use voicebridge::command::{parse_zeile, Kommando, HILFE};
use voicebridge::config::BridgeConfig;
use voicebridge::link::{self, UdpVoiceLink};
use voicebridge::session::SessionVerwalter;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("VOICEBRIDGE_CONFIG").unwrap_or_else(|_| "voicebridge.toml".into());

    let config = BridgeConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "voicebridge wird initialisiert"
    );

    let verwalter = SessionVerwalter::neu(config.clone())?;
    let mut aktiver_link: Option<UdpVoiceLink> = None;

    println!("{HILFE}");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut zeilen = stdin.lines();

    loop {
        tokio::select! {
            zeile = zeilen.next_line() => {
                let Some(zeile) = zeile? else {
                    break; // stdin geschlossen
                };
                if zeile.trim().is_empty() {
                    continue;
                }
                let kommando = match parse_zeile(&zeile) {
                    Ok(kommando) => kommando,
                    Err(fehler) => {
                        println!("{fehler}");
                        continue;
                    }
                };
                match kommando {
                    Kommando::Beitreten { adresse } => {
                        beitreten(&config, &verwalter, &mut aktiver_link, adresse).await;
                    }
                    Kommando::Verlassen => {
                        if aktiver_link.is_none() {
                            println!("Keine aktive Session.");
                        } else {
                            verlassen(&verwalter, &mut aktiver_link).await;
                            println!("Session beendet.");
                        }
                    }
                    Kommando::Geraete => geraete_auflisten(),
                    Kommando::Status => status_anzeigen(&verwalter, &aktiver_link).await,
                    Kommando::Hilfe => println!("{HILFE}"),
                    Kommando::Beenden => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C empfangen, fahre herunter");
                break;
            }
        }
    }

    verlassen(&verwalter, &mut aktiver_link).await;
    verwalter.beenden();
    info!("voicebridge beendet");
    Ok(())
}

/// Initialisiert tracing-subscriber mit dem konfigurierten Level und Format
fn logging_initialisieren(level: &str, format: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Baut Link und Session auf; raeumt den Link wieder ab wenn der
/// Session-Start fehlschlaegt.
async fn beitreten(
    config: &BridgeConfig,
    verwalter: &SessionVerwalter,
    aktiver_link: &mut Option<UdpVoiceLink>,
    adresse: Option<String>,
) {
    if aktiver_link.is_some() {
        println!("Bereits in einer Session – erst 'leave'.");
        return;
    }

    let ziel = adresse.unwrap_or_else(|| config.netzwerk.server_adresse.clone());
    let server = match tokio::net::lookup_host(&ziel).await {
        Ok(mut adressen) => match adressen.next() {
            Some(server) => server,
            None => {
                println!("Adresse '{ziel}' nicht aufloesbar.");
                return;
            }
        },
        Err(e) => {
            println!("Adresse '{ziel}' nicht aufloesbar: {e}");
            return;
        }
    };

    let ssrc = if config.netzwerk.ssrc != 0 {
        config.netzwerk.ssrc
    } else {
        link::ssrc_erzeugen()
    };

    let mut neuer_link =
        match UdpVoiceLink::verbinden(server, ssrc, config.netzwerk.link_queue).await {
            Ok(link) => link,
            Err(e) => {
                println!("Verbindung zu {server} fehlgeschlagen: {e}");
                return;
            }
        };

    match verwalter
        .starten(neuer_link.paket_sender(), neuer_link.paket_empfaenger())
        .await
    {
        Ok(id) => {
            println!("Session {id} gestartet ({server}).");
            *aktiver_link = Some(neuer_link);
        }
        Err(fehler) => {
            println!("Session-Start fehlgeschlagen: {fehler}");
            neuer_link.trennen().await;
        }
    }
}

/// Baut Session und Link ab. Der Link wird auch bei ueberschrittener
/// Gnadenfrist getrennt (erzwungener Abbau).
async fn verlassen(verwalter: &SessionVerwalter, aktiver_link: &mut Option<UdpVoiceLink>) {
    let Some(mut link) = aktiver_link.take() else {
        return;
    };

    let fristgerecht = verwalter.stoppen().await;
    if !fristgerecht {
        warn!("Relays nicht fristgerecht beendet, Link wird trotzdem getrennt");
    }
    link.trennen().await;
}

/// Listet die verfuegbaren Audio-Geraete beider Richtungen auf
fn geraete_auflisten() {
    match voicebridge_audio::device::eingabegeraete_auflisten() {
        Ok(namen) => {
            println!("Eingabegeraete:");
            for name in namen {
                println!("  {name}");
            }
        }
        Err(e) => println!("Eingabegeraete nicht abrufbar: {e}"),
    }
    match voicebridge_audio::device::ausgabegeraete_auflisten() {
        Ok(namen) => {
            println!("Ausgabegeraete:");
            for name in namen {
                println!("  {name}");
            }
        }
        Err(e) => println!("Ausgabegeraete nicht abrufbar: {e}"),
    }
}

/// Zeigt den Zustand der aktiven Session an
async fn status_anzeigen(verwalter: &SessionVerwalter, aktiver_link: &Option<UdpVoiceLink>) {
    match verwalter.status().await {
        Some(status) => {
            println!(
                "Session {}: Capture {:?}, Playback {:?}",
                status.id, status.capture, status.playback
            );
            if let Some(link) = aktiver_link {
                println!(
                    "Link: {} -> {}",
                    link.lokale_adresse(),
                    link.server_adresse()
                );
            }
        }
        None => println!("Keine aktive Session."),
    }
}
