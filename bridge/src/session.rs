//! Session-Verwaltung
//!
//! Eine Session bindet Eingabe- und Ausgabestream an einen Voice-Link:
//! Capture- und Playback-Relay werden zusammen erstellt und zusammen
//! abgebaut. cpal-Streams sind !Send, deshalb leben die Relays in
//! einem dedizierten Thread; die async-Seite steuert ihn ueber einen
//! Kommando-Kanal und bekommt Antworten per oneshot.

use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use voicebridge_audio::{
    device, shutdown_paar, warte_mit_frist, CaptureRelay, PaketEmpfaenger, PaketSender,
    PlaybackRelay, RelayZustand, ShutdownAusloeser,
};

use crate::config::BridgeConfig;

/// Kommandos an den Session-Thread
enum SessionKommando {
    Starten {
        ausgang: PaketSender,
        eingang: PaketEmpfaenger,
        antwort: oneshot::Sender<Result<Uuid, String>>,
    },
    Stoppen {
        antwort: oneshot::Sender<bool>,
    },
    Status {
        antwort: oneshot::Sender<Option<SessionStatus>>,
    },
    Beenden,
}

/// Momentaufnahme der aktiven Session
///
/// `playback` ist `Leerlauf` wenn die Wiedergabe per Konfiguration
/// deaktiviert ist.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub id: Uuid,
    pub capture: RelayZustand,
    pub playback: RelayZustand,
}

/// Steuert den Session-Thread von der async-Seite aus
pub struct SessionVerwalter {
    cmd_tx: Sender<SessionKommando>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SessionVerwalter {
    /// Startet den Session-Thread
    pub fn neu(config: BridgeConfig) -> anyhow::Result<Self> {
        let (cmd_tx, cmd_rx) = bounded::<SessionKommando>(16);
        let thread = std::thread::Builder::new()
            .name("session".into())
            .spawn(move || session_schleife(cmd_rx, config))?;
        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    /// Startet eine Session auf den uebergebenen Transport-Enden.
    ///
    /// Hoechstens eine Session ist gleichzeitig aktiv; ein zweiter
    /// Start wird abgelehnt. Fatale Startfehler (Geraet, Codec) kommen
    /// als `Err` zurueck.
    pub async fn starten(
        &self,
        ausgang: PaketSender,
        eingang: PaketEmpfaenger,
    ) -> Result<Uuid, String> {
        let (antwort_tx, antwort_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionKommando::Starten {
                ausgang,
                eingang,
                antwort: antwort_tx,
            })
            .map_err(|_| "Session-Thread nicht erreichbar".to_string())?;
        antwort_rx
            .await
            .map_err(|_| "Session-Thread hat nicht geantwortet".to_string())?
    }

    /// Stoppt die aktive Session (falls vorhanden).
    ///
    /// Gibt `true` zurueck wenn der Abbau innerhalb der Gnadenfrist
    /// abgeschlossen war – auch wenn keine Session aktiv war.
    pub async fn stoppen(&self) -> bool {
        let (antwort_tx, antwort_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionKommando::Stoppen { antwort: antwort_tx })
            .is_err()
        {
            return true;
        }
        antwort_rx.await.unwrap_or(true)
    }

    /// Fragt den Zustand der aktiven Session ab
    pub async fn status(&self) -> Option<SessionStatus> {
        let (antwort_tx, antwort_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionKommando::Status { antwort: antwort_tx })
            .is_err()
        {
            return None;
        }
        antwort_rx.await.ok().flatten()
    }

    /// Beendet den Session-Thread (stoppt eine aktive Session vorher)
    pub fn beenden(mut self) {
        let _ = self.cmd_tx.send(SessionKommando::Beenden);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SessionVerwalter {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SessionKommando::Beenden);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Kommando-Schleife des Session-Threads
fn session_schleife(cmd_rx: Receiver<SessionKommando>, config: BridgeConfig) {
    let mut aktiv: Option<Session> = None;

    debug!("Session-Thread gestartet");

    while let Ok(kommando) = cmd_rx.recv() {
        match kommando {
            SessionKommando::Starten {
                ausgang,
                eingang,
                antwort,
            } => {
                if aktiv.is_some() {
                    let _ = antwort.send(Err("Session laeuft bereits".into()));
                    continue;
                }
                match Session::starten(&config, ausgang, eingang) {
                    Ok(session) => {
                        let id = session.id;
                        aktiv = Some(session);
                        let _ = antwort.send(Ok(id));
                    }
                    Err(e) => {
                        let _ = antwort.send(Err(e.to_string()));
                    }
                }
            }
            SessionKommando::Stoppen { antwort } => {
                let fristgerecht = match aktiv.take() {
                    Some(session) => session.stoppen(&config),
                    None => true,
                };
                let _ = antwort.send(fristgerecht);
            }
            SessionKommando::Status { antwort } => {
                let _ = antwort.send(aktiv.as_ref().map(Session::status));
            }
            SessionKommando::Beenden => {
                if let Some(session) = aktiv.take() {
                    session.stoppen(&config);
                }
                break;
            }
        }
    }

    debug!("Session-Thread beendet");
}

/// Eine aktive Voice-Session: Shutdown-Signal plus beide Relays.
///
/// Die Relays teilen ausser dem Signal keinerlei Zustand.
struct Session {
    id: Uuid,
    ausloeser: ShutdownAusloeser,
    capture: CaptureRelay,
    playback: Option<PlaybackRelay>,
}

impl Session {
    /// Erstellt die Relays auf den konfigurierten Geraeten; das
    /// Playback-Relay nur wenn die Wiedergabe aktiviert ist.
    ///
    /// Schlaegt das Playback-Relay fehl, wird das bereits laufende
    /// Capture-Relay wieder abgebaut bevor der Fehler zurueckkommt.
    fn starten(
        config: &BridgeConfig,
        ausgang: PaketSender,
        eingang: PaketEmpfaenger,
    ) -> anyhow::Result<Self> {
        let eingabe = device::eingabegeraet_laden(config.audio.eingabegeraet.as_deref())?;

        let (ausloeser, signal) = shutdown_paar();

        let capture =
            CaptureRelay::starten(&eingabe, ausgang, signal.clone(), config.capture_config())?;

        let playback = if config.audio.wiedergabe_aktiviert {
            let ausgabe = device::ausgabegeraet_laden(config.audio.ausgabegeraet.as_deref())?;
            Some(PlaybackRelay::starten(
                &ausgabe,
                eingang,
                signal,
                config.playback_config(),
            )?)
        } else {
            info!("Wiedergabe deaktiviert, nur Capture-Relay aktiv");
            None
        };

        let id = Uuid::new_v4();
        info!(%id, "Session gestartet");

        Ok(Self {
            id,
            ausloeser,
            capture,
            playback,
        })
    }

    /// Baut die Session ab: Signal feuern, beide Relays stoppen und die
    /// Worker-Exits gegen die Gnadenfrist rennen lassen.
    ///
    /// Gibt `false` zurueck wenn die Frist ueberschritten wurde; der
    /// Aufrufer faehrt dann mit dem erzwungenen Abbau fort (Link
    /// trennen, Session fallen lassen).
    fn stoppen(mut self, config: &BridgeConfig) -> bool {
        info!(id = %self.id, "Session stoppt");

        self.ausloeser.ausloesen();
        let _ = self.capture.stoppen();
        if let Some(playback) = self.playback.as_mut() {
            let _ = playback.stoppen();
        }

        let mut worker = Vec::new();
        if let Some(handle) = self.capture.worker_uebernehmen() {
            worker.push(handle);
        }
        if let Some(handle) = self.playback.as_mut().and_then(PlaybackRelay::worker_uebernehmen) {
            worker.push(handle);
        }

        let fristgerecht = warte_mit_frist(worker, config.frist());
        if fristgerecht {
            info!(id = %self.id, "Session beendet");
        } else {
            warn!(
                id = %self.id,
                frist_ms = config.shutdown.frist_ms,
                "Gnadenfrist ueberschritten, erzwungenes Herunterfahren"
            );
        }
        fristgerecht
    }

    /// Momentaufnahme fuer das `status`-Kommando
    fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id,
            capture: self.capture.zustand(),
            playback: self
                .playback
                .as_ref()
                .map(PlaybackRelay::zustand)
                .unwrap_or(RelayZustand::Leerlauf),
        }
    }
}
