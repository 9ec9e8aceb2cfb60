//! UDP-Voice-Link
//!
//! Konkreter Transport hinter der Paket-Kanal-Grenze der Relays: ein
//! verbundener UDP-Socket mit minimalem Paketkopf. Die Sende-Seite
//! laeuft als eigener Thread und leert den begrenzten Ausgangs-Kanal
//! (das Capture-Relay legt dort mit Timeout ab); die Empfangs-Seite
//! laeuft als Tokio-Task und fuellt den begrenzten Eingangs-Kanal
//! (volle Queue: Paket verwerfen, nie blockieren).
//!
//! ## Paketformat (Kopf = 12 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version
//!  1       1   PaketTyp (0 = Audio)
//!  2       2   Reserviert (big-endian, 0)
//!  4       4   Sequenznummer (big-endian)
//!  8       4   SSRC (big-endian)
//! 12+      N   Nutzdaten (Opus-Bytes)
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use voicebridge_audio::{PaketEmpfaenger, PaketSender};

/// Aktuelle Protokollversion
pub const PROTOKOLL_VERSION: u8 = 1;

/// Maximale Nutzdaten-Laenge (typisches Opus-MTU-Limit)
pub const MAX_NUTZDATEN_LAENGE: usize = 1280;

/// Empfangspuffergroesse (Kopf + Nutzdaten + Reserve)
const UDP_PUFFER_LAENGE: usize = 1400;

// ---------------------------------------------------------------------------
// Paketkopf
// ---------------------------------------------------------------------------

/// Art des Voice-Paketes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PaketTyp {
    /// Opus-Audio-Paket
    Audio = 0,
}

impl PaketTyp {
    /// Konvertiert ein Byte in einen `PaketTyp`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Audio),
            _ => None,
        }
    }
}

/// 12-Byte Kopf eines Voice-UDP-Pakets
///
/// Direkte Byte-Serialisierung, kein serde.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaketKopf {
    /// Protokollversion (muss == `PROTOKOLL_VERSION` sein)
    pub version: u8,
    /// Pakettyp
    pub typ: PaketTyp,
    /// Monoton steigende Sequenznummer
    pub sequenz: u32,
    /// Synchronisation Source – eindeutige Senderkennung
    pub ssrc: u32,
}

impl PaketKopf {
    /// Kopf-Groesse in Bytes
    pub const LAENGE: usize = 12;

    /// Erstellt einen neuen Kopf
    pub fn neu(typ: PaketTyp, sequenz: u32, ssrc: u32) -> Self {
        Self {
            version: PROTOKOLL_VERSION,
            typ,
            sequenz,
            ssrc,
        }
    }

    /// Serialisiert den Kopf in ein 12-Byte-Array (big-endian)
    pub fn encode(&self) -> [u8; Self::LAENGE] {
        let mut puffer = [0u8; Self::LAENGE];
        puffer[0] = self.version;
        puffer[1] = self.typ as u8;
        // Bytes 2..4 bleiben reserviert
        puffer[4..8].copy_from_slice(&self.sequenz.to_be_bytes());
        puffer[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        puffer
    }

    /// Deserialisiert einen Kopf aus einem Byte-Slice
    pub fn decode(puffer: &[u8]) -> io::Result<Self> {
        if puffer.len() < Self::LAENGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Paketkopf zu kurz: {} Bytes (erwartet {})",
                    puffer.len(),
                    Self::LAENGE
                ),
            ));
        }

        let version = puffer[0];
        if version != PROTOKOLL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Ungueltige Protokollversion: {version} (erwartet {PROTOKOLL_VERSION})"
                ),
            ));
        }

        let typ = PaketTyp::from_u8(puffer[1]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unbekannter PaketTyp: {}", puffer[1]),
            )
        })?;

        let sequenz = u32::from_be_bytes([puffer[4], puffer[5], puffer[6], puffer[7]]);
        let ssrc = u32::from_be_bytes([puffer[8], puffer[9], puffer[10], puffer[11]]);

        Ok(Self {
            version,
            typ,
            sequenz,
            ssrc,
        })
    }
}

/// Setzt Kopf und Nutzdaten zu einem sendefertigen Paket zusammen
pub fn paket_einpacken(kopf: &PaketKopf, nutzdaten: &[u8]) -> Bytes {
    let mut puffer = BytesMut::with_capacity(PaketKopf::LAENGE + nutzdaten.len());
    puffer.put_slice(&kopf.encode());
    puffer.put_slice(nutzdaten);
    puffer.freeze()
}

/// Erzeugt eine zufaellige SSRC (ohne extra Zufalls-Abhaengigkeit)
pub fn ssrc_erzeugen() -> u32 {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// ---------------------------------------------------------------------------
// UdpVoiceLink
// ---------------------------------------------------------------------------

/// Verbundener Voice-Link zu einem Server
///
/// Stellt den Relays die beiden Kanal-Enden der Transport-Grenze bereit:
/// [`paket_sender`](Self::paket_sender) fuer das Capture-Relay und
/// [`paket_empfaenger`](Self::paket_empfaenger) fuer das Playback-Relay.
pub struct UdpVoiceLink {
    ausgang_tx: Sender<Bytes>,
    eingang_rx: Receiver<Bytes>,
    sende_stopp: Option<Sender<()>>,
    empfangs_stopp: Option<oneshot::Sender<()>>,
    sende_thread: Option<std::thread::JoinHandle<()>>,
    empfangs_task: Option<tokio::task::JoinHandle<()>>,
    lokale_adresse: SocketAddr,
    server_adresse: SocketAddr,
}

impl UdpVoiceLink {
    /// Bindet einen Socket, verbindet ihn mit dem Server und startet
    /// Sende-Thread und Empfangs-Task.
    pub async fn verbinden(
        server: SocketAddr,
        ssrc: u32,
        queue_kapazitaet: usize,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        let lokale_adresse = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (ausgang_tx, ausgang_rx) = bounded::<Bytes>(queue_kapazitaet);
        let (eingang_tx, eingang_rx) = bounded::<Bytes>(queue_kapazitaet);
        let (sende_stopp_tx, sende_stopp_rx) = bounded::<()>(0);
        let (empfangs_stopp_tx, empfangs_stopp_rx) = oneshot::channel::<()>();

        let sende_socket = Arc::clone(&socket);
        let sende_thread = std::thread::Builder::new()
            .name("link-sender".into())
            .spawn(move || {
                sende_schleife(sende_socket, ausgang_rx, sende_stopp_rx, ssrc);
            })?;

        let empfangs_task = tokio::spawn(empfangs_schleife(socket, eingang_tx, empfangs_stopp_rx));

        info!(server = %server, lokal = %lokale_adresse, ssrc, "Voice-Link verbunden");

        Ok(Self {
            ausgang_tx,
            eingang_rx,
            sende_stopp: Some(sende_stopp_tx),
            empfangs_stopp: Some(empfangs_stopp_tx),
            sende_thread: Some(sende_thread),
            empfangs_task: Some(empfangs_task),
            lokale_adresse,
            server_adresse: server,
        })
    }

    /// Ausgangs-Ende fuer das Capture-Relay
    pub fn paket_sender(&self) -> PaketSender {
        self.ausgang_tx.clone()
    }

    /// Eingangs-Ende fuer das Playback-Relay
    pub fn paket_empfaenger(&self) -> PaketEmpfaenger {
        self.eingang_rx.clone()
    }

    /// Lokale Socket-Adresse
    pub fn lokale_adresse(&self) -> SocketAddr {
        self.lokale_adresse
    }

    /// Verbundene Server-Adresse
    pub fn server_adresse(&self) -> SocketAddr {
        self.server_adresse
    }

    /// Trennt den Link. Idempotent; wird unabhaengig vom Zustand der
    /// Relays ausgefuehrt (erzwungener Abbau).
    pub async fn trennen(&mut self) {
        if let Some(stopp) = self.empfangs_stopp.take() {
            let _ = stopp.send(());
        }
        if let Some(task) = self.empfangs_task.take() {
            let _ = task.await;
        }
        // Stopp-Leitung kappen beendet den Sende-Thread auch wenn noch
        // Produzenten am Ausgangs-Kanal haengen
        self.sende_stopp.take();
        if let Some(thread) = self.sende_thread.take() {
            let _ = thread.join();
        }
        debug!(server = %self.server_adresse, "Voice-Link getrennt");
    }
}

impl Drop for UdpVoiceLink {
    fn drop(&mut self) {
        if let Some(stopp) = self.empfangs_stopp.take() {
            let _ = stopp.send(());
        }
        if let Some(task) = self.empfangs_task.take() {
            task.abort();
        }
        self.sende_stopp.take();
        if let Some(thread) = self.sende_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Sende-Schleife: leert den Ausgangs-Kanal und sendet via UDP.
///
/// `try_send` blockiert nicht; Sendefehler kosten nur das eine Paket.
fn sende_schleife(
    socket: Arc<UdpSocket>,
    ausgang: Receiver<Bytes>,
    stopp: Receiver<()>,
    ssrc: u32,
) {
    let mut sequenz: u32 = 0;

    loop {
        let nutzdaten = crossbeam_channel::select! {
            recv(ausgang) -> ergebnis => match ergebnis {
                Ok(nutzdaten) => nutzdaten,
                Err(_) => break,
            },
            recv(stopp) -> _ => break,
        };

        if nutzdaten.len() > MAX_NUTZDATEN_LAENGE {
            warn!(
                bytes = nutzdaten.len(),
                "Paket ueberschreitet Nutzdaten-Limit, verworfen"
            );
            continue;
        }

        let kopf = PaketKopf::neu(PaketTyp::Audio, sequenz, ssrc);
        sequenz = sequenz.wrapping_add(1);
        let paket = paket_einpacken(&kopf, &nutzdaten);

        if let Err(e) = socket.try_send(&paket) {
            trace!("UDP-Sendefehler: {}", e);
        }
    }

    debug!("Link-Sende-Schleife beendet");
}

/// Empfangs-Schleife: nimmt UDP-Pakete an und reiht die Nutzdaten in
/// den Eingangs-Kanal ein (volle Queue: verwerfen).
async fn empfangs_schleife(
    socket: Arc<UdpSocket>,
    eingang: Sender<Bytes>,
    mut stopp: oneshot::Receiver<()>,
) {
    let mut puffer = [0u8; UDP_PUFFER_LAENGE];

    loop {
        tokio::select! {
            ergebnis = socket.recv(&mut puffer) => {
                match ergebnis {
                    Ok(laenge) => {
                        let kopf = match PaketKopf::decode(&puffer[..laenge]) {
                            Ok(kopf) => kopf,
                            Err(e) => {
                                trace!("Ungueltiges Voice-Paket: {}", e);
                                continue;
                            }
                        };

                        let nutzdaten =
                            Bytes::copy_from_slice(&puffer[PaketKopf::LAENGE..laenge]);
                        trace!(sequenz = kopf.sequenz, bytes = nutzdaten.len(), "Paket empfangen");

                        match eingang.try_send(nutzdaten) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                trace!("Eingangs-Queue voll, Paket verworfen");
                            }
                            Err(TrySendError::Disconnected(_)) => break,
                        }
                    }
                    Err(e) => {
                        warn!("UDP-Empfangsfehler: {}", e);
                    }
                }
            }
            _ = &mut stopp => break,
        }
    }

    debug!("Link-Empfangs-Schleife beendet");
}
