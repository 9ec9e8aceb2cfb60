//! Session-weites Shutdown-Signal und Gnadenfrist
//!
//! Ein Signal pro Session, einmalig ausloesbar, von allen Workern an
//! ihren blockierenden Stellen beobachtet. Implementiert ueber einen
//! crossbeam-Kanal: das Ausloesen laesst den einzigen Sender fallen,
//! wodurch alle Empfaenger (auch innerhalb von `select!`) sofort die
//! Trennung sehen. Einmal ausgeloest ist das Signal endgueltig.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::debug;

/// Lebenszyklus eines Relays
///
/// `Startet -> Gestoppt` direkt bei Initialisierungsfehlern (der
/// Konstruktor gibt dann einen Fehler zurueck, kein Worker entsteht).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayZustand {
    Leerlauf,
    Startet,
    Laeuft,
    Stoppt,
    Gestoppt,
}

/// Ausloeser-Seite des Shutdown-Signals
///
/// Gehoert der Session. Wird der Ausloeser gedroppt ohne explizit
/// ausgeloest worden zu sein, feuert das Signal ebenfalls – eine
/// fallengelassene Session reisst damit keine Worker mit in den Tod,
/// sondern beendet sie kontrolliert.
pub struct ShutdownAusloeser {
    tx: Option<Sender<()>>,
}

/// Beobachter-Seite des Shutdown-Signals
///
/// Beliebig klonbar; jeder Worker haelt einen eigenen Klon.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

/// Erstellt ein neues Signal-Paar fuer eine Session
pub fn shutdown_paar() -> (ShutdownAusloeser, ShutdownSignal) {
    // Kapazitaet 0: es wird nie gesendet, nur die Trennung zaehlt
    let (tx, rx) = bounded::<()>(0);
    (ShutdownAusloeser { tx: Some(tx) }, ShutdownSignal { rx })
}

impl ShutdownAusloeser {
    /// Loest das Signal aus. Idempotent, nicht zuruecknehmbar.
    pub fn ausloesen(&mut self) {
        if let Some(tx) = self.tx.take() {
            drop(tx);
            debug!("Shutdown-Signal ausgeloest");
        }
    }

    /// Gibt zurueck ob bereits ausgeloest wurde
    pub fn ist_ausgeloest(&self) -> bool {
        self.tx.is_none()
    }
}

impl ShutdownSignal {
    /// Nicht-blockierende Abfrage ob das Signal ausgeloest wurde
    pub fn ist_ausgeloest(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Roher Kanal fuer `select!`-Stellen in den Workern
    pub fn kanal(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Wartet mit Frist auf das Ende der uebergebenen Worker-Threads.
///
/// Gibt `true` zurueck wenn alle Threads innerhalb der Frist beendet
/// waren, sonst `false`. Im Frist-Fall laeuft der interne Sammel-Thread
/// verwaist weiter – der Aufrufer faehrt mit dem erzwungenen Abbau fort.
pub fn warte_mit_frist(handles: Vec<JoinHandle<()>>, frist: Duration) -> bool {
    if handles.is_empty() {
        return true;
    }

    let (fertig_tx, fertig_rx) = bounded::<()>(1);
    std::thread::Builder::new()
        .name("relay-abwickler".into())
        .spawn(move || {
            for handle in handles {
                let _ = handle.join();
            }
            let _ = fertig_tx.send(());
        })
        .ok();

    fertig_rx.recv_timeout(frist).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_initial_nicht_ausgeloest() {
        let (ausloeser, signal) = shutdown_paar();
        assert!(!ausloeser.ist_ausgeloest());
        assert!(!signal.ist_ausgeloest());
    }

    #[test]
    fn ausloesen_ist_idempotent() {
        let (mut ausloeser, signal) = shutdown_paar();
        ausloeser.ausloesen();
        ausloeser.ausloesen();
        assert!(ausloeser.ist_ausgeloest());
        assert!(signal.ist_ausgeloest());
    }

    #[test]
    fn alle_klone_sehen_das_signal() {
        let (mut ausloeser, signal) = shutdown_paar();
        let klon = signal.clone();
        ausloeser.ausloesen();
        assert!(signal.ist_ausgeloest());
        assert!(klon.ist_ausgeloest());
    }

    #[test]
    fn drop_des_ausloesers_feuert_das_signal() {
        let (ausloeser, signal) = shutdown_paar();
        drop(ausloeser);
        assert!(signal.ist_ausgeloest());
    }

    #[test]
    fn blockierter_beobachter_wacht_auf() {
        let (mut ausloeser, signal) = shutdown_paar();
        let handle = std::thread::spawn(move || {
            // Blockiert bis zur Trennung
            let _ = signal.kanal().recv();
        });
        ausloeser.ausloesen();
        assert!(
            warte_mit_frist(vec![handle], Duration::from_secs(1)),
            "Beobachter sollte nach dem Ausloesen sofort aufwachen"
        );
    }

    #[test]
    fn frist_eingehalten() {
        let handle = std::thread::spawn(|| {});
        assert!(warte_mit_frist(vec![handle], Duration::from_secs(1)));
    }

    #[test]
    fn frist_ueberschritten() {
        let handle = std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(500));
        });
        assert!(!warte_mit_frist(
            vec![handle],
            Duration::from_millis(20)
        ));
    }

    #[test]
    fn frist_ohne_handles() {
        assert!(warte_mit_frist(Vec::new(), Duration::from_millis(1)));
    }
}
