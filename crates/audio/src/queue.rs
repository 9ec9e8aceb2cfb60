//! Begrenzte Frame-Queue
//!
//! Das einzige geteilte Zustandsstueck zwischen Geraete-Callback und
//! Worker: ein Postfach fester Kapazitaet mit nicht-blockierendem
//! try-push. Ist die Queue voll, schlaegt der Push fehl und der
//! Aufrufer verwirft das Element – der Echtzeit-Thread blockiert nie
//! und die Queue waechst nie. Verworfene Elemente werden gezaehlt.
//!
//! Pro Richtung gibt es genau eine Producer- und eine Consumer-Rolle.
//! Die Queue schliesst sobald alle Producer gedroppt sind; ein
//! blockierender Pop kehrt dann mit `None` zurueck.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::shutdown::ShutdownSignal;

/// Schreibseite der Queue (laeuft im Geraete-Callback bzw. Worker)
pub struct QueueProducer<T> {
    tx: Sender<T>,
    verworfen: Arc<AtomicU64>,
}

/// Leseseite der Queue (laeuft im Worker bzw. Geraete-Callback)
pub struct QueueConsumer<T> {
    rx: Receiver<T>,
    verworfen: Arc<AtomicU64>,
}

/// Erstellt eine begrenzte Queue mit fester Kapazitaet
pub fn begrenzte_queue<T>(kapazitaet: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = bounded(kapazitaet);
    let verworfen = Arc::new(AtomicU64::new(0));
    (
        QueueProducer {
            tx,
            verworfen: Arc::clone(&verworfen),
        },
        QueueConsumer { rx, verworfen },
    )
}

impl<T> QueueProducer<T> {
    /// Nicht-blockierender Push.
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist;
    /// bei voller Queue wird der Verwurf gezaehlt. Blockiert nie.
    pub fn try_push(&self, wert: T) -> bool {
        match self.tx.try_send(wert) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.verworfen.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Aktuelle Anzahl wartender Elemente
    pub fn laenge(&self) -> usize {
        self.tx.len()
    }

    /// Anzahl wegen voller Queue verworfener Elemente
    pub fn verworfene(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }
}

// Manuell statt derive: T muss dafuer nicht Clone sein
impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            verworfen: Arc::clone(&self.verworfen),
        }
    }
}

impl<T> QueueConsumer<T> {
    /// Blockierender Pop; `None` sobald die Queue geschlossen und leer ist
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Nicht-blockierender Pop fuer den Ausgabe-Callback
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Blockierender Pop der zusaetzlich das Shutdown-Signal beobachtet.
    ///
    /// `None` bedeutet: Queue geschlossen (und leer) oder Signal
    /// ausgeloest – der Worker beendet sich in beiden Faellen.
    pub fn pop_oder_abbruch(&self, signal: &ShutdownSignal) -> Option<T> {
        crossbeam_channel::select! {
            recv(self.rx) -> ergebnis => ergebnis.ok(),
            recv(signal.kanal()) -> _ => None,
        }
    }

    /// Aktuelle Anzahl wartender Elemente
    pub fn laenge(&self) -> usize {
        self.rx.len()
    }

    /// Anzahl wegen voller Queue verworfener Elemente
    pub fn verworfene(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }
}
