//! Cooperative shutdown signal shared by the sampling loops

use tokio::sync::watch;

/// Fires the shutdown signal for every [`Shutdown`] handle
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // No receivers left means nobody is waiting
        let _ = self.tx.send(true);
    }
}

/// Cloneable handle that sampling loops wait on
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

/// Create a linked trigger/handle pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx: Some(rx) })
}

impl Shutdown {
    /// A handle that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve once shutdown has been requested
    ///
    /// Stays pending forever when the trigger was dropped without firing.
    pub async fn triggered(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}
