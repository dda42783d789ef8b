//! A one-shot, cloneable cancellation signal. Every clone observes the same
//! trigger; `wait_async()` resolves the instant any clone calls
//! `trigger()`, and resolves immediately if it already has. This is the
//! primitive the source's sockets, proxies, and sessions all use for
//! cooperative shutdown instead of a strand-level cancellation API.

use tokio::sync::watch;

#[derive(Clone)]
pub struct Trigger {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Trigger {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Trigger {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait_async(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}
