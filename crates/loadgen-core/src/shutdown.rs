use std::sync::Arc;

use tokio::sync::watch;

/// Run-wide stop flag. Clones share the flag; once triggered it stays set.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self { Self::new() }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn trigger(&self) { self.tx.send_replace(true); }

    pub fn is_triggered(&self) -> bool { *self.rx.borrow() }

    /// Resolves once `trigger` has been called, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let fired = rx.wait_for(|stop| *stop).await.is_ok();
        if !fired {
            // Unreachable while `self` holds the sender.
            std::future::pending::<()>().await;
        }
    }
}
