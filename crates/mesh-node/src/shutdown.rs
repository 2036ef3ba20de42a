//! Shutdown coordination for the node's background tasks.
//!
//! Timer loops and network bridges each hold a `watch::Receiver<bool>` from
//! [`Shutdown::subscribe`] and exit when it flips to `true`. The owner
//! registers their handles and awaits them with [`Shutdown::join_all`].

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

pub struct Shutdown {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cloneable trigger, e.g. for a Ctrl-C handler.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop_tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            stop_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Resolves once the stop signal is sent.
    pub async fn stopped(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub async fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    /// Idempotent.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Await every registered task. Join errors are ignored.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn stop_and_join(&self) {
        self.signal_stop();
        self.join_all().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_stop_is_visible_to_subscribers() {
        let shutdown = Shutdown::new();
        let rx1 = shutdown.subscribe();
        let rx2 = shutdown.subscribe();
        assert!(!shutdown.is_stopped());

        shutdown.signal_stop();
        shutdown.signal_stop();
        assert!(shutdown.is_stopped());
        assert!(*rx1.borrow());
        assert!(*rx2.borrow());
    }

    #[test]
    fn handle_triggers_stop() {
        let shutdown = Shutdown::new();
        shutdown.handle().shutdown();
        assert!(shutdown.is_stopped());
        assert!(*shutdown.subscribe().borrow());
    }

    #[tokio::test]
    async fn stop_and_join_waits_for_tasks() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        shutdown
            .add_task(tokio::spawn(async move {
                let _ = rx.changed().await;
                let _ = done_tx.send(());
            }))
            .await;

        shutdown.stop_and_join().await;
        assert!(done_rx.await.is_ok());
        assert!(shutdown.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stopped_resolves_after_signal() {
        let shutdown = std::sync::Arc::new(Shutdown::new());
        let waiter = {
            let shutdown = std::sync::Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.stopped().await })
        };
        shutdown.signal_stop();
        waiter.await.unwrap();
    }
}
