//! Live listener handles.
//!
//! A [`Subscription`] owns the task that drains one snapshot stream into the
//! coordinator's event channel. Stopping it (or dropping it) aborts the task,
//! which drops the stream and detaches the remote listener.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::{BackendError, SnapshotStream};

pub struct Subscription {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Forward every item of `stream` through `wrap` into `tx` until either
    /// side closes.
    pub fn start<T, E, F>(
        name: &'static str,
        mut stream: SnapshotStream<T>,
        tx: mpsc::UnboundedSender<E>,
        wrap: F,
    ) -> Self
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(Result<Vec<T>, BackendError>) -> E + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                if tx.send(wrap(item)).is_err() {
                    break;
                }
            }
            debug!(subscription = name, "snapshot stream ended");
        });

        Self {
            name,
            handle: Some(handle),
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort without waiting for the listener to detach.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(subscription = self.name, "stopped");
        }
    }

    /// Abort and wait until the forwarding task, and with it the stream, is
    /// gone.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            debug!(subscription = self.name, "shut down");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
