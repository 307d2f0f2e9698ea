//! The interface every backend implements, plus the connection slot the
//! single-client backends keep their live handle in.

use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, BackendStatus};
use std::future::Future;
use tokio::sync::RwLock;
use tracing::debug;

/// Lifecycle shared by the relational, key-value, document and time-series
/// backends.
///
/// Operations invoked before `connect` succeeds, or after `disconnect`, fail
/// with a connection error instead of silently doing nothing.
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Display-safe description of what this backend points at.
    fn target(&self) -> String;

    /// Open the client handle(s).
    fn connect(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Close the client handle(s). Safe to call when never connected.
    fn disconnect(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Cheap round trip used by the health surface.
    fn ping(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Health status derived from `ping`.
    fn status(&self) -> impl Future<Output = BackendStatus> + Send {
        async move {
            match self.ping().await {
                Ok(()) => BackendStatus::Connected,
                Err(e) => {
                    debug!(backend = %self.kind(), error = %e, "Health probe failed");
                    BackendStatus::Disconnected
                }
            }
        }
    }
}

/// Holds a backend's client once connected.
///
/// Clients are cheap to clone (they wrap an internal `Arc`), so `get` hands
/// out a clone and releases the lock before any I/O happens.
#[derive(Debug)]
pub struct ClientHandle<T> {
    kind: BackendKind,
    inner: RwLock<Option<T>>,
}

impl<T: Clone> ClientHandle<T> {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(None),
        }
    }

    /// The live client, or "Not connected to <Backend>".
    pub async fn get(&self) -> DbResult<T> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or_else(|| DbError::not_connected(self.kind))
    }

    /// Install a client, returning the one it replaces.
    pub async fn set(&self, client: T) -> Option<T> {
        self.inner.write().await.replace(client)
    }

    /// Remove the client so later calls fail as not connected.
    pub async fn take(&self) -> Option<T> {
        self.inner.write().await.take()
    }
}
