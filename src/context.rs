//! Process-wide application state.
//!
//! The context is built once before any transport accepts calls and torn
//! down once after the transport stops. Each backend slot is either disabled
//! or holds a constructed backend, connected or not.

use crate::config::Config;
use crate::db::{BackendAdapter, InfluxBackend, MongoBackend, PostgresBackend, RedisBackend};
use crate::models::{BackendKind, BackendStatus, CapabilityToggles, HealthReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// One backend's place in the context.
#[derive(Debug)]
pub enum Slot<T> {
    /// Switched off by configuration; never constructed.
    Disabled,
    Enabled(Arc<T>),
}

impl<T> Slot<T> {
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Slot::Disabled => None,
            Slot::Enabled(backend) => Some(backend),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Slot::Enabled(_))
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Disabled => Slot::Disabled,
            Slot::Enabled(backend) => Slot::Enabled(Arc::clone(backend)),
        }
    }
}

impl<T: BackendAdapter> Slot<T> {
    pub async fn status(&self) -> BackendStatus {
        match self {
            Slot::Disabled => BackendStatus::Disabled,
            Slot::Enabled(backend) => backend.status().await,
        }
    }

    /// Disconnect, logging instead of failing.
    async fn teardown(&self) {
        if let Slot::Enabled(backend) = self {
            if let Err(e) = backend.disconnect().await {
                warn!(backend = %backend.kind(), error = %e, "Disconnect failed during shutdown");
            }
        }
    }
}

/// Construct and connect one backend when its toggle is on.
///
/// A failed connect is logged and the backend is kept: its operations then
/// report the connection failure themselves.
pub async fn bring_up<B, F>(kind: BackendKind, enabled: bool, build: F) -> Slot<B>
where
    B: BackendAdapter,
    F: FnOnce() -> B,
{
    if !enabled {
        info!(backend = %kind, "Backend disabled by configuration");
        return Slot::Disabled;
    }

    let backend = build();
    match backend.connect().await {
        Ok(()) => info!(backend = %kind, target = %backend.target(), "Backend connected"),
        Err(e) => warn!(
            backend = %kind,
            target = %backend.target(),
            error = %e,
            "Backend connection failed, continuing without it"
        ),
    }
    Slot::Enabled(Arc::new(backend))
}

pub struct AppContext {
    toggles: CapabilityToggles,
    operation_timeout: Duration,
    pub postgres: Slot<PostgresBackend>,
    pub redis: Slot<RedisBackend>,
    pub mongodb: Slot<MongoBackend>,
    pub influxdb: Slot<InfluxBackend>,
    shut_down: AtomicBool,
}

impl AppContext {
    /// Build every enabled backend and connect them concurrently. Never
    /// fails: connection problems are logged per backend.
    pub async fn start(config: &Config) -> Self {
        let toggles = config.toggles();
        info!(enabled = ?toggles.enabled(), "Starting backends");

        let (postgres, redis, mongodb, influxdb) = tokio::join!(
            bring_up(BackendKind::Postgres, toggles.postgres, || {
                PostgresBackend::new(config.postgres_descriptor())
            }),
            bring_up(BackendKind::Redis, toggles.redis, || {
                RedisBackend::new(config.redis_descriptor())
            }),
            bring_up(BackendKind::MongoDb, toggles.mongodb, || {
                MongoBackend::new(config.mongodb_descriptor())
            }),
            bring_up(BackendKind::InfluxDb, toggles.influxdb, || {
                InfluxBackend::new(config.influxdb_descriptor())
            }),
        );

        Self {
            toggles,
            operation_timeout: config.operation_timeout_duration(),
            postgres,
            redis,
            mongodb,
            influxdb,
            shut_down: AtomicBool::new(false),
        }
    }

    /// A context with nothing enabled.
    pub fn disabled(operation_timeout: Duration) -> Self {
        Self {
            toggles: CapabilityToggles::all_disabled(),
            operation_timeout,
            postgres: Slot::Disabled,
            redis: Slot::Disabled,
            mongodb: Slot::Disabled,
            influxdb: Slot::Disabled,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn toggles(&self) -> CapabilityToggles {
        self.toggles
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub async fn health(&self) -> HealthReport {
        let (postgres, redis, mongodb, influxdb) = tokio::join!(
            self.postgres.status(),
            self.redis.status(),
            self.mongodb.status(),
            self.influxdb.status(),
        );
        HealthReport::new(postgres, redis, mongodb, influxdb)
    }

    /// Disconnect every constructed backend. Runs once; later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down backends");
        tokio::join!(
            self.postgres.teardown(),
            self.redis.teardown(),
            self.mongodb.teardown(),
            self.influxdb.teardown(),
        );
    }
}
