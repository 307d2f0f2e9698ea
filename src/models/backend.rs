//! Backend kinds, capability toggles and health status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The four supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Redis,
    MongoDb,
    InfluxDb,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Postgres,
        BackendKind::Redis,
        BackendKind::MongoDb,
        BackendKind::InfluxDb,
    ];

    /// Identifier used in envelopes, tool prefixes and resource URI schemes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Redis => "redis",
            Self::MongoDb => "mongodb",
            Self::InfluxDb => "influxdb",
        }
    }

    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Redis => "Redis",
            Self::MongoDb => "MongoDB",
            Self::InfluxDb => "InfluxDB",
        }
    }

    /// Resolve a resource URI scheme back to its backend.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == scheme)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Which backends participate in this process. Read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityToggles {
    pub postgres: bool,
    pub redis: bool,
    pub mongodb: bool,
    pub influxdb: bool,
}

impl CapabilityToggles {
    pub fn all_enabled() -> Self {
        Self {
            postgres: true,
            redis: true,
            mongodb: true,
            influxdb: true,
        }
    }

    pub fn all_disabled() -> Self {
        Self {
            postgres: false,
            redis: false,
            mongodb: false,
            influxdb: false,
        }
    }

    pub fn is_enabled(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Postgres => self.postgres,
            BackendKind::Redis => self.redis,
            BackendKind::MongoDb => self.mongodb,
            BackendKind::InfluxDb => self.influxdb,
        }
    }

    pub fn enabled(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.is_enabled(*k))
            .collect()
    }
}

impl Default for CapabilityToggles {
    fn default() -> Self {
        Self::all_enabled()
    }
}

/// Per-backend connectivity as reported by the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Connected,
    Disconnected,
    Disabled,
}

/// Health of every backend at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HealthReport {
    /// "ok" when every enabled backend is connected, "degraded" otherwise
    pub status: String,
    pub postgres: BackendStatus,
    pub redis: BackendStatus,
    pub mongodb: BackendStatus,
    pub influxdb: BackendStatus,
}

impl HealthReport {
    pub fn new(
        postgres: BackendStatus,
        redis: BackendStatus,
        mongodb: BackendStatus,
        influxdb: BackendStatus,
    ) -> Self {
        let degraded = [postgres, redis, mongodb, influxdb]
            .contains(&BackendStatus::Disconnected);
        Self {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            postgres,
            redis,
            mongodb,
            influxdb,
        }
    }

    pub fn get(&self, kind: BackendKind) -> BackendStatus {
        match kind {
            BackendKind::Postgres => self.postgres,
            BackendKind::Redis => self.redis,
            BackendKind::MongoDb => self.mongodb,
            BackendKind::InfluxDb => self.influxdb,
        }
    }
}
