use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use brevrpc_common::protocol::service_key;

pub const DEFAULT_WEIGHT: u32 = 50;
pub const MAX_WEIGHT: u32 = 100;
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(5 * 60);

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One addressable instance of a service version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub service_name: String,
    pub service_version: String,
    pub address: String,
    pub port: u16,
    /// Declared weight, 0 to 100.
    pub weight: u32,
    /// Registration time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    pub warmup: Duration,
}

impl Endpoint {
    /// Creates an endpoint registered now, with the default weight and warm-up.
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            address: address.into(),
            port,
            weight: DEFAULT_WEIGHT,
            created_at_ms: now_millis(),
            warmup: DEFAULT_WARMUP,
        }
    }

    /// Sets the declared weight, clamped to 100.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.min(MAX_WEIGHT);
        self
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_created_at(mut self, created_at_ms: u64) -> Self {
        self.created_at_ms = created_at_ms;
        self
    }

    pub fn service_key(&self) -> String {
        service_key(&self.service_name, &self.service_version)
    }

    /// Connection identity, `address:port`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Weight used for selection at `now_ms`.
    ///
    /// While the endpoint is younger than its warm-up period the declared
    /// weight ramps up linearly, never dropping below 1.
    pub fn effective_weight(&self, now_ms: u64) -> u32 {
        let weight = self.weight;
        if weight == 0 || self.created_at_ms == 0 {
            return weight;
        }
        let warmup = self.warmup.as_millis() as u64;
        let uptime = now_ms.saturating_sub(self.created_at_ms);
        if uptime > 0 && uptime < warmup {
            let ramped = (uptime as f64 / (warmup as f64 / weight as f64)) as u32;
            return ramped.clamp(1, weight);
        }
        weight
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}@{}:{}",
            self.service_name, self.service_version, self.address, self.port
        )
    }
}

/// Effective weights of `candidates` at `now_ms`.
pub(crate) fn effective_weights(candidates: &[Endpoint], now_ms: u64) -> Vec<u32> {
    candidates.iter().map(|e| e.effective_weight(now_ms)).collect()
}
