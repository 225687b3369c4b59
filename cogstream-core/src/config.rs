//! Per-session configuration.
//!
//! Every tunable is passed explicitly when a session is constructed; the
//! engine keeps no process-wide settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CogError;

/// Measurement window used when none is configured.
pub const DEFAULT_OUTPUT_FREQUENCY: u32 = 10;

/// Send timestamps kept per source before the oldest are evicted.
pub const DEFAULT_MAX_PENDING_SENDS: usize = 1024;

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on the per-source allowance announced by the server.
    /// `None` accepts whatever the server declares.
    pub token_limit: Option<u32>,
    /// Give up blocking token and handshake waits after this many
    /// milliseconds. `None` waits until the session stops.
    pub acquire_timeout_ms: Option<u64>,
    /// Round-trip / throughput measurement.
    pub measurement: MeasurementConfig,
}

/// Measurement layer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub enabled: bool,
    /// Emit one interval sample every this many responses per source.
    pub output_frequency: u32,
    /// Bound on remembered send timestamps per source.
    pub max_pending_sends: usize,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_frequency: DEFAULT_OUTPUT_FREQUENCY,
            max_pending_sends: DEFAULT_MAX_PENDING_SENDS,
        }
    }
}

impl SessionConfig {
    pub fn with_token_limit(mut self, limit: u32) -> Self {
        self.token_limit = Some(limit);
        self
    }

    pub fn with_measurement(mut self, output_frequency: u32) -> Self {
        self.measurement.enabled = true;
        self.measurement.output_frequency = output_frequency;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), CogError> {
        if self.measurement.enabled && self.measurement.output_frequency == 0 {
            return Err(CogError::Config(
                "measurement.output_frequency must be at least 1".into(),
            ));
        }
        if self.measurement.enabled && self.measurement.max_pending_sends == 0 {
            return Err(CogError::Config(
                "measurement.max_pending_sends must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded_and_unmeasured() {
        let cfg = SessionConfig::default();
        assert!(cfg.token_limit.is_none());
        assert!(cfg.acquire_timeout().is_none());
        assert!(!cfg.measurement.enabled);
        assert_eq!(cfg.measurement.output_frequency, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builders_set_fields() {
        let cfg = SessionConfig::default()
            .with_token_limit(3)
            .with_measurement(5)
            .with_acquire_timeout(Duration::from_millis(250));
        assert_eq!(cfg.token_limit, Some(3));
        assert!(cfg.measurement.enabled);
        assert_eq!(cfg.measurement.output_frequency, 5);
        assert_eq!(cfg.acquire_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_output_frequency_rejected() {
        let cfg = SessionConfig::default().with_measurement(0);
        assert!(matches!(cfg.validate(), Err(CogError::Config(_))));
    }
}
