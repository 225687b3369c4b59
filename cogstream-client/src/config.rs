//! Configuration for the streaming client.

use std::path::Path;

use cogstream_core::{CogError, DEFAULT_PORT, Endpoint, PayloadType, SessionConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the engine server listens.
    pub network: NetworkConfig,
    /// Session tuning passed straight to the core.
    pub session: SessionConfig,
    /// Where measurement samples go.
    pub measurement_output: MeasurementOutputConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// One synthetic producer per entry.
    pub sources: Vec<SourceConfig>,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `host`, `host:port` or `tcp://host[:port]`.
    pub server: String,
    /// Port used when `server` does not name one.
    pub port: u16,
}

/// How a producer hands frames to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Wait for a token, then build the frame.
    Blocking,
    /// Skip the frame when no token is free.
    NonBlocking,
    /// Wait for a token, then ask the generator (which may produce nothing).
    Supplier,
}

/// One synthetic sensor stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub payload_type: PayloadType,
    /// Frames per second to attempt. 0 sends as fast as tokens allow.
    pub fps: u32,
    /// Payload size in bytes.
    pub payload_size: usize,
    pub mode: SendMode,
    /// Stop after this many frames. 0 runs until the session ends.
    pub max_frames: u64,
    /// In `supplier` mode, every n-th frame yields nothing. 0 disables.
    pub empty_every: u64,
}

/// Measurement sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementOutputConfig {
    /// Log every sample.
    pub log: bool,
    /// Append samples to this CSV file. Empty disables.
    pub csv_path: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            session: SessionConfig::default().with_measurement(10),
            measurement_output: MeasurementOutputConfig::default(),
            logging: LoggingConfig::default(),
            sources: vec![
                SourceConfig::default(),
                SourceConfig {
                    name: "mic".into(),
                    payload_type: PayloadType::Audio,
                    fps: 50,
                    payload_size: 640,
                    mode: SendMode::NonBlocking,
                    ..SourceConfig::default()
                },
            ],
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "cam".into(),
            payload_type: PayloadType::Image,
            fps: 15,
            payload_size: 32 * 1024,
            mode: SendMode::Supplier,
            max_frames: 0,
            empty_every: 0,
        }
    }
}

impl Default for MeasurementOutputConfig {
    fn default() -> Self {
        Self {
            log: true,
            csv_path: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Resolve the server address.
    pub fn endpoint(&self) -> Result<Endpoint, CogError> {
        Endpoint::parse(&self.network.server, self.network.port)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        assert!(text.contains("server"));
        assert!(text.contains("[[sources]]"));
        assert!(text.contains("output_frequency"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, DEFAULT_PORT);
        assert_eq!(parsed.sources.len(), 2);
        assert_eq!(parsed.sources[1].mode, SendMode::NonBlocking);
        assert_eq!(parsed.sources[1].payload_type, PayloadType::Audio);
        assert!(parsed.session.measurement.enabled);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: ClientConfig = toml::from_str(
            r#"
            [network]
            server = "tcp://engine.lan:7000"

            [session]
            token_limit = 1

            [[sources]]
            name = "imu"
            payload_type = "Accelerometer"
            mode = "blocking"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.session.token_limit, Some(1));
        assert_eq!(parsed.sources.len(), 1);
        assert_eq!(parsed.sources[0].fps, 15);
        assert_eq!(parsed.sources[0].mode, SendMode::Blocking);
        assert_eq!(parsed.endpoint().unwrap(), Endpoint::new("engine.lan", 7000));
    }

    #[test]
    fn bad_server_is_rejected() {
        let mut cfg = ClientConfig::default();
        cfg.network.server = "ws://engine".into();
        assert!(cfg.endpoint().is_err());
    }
}
