//! Configuration for the labwire server binary.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::{Error, Result};
use crate::protocol::{
    Lis1A1Settings, ProtocolConfig, RawSettings, StxEtxSettings,
};
use crate::server::ServerConfig;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Framing protocol selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Transparent byte stream with idle-window flush
    #[default]
    Raw,
    /// `<STX>`…`<ETX>` bracketed frames
    #[value(name = "stxetx")]
    Stxetx,
    /// LIS1-A1 (ASTM E1381) handshake framing
    #[value(name = "lis1a1")]
    Lis1a1,
}

/// Command-line arguments for the labwire server.
#[derive(Parser, Debug, Default)]
#[command(name = "labwire")]
#[command(version = "0.1.0")]
#[command(about = "Instrument interconnect listener", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:4001)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent sessions
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Framing protocol (raw, stxetx or lis1a1)
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration.
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle-session wakeup cadence in milliseconds
    #[serde(default = "default_read_deadline_ms")]
    pub read_deadline_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            read_deadline_ms: default_read_deadline_ms(),
        }
    }
}

/// Protocol selection and tuning.
#[derive(Debug, Deserialize)]
pub struct ProtocolSection {
    /// Which framing protocol sessions speak
    #[serde(default, rename = "type")]
    pub protocol_type: ProtocolType,

    /// Raw: idle window in milliseconds before a buffered message flushes
    #[serde(default = "default_flush_idle_ms")]
    pub flush_idle_ms: u64,
    /// Raw: receive buffer cap in bytes (unbounded when absent)
    pub max_receive_bytes: Option<usize>,

    /// STX/ETX: frame delimiters, for instrument variants
    #[serde(default = "default_start_byte")]
    pub start_byte: u8,
    #[serde(default = "default_end_byte")]
    pub end_byte: u8,

    /// LIS1-A1: longest payload per frame
    #[serde(default = "default_max_frame_payload")]
    pub max_frame_payload: usize,
    /// LIS1-A1: enforce monotone frame numbering on receive
    #[serde(default)]
    pub frame_number_check: bool,
    /// LIS1-A1: take the dominant contention role
    #[serde(default)]
    pub high_priority: bool,
    /// LIS1-A1: reply timeout in seconds
    #[serde(default = "default_inter_frame_timeout_secs")]
    pub inter_frame_timeout_secs: u64,
    /// LIS1-A1: backoff in seconds after a NAKed ENQ
    #[serde(default = "default_nak_backoff_secs")]
    pub nak_backoff_secs: u64,
    /// LIS1-A1: consecutive failures allowed per frame
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            protocol_type: ProtocolType::default(),
            flush_idle_ms: default_flush_idle_ms(),
            max_receive_bytes: None,
            start_byte: default_start_byte(),
            end_byte: default_end_byte(),
            max_frame_payload: default_max_frame_payload(),
            frame_number_check: false,
            high_priority: false,
            inter_frame_timeout_secs: default_inter_frame_timeout_secs(),
            nak_backoff_secs: default_nak_backoff_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl ProtocolSection {
    /// Materialise the settings for the selected protocol.
    pub fn build(&self, protocol_type: ProtocolType) -> ProtocolConfig {
        match protocol_type {
            ProtocolType::Raw => ProtocolConfig::Raw(RawSettings {
                flush_idle: Duration::from_millis(self.flush_idle_ms),
                max_receive_bytes: self.max_receive_bytes.unwrap_or(usize::MAX),
            }),
            ProtocolType::Stxetx => ProtocolConfig::StxEtx(StxEtxSettings {
                start_byte: self.start_byte,
                end_byte: self.end_byte,
            }),
            ProtocolType::Lis1a1 => {
                let mut settings = Lis1A1Settings {
                    max_frame_payload: self.max_frame_payload,
                    frame_number_check: self.frame_number_check,
                    inter_frame_timeout: Duration::from_secs(self.inter_frame_timeout_secs),
                    nak_backoff: Duration::from_secs(self.nak_backoff_secs),
                    max_retries: self.max_retries,
                    ..Lis1A1Settings::default()
                };
                if self.high_priority {
                    settings = settings.high_priority();
                }
                ProtocolConfig::Lis1A1(settings)
            }
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:4001".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_read_deadline_ms() -> u64 {
    200
}

fn default_flush_idle_ms() -> u64 {
    100
}

fn default_start_byte() -> u8 {
    0x02
}

fn default_end_byte() -> u8 {
    0x03
}

fn default_max_frame_payload() -> usize {
    240
}

fn default_inter_frame_timeout_secs() -> u64 {
    15
}

fn default_nak_backoff_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    6
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration for the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self> {
        Self::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self> {
        let toml_config = if let Some(ref path) = cli.config {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::Configuration(format!("failed to read '{}': {e}", path.display()))
            })?;
            toml::from_str(&contents).map_err(|e| {
                Error::Configuration(format!("failed to parse '{}': {e}", path.display()))
            })?
        } else {
            TomlConfig::default()
        };

        let protocol_type = cli
            .protocol
            .unwrap_or(toml_config.protocol.protocol_type);
        let protocol = toml_config.protocol.build(protocol_type);

        let mut server = ServerConfig::new(
            cli.listen.unwrap_or(toml_config.server.listen),
            protocol,
        );
        server.max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        server.read_deadline = Duration::from_millis(toml_config.server.read_deadline_ms);

        let log_level = if cli.log_level != "info" {
            cli.log_level
        } else {
            toml_config.logging.level
        };

        Ok(AppConfig { server, log_level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:4001");
        assert_eq!(config.server.max_connections, 100);
        assert_eq!(config.protocol.protocol_type, ProtocolType::Raw);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:4001"
            max_connections = 8

            [protocol]
            type = "lis1a1"
            frame_number_check = true
            max_retries = 3

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:4001");
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.protocol.protocol_type, ProtocolType::Lis1a1);
        assert!(config.protocol.frame_number_check);
        assert_eq!(config.protocol.max_retries, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_takes_precedence() {
        let cli = CliArgs {
            listen: Some("127.0.0.1:9100".to_string()),
            max_connections: Some(2),
            protocol: Some(ProtocolType::Stxetx),
            log_level: "trace".to_string(),
            ..CliArgs::default()
        };

        let config = AppConfig::resolve(cli).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9100");
        assert_eq!(config.server.max_connections, 2);
        assert!(matches!(
            config.server.protocol,
            ProtocolConfig::StxEtx(_)
        ));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_lis1a1_section_maps_to_settings() {
        let section = ProtocolSection {
            max_frame_payload: 120,
            high_priority: true,
            inter_frame_timeout_secs: 5,
            ..ProtocolSection::default()
        };

        match section.build(ProtocolType::Lis1a1) {
            ProtocolConfig::Lis1A1(settings) => {
                assert_eq!(settings.max_frame_payload, 120);
                assert_eq!(
                    settings.contention_role,
                    crate::protocol::ContentionRole::High
                );
                assert_eq!(settings.inter_frame_timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected protocol: {other:?}"),
        }
    }
}
