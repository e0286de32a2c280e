//! Service configuration
//!
//! Loaded from an optional JSON file merged with `REGTRACE_`-prefixed
//! environment variables over built-in defaults. Invalid values abort
//! startup; everything downstream trusts the config.

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RegTraceError, Result};
use crate::transport::ModbusConnection;

/// Which Modbus transport to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Rtu,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Tcp
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    502
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baudrate() -> u32 {
    9600
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout() -> f64 {
    3.0
}

fn default_poll_interval() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportKind,

    /// TCP host address
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serial device for RTU
    #[serde(default = "default_serial_port")]
    pub serial_port: String,

    /// Serial baudrate for RTU
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// Modbus slave/unit ID
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,

    /// Path to the register map JSON file
    #[serde(default)]
    pub register_map_file: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Use the built-in power meter simulator instead of real hardware
    #[serde(default)]
    pub demo: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            serial_port: default_serial_port(),
            baudrate: default_baudrate(),
            unit_id: default_unit_id(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            register_map_file: None,
            log_level: default_log_level(),
            demo: false,
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then the JSON file (when given),
    /// then `REGTRACE_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            // file_exact: a config file the caller named must exist
            figment = figment.merge(Json::file_exact(path));
        }
        figment
            .merge(Env::prefixed("REGTRACE_"))
            .extract()
            .map_err(|e| RegTraceError::ConfigError(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }

    /// Build the transport this configuration describes
    pub fn build_transport(&self) -> ModbusConnection {
        match self.transport {
            TransportKind::Tcp => ModbusConnection::tcp(
                self.host.clone(),
                self.port,
                self.unit_id,
                self.request_timeout(),
            ),
            TransportKind::Rtu => ModbusConnection::rtu(
                self.serial_port.clone(),
                self.baudrate,
                self.unit_id,
                self.request_timeout(),
            ),
        }
    }
}
