//! Modbus register tracing
//!
//! Maps a declarative register catalogue onto Modbus wire operations
//! (TCP or serial/RTU), performs typed encode/decode of register values
//! with multi-word byte-order handling, and runs a continuous poll loop
//! that turns raw register reads into named, typed, scaled values for
//! telemetry.
//!
//! # Architecture
//!
//! - [`register_map`] - validated catalogue of addressable registers,
//!   organized into named event groups, loaded from JSON
//! - [`codec`] - pure scalar <-> register-word conversions parameterized
//!   by data type, scale and byte order
//! - [`client`] - the polling state machine: connect, poll every group,
//!   detect lost connections, reconnect with backoff, write with
//!   validation
//! - [`transport`] - the wire boundary; tokio-modbus handles framing
//! - [`sink`] - telemetry output boundary (schema declaration + per-tick
//!   value logging)
//! - [`sim`] - demo power meter simulator: server-side register store and
//!   a physics-based value generator, for running without hardware
//!
//! # Quick start
//!
//! ```no_run
//! use regtrace::client::ModbusPoller;
//! use regtrace::register_map::RegisterMap;
//! use regtrace::sink::TracingSink;
//! use regtrace::transport::ModbusConnection;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let map = RegisterMap::from_file("registers.json")?;
//!     let transport = ModbusConnection::tcp("192.168.1.100", 502, 1, Duration::from_secs(3));
//!     let shutdown = CancellationToken::new();
//!     let mut poller = ModbusPoller::new(
//!         Box::new(transport),
//!         Some(map),
//!         Box::new(TracingSink),
//!         Duration::from_secs(1),
//!         shutdown,
//!     );
//!     poller.run().await;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod register_map;
pub mod sim;
pub mod sink;
pub mod transport;

pub use client::{AccessError, ClientState, ModbusPoller, PollerStatus};
pub use codec::{decode_value, encode_value, ByteOrder, DataType, Value};
pub use config::AppConfig;
pub use error::{RegTraceError, Result};
pub use register_map::{Register, RegisterMap, RegisterType};
pub use sink::{TelemetrySink, TracingSink};
pub use transport::{ModbusConnection, ModbusTransport};
