//! Modbus polling client
//!
//! Owns the transport connection, the register map and the telemetry sink,
//! and runs the connect / poll / reconnect loop. On-demand named and raw
//! register access share the same transport and report structured
//! outcomes so callers can tell "unknown name" from "not writable" from
//! "transport failure".

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{decode_value, encode_value, Value};
use crate::error::{RegTraceError, Result};
use crate::register_map::{Register, RegisterMap, RegisterType};
use crate::sink::{FieldSpec, TelemetrySink};
use crate::transport::ModbusTransport;

/// Fixed delay between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Substrings that mark an error as a lost connection rather than a
/// device-level failure (matched case-insensitively against the error
/// description)
const CONNECTION_ERROR_INDICATORS: &[&str] = &[
    "connection",
    "timeout",
    "refused",
    "reset",
    "broken pipe",
    "no response",
    "disconnected",
    "not connected",
];

/// Heuristic: does this error indicate the connection is gone?
pub fn is_connection_error(err: &RegTraceError) -> bool {
    let message = err.to_string().to_lowercase();
    CONNECTION_ERROR_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
}

/// Polling client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        }
    }
}

/// Read-only snapshot of the client's state and counters
#[derive(Debug, Clone)]
pub struct PollerStatus {
    pub state: ClientState,
    pub transport: String,
    pub unit_id: u8,
    pub poll_count: u64,
    pub error_count: u64,
    pub poll_interval: Duration,
    pub register_count: usize,
}

/// Outcome classes for named register access
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("register '{name}' not found")]
    NotFound { name: String },

    #[error("register '{name}' is not writable (type: {register_type})")]
    NotWritable {
        name: String,
        register_type: RegisterType,
    },

    #[error("transport failure: {0}")]
    Transport(#[from] RegTraceError),
}

/// A successful named read, echoing the register's definition
#[derive(Debug, Clone)]
pub struct NamedReading {
    pub name: String,
    pub address: u16,
    pub register_type: RegisterType,
    pub unit: String,
    pub value: Value,
}

/// Raw read result: registers or bits, depending on the register family
#[derive(Debug, Clone, PartialEq)]
pub enum RawValues {
    Words(Vec<u16>),
    Bits(Vec<bool>),
}

/// One poll tick's results: (event group name, name -> value pairs)
type GroupValues = Vec<(String, Vec<(String, Value)>)>;

/// Modbus polling client with automatic reconnection
pub struct ModbusPoller {
    transport: Box<dyn ModbusTransport>,
    register_map: Option<RegisterMap>,
    sink: Box<dyn TelemetrySink>,
    poll_interval: Duration,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
    state: ClientState,
    poll_count: u64,
    error_count: u64,
}

impl ModbusPoller {
    pub fn new(
        transport: Box<dyn ModbusTransport>,
        register_map: Option<RegisterMap>,
        sink: Box<dyn TelemetrySink>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            register_map,
            sink,
            poll_interval,
            reconnect_delay: RECONNECT_DELAY,
            shutdown,
            state: ClientState::Disconnected,
            poll_count: 0,
            error_count: 0,
        }
    }

    /// Override the reconnect delay (tests shorten it)
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn register_map(&self) -> Option<&RegisterMap> {
        self.register_map.as_ref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Snapshot of connection state and counters
    pub fn status(&self) -> PollerStatus {
        PollerStatus {
            state: self.state,
            transport: self.transport.describe(),
            unit_id: self.transport.unit_id(),
            poll_count: self.poll_count,
            error_count: self.error_count,
            poll_interval: self.poll_interval,
            register_count: self
                .register_map
                .as_ref()
                .map(|m| m.register_count())
                .unwrap_or(0),
        }
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.state == ClientState::Connected && self.transport.is_connected() {
            return true;
        }
        self.state = ClientState::Connecting;
        let _ = self.transport.disconnect().await;
        info!("Connecting to {}...", self.transport.describe());
        match self.transport.connect().await {
            Ok(()) => {
                self.state = ClientState::Connected;
                info!("Connected to Modbus {}", self.transport.describe());
                true
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                error!("Connection error: {e}");
                false
            }
        }
    }

    fn declare_schema(&mut self) {
        let Some(map) = &self.register_map else {
            return;
        };
        for group in map.events() {
            if group.registers.is_empty() {
                continue;
            }
            let fields: Vec<FieldSpec> = group
                .registers
                .iter()
                .map(|r| FieldSpec {
                    name: r.name.clone(),
                    datatype: r.datatype,
                    unit: r.unit.clone(),
                })
                .collect();
            self.sink.declare_event(&group.name, &fields);
        }
    }

    /// Poll every register group once, in catalogue order.
    ///
    /// A device-level failure on one register omits that register from
    /// the tick; a connection-level failure aborts the tick with an error
    /// so the loop can reconnect.
    async fn poll_groups(&mut self) -> Result<GroupValues> {
        let Some(map) = self.register_map.as_ref() else {
            return Ok(Vec::new());
        };
        let mut results = Vec::with_capacity(map.events().len());
        for group in map.events() {
            let mut values = Vec::with_capacity(group.registers.len());
            for reg in &group.registers {
                if let Some(value) = read_register(self.transport.as_mut(), reg).await? {
                    values.push((reg.name.clone(), value));
                }
            }
            results.push((group.name.clone(), values));
        }
        Ok(results)
    }

    fn log_groups(&mut self, groups: GroupValues) {
        for (group, values) in groups {
            if values.is_empty() {
                continue;
            }
            self.sink.log(&group, &values);
        }
    }

    /// Run the polling loop until the shutdown token fires.
    ///
    /// Reconnects with a fixed retry delay while disconnected; a detected
    /// connection loss skips the inter-poll sleep so the next connect
    /// attempt happens immediately.
    pub async fn run(&mut self) {
        self.declare_schema();
        info!(
            "Poller started: {} registers, interval {:?}",
            self.status().register_count,
            self.poll_interval
        );

        while !self.shutdown.is_cancelled() {
            if !self.ensure_connected().await {
                warn!(
                    "Connection failed, retrying in {:?}...",
                    self.reconnect_delay
                );
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }
                continue;
            }

            match self.poll_groups().await {
                Ok(groups) => {
                    self.log_groups(groups);
                    self.poll_count += 1;
                    if self.poll_count % 10 == 0 {
                        debug!("poll #{} complete", self.poll_count);
                    }
                }
                Err(e) => {
                    self.error_count += 1;
                    error!("Poll error: {e}");
                    if is_connection_error(&e) {
                        warn!("Connection lost, reconnecting...");
                        self.state = ClientState::Disconnected;
                        let _ = self.transport.disconnect().await;
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        let _ = self.transport.disconnect().await;
        self.state = ClientState::Stopped;
        info!("Poller stopped after {} polls", self.poll_count);
    }

    /// Read and decode one register by its definition.
    ///
    /// Returns `Ok(None)` when the device rejected the read (the value is
    /// simply unavailable this tick); connection losses surface as errors.
    pub async fn read_register_value(&mut self, register: &Register) -> Result<Option<Value>> {
        let result = read_register(self.transport.as_mut(), register).await;
        self.track_connection(&result);
        result
    }

    /// Encode and write one register by its definition
    pub async fn write_register_value(
        &mut self,
        register: &Register,
        value: &Value,
    ) -> std::result::Result<(), AccessError> {
        if !register.writable {
            warn!(
                "Register '{}' is not writable (type: {})",
                register.name, register.register_type
            );
            return Err(AccessError::NotWritable {
                name: register.name.clone(),
                register_type: register.register_type,
            });
        }

        let result = if register.register_type == RegisterType::Coil {
            self.transport
                .write_coil(register.address, value.is_truthy())
                .await
        } else {
            let words = encode_value(value, register.datatype, register.scale, register.byte_order);
            if words.len() == 1 {
                self.transport.write_register(register.address, words[0]).await
            } else {
                self.transport.write_registers(register.address, &words).await
            }
        };
        self.track_connection(&result);
        result.map_err(AccessError::from)
    }

    /// Read a register by catalogue name
    pub async fn read_by_name(
        &mut self,
        name: &str,
    ) -> std::result::Result<NamedReading, AccessError> {
        let register = self.resolve(name)?;
        let value = self
            .read_register_value(&register)
            .await
            .map_err(AccessError::from)?
            .ok_or_else(|| {
                AccessError::Transport(RegTraceError::ProtocolError(format!(
                    "read failed for register '{name}'"
                )))
            })?;
        Ok(NamedReading {
            name: register.name,
            address: register.address,
            register_type: register.register_type,
            unit: register.unit,
            value,
        })
    }

    /// Write a register by catalogue name
    pub async fn write_by_name(
        &mut self,
        name: &str,
        value: &Value,
    ) -> std::result::Result<(), AccessError> {
        let register = self.resolve(name)?;
        self.write_register_value(&register, value).await
    }

    /// Read raw registers/bits by address, without catalogue involvement
    pub async fn read_raw(
        &mut self,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<RawValues> {
        let result = match register_type {
            RegisterType::Holding => self
                .transport
                .read_holding_registers(address, count)
                .await
                .map(RawValues::Words),
            RegisterType::Input => self
                .transport
                .read_input_registers(address, count)
                .await
                .map(RawValues::Words),
            RegisterType::Coil => self
                .transport
                .read_coils(address, count)
                .await
                .map(RawValues::Bits),
            RegisterType::DiscreteInput => self
                .transport
                .read_discrete_inputs(address, count)
                .await
                .map(RawValues::Bits),
        };
        self.track_connection(&result);
        result
    }

    /// Write a single holding register by address
    pub async fn write_raw_register(&mut self, address: u16, value: u16) -> Result<()> {
        let result = self.transport.write_register(address, value).await;
        self.track_connection(&result);
        result
    }

    /// Write a single coil by address
    pub async fn write_raw_coil(&mut self, address: u16, value: bool) -> Result<()> {
        let result = self.transport.write_coil(address, value).await;
        self.track_connection(&result);
        result
    }

    fn resolve(&self, name: &str) -> std::result::Result<Register, AccessError> {
        self.register_map
            .as_ref()
            .and_then(|m| m.get_by_name(name))
            .cloned()
            .ok_or_else(|| AccessError::NotFound {
                name: name.to_string(),
            })
    }

    /// Demote to Disconnected when an on-demand operation hit a
    /// connection-level failure, so the loop reconnects promptly
    fn track_connection<T>(&mut self, result: &Result<T>) {
        if let Err(e) = result {
            self.error_count += 1;
            if is_connection_error(e) {
                self.state = ClientState::Disconnected;
            }
        }
    }
}

/// Dispatch one register read to the matching wire operation and decode.
///
/// Free function so the poll loop can iterate the map and drive the
/// transport without overlapping borrows of the poller.
async fn read_register(
    transport: &mut dyn ModbusTransport,
    register: &Register,
) -> Result<Option<Value>> {
    let result = match register.register_type {
        RegisterType::Holding => transport
            .read_holding_registers(register.address, register.count())
            .await
            .and_then(|words| {
                decode_value(&words, register.datatype, register.scale, register.byte_order)
            }),
        RegisterType::Input => transport
            .read_input_registers(register.address, register.count())
            .await
            .and_then(|words| {
                decode_value(&words, register.datatype, register.scale, register.byte_order)
            }),
        RegisterType::Coil => transport
            .read_coils(register.address, 1)
            .await
            .map(|bits| Value::Bool(bits.first().copied().unwrap_or(false))),
        RegisterType::DiscreteInput => transport
            .read_discrete_inputs(register.address, 1)
            .await
            .map(|bits| Value::Bool(bits.first().copied().unwrap_or(false))),
    };

    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_connection_error(&e) => Err(e),
        Err(e) => {
            warn!(
                "Read error for register '{}' at address {}: {e}",
                register.name, register.address
            );
            Ok(None)
        }
    }
}
