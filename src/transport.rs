//! Modbus transport boundary
//!
//! The polling client talks to devices exclusively through the
//! [`ModbusTransport`] trait, which keeps the wire protocol (framing, CRC,
//! transaction handling) delegated to tokio-modbus and lets tests swap in
//! a scripted transport. Failures are typed: a device exception response
//! surfaces as a protocol error and only fails the affected operation,
//! while transport-level failures surface as connection errors and drive
//! the reconnect path.

use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_modbus::client::{rtu, tcp, Client, Context, Reader, Writer};
use tokio_modbus::{ExceptionCode, Slave};
use tracing::debug;

use crate::error::{RegTraceError, Result};

/// Async Modbus transport operations the polling client depends on
#[async_trait]
pub trait ModbusTransport: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
    /// Identity string for logs and status reports, e.g. `tcp://10.0.0.5:502`
    fn describe(&self) -> String;
    fn unit_id(&self) -> u8;

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;
    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>>;
    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>>;

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()>;
    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()>;
    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()>;
}

/// Transport endpoint settings
#[derive(Debug, Clone)]
pub enum TransportSettings {
    Tcp { host: String, port: u16 },
    Rtu { device: String, baudrate: u32 },
}

/// tokio-modbus backed transport for TCP and serial/RTU endpoints
pub struct ModbusConnection {
    settings: TransportSettings,
    unit_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusConnection {
    /// Create a Modbus TCP transport
    pub fn tcp(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            settings: TransportSettings::Tcp {
                host: host.into(),
                port,
            },
            unit_id,
            timeout,
            ctx: None,
        }
    }

    /// Create a Modbus RTU transport over a serial device
    pub fn rtu(device: impl Into<String>, baudrate: u32, unit_id: u8, timeout: Duration) -> Self {
        Self {
            settings: TransportSettings::Rtu {
                device: device.into(),
                baudrate,
            },
            unit_id,
            timeout,
            ctx: None,
        }
    }

    fn context(&mut self) -> Result<(&mut Context, Duration)> {
        let timeout = self.timeout;
        match self.ctx.as_mut() {
            Some(ctx) => Ok((ctx, timeout)),
            None => Err(RegTraceError::NotConnected),
        }
    }
}

fn map_transport_error(err: tokio_modbus::Error) -> RegTraceError {
    match err {
        tokio_modbus::Error::Transport(io) => RegTraceError::ConnectionError(io.to_string()),
        other => RegTraceError::ProtocolError(other.to_string()),
    }
}

/// Run one request with a timeout and flatten tokio-modbus's nested result:
/// outer error = transport failure, inner error = device exception response.
async fn request<T>(
    timeout: Duration,
    fut: impl Future<Output = std::result::Result<std::result::Result<T, ExceptionCode>, tokio_modbus::Error>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Err(_) => Err(RegTraceError::ConnectionError(
            "request timeout, no response from device".to_string(),
        )),
        Ok(Err(err)) => Err(map_transport_error(err)),
        Ok(Ok(Err(code))) => Err(RegTraceError::ProtocolError(format!(
            "device exception: {code:?}"
        ))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

#[async_trait]
impl ModbusTransport for ModbusConnection {
    async fn connect(&mut self) -> Result<()> {
        let slave = Slave(self.unit_id);
        let ctx = match &self.settings {
            TransportSettings::Tcp { host, port } => {
                let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
                    RegTraceError::ConnectionError(format!("invalid address {host}:{port}: {e}"))
                })?;
                match tokio::time::timeout(self.timeout, tcp::connect_slave(addr, slave)).await {
                    Err(_) => {
                        return Err(RegTraceError::ConnectionError(format!(
                            "connection timeout to {}",
                            self.describe()
                        )))
                    }
                    Ok(Err(e)) => {
                        return Err(RegTraceError::ConnectionError(format!(
                            "connect to {} failed: {e}",
                            self.describe()
                        )))
                    }
                    Ok(Ok(ctx)) => ctx,
                }
            }
            TransportSettings::Rtu { device, baudrate } => {
                let builder = tokio_serial::new(device, *baudrate).timeout(self.timeout);
                let stream = tokio_serial::SerialStream::open(&builder).map_err(|e| {
                    RegTraceError::ConnectionError(format!("serial open {device} failed: {e}"))
                })?;
                rtu::attach_slave(stream, slave)
            }
        };
        self.ctx = Some(ctx);
        debug!("transport connected: {}", self.describe());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = ctx.disconnect().await;
            debug!("transport disconnected: {}", self.describe());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn describe(&self) -> String {
        match &self.settings {
            TransportSettings::Tcp { host, port } => format!("tcp://{host}:{port}"),
            TransportSettings::Rtu { device, baudrate } => format!("rtu://{device}@{baudrate}"),
        }
    }

    fn unit_id(&self) -> u8 {
        self.unit_id
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let (ctx, timeout) = self.context()?;
        request(timeout, ctx.read_holding_registers(address, count)).await
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let (ctx, timeout) = self.context()?;
        request(timeout, ctx.read_input_registers(address, count)).await
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        let (ctx, timeout) = self.context()?;
        request(timeout, ctx.read_coils(address, count)).await
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        let (ctx, timeout) = self.context()?;
        request(timeout, ctx.read_discrete_inputs(address, count)).await
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let (ctx, timeout) = self.context()?;
        request(timeout, ctx.write_single_register(address, value)).await
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let (ctx, timeout) = self.context()?;
        request(timeout, ctx.write_multiple_registers(address, values)).await
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()> {
        let (ctx, timeout) = self.context()?;
        request(timeout, ctx.write_single_coil(address, value)).await
    }
}
