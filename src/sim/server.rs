//! Demo Modbus TCP server and background value updater
//!
//! Serves the shared [`DeviceStore`](super::DeviceStore) over Modbus TCP
//! using tokio-modbus's server framework, while a separate task advances
//! the power meter model and writes each snapshot into the store. The
//! updater ticks faster than any sensible client poll interval so polled
//! values always look live.

use std::future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tokio_modbus::{ExceptionCode, Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RegTraceError, Result};

use super::meter::PowerMeterSimulator;
use super::store::{SharedStore, ADDR_DI_DOOR};

/// Modbus service answering requests from the shared device store
#[derive(Clone)]
pub struct SimulatorService {
    store: SharedStore,
}

impl SimulatorService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn handle(&self, req: Request<'static>) -> std::result::Result<Response, ExceptionCode> {
        match req {
            Request::ReadCoils(address, count) => self
                .store
                .read()
                .read_coils(address, count)
                .map(Response::ReadCoils)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::ReadDiscreteInputs(address, count) => self
                .store
                .read()
                .read_discrete_inputs(address, count)
                .map(Response::ReadDiscreteInputs)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::ReadHoldingRegisters(address, count) => self
                .store
                .read()
                .read_holding(address, count)
                .map(Response::ReadHoldingRegisters)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::ReadInputRegisters(address, count) => self
                .store
                .read()
                .read_input(address, count)
                .map(Response::ReadInputRegisters)
                .ok_or(ExceptionCode::IllegalDataAddress),
            Request::WriteSingleRegister(address, value) => {
                if self.store.write().write_holding(address, &[value]) {
                    Ok(Response::WriteSingleRegister(address, value))
                } else {
                    Err(ExceptionCode::IllegalDataAddress)
                }
            }
            Request::WriteMultipleRegisters(address, values) => {
                if self.store.write().write_holding(address, &values) {
                    Ok(Response::WriteMultipleRegisters(address, values.len() as u16))
                } else {
                    Err(ExceptionCode::IllegalDataAddress)
                }
            }
            Request::WriteSingleCoil(address, value) => {
                if self.store.write().write_coil(address, value) {
                    Ok(Response::WriteSingleCoil(address, value))
                } else {
                    Err(ExceptionCode::IllegalDataAddress)
                }
            }
            _ => Err(ExceptionCode::IllegalFunction),
        }
    }
}

impl tokio_modbus::server::Service for SimulatorService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<std::result::Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req))
    }
}

/// Run the demo Modbus TCP server until the shutdown token fires
pub async fn run_demo_server(
    addr: SocketAddr,
    store: SharedStore,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RegTraceError::ConnectionError(format!("bind {addr} failed: {e}")))?;
    info!("Demo Modbus server listening on {addr}");

    let server = Server::new(listener);
    let service = SimulatorService::new(store);
    let on_connected = move |stream, socket_addr| {
        let service = service.clone();
        async move {
            debug!("simulator connection from {socket_addr}");
            accept_tcp_connection(stream, socket_addr, move |_addr| Ok(Some(service.clone())))
        }
    };
    let on_process_error = |err| {
        warn!("simulator connection error: {err}");
    };

    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Demo Modbus server stopped");
            Ok(())
        }
        result = server.serve(&on_connected, on_process_error) => {
            result.map_err(|e| RegTraceError::IoError(e.to_string()))
        }
    }
}

/// Spawn the background tick that feeds meter snapshots into the store
pub fn spawn_updater(
    store: SharedStore,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sim = PowerMeterSimulator::new();
        let mut ticker = tokio::time::interval(interval);
        let mut last = Instant::now();
        debug!("simulator updater started (tick {interval:?})");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let dt = (now - last).as_secs_f64();
            last = now;

            let snap = sim.update(dt);
            let uptime_hours = (sim.uptime().as_secs() / 3600) as u32;

            {
                let mut store = store.write();
                store.apply_snapshot(&snap, uptime_hours);

                // The cabinet door opens or closes now and then
                if rand::random::<f64>() < 0.01 {
                    let open = store.discrete_input(ADDR_DI_DOOR);
                    store.set_discrete_input(ADDR_DI_DOOR, !open);
                }
            }
        }
        debug!("simulator updater stopped");
    })
}
