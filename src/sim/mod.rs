//! Demo device simulator
//!
//! The server-side half of the wire protocol: an in-memory register store
//! served over Modbus TCP, fed by a physics-based power meter model on a
//! background tick. Lets the polling client be exercised end to end
//! without real hardware.

mod meter;
mod server;
mod store;

pub use meter::{MeterSnapshot, PowerMeterSimulator};
pub use server::{run_demo_server, spawn_updater, SimulatorService};
pub use store::{DeviceStore, SharedStore};

/// Default bind address for the demo server
pub const DEMO_HOST: &str = "127.0.0.1";
pub const DEMO_PORT: u16 = 5020;

/// Register map matching the simulated power meter's layout
pub const POWER_METER_MAP_JSON: &str = include_str!("../../config/power_meter.json");
