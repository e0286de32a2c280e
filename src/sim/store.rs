//! In-memory device register store
//!
//! Four independent word/bit-addressed tables sized at creation, shared
//! between the Modbus wire service (reads, plus writes to holding and
//! coil cells) and the background value generator (writes). Snapshot
//! application goes through the same codec the client decodes with, so
//! both sides of the wire agree on byte orders.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::codec::{encode_value, ByteOrder, DataType, Value};

use super::meter::MeterSnapshot;

/// Store shared between the wire service and the updater task
pub type SharedStore = Arc<RwLock<DeviceStore>>;

// Holding register layout (float32 values take two registers)
pub const ADDR_VOLTAGE_L1: u16 = 0;
pub const ADDR_VOLTAGE_L2: u16 = 2;
pub const ADDR_VOLTAGE_L3: u16 = 4;
pub const ADDR_CURRENT_L1: u16 = 6;
pub const ADDR_CURRENT_L2: u16 = 8;
pub const ADDR_CURRENT_L3: u16 = 10;
pub const ADDR_POWER_TOTAL: u16 = 12;
pub const ADDR_POWER_FACTOR: u16 = 14;
pub const ADDR_FREQUENCY: u16 = 16;
pub const ADDR_ENERGY_TOTAL: u16 = 18;
pub const ADDR_TEMPERATURE: u16 = 20;

// Writable setpoints
pub const ADDR_VOLTAGE_HIGH: u16 = 100;
pub const ADDR_VOLTAGE_LOW: u16 = 101;
pub const ADDR_POWER_LIMIT: u16 = 102;
pub const ADDR_ENERGY_RESET: u16 = 104;

// Word-swapped calibration floats
pub const ADDR_CAL_FACTOR: u16 = 110;
pub const ADDR_OFFSET_VAL: u16 = 112;

// Coils
pub const ADDR_COIL_RELAY1: u16 = 0;
pub const ADDR_COIL_RELAY2: u16 = 1;
pub const ADDR_COIL_ALARM: u16 = 2;

// Input registers (read-only)
pub const ADDR_IR_FIRMWARE: u16 = 0;
pub const ADDR_IR_SERIAL: u16 = 1;
pub const ADDR_IR_UPTIME: u16 = 3;

// Discrete inputs (read-only booleans)
pub const ADDR_DI_DOOR: u16 = 0;
pub const ADDR_DI_FAULT: u16 = 1;
pub const ADDR_DI_GRID: u16 = 2;

const HOLDING_SIZE: usize = 200;
const INPUT_SIZE: usize = 100;
const COIL_SIZE: usize = 16;
const DISCRETE_SIZE: usize = 16;

/// In-memory coil/discrete/holding/input register tables
#[derive(Debug)]
pub struct DeviceStore {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding: Vec<u16>,
    input: Vec<u16>,
}

impl DeviceStore {
    /// Create a store with empty tables of the given sizes
    pub fn new(coils: usize, discrete_inputs: usize, holding: usize, input: usize) -> Self {
        Self {
            coils: vec![false; coils],
            discrete_inputs: vec![false; discrete_inputs],
            holding: vec![0; holding],
            input: vec![0; input],
        }
    }

    /// Create the demo power meter store with its fixed initial values
    pub fn with_power_meter_defaults() -> Self {
        let mut store = Self::new(COIL_SIZE, DISCRETE_SIZE, HOLDING_SIZE, INPUT_SIZE);

        // Setpoints: 250 V / 210 V limits, 50 kW power limit
        store.set_holding(ADDR_VOLTAGE_HIGH, &[250]);
        store.set_holding(ADDR_VOLTAGE_LOW, &[210]);
        store.put_holding_value(
            ADDR_POWER_LIMIT,
            &Value::Int(50_000),
            DataType::Int32,
            ByteOrder::Big,
        );
        store.put_holding_value(
            ADDR_ENERGY_RESET,
            &Value::Uint(0),
            DataType::Uint32,
            ByteOrder::Big,
        );

        // Calibration floats stored word-swapped
        store.put_holding_value(
            ADDR_CAL_FACTOR,
            &Value::Float(1.0),
            DataType::Float32,
            ByteOrder::BigSwap,
        );
        store.put_holding_value(
            ADDR_OFFSET_VAL,
            &Value::Float(0.0),
            DataType::Float32,
            ByteOrder::BigSwap,
        );

        // Firmware version 0x0102 = v1.2, serial number 12345678
        store.set_input(ADDR_IR_FIRMWARE, &[0x0102]);
        store.put_input_value(
            ADDR_IR_SERIAL,
            &Value::Uint(12_345_678),
            DataType::Uint32,
            ByteOrder::Big,
        );

        // Door closed, no fault, grid connected
        store.set_discrete_input(ADDR_DI_DOOR, false);
        store.set_discrete_input(ADDR_DI_FAULT, false);
        store.set_discrete_input(ADDR_DI_GRID, true);

        store
    }

    // ---- wire-facing reads (None maps to IllegalDataAddress) ----

    pub fn read_holding(&self, address: u16, count: u16) -> Option<Vec<u16>> {
        read_words(&self.holding, address, count)
    }

    pub fn read_input(&self, address: u16, count: u16) -> Option<Vec<u16>> {
        read_words(&self.input, address, count)
    }

    pub fn read_coils(&self, address: u16, count: u16) -> Option<Vec<bool>> {
        read_bits(&self.coils, address, count)
    }

    pub fn read_discrete_inputs(&self, address: u16, count: u16) -> Option<Vec<bool>> {
        read_bits(&self.discrete_inputs, address, count)
    }

    // ---- wire-facing writes ----

    pub fn write_holding(&mut self, address: u16, values: &[u16]) -> bool {
        let start = address as usize;
        let end = start + values.len();
        if end > self.holding.len() {
            return false;
        }
        self.holding[start..end].copy_from_slice(values);
        true
    }

    pub fn write_coil(&mut self, address: u16, value: bool) -> bool {
        match self.coils.get_mut(address as usize) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    // ---- generator-facing writes ----

    fn set_holding(&mut self, address: u16, values: &[u16]) {
        self.write_holding(address, values);
    }

    fn set_input(&mut self, address: u16, values: &[u16]) {
        let start = address as usize;
        let end = start + values.len();
        if end <= self.input.len() {
            self.input[start..end].copy_from_slice(values);
        }
    }

    pub fn set_discrete_input(&mut self, address: u16, value: bool) {
        if let Some(cell) = self.discrete_inputs.get_mut(address as usize) {
            *cell = value;
        }
    }

    pub fn discrete_input(&self, address: u16) -> bool {
        self.discrete_inputs
            .get(address as usize)
            .copied()
            .unwrap_or(false)
    }

    fn put_holding_value(
        &mut self,
        address: u16,
        value: &Value,
        datatype: DataType,
        byte_order: ByteOrder,
    ) {
        let words = encode_value(value, datatype, 1.0, byte_order);
        self.set_holding(address, &words);
    }

    fn put_input_value(
        &mut self,
        address: u16,
        value: &Value,
        datatype: DataType,
        byte_order: ByteOrder,
    ) {
        let words = encode_value(value, datatype, 1.0, byte_order);
        self.set_input(address, &words);
    }

    /// Write one meter snapshot into the tables, using the byte orders the
    /// demo register map declares for each field
    pub fn apply_snapshot(&mut self, snap: &MeterSnapshot, uptime_hours: u32) {
        let floats = [
            (ADDR_VOLTAGE_L1, snap.voltage_l1),
            (ADDR_VOLTAGE_L2, snap.voltage_l2),
            (ADDR_VOLTAGE_L3, snap.voltage_l3),
            (ADDR_CURRENT_L1, snap.current_l1),
            (ADDR_CURRENT_L2, snap.current_l2),
            (ADDR_CURRENT_L3, snap.current_l3),
            (ADDR_POWER_TOTAL, snap.power_total),
            (ADDR_POWER_FACTOR, snap.power_factor),
            (ADDR_FREQUENCY, snap.frequency),
        ];
        for (address, value) in floats {
            self.put_holding_value(
                address,
                &Value::Float(value),
                DataType::Float32,
                ByteOrder::Big,
            );
        }

        self.put_holding_value(
            ADDR_ENERGY_TOTAL,
            &Value::Uint(snap.energy_total),
            DataType::Uint32,
            ByteOrder::Big,
        );

        // The map declares temperature as int16 with scale 0.1, so the
        // encode divides by the scale and stores tenths of a degree
        let temp_words = encode_value(
            &Value::Float(snap.temperature),
            DataType::Int16,
            0.1,
            ByteOrder::Big,
        );
        self.set_holding(ADDR_TEMPERATURE, &temp_words);

        self.write_coil(ADDR_COIL_RELAY1, snap.relay1);
        self.write_coil(ADDR_COIL_RELAY2, snap.relay2);
        self.write_coil(ADDR_COIL_ALARM, snap.alarm);

        self.put_input_value(
            ADDR_IR_UPTIME,
            &Value::Uint(u64::from(uptime_hours)),
            DataType::Uint32,
            ByteOrder::Big,
        );
    }
}

fn read_words(table: &[u16], address: u16, count: u16) -> Option<Vec<u16>> {
    let start = address as usize;
    let end = start.checked_add(count as usize)?;
    if count == 0 || end > table.len() {
        return None;
    }
    Some(table[start..end].to_vec())
}

fn read_bits(table: &[bool], address: u16, count: u16) -> Option<Vec<bool>> {
    let start = address as usize;
    let end = start.checked_add(count as usize)?;
    if count == 0 || end > table.len() {
        return None;
    }
    Some(table[start..end].to_vec())
}
