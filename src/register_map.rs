//! Register map model
//!
//! A validated, immutable catalogue of addressable Modbus quantities,
//! organized into named event groups. Loaded once at startup from a JSON
//! document; the polling client owns it for the life of the process.
//!
//! Document format:
//!
//! ```json
//! {
//!   "name": "power_meter",
//!   "events": {
//!     "voltage": [
//!       { "address": 0, "name": "voltage_l1", "type": "holding",
//!         "datatype": "float32", "unit": "V", "scale": 1.0 }
//!     ]
//!   }
//! }
//! ```
//!
//! Required fields per register: `address`, `name`. Everything else has a
//! default. Unrecognized `type`, `datatype` or `byte_order` strings fail
//! the load - they are never silently defaulted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::codec::{ByteOrder, DataType};
use crate::error::{RegTraceError, Result};

/// Modbus register family, determining the wire operation and writability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    Holding,
    Input,
    Coil,
    DiscreteInput,
}

impl RegisterType {
    /// Whether the Modbus protocol allows writes to this register family
    pub fn supports_write(&self) -> bool {
        matches!(self, Self::Holding | Self::Coil)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Input => "input",
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete_input",
        }
    }
}

impl Default for RegisterType {
    fn default() -> Self {
        Self::Holding
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single addressable register definition
#[derive(Debug, Clone)]
pub struct Register {
    pub address: u16,
    pub name: String,
    pub register_type: RegisterType,
    pub datatype: DataType,
    pub unit: String,
    pub scale: f64,
    pub byte_order: ByteOrder,
    /// Derived: input registers and discrete inputs are read-only on the
    /// wire, so `writable` is forced false for them no matter what the
    /// document says.
    pub writable: bool,
    pub description: String,
}

impl Register {
    /// Create a register with default type (`holding`) and datatype (`uint16`)
    pub fn new(address: u16, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            register_type: RegisterType::default(),
            datatype: DataType::default(),
            unit: String::new(),
            scale: 1.0,
            byte_order: ByteOrder::default(),
            writable: true,
            description: String::new(),
        }
    }

    pub fn with_type(mut self, register_type: RegisterType) -> Self {
        self.register_type = register_type;
        self.writable = self.writable && register_type.supports_write();
        self
    }

    pub fn with_datatype(mut self, datatype: DataType) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable && self.register_type.supports_write();
        self
    }

    /// Number of consecutive 16-bit registers this value spans
    pub fn count(&self) -> u16 {
        self.datatype.count()
    }
}

fn default_scale() -> f64 {
    1.0
}

fn default_map_name() -> String {
    "modbus".to_string()
}

/// Raw register entry as it appears in the document, before normalization
#[derive(Debug, Deserialize)]
struct RegisterDoc {
    address: u16,
    name: String,
    #[serde(rename = "type", default)]
    register_type: RegisterType,
    #[serde(default)]
    datatype: DataType,
    #[serde(default)]
    unit: String,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    byte_order: ByteOrder,
    #[serde(default)]
    writable: Option<bool>,
    #[serde(default)]
    description: String,
}

impl RegisterDoc {
    fn into_register(self) -> Result<Register> {
        if self.name.is_empty() {
            return Err(RegTraceError::MapError(format!(
                "register at address {} has an empty name",
                self.address
            )));
        }
        let writable = self.register_type.supports_write() && self.writable.unwrap_or(true);
        Ok(Register {
            address: self.address,
            name: self.name,
            register_type: self.register_type,
            datatype: self.datatype,
            unit: self.unit,
            scale: self.scale,
            byte_order: self.byte_order,
            writable,
            description: self.description,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegisterMapDoc {
    #[serde(default = "default_map_name")]
    name: String,
    #[serde(default)]
    description: String,
    // serde_json's preserve_order feature keeps declaration order here,
    // which fixes the stable iteration order of the whole catalogue
    #[serde(default)]
    events: serde_json::Map<String, serde_json::Value>,
}

/// An ordered, named group of registers emitted together per poll tick
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub name: String,
    pub registers: Vec<Register>,
}

/// Immutable collection of register definitions grouped into events
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    pub name: String,
    pub description: String,
    events: Vec<EventGroup>,
}

impl RegisterMap {
    /// Load a register map from a JSON file.
    ///
    /// Fails with a not-found error when the path does not exist and
    /// propagates parse/validation errors.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RegTraceError::NotFound(format!(
                "register map file not found: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let doc: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            RegTraceError::MapError(format!("invalid JSON in {}: {e}", path.display()))
        })?;
        Self::from_document(doc)
    }

    /// Build a register map from a parsed JSON document
    pub fn from_document(doc: serde_json::Value) -> Result<Self> {
        let doc: RegisterMapDoc = serde_json::from_value(doc)
            .map_err(|e| RegTraceError::MapError(format!("invalid register map document: {e}")))?;

        let mut events = Vec::with_capacity(doc.events.len());
        for (group, entries) in doc.events {
            let entries: Vec<RegisterDoc> = serde_json::from_value(entries).map_err(|e| {
                RegTraceError::MapError(format!("invalid register entry in event '{group}': {e}"))
            })?;
            let registers = entries
                .into_iter()
                .map(RegisterDoc::into_register)
                .collect::<Result<Vec<_>>>()?;
            events.push(EventGroup {
                name: group,
                registers,
            });
        }

        Ok(Self {
            name: doc.name,
            description: doc.description,
            events,
        })
    }

    /// Event groups in declaration order
    pub fn events(&self) -> &[EventGroup] {
        &self.events
    }

    /// Event group names in declaration order
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|g| g.name.as_str())
    }

    /// Registers of a single event group
    pub fn get_event(&self, name: &str) -> Option<&[Register]> {
        self.events
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.registers.as_slice())
    }

    /// All registers in stable order: group declaration order, then
    /// per-group order
    pub fn registers(&self) -> impl Iterator<Item = &Register> {
        self.events.iter().flat_map(|g| g.registers.iter())
    }

    pub fn register_count(&self) -> usize {
        self.events.iter().map(|g| g.registers.len()).sum()
    }

    /// Registers that accept writes (excludes input and discrete_input
    /// families regardless of group)
    pub fn writable_registers(&self) -> impl Iterator<Item = &Register> {
        self.registers().filter(|r| r.writable)
    }

    /// First register with the given name, in stable order across groups
    pub fn get_by_name(&self, name: &str) -> Option<&Register> {
        self.registers().find(|r| r.name == name)
    }

    /// First register matching (address, type)
    pub fn get_by_address(&self, address: u16, register_type: RegisterType) -> Option<&Register> {
        self.registers()
            .find(|r| r.address == address && r.register_type == register_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    // ========== Register tests ==========

    #[test]
    fn test_register_defaults() {
        let reg = Register::new(0, "test");
        assert_eq!(reg.register_type, RegisterType::Holding);
        assert_eq!(reg.datatype, DataType::Uint16);
        assert_eq!(reg.byte_order, ByteOrder::Big);
        assert_eq!(reg.scale, 1.0);
        assert_eq!(reg.count(), 1);
        assert!(reg.writable);
    }

    #[test]
    fn test_register_builder_fields() {
        let reg = Register::new(20, "temperature")
            .with_datatype(DataType::Int16)
            .with_scale(0.1)
            .with_byte_order(ByteOrder::LittleSwap)
            .with_unit("degC");
        assert_eq!(reg.scale, 0.1);
        assert_eq!(reg.byte_order, ByteOrder::LittleSwap);
        assert_eq!(reg.unit, "degC");
    }

    #[test]
    fn test_register_count_follows_datatype() {
        assert_eq!(Register::new(0, "t").with_datatype(DataType::Uint16).count(), 1);
        assert_eq!(Register::new(0, "t").with_datatype(DataType::Float32).count(), 2);
        assert_eq!(Register::new(0, "t").with_datatype(DataType::Float64).count(), 4);
    }

    #[test]
    fn test_writable_defaults_true_for_holding_and_coil() {
        assert!(Register::new(0, "t").with_type(RegisterType::Holding).writable);
        assert!(Register::new(0, "t").with_type(RegisterType::Coil).writable);
    }

    #[test]
    fn test_input_registers_never_writable() {
        assert!(!Register::new(0, "t").with_type(RegisterType::Input).writable);
        assert!(
            !Register::new(0, "t")
                .with_type(RegisterType::DiscreteInput)
                .writable
        );
        // Forced false even when explicitly requested
        assert!(
            !Register::new(0, "t")
                .with_type(RegisterType::Input)
                .with_writable(true)
                .writable
        );
    }

    // ========== Document parsing tests ==========

    #[test]
    fn test_from_document_creates_events() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "voltage": [{ "name": "L1", "address": 0 }],
                "current": [{ "name": "L1_current", "address": 6 }],
            }
        }))
        .unwrap();
        let names: Vec<&str> = map.event_names().collect();
        assert_eq!(names, vec!["voltage", "current"]);
        assert_eq!(map.register_count(), 2);
        assert_eq!(map.name, "modbus");
    }

    #[test]
    fn test_mixed_types_in_one_event() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "status": [
                    { "name": "temp", "address": 0, "type": "holding" },
                    { "name": "alarm", "address": 0, "type": "coil" },
                ]
            }
        }))
        .unwrap();
        let regs = map.get_event("status").unwrap();
        assert_eq!(regs[0].register_type, RegisterType::Holding);
        assert_eq!(regs[1].register_type, RegisterType::Coil);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let err = RegisterMap::from_document(json!({
            "events": { "test": [{ "address": 0 }] }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("name"));

        assert!(RegisterMap::from_document(json!({
            "events": { "test": [{ "name": "no_address" }] }
        }))
        .is_err());
    }

    #[test]
    fn test_invalid_enum_values_fail() {
        for doc in [
            json!({ "events": { "t": [{ "name": "r", "address": 0, "type": "bogus" }] } }),
            json!({ "events": { "t": [{ "name": "r", "address": 0, "datatype": "uint128" }] } }),
            json!({ "events": { "t": [{ "name": "r", "address": 0, "byte_order": "middle" }] } }),
        ] {
            assert!(RegisterMap::from_document(doc).is_err());
        }
    }

    #[test]
    fn test_byte_order_parsed_from_document() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "test": [
                    { "name": "big_val", "address": 0, "byte_order": "big" },
                    { "name": "swapped", "address": 2, "byte_order": "big_swap" },
                ]
            }
        }))
        .unwrap();
        assert_eq!(map.get_by_name("big_val").unwrap().byte_order, ByteOrder::Big);
        assert_eq!(
            map.get_by_name("swapped").unwrap().byte_order,
            ByteOrder::BigSwap
        );
    }

    #[test]
    fn test_flat_register_order_is_stable() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "b_group": [
                    { "name": "first", "address": 0 },
                    { "name": "second", "address": 1 },
                ],
                "a_group": [{ "name": "third", "address": 2 }],
            }
        }))
        .unwrap();
        let names: Vec<&str> = map.registers().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(
            map.register_count(),
            map.events().iter().map(|g| g.registers.len()).sum::<usize>()
        );
    }

    #[test]
    fn test_get_by_name_first_match_across_groups() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "primary": [{ "name": "shared", "address": 10 }],
                "secondary": [{ "name": "shared", "address": 20 }],
            }
        }))
        .unwrap();
        assert_eq!(map.get_by_name("shared").unwrap().address, 10);
        assert!(map.get_by_name("nonexistent").is_none());
    }

    #[test]
    fn test_get_by_address_and_type() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "t": [
                    { "name": "hold", "address": 5, "type": "holding" },
                    { "name": "inp", "address": 5, "type": "input" },
                ]
            }
        }))
        .unwrap();
        assert_eq!(
            map.get_by_address(5, RegisterType::Input).unwrap().name,
            "inp"
        );
        assert!(map.get_by_address(6, RegisterType::Holding).is_none());
    }

    #[test]
    fn test_writable_registers_excludes_inputs() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "sensors": [
                    { "name": "temp", "address": 0, "type": "holding" },
                    { "name": "sensor", "address": 1, "type": "input" },
                ],
                "controls": [
                    { "name": "relay", "address": 0, "type": "coil" },
                    { "name": "status", "address": 0, "type": "discrete_input" },
                ],
            }
        }))
        .unwrap();
        let writable: Vec<&str> = map.writable_registers().map(|r| r.name.as_str()).collect();
        assert_eq!(writable, vec!["temp", "relay"]);
    }

    #[test]
    fn test_writable_override_in_document() {
        let map = RegisterMap::from_document(json!({
            "events": {
                "t": [
                    { "name": "locked", "address": 0, "type": "holding", "writable": false },
                    { "name": "forced", "address": 1, "type": "input", "writable": true },
                ]
            }
        }))
        .unwrap();
        assert!(!map.get_by_name("locked").unwrap().writable);
        assert!(!map.get_by_name("forced").unwrap().writable);
    }

    // ========== File loading tests ==========

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let doc = json!({ "events": { "test": [{ "name": "reg", "address": 0 }] } });
        write!(file, "{doc}").unwrap();
        let map = RegisterMap::from_file(file.path()).unwrap();
        assert_eq!(map.register_count(), 1);
    }

    #[test]
    fn test_from_file_not_found() {
        let err = RegisterMap::from_file("/nonexistent/registers.json").unwrap_err();
        assert!(matches!(err, RegTraceError::NotFound(_)));
    }

    #[test]
    fn test_from_file_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = RegisterMap::from_file(file.path()).unwrap_err();
        assert!(matches!(err, RegTraceError::MapError(_)));
    }
}
