//! Externally invokable actions
//!
//! The host framework exposes client operations as named actions with
//! typed parameter schemas. The table is plain data built once and handed
//! to the external action registry; dispatch routes invocations to the
//! poller's ordinary methods and renders JSON payloads.

use serde_json::{json, Value as JsonValue};

use crate::client::{ClientState, ModbusPoller, RawValues};
use crate::codec::Value;
use crate::register_map::RegisterType;

/// Parameter schema for one action argument
#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
        default: Option<f64>,
    },
    Text,
    Select {
        choices: &'static [&'static str],
        default: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub kind: ParamKind,
}

/// One externally invokable action
#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

const ADDRESS_PARAM: ParamSpec = ParamSpec {
    name: "address",
    title: "Address",
    kind: ParamKind::Number {
        minimum: Some(0.0),
        maximum: Some(65535.0),
        default: None,
    },
};

/// Actions exposed to the host framework's registry
pub const ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "get_status",
        title: "Get Status",
        description: "Get connection and polling status",
        params: &[],
    },
    ActionSpec {
        name: "read_register",
        title: "Read Register",
        description: "Read a single register by address",
        params: &[
            ADDRESS_PARAM,
            ParamSpec {
                name: "reg_type",
                title: "Register Type",
                kind: ParamKind::Select {
                    choices: &["holding", "input", "coil", "discrete_input"],
                    default: "holding",
                },
            },
            ParamSpec {
                name: "count",
                title: "Count",
                kind: ParamKind::Number {
                    minimum: Some(1.0),
                    maximum: Some(125.0),
                    default: Some(1.0),
                },
            },
        ],
    },
    ActionSpec {
        name: "write_register",
        title: "Write Register",
        description: "Write a value to a holding register",
        params: &[
            ADDRESS_PARAM,
            ParamSpec {
                name: "value",
                title: "Value",
                kind: ParamKind::Number {
                    minimum: None,
                    maximum: None,
                    default: None,
                },
            },
        ],
    },
    ActionSpec {
        name: "write_coil",
        title: "Write Coil",
        description: "Write a boolean value to a coil",
        params: &[
            ADDRESS_PARAM,
            ParamSpec {
                name: "value",
                title: "Value",
                kind: ParamKind::Select {
                    choices: &["ON", "OFF"],
                    default: "OFF",
                },
            },
        ],
    },
    ActionSpec {
        name: "read_named_register",
        title: "Read Named Register",
        description: "Read a register by name from the map",
        params: &[ParamSpec {
            name: "name",
            title: "Register Name",
            kind: ParamKind::Text,
        }],
    },
    ActionSpec {
        name: "write_named_register",
        title: "Write Named Register",
        description: "Write a value to a register by name",
        params: &[
            ParamSpec {
                name: "name",
                title: "Register Name",
                kind: ParamKind::Text,
            },
            ParamSpec {
                name: "value",
                title: "Value",
                kind: ParamKind::Number {
                    minimum: None,
                    maximum: None,
                    default: None,
                },
            },
        ],
    },
    ActionSpec {
        name: "list_registers",
        title: "List Registers",
        description: "List all registers in the map",
        params: &[],
    },
    ActionSpec {
        name: "list_writable_registers",
        title: "List Writable Registers",
        description: "List all writable registers",
        params: &[],
    },
];

/// Look up an action descriptor by name
pub fn find(name: &str) -> Option<&'static ActionSpec> {
    ACTIONS.iter().find(|a| a.name == name)
}

fn arg_u64(args: &JsonValue, key: &str) -> Option<u64> {
    args.get(key).and_then(JsonValue::as_u64)
}

fn arg_str<'a>(args: &'a JsonValue, key: &str) -> Option<&'a str> {
    args.get(key).and_then(JsonValue::as_str)
}

fn parse_register_type(s: &str) -> Option<RegisterType> {
    match s {
        "holding" => Some(RegisterType::Holding),
        "input" => Some(RegisterType::Input),
        "coil" => Some(RegisterType::Coil),
        "discrete_input" => Some(RegisterType::DiscreteInput),
        _ => None,
    }
}

/// Invoke an action against the poller, returning a JSON payload.
///
/// Unknown actions and malformed arguments come back as
/// `{"error": ..., "success": false}` rather than failing the caller.
pub async fn dispatch(poller: &mut ModbusPoller, name: &str, args: &JsonValue) -> JsonValue {
    match name {
        "get_status" => {
            let status = poller.status();
            json!({
                "connected": status.state == ClientState::Connected,
                "state": status.state.as_str(),
                "transport": status.transport,
                "unit_id": status.unit_id,
                "poll_count": status.poll_count,
                "error_count": status.error_count,
                "poll_interval": status.poll_interval.as_secs_f64(),
                "registers": status.register_count,
            })
        }
        "read_register" => {
            let address = arg_u64(args, "address").unwrap_or(0) as u16;
            let count = arg_u64(args, "count").unwrap_or(1) as u16;
            let reg_type = arg_str(args, "reg_type")
                .and_then(parse_register_type)
                .unwrap_or(RegisterType::Holding);
            match poller.read_raw(reg_type, address, count).await {
                Ok(values) => {
                    let rendered = match values {
                        RawValues::Words(words) => json!(words),
                        RawValues::Bits(bits) => json!(bits),
                    };
                    json!({
                        "address": address,
                        "type": reg_type.as_str(),
                        "count": count,
                        "values": rendered,
                        "success": true,
                    })
                }
                Err(e) => json!({ "error": e.to_string(), "success": false }),
            }
        }
        "write_register" => {
            let address = arg_u64(args, "address").unwrap_or(0) as u16;
            let value = arg_u64(args, "value").unwrap_or(0) as u16;
            match poller.write_raw_register(address, value).await {
                Ok(()) => json!({ "address": address, "value": value, "success": true }),
                Err(e) => json!({ "error": e.to_string(), "success": false }),
            }
        }
        "write_coil" => {
            let address = arg_u64(args, "address").unwrap_or(0) as u16;
            let value = arg_str(args, "value") == Some("ON");
            match poller.write_raw_coil(address, value).await {
                Ok(()) => json!({ "address": address, "value": value, "success": true }),
                Err(e) => json!({ "error": e.to_string(), "success": false }),
            }
        }
        "read_named_register" => {
            let Some(reg_name) = arg_str(args, "name") else {
                return json!({ "error": "missing 'name' argument", "success": false });
            };
            match poller.read_by_name(reg_name).await {
                Ok(reading) => json!({
                    "name": reading.name,
                    "address": reading.address,
                    "type": reading.register_type.as_str(),
                    "value": reading.value,
                    "unit": reading.unit,
                    "success": true,
                }),
                Err(e) => json!({ "error": e.to_string(), "success": false }),
            }
        }
        "write_named_register" => {
            let Some(reg_name) = arg_str(args, "name") else {
                return json!({ "error": "missing 'name' argument", "success": false });
            };
            let value = args
                .get("value")
                .and_then(JsonValue::as_f64)
                .map(Value::Float)
                .unwrap_or(Value::Float(0.0));
            match poller.write_by_name(reg_name, &value).await {
                Ok(()) => json!({ "name": reg_name, "value": value, "success": true }),
                Err(e) => json!({ "error": e.to_string(), "success": false }),
            }
        }
        "list_registers" => {
            let registers: Vec<JsonValue> = poller
                .register_map()
                .map(|map| {
                    map.registers()
                        .map(|r| {
                            json!({
                                "name": r.name,
                                "address": r.address,
                                "type": r.register_type.as_str(),
                                "datatype": r.datatype.as_str(),
                                "unit": r.unit,
                                "writable": r.writable,
                                "byte_order": r.byte_order.as_str(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            json!({ "count": registers.len(), "registers": registers })
        }
        "list_writable_registers" => {
            let registers: Vec<JsonValue> = poller
                .register_map()
                .map(|map| {
                    map.writable_registers()
                        .map(|r| {
                            json!({
                                "name": r.name,
                                "address": r.address,
                                "type": r.register_type.as_str(),
                                "datatype": r.datatype.as_str(),
                                "unit": r.unit,
                                "byte_order": r.byte_order.as_str(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            json!({ "count": registers.len(), "registers": registers })
        }
        other => json!({ "error": format!("unknown action '{other}'"), "success": false }),
    }
}
