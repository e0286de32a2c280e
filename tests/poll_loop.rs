//! Polling client integration tests
//!
//! Drive the poll loop against a scripted in-memory transport: no
//! sockets, no hardware, deterministic failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use regtrace::client::{AccessError, ClientState, ModbusPoller};
use regtrace::codec::Value;
use regtrace::error::{RegTraceError, Result};
use regtrace::register_map::RegisterMap;
use regtrace::sink::MemorySink;
use regtrace::transport::ModbusTransport;

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_attempts: u64,
    write_calls: u64,
    /// Error returned by every read when set
    fail_reads_with: Option<RegTraceError>,
    /// Addresses whose holding-register reads fail with a device exception
    fail_addresses: HashSet<u16>,
    holding: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    written_registers: Vec<(u16, Vec<u16>)>,
}

#[derive(Clone, Default)]
struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn new() -> Self {
        Self::default()
    }

    fn seed_holding(&self, address: u16, words: &[u16]) {
        let mut state = self.state.lock();
        for (i, word) in words.iter().enumerate() {
            state.holding.insert(address + i as u16, *word);
        }
    }

    fn seed_coil(&self, address: u16, value: bool) {
        self.state.lock().coils.insert(address, value);
    }

    fn fail_reads_with(&self, err: RegTraceError) {
        self.state.lock().fail_reads_with = Some(err);
    }

    fn fail_address(&self, address: u16) {
        self.state.lock().fail_addresses.insert(address);
    }

    fn connect_attempts(&self) -> u64 {
        self.state.lock().connect_attempts
    }

    fn write_calls(&self) -> u64 {
        self.state.lock().write_calls
    }

    fn written_registers(&self) -> Vec<(u16, Vec<u16>)> {
        self.state.lock().written_registers.clone()
    }

    fn check_read(&self, address: u16) -> Result<()> {
        let state = self.state.lock();
        if !state.connected {
            return Err(RegTraceError::NotConnected);
        }
        if let Some(err) = &state.fail_reads_with {
            return Err(err.clone());
        }
        if state.fail_addresses.contains(&address) {
            return Err(RegTraceError::ProtocolError(
                "device exception: IllegalDataAddress".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ModbusTransport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn describe(&self) -> String {
        "mock://device".to_string()
    }

    fn unit_id(&self) -> u8 {
        1
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.check_read(address)?;
        let state = self.state.lock();
        Ok((address..address + count)
            .map(|a| state.holding.get(&a).copied().unwrap_or(0))
            .collect())
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.read_holding_registers(address, count).await
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        self.check_read(address)?;
        let state = self.state.lock();
        Ok((address..address + count)
            .map(|a| state.coils.get(&a).copied().unwrap_or(false))
            .collect())
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        self.read_coils(address, count).await
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let mut state = self.state.lock();
        state.write_calls += 1;
        state.holding.insert(address, value);
        state.written_registers.push((address, vec![value]));
        Ok(())
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let mut state = self.state.lock();
        state.write_calls += 1;
        for (i, value) in values.iter().enumerate() {
            state.holding.insert(address + i as u16, *value);
        }
        state.written_registers.push((address, values.to_vec()));
        Ok(())
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.write_calls += 1;
        state.coils.insert(address, value);
        Ok(())
    }
}

fn test_map() -> RegisterMap {
    RegisterMap::from_document(serde_json::from_str(
        r#"{
            "name": "bench",
            "events": {
                "measurements": [
                    { "address": 0, "name": "pressure", "datatype": "float32", "unit": "bar" },
                    { "address": 2, "name": "flow", "datatype": "uint16", "scale": 0.1 }
                ],
                "digital": [
                    { "address": 0, "name": "pump_on", "type": "coil", "datatype": "bool" },
                    { "address": 5, "name": "level_raw", "type": "input", "datatype": "uint16" }
                ]
            }
        }"#,
    )
    .unwrap())
    .unwrap()
}

fn build_poller(
    transport: MockTransport,
    map: Option<RegisterMap>,
    sink: MemorySink,
    poll_interval: Duration,
) -> ModbusPoller {
    ModbusPoller::new(
        Box::new(transport),
        map,
        Box::new(sink),
        poll_interval,
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn poll_emits_groups_in_catalogue_order() {
    let transport = MockTransport::new();
    // 3.14f32 as big-endian register pair
    transport.seed_holding(0, &[0x4048, 0xF5C3]);
    transport.seed_holding(2, &[120]);
    transport.seed_coil(0, true);
    transport.seed_holding(5, &[777]);

    let sink = MemorySink::new();
    let mut poller = build_poller(
        transport,
        Some(test_map()),
        sink.clone(),
        Duration::from_millis(10),
    );
    let shutdown = poller.shutdown_token();

    let task = tokio::spawn(async move {
        poller.run().await;
        poller
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.record_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller never emitted telemetry");

    shutdown.cancel();
    let poller = task.await.unwrap();

    assert_eq!(poller.state(), ClientState::Stopped);
    assert_eq!(sink.declared_events(), vec!["measurements", "digital"]);

    let records = sink.records();
    assert_eq!(records[0].0, "measurements");
    assert_eq!(records[1].0, "digital");

    let measurements = &records[0].1;
    assert_eq!(measurements[0].0, "pressure");
    match measurements[0].1 {
        Value::Float(f) => assert!((f - 3.14).abs() < 0.01),
        other => panic!("expected float pressure, got {other:?}"),
    }
    // 120 * 0.1 truncates to 12
    assert_eq!(measurements[1], ("flow".to_string(), Value::Int(12)));

    let digital = &records[1].1;
    assert_eq!(digital[0], ("pump_on".to_string(), Value::Bool(true)));
    assert_eq!(digital[1], ("level_raw".to_string(), Value::Int(777)));

    let status = poller.status();
    assert!(status.poll_count >= 2);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.register_count, 4);
    assert_eq!(status.transport, "mock://device");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_refused_reconnects_without_full_poll_sleep() {
    let transport = MockTransport::new();
    transport.fail_reads_with(RegTraceError::ConnectionError(
        "Connection refused (os error 111)".to_string(),
    ));

    let sink = MemorySink::new();
    // Poll interval is far longer than the test: progress proves the
    // loop skipped the inter-poll sleep after detecting the loss
    let mut poller = build_poller(
        transport.clone(),
        Some(test_map()),
        sink.clone(),
        Duration::from_secs(60),
    )
    .with_reconnect_delay(Duration::from_millis(5));
    let shutdown = poller.shutdown_token();

    let task = tokio::spawn(async move {
        poller.run().await;
        poller
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.connect_attempts() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller never retried the connection");

    shutdown.cancel();
    let poller = task.await.unwrap();

    assert!(transport.connect_attempts() >= 3);
    assert_eq!(sink.record_count(), 0);
    let status = poller.status();
    assert!(status.error_count >= 1);
    assert_eq!(status.poll_count, 0);
    assert_eq!(poller.state(), ClientState::Stopped);
}

#[tokio::test]
async fn device_exception_skips_register_and_continues() {
    let transport = MockTransport::new();
    transport.seed_holding(0, &[0x4048, 0xF5C3]);
    transport.seed_holding(2, &[50]);
    transport.seed_coil(0, false);
    // level_raw at address 5 answers with a device exception
    transport.fail_address(5);

    let sink = MemorySink::new();
    let mut poller = build_poller(
        transport,
        Some(test_map()),
        sink.clone(),
        Duration::from_millis(10),
    );
    let shutdown = poller.shutdown_token();

    let task = tokio::spawn(async move {
        poller.run().await;
        poller
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.record_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller never emitted telemetry");

    shutdown.cancel();
    let poller = task.await.unwrap();

    // The digital group still emits, minus the failed register
    let records = sink.records();
    let digital = records.iter().find(|(name, _)| name == "digital").unwrap();
    let names: Vec<&str> = digital.1.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["pump_on"]);

    // Device exceptions are not connection losses: polling kept going
    assert!(poller.status().poll_count >= 1);
}

#[tokio::test]
async fn write_to_input_register_rejected_without_transport_call() {
    let transport = MockTransport::new();
    let mut poller = build_poller(
        transport.clone(),
        Some(test_map()),
        MemorySink::new(),
        Duration::from_secs(1),
    );

    let err = poller
        .write_by_name("level_raw", &Value::Int(1))
        .await
        .unwrap_err();
    match err {
        AccessError::NotWritable {
            name,
            register_type,
        } => {
            assert_eq!(name, "level_raw");
            assert_eq!(register_type.as_str(), "input");
        }
        other => panic!("expected NotWritable, got {other:?}"),
    }
    assert_eq!(transport.write_calls(), 0);
}

#[tokio::test]
async fn write_by_name_encodes_multi_register_values() {
    let transport = MockTransport::new();
    let mut poller = build_poller(
        transport.clone(),
        Some(test_map()),
        MemorySink::new(),
        Duration::from_secs(1),
    );
    // Transport-level ops work without the poll loop having run
    poller.write_by_name("pressure", &Value::Float(3.14)).await.unwrap();

    let written = transport.written_registers();
    assert_eq!(written.len(), 1);
    let (address, words) = &written[0];
    assert_eq!(*address, 0);
    assert_eq!(words, &vec![0x4048, 0xF5C3]);
}

#[tokio::test]
async fn named_access_distinguishes_outcome_classes() {
    let transport = MockTransport::new();
    let mut poller = build_poller(
        transport.clone(),
        Some(test_map()),
        MemorySink::new(),
        Duration::from_secs(1),
    );

    let err = poller.read_by_name("ghost").await.unwrap_err();
    assert!(matches!(err, AccessError::NotFound { .. }));

    let err = poller
        .write_by_name("ghost", &Value::Int(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::NotFound { .. }));

    // Disconnected transport surfaces as a transport failure
    let err = poller.read_by_name("flow").await.unwrap_err();
    assert!(matches!(err, AccessError::Transport(_)));
}

#[tokio::test]
async fn actions_dispatch_routes_to_poller() {
    let transport = MockTransport::new();
    transport.seed_holding(2, &[250]);
    let mut t = transport.clone();
    t.connect().await.unwrap();

    let mut poller = build_poller(
        transport.clone(),
        Some(test_map()),
        MemorySink::new(),
        Duration::from_secs(2),
    );

    let status = regtrace::actions::dispatch(&mut poller, "get_status", &serde_json::json!({})).await;
    assert_eq!(status["unit_id"], 1);
    assert_eq!(status["registers"], 4);
    assert_eq!(status["poll_interval"], 2.0);

    let read = regtrace::actions::dispatch(
        &mut poller,
        "read_register",
        &serde_json::json!({ "address": 2, "reg_type": "holding", "count": 1 }),
    )
    .await;
    assert_eq!(read["success"], true);
    assert_eq!(read["values"], serde_json::json!([250]));

    let listed = regtrace::actions::dispatch(&mut poller, "list_writable_registers", &serde_json::json!({})).await;
    assert_eq!(listed["count"], 3);

    let unknown = regtrace::actions::dispatch(&mut poller, "reboot", &serde_json::json!({})).await;
    assert_eq!(unknown["success"], false);
}

#[tokio::test]
async fn duplicate_names_resolve_to_first_declared_group() {
    let map = RegisterMap::from_document(serde_json::from_str(
        r#"{
            "events": {
                "first": [{ "address": 10, "name": "shared" }],
                "second": [{ "address": 20, "name": "shared" }]
            }
        }"#,
    )
    .unwrap())
    .unwrap();

    let transport = MockTransport::new();
    transport.seed_holding(10, &[111]);
    transport.seed_holding(20, &[222]);

    let mut poller = build_poller(
        transport.clone(),
        Some(map),
        MemorySink::new(),
        Duration::from_secs(1),
    );

    // Mark the shared mock state connected so on-demand reads go through
    let mut t = transport.clone();
    t.connect().await.unwrap();

    let reading = poller.read_by_name("shared").await.unwrap();
    assert_eq!(reading.address, 10);
    assert_eq!(reading.value, Value::Int(111));
}
