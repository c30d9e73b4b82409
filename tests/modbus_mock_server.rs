#![cfg(feature = "modbus")]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use inverter_energy_monitor::config::Config;
use inverter_energy_monitor::controller::InverterMonitor;
use inverter_energy_monitor::hardware::{RegisterTransport, TransportError, TransportSettings};
use inverter_energy_monitor::modbus::client::ModbusClient;
use inverter_energy_monitor::storage::MemoryEnergyStore;
use inverter_energy_monitor::utils::ManualClock;

/// Longer than the client timeout used below
const REPLY_DELAY: Duration = Duration::from_millis(800);

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

/// Mock Modbus TCP server answering function 0x03 from a register map
struct MockModbusServer {
    holding_registers: RwLock<HashMap<u16, u16>>,
    /// Number of upcoming requests answered with a device-failure exception
    fail_next: AtomicUsize,
    /// Number of upcoming replies held back past the client timeout
    delay_next: AtomicUsize,
    requests: AtomicUsize,
    connections: AtomicUsize,
}

impl MockModbusServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            holding_registers: RwLock::new(HashMap::new()),
            fail_next: AtomicUsize::new(0),
            delay_next: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
        })
    }

    async fn set_holding_registers(&self, start_address: u16, values: &[u16]) {
        let mut registers = self.holding_registers.write().await;
        for (i, &value) in values.iter().enumerate() {
            registers.insert(start_address + i as u16, value);
        }
    }

    fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn delay_next(&self, n: usize) {
        self.delay_next.store(n, Ordering::SeqCst);
    }

    fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Binds an ephemeral port and serves until the test ends
    async fn start(self: &Arc<Self>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                server.connections.fetch_add(1, Ordering::SeqCst);
                let server = server.clone();
                tokio::spawn(async move {
                    let _ = server.handle_connection(stream).await;
                });
            }
        });
        addr
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            // MBAP header: transaction id, protocol id, length, unit id
            let mut header = [0u8; 7];
            if stream.read_exact(&mut header).await.is_err() {
                return Ok(());
            }
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let mut pdu = vec![0u8; length.saturating_sub(1)];
            stream.read_exact(&mut pdu).await?;

            let response_pdu = self.process_pdu(&pdu).await;
            let mut response = Vec::with_capacity(7 + response_pdu.len());
            response.extend_from_slice(&header[0..4]);
            response.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
            response.push(header[6]);
            response.extend_from_slice(&response_pdu);

            let pending = self.delay_next.load(Ordering::SeqCst);
            if pending > 0 {
                self.delay_next.store(pending - 1, Ordering::SeqCst);
                tokio::time::sleep(REPLY_DELAY).await;
            }
            stream.write_all(&response).await?;
        }
    }

    async fn process_pdu(&self, pdu: &[u8]) -> Vec<u8> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let Some(&function_code) = pdu.first() else {
            return exception(0, ExceptionCode::IllegalFunction);
        };
        if function_code != 0x03 {
            return exception(function_code, ExceptionCode::IllegalFunction);
        }
        if pdu.len() < 5 {
            return exception(function_code, ExceptionCode::IllegalDataValue);
        }

        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return exception(function_code, ExceptionCode::ServerDeviceFailure);
        }

        let start_address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
        if quantity == 0 || quantity > 125 {
            return exception(function_code, ExceptionCode::IllegalDataValue);
        }

        let registers = self.holding_registers.read().await;
        let mut response = vec![function_code, (quantity * 2) as u8];
        for i in 0..quantity {
            let value = registers.get(&(start_address + i)).copied().unwrap_or(0);
            response.extend_from_slice(&value.to_be_bytes());
        }
        response
    }
}

fn exception(function_code: u8, code: ExceptionCode) -> Vec<u8> {
    vec![function_code | 0x80, code as u8]
}

fn inverter_block() -> Vec<u16> {
    let mut words = vec![0u16; 61];
    words[0] = 4; // on grid
    words[1] = 2301;
    words[2] = 500;
    words[3] = 1200; // 120.0 V PV
    words[4] = 600;
    words[5] = 266; // 26.6 V
    words[7] = 10;
    words[9] = 2300;
    words[10] = 500;
    words[11] = 420;
    words[12] = 380;
    words[13] = 12;
    words[54] = 2;
    words[56] = 41;
    words
}

fn settings() -> TransportSettings {
    TransportSettings {
        chunk_size: 3,
        retry_count: 4,
        settle_delay: Duration::from_micros(10),
    }
}

async fn client(addr: SocketAddr) -> ModbusClient {
    ModbusClient::connect_with_timeout(&addr.to_string(), 5, Duration::from_millis(500))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_chunked_block_read() {
    let server = MockModbusServer::new();
    server.set_holding_registers(4501, &inverter_block()).await;
    let addr = server.start().await;

    let mut transport = RegisterTransport::new(client(addr).await, settings());
    let words = transport.read_block(4501, 61).await.unwrap();

    assert_eq!(words, inverter_block());
    // 61 words in chunks of 3
    assert_eq!(server.request_count(), 21);
}

#[tokio::test]
async fn test_exceptions_are_retried() {
    let server = MockModbusServer::new();
    server.set_holding_registers(4501, &inverter_block()).await;
    let addr = server.start().await;

    server.fail_next(3);
    let mut transport = RegisterTransport::new(client(addr).await, settings());
    let words = transport.read_block(4501, 6).await.unwrap();

    assert_eq!(words, inverter_block()[..6].to_vec());
    // exception replies leave the connection in sync
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_late_reply_is_not_taken_for_next_request() {
    let server = MockModbusServer::new();
    server.set_holding_registers(4501, &inverter_block()).await;
    let addr = server.start().await;

    server.delay_next(1);
    let mut transport = RegisterTransport::new(client(addr).await, settings());
    let words = transport.read_block(4501, 6).await.unwrap();

    // the retried first chunk runs on a fresh connection, so the late
    // reply for 4501..4503 can never answer the request for 4504..4506
    assert_eq!(words, inverter_block()[..6].to_vec());
    assert_eq!(server.connection_count(), 2);
    assert_eq!(server.request_count(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_abort_block() {
    let server = MockModbusServer::new();
    server.set_holding_registers(4501, &inverter_block()).await;
    let addr = server.start().await;

    server.fail_next(usize::MAX);
    let mut transport = RegisterTransport::new(client(addr).await, settings());
    let err = transport.read_block(4501, 61).await.unwrap_err();

    match err {
        TransportError::ChunkFailed { address, attempts, .. } => {
            assert_eq!(address, 4501);
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_poll_cycle_over_modbus() {
    let server = MockModbusServer::new();
    server.set_holding_registers(4501, &inverter_block()).await;
    let addr = server.start().await;

    let cfg = Config::default();
    let mut monitor = InverterMonitor::new(
        &cfg,
        client(addr).await,
        MemoryEnergyStore::new(),
        ManualClock::starting_at(1_000),
    );
    monitor.poll_once().await.unwrap();

    let snap = monitor.snapshot();
    assert!(snap.inverter.valid);
    assert_eq!(snap.ac.input_voltage, 230.1);
    assert_eq!(snap.dc.pv_voltage, 120.0);
    assert_eq!(snap.dc.pv_power, 600.0);
    assert_eq!(snap.dc.battery_voltage, 26.6);
    assert_eq!(snap.inverter.operating_mode_code, 4);
    assert_eq!(snap.inverter.charger_code, 2);
    assert_eq!(snap.inverter.temperature, 41.0);
}
