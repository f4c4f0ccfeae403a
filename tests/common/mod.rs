//! In-process KNXnet/IP gateway double for the integration tests.
//!
//! [`SimulatedGateway`] binds a loopback UDP socket and answers the
//! connection-scoped services a real gateway would: connect handshakes for
//! tunnel and management channels, connection-state checks, disconnects,
//! and tunneling/configuration requests. Tests steer its behavior through
//! the `set_*` knobs (acknowledge status, keep-alive status, confirmation
//! echoes) and inspect client traffic through the recorded request lists.

#![allow(dead_code, reason = "helpers are shared across test binaries")]

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use knx_tunnel::protocol::cemi::CemiFrame;
use knx_tunnel::protocol::constants::{CemiMessageCode, ErrorCode, ServiceType, MAX_FRAME_SIZE};
use knx_tunnel::protocol::frame::{FrameBuilder, Hpai};
use knx_tunnel::protocol::packet::{KnxIpPacket, PacketBody};
use knx_tunnel::protocol::services::{
    ConnectionStateResponse, Cri, DisconnectRequest, DisconnectResponse,
};
use knx_tunnel::tunnel::{TunnelConfig, TunnelEvent};

/// Bus address the gateway assigns to its tunnel connection (1.1.249)
pub const ASSIGNED_KNX_ADDRESS: u16 = 0x11F9;

/// Generous bound for anything the test waits on
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Initialize logging once per test binary; `RUST_LOG` selects the level
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Tunnel client settings shrunk to test scale, bound to loopback
pub fn test_config(gateway: SocketAddrV4) -> TunnelConfig {
    TunnelConfig {
        gateway,
        bind_address: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        advertised_ip: None,
        response_timeout: Duration::from_secs(2),
        keepalive_interval: Duration::from_millis(200),
        reconnect_backoff: Duration::from_millis(100),
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Next bus frame from the event channel, skipping other event kinds
pub fn next_frame(bus: &Receiver<TunnelEvent>, timeout: Duration) -> Option<CemiFrame> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match bus.recv_timeout(remaining) {
            Ok(TunnelEvent::Frame(frame)) => return Some(frame),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

/// Scriptable stand-in for a KNXnet/IP gateway on loopback
pub struct SimulatedGateway {
    state: Arc<GatewayState>,
    thread: Option<JoinHandle<()>>,
}

struct GatewayState {
    socket: UdpSocket,
    local: SocketAddrV4,
    stop: AtomicBool,
    /// Channel id handed out by the next connect
    next_channel: AtomicU8,
    /// Channel of the live tunnel connection, 0 when none
    tunnel_channel: AtomicU8,
    /// Channel of the live management connection, 0 when none
    management_channel: AtomicU8,
    /// Sequence counter for gateway-initiated requests
    gateway_sequence: AtomicU8,
    ack_status: AtomicU8,
    keepalive_status: AtomicU8,
    /// Echo each accepted L_Data.req back as an L_Data.con
    confirmations: AtomicBool,
    /// Swallow tunneling requests without acknowledging them
    drop_tunneling: AtomicBool,
    tunnel_connects: AtomicUsize,
    management_connects: AtomicUsize,
    keepalives: AtomicUsize,
    client_acks: AtomicUsize,
    disconnect_answers: AtomicUsize,
    client: Mutex<Option<SocketAddr>>,
    received: Mutex<Vec<(u8, Vec<u8>)>>,
    config_received: Mutex<Vec<(u8, Vec<u8>)>>,
    disconnects: Mutex<Vec<u8>>,
    description_requests: Mutex<Vec<Hpai>>,
}

impl SimulatedGateway {
    /// Bind a loopback socket and spawn the answering thread
    pub fn start() -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("Failed to bind gateway");
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("Failed to set gateway read timeout");
        let local = match socket.local_addr().expect("Failed to read gateway address") {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => panic!("unexpected IPv6 bind: {addr}"),
        };

        let state = Arc::new(GatewayState {
            socket,
            local,
            stop: AtomicBool::new(false),
            next_channel: AtomicU8::new(9),
            tunnel_channel: AtomicU8::new(0),
            management_channel: AtomicU8::new(0),
            gateway_sequence: AtomicU8::new(0),
            ack_status: AtomicU8::new(ErrorCode::NoError.to_u8()),
            keepalive_status: AtomicU8::new(ErrorCode::NoError.to_u8()),
            confirmations: AtomicBool::new(true),
            drop_tunneling: AtomicBool::new(false),
            tunnel_connects: AtomicUsize::new(0),
            management_connects: AtomicUsize::new(0),
            keepalives: AtomicUsize::new(0),
            client_acks: AtomicUsize::new(0),
            disconnect_answers: AtomicUsize::new(0),
            client: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            config_received: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
            description_requests: Mutex::new(Vec::new()),
        });
        let thread = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.run())
        };
        Self {
            state,
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.state.local
    }

    pub fn set_ack_status(&self, status: ErrorCode) {
        self.state.ack_status.store(status.to_u8(), Ordering::SeqCst);
    }

    pub fn set_keepalive_status(&self, status: ErrorCode) {
        self.state
            .keepalive_status
            .store(status.to_u8(), Ordering::SeqCst);
    }

    pub fn set_confirmations(&self, enabled: bool) {
        self.state.confirmations.store(enabled, Ordering::SeqCst);
    }

    pub fn set_drop_tunneling(&self, enabled: bool) {
        self.state.drop_tunneling.store(enabled, Ordering::SeqCst);
    }

    pub fn tunnel_channel(&self) -> u8 {
        self.state.tunnel_channel.load(Ordering::SeqCst)
    }

    pub fn management_channel(&self) -> u8 {
        self.state.management_channel.load(Ordering::SeqCst)
    }

    pub fn tunnel_connects(&self) -> usize {
        self.state.tunnel_connects.load(Ordering::SeqCst)
    }

    pub fn management_connects(&self) -> usize {
        self.state.management_connects.load(Ordering::SeqCst)
    }

    pub fn keepalives(&self) -> usize {
        self.state.keepalives.load(Ordering::SeqCst)
    }

    pub fn client_acks(&self) -> usize {
        self.state.client_acks.load(Ordering::SeqCst)
    }

    pub fn disconnect_answers(&self) -> usize {
        self.state.disconnect_answers.load(Ordering::SeqCst)
    }

    /// Tunneling requests the client sent, as (sequence, cEMI bytes)
    pub fn received(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.received.lock().expect("poisoned").clone()
    }

    /// Configuration requests the client sent, as (sequence, cEMI bytes)
    pub fn config_received(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.config_received.lock().expect("poisoned").clone()
    }

    /// Channel ids named in DISCONNECT_REQUESTs from the client
    pub fn disconnects(&self) -> Vec<u8> {
        self.state.disconnects.lock().expect("poisoned").clone()
    }

    /// Control endpoints of the DESCRIPTION_REQUESTs that arrived
    pub fn description_requests(&self) -> Vec<Hpai> {
        self.state
            .description_requests
            .lock()
            .expect("poisoned")
            .clone()
    }

    /// Push an `L_Data.ind` carrying this frame's content to the client
    pub fn inject_indication(&self, frame: &CemiFrame) {
        let mut frame = frame.clone();
        let mut cemi = frame.bytes().expect("Failed to encode frame").to_vec();
        cemi[0] = CemiMessageCode::LDataInd.to_u8();
        let channel = self.state.tunnel_channel.load(Ordering::SeqCst);
        let sequence = self.state.gateway_sequence.fetch_add(1, Ordering::SeqCst);
        let request = KnxIpPacket::tunneling_request(channel, sequence, &cemi)
            .expect("Failed to build tunneling request");
        self.state.send_to_client(request.data());
    }

    /// Push raw management cEMI bytes to the client as a
    /// DEVICE_CONFIGURATION_REQUEST
    pub fn inject_config(&self, cemi: &[u8]) {
        let channel = self.state.management_channel.load(Ordering::SeqCst);
        let sequence = self.state.gateway_sequence.fetch_add(1, Ordering::SeqCst);
        let request = KnxIpPacket::config_request(channel, sequence, cemi)
            .expect("Failed to build configuration request");
        self.state.send_to_client(request.data());
    }

    /// Close the tunnel connection from the gateway side
    pub fn disconnect_client(&self) {
        let channel = self.state.tunnel_channel.load(Ordering::SeqCst);
        let hpai = Hpai::new(self.state.local.ip().octets(), self.state.local.port());
        let mut buf = [0u8; 16];
        let len = DisconnectRequest::new(channel, hpai)
            .build(&mut buf)
            .expect("Failed to build disconnect request");
        self.state.send_to_client(&buf[..len]);
    }

    pub fn stop(&mut self) {
        self.state.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.join().expect("gateway thread panicked");
        }
    }
}

impl Drop for SimulatedGateway {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GatewayState {
    fn run(&self) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        while !self.stop.load(Ordering::SeqCst) {
            let (len, source) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(err) => panic!("gateway socket failed: {err}"),
            };
            match KnxIpPacket::parse(&buf[..len]) {
                Ok(packet) => self.handle(&packet, source),
                Err(err) => panic!("client sent a malformed datagram: {err}"),
            }
        }
    }

    fn handle(&self, packet: &KnxIpPacket, source: SocketAddr) {
        match packet.body() {
            PacketBody::ConnectRequest(request) => {
                *self.client.lock().expect("poisoned") = Some(source);
                self.answer_connect(request.cri, source);
            }
            PacketBody::ConnectionStateRequest(request) => {
                self.keepalives.fetch_add(1, Ordering::SeqCst);
                let status = ErrorCode::from_u8(self.keepalive_status.load(Ordering::SeqCst));
                let mut buf = [0u8; 16];
                let len = ConnectionStateResponse::new(request.channel_id, status)
                    .build(&mut buf)
                    .expect("Failed to build state response");
                let _ = self.socket.send_to(&buf[..len], source);
            }
            PacketBody::DisconnectRequest(request) => {
                self.disconnects
                    .lock()
                    .expect("poisoned")
                    .push(request.channel_id);
                let _ = self.tunnel_channel.compare_exchange(
                    request.channel_id,
                    0,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                let _ = self.management_channel.compare_exchange(
                    request.channel_id,
                    0,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                let mut buf = [0u8; 16];
                let len = DisconnectResponse::new(request.channel_id, ErrorCode::NoError)
                    .build(&mut buf)
                    .expect("Failed to build disconnect response");
                let _ = self.socket.send_to(&buf[..len], source);
            }
            PacketBody::DisconnectResponse(_) => {
                self.disconnect_answers.fetch_add(1, Ordering::SeqCst);
            }
            PacketBody::TunnelingRequest(header) => {
                let cemi = packet.cemi().unwrap_or(&[]).to_vec();
                self.received
                    .lock()
                    .expect("poisoned")
                    .push((header.sequence_counter, cemi.clone()));
                if self.drop_tunneling.load(Ordering::SeqCst) {
                    return;
                }
                let status = ErrorCode::from_u8(self.ack_status.load(Ordering::SeqCst));
                let ack =
                    KnxIpPacket::tunneling_ack(header.channel_id, header.sequence_counter, status)
                        .expect("Failed to build ack");
                let _ = self.socket.send_to(ack.data(), source);

                let is_request = cemi.first() == Some(&CemiMessageCode::LDataReq.to_u8());
                if status.is_ok() && is_request && self.confirmations.load(Ordering::SeqCst) {
                    let mut confirmation = cemi;
                    confirmation[0] = CemiMessageCode::LDataCon.to_u8();
                    let sequence = self.gateway_sequence.fetch_add(1, Ordering::SeqCst);
                    let request =
                        KnxIpPacket::tunneling_request(header.channel_id, sequence, &confirmation)
                            .expect("Failed to build confirmation");
                    let _ = self.socket.send_to(request.data(), source);
                }
            }
            PacketBody::ConfigRequest(header) => {
                let cemi = packet.cemi().unwrap_or(&[]).to_vec();
                self.config_received
                    .lock()
                    .expect("poisoned")
                    .push((header.sequence_counter, cemi));
                let ack = KnxIpPacket::config_ack(
                    header.channel_id,
                    header.sequence_counter,
                    ErrorCode::NoError,
                )
                .expect("Failed to build config ack");
                let _ = self.socket.send_to(ack.data(), source);
            }
            PacketBody::TunnelingAck(_) | PacketBody::ConfigAck(_) => {
                self.client_acks.fetch_add(1, Ordering::SeqCst);
            }
            PacketBody::DescriptionRequest(hpai) => {
                self.description_requests
                    .lock()
                    .expect("poisoned")
                    .push(*hpai);
            }
            _ => {}
        }
    }

    /// CONNECT_RESPONSE with this gateway's endpoint and a CRD matching
    /// the requested connection kind
    fn answer_connect(&self, cri: Cri, source: SocketAddr) {
        let channel = self.next_channel.fetch_add(1, Ordering::SeqCst);
        let mut body = vec![channel, ErrorCode::NoError.to_u8()];
        let mut hpai = [0u8; Hpai::SIZE];
        Hpai::new(self.local.ip().octets(), self.local.port())
            .encode(&mut hpai)
            .expect("Failed to encode HPAI");
        body.extend_from_slice(&hpai);
        match cri {
            Cri::Tunnel => {
                body.extend_from_slice(&[0x04, 0x04]);
                body.extend_from_slice(&ASSIGNED_KNX_ADDRESS.to_be_bytes());
                self.tunnel_channel.store(channel, Ordering::SeqCst);
                self.tunnel_connects.fetch_add(1, Ordering::SeqCst);
            }
            Cri::DeviceManagement => {
                body.extend_from_slice(&[0x02, 0x03]);
                self.management_channel.store(channel, Ordering::SeqCst);
                self.management_connects.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut buf = [0u8; 64];
        let len = FrameBuilder::new(ServiceType::ConnectResponse, &body)
            .build(&mut buf)
            .expect("Failed to build connect response");
        let _ = self.socket.send_to(&buf[..len], source);
    }

    fn send_to_client(&self, data: &[u8]) {
        let client = *self.client.lock().expect("poisoned");
        let client = client.expect("no client has connected yet");
        let _ = self.socket.send_to(data, client);
    }
}
