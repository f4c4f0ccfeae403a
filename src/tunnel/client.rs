//! Tunnel client internals: socket ownership, the receive thread and the
//! request/response plumbing around it.

use core::time::Duration;
use std::io::ErrorKind;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use heapless::Vec;

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::cemi::CemiFrame;
use crate::protocol::constants::{
    CemiMessageCode, ErrorCode, ServiceType, MAX_CEMI_SIZE, MAX_FRAME_SIZE,
};
use crate::protocol::frame::Hpai;
use crate::protocol::packet::{KnxIpPacket, PacketBody};
use crate::protocol::services::{
    ConnectRequest, ConnectionStateRequest, DisconnectRequest, DisconnectResponse,
};
use crate::tunnel::pending::{PendingTable, ResponseKey};
use crate::tunnel::{lock, TunnelConfig, TunnelEvent};

/// Socket read timeout; sets how often the receive thread checks its timers
const RECV_TICK: Duration = Duration::from_secs(1);

/// Granularity of stop-flag checks inside the reconnect backoff
const STOP_POLL: Duration = Duration::from_millis(100);

/// Wait for the answer to a disconnect we initiated ourselves
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Threaded KNXnet/IP tunnel client.
///
/// Owns one UDP socket to the gateway. [`start`](Self::start) spawns the
/// receive thread, which connects, keeps the connection alive and
/// reconnects after failures until [`stop`](Self::stop). Received bus
/// frames are published as [`TunnelEvent`]s on the channel handed to
/// [`new`](Self::new).
///
/// # Example
///
/// ```no_run
/// use std::net::{Ipv4Addr, SocketAddrV4};
/// use std::sync::mpsc;
///
/// use knx_tunnel::tunnel::{TunnelClient, TunnelConfig, TunnelEvent};
///
/// # fn main() -> Result<(), knx_tunnel::KnxError> {
/// let config = TunnelConfig::new(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 3671));
/// let (events, bus) = mpsc::channel();
///
/// let client = TunnelClient::new(config, events)?;
/// client.start()?;
///
/// for event in bus.iter() {
///     if let TunnelEvent::Frame(frame) = event {
///         println!("{} -> {}: {:?}", frame.source(), frame.destination(), frame.payload());
///     }
/// }
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct TunnelClient {
    shared: Arc<ClientShared>,
    runner: Mutex<Runner>,
}

#[derive(Debug)]
struct Runner {
    events: Sender<TunnelEvent>,
    thread: Option<JoinHandle<()>>,
}

impl TunnelClient {
    /// Create a client bound to [`TunnelConfig::bind_address`].
    ///
    /// The socket is bound here; nothing is sent until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or configured.
    pub fn new(config: TunnelConfig, events: Sender<TunnelEvent>) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_address).map_err(|err| {
            log::error!("binding {} failed: {err}", config.bind_address);
            KnxError::socket_error()
        })?;
        socket.set_read_timeout(Some(RECV_TICK)).map_err(|err| {
            log::error!("setting socket read timeout failed: {err}");
            KnxError::socket_error()
        })?;

        let local_hpai = match config.advertised_ip {
            Some(ip) => {
                let port = socket
                    .local_addr()
                    .map_err(|err| {
                        log::error!("reading local socket address failed: {err}");
                        KnxError::socket_error()
                    })?
                    .port();
                Hpai::new(ip.octets(), port)
            }
            None => Hpai::nat(),
        };

        Ok(Self {
            shared: Arc::new(ClientShared {
                gateway: SocketAddr::V4(config.gateway),
                local_hpai,
                config,
                socket,
                link: Mutex::new(Link::new()),
                pending: PendingTable::new(),
                send_gate: Mutex::new(()),
                stop: AtomicBool::new(false),
            }),
            runner: Mutex::new(Runner {
                events,
                thread: None,
            }),
        })
    }

    /// Spawn the receive thread and begin connecting.
    ///
    /// The first connect happens on the receive thread; watch for
    /// [`TunnelEvent::Reconnected`] or poll [`is_connected`](Self::is_connected)
    /// to learn when the tunnel is up. A client that fails to connect
    /// keeps retrying until stopped. Calling `start` on a running client
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut runner = lock(&self.runner);
        if runner.thread.is_some() {
            return Ok(());
        }
        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let events = runner.events.clone();
        let thread = thread::Builder::new()
            .name("knx-tunnel".into())
            .spawn(move || shared.run(&events))
            .map_err(|err| {
                log::error!("spawning receive thread failed: {err}");
                KnxError::socket_error()
            })?;
        runner.thread = Some(thread);
        Ok(())
    }

    /// Disconnect and stop the receive thread.
    ///
    /// Open channels get a best-effort DISCONNECT_REQUEST; no answer is
    /// awaited. Idempotent, and also run on drop.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.send_disconnects();
        let thread = lock(&self.runner).thread.take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                log::warn!("receive thread panicked");
            }
        }
    }

    /// Send an `L_Data` frame to the bus.
    ///
    /// A frame with source address 0 is stamped with the gateway-assigned
    /// [`knx_address`](Self::knx_address). Blocks until the gateway
    /// acknowledged the frame and confirmed bus transmission, bounded by
    /// [`TunnelConfig::response_timeout`].
    ///
    /// # Errors
    ///
    /// Returns an error when disconnected, on send failure, on
    /// acknowledgement timeout, and when the gateway answers with a
    /// status other than `E_NO_ERROR` (carried in the error).
    pub fn send_frame(&self, frame: &CemiFrame) -> Result<()> {
        let mut frame = frame.clone();
        if frame.source().raw() == 0 {
            frame.set_source(self.knx_address());
        }
        let status = self.shared.send_tunnel_cemi(frame.bytes()?)?;
        if status.is_ok() {
            Ok(())
        } else {
            Err(KnxError::ack_status(status))
        }
    }

    /// Whether the tunneling connection is currently up
    pub fn is_connected(&self) -> bool {
        lock(&self.shared.link).connected
    }

    /// Bus address the gateway assigned in the connect handshake.
    ///
    /// Address 0 until the first connect completes.
    pub fn knx_address(&self) -> IndividualAddress {
        lock(&self.shared.link).knx_address
    }

    /// Gateway endpoint this client talks to
    pub fn gateway(&self) -> SocketAddrV4 {
        self.shared.config.gateway
    }

    /// Send raw cEMI bytes on the tunneling channel, returning the
    /// gateway's acknowledgement status. Used by the relay, which must
    /// echo the exact status downstream.
    pub(crate) fn send_tunnel_cemi(&self, cemi: &[u8]) -> Result<ErrorCode> {
        self.shared.send_tunnel_cemi(cemi)
    }

    /// Send raw cEMI bytes on the management channel, returning the
    /// gateway's acknowledgement status
    pub(crate) fn send_config_cemi(&self, cemi: &[u8]) -> Result<ErrorCode> {
        self.shared.send_config_cemi(cemi)
    }

    /// Open the device-management channel, replacing any already open one
    pub(crate) fn connect_management(&self) -> Result<()> {
        self.shared.connect_management()
    }

    /// Close the device-management channel, best-effort
    pub(crate) fn disconnect_management(&self) {
        self.shared.disconnect_management();
    }

    /// The gateway's CONNECT_RESPONSE for the tunneling channel, kept as
    /// a template the relay patches when answering downstream connects
    pub(crate) fn tunnel_template(&self) -> Option<KnxIpPacket> {
        let link = lock(&self.shared.link);
        link.connected.then(|| link.tunnel_template.clone()).flatten()
    }

    /// The gateway's CONNECT_RESPONSE for the management channel
    pub(crate) fn management_template(&self) -> Option<KnxIpPacket> {
        let link = lock(&self.shared.link);
        link.management_connected
            .then(|| link.management_template.clone())
            .flatten()
    }
}

impl Drop for TunnelClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State shared between the receive thread and callers
#[derive(Debug)]
struct ClientShared {
    config: TunnelConfig,
    socket: UdpSocket,
    gateway: SocketAddr,
    local_hpai: Hpai,
    link: Mutex<Link>,
    pending: PendingTable,
    /// Serializes request/response exchanges; one in flight per socket
    send_gate: Mutex<()>,
    stop: AtomicBool,
}

/// Live connection bookkeeping, all behind one mutex
#[derive(Debug)]
struct Link {
    connected: bool,
    channel_id: u8,
    sequence: u8,
    knx_address: IndividualAddress,
    management_connected: bool,
    management_channel_id: u8,
    management_sequence: u8,
    last_received: Instant,
    last_state_check: Instant,
    /// Set while a connection-state check awaits its answer
    state_check_deadline: Option<Instant>,
    tunnel_template: Option<KnxIpPacket>,
    management_template: Option<KnxIpPacket>,
}

impl Link {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            connected: false,
            channel_id: 0,
            sequence: 0,
            knx_address: IndividualAddress::from(0),
            management_connected: false,
            management_channel_id: 0,
            management_sequence: 0,
            last_received: now,
            last_state_check: now,
            state_check_deadline: None,
            tunnel_template: None,
            management_template: None,
        }
    }
}

impl ClientShared {
    /// Receive thread body: connect, read, keep alive, reconnect.
    fn run(&self, events: &Sender<TunnelEvent>) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let mut first_attempt = true;

        while !self.stop.load(Ordering::SeqCst) {
            let (connected, stale_channel) = {
                let mut link = lock(&self.link);
                let stale = (!link.connected && link.channel_id != 0).then_some(link.channel_id);
                if stale.is_some() {
                    link.channel_id = 0;
                }
                (link.connected, stale)
            };
            // A lost channel still gets a goodbye so the gateway can free
            // its single tunnel slot before we ask for a new one
            if let Some(channel_id) = stale_channel {
                self.send_goodbye(channel_id);
            }

            if !connected {
                if !first_attempt {
                    self.sleep_backoff();
                    if self.stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
                first_attempt = false;
                if let Err(err) = self.connect_tunnel(&mut buf) {
                    log::warn!("connecting to {} failed: {err}", self.gateway);
                    continue;
                }
                if events.send(TunnelEvent::Reconnected).is_err() {
                    log::debug!("event channel closed");
                }
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, source)) => self.handle_datagram(&buf[..len], source, events),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(err) => {
                    log::warn!("socket receive failed: {err}");
                    self.mark_lost("receive failure");
                    continue;
                }
            }
            self.check_keepalive();
        }
        log::debug!("receive thread stopped");
    }

    /// CONNECT handshake, run on the receive thread so no other reader
    /// competes for the socket. Stray traffic seen while waiting is offered
    /// to pending waiters and otherwise dropped.
    fn connect_tunnel(&self, buf: &mut [u8; MAX_FRAME_SIZE]) -> Result<()> {
        log::info!("connecting to {}", self.gateway);
        let mut out = [0u8; MAX_FRAME_SIZE];
        let len = ConnectRequest::tunnel(self.local_hpai, self.local_hpai).build(&mut out)?;
        self.socket.send_to(&out[..len], self.gateway).map_err(|err| {
            log::warn!("connect request send failed: {err}");
            KnxError::send_failed()
        })?;

        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Err(KnxError::connection_lost());
            }
            if Instant::now() >= deadline {
                return Err(KnxError::Timeout);
            }

            let len = match self.socket.recv_from(buf) {
                Ok((len, _)) => len,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(err) => {
                    log::warn!("socket receive failed: {err}");
                    return Err(KnxError::receive_failed());
                }
            };
            let packet = match KnxIpPacket::parse(&buf[..len]) {
                Ok(packet) => packet,
                Err(err) => {
                    log::warn!("dropping malformed datagram: {err}");
                    continue;
                }
            };

            let response = match packet.body() {
                PacketBody::ConnectResponse(r) => {
                    Some((r.is_ok(), r.channel_id, r.status, r.knx_address))
                }
                _ => None,
            };
            match response {
                // Tunnel connections carry the assigned bus address in the CRD
                Some((true, channel_id, _, Some(knx_address))) => {
                    log::info!(
                        "tunnel to {} open: channel {channel_id}, knx address {knx_address}",
                        self.gateway
                    );
                    let now = Instant::now();
                    let mut link = lock(&self.link);
                    link.connected = true;
                    link.channel_id = channel_id;
                    link.sequence = 0;
                    link.knx_address = knx_address;
                    link.last_received = now;
                    link.last_state_check = now;
                    link.state_check_deadline = None;
                    link.tunnel_template = Some(packet);
                    return Ok(());
                }
                Some((false, _, status, _)) => {
                    log::warn!("gateway refused tunnel connection: {}", status.describe());
                    return Err(KnxError::connection_refused(status));
                }
                // A management connect answer (no bus address in the CRD)
                // belongs to a waiter on another thread; everything else is
                // stray traffic from a dead session
                Some((true, _, _, None)) | None => {
                    if !self.offer_to_waiters(&packet) {
                        log::debug!("dropping service 0x{:04X} during handshake", packet.service());
                    }
                }
            }
        }
    }

    /// Dispatch one received datagram
    fn handle_datagram(&self, data: &[u8], source: SocketAddr, events: &Sender<TunnelEvent>) {
        let packet = match KnxIpPacket::parse(data) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("dropping malformed datagram from {source}: {err}");
                return;
            }
        };
        lock(&self.link).last_received = Instant::now();

        match packet.body() {
            PacketBody::TunnelingRequest(header) => {
                let (channel_id, sequence) = (header.channel_id, header.sequence_counter);
                // Every request is acknowledged, echoing its channel and
                // sequence, before any further processing
                self.send_ack(KnxIpPacket::tunneling_ack(
                    channel_id,
                    sequence,
                    ErrorCode::NoError,
                ));

                let code = packet.cemi_message_code();
                if code == Some(CemiMessageCode::LDataInd.to_u8()) {
                    match CemiFrame::parse(packet.cemi().unwrap_or(&[])) {
                        Ok(frame) => {
                            log::debug!(
                                "indication {} -> {} ({} payload bytes)",
                                frame.source(),
                                frame.destination(),
                                frame.payload().len()
                            );
                            if events.send(TunnelEvent::Frame(frame)).is_err() {
                                log::debug!("event channel closed, dropping frame");
                            }
                        }
                        Err(err) => log::warn!("dropping unparseable cEMI frame: {err}"),
                    }
                } else if code == Some(CemiMessageCode::LDataCon.to_u8()) {
                    // Confirmation for the send currently holding the gate
                    if !self.offer_to_waiters(&packet) {
                        log::debug!("unsolicited L_Data.con dropped");
                    }
                } else {
                    log::debug!("ignoring cEMI message code {code:02X?}");
                }
            }
            PacketBody::ConfigRequest(header) => {
                self.send_ack(KnxIpPacket::config_ack(
                    header.channel_id,
                    header.sequence_counter,
                    ErrorCode::NoError,
                ));
                match packet.cemi().map(Vec::<u8, MAX_CEMI_SIZE>::from_slice) {
                    Some(Ok(cemi)) => {
                        if events.send(TunnelEvent::Management(cemi)).is_err() {
                            log::debug!("event channel closed, dropping management frame");
                        }
                    }
                    _ => log::warn!("dropping empty or oversized management frame"),
                }
            }
            PacketBody::DisconnectRequest(request) => {
                let channel_id = request.channel_id;
                self.answer_disconnect(channel_id);
            }
            PacketBody::ConnectionStateResponse(response) => {
                let (channel_id, status) = (response.channel_id, response.status);
                self.finish_keepalive(channel_id, status);
            }
            _ => {
                if !self.offer_to_waiters(&packet) {
                    log::debug!("ignoring service 0x{:04X} from {source}", packet.service());
                }
            }
        }
    }

    /// Route a packet to a registered response waiter, if one matches
    fn offer_to_waiters(&self, packet: &KnxIpPacket) -> bool {
        let key = match packet.service_type() {
            Some(ServiceType::TunnelingRequest) => {
                if packet.cemi_message_code() == Some(CemiMessageCode::LDataCon.to_u8()) {
                    ResponseKey::DataControl
                } else {
                    return false;
                }
            }
            // Configuration requests are always handled inline
            Some(ServiceType::ConfigRequest) | None => return false,
            Some(service) => ResponseKey::Service(service),
        };
        self.pending.resolve(key, packet)
    }

    /// Send cEMI on the tunneling channel; returns the acknowledgement
    /// status, which may be negative. `Err` means no usable answer at all.
    fn send_tunnel_cemi(&self, cemi: &[u8]) -> Result<ErrorCode> {
        let _gate = lock(&self.send_gate);
        let (channel_id, sequence) = {
            let mut link = lock(&self.link);
            if !link.connected {
                return Err(KnxError::not_connected());
            }
            let sequence = link.sequence;
            link.sequence = link.sequence.wrapping_add(1);
            (link.channel_id, sequence)
        };
        let packet = KnxIpPacket::tunneling_request(channel_id, sequence, cemi)?;

        // Both waits registered before sending, so neither answer can slip
        // past between send and wait
        let ack_ticket = self
            .pending
            .register(ResponseKey::Service(ServiceType::TunnelingAck));
        let con_ticket = self.pending.register(ResponseKey::DataControl);

        if let Err(err) = self.socket.send_to(packet.data(), self.gateway) {
            log::warn!("tunneling request send failed: {err}");
            self.pending.cancel(ack_ticket);
            self.pending.cancel(con_ticket);
            self.mark_lost("send failure");
            return Err(KnxError::send_failed());
        }

        let timeout = self.config.response_timeout;
        let ack = match self.pending.wait(ack_ticket, timeout) {
            Ok(ack) => ack,
            Err(err) => {
                self.pending.cancel(con_ticket);
                log::warn!("no TUNNELING_ACK for channel {channel_id} seq {sequence}");
                self.mark_lost("acknowledgement timeout");
                return Err(err);
            }
        };

        let status = ack.status().unwrap_or(ErrorCode::NoError);
        if status.is_ok() {
            // The gateway confirms actual bus transmission with an
            // L_Data.con; hold the gate until then so exchanges never
            // interleave on the channel
            if self.pending.wait(con_ticket, timeout).is_err() {
                log::warn!("no L_Data.con confirmation for channel {channel_id} seq {sequence}");
            }
        } else {
            self.pending.cancel(con_ticket);
            log::warn!("gateway rejected tunneling request: {}", status.describe());
        }
        Ok(status)
    }

    /// Send cEMI on the management channel; returns the acknowledgement
    /// status. Management answers arrive later as separate
    /// DEVICE_CONFIGURATION_REQUESTs, published as events.
    fn send_config_cemi(&self, cemi: &[u8]) -> Result<ErrorCode> {
        let _gate = lock(&self.send_gate);
        let (channel_id, sequence) = {
            let mut link = lock(&self.link);
            if !link.management_connected {
                return Err(KnxError::not_connected());
            }
            let sequence = link.management_sequence;
            link.management_sequence = link.management_sequence.wrapping_add(1);
            (link.management_channel_id, sequence)
        };
        let packet = KnxIpPacket::config_request(channel_id, sequence, cemi)?;

        let ticket = self
            .pending
            .register(ResponseKey::Service(ServiceType::ConfigAck));
        if let Err(err) = self.socket.send_to(packet.data(), self.gateway) {
            log::warn!("configuration request send failed: {err}");
            self.pending.cancel(ticket);
            return Err(KnxError::send_failed());
        }

        match self.pending.wait(ticket, self.config.response_timeout) {
            Ok(ack) => {
                let status = ack.status().unwrap_or(ErrorCode::NoError);
                if !status.is_ok() {
                    log::warn!("gateway rejected configuration request: {}", status.describe());
                }
                Ok(status)
            }
            Err(err) => {
                log::warn!("no DEVICE_CONFIGURATION_ACK for channel {channel_id} seq {sequence}");
                let mut link = lock(&self.link);
                link.management_connected = false;
                link.management_template = None;
                Err(err)
            }
        }
    }

    /// Open the management channel. The gateway allows one management
    /// connection, so an already open channel is disconnected first.
    fn connect_management(&self) -> Result<()> {
        let _gate = lock(&self.send_gate);
        let stale = {
            let mut link = lock(&self.link);
            if !link.connected {
                return Err(KnxError::not_connected());
            }
            let stale = link.management_connected.then_some(link.management_channel_id);
            link.management_connected = false;
            link.management_template = None;
            stale
        };
        if let Some(channel_id) = stale {
            self.disconnect_channel(channel_id);
        }

        let mut out = [0u8; MAX_FRAME_SIZE];
        let len =
            ConnectRequest::device_management(self.local_hpai, self.local_hpai).build(&mut out)?;
        let ticket = self
            .pending
            .register(ResponseKey::Service(ServiceType::ConnectResponse));
        if let Err(err) = self.socket.send_to(&out[..len], self.gateway) {
            log::warn!("management connect send failed: {err}");
            self.pending.cancel(ticket);
            return Err(KnxError::send_failed());
        }

        let packet = self.pending.wait(ticket, self.config.response_timeout)?;
        let response = match packet.body() {
            PacketBody::ConnectResponse(r) => Some((r.is_ok(), r.channel_id, r.status)),
            _ => None,
        };
        match response {
            Some((true, channel_id, _)) => {
                log::info!("management channel {channel_id} open");
                let mut link = lock(&self.link);
                link.management_connected = true;
                link.management_channel_id = channel_id;
                link.management_sequence = 0;
                link.management_template = Some(packet);
                Ok(())
            }
            Some((false, _, status)) => {
                log::warn!("gateway refused management connection: {}", status.describe());
                Err(KnxError::connection_refused(status))
            }
            None => Err(KnxError::unsupported_service()),
        }
    }

    /// Close the management channel, best-effort
    fn disconnect_management(&self) {
        let channel = {
            let mut link = lock(&self.link);
            let channel = link.management_connected.then_some(link.management_channel_id);
            link.management_connected = false;
            link.management_template = None;
            channel
        };
        if let Some(channel_id) = channel {
            let _gate = lock(&self.send_gate);
            self.disconnect_channel(channel_id);
            log::info!("management channel {channel_id} closed");
        }
    }

    /// DISCONNECT_REQUEST with a short wait for the answer
    fn disconnect_channel(&self, channel_id: u8) {
        let mut out = [0u8; MAX_FRAME_SIZE];
        let Ok(len) = DisconnectRequest::new(channel_id, self.local_hpai).build(&mut out) else {
            return;
        };
        let ticket = self
            .pending
            .register(ResponseKey::Service(ServiceType::DisconnectResponse));
        if self.socket.send_to(&out[..len], self.gateway).is_err() {
            self.pending.cancel(ticket);
            return;
        }
        if self.pending.wait(ticket, DISCONNECT_GRACE).is_err() {
            log::debug!("no disconnect response for channel {channel_id}");
        }
    }

    /// DISCONNECT_REQUEST without waiting; reconnect and shutdown paths
    fn send_goodbye(&self, channel_id: u8) {
        let mut out = [0u8; MAX_FRAME_SIZE];
        if let Ok(len) = DisconnectRequest::new(channel_id, self.local_hpai).build(&mut out) {
            if let Err(err) = self.socket.send_to(&out[..len], self.gateway) {
                log::debug!("disconnect for channel {channel_id} failed: {err}");
            }
        }
    }

    /// Best-effort disconnects for whichever channels are open, used on stop
    fn send_disconnects(&self) {
        let (tunnel, management) = {
            let mut link = lock(&self.link);
            let tunnel = link.connected.then_some(link.channel_id);
            let management = link.management_connected.then_some(link.management_channel_id);
            link.connected = false;
            link.channel_id = 0;
            link.management_connected = false;
            link.management_channel_id = 0;
            link.management_template = None;
            (tunnel, management)
        };
        for channel_id in [management, tunnel].into_iter().flatten() {
            self.send_goodbye(channel_id);
        }
    }

    /// Answer a gateway-initiated DISCONNECT_REQUEST and drop the state
    /// of whichever channel it names
    fn answer_disconnect(&self, channel_id: u8) {
        let mut out = [0u8; MAX_FRAME_SIZE];
        if let Ok(len) = DisconnectResponse::new(channel_id, ErrorCode::NoError).build(&mut out) {
            if let Err(err) = self.socket.send_to(&out[..len], self.gateway) {
                log::warn!("disconnect response send failed: {err}");
            }
        }

        let mut link = lock(&self.link);
        if link.connected && channel_id == link.channel_id {
            drop(link);
            self.mark_lost("gateway requested disconnect");
        } else if link.management_connected && channel_id == link.management_channel_id {
            log::info!("gateway closed management channel {channel_id}");
            link.management_connected = false;
            link.management_template = None;
        } else {
            log::debug!("disconnect request for unknown channel {channel_id}");
        }
    }

    /// Drive the periodic connection-state check. Never blocks: the
    /// request goes out here and the answer is matched against the
    /// recorded deadline on later ticks.
    fn check_keepalive(&self) {
        let now = Instant::now();
        let channel_id = {
            let mut link = lock(&self.link);
            if !link.connected {
                return;
            }
            if let Some(deadline) = link.state_check_deadline {
                if now >= deadline {
                    drop(link);
                    self.mark_lost("connection state check timed out");
                }
                return;
            }
            if now.duration_since(link.last_state_check) < self.config.keepalive_interval {
                return;
            }
            link.state_check_deadline = Some(now + self.config.response_timeout);
            link.channel_id
        };

        log::debug!("connection state check (channel {channel_id})");
        let mut out = [0u8; MAX_FRAME_SIZE];
        match ConnectionStateRequest::new(channel_id, self.local_hpai).build(&mut out) {
            Ok(len) => {
                if let Err(err) = self.socket.send_to(&out[..len], self.gateway) {
                    log::warn!("connection state request send failed: {err}");
                    self.mark_lost("send failure");
                }
            }
            Err(err) => log::warn!("building connection state request failed: {err}"),
        }
    }

    /// Book a CONNECTIONSTATE_RESPONSE against the pending check
    fn finish_keepalive(&self, channel_id: u8, status: ErrorCode) {
        let mut link = lock(&self.link);
        if !link.connected || channel_id != link.channel_id {
            log::debug!("connection state response for unknown channel {channel_id}");
            return;
        }
        link.state_check_deadline = None;
        if status.is_ok() {
            link.last_state_check = Instant::now();
        } else {
            drop(link);
            log::warn!("connection state check failed: {}", status.describe());
            self.mark_lost("negative connection state response");
        }
    }

    /// Flag the connection lost; the receive thread notices and reconnects.
    /// Management state rides on the tunnel and is dropped with it.
    fn mark_lost(&self, reason: &str) {
        let mut link = lock(&self.link);
        if link.connected {
            log::warn!(
                "connection to {} lost ({reason}); last packet {:?} ago",
                self.gateway,
                link.last_received.elapsed()
            );
            link.connected = false;
        }
        link.management_connected = false;
        link.management_template = None;
        link.state_check_deadline = None;
    }

    /// Acknowledge an inbound request; `ack` is the builder result
    fn send_ack(&self, ack: Result<KnxIpPacket>) {
        match ack {
            Ok(packet) => {
                if let Err(err) = self.socket.send_to(packet.data(), self.gateway) {
                    log::warn!("acknowledgement send failed: {err}");
                }
            }
            Err(err) => log::warn!("building acknowledgement failed: {err}"),
        }
    }

    /// Stop-flag-aware pause between reconnect attempts
    fn sleep_backoff(&self) {
        let deadline = Instant::now() + self.config.reconnect_backoff;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.stop.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(remaining.min(STOP_POLL));
        }
    }
}
