//! Single-slot KNXnet/IP relay.
//!
//! KNXnet/IP gateways typically allow one tunnel connection. [`IpRelay`]
//! shares that single upstream tunnel with one external controller: the
//! controller connects to the relay's own listen port as if it were a
//! gateway, and the relay rewrites channel ids and sequence counters on
//! every frame crossing the boundary.
//!
//! ```text
//! controller ──CONNECT/TUNNELING_REQUEST──> IpRelay ──cEMI──> TunnelClient ──> gateway
//!            <──acks, indications─────────         <──TunnelEvent──
//! ```
//!
//! Downstream channel ids are issued locally and never leave the relay;
//! the upstream channel and sequence bookkeeping stays inside
//! [`TunnelClient`]. Connect responses are answered from the gateway's
//! own response template with the channel and data endpoint patched, so
//! gateway-chosen details (CRD contents, assigned bus address) reach the
//! downstream controller byte-exactly.
//!
//! The relay serves one controller at a time. A connect from a second
//! address is refused with `E_NO_MORE_CONNECTIONS` until the current
//! session has been idle for [`TAKEOVER_AFTER`]; sessions with no traffic
//! for [`SESSION_TIMEOUT`] are dropped.

use core::time::Duration;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::error::{KnxError, Result};
use crate::protocol::cemi::CemiFrame;
use crate::protocol::constants::{ErrorCode, MAX_FRAME_SIZE};
use crate::protocol::frame::Hpai;
use crate::protocol::packet::{KnxIpPacket, PacketBody};
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionHeader, ConnectionStateRequest,
    ConnectionStateResponse, Cri, DisconnectRequest, DisconnectResponse,
};
use crate::tunnel::{lock, TunnelClient, TunnelEvent};

/// Default relay listen port, one above the standard KNXnet/IP port
pub const RELAY_DEFAULT_PORT: u16 = 3672;

/// How long an idle session blocks connects from a different address
pub const TAKEOVER_AFTER: Duration = Duration::from_secs(60);

/// Inactivity after which a downstream session is dropped
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Socket read timeout; sets how often the downstream thread checks expiry
const RECV_TICK: Duration = Duration::from_secs(1);

/// Upstream event wait; sets how often the pump thread checks the stop flag
const PUMP_TICK: Duration = Duration::from_secs(1);

/// Relay settings
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayConfig {
    /// Local address the relay listens on for downstream controllers
    pub bind_address: SocketAddrV4,
    /// IPv4 address advertised in connect responses. `None` auto-detects
    /// the local address of the default route toward the gateway.
    pub advertised_ip: Option<Ipv4Addr>,
    /// Idle time before a different address may take the slot over
    pub takeover_after: Duration,
    /// Idle time before the session is dropped entirely
    pub session_timeout: Duration,
}

impl RelayConfig {
    /// Default settings: listen on `0.0.0.0:3672`, auto-detect the
    /// advertised address
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, RELAY_DEFAULT_PORT),
            advertised_ip: None,
            takeover_after: TAKEOVER_AFTER,
            session_timeout: SESSION_TIMEOUT,
        }
    }
}

/// Relay between one downstream controller and the upstream tunnel.
///
/// Consumes the [`TunnelEvent`] receiver of the [`TunnelClient`] it wraps:
/// received bus frames are forwarded downstream instead of being handed
/// to application code.
///
/// # Example
///
/// ```no_run
/// use std::net::{Ipv4Addr, SocketAddrV4};
/// use std::sync::{mpsc, Arc};
///
/// use knx_tunnel::relay::{IpRelay, RelayConfig};
/// use knx_tunnel::tunnel::{TunnelClient, TunnelConfig};
///
/// # fn main() -> Result<(), knx_tunnel::KnxError> {
/// let config = TunnelConfig::new(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 3671));
/// let (events, bus) = mpsc::channel();
/// let client = Arc::new(TunnelClient::new(config, events)?);
/// client.start()?;
///
/// let relay = IpRelay::new(RelayConfig::default(), Arc::clone(&client), bus)?;
/// relay.start()?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct IpRelay {
    shared: Arc<RelayShared>,
    runner: Mutex<RelayRunner>,
}

#[derive(Debug)]
struct RelayRunner {
    events: Option<Receiver<TunnelEvent>>,
    downstream: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<Receiver<TunnelEvent>>>,
}

impl IpRelay {
    /// Create a relay bound to [`RelayConfig::bind_address`].
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or no advertised
    /// address could be determined.
    pub fn new(
        config: RelayConfig,
        client: Arc<TunnelClient>,
        events: Receiver<TunnelEvent>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_address).map_err(|err| {
            log::error!("binding {} failed: {err}", config.bind_address);
            KnxError::socket_error()
        })?;
        socket.set_read_timeout(Some(RECV_TICK)).map_err(|err| {
            log::error!("setting relay socket read timeout failed: {err}");
            KnxError::socket_error()
        })?;
        let port = socket
            .local_addr()
            .map_err(|err| {
                log::error!("reading relay socket address failed: {err}");
                KnxError::socket_error()
            })?
            .port();

        let advertised_ip = match config.advertised_ip {
            Some(ip) => ip,
            None => detect_local_ip(client.gateway()).ok_or_else(|| {
                log::error!(
                    "no local address toward {}; set RelayConfig::advertised_ip",
                    client.gateway()
                );
                KnxError::socket_error()
            })?,
        };

        Ok(Self {
            shared: Arc::new(RelayShared {
                local_hpai: Hpai::new(advertised_ip.octets(), port),
                config,
                socket,
                client,
                session: Mutex::new(SessionSlot::default()),
                stop: AtomicBool::new(false),
            }),
            runner: Mutex::new(RelayRunner {
                events: Some(events),
                downstream: None,
                pump: None,
            }),
        })
    }

    /// Spawn the downstream receive thread and the upstream event pump.
    ///
    /// Calling `start` on a running relay does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the threads cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut runner = lock(&self.runner);
        if runner.downstream.is_some() {
            return Ok(());
        }
        let Some(events) = runner.events.take() else {
            log::error!("relay event receiver was lost; create a new relay");
            return Err(KnxError::socket_error());
        };
        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let downstream = match thread::Builder::new()
            .name("knx-relay".into())
            .spawn(move || shared.run_downstream())
        {
            Ok(thread) => thread,
            Err(err) => {
                log::error!("spawning relay receive thread failed: {err}");
                runner.events = Some(events);
                return Err(KnxError::socket_error());
            }
        };
        runner.downstream = Some(downstream);

        let shared = Arc::clone(&self.shared);
        let pump = match thread::Builder::new()
            .name("knx-relay-pump".into())
            .spawn(move || shared.run_pump(events))
        {
            Ok(pump) => pump,
            Err(err) => {
                log::error!("spawning relay pump thread failed: {err}");
                drop(runner);
                self.stop();
                return Err(KnxError::socket_error());
            }
        };
        runner.pump = Some(pump);
        Ok(())
    }

    /// Stop both relay threads and drop any downstream session.
    ///
    /// Idempotent, and also run on drop.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let (downstream, pump) = {
            let mut runner = lock(&self.runner);
            (runner.downstream.take(), runner.pump.take())
        };
        if let Some(thread) = downstream {
            if thread.join().is_err() {
                log::warn!("relay receive thread panicked");
            }
        }
        if let Some(thread) = pump {
            // The pump hands the event receiver back so the relay can be
            // started again
            match thread.join() {
                Ok(events) => lock(&self.runner).events = Some(events),
                Err(_) => log::warn!("relay pump thread panicked"),
            }
        }
        self.shared.evict_session("relay stopped");
    }

    /// Port the relay actually listens on; useful when the configured
    /// bind port was 0
    pub fn local_port(&self) -> u16 {
        self.shared.local_hpai.port
    }
}

impl Drop for IpRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The one downstream session the relay serves
#[derive(Debug)]
struct RelaySession {
    remote_ip: Ipv4Addr,
    control_port: u16,
    data_port: u16,
    /// Locally-issued downstream tunneling channel
    channel_id: Option<u8>,
    /// Locally-issued downstream management channel
    management_channel_id: Option<u8>,
    sequence_out: u8,
    management_sequence_out: u8,
    last_packet_received: Instant,
}

impl RelaySession {
    fn new(remote_ip: Ipv4Addr) -> Self {
        Self {
            remote_ip,
            control_port: 0,
            data_port: 0,
            channel_id: None,
            management_channel_id: None,
            sequence_out: 0,
            management_sequence_out: 0,
            last_packet_received: Instant::now(),
        }
    }
}

/// Session slot plus the downstream channel id counter
#[derive(Debug, Default)]
struct SessionSlot {
    session: Option<RelaySession>,
    next_channel: u8,
}

impl SessionSlot {
    /// Issue the next downstream channel id, skipping 0 and ids still
    /// held by the live session
    fn allocate_channel(&mut self) -> u8 {
        loop {
            self.next_channel = self.next_channel.wrapping_add(1);
            let candidate = self.next_channel;
            if candidate == 0 {
                continue;
            }
            let in_use = self.session.as_ref().is_some_and(|s| {
                s.channel_id == Some(candidate) || s.management_channel_id == Some(candidate)
            });
            if !in_use {
                return candidate;
            }
        }
    }

    /// Session for `source`, created if the slot is free. Declared
    /// endpoint ports are taken over, with the observed source port as
    /// the fallback for a zero port.
    fn claim(&mut self, source: SocketAddrV4, request: &ConnectRequest) -> &mut RelaySession {
        if !self
            .session
            .as_ref()
            .is_some_and(|s| s.remote_ip == *source.ip())
        {
            self.session = None;
        }
        let session = self
            .session
            .get_or_insert_with(|| RelaySession::new(*source.ip()));
        session.control_port = match request.control_endpoint.port {
            0 => source.port(),
            port => port,
        };
        session.data_port = match request.data_endpoint.port {
            0 => source.port(),
            port => port,
        };
        session.last_packet_received = Instant::now();
        session
    }
}

/// State shared between the two relay threads
#[derive(Debug)]
struct RelayShared {
    config: RelayConfig,
    socket: UdpSocket,
    /// Endpoint advertised to downstream controllers in connect responses
    local_hpai: Hpai,
    client: Arc<TunnelClient>,
    session: Mutex<SessionSlot>,
    stop: AtomicBool,
}

impl RelayShared {
    /// Downstream thread: all reads from the relay socket plus session
    /// expiry.
    fn run_downstream(&self) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        while !self.stop.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, SocketAddr::V4(source))) => self.handle_datagram(&buf[..len], source),
                Ok((_, source)) => log::warn!("dropping datagram from non-IPv4 source {source}"),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(err) => log::warn!("relay socket receive failed: {err}"),
            }
            self.expire_session();
        }
        log::debug!("relay receive thread stopped");
    }

    fn handle_datagram(&self, data: &[u8], source: SocketAddrV4) {
        let packet = match KnxIpPacket::parse(data) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("dropping malformed datagram from {source}: {err}");
                return;
            }
        };

        match packet.body() {
            PacketBody::ConnectRequest(request) => self.handle_connect(request, source),
            PacketBody::TunnelingRequest(header) => {
                self.handle_tunneling(&packet, *header, source);
            }
            PacketBody::ConfigRequest(header) => self.handle_config(&packet, *header, source),
            PacketBody::ConnectionStateRequest(request) => {
                self.handle_connection_state(request, source);
            }
            PacketBody::DisconnectRequest(request) => self.handle_disconnect(request, source),
            PacketBody::TunnelingAck(ack) => self.absorb_ack(ack.channel_id, source),
            PacketBody::ConfigAck(ack) => self.absorb_ack(ack.channel_id, source),
            PacketBody::DescriptionRequest(_) => {
                // Forwarded with the observed source patched in; the
                // gateway answers the requester directly
                let observed = Hpai::new(source.ip().octets(), source.port());
                match packet.patched_description_request(observed) {
                    Ok(forwarded) => {
                        log::debug!("forwarding description request from {source}");
                        self.send_to(forwarded.data(), self.client.gateway());
                    }
                    Err(err) => log::warn!("patching description request failed: {err}"),
                }
            }
            _ => log::warn!(
                "dropping unsupported service 0x{:04X} from {source}",
                packet.service()
            ),
        }
    }

    /// Answer a downstream CONNECT_REQUEST from the matching upstream
    /// response template.
    fn handle_connect(&self, request: &ConnectRequest, source: SocketAddrV4) {
        // One controller at a time; a different address gets in only
        // once the current session has been idle long enough
        let busy = {
            let slot = lock(&self.session);
            slot.session.as_ref().is_some_and(|s| {
                s.remote_ip != *source.ip()
                    && s.last_packet_received.elapsed() < self.config.takeover_after
            })
        };
        if busy {
            log::warn!("rejecting connect from {source}: slot busy with another controller");
            self.send_connect_error(ErrorCode::NoMoreConnections, source);
            return;
        }
        let takeover = {
            let slot = lock(&self.session);
            slot.session.as_ref().is_some_and(|s| s.remote_ip != *source.ip())
        };
        if takeover {
            self.evict_session("taken over by a new controller");
        }

        // The declared endpoints must name the observed sender; NAT-style
        // unspecified endpoints are not supported downstream
        let observed = source.ip().octets();
        if request.control_endpoint.ip_address != observed
            || request.data_endpoint.ip_address != observed
        {
            log::warn!("rejecting connect from {source}: endpoint addresses differ from sender");
            self.send_connect_error(ErrorCode::ConnectionOption, source);
            return;
        }

        match request.cri {
            Cri::Tunnel => self.connect_tunnel_session(request, source),
            Cri::DeviceManagement => self.connect_management_session(request, source),
        }
    }

    fn connect_tunnel_session(&self, request: &ConnectRequest, source: SocketAddrV4) {
        let Some(template) = self.client.tunnel_template() else {
            log::warn!("refusing tunnel connect from {source}: upstream tunnel is down");
            self.send_connect_error(ErrorCode::KnxConnection, source);
            return;
        };

        let mut slot = lock(&self.session);
        let channel_id = slot.allocate_channel();
        let response = match template.patched_connect_response(channel_id, self.local_hpai) {
            Ok(response) => response,
            Err(err) => {
                drop(slot);
                log::warn!("patching connect response failed: {err}");
                self.send_connect_error(ErrorCode::KnxConnection, source);
                return;
            }
        };
        let session = slot.claim(source, request);
        session.channel_id = Some(channel_id);
        session.sequence_out = 0;
        drop(slot);

        log::info!("tunnel session for {} on channel {channel_id}", source.ip());
        self.send_to(response.data(), source);
    }

    fn connect_management_session(&self, request: &ConnectRequest, source: SocketAddrV4) {
        // The gateway allows one management connection; ensure ours is up
        if let Err(err) = self.client.connect_management() {
            log::warn!("upstream management connect failed: {err}");
            let status = err.gateway_status().unwrap_or(ErrorCode::KnxConnection);
            self.send_connect_error(status, source);
            return;
        }
        let Some(template) = self.client.management_template() else {
            log::warn!("refusing management connect from {source}: no upstream template");
            self.send_connect_error(ErrorCode::KnxConnection, source);
            return;
        };

        let mut slot = lock(&self.session);
        let channel_id = slot.allocate_channel();
        let response = match template.patched_connect_response(channel_id, self.local_hpai) {
            Ok(response) => response,
            Err(err) => {
                drop(slot);
                log::warn!("patching connect response failed: {err}");
                self.send_connect_error(ErrorCode::KnxConnection, source);
                return;
            }
        };
        let session = slot.claim(source, request);
        session.management_channel_id = Some(channel_id);
        session.management_sequence_out = 0;
        drop(slot);

        log::info!("management session for {} on channel {channel_id}", source.ip());
        self.send_to(response.data(), source);
    }

    /// Forward a downstream TUNNELING_REQUEST upstream and answer with an
    /// acknowledgement echoing the downstream channel and sequence.
    fn handle_tunneling(
        &self,
        packet: &KnxIpPacket,
        header: ConnectionHeader,
        source: SocketAddrV4,
    ) {
        let channel_ok = {
            let mut slot = lock(&self.session);
            let Some(session) = slot
                .session
                .as_mut()
                .filter(|s| s.remote_ip == *source.ip())
            else {
                log::warn!("dropping tunneling request from {source}: no active session");
                return;
            };
            session.last_packet_received = Instant::now();
            session.channel_id == Some(header.channel_id)
        };
        if !channel_ok {
            log::warn!(
                "tunneling request from {source} names unknown channel {}",
                header.channel_id
            );
            self.send_ack(
                KnxIpPacket::tunneling_ack(
                    header.channel_id,
                    header.sequence_counter,
                    ErrorCode::ConnectionId,
                ),
                source,
            );
            return;
        }

        let status = match self.client.send_tunnel_cemi(packet.cemi().unwrap_or(&[])) {
            Ok(status) => status,
            Err(err) => {
                log::warn!("upstream send failed: {err}");
                err.gateway_status().unwrap_or(ErrorCode::KnxConnection)
            }
        };
        self.send_ack(
            KnxIpPacket::tunneling_ack(header.channel_id, header.sequence_counter, status),
            source,
        );
    }

    /// Same passthrough for DEVICE_CONFIGURATION_REQUESTs on the
    /// management channel.
    fn handle_config(&self, packet: &KnxIpPacket, header: ConnectionHeader, source: SocketAddrV4) {
        let channel_ok = {
            let mut slot = lock(&self.session);
            let Some(session) = slot
                .session
                .as_mut()
                .filter(|s| s.remote_ip == *source.ip())
            else {
                log::warn!("dropping configuration request from {source}: no active session");
                return;
            };
            session.last_packet_received = Instant::now();
            session.management_channel_id == Some(header.channel_id)
        };
        if !channel_ok {
            log::warn!(
                "configuration request from {source} names unknown channel {}",
                header.channel_id
            );
            self.send_ack(
                KnxIpPacket::config_ack(
                    header.channel_id,
                    header.sequence_counter,
                    ErrorCode::ConnectionId,
                ),
                source,
            );
            return;
        }

        let status = match self.client.send_config_cemi(packet.cemi().unwrap_or(&[])) {
            Ok(status) => status,
            Err(err) => {
                log::warn!("upstream management send failed: {err}");
                err.gateway_status().unwrap_or(ErrorCode::KnxConnection)
            }
        };
        self.send_ack(
            KnxIpPacket::config_ack(header.channel_id, header.sequence_counter, status),
            source,
        );
    }

    /// The relay answers connection-state checks locally; the upstream
    /// client runs its own keep-alive.
    fn handle_connection_state(&self, request: &ConnectionStateRequest, source: SocketAddrV4) {
        let status = {
            let mut slot = lock(&self.session);
            match slot
                .session
                .as_mut()
                .filter(|s| s.remote_ip == *source.ip())
            {
                Some(session)
                    if session.channel_id == Some(request.channel_id)
                        || session.management_channel_id == Some(request.channel_id) =>
                {
                    session.last_packet_received = Instant::now();
                    ErrorCode::NoError
                }
                _ => ErrorCode::ConnectionId,
            }
        };

        let mut buf = [0u8; MAX_FRAME_SIZE];
        match ConnectionStateResponse::new(request.channel_id, status).build(&mut buf) {
            Ok(len) => self.send_to(&buf[..len], source),
            Err(err) => log::warn!("building connection state response failed: {err}"),
        }
    }

    /// Tear down the named downstream channel. The slot survives until
    /// both channels are gone; closing the management channel also closes
    /// the upstream management connection.
    fn handle_disconnect(&self, request: &DisconnectRequest, source: SocketAddrV4) {
        let mut slot = lock(&self.session);
        let verdict = slot
            .session
            .as_mut()
            .filter(|s| s.remote_ip == *source.ip())
            .map(|session| {
                if session.channel_id == Some(request.channel_id) {
                    session.channel_id = None;
                    (ErrorCode::NoError, false)
                } else if session.management_channel_id == Some(request.channel_id) {
                    session.management_channel_id = None;
                    (ErrorCode::NoError, true)
                } else {
                    (ErrorCode::ConnectionId, false)
                }
            });
        let (status, drop_management) = verdict.unwrap_or((ErrorCode::ConnectionId, false));
        if status.is_ok()
            && slot
                .session
                .as_ref()
                .is_some_and(|s| s.channel_id.is_none() && s.management_channel_id.is_none())
        {
            log::info!("session with {} closed", source.ip());
            slot.session = None;
        }
        drop(slot);

        let mut buf = [0u8; MAX_FRAME_SIZE];
        match DisconnectResponse::new(request.channel_id, status).build(&mut buf) {
            Ok(len) => self.send_to(&buf[..len], source),
            Err(err) => log::warn!("building disconnect response failed: {err}"),
        }
        if drop_management {
            self.client.disconnect_management();
        }
    }

    /// Downstream acknowledgements for forwarded frames carry no payload;
    /// they only refresh the session.
    fn absorb_ack(&self, channel_id: u8, source: SocketAddrV4) {
        let mut slot = lock(&self.session);
        let known = slot
            .session
            .as_mut()
            .filter(|s| s.remote_ip == *source.ip())
            .is_some_and(|session| {
                let known = session.channel_id == Some(channel_id)
                    || session.management_channel_id == Some(channel_id);
                if known {
                    session.last_packet_received = Instant::now();
                }
                known
            });
        if !known {
            log::debug!("dropping acknowledgement from {source} for unknown channel {channel_id}");
        }
    }

    fn expire_session(&self) {
        let expired = {
            let slot = lock(&self.session);
            slot.session
                .as_ref()
                .is_some_and(|s| s.last_packet_received.elapsed() >= self.config.session_timeout)
        };
        if expired {
            self.evict_session("inactive past the session timeout");
        }
    }

    /// Drop the session slot and, if it held a management channel, the
    /// upstream management connection with it.
    fn evict_session(&self, reason: &str) {
        let management = {
            let mut slot = lock(&self.session);
            match slot.session.take() {
                Some(session) => {
                    log::info!("dropping session with {} ({reason})", session.remote_ip);
                    session.management_channel_id.is_some()
                }
                None => false,
            }
        };
        if management {
            self.client.disconnect_management();
        }
    }

    /// Pump thread: upstream events become downstream frames. Returns the
    /// receiver so the relay can be restarted.
    fn run_pump(&self, events: Receiver<TunnelEvent>) -> Receiver<TunnelEvent> {
        while !self.stop.load(Ordering::SeqCst) {
            match events.recv_timeout(PUMP_TICK) {
                Ok(TunnelEvent::Frame(frame)) => self.forward_frame(frame),
                Ok(TunnelEvent::Management(cemi)) => self.forward_management(&cemi),
                Ok(TunnelEvent::Reconnected) => log::info!("upstream tunnel connected"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("upstream event channel closed");
                    break;
                }
            }
        }
        log::debug!("relay pump thread stopped");
        events
    }

    fn forward_frame(&self, mut frame: CemiFrame) {
        let cemi = match frame.bytes() {
            Ok(cemi) => cemi,
            Err(err) => {
                log::warn!("encoding frame for downstream failed: {err}");
                return;
            }
        };
        let target = {
            let mut slot = lock(&self.session);
            slot.session.as_mut().and_then(|session| {
                let channel_id = session.channel_id?;
                let sequence = session.sequence_out;
                session.sequence_out = session.sequence_out.wrapping_add(1);
                Some((
                    channel_id,
                    sequence,
                    SocketAddrV4::new(session.remote_ip, session.data_port),
                ))
            })
        };
        let Some((channel_id, sequence, dest)) = target else {
            log::debug!("no downstream tunnel session, dropping frame");
            return;
        };

        match KnxIpPacket::tunneling_request(channel_id, sequence, cemi) {
            Ok(request) => self.send_to(request.data(), dest),
            Err(err) => log::warn!("encoding downstream tunneling request failed: {err}"),
        }
    }

    fn forward_management(&self, cemi: &[u8]) {
        let target = {
            let mut slot = lock(&self.session);
            slot.session.as_mut().and_then(|session| {
                let channel_id = session.management_channel_id?;
                let sequence = session.management_sequence_out;
                session.management_sequence_out = session.management_sequence_out.wrapping_add(1);
                Some((
                    channel_id,
                    sequence,
                    SocketAddrV4::new(session.remote_ip, session.data_port),
                ))
            })
        };
        let Some((channel_id, sequence, dest)) = target else {
            log::debug!("no downstream management session, dropping frame");
            return;
        };

        match KnxIpPacket::config_request(channel_id, sequence, cemi) {
            Ok(request) => self.send_to(request.data(), dest),
            Err(err) => log::warn!("encoding downstream configuration request failed: {err}"),
        }
    }

    fn send_connect_error(&self, status: ErrorCode, dest: SocketAddrV4) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        match ConnectResponse::build_error(status, &mut buf) {
            Ok(len) => self.send_to(&buf[..len], dest),
            Err(err) => log::warn!("building connect error response failed: {err}"),
        }
    }

    /// Acknowledge a downstream request; `ack` is the builder result
    fn send_ack(&self, ack: Result<KnxIpPacket>, dest: SocketAddrV4) {
        match ack {
            Ok(packet) => self.send_to(packet.data(), dest),
            Err(err) => log::warn!("building acknowledgement failed: {err}"),
        }
    }

    fn send_to(&self, data: &[u8], dest: SocketAddrV4) {
        if let Err(err) = self.socket.send_to(data, dest) {
            log::warn!("send to {dest} failed: {err}");
        }
    }
}

/// Local IPv4 address of the interface routing toward `toward`
fn detect_local_ip(toward: SocketAddrV4) -> Option<Ipv4Addr> {
    let probe = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
        Ok(probe) => probe,
        Err(err) => {
            log::debug!("probe socket bind failed: {err}");
            return None;
        }
    };
    if let Err(err) = probe.connect(toward) {
        log::debug!("probe connect toward {toward} failed: {err}");
        return None;
    }
    match probe.local_addr() {
        Ok(SocketAddr::V4(addr)) => Some(*addr.ip()),
        Ok(SocketAddr::V6(_)) => None,
        Err(err) => {
            log::debug!("reading probe socket address failed: {err}");
            None
        }
    }
}
