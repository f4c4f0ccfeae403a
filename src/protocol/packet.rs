//! Owned KNXnet/IP packet representation.
//!
//! [`KnxIpPacket`] pairs the raw datagram bytes with one typed body variant
//! selected by the service type. The raw bytes are kept for the whole life
//! of the packet: acknowledgements echo them, and the relay rewrites
//! gateway-chosen responses by patching individual bytes instead of
//! re-synthesizing the body, so protocol minutiae the gateway picked
//! (CRD contents, reserved bytes) survive byte-exactly.
//!
//! Services this crate does not act on (search, routing indications,
//! unknown ids) still parse, as [`PacketBody::Other`], so they can be
//! logged and dropped with their numeric service id.

use heapless::Vec;

use crate::error::{KnxError, Result};
use crate::protocol::constants::{ErrorCode, ServiceType, MAX_FRAME_SIZE};
use crate::protocol::frame::{Hpai, KnxnetIpFrame, KnxnetIpHeader};
use crate::protocol::services::{
    ConfigAck, ConfigRequest, ConnectRequest, ConnectResponse, ConnectionHeader,
    ConnectionStateRequest, ConnectionStateResponse, DisconnectRequest, DisconnectResponse,
    TunnelingAck, TunnelingRequest,
};

/// Offset of the embedded cEMI frame in tunneling and configuration requests
const CEMI_OFFSET: usize = KnxnetIpHeader::SIZE + ConnectionHeader::SIZE;

/// Typed body of a [`KnxIpPacket`], selected by service type
#[derive(Debug, Clone)]
pub enum PacketBody {
    /// CONNECT_REQUEST
    ConnectRequest(ConnectRequest),
    /// CONNECT_RESPONSE
    ConnectResponse(ConnectResponse),
    /// CONNECTIONSTATE_REQUEST
    ConnectionStateRequest(ConnectionStateRequest),
    /// CONNECTIONSTATE_RESPONSE
    ConnectionStateResponse(ConnectionStateResponse),
    /// DISCONNECT_REQUEST
    DisconnectRequest(DisconnectRequest),
    /// DISCONNECT_RESPONSE
    DisconnectResponse(DisconnectResponse),
    /// DESCRIPTION_REQUEST (control endpoint of the requester)
    DescriptionRequest(Hpai),
    /// TUNNELING_REQUEST; the cEMI bytes stay in the raw packet
    TunnelingRequest(ConnectionHeader),
    /// TUNNELING_ACK
    TunnelingAck(TunnelingAck),
    /// DEVICE_CONFIGURATION_REQUEST; the cEMI bytes stay in the raw packet
    ConfigRequest(ConnectionHeader),
    /// DEVICE_CONFIGURATION_ACK
    ConfigAck(ConfigAck),
    /// Any service this crate does not act on (search, routing, unknown)
    Other,
}

/// One KNXnet/IP datagram: raw bytes plus the typed body parsed from them
#[derive(Debug, Clone)]
pub struct KnxIpPacket {
    raw: Vec<u8, MAX_FRAME_SIZE>,
    body: PacketBody,
}

impl KnxIpPacket {
    /// Parse one received datagram.
    ///
    /// The header is validated strictly (constants and declared total
    /// length); the body is parsed per service type. Unknown services
    /// parse as [`PacketBody::Other`].
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid header, a total length that differs
    /// from the datagram length, or a malformed body of a known service.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let frame = KnxnetIpFrame::parse(data)?;
        let body_bytes = frame.body();

        let body = match frame.service_type() {
            Some(ServiceType::ConnectRequest) => {
                PacketBody::ConnectRequest(ConnectRequest::parse(body_bytes)?)
            }
            Some(ServiceType::ConnectResponse) => {
                PacketBody::ConnectResponse(ConnectResponse::parse(body_bytes)?)
            }
            Some(ServiceType::ConnectionstateRequest) => {
                PacketBody::ConnectionStateRequest(ConnectionStateRequest::parse(body_bytes)?)
            }
            Some(ServiceType::ConnectionstateResponse) => {
                PacketBody::ConnectionStateResponse(ConnectionStateResponse::parse(body_bytes)?)
            }
            Some(ServiceType::DisconnectRequest) => {
                PacketBody::DisconnectRequest(DisconnectRequest::parse(body_bytes)?)
            }
            Some(ServiceType::DisconnectResponse) => {
                PacketBody::DisconnectResponse(DisconnectResponse::parse(body_bytes)?)
            }
            Some(ServiceType::DescriptionRequest) => {
                PacketBody::DescriptionRequest(Hpai::parse(body_bytes)?)
            }
            Some(ServiceType::TunnelingRequest) => {
                let request = TunnelingRequest::parse(body_bytes)?;
                PacketBody::TunnelingRequest(request.connection_header)
            }
            Some(ServiceType::TunnelingAck) => {
                PacketBody::TunnelingAck(TunnelingAck::parse(body_bytes)?)
            }
            Some(ServiceType::ConfigRequest) => {
                let request = ConfigRequest::parse(body_bytes)?;
                PacketBody::ConfigRequest(request.connection_header)
            }
            Some(ServiceType::ConfigAck) => PacketBody::ConfigAck(ConfigAck::parse(body_bytes)?),
            _ => PacketBody::Other,
        };

        let mut raw = Vec::new();
        raw.extend_from_slice(data)
            .map_err(|_| KnxError::payload_too_large())?;

        Ok(Self { raw, body })
    }

    /// Build a TUNNELING_REQUEST packet
    ///
    /// # Errors
    ///
    /// Returns an error if the cEMI bytes push the frame past
    /// [`MAX_FRAME_SIZE`].
    pub fn tunneling_request(channel_id: u8, sequence_counter: u8, cemi: &[u8]) -> Result<Self> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = TunnelingRequest::new(channel_id, sequence_counter, cemi).build(&mut buf)?;
        Self::parse(&buf[..len])
    }

    /// Build a TUNNELING_ACK packet
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn tunneling_ack(channel_id: u8, sequence_counter: u8, status: ErrorCode) -> Result<Self> {
        let mut buf = [0u8; TunnelingAck::SIZE];
        let len = TunnelingAck::new(channel_id, sequence_counter, status).build(&mut buf)?;
        Self::parse(&buf[..len])
    }

    /// Build a DEVICE_CONFIGURATION_REQUEST packet
    ///
    /// # Errors
    ///
    /// Returns an error if the cEMI bytes push the frame past
    /// [`MAX_FRAME_SIZE`].
    pub fn config_request(channel_id: u8, sequence_counter: u8, cemi: &[u8]) -> Result<Self> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = ConfigRequest::new(channel_id, sequence_counter, cemi).build(&mut buf)?;
        Self::parse(&buf[..len])
    }

    /// Build a DEVICE_CONFIGURATION_ACK packet
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn config_ack(channel_id: u8, sequence_counter: u8, status: ErrorCode) -> Result<Self> {
        let mut buf = [0u8; ConfigAck::SIZE];
        let len = ConfigAck::new(channel_id, sequence_counter, status).build(&mut buf)?;
        Self::parse(&buf[..len])
    }

    /// Raw service type id (bytes 2..4 of the header)
    #[inline]
    pub fn service(&self) -> u16 {
        u16::from_be_bytes([self.raw[2], self.raw[3]])
    }

    /// Service type, if this crate knows it
    #[inline]
    pub fn service_type(&self) -> Option<ServiceType> {
        ServiceType::from_u16(self.service())
    }

    /// Typed body of this packet
    #[inline]
    pub const fn body(&self) -> &PacketBody {
        &self.body
    }

    /// The complete datagram bytes
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.raw
    }

    /// Channel id, for services that carry one
    pub fn channel_id(&self) -> Option<u8> {
        match &self.body {
            PacketBody::ConnectResponse(r) => Some(r.channel_id),
            PacketBody::ConnectionStateRequest(r) => Some(r.channel_id),
            PacketBody::ConnectionStateResponse(r) => Some(r.channel_id),
            PacketBody::DisconnectRequest(r) => Some(r.channel_id),
            PacketBody::DisconnectResponse(r) => Some(r.channel_id),
            PacketBody::TunnelingRequest(h) | PacketBody::ConfigRequest(h) => Some(h.channel_id),
            PacketBody::TunnelingAck(a) => Some(a.channel_id),
            PacketBody::ConfigAck(a) => Some(a.channel_id),
            PacketBody::ConnectRequest(_) | PacketBody::DescriptionRequest(_) | PacketBody::Other => {
                None
            }
        }
    }

    /// Sequence counter, for tunneling and configuration services
    pub fn sequence_counter(&self) -> Option<u8> {
        match &self.body {
            PacketBody::TunnelingRequest(h) | PacketBody::ConfigRequest(h) => {
                Some(h.sequence_counter)
            }
            PacketBody::TunnelingAck(a) => Some(a.sequence_counter),
            PacketBody::ConfigAck(a) => Some(a.sequence_counter),
            _ => None,
        }
    }

    /// Status code, for responses and acknowledgements
    pub fn status(&self) -> Option<ErrorCode> {
        match &self.body {
            PacketBody::ConnectResponse(r) => Some(r.status),
            PacketBody::ConnectionStateResponse(r) => Some(r.status),
            PacketBody::DisconnectResponse(r) => Some(r.status),
            PacketBody::TunnelingAck(a) => Some(a.status),
            PacketBody::ConfigAck(a) => Some(a.status),
            _ => None,
        }
    }

    /// Embedded cEMI bytes of a tunneling or configuration request
    pub fn cemi(&self) -> Option<&[u8]> {
        match &self.body {
            PacketBody::TunnelingRequest(_) | PacketBody::ConfigRequest(_) => {
                self.raw.get(CEMI_OFFSET..)
            }
            _ => None,
        }
    }

    /// Message code of the embedded cEMI frame, if there is one
    pub fn cemi_message_code(&self) -> Option<u8> {
        self.cemi().and_then(|cemi| cemi.first()).copied()
    }

    /// Clone a received CONNECT_RESPONSE with the channel id and data
    /// endpoint rewritten.
    ///
    /// Used by the relay to answer a downstream client from the upstream
    /// response template; the status byte and CRD stay exactly as the
    /// gateway sent them.
    ///
    /// # Errors
    ///
    /// Returns an error if this packet is not a full CONNECT_RESPONSE.
    pub fn patched_connect_response(&self, channel_id: u8, data_endpoint: Hpai) -> Result<Self> {
        if !matches!(self.body, PacketBody::ConnectResponse(_)) || self.raw.len() < 16 {
            return Err(KnxError::unsupported_service());
        }

        let mut patched = self.raw.clone();
        patched[6] = channel_id;
        data_endpoint.encode(&mut patched[8..16])?;
        Self::parse(&patched)
    }

    /// Clone a received DESCRIPTION_REQUEST with the control endpoint
    /// rewritten, for forwarding on behalf of the original requester.
    ///
    /// # Errors
    ///
    /// Returns an error if this packet is not a DESCRIPTION_REQUEST.
    pub fn patched_description_request(&self, control_endpoint: Hpai) -> Result<Self> {
        if !matches!(self.body, PacketBody::DescriptionRequest(_)) || self.raw.len() < 14 {
            return Err(KnxError::unsupported_service());
        }

        let mut patched = self.raw.clone();
        control_endpoint.encode(&mut patched[6..14])?;
        Self::parse(&patched)
    }
}
