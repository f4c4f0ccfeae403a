//! KNXnet/IP service request and response builders.
//!
//! Builders for the connection-scoped KNXnet/IP services. All builders
//! write complete frames (header included) into caller-provided buffers.
//!
//! ## Supported Services
//!
//! - **CONNECT** - Establish a tunnel or device management connection
//! - **CONNECTIONSTATE** - Heartbeat/keep-alive checks
//! - **DISCONNECT** - Clean connection shutdown
//! - **TUNNELING** - Send/receive KNX telegrams through a tunnel
//! - **DEVICE_CONFIGURATION** - Management frames on a configuration channel
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |                                |
//!   |------ TUNNELING_REQUEST ------>|
//!   |<------ TUNNELING_ACK ----------|
//!   |<------ TUNNELING_REQUEST ------|  (gateway confirmation + bus traffic)
//!   |------- TUNNELING_ACK --------->|
//!   |                                |
//!   |--- CONNECTIONSTATE_REQUEST --->|  (every 60s)
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |                                |
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ErrorCode, ServiceType, DEVICE_MGMT_CONNECTION, TUNNEL_CONNECTION, TUNNEL_LINKLAYER,
};
use crate::protocol::frame::{Hpai, KnxnetIpHeader};

/// Connection header carried by tunneling and configuration frames
///
/// ```text
/// ┌──────────────┬──────────────┬──────────────┬──────────────┐
/// │ Structure Len│  Channel ID  │   Sequence   │   Reserved   │
/// │    (0x04)    │   (1 byte)   │   (1 byte)   │  or Status   │
/// └──────────────┴──────────────┴──────────────┴──────────────┘
/// ```
///
/// The fourth byte is reserved in requests; acknowledgements put their
/// status there ([`TunnelingAck`], [`ConfigAck`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionHeader {
    /// Communication channel ID
    pub channel_id: u8,
    /// Sequence counter
    pub sequence_counter: u8,
}

impl ConnectionHeader {
    /// Size of the connection header in bytes
    pub const SIZE: usize = 4;

    /// Create a new connection header
    pub const fn new(channel_id: u8, sequence_counter: u8) -> Self {
        Self {
            channel_id,
            sequence_counter,
        }
    }

    /// Encode to bytes with a zero reserved byte
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = Self::SIZE as u8;
        buf[1] = self.channel_id;
        buf[2] = self.sequence_counter;
        buf[3] = 0x00;

        Ok(Self::SIZE)
    }

    /// Decode from bytes; the fourth byte is left to the caller
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            channel_id: data[1],
            sequence_counter: data[2],
        })
    }
}

/// Connection Request Information (CRI)
///
/// Selects what kind of channel a CONNECT_REQUEST asks for. A tunnel
/// carries the requested KNX layer and a reserved byte, device management
/// is just the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cri {
    /// Link-layer tunnel connection (type 0x04)
    Tunnel,
    /// Device management connection (type 0x03)
    DeviceManagement,
}

impl Cri {
    /// Encoded size of this CRI
    pub const fn size(self) -> usize {
        match self {
            Self::Tunnel => 4,
            Self::DeviceManagement => 2,
        }
    }

    /// Connection type code this CRI requests
    pub const fn connection_type(self) -> u8 {
        match self {
            Self::Tunnel => TUNNEL_CONNECTION,
            Self::DeviceManagement => DEVICE_MGMT_CONNECTION,
        }
    }

    /// Encode CRI to bytes
    pub fn encode(self, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if buf.len() < size {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = size as u8;
        buf[1] = self.connection_type();
        if let Self::Tunnel = self {
            buf[2] = TUNNEL_LINKLAYER;
            buf[3] = 0x00;
        }

        Ok(size)
    }
}

/// Connection Response Data (CRD) of a successful CONNECT_RESPONSE
///
/// For tunnel connections the gateway reports the KNX individual address
/// assigned to the connection; device management carries no extra data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Crd {
    /// Connection type code the server granted
    pub connection_type: u8,
    /// KNX individual address assigned to a tunnel connection
    pub knx_address: Option<IndividualAddress>,
}

impl Crd {
    /// Decode a length-prefixed CRD
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(KnxError::truncated());
        }

        let length = usize::from(data[0]);
        if length < 2 || data.len() < length {
            return Err(KnxError::truncated());
        }

        let knx_address = if length >= 4 {
            Some(IndividualAddress::from(u16::from_be_bytes([
                data[2], data[3],
            ])))
        } else {
            None
        };

        Ok(Self {
            connection_type: data[1],
            knx_address,
        })
    }
}

/// `CONNECT_REQUEST` service (0x0205)
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    /// Control endpoint (connection management traffic)
    pub control_endpoint: Hpai,
    /// Data endpoint (tunneling traffic)
    pub data_endpoint: Hpai,
    /// Requested connection kind
    pub cri: Cri,
}

impl ConnectRequest {
    /// Create a CONNECT_REQUEST for a link-layer tunnel
    pub const fn tunnel(control_endpoint: Hpai, data_endpoint: Hpai) -> Self {
        Self {
            control_endpoint,
            data_endpoint,
            cri: Cri::Tunnel,
        }
    }

    /// Create a CONNECT_REQUEST for a device management connection
    pub const fn device_management(control_endpoint: Hpai, data_endpoint: Hpai) -> Self {
        Self {
            control_endpoint,
            data_endpoint,
            cri: Cri::DeviceManagement,
        }
    }

    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 * Hpai::SIZE + 2 {
            return Err(KnxError::truncated());
        }

        let control_endpoint = Hpai::parse(&body[0..8])?;
        let data_endpoint = Hpai::parse(&body[8..16])?;
        let cri = match body[17] {
            TUNNEL_CONNECTION => Cri::Tunnel,
            DEVICE_MGMT_CONNECTION => Cri::DeviceManagement,
            _ => return Err(KnxError::unsupported_service()),
        };

        Ok(Self {
            control_endpoint,
            data_endpoint,
            cri,
        })
    }

    /// Build the complete frame, returning the number of bytes written
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let body_len = 2 * Hpai::SIZE + self.cri.size();
        let mut offset =
            KnxnetIpHeader::new(ServiceType::ConnectRequest, body_len as u16).encode(buf)?;

        offset += self.control_endpoint.encode(&mut buf[offset..])?;
        offset += self.data_endpoint.encode(&mut buf[offset..])?;
        offset += self.cri.encode(&mut buf[offset..])?;

        Ok(offset)
    }
}

/// `CONNECT_RESPONSE` service (0x0206)
///
/// A refused connection may come in the short error form carrying only
/// the channel byte and status; `data_endpoint` and `knx_address` are
/// absent in that case.
#[derive(Debug, Clone, Copy)]
pub struct ConnectResponse {
    /// Communication channel ID assigned by the server
    pub channel_id: u8,
    /// Connect status
    pub status: ErrorCode,
    /// Data endpoint assigned by the server
    pub data_endpoint: Option<Hpai>,
    /// KNX individual address assigned to a tunnel connection
    pub knx_address: Option<IndividualAddress>,
}

impl ConnectResponse {
    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(KnxError::truncated());
        }

        let channel_id = body[0];
        let status = ErrorCode::from_u8(body[1]);
        if !status.is_ok() {
            return Ok(Self {
                channel_id,
                status,
                data_endpoint: None,
                knx_address: None,
            });
        }

        if body.len() < 2 + Hpai::SIZE + 2 {
            return Err(KnxError::truncated());
        }
        let data_endpoint = Hpai::parse(&body[2..10])?;
        let crd = Crd::parse(&body[10..])?;

        Ok(Self {
            channel_id,
            status,
            data_endpoint: Some(data_endpoint),
            knx_address: crd.knx_address,
        })
    }

    /// Build the short error form: header, channel 0, status
    pub fn build_error(status: ErrorCode, buf: &mut [u8]) -> Result<usize> {
        let offset = KnxnetIpHeader::new(ServiceType::ConnectResponse, 2).encode(buf)?;
        if buf.len() < offset + 2 {
            return Err(KnxError::buffer_too_small());
        }
        buf[offset] = 0x00;
        buf[offset + 1] = status.to_u8();
        Ok(offset + 2)
    }

    /// Check if the connection was accepted
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// `CONNECTIONSTATE_REQUEST` service (0x0207)
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStateRequest {
    /// Communication channel ID
    pub channel_id: u8,
    /// Control endpoint of the requester
    pub control_endpoint: Hpai,
}

impl ConnectionStateRequest {
    /// Create a new `CONNECTIONSTATE_REQUEST`
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }

    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 + Hpai::SIZE {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            channel_id: body[0],
            control_endpoint: Hpai::parse(&body[2..10])?,
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset =
            KnxnetIpHeader::new(ServiceType::ConnectionstateRequest, 2 + Hpai::SIZE as u16)
                .encode(buf)?;
        if buf.len() < offset + 2 {
            return Err(KnxError::buffer_too_small());
        }

        buf[offset] = self.channel_id;
        buf[offset + 1] = 0x00;
        offset += 2;
        offset += self.control_endpoint.encode(&mut buf[offset..])?;

        Ok(offset)
    }
}

/// `CONNECTIONSTATE_RESPONSE` service (0x0208)
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStateResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Connection status
    pub status: ErrorCode,
}

impl ConnectionStateResponse {
    /// Create a new `CONNECTIONSTATE_RESPONSE`
    pub const fn new(channel_id: u8, status: ErrorCode) -> Self {
        Self { channel_id, status }
    }

    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            channel_id: body[0],
            status: ErrorCode::from_u8(body[1]),
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let offset =
            KnxnetIpHeader::new(ServiceType::ConnectionstateResponse, 2).encode(buf)?;
        if buf.len() < offset + 2 {
            return Err(KnxError::buffer_too_small());
        }
        buf[offset] = self.channel_id;
        buf[offset + 1] = self.status.to_u8();
        Ok(offset + 2)
    }

    /// Check if the connection is still alive
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// `DISCONNECT_REQUEST` service (0x0209)
#[derive(Debug, Clone, Copy)]
pub struct DisconnectRequest {
    /// Communication channel ID
    pub channel_id: u8,
    /// Control endpoint of the requester
    pub control_endpoint: Hpai,
}

impl DisconnectRequest {
    /// Create a new `DISCONNECT_REQUEST`
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }

    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 + Hpai::SIZE {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            channel_id: body[0],
            control_endpoint: Hpai::parse(&body[2..10])?,
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset =
            KnxnetIpHeader::new(ServiceType::DisconnectRequest, 2 + Hpai::SIZE as u16)
                .encode(buf)?;
        if buf.len() < offset + 2 {
            return Err(KnxError::buffer_too_small());
        }

        buf[offset] = self.channel_id;
        buf[offset + 1] = 0x00;
        offset += 2;
        offset += self.control_endpoint.encode(&mut buf[offset..])?;

        Ok(offset)
    }
}

/// `DISCONNECT_RESPONSE` service (0x020A)
#[derive(Debug, Clone, Copy)]
pub struct DisconnectResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Disconnect status
    pub status: ErrorCode,
}

impl DisconnectResponse {
    /// Create a new `DISCONNECT_RESPONSE`
    pub const fn new(channel_id: u8, status: ErrorCode) -> Self {
        Self { channel_id, status }
    }

    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            channel_id: body[0],
            status: ErrorCode::from_u8(body[1]),
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = KnxnetIpHeader::new(ServiceType::DisconnectResponse, 2).encode(buf)?;
        if buf.len() < offset + 2 {
            return Err(KnxError::buffer_too_small());
        }
        buf[offset] = self.channel_id;
        buf[offset + 1] = self.status.to_u8();
        Ok(offset + 2)
    }
}

/// `TUNNELING_REQUEST` service (0x0420)
#[derive(Debug)]
pub struct TunnelingRequest<'a> {
    /// Connection header
    pub connection_header: ConnectionHeader,
    /// cEMI frame bytes
    pub cemi: &'a [u8],
}

impl<'a> TunnelingRequest<'a> {
    /// Create a new `TUNNELING_REQUEST`
    pub const fn new(channel_id: u8, sequence_counter: u8, cemi: &'a [u8]) -> Self {
        Self {
            connection_header: ConnectionHeader::new(channel_id, sequence_counter),
            cemi,
        }
    }

    /// Parse from frame body
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        if body.len() < ConnectionHeader::SIZE {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            connection_header: ConnectionHeader::decode(&body[0..4])?,
            cemi: &body[4..],
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let body_len = ConnectionHeader::SIZE + self.cemi.len();
        let mut offset =
            KnxnetIpHeader::new(ServiceType::TunnelingRequest, body_len as u16).encode(buf)?;
        if buf.len() < offset + body_len {
            return Err(KnxError::buffer_too_small());
        }

        offset += self.connection_header.encode(&mut buf[offset..])?;
        buf[offset..offset + self.cemi.len()].copy_from_slice(self.cemi);
        offset += self.cemi.len();

        Ok(offset)
    }
}

/// `TUNNELING_ACK` service (0x0421)
///
/// Ten bytes on the wire; the status rides in the fourth byte of the
/// connection header.
#[derive(Debug, Clone, Copy)]
pub struct TunnelingAck {
    /// Communication channel ID
    pub channel_id: u8,
    /// Sequence counter being acknowledged
    pub sequence_counter: u8,
    /// Acknowledge status
    pub status: ErrorCode,
}

impl TunnelingAck {
    /// Total size of the frame in bytes
    pub const SIZE: usize = KnxnetIpHeader::SIZE + ConnectionHeader::SIZE;

    /// Create a new `TUNNELING_ACK`
    pub const fn new(channel_id: u8, sequence_counter: u8, status: ErrorCode) -> Self {
        Self {
            channel_id,
            sequence_counter,
            status,
        }
    }

    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < ConnectionHeader::SIZE {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            channel_id: body[1],
            sequence_counter: body[2],
            status: ErrorCode::from_u8(body[3]),
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = KnxnetIpHeader::new(
            ServiceType::TunnelingAck,
            ConnectionHeader::SIZE as u16,
        )
        .encode(buf)?;
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[offset] = ConnectionHeader::SIZE as u8;
        buf[offset + 1] = self.channel_id;
        buf[offset + 2] = self.sequence_counter;
        buf[offset + 3] = self.status.to_u8();

        Ok(Self::SIZE)
    }

    /// Check if the request was acknowledged cleanly
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// `DEVICE_CONFIGURATION_REQUEST` service (0x0310)
///
/// Same shape as a tunneling request, carried on a device management
/// channel. The embedded cEMI is an `M_*` management frame this crate
/// passes through opaquely.
#[derive(Debug)]
pub struct ConfigRequest<'a> {
    /// Connection header
    pub connection_header: ConnectionHeader,
    /// Management cEMI frame bytes
    pub cemi: &'a [u8],
}

impl<'a> ConfigRequest<'a> {
    /// Create a new `DEVICE_CONFIGURATION_REQUEST`
    pub const fn new(channel_id: u8, sequence_counter: u8, cemi: &'a [u8]) -> Self {
        Self {
            connection_header: ConnectionHeader::new(channel_id, sequence_counter),
            cemi,
        }
    }

    /// Parse from frame body
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        if body.len() < ConnectionHeader::SIZE {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            connection_header: ConnectionHeader::decode(&body[0..4])?,
            cemi: &body[4..],
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let body_len = ConnectionHeader::SIZE + self.cemi.len();
        let mut offset =
            KnxnetIpHeader::new(ServiceType::ConfigRequest, body_len as u16).encode(buf)?;
        if buf.len() < offset + body_len {
            return Err(KnxError::buffer_too_small());
        }

        offset += self.connection_header.encode(&mut buf[offset..])?;
        buf[offset..offset + self.cemi.len()].copy_from_slice(self.cemi);
        offset += self.cemi.len();

        Ok(offset)
    }
}

/// `DEVICE_CONFIGURATION_ACK` service (0x0311)
///
/// Ten bytes on the wire, mirroring [`TunnelingAck`].
#[derive(Debug, Clone, Copy)]
pub struct ConfigAck {
    /// Communication channel ID
    pub channel_id: u8,
    /// Sequence counter being acknowledged
    pub sequence_counter: u8,
    /// Acknowledge status
    pub status: ErrorCode,
}

impl ConfigAck {
    /// Total size of the frame in bytes
    pub const SIZE: usize = KnxnetIpHeader::SIZE + ConnectionHeader::SIZE;

    /// Create a new `DEVICE_CONFIGURATION_ACK`
    pub const fn new(channel_id: u8, sequence_counter: u8, status: ErrorCode) -> Self {
        Self {
            channel_id,
            sequence_counter,
            status,
        }
    }

    /// Parse from frame body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < ConnectionHeader::SIZE {
            return Err(KnxError::truncated());
        }

        Ok(Self {
            channel_id: body[1],
            sequence_counter: body[2],
            status: ErrorCode::from_u8(body[3]),
        })
    }

    /// Build the complete frame
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = KnxnetIpHeader::new(
            ServiceType::ConfigAck,
            ConnectionHeader::SIZE as u16,
        )
        .encode(buf)?;
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[offset] = ConnectionHeader::SIZE as u8;
        buf[offset + 1] = self.channel_id;
        buf[offset + 2] = self.sequence_counter;
        buf[offset + 3] = self.status.to_u8();

        Ok(Self::SIZE)
    }

    /// Check if the request was acknowledged cleanly
    pub const fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::KnxnetIpFrame;

    #[test]
    fn test_connect_request_tunnel_layout() {
        let control = Hpai::new([192, 168, 1, 100], 3671);
        let data = Hpai::new([192, 168, 1, 100], 3672);
        let request = ConnectRequest::tunnel(control, data);

        let mut buf = [0u8; 32];
        let len = request.build(&mut buf).unwrap();
        assert_eq!(len, 26);

        // Declared length matches the datagram, CRI is 04 04 02 00
        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), Some(ServiceType::ConnectRequest));
        assert_eq!(&buf[22..26], &[0x04, 0x04, 0x02, 0x00]);

        let parsed = ConnectRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed.cri, Cri::Tunnel);
        assert_eq!(parsed.control_endpoint, control);
        assert_eq!(parsed.data_endpoint, data);
    }

    #[test]
    fn test_connect_request_management_layout() {
        let endpoint = Hpai::new([10, 0, 0, 2], 50000);
        let request = ConnectRequest::device_management(endpoint, endpoint);

        let mut buf = [0u8; 32];
        let len = request.build(&mut buf).unwrap();
        assert_eq!(len, 24);
        assert_eq!(&buf[22..24], &[0x02, 0x03]);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        let parsed = ConnectRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed.cri, Cri::DeviceManagement);
    }

    #[test]
    fn test_connect_response_parse_tunnel() {
        // channel 7, ok, data endpoint, CRD with knx address 15.15.250
        let body = [
            0x07, 0x00, 0x08, 0x01, 192, 168, 1, 1, 0x0E, 0x57, 0x04, 0x04, 0xFF, 0xFA,
        ];
        let response = ConnectResponse::parse(&body).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.channel_id, 7);
        assert_eq!(response.data_endpoint.unwrap().port, 3671);
        assert_eq!(
            response.knx_address.unwrap().to_string_dotted(),
            "15.15.250"
        );
    }

    #[test]
    fn test_connect_response_parse_management() {
        let body = [
            0x09, 0x00, 0x08, 0x01, 192, 168, 1, 1, 0x0E, 0x57, 0x02, 0x03,
        ];
        let response = ConnectResponse::parse(&body).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.knx_address, None);
    }

    #[test]
    fn test_connect_response_short_error_form() {
        let mut buf = [0u8; 16];
        let len = ConnectResponse::build_error(ErrorCode::NoMoreConnections, &mut buf).unwrap();
        assert_eq!(len, 8);
        assert_eq!(&buf[..8], &[0x06, 0x10, 0x02, 0x06, 0x00, 0x08, 0x00, 0x24]);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        let response = ConnectResponse::parse(frame.body()).unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.status, ErrorCode::NoMoreConnections);
        assert_eq!(response.data_endpoint, None);
    }

    #[test]
    fn test_connectionstate_round_trip() {
        let request = ConnectionStateRequest::new(7, Hpai::new([10, 0, 0, 1], 3671));
        let mut buf = [0u8; 16];
        let len = request.build(&mut buf).unwrap();
        assert_eq!(len, 16);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(
            frame.service_type(),
            Some(ServiceType::ConnectionstateRequest)
        );
        let parsed = ConnectionStateRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed.channel_id, 7);

        let response = ConnectionStateResponse::new(7, ErrorCode::NoError);
        let len = response.build(&mut buf).unwrap();
        assert_eq!(len, 8);
        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert!(ConnectionStateResponse::parse(frame.body()).unwrap().is_ok());
    }

    #[test]
    fn test_disconnect_round_trip() {
        let request = DisconnectRequest::new(3, Hpai::nat());
        let mut buf = [0u8; 16];
        let len = request.build(&mut buf).unwrap();
        assert_eq!(len, 16);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(DisconnectRequest::parse(frame.body()).unwrap().channel_id, 3);

        let response = DisconnectResponse::new(3, ErrorCode::NoError);
        let len = response.build(&mut buf).unwrap();
        assert_eq!(len, 8);
        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        let parsed = DisconnectResponse::parse(frame.body()).unwrap();
        assert_eq!(parsed.channel_id, 3);
        assert!(parsed.status.is_ok());
    }

    #[test]
    fn test_tunneling_request_round_trip() {
        let cemi = [0x11, 0x00, 0xB4, 0xE0, 0x00, 0x00, 0x00, 0x47, 0x01, 0x00, 0x81];
        let request = TunnelingRequest::new(7, 3, &cemi);

        let mut buf = [0u8; 64];
        let len = request.build(&mut buf).unwrap();
        assert_eq!(len, 21);
        assert_eq!(&buf[6..10], &[0x04, 0x07, 0x03, 0x00]);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        let parsed = TunnelingRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed.connection_header.channel_id, 7);
        assert_eq!(parsed.connection_header.sequence_counter, 3);
        assert_eq!(parsed.cemi, &cemi);
    }

    #[test]
    fn test_tunneling_ack_is_ten_bytes() {
        let ack = TunnelingAck::new(7, 3, ErrorCode::NoError);
        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();

        assert_eq!(len, 10);
        assert_eq!(
            &buf[..10],
            &[0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x07, 0x03, 0x00]
        );

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        let parsed = TunnelingAck::parse(frame.body()).unwrap();
        assert_eq!(parsed.channel_id, 7);
        assert_eq!(parsed.sequence_counter, 3);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_tunneling_ack_carries_status() {
        let ack = TunnelingAck::new(2, 9, ErrorCode::DataConnection);
        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();
        assert_eq!(buf[9], 0x26);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        let parsed = TunnelingAck::parse(frame.body()).unwrap();
        assert!(!parsed.is_ok());
        assert_eq!(parsed.status, ErrorCode::DataConnection);
    }

    #[test]
    fn test_config_request_round_trip() {
        // M_PropRead.req for object 0, property 0x38
        let cemi = [0xFC, 0x00, 0x00, 0x01, 0x38, 0x10, 0x01];
        let request = ConfigRequest::new(9, 0, &cemi);

        let mut buf = [0u8; 32];
        let len = request.build(&mut buf).unwrap();
        assert_eq!(len, 17);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.service_type(), Some(ServiceType::ConfigRequest));
        let parsed = ConfigRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed.connection_header.channel_id, 9);
        assert_eq!(parsed.cemi, &cemi);
    }

    #[test]
    fn test_config_ack_layout() {
        let ack = ConfigAck::new(9, 0, ErrorCode::NoError);
        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();
        assert_eq!(len, 10);
        assert_eq!(&buf[..6], &[0x06, 0x10, 0x03, 0x11, 0x00, 0x0A]);

        let frame = KnxnetIpFrame::parse(&buf[..len]).unwrap();
        assert!(ConfigAck::parse(frame.body()).unwrap().is_ok());
    }

    #[test]
    fn test_parse_rejects_truncated_bodies() {
        assert!(ConnectResponse::parse(&[0x07]).is_err());
        assert!(TunnelingRequest::parse(&[0x04, 0x07, 0x03]).is_err());
        assert!(TunnelingAck::parse(&[0x04, 0x07]).is_err());
        assert!(ConnectRequest::parse(&[0x08, 0x01]).is_err());
    }
}
