//! KNXnet/IP protocol constants and service type identifiers.

/// KNXnet/IP protocol version 1.0
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Standard KNXnet/IP header length (6 bytes)
pub const HEADER_SIZE_10: u8 = 0x06;

/// Standard UDP port for KNXnet/IP communication
pub const KNXNETIP_DEFAULT_PORT: u16 = 3671;

/// Maximum size of a KNXnet/IP datagram handled by this crate
pub const MAX_FRAME_SIZE: usize = 512;

/// Maximum size of an encoded cEMI frame
pub const MAX_CEMI_SIZE: usize = 64;

/// Maximum cEMI payload size (frame minus the 11 fixed bytes)
pub const MAX_PAYLOAD_SIZE: usize = MAX_CEMI_SIZE - 11;

/// KNXnet/IP multicast address used for discovery and routing
pub const KNXNETIP_MULTICAST_ADDR: [u8; 4] = [224, 0, 23, 12];

// =============================================================================
// Service Type Identifiers
// =============================================================================

/// KNXnet/IP Service Type Identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ServiceType {
    // Core services (0x02xx)
    /// `SEARCH_REQUEST` - Device discovery request
    SearchRequest = 0x0201,
    /// `SEARCH_RESPONSE` - Device discovery response
    SearchResponse = 0x0202,
    /// `DESCRIPTION_REQUEST` - Device description request
    DescriptionRequest = 0x0203,
    /// `DESCRIPTION_RESPONSE` - Device description response
    DescriptionResponse = 0x0204,
    /// `CONNECT_REQUEST` - Connection request
    ConnectRequest = 0x0205,
    /// `CONNECT_RESPONSE` - Connection response
    ConnectResponse = 0x0206,
    /// `CONNECTIONSTATE_REQUEST` - Connection state request (keep-alive)
    ConnectionstateRequest = 0x0207,
    /// `CONNECTIONSTATE_RESPONSE` - Connection state response
    ConnectionstateResponse = 0x0208,
    /// `DISCONNECT_REQUEST` - Disconnect request
    DisconnectRequest = 0x0209,
    /// `DISCONNECT_RESPONSE` - Disconnect response
    DisconnectResponse = 0x020A,

    // Device Management (0x03xx)
    /// `DEVICE_CONFIGURATION_REQUEST`
    ConfigRequest = 0x0310,
    /// `DEVICE_CONFIGURATION_ACK`
    ConfigAck = 0x0311,

    // Tunnelling (0x04xx)
    /// `TUNNELLING_REQUEST` - Tunnelled cEMI frame
    TunnelingRequest = 0x0420,
    /// `TUNNELLING_ACK` - Tunnelling acknowledgement
    TunnelingAck = 0x0421,

    // Routing (0x05xx); the routing data path itself is out of scope
    /// `ROUTING_LOST_MESSAGE` - Routing lost message indication
    RoutingLostMessage = 0x0531,
    /// `ROUTING_BUSY` - Routing busy indication
    RoutingBusy = 0x0532,
}

impl ServiceType {
    /// Convert a u16 to `ServiceType`
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0201 => Some(Self::SearchRequest),
            0x0202 => Some(Self::SearchResponse),
            0x0203 => Some(Self::DescriptionRequest),
            0x0204 => Some(Self::DescriptionResponse),
            0x0205 => Some(Self::ConnectRequest),
            0x0206 => Some(Self::ConnectResponse),
            0x0207 => Some(Self::ConnectionstateRequest),
            0x0208 => Some(Self::ConnectionstateResponse),
            0x0209 => Some(Self::DisconnectRequest),
            0x020A => Some(Self::DisconnectResponse),
            0x0310 => Some(Self::ConfigRequest),
            0x0311 => Some(Self::ConfigAck),
            0x0420 => Some(Self::TunnelingRequest),
            0x0421 => Some(Self::TunnelingAck),
            0x0531 => Some(Self::RoutingLostMessage),
            0x0532 => Some(Self::RoutingBusy),
            _ => None,
        }
    }

    /// Convert `ServiceType` to u16
    pub const fn to_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Connection Type Codes
// =============================================================================

/// Connection type code for `DEVICE_MGMT_CONNECTION`
pub const DEVICE_MGMT_CONNECTION: u8 = 0x03;

/// Connection type code for `TUNNEL_CONNECTION`
pub const TUNNEL_CONNECTION: u8 = 0x04;

/// KNX link layer tunnel (CRI option byte)
pub const TUNNEL_LINKLAYER: u8 = 0x02;

// =============================================================================
// Host Protocol Codes
// =============================================================================

/// IPv4 UDP protocol
pub const IPV4_UDP: u8 = 0x01;

/// IPv4 TCP protocol
pub const IPV4_TCP: u8 = 0x02;

// =============================================================================
// Status / Error Codes
// =============================================================================

/// KNXnet/IP status byte carried by response and acknowledgement services.
///
/// Unrecognized values are preserved so they can be logged and echoed exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// `E_NO_ERROR` (0x00)
    NoError,
    /// `E_CONNECTION_ID` (0x21) - unknown channel id
    ConnectionId,
    /// `E_CONNECTION_TYPE` (0x22) - connection type not supported
    ConnectionType,
    /// `E_CONNECTION_OPTION` (0x23) - connection option not supported
    ConnectionOption,
    /// `E_NO_MORE_CONNECTIONS` (0x24) - server is out of connection slots
    NoMoreConnections,
    /// `E_DATA_CONNECTION` (0x26) - error on the data connection
    DataConnection,
    /// `E_KNX_CONNECTION` (0x27) - error on the KNX bus side
    KnxConnection,
    /// `E_TUNNELLING_LAYER` (0x29) - requested tunnelling layer not supported
    TunnelingLayer,
    /// Any status byte this crate does not know by name
    Unknown(u8),
}

impl ErrorCode {
    /// Convert a status byte to `ErrorCode` (total, never fails)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::NoError,
            0x21 => Self::ConnectionId,
            0x22 => Self::ConnectionType,
            0x23 => Self::ConnectionOption,
            0x24 => Self::NoMoreConnections,
            0x26 => Self::DataConnection,
            0x27 => Self::KnxConnection,
            0x29 => Self::TunnelingLayer,
            other => Self::Unknown(other),
        }
    }

    /// Convert `ErrorCode` back to its status byte
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::NoError => 0x00,
            Self::ConnectionId => 0x21,
            Self::ConnectionType => 0x22,
            Self::ConnectionOption => 0x23,
            Self::NoMoreConnections => 0x24,
            Self::DataConnection => 0x26,
            Self::KnxConnection => 0x27,
            Self::TunnelingLayer => 0x29,
            Self::Unknown(other) => other,
        }
    }

    /// Check for `E_NO_ERROR`
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::NoError)
    }

    /// Human-readable description for log output
    pub const fn describe(self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::ConnectionId => "no active connection with the specified id",
            Self::ConnectionType => "connection type not supported",
            Self::ConnectionOption => "connection option not supported",
            Self::NoMoreConnections => "no more connections accepted",
            Self::DataConnection => "error concerning the data connection",
            Self::KnxConnection => "error concerning the KNX connection",
            Self::TunnelingLayer => "requested tunnelling layer not supported",
            Self::Unknown(_) => "unknown status code",
        }
    }
}

// =============================================================================
// cEMI Message Codes
// =============================================================================

/// cEMI Message Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CemiMessageCode {
    /// `L_Data.req` - Data request (client to bus)
    LDataReq = 0x11,
    /// `L_Data.ind` - Data indication (bus to client)
    LDataInd = 0x29,
    /// `L_Data.con` - Data confirmation (gateway confirms a request)
    LDataCon = 0x2E,
    /// `M_PropRead.req` - Property read request (management)
    MPropReadReq = 0xFC,
    /// `M_PropRead.con` - Property read confirmation (management)
    MPropReadCon = 0xFB,
    /// `M_PropWrite.req` - Property write request (management)
    MPropWriteReq = 0xF6,
    /// `M_PropWrite.con` - Property write confirmation (management)
    MPropWriteCon = 0xF5,
    /// `M_PropInfo.ind` - Property info indication (management)
    MPropInfoInd = 0xF7,
    /// `M_Reset.req` - Reset request (management)
    MResetReq = 0xF1,
    /// `M_Reset.ind` - Reset indication (management)
    MResetInd = 0xF0,
}

impl CemiMessageCode {
    /// Convert u8 to `CemiMessageCode`
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x11 => Some(Self::LDataReq),
            0x29 => Some(Self::LDataInd),
            0x2E => Some(Self::LDataCon),
            0xFC => Some(Self::MPropReadReq),
            0xFB => Some(Self::MPropReadCon),
            0xF6 => Some(Self::MPropWriteReq),
            0xF5 => Some(Self::MPropWriteCon),
            0xF7 => Some(Self::MPropInfoInd),
            0xF1 => Some(Self::MResetReq),
            0xF0 => Some(Self::MResetInd),
            _ => None,
        }
    }

    /// Convert `CemiMessageCode` to u8
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is one of the L_Data link-layer codes
    pub const fn is_ldata(self) -> bool {
        matches!(self, Self::LDataReq | Self::LDataInd | Self::LDataCon)
    }
}
