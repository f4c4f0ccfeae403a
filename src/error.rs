//! Error types for KNX operations.
//!
//! One crate-wide error enum grouped by concern. Connection errors carry the
//! KNXnet/IP status byte when a gateway answered negatively, so callers (the
//! relay in particular) can echo the exact code downstream.

use core::fmt;

use crate::protocol::constants::ErrorCode;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Wire-format error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum FrameErrorKind {
    Truncated,
    InvalidHeader,
    UnsupportedVersion,
    LengthMismatch,
    UnsupportedService,
    InvalidMessageCode,
    PayloadTooLarge,
    BufferTooSmall,
}

/// Connection error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ConnectionErrorKind {
    Refused,
    AckFailed,
    Lost,
    NotConnected,
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TransportErrorKind {
    SendFailed,
    ReceiveFailed,
    SocketError,
}

/// Addressing error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum AddressingErrorKind {
    InvalidIndividualAddress,
    InvalidGroupAddress,
    OutOfRange,
}

/// DPT error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum DptErrorKind {
    TooShort,
    ValueOutOfRange,
    WrongValueKind,
    UnsupportedType,
}

// =============================================================================
// Structured Error Types
// =============================================================================

/// Wire-format error (truncated packet, bad constants, length mismatch)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameError {
    kind: FrameErrorKind,
}

impl FrameError {
    /// Check if this is a truncated-input error
    pub fn is_truncated(&self) -> bool {
        matches!(self.kind, FrameErrorKind::Truncated)
    }

    /// Check if the declared total length disagreed with the byte count
    pub fn is_length_mismatch(&self) -> bool {
        matches!(self.kind, FrameErrorKind::LengthMismatch)
    }
}

/// Connection error, optionally carrying the gateway's status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionError {
    kind: ConnectionErrorKind,
    status: Option<ErrorCode>,
}

impl ConnectionError {
    /// The KNXnet/IP status byte the gateway answered with, if any
    pub fn status(&self) -> Option<ErrorCode> {
        self.status
    }

    /// Check if the connection was lost
    pub fn is_lost(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::Lost)
    }
}

/// Transport error (socket-level failures)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportError {
    kind: TransportErrorKind,
}

/// Addressing error (invalid address format or range)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressingError {
    kind: AddressingErrorKind,
}

/// DPT codec error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DptError {
    kind: DptErrorKind,
}

impl DptError {
    /// Check if the input payload was shorter than the type requires
    pub fn is_too_short(&self) -> bool {
        matches!(self.kind, DptErrorKind::TooShort)
    }

    /// Check if the type string was not recognized
    pub fn is_unsupported_type(&self) -> bool {
        matches!(self.kind, DptErrorKind::UnsupportedType)
    }
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX protocol error.
///
/// This is the error type returned by all operations in this crate. Remote
/// input never panics; malformed data and negative gateway answers surface
/// here instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KnxError {
    /// Malformed wire data (parsing, lengths, constants)
    Frame(FrameError),
    /// Connection-level failures, including negative gateway statuses
    Connection(ConnectionError),
    /// Socket-level failures
    Transport(TransportError),
    /// Invalid group or individual address
    Addressing(AddressingError),
    /// Datapoint encode/decode failures
    Dpt(DptError),
    /// A bounded wait elapsed without an answer
    Timeout,
}

// =============================================================================
// Convenience Constructors
// =============================================================================

impl KnxError {
    // Wire-format errors
    #[inline]
    pub(crate) const fn truncated() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::Truncated })
    }

    #[inline]
    pub(crate) const fn invalid_header() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::InvalidHeader })
    }

    #[inline]
    pub(crate) const fn unsupported_version() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::UnsupportedVersion })
    }

    #[inline]
    pub(crate) const fn length_mismatch() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::LengthMismatch })
    }

    #[inline]
    pub(crate) const fn unsupported_service() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::UnsupportedService })
    }

    #[inline]
    pub(crate) const fn invalid_message_code() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::InvalidMessageCode })
    }

    #[inline]
    pub(crate) const fn payload_too_large() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::PayloadTooLarge })
    }

    #[inline]
    pub(crate) const fn buffer_too_small() -> Self {
        Self::Frame(FrameError { kind: FrameErrorKind::BufferTooSmall })
    }

    // Connection errors
    pub(crate) const fn connection_refused(status: ErrorCode) -> Self {
        Self::Connection(ConnectionError { kind: ConnectionErrorKind::Refused, status: Some(status) })
    }

    pub(crate) const fn ack_status(status: ErrorCode) -> Self {
        Self::Connection(ConnectionError { kind: ConnectionErrorKind::AckFailed, status: Some(status) })
    }

    pub(crate) const fn connection_lost() -> Self {
        Self::Connection(ConnectionError { kind: ConnectionErrorKind::Lost, status: None })
    }

    pub(crate) const fn not_connected() -> Self {
        Self::Connection(ConnectionError { kind: ConnectionErrorKind::NotConnected, status: None })
    }

    // Transport errors
    pub(crate) const fn send_failed() -> Self {
        Self::Transport(TransportError { kind: TransportErrorKind::SendFailed })
    }

    pub(crate) const fn receive_failed() -> Self {
        Self::Transport(TransportError { kind: TransportErrorKind::ReceiveFailed })
    }

    pub(crate) const fn socket_error() -> Self {
        Self::Transport(TransportError { kind: TransportErrorKind::SocketError })
    }

    // Addressing errors
    pub(crate) const fn invalid_group_address() -> Self {
        Self::Addressing(AddressingError { kind: AddressingErrorKind::InvalidGroupAddress })
    }

    pub(crate) const fn invalid_individual_address() -> Self {
        Self::Addressing(AddressingError { kind: AddressingErrorKind::InvalidIndividualAddress })
    }

    pub(crate) const fn address_out_of_range() -> Self {
        Self::Addressing(AddressingError { kind: AddressingErrorKind::OutOfRange })
    }

    // DPT errors
    pub(crate) const fn dpt_too_short() -> Self {
        Self::Dpt(DptError { kind: DptErrorKind::TooShort })
    }

    pub(crate) const fn dpt_value_out_of_range() -> Self {
        Self::Dpt(DptError { kind: DptErrorKind::ValueOutOfRange })
    }

    pub(crate) const fn dpt_wrong_value_kind() -> Self {
        Self::Dpt(DptError { kind: DptErrorKind::WrongValueKind })
    }

    pub(crate) const fn unsupported_dpt() -> Self {
        Self::Dpt(DptError { kind: DptErrorKind::UnsupportedType })
    }

    // Helpers

    /// Check if this error is a timed-out wait
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// The gateway status byte behind this error, if there is one
    pub fn gateway_status(&self) -> Option<ErrorCode> {
        match self {
            Self::Connection(e) => e.status(),
            _ => None,
        }
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Frame(e) => write!(f, "Wire format error: {:?}", e.kind),
            KnxError::Connection(e) => match e.status {
                Some(status) => {
                    write!(f, "Connection error: {:?} ({})", e.kind, status.describe())
                }
                None => write!(f, "Connection error: {:?}", e.kind),
            },
            KnxError::Transport(e) => write!(f, "Transport error: {:?}", e.kind),
            KnxError::Addressing(e) => write!(f, "Addressing error: {:?}", e.kind),
            KnxError::Dpt(e) => write!(f, "DPT error: {:?}", e.kind),
            KnxError::Timeout => write!(f, "Operation timeout"),
        }
    }
}

// Implement std::error::Error for std-based applications
#[cfg(feature = "std")]
impl std::error::Error for KnxError {}
