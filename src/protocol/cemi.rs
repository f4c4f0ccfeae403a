//! cEMI L_Data frame codec.
//!
//! cEMI is the telegram format nested inside TUNNELING_REQUEST packets.
//! Only the `L_Data` shape is modeled as a typed frame; management frames
//! (`M_*` message codes) pass through this crate as raw bytes.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌─────────┬─────────┬───────┬───────┬─────────┬─────────┬────────┬──────┬───────────┐
//! │ MsgCode │ AddInfo │ Ctrl1 │ Ctrl2 │ Source  │  Dest   │ Length │ TPCI │ APCI/Data │
//! │ 1 byte  │ 1 byte  │ 1 byte│ 1 byte│ 2 bytes │ 2 bytes │ 1 byte │ 1 b. │ 1 + n b.  │
//! └─────────┴─────────┴───────┴───────┴─────────┴─────────┴────────┴──────┴───────────┘
//! ```
//!
//! A minimal frame is 11 bytes. A one-byte payload that fits into 6 bits
//! rides inside the APCI byte; anything larger follows it, reflected in
//! the length byte (1 + payload length). The 4-bit operation value is
//! split across the two trailing bytes: its upper half sits in the low
//! bits of the TPCI byte, its lower half in the top bits of the APCI byte.
//!
//! A frame parsed from the wire keeps its original serialization; `bytes()`
//! returns it unchanged until a field is modified, after which the frame is
//! re-encoded in the canonical request form (message code `L_Data.req`,
//! control fields `B4 E0`).

use heapless::Vec;

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::error::{KnxError, Result};
use crate::protocol::constants::{CemiMessageCode, MAX_CEMI_SIZE, MAX_PAYLOAD_SIZE};

/// Control field 1 written by the encoder: standard frame, do not repeat,
/// normal priority
const CONTROL1_DEFAULT: u8 = 0xB4;

/// Control field 2 written by the encoder: group address, hop count 6
const CONTROL2_DEFAULT: u8 = 0xE0;

/// Size of an encoded frame without a trailing payload
const BASE_SIZE: usize = 11;

/// APCI operation carried by an `L_Data` frame.
///
/// The wire value is 4 bits wide, reassembled from the two low bits of the
/// TPCI byte and the two top bits of the APCI byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Operation {
    /// Read the value of a group object
    GroupValueRead = 0x0,
    /// Answer to a group value read
    GroupValueResponse = 0x1,
    /// Write the value of a group object
    GroupValueWrite = 0x2,
    /// Set a device's individual address
    IndividualAddressWrite = 0x3,
    /// Ask devices in programming mode for their address
    IndividualAddressRead = 0x4,
    /// Answer to an individual address read
    IndividualAddressResponse = 0x5,
    /// Read an analog/digital converter channel
    AdcRead = 0x6,
    /// Answer to an ADC read
    AdcResponse = 0x7,
    /// Read device memory
    MemoryRead = 0x8,
    /// Answer to a memory read
    MemoryResponse = 0x9,
    /// Write device memory
    MemoryWrite = 0xA,
    /// Manufacturer specific message
    UserMessage = 0xB,
    /// Read the device descriptor
    MaskVersionRead = 0xC,
    /// Answer to a mask version read
    MaskVersionResponse = 0xD,
    /// Restart a device
    Restart = 0xE,
    /// Escape to the extended APCI range
    Escape = 0xF,
}

impl Operation {
    /// Convert the low 4 bits of a value to an `Operation`
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::GroupValueRead,
            0x1 => Self::GroupValueResponse,
            0x2 => Self::GroupValueWrite,
            0x3 => Self::IndividualAddressWrite,
            0x4 => Self::IndividualAddressRead,
            0x5 => Self::IndividualAddressResponse,
            0x6 => Self::AdcRead,
            0x7 => Self::AdcResponse,
            0x8 => Self::MemoryRead,
            0x9 => Self::MemoryResponse,
            0xA => Self::MemoryWrite,
            0xB => Self::UserMessage,
            0xC => Self::MaskVersionRead,
            0xD => Self::MaskVersionResponse,
            0xE => Self::Restart,
            _ => Self::Escape,
        }
    }

    /// Convert to the 4-bit wire value
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Owned cEMI `L_Data` frame.
///
/// # Example
///
/// ```
/// use knx_tunnel::protocol::cemi::CemiFrame;
/// use knx_tunnel::{ga, IndividualAddress};
///
/// let mut frame = CemiFrame::group_value_write(
///     IndividualAddress::from(0),
///     ga!(4/7/1),
///     &[0x01],
/// )?;
///
/// let bytes = frame.bytes()?;
/// assert_eq!(bytes.len(), 11);
/// assert_eq!(bytes[0], 0x11); // L_Data.req
/// # Ok::<(), knx_tunnel::KnxError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CemiFrame {
    message_code: CemiMessageCode,
    source: IndividualAddress,
    destination: GroupAddress,
    operation: Operation,
    numbered: bool,
    tpdu_sequence: u8,
    payload: Vec<u8, MAX_PAYLOAD_SIZE>,
    /// Wire bytes this frame was parsed from, dropped on any mutation
    raw: Option<Vec<u8, MAX_CEMI_SIZE>>,
}

impl CemiFrame {
    /// Minimum size of a parseable frame
    pub const MIN_SIZE: usize = BASE_SIZE;

    /// Create a new frame with an empty payload
    pub fn new(
        operation: Operation,
        source: IndividualAddress,
        destination: GroupAddress,
    ) -> Self {
        Self {
            message_code: CemiMessageCode::LDataReq,
            source,
            destination,
            operation,
            numbered: false,
            tpdu_sequence: 0,
            payload: Vec::new(),
            raw: None,
        }
    }

    /// Create a `GroupValueWrite` frame carrying `payload`
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is larger than [`MAX_PAYLOAD_SIZE`].
    pub fn group_value_write(
        source: IndividualAddress,
        destination: GroupAddress,
        payload: &[u8],
    ) -> Result<Self> {
        let mut frame = Self::new(Operation::GroupValueWrite, source, destination);
        frame.set_payload(payload)?;
        Ok(frame)
    }

    /// Create a `GroupValueRead` frame
    pub fn group_value_read(source: IndividualAddress, destination: GroupAddress) -> Self {
        Self::new(Operation::GroupValueRead, source, destination)
    }

    /// Create a `GroupValueResponse` frame carrying `payload`
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is larger than [`MAX_PAYLOAD_SIZE`].
    pub fn group_value_response(
        source: IndividualAddress,
        destination: GroupAddress,
        payload: &[u8],
    ) -> Result<Self> {
        let mut frame = Self::new(Operation::GroupValueResponse, source, destination);
        frame.set_payload(payload)?;
        Ok(frame)
    }

    /// Parse an `L_Data` frame from cEMI bytes.
    ///
    /// Accepts message codes `L_Data.req` (0x11) and `L_Data.ind` (0x29)
    /// only. Additional-info bytes after the message code are skipped. The
    /// original bytes are retained and returned by [`bytes`](Self::bytes)
    /// until a field is modified.
    ///
    /// # Errors
    ///
    /// Returns an error for truncated input, an unexpected message code or
    /// a payload larger than this crate handles.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(KnxError::truncated());
        }

        let message_code = match CemiMessageCode::from_u8(data[0]) {
            Some(code @ (CemiMessageCode::LDataReq | CemiMessageCode::LDataInd)) => code,
            _ => return Err(KnxError::invalid_message_code()),
        };

        let offset = 2 + usize::from(data[1]);
        // Fixed part after any additional info:
        // ctrl1 ctrl2 source(2) dest(2) length tpci apci
        if data.len() < offset + 9 {
            return Err(KnxError::truncated());
        }

        let source =
            IndividualAddress::from(u16::from_be_bytes([data[offset + 2], data[offset + 3]]));
        let destination =
            GroupAddress::from(u16::from_be_bytes([data[offset + 4], data[offset + 5]]));

        let npdu_length = usize::from(data[offset + 6]);
        if npdu_length == 0 {
            return Err(KnxError::truncated());
        }
        let end = offset + 8 + npdu_length;
        if data.len() < end {
            return Err(KnxError::truncated());
        }

        let tpci = data[offset + 7];
        let apci = data[offset + 8];
        let numbered = tpci & 0x40 != 0;
        let tpdu_sequence = (tpci >> 2) & 0x0F;
        let operation = Operation::from_u8(((tpci & 0x03) << 2) | (apci >> 6));

        let mut payload = Vec::new();
        if npdu_length == 1 {
            // Minimal frame: the payload is packed into the APCI byte
            let _ = payload.push(apci & 0x3F);
        } else {
            payload
                .extend_from_slice(&data[offset + 9..end])
                .map_err(|_| KnxError::payload_too_large())?;
        }

        let mut raw = Vec::new();
        raw.extend_from_slice(&data[..end])
            .map_err(|_| KnxError::payload_too_large())?;

        Ok(Self {
            message_code,
            source,
            destination,
            operation,
            numbered,
            tpdu_sequence,
            payload,
            raw: Some(raw),
        })
    }

    /// Encode this frame into `buf`, returning the encoded length.
    ///
    /// Always emits the canonical request form: message code `L_Data.req`,
    /// no additional info, control fields `B4 E0`.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is smaller than [`encoded_len`](Self::encoded_len).
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let packed = self.payload_fits_apci();
        let extra = if packed { 0 } else { self.payload.len() };
        let total = BASE_SIZE + extra;
        if buf.len() < total {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = CemiMessageCode::LDataReq.to_u8();
        buf[1] = 0x00;
        buf[2] = CONTROL1_DEFAULT;
        buf[3] = CONTROL2_DEFAULT;
        buf[4..6].copy_from_slice(&self.source.raw().to_be_bytes());
        buf[6..8].copy_from_slice(&self.destination.raw().to_be_bytes());
        buf[8] = (1 + extra) as u8;

        let op = self.operation.to_u8();
        let mut tpci = op >> 2;
        if self.numbered {
            tpci |= 0x40 | ((self.tpdu_sequence & 0x0F) << 2);
        }
        buf[9] = tpci;

        let apci = (op & 0x03) << 6;
        if packed {
            buf[10] = apci | (self.payload[0] & 0x3F);
        } else {
            buf[10] = apci;
            buf[11..total].copy_from_slice(&self.payload);
        }

        Ok(total)
    }

    /// Wire bytes of this frame.
    ///
    /// Returns the retained serialization when the frame came off the wire
    /// unmodified, otherwise encodes (and caches) the canonical form.
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn bytes(&mut self) -> Result<&[u8]> {
        if self.raw.is_none() {
            let mut buf = [0u8; MAX_CEMI_SIZE];
            let len = self.encode(&mut buf)?;
            let mut raw = Vec::new();
            let _ = raw.extend_from_slice(&buf[..len]);
            self.raw = Some(raw);
        }
        Ok(self.raw.as_deref().unwrap_or(&[]))
    }

    /// Length [`encode`](Self::encode) will produce
    pub fn encoded_len(&self) -> usize {
        if self.payload_fits_apci() {
            BASE_SIZE
        } else {
            BASE_SIZE + self.payload.len()
        }
    }

    fn payload_fits_apci(&self) -> bool {
        self.payload.len() == 1 && self.payload[0] <= 0x3F
    }

    /// Message code this frame was built or parsed with
    #[inline]
    pub const fn message_code(&self) -> CemiMessageCode {
        self.message_code
    }

    /// Source individual address
    #[inline]
    pub const fn source(&self) -> IndividualAddress {
        self.source
    }

    /// Destination group address
    #[inline]
    pub const fn destination(&self) -> GroupAddress {
        self.destination
    }

    /// APCI operation
    #[inline]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Whether this is a numbered (connection-oriented) telegram
    #[inline]
    pub const fn is_numbered(&self) -> bool {
        self.numbered
    }

    /// TPDU sequence number of a numbered telegram (4 bits)
    #[inline]
    pub const fn tpdu_sequence(&self) -> u8 {
        self.tpdu_sequence
    }

    /// Payload bytes
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload, dropping any cached serialization
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is larger than [`MAX_PAYLOAD_SIZE`].
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.payload.clear();
        self.payload
            .extend_from_slice(payload)
            .map_err(|_| KnxError::payload_too_large())?;
        self.raw = None;
        Ok(())
    }

    /// Replace the operation, dropping any cached serialization
    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
        self.raw = None;
    }

    /// Replace the source address, dropping any cached serialization
    pub fn set_source(&mut self, source: IndividualAddress) {
        self.source = source;
        self.raw = None;
    }

    /// Replace the destination address, dropping any cached serialization
    pub fn set_destination(&mut self, destination: GroupAddress) {
        self.destination = destination;
        self.raw = None;
    }

    /// Mark this telegram numbered with the given TPDU sequence (4 bits),
    /// dropping any cached serialization
    pub fn set_numbered(&mut self, numbered: bool, tpdu_sequence: u8) {
        self.numbered = numbered;
        self.tpdu_sequence = tpdu_sequence & 0x0F;
        self.raw = None;
    }
}
