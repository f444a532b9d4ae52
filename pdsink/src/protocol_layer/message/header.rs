//! The USB PD message header and message type encodings.
use core::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

use crate::protocol_layer::message::ParseError;
use crate::{DataRole, PowerRole};

bitfield! {
    /// The 16-bit header every message starts with.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Header(pub u16): Debug, FromStorage, IntoStorage {
        /// Zero for control and data messages, one for extended messages.
        pub extended: bool @ 15,
        /// The number of 32-bit data objects that follow the header.
        pub num_objects: u8 [get usize] @ 12..=14,
        /// A rolling counter, maintained by the originator of the message.
        pub message_id: u8 @ 9..=11,
        /// The port's present power role (0 = sink, 1 = source).
        pub port_power_role: bool [get PowerRole, set PowerRole] @ 8,
        /// The negotiated specification revision.
        pub spec_revision: u8 [try_get SpecificationRevision, set SpecificationRevision] @ 6..=7,
        /// The port's data role (0 = UFP, 1 = DFP).
        pub port_data_role: bool [get DataRole, set DataRole] @ 5,
        /// The message type, interpreted together with `extended` and
        /// `num_objects`.
        pub message_type_raw: u8 @ 0..=4,
    }
}

impl Header {
    /// Create a header template carrying the port's roles and revision.
    ///
    /// The policy engine keeps one template per port and derives every
    /// outgoing header from it; the message ID is stamped later, by the
    /// protocol TX machine.
    pub fn new_template(
        port_data_role: DataRole,
        port_power_role: PowerRole,
        spec_revision: SpecificationRevision,
    ) -> Self {
        Self(0)
            .with_port_data_role(port_data_role)
            .with_port_power_role(port_power_role)
            .with_spec_revision(spec_revision)
    }

    /// Create a control message header from a template.
    pub fn new_control(template: Self, message_type: ControlMessageType) -> Self {
        template
            .with_message_type_raw(message_type as u8)
            .with_num_objects(0)
            .with_extended(false)
    }

    /// Create a data message header from a template.
    pub fn new_data(template: Self, message_type: DataMessageType, num_objects: u8) -> Self {
        template
            .with_message_type_raw(message_type as u8)
            .with_num_objects(num_objects)
            .with_extended(false)
    }

    /// Parse a header from its binary representation.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        }

        let header = Header(LittleEndian::read_u16(buf));
        // Reject the reserved revision encoding early.
        header.spec_revision()?;
        Ok(header)
    }

    /// Serialize the header, returning the number of bytes written.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }

    /// The message type that the header encodes.
    ///
    /// A message with the extended bit clear and zero data objects is a
    /// control message; with data objects it is a data message.
    pub fn message_type(&self) -> MessageType {
        if self.extended() {
            MessageType::Extended
        } else if self.num_objects() == 0 {
            MessageType::Control(self.message_type_raw().into())
        } else {
            MessageType::Data(self.message_type_raw().into())
        }
    }
}

bitfield! {
    /// The additional 16-bit header of extended messages.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ExtendedHeader(pub u16): Debug, FromStorage, IntoStorage {
        /// Whether the message is chunked.
        pub chunked: bool @ 15,
        /// Chunk number of this extended message.
        pub chunk_number: u8 @ 11..=14,
        /// Request chunk flag.
        pub request_chunk: bool @ 10,
        /// Total payload size in bytes.
        pub data_size: u16 @ 0..=8,
    }
}

impl ExtendedHeader {
    /// Parse an extended header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        }

        Ok(Self(LittleEndian::read_u16(buf)))
    }
}

/// Specification revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(non_camel_case_types)]
pub enum SpecificationRevision {
    /// Revision 1.0 (deprecated). Doubles as the "not yet negotiated"
    /// value in the header template, since there is no hardware for PD 1.0
    /// signaling.
    R1_0,
    /// Revision 2.0.
    R2_0,
    /// Revision 3.0.
    R3_0,
}

impl TryFrom<u8> for SpecificationRevision {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b00 => Ok(Self::R1_0),
            0b01 => Ok(Self::R2_0),
            0b10 => Ok(Self::R3_0),
            _ => Err(ParseError::UnsupportedSpecificationRevision(value)),
        }
    }
}

impl From<SpecificationRevision> for u8 {
    fn from(value: SpecificationRevision) -> Self {
        match value {
            SpecificationRevision::R1_0 => 0b00,
            SpecificationRevision::R2_0 => 0b01,
            SpecificationRevision::R3_0 => 0b10,
        }
    }
}

/// The kind of message that a header encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    /// A control message.
    Control(ControlMessageType),
    /// A data message.
    Data(DataMessageType),
    /// An extended message. The payload is never reassembled by this stack;
    /// the policy engine only inspects the extended header.
    Extended,
}

/// Types of control messages.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMessageType {
    GoodCRC = 0b0_0001,
    GotoMin = 0b0_0010,
    Accept = 0b0_0011,
    Reject = 0b0_0100,
    Ping = 0b0_0101,
    PsRdy = 0b0_0110,
    GetSourceCap = 0b0_0111,
    GetSinkCap = 0b0_1000,
    DrSwap = 0b0_1001,
    PrSwap = 0b0_1010,
    VconnSwap = 0b0_1011,
    Wait = 0b0_1100,
    SoftReset = 0b0_1101,
    NotSupported = 0b1_0000,
    GetSourceCapExtended = 0b1_0001,
    GetStatus = 0b1_0010,
    FrSwap = 0b1_0011,
    GetPpsStatus = 0b1_0100,
    GetCountryCodes = 0b1_0101,
    Reserved,
}

impl From<u8> for ControlMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::GoodCRC,
            0b0_0010 => Self::GotoMin,
            0b0_0011 => Self::Accept,
            0b0_0100 => Self::Reject,
            0b0_0101 => Self::Ping,
            0b0_0110 => Self::PsRdy,
            0b0_0111 => Self::GetSourceCap,
            0b0_1000 => Self::GetSinkCap,
            0b0_1001 => Self::DrSwap,
            0b0_1010 => Self::PrSwap,
            0b0_1011 => Self::VconnSwap,
            0b0_1100 => Self::Wait,
            0b0_1101 => Self::SoftReset,
            0b1_0000 => Self::NotSupported,
            0b1_0001 => Self::GetSourceCapExtended,
            0b1_0010 => Self::GetStatus,
            0b1_0011 => Self::FrSwap,
            0b1_0100 => Self::GetPpsStatus,
            0b1_0101 => Self::GetCountryCodes,
            _ => Self::Reserved,
        }
    }
}

/// Types of data messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum DataMessageType {
    SourceCapabilities = 0b0_0001,
    Request = 0b0_0010,
    Bist = 0b0_0011,
    SinkCapabilities = 0b0_0100,
    BatteryStatus = 0b0_0101,
    Alert = 0b0_0110,
    GetCountryInfo = 0b0_0111,
    EnterUsb = 0b0_1000,
    VendorDefined = 0b0_1111,
    Reserved,
}

impl From<u8> for DataMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::SourceCapabilities,
            0b0_0010 => Self::Request,
            0b0_0011 => Self::Bist,
            0b0_0100 => Self::SinkCapabilities,
            0b0_0101 => Self::BatteryStatus,
            0b0_0110 => Self::Alert,
            0b0_0111 => Self::GetCountryInfo,
            0b0_1000 => Self::EnterUsb,
            0b0_1111 => Self::VendorDefined,
            _ => Self::Reserved,
        }
    }
}
