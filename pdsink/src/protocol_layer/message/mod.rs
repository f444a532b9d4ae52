//! The PD message model: headers, payload data, and (de)serialization.
pub mod header;
pub mod pdo;
pub mod request;

use byteorder::{ByteOrder, LittleEndian};
use header::{DataMessageType, ExtendedHeader, Header, MessageType};
use heapless::Vec;
use pdo::{PowerDataObject, SinkCapabilities, SourceCapabilities};

/// The largest extended-message payload a PD 2.0 style (legacy) receiver must
/// accept without chunking support.
pub const MAX_EXTENDED_LEGACY_LEN: u16 = 26;

/// Payload data carried by data and extended messages.
#[derive(Debug, Clone)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Data {
    /// Source capability data.
    SourceCapabilities(SourceCapabilities),
    /// A request for power from the source.
    Request(request::PowerSource),
    /// Sink capability data, sent in response to Get_Sink_Cap.
    SinkCapabilities(SinkCapabilities),
    /// The extended header of an extended message. The payload itself is not
    /// reassembled; the policy engine only needs the advertised size.
    Extended(ExtendedHeader),
    /// Payload of a message type this stack does not interpret.
    Unknown,
}

impl Data {
    // Serialize message data to a slice, returning the number of written bytes.
    fn to_bytes(&self, payload: &mut [u8]) -> usize {
        match self {
            Self::SourceCapabilities(capabilities) => {
                let mut written = 0;
                for pdo in capabilities.pdos() {
                    LittleEndian::write_u32(&mut payload[written..], pdo.to_raw());
                    written += 4;
                }
                written
            }
            Self::Request(power_source) => power_source.to_bytes(payload),
            Self::SinkCapabilities(capabilities) => {
                let mut written = 0;
                for pdo in &capabilities.0 {
                    LittleEndian::write_u32(&mut payload[written..], pdo.to_raw());
                    written += 4;
                }
                written
            }
            Self::Extended(extended_header) => {
                LittleEndian::write_u16(payload, extended_header.0);
                2
            }
            Self::Unknown => 0,
        }
    }
}

/// A USB PD message.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Payload data, for data and extended messages.
    pub data: Option<Data>,
}

impl Message {
    /// Create a message from a header alone (control messages).
    pub fn new(header: Header) -> Self {
        Self { header, data: None }
    }

    /// Create a message from a header and payload data.
    pub fn new_with_data(header: Header, data: Data) -> Self {
        Self {
            header,
            data: Some(data),
        }
    }

    /// Serialize the message, returning the number of bytes written.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        let mut size = self.header.to_bytes(buffer);

        if let Some(data) = self.data.as_ref() {
            size += data.to_bytes(&mut buffer[size..]);
        }

        size
    }

    /// Parse a message from its binary representation.
    ///
    /// Payloads of message types the stack does not interpret parse to
    /// [`Data::Unknown`]; classification stays with the header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let header = Header::from_bytes(data)?;
        let mut message = Self::new(header);
        let payload = &data[2..];

        if header.extended() {
            message.data = Some(Data::Extended(ExtendedHeader::from_bytes(payload)?));
            return Ok(message);
        }

        match header.message_type() {
            MessageType::Control(_) => (),
            MessageType::Data(DataMessageType::SourceCapabilities) => {
                message.data = Some(Data::SourceCapabilities(SourceCapabilities(
                    Self::parse_pdos(payload, header.num_objects()),
                )));
            }
            MessageType::Data(DataMessageType::SinkCapabilities) => {
                message.data = Some(Data::SinkCapabilities(SinkCapabilities(Self::parse_pdos(
                    payload,
                    header.num_objects(),
                ))));
            }
            MessageType::Data(DataMessageType::Request) if payload.len() >= 4 => {
                // Which RDO layout applies depends on the addressed PDO;
                // without that context only the object position is decoded.
                message.data = Some(Data::Request(request::PowerSource::Unknown(
                    request::RawDataObject(LittleEndian::read_u32(payload)),
                )));
            }
            MessageType::Data(_) => {
                message.data = Some(Data::Unknown);
            }
            MessageType::Extended => unreachable!(),
        }

        Ok(message)
    }

    fn parse_pdos(payload: &[u8], num_objects: usize) -> Vec<PowerDataObject, 7> {
        payload
            .chunks_exact(4)
            .take(num_objects)
            .map(|buf| PowerDataObject::from_raw(LittleEndian::read_u32(buf)))
            .collect()
    }
}

/// Errors that can occur during message parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer is too short.
    #[error("invalid input buffer length (expected {expected:?}, found {found:?})")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field holds the reserved encoding.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::volt;

    use super::header::{ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision};
    use super::pdo::PowerDataObject;
    use super::request::{CurrentRequest, PowerSource, VoltageRequest};
    use super::{Data, Message};
    use crate::dummy::{CAPTURED_SOURCE_CAPABILITIES, sink_header_template};

    #[test]
    fn classifies_control_and_data_messages() {
        let template = sink_header_template();

        let accept = Header::new_control(template, ControlMessageType::Accept);
        assert_eq!(
            accept.message_type(),
            MessageType::Control(ControlMessageType::Accept)
        );

        let request = Header::new_data(template, DataMessageType::Request, 1);
        assert_eq!(
            request.message_type(),
            MessageType::Data(DataMessageType::Request)
        );
    }

    #[test]
    fn parses_captured_source_capabilities() {
        let message = Message::from_bytes(&CAPTURED_SOURCE_CAPABILITIES).unwrap();

        assert_eq!(
            message.header.message_type(),
            MessageType::Data(DataMessageType::SourceCapabilities)
        );
        assert_eq!(
            message.header.spec_revision().unwrap(),
            SpecificationRevision::R3_0
        );

        let Some(Data::SourceCapabilities(capabilities)) = message.data else {
            panic!("expected source capabilities payload");
        };

        let voltages: std::vec::Vec<u32> = capabilities
            .pdos()
            .iter()
            .map(|pdo| match pdo {
                PowerDataObject::FixedSupply(supply) => supply.voltage().get::<volt>(),
                other => panic!("unexpected PDO {other:?}"),
            })
            .collect();
        assert_eq!(voltages, [5, 9, 15, 20]);

        let PowerDataObject::FixedSupply(vsafe_5v) = capabilities.pdos()[0] else {
            unreachable!()
        };
        assert_eq!(vsafe_5v.max_current().get::<milliampere>(), 3000);
        assert!(capabilities.unconstrained_power());
        assert_eq!(capabilities.first_pps_position(), None);
    }

    #[test]
    fn builds_and_serializes_a_specific_voltage_request() {
        let message = Message::from_bytes(&CAPTURED_SOURCE_CAPABILITIES).unwrap();
        let Some(Data::SourceCapabilities(capabilities)) = message.data else {
            unreachable!()
        };

        let request = PowerSource::new_fixed(
            CurrentRequest::Highest,
            VoltageRequest::Specific(crate::units::ElectricPotential::new::<volt>(9)),
            &capabilities,
        )
        .unwrap();

        assert_eq!(request.object_position(), 2);

        let header = Header::new_data(sink_header_template(), DataMessageType::Request, 1);
        let mut buf = [0u8; 6];
        let size = Message::new_with_data(header, Data::Request(request)).to_bytes(&mut buf);
        assert_eq!(size, 6);

        let parsed = Message::from_bytes(&buf).unwrap();
        assert_eq!(
            parsed.header.message_type(),
            MessageType::Data(DataMessageType::Request)
        );
        let PowerSource::FixedVariableSupply(rdo) = request else {
            unreachable!()
        };
        // 2 A at 9 V, no mismatch.
        assert_eq!(rdo.raw_operating_current(), 200);
        assert!(!rdo.capability_mismatch());
    }

    #[test]
    fn extended_header_reports_payload_size() {
        let message = Message::from_bytes(&crate::dummy::chunked_extended_frame(260)).unwrap();

        assert_eq!(message.header.message_type(), MessageType::Extended);
        let Some(Data::Extended(extended_header)) = message.data else {
            panic!("expected extended header");
        };
        assert!(extended_header.chunked());
        assert_eq!(extended_header.data_size(), 260);
        assert!(extended_header.data_size() > super::MAX_EXTENDED_LEGACY_LEN);
    }
}
