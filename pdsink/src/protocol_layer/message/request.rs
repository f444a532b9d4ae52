//! Request data objects, and helpers for constructing them from source
//! capabilities.
use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use super::pdo;
use crate::_20millivolts_mod::_20millivolts;
use crate::_50milliamperes_mod::_50milliamperes;
use crate::units::{ElectricCurrent, ElectricPotential};

bitfield! {
    /// A raw RDO; only the object position is decoded.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct RawDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7.
        pub object_position: u8 @ 28..=31,
    }
}

bitfield! {
    /// An RDO addressing a fixed or variable supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FixedVariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7.
        pub object_position: u8 @ 28..=31,
        /// Whether the sink responds to GotoMin messages.
        pub giveback_flag: bool @ 27,
        /// The selected PDO cannot satisfy the sink's power needs.
        pub capability_mismatch: bool @ 26,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend.
        pub no_usb_suspend: bool @ 24,
        /// Operating current in 10 mA units.
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum (or, with giveback, minimum) operating current in 10 mA units.
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl FixedVariableSupply {
    /// Serialize the RDO, returning the number of bytes written.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.0);
        4
    }

    /// The requested operating current.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }
}

bitfield! {
    /// An RDO addressing a programmable power supply APDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Pps(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=7.
        pub object_position: u8 @ 28..=31,
        /// The selected APDO cannot satisfy the sink's power needs.
        pub capability_mismatch: bool @ 26,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend.
        pub no_usb_suspend: bool @ 24,
        /// Output voltage in 20 mV units.
        pub raw_output_voltage: u16 @ 9..=20,
        /// Operating current in 50 mA units.
        pub raw_operating_current: u16 @ 0..=6,
    }
}

impl Pps {
    /// Serialize the RDO, returning the number of bytes written.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.0);
        4
    }

    /// The requested output voltage.
    pub fn output_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_20millivolts>(self.raw_output_voltage().into())
    }

    /// The requested operating current.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_operating_current().into())
    }
}

/// Errors that can occur when constructing a request.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The requested voltage does not exist in the source's PDOs.
    VoltageMismatch,
}

/// Requestable voltage levels.
#[derive(Debug)]
pub enum VoltageRequest {
    /// The safe 5 V supply.
    Safe5V,
    /// The highest fixed voltage that the source can supply.
    Highest,
    /// A specific voltage.
    Specific(ElectricPotential),
}

/// Requestable currents.
#[derive(Debug)]
pub enum CurrentRequest {
    /// The highest current that the selected supply can deliver.
    Highest,
    /// A specific current.
    Specific(ElectricCurrent),
}

/// A power request towards the source.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSource {
    /// Request from a fixed or variable supply.
    FixedVariableSupply(FixedVariableSupply),
    /// Request from a programmable power supply.
    Pps(Pps),
    /// A request whose target PDO kind is unknown, e.g. one received from
    /// the port partner. Sinks never originate these.
    Unknown(RawDataObject),
}

impl PowerSource {
    /// The 1-based object position this request addresses.
    pub fn object_position(&self) -> u8 {
        match self {
            PowerSource::FixedVariableSupply(rdo) => rdo.object_position(),
            PowerSource::Pps(rdo) => rdo.object_position(),
            PowerSource::Unknown(rdo) => rdo.object_position(),
        }
    }

    /// Serialize the request's single data object.
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        match self {
            PowerSource::FixedVariableSupply(rdo) => rdo.to_bytes(buf),
            PowerSource::Pps(rdo) => rdo.to_bytes(buf),
            PowerSource::Unknown(rdo) => {
                LittleEndian::write_u32(buf, rdo.0);
                4
            }
        }
    }

    /// Find the highest fixed voltage in the source capabilities.
    ///
    /// Reports the index of the found PDO and the fixed supply instance, or
    /// `None` if there is no fixed supply PDO.
    fn find_highest_fixed_voltage(
        source_capabilities: &pdo::SourceCapabilities,
    ) -> Option<(usize, &pdo::FixedSupply)> {
        let mut selected_pdo = None;

        for (index, cap) in source_capabilities.pdos().iter().enumerate() {
            if let pdo::PowerDataObject::FixedSupply(fixed_supply) = cap {
                selected_pdo = match selected_pdo {
                    None => Some((index, fixed_supply)),
                    Some(x) => {
                        if fixed_supply.voltage() > x.1.voltage() {
                            Some((index, fixed_supply))
                        } else {
                            selected_pdo
                        }
                    }
                };
            }
        }

        selected_pdo
    }

    /// Find a specific fixed voltage in the source capabilities.
    fn find_specific_fixed_voltage(
        source_capabilities: &pdo::SourceCapabilities,
        voltage: ElectricPotential,
    ) -> Option<(usize, &pdo::FixedSupply)> {
        for (index, cap) in source_capabilities.pdos().iter().enumerate() {
            if let pdo::PowerDataObject::FixedSupply(fixed_supply) = cap {
                if fixed_supply.voltage() == voltage {
                    return Some((index, fixed_supply));
                }
            }
        }

        None
    }

    /// Find a PPS APDO whose voltage range covers the requested voltage.
    fn find_pps_voltage(
        source_capabilities: &pdo::SourceCapabilities,
        voltage: ElectricPotential,
    ) -> Option<(usize, &pdo::ProgrammablePowerSupply)> {
        for (index, cap) in source_capabilities.pdos().iter().enumerate() {
            let pdo::PowerDataObject::Pps(pps) = cap else {
                continue;
            };

            if pps.min_voltage() <= voltage && pps.max_voltage() >= voltage {
                return Some((index, pps));
            }

            trace!("Skip APDO, voltage out of range: {:?}", pps);
        }

        trace!("Could not find suitable PPS voltage");
        None
    }

    /// Create a request for a fixed supply.
    ///
    /// Finds a suitable PDO by evaluating the provided current and voltage
    /// requests against the source capabilities.
    pub fn new_fixed(
        current_request: CurrentRequest,
        voltage_request: VoltageRequest,
        source_capabilities: &pdo::SourceCapabilities,
    ) -> Result<Self, Error> {
        let selected = match voltage_request {
            VoltageRequest::Safe5V => source_capabilities.vsafe_5v().map(|supply| (0, supply)),
            VoltageRequest::Highest => Self::find_highest_fixed_voltage(source_capabilities),
            VoltageRequest::Specific(x) => {
                Self::find_specific_fixed_voltage(source_capabilities, x)
            }
        };

        let Some((index, supply)) = selected else {
            return Err(Error::VoltageMismatch);
        };

        let (current, mismatch) = match current_request {
            CurrentRequest::Highest => (supply.max_current(), false),
            CurrentRequest::Specific(x) => (x, x > supply.max_current()),
        };

        let mut raw_current = current.get::<centiampere>() as u16;

        if raw_current > 0x3ff {
            error!("Clamping invalid current: {} mA", 10 * u32::from(raw_current));
            raw_current = 0x3ff;
        }

        Ok(Self::FixedVariableSupply(
            FixedVariableSupply(0)
                .with_raw_operating_current(raw_current)
                .with_raw_max_operating_current(raw_current)
                .with_object_position((index + 1) as u8)
                .with_capability_mismatch(mismatch)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(true),
        ))
    }

    /// Create a request for a programmable power supply (PPS).
    ///
    /// Finds a suitable APDO by evaluating the provided current request and
    /// voltage against the source capabilities.
    pub fn new_pps(
        current_request: CurrentRequest,
        voltage: ElectricPotential,
        source_capabilities: &pdo::SourceCapabilities,
    ) -> Result<Self, Error> {
        let Some((index, supply)) = Self::find_pps_voltage(source_capabilities, voltage) else {
            return Err(Error::VoltageMismatch);
        };

        let (current, mismatch) = match current_request {
            CurrentRequest::Highest => (supply.max_current(), false),
            CurrentRequest::Specific(x) => (x, x > supply.max_current()),
        };

        let mut raw_current = current.get::<_50milliamperes>() as u16;

        if raw_current > 0x7f {
            error!("Clamping invalid current: {} mA", 50 * u32::from(raw_current));
            raw_current = 0x7f;
        }

        Ok(Self::Pps(
            Pps(0)
                .with_raw_output_voltage(voltage.get::<_20millivolts>() as u16)
                .with_raw_operating_current(raw_current)
                .with_object_position((index + 1) as u8)
                .with_capability_mismatch(mismatch)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(true),
        ))
    }
}
