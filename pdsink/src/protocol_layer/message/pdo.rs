//! Power data objects, as carried by capability messages.
use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;
use uom::si::electric_potential::decivolt;

use crate::_50milliamperes_mod::_50milliamperes;
use crate::_50millivolts_mod::_50millivolts;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// The object position used when no PPS APDO is in play.
///
/// Object positions are 1-based and at most 7, so 8 compares greater than
/// every real position.
pub const OBJECT_POSITION_NONE: u8 = 8;

bitfield! {
    /// A raw power data object; only its kind field is decoded.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// The kind of power data object.
        pub kind: u8 @ 30..=31,
    }
}

bitfield! {
    /// A fixed voltage supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply kind (0b00).
        pub kind: u8 @ 30..=31,
        /// Dual-role power.
        pub dual_role_power: bool @ 29,
        /// USB suspend supported.
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power.
        pub unconstrained_power: bool @ 27,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data.
        pub dual_role_data: bool @ 25,
        /// Peak current capability.
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units.
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

#[allow(clippy::derivable_impls)]
impl Default for FixedSupply {
    fn default() -> Self {
        Self(0)
    }
}

impl FixedSupply {
    /// The supply's voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// The maximum current the supply can deliver.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

bitfield! {
    /// A battery supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery kind (0b01).
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units.
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units.
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum allowable power in 250 mW units.
        pub raw_max_power: u16 @ 0..=9,
    }
}

impl Battery {
    /// The highest voltage the battery may present.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// The lowest voltage the battery may present.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// The maximum power the battery can deliver.
    pub fn max_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_power().into())
    }
}

bitfield! {
    /// A variable (non-battery) supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Variable supply kind (0b10).
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units.
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units.
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl VariableSupply {
    /// The highest voltage the supply may present.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// The lowest voltage the supply may present.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// The maximum current the supply can deliver.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

bitfield! {
    /// An SPR programmable power supply APDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ProgrammablePowerSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Augmented kind (0b11).
        pub kind: u8 @ 30..=31,
        /// SPR programmable power supply (0b00).
        pub supply: u8 @ 28..=29,
        /// Whether output power is limited.
        pub pps_power_limited: bool @ 27,
        /// Maximum voltage in 100 mV units.
        pub raw_max_voltage: u8 @ 17..=24,
        /// Minimum voltage in 100 mV units.
        pub raw_min_voltage: u8 @ 8..=15,
        /// Maximum current in 50 mA units.
        pub raw_max_current: u8 @ 0..=6,
    }
}

impl Default for ProgrammablePowerSupply {
    fn default() -> Self {
        Self(0).with_kind(0b11).with_supply(0b00)
    }
}

impl ProgrammablePowerSupply {
    /// The highest programmable voltage.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_max_voltage().into())
    }

    /// The lowest programmable voltage.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_min_voltage().into())
    }

    /// The maximum current the supply can deliver.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_max_current().into())
    }
}

/// One decoded power data object.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDataObject {
    /// Fixed voltage supply.
    FixedSupply(FixedSupply),
    /// Battery supply.
    Battery(Battery),
    /// Variable voltage supply.
    VariableSupply(VariableSupply),
    /// SPR programmable power supply.
    Pps(ProgrammablePowerSupply),
    /// Augmented PDO of a subtype this stack does not negotiate (EPR AVS).
    Unknown(RawPowerDataObject),
}

impl PowerDataObject {
    /// Decode a raw 32-bit PDO.
    pub fn from_raw(raw: u32) -> Self {
        let pdo = RawPowerDataObject(raw);
        match pdo.kind() {
            0b00 => Self::FixedSupply(FixedSupply(raw)),
            0b01 => Self::Battery(Battery(raw)),
            0b10 => Self::VariableSupply(VariableSupply(raw)),
            _ => {
                // Augmented PDO; only the SPR PPS subtype is understood.
                if ProgrammablePowerSupply(raw).supply() == 0b00 {
                    Self::Pps(ProgrammablePowerSupply(raw))
                } else {
                    warn!("Unknown augmented PDO subtype {}", raw);
                    Self::Unknown(pdo)
                }
            }
        }
    }

    /// The raw 32-bit encoding of this PDO.
    pub fn to_raw(&self) -> u32 {
        match self {
            Self::FixedSupply(pdo) => pdo.0,
            Self::Battery(pdo) => pdo.0,
            Self::VariableSupply(pdo) => pdo.0,
            Self::Pps(pdo) => pdo.0,
            Self::Unknown(pdo) => pdo.0,
        }
    }
}

/// The capabilities advertised by a source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceCapabilities(pub(crate) Vec<PowerDataObject, 7>);

impl SourceCapabilities {
    /// Create capabilities from a list of PDOs.
    pub fn new(pdos: Vec<PowerDataObject, 7>) -> Self {
        Self(pdos)
    }

    /// The vSafe5V supply that every source must offer first.
    pub fn vsafe_5v(&self) -> Option<&FixedSupply> {
        self.0.first().and_then(|supply| {
            if let PowerDataObject::FixedSupply(supply) = supply {
                Some(supply)
            } else {
                None
            }
        })
    }

    /// Whether the source has unconstrained power.
    pub fn unconstrained_power(&self) -> bool {
        self.vsafe_5v()
            .map(FixedSupply::unconstrained_power)
            .unwrap_or_default()
    }

    /// The advertised power data objects, in object-position order.
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }

    /// The 1-based object position of the first PPS APDO, if any.
    pub fn first_pps_position(&self) -> Option<u8> {
        self.0
            .iter()
            .position(|pdo| matches!(pdo, PowerDataObject::Pps(_)))
            .map(|index| (index + 1) as u8)
    }
}

/// The capabilities a sink reports in response to Get_Sink_Cap.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SinkCapabilities(pub Vec<PowerDataObject, 7>);

impl SinkCapabilities {
    /// The number of data objects the capabilities message carries.
    pub fn num_objects(&self) -> u8 {
        self.0.len() as u8
    }
}
