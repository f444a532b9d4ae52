//! USB Power Delivery sink stack for FUSB302B-class PHYs.
//!
//! Implements the sink side of USB PD 2.0/3.0 as four cooperating state
//! machines (protocol layer RX and TX, hard reset, policy engine) plus an
//! interrupt poller, all driven by per-task event words and bounded
//! mailboxes. The PHY handles BMC coding, CRC and GoodCRC; the application
//! plugs in through the [`sink::device_policy_manager::DevicePolicyManager`]
//! trait.
//!
//! All five tasks of one port share a [`port::Port`]. Run them with
//! [`port::run`], or spawn each individually on an executor or RTOS of your
//! choice.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

// Must come first so the log macros are visible everywhere.
#[macro_use]
mod fmt;

pub mod event;
pub mod int_n;
pub mod port;
pub mod protocol_layer;
pub mod sink;
pub mod timers;

#[cfg(test)]
mod dummy;

#[macro_use]
extern crate uom;

/// Number of message slots backing each mailbox.
///
/// Sized so that one in-flight transmission, one message under inspection in
/// the receiver, and one message parked at the policy engine can coexist with
/// headroom; posting to a full mailbox is an invariant violation.
pub const MSG_POOL_SIZE: usize = 4;

/// Typed electrical units, expressed as `u32` values.
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}

pub(crate) mod _50milliamperes_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_current;

        @_50milliamperes: 0.05; "_50mA", "_50milliamps", "_50milliamps";
    }
}

pub(crate) mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

pub(crate) mod _20millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_20millivolts: 0.02; "_20mV", "_20millivolts", "_20millivolts";
    }
}

pub(crate) mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

/// Power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerRole {
    /// Supplies power.
    Source,
    /// Consumes power. The only role this stack implements.
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// Data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRole {
    /// Upstream-facing port.
    Ufp,
    /// Downstream-facing port.
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
