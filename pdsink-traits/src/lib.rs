//! Driver traits for the pdsink USB PD sink stack.
//!
//! Provides the register-level contract through which the protocol layer talks
//! to a FUSB302B-class PHY, along with the status register views that the
//! stack inspects.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

use proc_bitfield::bitfield;

/// The largest SOP frame the stack exchanges with the PHY: a 16-bit header
/// followed by up to seven 32-bit data objects.
pub const MAX_MESSAGE_LEN: usize = 30;

bitfield! {
    /// View of the PHY's INTERRUPTA register.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct InterruptA(pub u8): Debug, FromStorage, IntoStorage {
        /// Over-current or over-temperature condition.
        pub i_ocp_temp: bool @ 7,
        /// Toggle logic finished.
        pub i_togdone: bool @ 6,
        /// All soft-reset retries failed.
        pub i_softfail: bool @ 5,
        /// All transmission retries failed without receiving a GoodCRC.
        pub i_retryfail: bool @ 4,
        /// A hard reset ordered set finished transmitting.
        pub i_hardsent: bool @ 3,
        /// A message was transmitted and acknowledged with a GoodCRC.
        pub i_txsent: bool @ 2,
        /// A soft reset ordered set was received.
        pub i_softrst: bool @ 1,
        /// A hard reset ordered set was received.
        pub i_hardrst: bool @ 0,
    }
}

bitfield! {
    /// View of the PHY's INTERRUPTB register.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct InterruptB(pub u8): Debug, FromStorage, IntoStorage {
        /// A GoodCRC acknowledging a received message finished transmitting.
        ///
        /// The acknowledged message waits in the RX FIFO.
        pub i_gcrcsent: bool @ 0,
    }
}

bitfield! {
    /// View of the PHY's STATUS1 register.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Status1(pub u8): Debug, FromStorage, IntoStorage {
        /// RX FIFO empty.
        pub rx_empty: bool @ 5,
        /// RX FIFO full.
        pub rx_full: bool @ 4,
        /// TX FIFO empty.
        pub tx_empty: bool @ 3,
        /// TX FIFO full.
        pub tx_full: bool @ 2,
        /// The chip is over-temperature.
        pub ovrtemp: bool @ 1,
        /// Over-current on VCONN.
        pub ocp: bool @ 0,
    }
}

/// The interrupt and status registers the stack cares about, read atomically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// INTERRUPTA register.
    pub interrupt_a: InterruptA,
    /// INTERRUPTB register.
    pub interrupt_b: InterruptB,
    /// STATUS1 register.
    pub status1: Status1,
}

/// Current level advertised by the source on the CC line.
///
/// In PD 3.0, the advertisement doubles as the collision-avoidance signal:
/// 3.0 A means SinkTxOk, 1.5 A means SinkTxNG.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TypeCCurrent {
    /// No current advertisement (nothing attached, or Ra).
    None,
    /// Default USB current (500/900 mA).
    Default,
    /// 1.5 A at 5 V.
    Current1_5A,
    /// 3.0 A at 5 V.
    Current3_0A,
}

impl TypeCCurrent {
    /// Whether the source permits the sink to start an AMS (PD 3.0).
    pub fn sink_tx_ok(self) -> bool {
        matches!(self, Self::Current3_0A)
    }
}

/// Register-level driver for a FUSB302B-class PHY.
///
/// The PHY owns BMC coding, CRC generation and checking, GoodCRC
/// transmission, and the retry counter; the stack never sees those. All
/// methods are short blocking register transactions; I2C errors are the
/// driver's problem (a corrupt read surfaces as a frame the policy engine
/// rejects).
pub trait Driver {
    /// Reset the PHY's PD logic and flush its FIFOs.
    fn reset(&mut self);

    /// Load a frame into the TX FIFO and start transmission.
    ///
    /// The PHY appends the CRC and performs retries on missing GoodCRC.
    fn send_message(&mut self, data: &[u8]);

    /// Transmit a hard reset ordered set.
    fn send_hard_reset(&mut self);

    /// Read the oldest frame from the RX FIFO into `buffer`.
    ///
    /// `buffer` must hold at least [`MAX_MESSAGE_LEN`] bytes. Returns the
    /// number of bytes read.
    fn read_message(&mut self, buffer: &mut [u8]) -> usize;

    /// Read and clear the interrupt and status registers.
    fn get_status(&mut self) -> Status;

    /// Measure the Type-C current advertisement on the active CC line.
    fn get_typec_current(&mut self) -> TypeCCurrent;

    /// Sample the INT_N line. True while any unmasked interrupt is pending.
    fn intn_asserted(&mut self) -> bool;
}
