//! Shared state of one PD port, and the glue to run its five tasks.
use core::cell::RefCell;
use core::sync::atomic::{AtomicI8, AtomicU8, AtomicU16, Ordering};

use embassy_futures::join::join5;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use pdsink_traits::Driver;

use crate::event::EventWord;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::header::Header;
use crate::protocol_layer::{ProtocolRx, ProtocolTx, hard_reset};
use crate::sink::device_policy_manager::DevicePolicyManager;
use crate::sink::policy_engine::{self, Sink};
use crate::timers::Timer;
use crate::{DataRole, MSG_POOL_SIZE, PowerRole, int_n};

/// The stored RX message ID when no message has been seen since reset.
pub(crate) const MESSAGE_ID_NONE: i8 = -1;

/// Everything the five tasks of one port share.
///
/// The tasks communicate exclusively through the event words, the two
/// mailboxes, and the message-ID counters held here; the PHY is shared behind
/// a short-held blocking mutex. Allocate one `Port` per physical port —
/// there are no globals, so several ports can coexist.
pub struct Port<DRIVER: Driver> {
    phy: Mutex<CriticalSectionRawMutex, RefCell<DRIVER>>,

    /// Policy engine event word.
    pub(crate) pe_events: EventWord,
    /// Protocol RX event word.
    pub(crate) prl_rx_events: EventWord,
    /// Protocol TX event word.
    pub(crate) prl_tx_events: EventWord,
    /// Hard reset event word.
    pub(crate) hard_reset_events: EventWord,

    /// Received messages on their way to the policy engine.
    pub(crate) pe_mailbox: Channel<CriticalSectionRawMutex, Message, MSG_POOL_SIZE>,
    /// Messages the policy engine wants transmitted.
    pub(crate) tx_mailbox: Channel<CriticalSectionRawMutex, Message, MSG_POOL_SIZE>,

    /// The ID of the last message delivered to the policy engine, or
    /// [`MESSAGE_ID_NONE`]. Written by PRL-RX and Hard Reset.
    rx_message_id: AtomicI8,
    /// The ID the next transmission will carry. Advanced by PRL-TX, cleared
    /// by PRL-RX and Hard Reset.
    tx_message_id_counter: AtomicU8,
    /// Header template all outgoing messages derive from. The policy engine
    /// updates the revision during negotiation.
    header_template: AtomicU16,
}

impl<DRIVER: Driver> Port<DRIVER> {
    /// Create the shared state for one port.
    pub fn new(driver: DRIVER) -> Self {
        let template = Header::new_template(
            DataRole::Ufp,
            PowerRole::Sink,
            // Negotiated up in WaitForCapabilities.
            crate::protocol_layer::message::header::SpecificationRevision::R1_0,
        );

        Self {
            phy: Mutex::new(RefCell::new(driver)),
            pe_events: EventWord::new(),
            prl_rx_events: EventWord::new(),
            prl_tx_events: EventWord::new(),
            hard_reset_events: EventWord::new(),
            pe_mailbox: Channel::new(),
            tx_mailbox: Channel::new(),
            rx_message_id: AtomicI8::new(MESSAGE_ID_NONE),
            tx_message_id_counter: AtomicU8::new(0),
            header_template: AtomicU16::new(template.0),
        }
    }

    /// Run a closure with exclusive access to the PHY driver.
    ///
    /// Driver calls are short blocking register transactions; never suspend
    /// while holding the lock.
    pub(crate) fn with_phy<R>(&self, f: impl FnOnce(&mut DRIVER) -> R) -> R {
        self.phy.lock(|phy| f(&mut phy.borrow_mut()))
    }

    /// The ID of the last message delivered to the policy engine.
    pub(crate) fn rx_message_id(&self) -> i8 {
        self.rx_message_id.load(Ordering::SeqCst)
    }

    /// Store the ID of a freshly delivered message.
    pub(crate) fn store_rx_message_id(&self, message_id: u8) {
        self.rx_message_id.store(message_id as i8, Ordering::SeqCst);
    }

    /// Forget the stored RX message ID.
    pub(crate) fn clear_rx_message_id(&self) {
        self.rx_message_id.store(MESSAGE_ID_NONE, Ordering::SeqCst);
    }

    /// The message ID the next transmission will carry.
    pub(crate) fn tx_message_id(&self) -> u8 {
        self.tx_message_id_counter.load(Ordering::SeqCst)
    }

    /// Advance the TX message ID, modulo 8.
    pub(crate) fn advance_tx_message_id(&self) {
        let next = (self.tx_message_id() + 1) % 8;
        self.tx_message_id_counter.store(next, Ordering::SeqCst);
    }

    /// Clear the TX message ID.
    pub(crate) fn clear_tx_message_id(&self) {
        self.tx_message_id_counter.store(0, Ordering::SeqCst);
    }

    /// The header template outgoing messages derive from.
    pub(crate) fn header_template(&self) -> Header {
        Header(self.header_template.load(Ordering::SeqCst))
    }

    /// Replace the header template. Only the policy engine writes this.
    pub(crate) fn store_header_template(&self, template: Header) {
        self.header_template.store(template.0, Ordering::SeqCst);
    }

    /// Ask the policy engine to send a Get_Source_Cap message.
    pub fn request_source_capabilities(&self) {
        self.pe_events.set(policy_engine::EVT_GET_SOURCE_CAP);
    }

    /// Tell the policy engine that the device wants a different power level.
    ///
    /// The device policy manager is re-consulted against the capabilities it
    /// has already seen.
    pub fn request_new_power(&self) {
        self.pe_events.set(policy_engine::EVT_NEW_POWER);
    }

    /// Ask the policy engine to repeat its PPS request now instead of waiting
    /// for the periodic timer.
    pub fn request_pps_adjustment(&self) {
        self.pe_events.set(policy_engine::EVT_PPS_REQUEST);
    }
}

/// Run one port: the INT_N poller, both protocol machines, the hard reset
/// machine, and the policy engine, joined on the caller's executor.
///
/// Never returns; even an unresponsive source leaves the policy engine in its
/// Type-C fallback loop awaiting physical detach.
pub async fn run<DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager>(
    port: &Port<DRIVER>,
    device_policy_manager: DPM,
) {
    let mut sink = Sink::<DRIVER, TIMER, DPM>::new(port, device_policy_manager);
    let mut protocol_rx = ProtocolRx::new(port);
    let mut protocol_tx = ProtocolTx::new(port);
    let mut hard_reset = hard_reset::HardReset::<DRIVER, TIMER>::new(port);

    join5(
        int_n::poll::<DRIVER, TIMER>(port),
        protocol_rx.run(),
        protocol_tx.run(),
        hard_reset.run(),
        sink.run(),
    )
    .await;
}
