//! The protocol layer transmit machine.
//!
//! Serializes transmit requests from the policy engine, stamps the rolling
//! message ID, submits frames to the PHY, and reports the GoodCRC outcome
//! back as events. At most one transmission is in flight at any time.
//!
//! The PHY runs CRCReceiveTimer and the retry counter itself, so there are
//! no retry states here; a transmission either ends in `I_TXSENT` with a
//! GoodCRC in the RX FIFO, or in `I_RETRYFAIL`.
use embassy_futures::yield_now;
use pdsink_traits::{Driver, MAX_MESSAGE_LEN};

use crate::port::Port;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::header::{ControlMessageType, MessageType, SpecificationRevision};
use crate::protocol_layer::rx;
use crate::sink::policy_engine;

/// Reset request, from the hard reset machine or PRL-RX.
pub const EVT_RESET: u32 = 1 << 0;
/// The PHY received a GoodCRC for the transmitted message.
pub const EVT_I_TXSENT: u32 = 1 << 1;
/// The PHY exhausted its transmission retries.
pub const EVT_I_RETRYFAIL: u32 = 1 << 2;
/// Abandon the outstanding transmission; an inbound message preempts it.
pub const EVT_DISCARD: u32 = 1 << 3;
/// The policy engine posted a message into the TX mailbox.
pub const EVT_MSG_TX: u32 = 1 << 4;
/// The next transmission starts an AMS (PD 3.0 collision avoidance).
pub const EVT_START_AMS: u32 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    PhyReset,
    WaitMessage,
    Reset,
    ConstructMessage,
    WaitResponse,
    MatchMessageId,
    MessageSent,
    TransmissionError,
    DiscardMessage,
}

/// The protocol layer TX state machine of one port.
pub struct ProtocolTx<'a, DRIVER: Driver> {
    port: &'a Port<DRIVER>,
    state: State,
    /// The message being transmitted, if any.
    tx_message: Option<Message>,
}

impl<'a, DRIVER: Driver> ProtocolTx<'a, DRIVER> {
    /// Create the machine; its first step resets the PHY.
    pub fn new(port: &'a Port<DRIVER>) -> Self {
        Self {
            port,
            state: State::PhyReset,
            tx_message: None,
        }
    }

    /// Run the machine forever.
    pub async fn run(&mut self) {
        loop {
            self.run_step().await;
        }
    }

    /// Run a single state transition.
    async fn run_step(&mut self) {
        self.state = match self.state {
            State::PhyReset => {
                self.port.with_phy(|phy| phy.reset());

                // A message may be stranded in flight, or still in the
                // mailbox when a reset or discard raced ahead of the
                // transmit request. Either way the policy engine is waiting
                // for an outcome; report the failure exactly once.
                let mut failed = self.tx_message.take().is_some();
                while self.port.tx_mailbox.try_receive().is_ok() {
                    failed = true;
                }
                if failed {
                    self.port.pe_events.set(policy_engine::EVT_TX_ERR);
                }

                State::WaitMessage
            }
            State::WaitMessage => {
                let evt = self
                    .port
                    .prl_tx_events
                    .wait_any(EVT_RESET | EVT_DISCARD | EVT_MSG_TX)
                    .await;

                if evt & EVT_RESET != 0 {
                    State::PhyReset
                } else if evt & EVT_DISCARD != 0 {
                    State::DiscardMessage
                } else if let Ok(message) = self.port.tx_mailbox.try_receive() {
                    let soft_reset = matches!(
                        message.header.message_type(),
                        MessageType::Control(ControlMessageType::SoftReset)
                    );
                    self.tx_message = Some(message);

                    // A Soft_Reset resets the TX layer before it goes out.
                    if soft_reset {
                        State::Reset
                    } else {
                        State::ConstructMessage
                    }
                } else {
                    State::WaitMessage
                }
            }
            State::Reset => {
                self.port.clear_tx_message_id();

                self.port.prl_rx_events.set(rx::EVT_RESET);
                yield_now().await;

                State::ConstructMessage
            }
            State::ConstructMessage => {
                // Make sure nobody wants us to reset first.
                let evt = self.port.prl_tx_events.get_and_clear(EVT_RESET | EVT_DISCARD);

                if evt & EVT_RESET != 0 {
                    State::PhyReset
                } else if evt & EVT_DISCARD != 0 {
                    State::DiscardMessage
                } else {
                    let message_id = self.port.tx_message_id();
                    let message = self.tx_message.as_mut().expect("no message to construct");
                    message.header = message.header.with_message_id(message_id);

                    // PD 3.0 collision avoidance: when starting an AMS, wait
                    // for the source to advertise SinkTxOk.
                    if matches!(
                        self.port.header_template().spec_revision(),
                        Ok(SpecificationRevision::R3_0)
                    ) && self.port.prl_tx_events.get_and_clear(EVT_START_AMS) != 0
                    {
                        while !self.port.with_phy(|phy| phy.get_typec_current()).sink_tx_ok() {
                            yield_now().await;
                        }
                    }

                    let mut buffer = [0u8; MAX_MESSAGE_LEN];
                    let size = self.tx_message.as_ref().expect("no message to construct").to_bytes(&mut buffer);
                    self.port.with_phy(|phy| phy.send_message(&buffer[..size]));

                    State::WaitResponse
                }
            }
            State::WaitResponse => {
                let evt = self
                    .port
                    .prl_tx_events
                    .wait_any(EVT_RESET | EVT_DISCARD | EVT_I_TXSENT | EVT_I_RETRYFAIL)
                    .await;

                if evt & EVT_RESET != 0 {
                    State::PhyReset
                } else if evt & EVT_DISCARD != 0 {
                    State::DiscardMessage
                } else if evt & EVT_I_TXSENT != 0 {
                    State::MatchMessageId
                } else {
                    State::TransmissionError
                }
            }
            State::MatchMessageId => {
                // The GoodCRC acknowledging our transmission waits in the
                // PHY's RX FIFO.
                let mut buffer = [0u8; MAX_MESSAGE_LEN];
                let length = self.port.with_phy(|phy| phy.read_message(&mut buffer));

                match Message::from_bytes(&buffer[..length]) {
                    Ok(good_crc)
                        if matches!(
                            good_crc.header.message_type(),
                            MessageType::Control(ControlMessageType::GoodCRC)
                        ) && good_crc.header.message_id() == self.port.tx_message_id() =>
                    {
                        State::MessageSent
                    }
                    _ => State::TransmissionError,
                }
            }
            State::MessageSent => {
                self.port.advance_tx_message_id();
                self.port.pe_events.set(policy_engine::EVT_TX_DONE);
                self.tx_message = None;

                State::WaitMessage
            }
            State::TransmissionError => {
                warn!("Message transmission failed");
                self.port.advance_tx_message_id();
                self.port.pe_events.set(policy_engine::EVT_TX_ERR);
                self.tx_message = None;

                State::WaitMessage
            }
            State::DiscardMessage => {
                // The abandoned attempt still consumes a message ID.
                if self.tx_message.is_some() {
                    self.port.advance_tx_message_id();
                }

                State::PhyReset
            }
        };
    }
}
