//! The protocol layer receive machine.
//!
//! Reads acknowledged messages out of the PHY, filters retransmissions by
//! message ID, and hands fresh messages to the policy engine. A received
//! Soft_Reset resets the protocol layer counters before it is forwarded.
use embassy_futures::yield_now;
use pdsink_traits::{Driver, MAX_MESSAGE_LEN};

use crate::port::Port;
use crate::protocol_layer::message::header::{ControlMessageType, MessageType};
use crate::protocol_layer::message::{Message, ParseError};
use crate::protocol_layer::tx;
use crate::sink::policy_engine;

/// Reset request, from the hard reset machine or PRL-TX.
pub const EVT_RESET: u32 = 1 << 0;
/// The PHY acknowledged a received message with a GoodCRC.
pub const EVT_I_GCRCSENT: u32 = 1 << 1;

const EVT_ALL: u32 = EVT_RESET | EVT_I_GCRCSENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitPhy,
    Reset,
    CheckMessageId,
    StoreMessageId,
}

/// The protocol layer RX state machine of one port.
pub struct ProtocolRx<'a, DRIVER: Driver> {
    port: &'a Port<DRIVER>,
    state: State,
    /// The received message currently under inspection.
    message: Option<Message>,
}

impl<'a, DRIVER: Driver> ProtocolRx<'a, DRIVER> {
    /// Create the machine in its waiting state.
    pub fn new(port: &'a Port<DRIVER>) -> Self {
        Self {
            port,
            state: State::WaitPhy,
            message: None,
        }
    }

    /// Run the machine forever.
    pub async fn run(&mut self) {
        loop {
            self.run_step().await;
        }
    }

    fn read_message(&self) -> Result<Message, ParseError> {
        let mut buffer = [0u8; MAX_MESSAGE_LEN];
        let length = self.port.with_phy(|phy| phy.read_message(&mut buffer));
        Message::from_bytes(&buffer[..length])
    }

    /// Run a single state transition.
    async fn run_step(&mut self) {
        self.state = match self.state {
            State::WaitPhy => {
                let evt = self.port.prl_rx_events.wait_any(EVT_ALL).await;

                if evt & EVT_RESET != 0 {
                    State::WaitPhy
                } else if evt & EVT_I_GCRCSENT != 0 {
                    match self.read_message() {
                        Ok(message) => {
                            let soft_reset = matches!(
                                message.header.message_type(),
                                MessageType::Control(ControlMessageType::SoftReset)
                            );
                            self.message = Some(message);

                            if soft_reset {
                                State::Reset
                            } else {
                                State::CheckMessageId
                            }
                        }
                        Err(parse_error) => {
                            // A frame the PHY passed CRC checking on but that
                            // does not decode is dropped here; the policy
                            // engine recovers through its own timeouts.
                            warn!("Dropping undecodable frame: {:?}", parse_error);
                            State::WaitPhy
                        }
                    }
                } else {
                    State::WaitPhy
                }
            }
            State::Reset => {
                self.port.clear_tx_message_id();
                self.port.clear_rx_message_id();

                self.port.prl_tx_events.set(tx::EVT_RESET);
                yield_now().await;

                if self.port.prl_rx_events.get_and_clear(EVT_RESET) != 0 {
                    self.message = None;
                    State::WaitPhy
                } else {
                    // Keep the Soft_Reset message for the policy engine.
                    State::CheckMessageId
                }
            }
            State::CheckMessageId => {
                if self.port.prl_rx_events.get_and_clear(EVT_RESET) != 0 {
                    self.message = None;
                    State::WaitPhy
                } else {
                    let message = self.message.as_ref().expect("no message under inspection");

                    if message.header.message_id() as i8 == self.port.rx_message_id() {
                        // Retransmission of a message the policy engine has
                        // already seen.
                        trace!(
                            "Dropping retransmission of message ID {}",
                            message.header.message_id()
                        );
                        self.message = None;
                        State::WaitPhy
                    } else {
                        State::StoreMessageId
                    }
                }
            }
            State::StoreMessageId => {
                // The inbound message preempts any outstanding transmission.
                self.port.prl_tx_events.set(tx::EVT_DISCARD);
                yield_now().await;

                let message = self.message.take().expect("no message under inspection");
                self.port.store_rx_message_id(message.header.message_id());

                self.port
                    .pe_mailbox
                    .try_send(message)
                    .ok()
                    .expect("message pool exhausted");
                self.port.pe_events.set(policy_engine::EVT_MSG_RX);

                State::WaitPhy
            }
        };
    }
}
