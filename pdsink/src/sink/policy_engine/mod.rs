//! The sink policy engine.
//!
//! Implements the sink policy state graph: discovering source capabilities,
//! requesting power (fixed and PPS), handling soft and hard resets, and
//! degrading to Type-C current when the source never speaks PD.
use core::future::pending;
use core::marker::PhantomData;

use embassy_futures::select::{Either3, select3};
use pdsink_traits::Driver;

use crate::port::Port;
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision,
};
use crate::protocol_layer::message::pdo::OBJECT_POSITION_NONE;
use crate::protocol_layer::message::request;
use crate::protocol_layer::message::{Data, MAX_EXTENDED_LEGACY_LEN, Message};
use crate::protocol_layer::{hard_reset, tx};
use crate::sink::device_policy_manager::DevicePolicyManager;
use crate::timers::{Timer, TimerType};


/// Hard reset signaling was detected; transition to default.
pub const EVT_RESET: u32 = 1 << 0;
/// PRL-RX posted a message into the policy engine mailbox.
pub const EVT_MSG_RX: u32 = 1 << 1;
/// PRL-TX transmitted our message and saw its GoodCRC.
pub const EVT_TX_DONE: u32 = 1 << 2;
/// PRL-TX gave up on our message.
pub const EVT_TX_ERR: u32 = 1 << 3;
/// The hard reset machine finished sending a hard reset.
pub const EVT_HARD_SENT: u32 = 1 << 4;
/// The PHY reports over-temperature.
pub const EVT_I_OVRTEMP: u32 = 1 << 5;
/// Repeat the PPS request (periodic keep-alive, or on user request).
pub const EVT_PPS_REQUEST: u32 = 1 << 6;
/// User request to send Get_Source_Cap.
pub const EVT_GET_SOURCE_CAP: u32 = 1 << 7;
/// User request to renegotiate power.
pub const EVT_NEW_POWER: u32 = 1 << 8;

/// How many hard resets may go unanswered before the source is presumed
/// PD-unresponsive (nHardResetCount).
const N_HARD_RESET_COUNT: u8 = 2;

/// Sink policy engine states, as given by the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Startup,
    Discovery,
    WaitForCapabilities,
    EvaluateCapabilities,
    SelectCapability,
    TransitionSink,
    Ready,
    GetSourceCap,
    GiveSinkCap,
    HardReset,
    TransitionToDefault,
    SoftReset,
    SendSoftReset,
    SendNotSupported,
    ChunkReceived,
    NotSupportedReceived,
    SourceUnresponsive,
}

/// The sink policy engine of one port.
pub struct Sink<'a, DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> {
    port: &'a Port<DRIVER>,
    device_policy_manager: DPM,
    state: State,

    /// Whether a negotiated contract is in force.
    explicit_contract: bool,
    /// Whether we are operating at minimum power (after Wait or GotoMin).
    min_power: bool,
    /// Hard resets sent without a source response.
    hard_reset_counter: u8,
    /// 1-based position of the first PPS APDO in the current capabilities,
    /// or [`OBJECT_POSITION_NONE`].
    pps_index: u8,
    /// Position of the PPS APDO the previous request addressed, or
    /// [`OBJECT_POSITION_NONE`].
    last_pps: u8,
    /// Whether SinkPPSPeriodicTimer runs while in `Ready`.
    sink_pps_timer_armed: bool,
    /// The most recent request chosen by the DPM, kept for re-requests.
    last_dpm_request: Option<request::PowerSource>,
    /// The received message currently under inspection.
    message: Option<Message>,
    /// The previous Type-C current evaluation result.
    old_tcc_match: Option<bool>,

    _timer: PhantomData<TIMER>,
}

impl<'a, DRIVER: Driver, TIMER: Timer, DPM: DevicePolicyManager> Sink<'a, DRIVER, TIMER, DPM> {
    /// Create the policy engine in its startup state.
    pub fn new(port: &'a Port<DRIVER>, device_policy_manager: DPM) -> Self {
        Self {
            port,
            device_policy_manager,
            state: State::Startup,
            explicit_contract: false,
            min_power: false,
            hard_reset_counter: 0,
            pps_index: OBJECT_POSITION_NONE,
            last_pps: OBJECT_POSITION_NONE,
            sink_pps_timer_armed: false,
            last_dpm_request: None,
            message: None,
            old_tcc_match: None,
            _timer: PhantomData,
        }
    }

    /// Run the policy engine forever.
    ///
    /// An unresponsive source parks the machine in its Type-C fallback loop;
    /// recovery from there requires physical reinsertion.
    pub async fn run(&mut self) {
        loop {
            self.run_step().await;
        }
    }

    /// The revision negotiated with the port partner, 2.0 until known.
    fn negotiated_revision(&self) -> SpecificationRevision {
        self.port
            .header_template()
            .spec_revision()
            .unwrap_or(SpecificationRevision::R2_0)
    }

    /// Pop the message announced by a `EVT_MSG_RX`.
    fn fetch_message(&self) -> Option<Message> {
        self.port.pe_mailbox.try_receive().ok()
    }

    /// Hand a message to PRL-TX and wait for the outcome.
    ///
    /// Returns the consumed event bits out of `EVT_TX_DONE | EVT_TX_ERR |
    /// EVT_RESET`. At most one transmission is ever outstanding, because this
    /// does not return before one of those events.
    async fn transmit(&self, message: Message) -> u32 {
        self.port
            .tx_mailbox
            .try_send(message)
            .ok()
            .expect("tx mailbox full");
        self.port.prl_tx_events.set(tx::EVT_MSG_TX);

        self.port
            .pe_events
            .wait_any(EVT_TX_DONE | EVT_TX_ERR | EVT_RESET)
            .await
    }

    /// Tell PRL-TX that the next transmission starts an AMS.
    fn start_ams(&self) {
        self.port.prl_tx_events.set(tx::EVT_START_AMS);
    }

    /// Run a single state transition.
    async fn run_step(&mut self) {
        self.state = match self.state {
            State::Startup => {
                self.explicit_contract = false;
                self.device_policy_manager.pd_start().await;

                // The protocol layer needs no reset here: both ways into
                // Startup (power-up and hard reset) already reset it.

                State::Discovery
            }
            State::Discovery => {
                // Bus-powered: VBUS is our only supply, so it is present.
                State::WaitForCapabilities
            }
            State::WaitForCapabilities => self.wait_for_capabilities().await,
            State::EvaluateCapabilities => self.evaluate_capabilities().await,
            State::SelectCapability => self.select_capability().await,
            State::TransitionSink => self.transition_sink().await,
            State::Ready => self.ready().await,
            State::GetSourceCap => {
                let message = Message::new(Header::new_control(
                    self.port.header_template(),
                    ControlMessageType::GetSourceCap,
                ));
                let evt = self.transmit(message).await;

                if evt & EVT_RESET != 0 {
                    State::TransitionToDefault
                } else if evt & EVT_TX_DONE == 0 {
                    State::HardReset
                } else {
                    State::Ready
                }
            }
            State::GiveSinkCap => {
                let capabilities = self.device_policy_manager.get_sink_capability().await;
                let header = Header::new_data(
                    self.port.header_template(),
                    DataMessageType::SinkCapabilities,
                    capabilities.num_objects(),
                );
                let evt = self
                    .transmit(Message::new_with_data(header, Data::SinkCapabilities(capabilities)))
                    .await;

                if evt & EVT_RESET != 0 {
                    State::TransitionToDefault
                } else if evt & EVT_TX_DONE == 0 {
                    State::HardReset
                } else {
                    State::Ready
                }
            }
            State::HardReset => {
                if self.hard_reset_counter > N_HARD_RESET_COUNT {
                    State::SourceUnresponsive
                } else {
                    self.port.hard_reset_events.set(hard_reset::EVT_RESET);
                    self.port.pe_events.wait_any(EVT_HARD_SENT).await;
                    self.hard_reset_counter += 1;

                    State::TransitionToDefault
                }
            }
            State::TransitionToDefault => {
                self.explicit_contract = false;
                self.min_power = false;
                self.sink_pps_timer_armed = false;
                self.message = None;

                self.device_policy_manager.transition_default().await;

                // Drop whatever the reset abandoned in flight, including the
                // reset indication itself.
                while self.port.pe_mailbox.try_receive().is_ok() {}
                self.port
                    .pe_events
                    .get_and_clear(EVT_RESET | EVT_MSG_RX | EVT_TX_DONE | EVT_TX_ERR);

                // Release the hard reset machine.
                self.port.hard_reset_events.set(hard_reset::EVT_DONE);

                State::Startup
            }
            State::SoftReset => {
                // The protocol layer already reset itself when the
                // Soft_Reset message was received; we only answer Accept.
                let message = Message::new(Header::new_control(
                    self.port.header_template(),
                    ControlMessageType::Accept,
                ));
                let evt = self.transmit(message).await;

                if evt & EVT_RESET != 0 {
                    State::TransitionToDefault
                } else if evt & EVT_TX_DONE == 0 {
                    State::HardReset
                } else {
                    State::WaitForCapabilities
                }
            }
            State::SendSoftReset => self.send_soft_reset().await,
            State::SendNotSupported => {
                // Not_Supported only exists since PD 3.0; PD 2.0 partners
                // get Reject.
                let message_type = match self.negotiated_revision() {
                    SpecificationRevision::R3_0 => ControlMessageType::NotSupported,
                    _ => ControlMessageType::Reject,
                };
                let message = Message::new(Header::new_control(
                    self.port.header_template(),
                    message_type,
                ));
                let evt = self.transmit(message).await;

                if evt & EVT_RESET != 0 {
                    State::TransitionToDefault
                } else if evt & EVT_TX_DONE == 0 {
                    State::SendSoftReset
                } else {
                    State::Ready
                }
            }
            State::ChunkReceived => {
                // We do not reassemble chunked messages; let the sender's
                // ChunkSenderResponseTimer expire, then tell it so.
                let evt = self
                    .port
                    .pe_events
                    .wait_any_timeout::<TIMER>(EVT_RESET, TimerType::ChunkingNotSupported)
                    .await;

                if evt & EVT_RESET != 0 {
                    State::TransitionToDefault
                } else {
                    State::SendNotSupported
                }
            }
            State::NotSupportedReceived => {
                self.device_policy_manager.not_supported_received().await;

                State::Ready
            }
            State::SourceUnresponsive => {
                let advertised = self.port.with_phy(|phy| phy.get_typec_current());

                if let Some(tcc_match) = self.device_policy_manager.evaluate_typec_current(advertised) {
                    // Act only on two agreeing samples in a row.
                    if self.old_tcc_match == Some(tcc_match) {
                        self.device_policy_manager.transition_typec().await;
                    }

                    self.old_tcc_match = Some(tcc_match);
                }

                TimerType::get_timer::<TIMER>(TimerType::PDDebounce).await;

                State::SourceUnresponsive
            }
        };
    }

    async fn wait_for_capabilities(&mut self) -> State {
        let evt = self
            .port
            .pe_events
            .wait_any_timeout::<TIMER>(
                EVT_MSG_RX | EVT_I_OVRTEMP | EVT_RESET,
                TimerType::SinkWaitCap,
            )
            .await;

        // No Source_Capabilities within tTypeCSinkWaitCap.
        if evt == 0 {
            warn!("Timed out waiting for source capabilities");
            return State::HardReset;
        }
        if evt & EVT_RESET != 0 {
            return State::TransitionToDefault;
        }
        // Too hot to negotiate power.
        if evt & EVT_I_OVRTEMP != 0 {
            return State::WaitForCapabilities;
        }

        let Some(message) = self.fetch_message() else {
            return State::HardReset;
        };

        match message.header.message_type() {
            MessageType::Data(DataMessageType::SourceCapabilities) => {
                // First contact decides the revision we speak.
                let template = self.port.header_template();
                if let (Ok(SpecificationRevision::R1_0), Ok(peer_revision)) =
                    (template.spec_revision(), message.header.spec_revision())
                {
                    let negotiated = if peer_revision >= SpecificationRevision::R3_0 {
                        SpecificationRevision::R3_0
                    } else {
                        SpecificationRevision::R2_0
                    };
                    self.port
                        .store_header_template(template.with_spec_revision(negotiated));
                }

                self.message = Some(message);
                State::EvaluateCapabilities
            }
            MessageType::Control(ControlMessageType::SoftReset) => State::SoftReset,
            _ => State::HardReset,
        }
    }

    async fn evaluate_capabilities(&mut self) -> State {
        let capabilities = self.message.take().and_then(|message| match message.data {
            Some(Data::SourceCapabilities(capabilities)) => Some(capabilities),
            _ => None,
        });

        if let Some(capabilities) = &capabilities {
            // The source answered; it is responsive after all.
            self.hard_reset_counter = 0;

            // Remember where PPS APDOs start, so requests can be told apart.
            self.pps_index = capabilities
                .first_pps_position()
                .unwrap_or(OBJECT_POSITION_NONE);
            // New capabilities also mean we cannot be continuing a request
            // from the same PPS APDO.
            self.last_pps = OBJECT_POSITION_NONE;
        }

        // Infer the previously requested PPS position from the request we
        // sent last, before the DPM overwrites it.
        if let Some(request) = &self.last_dpm_request {
            self.last_pps = if request.object_position() >= self.pps_index {
                request.object_position()
            } else {
                OBJECT_POSITION_NONE
            };
        }

        let request = self
            .device_policy_manager
            .evaluate_capability(capabilities.as_ref())
            .await;
        self.last_dpm_request = Some(request);

        State::SelectCapability
    }

    async fn select_capability(&mut self) -> State {
        let request = *self
            .last_dpm_request
            .as_ref()
            .expect("no request was evaluated");

        let template = self.port.header_template();
        let header = Header::new_data(template, DataMessageType::Request, 1);
        let evt = self
            .transmit(Message::new_with_data(header, Data::Request(request)))
            .await;

        if evt & EVT_RESET != 0 {
            return State::TransitionToDefault;
        }
        if evt & EVT_TX_DONE == 0 {
            return State::HardReset;
        }

        if matches!(template.spec_revision(), Ok(SpecificationRevision::R3_0)) {
            // A PPS contract must be refreshed within tPPSRequest.
            self.sink_pps_timer_armed = request.object_position() >= self.pps_index;
        }

        let evt = self
            .port
            .pe_events
            .wait_any_timeout::<TIMER>(EVT_MSG_RX | EVT_RESET, TimerType::SenderResponse)
            .await;

        if evt & EVT_RESET != 0 {
            return State::TransitionToDefault;
        }
        if evt == 0 {
            return State::HardReset;
        }

        let Some(message) = self.fetch_message() else {
            return State::HardReset;
        };

        match message.header.message_type() {
            MessageType::Control(ControlMessageType::Accept) => {
                // Unless we keep riding the same PPS APDO, drop to standby
                // while the source changes the voltage.
                if request.object_position() != self.last_pps {
                    self.device_policy_manager.transition_standby().await;
                }

                // The accepted position is now the one periodic PPS
                // re-requests continue from.
                self.last_pps = if request.object_position() >= self.pps_index {
                    request.object_position()
                } else {
                    OBJECT_POSITION_NONE
                };

                self.min_power = false;
                State::TransitionSink
            }
            MessageType::Control(ControlMessageType::SoftReset) => State::SoftReset,
            MessageType::Control(
                message_type @ (ControlMessageType::Reject | ControlMessageType::Wait),
            ) => {
                if !self.explicit_contract {
                    State::WaitForCapabilities
                } else {
                    // After Wait, the Ready state runs SinkRequestTimer and
                    // repeats the request.
                    self.min_power = message_type == ControlMessageType::Wait;
                    State::Ready
                }
            }
            _ => State::SendSoftReset,
        }
    }

    async fn transition_sink(&mut self) -> State {
        let evt = self
            .port
            .pe_events
            .wait_any_timeout::<TIMER>(EVT_MSG_RX | EVT_RESET, TimerType::PSTransition)
            .await;

        if evt & EVT_RESET != 0 {
            return State::TransitionToDefault;
        }
        if evt == 0 {
            return State::HardReset;
        }

        let Some(message) = self.fetch_message() else {
            return State::HardReset;
        };

        if matches!(
            message.header.message_type(),
            MessageType::Control(ControlMessageType::PsRdy)
        ) {
            // The explicit contract is now in force.
            self.explicit_contract = true;

            if !self.min_power {
                self.device_policy_manager.transition_requested().await;
            }

            State::Ready
        } else {
            // Protocol error during the power transition. Drop the output
            // before the hard reset so we never pass through a wrong voltage.
            self.device_policy_manager.transition_default().await;

            State::HardReset
        }
    }

    async fn ready(&mut self) -> State {
        let min_power = self.min_power;
        let pps_timer_armed = self.sink_pps_timer_armed;

        let events_fut = self.port.pe_events.wait_any(
            EVT_MSG_RX
                | EVT_RESET
                | EVT_I_OVRTEMP
                | EVT_GET_SOURCE_CAP
                | EVT_NEW_POWER
                | EVT_PPS_REQUEST,
        );
        // SinkRequestTimer only runs while we sit on a Wait response.
        let sink_request_fut = async {
            if min_power {
                TimerType::get_timer::<TIMER>(TimerType::SinkRequest).await
            } else {
                pending().await
            }
        };
        let pps_periodic_fut = async {
            if pps_timer_armed {
                TimerType::get_timer::<TIMER>(TimerType::SinkPPSPeriodic).await
            } else {
                pending().await
            }
        };

        let evt = match select3(events_fut, sink_request_fut, pps_periodic_fut).await {
            Either3::First(evt) => evt,
            // tSinkRequest expired: repeat our request.
            Either3::Second(()) => 0,
            // SinkPPSPeriodicTimer expired: refresh the PPS contract.
            Either3::Third(()) => EVT_PPS_REQUEST,
        };

        if evt & EVT_RESET != 0 {
            return State::TransitionToDefault;
        }
        if evt & EVT_I_OVRTEMP != 0 {
            return State::HardReset;
        }
        if evt & EVT_GET_SOURCE_CAP != 0 {
            self.start_ams();
            return State::GetSourceCap;
        }
        if evt & EVT_NEW_POWER != 0 {
            // Re-evaluate against the capabilities the DPM has already seen.
            self.message = None;
            self.start_ams();
            return State::EvaluateCapabilities;
        }
        if evt & EVT_PPS_REQUEST != 0 {
            self.start_ams();
            return State::SelectCapability;
        }
        if evt == 0 {
            return State::SelectCapability;
        }

        let Some(message) = self.fetch_message() else {
            return State::Ready;
        };

        match message.header.message_type() {
            // Vendor-defined messages are ignored.
            MessageType::Data(DataMessageType::VendorDefined) => State::Ready,
            // So are Pings.
            MessageType::Control(ControlMessageType::Ping) => State::Ready,
            // Swaps and role reversals are not supported by this sink.
            MessageType::Control(
                ControlMessageType::DrSwap
                | ControlMessageType::PrSwap
                | ControlMessageType::VconnSwap
                | ControlMessageType::GetSourceCap,
            )
            | MessageType::Data(DataMessageType::Request | DataMessageType::SinkCapabilities) => {
                State::SendNotSupported
            }
            MessageType::Control(ControlMessageType::GotoMin) => {
                if self.device_policy_manager.giveback_enabled() {
                    self.device_policy_manager.transition_min().await;
                    self.min_power = true;

                    State::TransitionSink
                } else {
                    State::SendNotSupported
                }
            }
            MessageType::Data(DataMessageType::SourceCapabilities) => {
                // Keep the message; EvaluateCapabilities needs it.
                self.message = Some(message);
                State::EvaluateCapabilities
            }
            MessageType::Control(ControlMessageType::GetSinkCap) => State::GiveSinkCap,
            MessageType::Control(ControlMessageType::SoftReset) => State::SoftReset,
            _ => {
                if self.negotiated_revision() == SpecificationRevision::R3_0 {
                    // A multi-chunk extended message cannot be answered in
                    // kind; pause, then report Not_Supported.
                    if let Some(Data::Extended(extended_header)) = message.data {
                        if extended_header.data_size() > MAX_EXTENDED_LEGACY_LEN {
                            return State::ChunkReceived;
                        }
                    }

                    if matches!(
                        message.header.message_type(),
                        MessageType::Control(ControlMessageType::NotSupported)
                    ) {
                        State::NotSupportedReceived
                    } else {
                        State::SendSoftReset
                    }
                } else {
                    State::SendSoftReset
                }
            }
        }
    }

    async fn send_soft_reset(&mut self) -> State {
        // PRL-TX resets itself just before a Soft_Reset goes out.
        let message = Message::new(Header::new_control(
            self.port.header_template(),
            ControlMessageType::SoftReset,
        ));
        let evt = self.transmit(message).await;

        if evt & EVT_RESET != 0 {
            return State::TransitionToDefault;
        }
        if evt & EVT_TX_DONE == 0 {
            return State::HardReset;
        }

        let evt = self
            .port
            .pe_events
            .wait_any_timeout::<TIMER>(EVT_MSG_RX | EVT_RESET, TimerType::SenderResponse)
            .await;

        if evt & EVT_RESET != 0 {
            return State::TransitionToDefault;
        }
        if evt == 0 {
            return State::HardReset;
        }

        let Some(message) = self.fetch_message() else {
            return State::HardReset;
        };

        match message.header.message_type() {
            MessageType::Control(ControlMessageType::Accept) => State::WaitForCapabilities,
            MessageType::Control(ControlMessageType::SoftReset) => State::SoftReset,
            _ => State::HardReset,
        }
    }
}
