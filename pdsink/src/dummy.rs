//! Scripted PHY, timers and device policy manager for tests.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::vec::Vec;

use pdsink_traits::{
    Driver, InterruptA, InterruptB, MAX_MESSAGE_LEN, Status, Status1, TypeCCurrent,
};
use uom::si::electric_potential::volt;

use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, ExtendedHeader, Header, SpecificationRevision,
};
use crate::protocol_layer::message::pdo::{
    FixedSupply, PowerDataObject, ProgrammablePowerSupply, SinkCapabilities, SourceCapabilities,
};
use crate::protocol_layer::message::request::{CurrentRequest, PowerSource, VoltageRequest};
use crate::protocol_layer::message::{Data, Message};
use crate::sink::device_policy_manager::DevicePolicyManager;
use crate::timers::Timer;
use crate::units::ElectricPotential;
use crate::{DataRole, PowerRole};

/// A timer backed by the tokio runtime; deterministic under
/// `#[tokio::test(start_paused = true)]`.
pub struct TokioTimer;

impl Timer for TokioTimer {
    async fn after_millis(milliseconds: u64) {
        tokio::time::sleep(Duration::from_millis(milliseconds)).await;
    }
}

/// Header template for messages this sink originates.
pub fn sink_header_template() -> Header {
    Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_0)
}

/// Header template for messages a simulated source originates.
pub fn source_header_template() -> Header {
    Header::new_template(DataRole::Dfp, PowerRole::Source, SpecificationRevision::R3_0)
}

/// Byte image of a Source_Capabilities message, as the PHY would deliver it:
///
/// - Fixed 5 V / 3 A, unconstrained power
/// - Fixed 9 V / 2 A
/// - Fixed 15 V / 1.67 A
/// - Fixed 20 V / 1.25 A
pub const CAPTURED_SOURCE_CAPABILITIES: [u8; 18] = [
    0xA1, 0x41, // Header: Source_Capabilities, 4 objects, rev 3.0, source/DFP
    0x2C, 0x91, 0x01, 0x08, // Fixed 5 V / 3 A, unconstrained
    0xC8, 0xD0, 0x02, 0x00, // Fixed 9 V / 2 A
    0xA7, 0xB0, 0x04, 0x00, // Fixed 15 V / 1.67 A
    0x7D, 0x40, 0x06, 0x00, // Fixed 20 V / 1.25 A
];

/// The capabilities from [`CAPTURED_SOURCE_CAPABILITIES`], as a message with
/// the given ID.
pub fn source_capabilities_message(message_id: u8) -> Message {
    let pdos = [
        PowerDataObject::FixedSupply(
            FixedSupply::default()
                .with_raw_voltage(100)
                .with_raw_max_current(300)
                .with_unconstrained_power(true),
        ),
        PowerDataObject::FixedSupply(
            FixedSupply::default()
                .with_raw_voltage(180)
                .with_raw_max_current(200),
        ),
        PowerDataObject::FixedSupply(
            FixedSupply::default()
                .with_raw_voltage(300)
                .with_raw_max_current(167),
        ),
        PowerDataObject::FixedSupply(
            FixedSupply::default()
                .with_raw_voltage(400)
                .with_raw_max_current(125),
        ),
    ];

    capabilities_message(&pdos, message_id)
}

/// Capabilities with a PPS APDO:
///
/// - Fixed 5 V / 3 A
/// - PPS 3.3 - 11 V / 3 A
pub fn pps_source_capabilities_message(message_id: u8) -> Message {
    let pdos = [
        PowerDataObject::FixedSupply(
            FixedSupply::default()
                .with_raw_voltage(100)
                .with_raw_max_current(300),
        ),
        PowerDataObject::Pps(
            ProgrammablePowerSupply::default()
                .with_raw_min_voltage(33)
                .with_raw_max_voltage(110)
                .with_raw_max_current(60)
                .with_pps_power_limited(true),
        ),
    ];

    capabilities_message(&pdos, message_id)
}

fn capabilities_message(pdos: &[PowerDataObject], message_id: u8) -> Message {
    let header = Header::new_data(
        source_header_template(),
        DataMessageType::SourceCapabilities,
        pdos.len() as u8,
    )
    .with_message_id(message_id);

    Message::new_with_data(
        header,
        Data::SourceCapabilities(SourceCapabilities::new(pdos.iter().copied().collect())),
    )
}

/// A control message as the source would send it.
pub fn source_control_message(message_type: ControlMessageType, message_id: u8) -> Message {
    Message::new(
        Header::new_control(source_header_template(), message_type).with_message_id(message_id),
    )
}

/// Byte image of the first chunk of a chunked extended message announcing
/// `data_size` bytes of payload.
pub fn chunked_extended_frame(data_size: u16) -> Vec<u8> {
    let header = Header::new_data(source_header_template(), DataMessageType::Alert, 1)
        .with_extended(true);
    let extended_header = ExtendedHeader(0).with_chunked(true).with_data_size(data_size);

    let mut frame = vec![0u8; 4];
    header.to_bytes(&mut frame);
    frame[2] = (extended_header.0 & 0xFF) as u8;
    frame[3] = (extended_header.0 >> 8) as u8;
    frame
}

#[derive(Default)]
struct PhyInner {
    rx_frames: VecDeque<Vec<u8>>,
    transmitted: VecDeque<Vec<u8>>,
    statuses: VecDeque<Status>,
    reset_count: usize,
    hard_reset_count: usize,
    typec_current: Option<TypeCCurrent>,
}

/// A scripted FUSB302B stand-in.
///
/// Tests keep a clone of the handle: frames and interrupt statuses injected
/// through it surface through the [`Driver`] methods, and transmitted frames
/// can be probed back out.
#[derive(Clone)]
pub struct DummyPhy {
    inner: Arc<Mutex<PhyInner>>,
}

impl DummyPhy {
    /// Create an idle PHY advertising SinkTxOk.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PhyInner::default())),
        }
    }

    /// Put a frame into the RX FIFO without raising an interrupt.
    pub fn inject_frame(&self, message: &Message) {
        let mut buffer = [0u8; MAX_MESSAGE_LEN];
        let size = message.to_bytes(&mut buffer);
        self.inner
            .lock()
            .unwrap()
            .rx_frames
            .push_back(buffer[..size].to_vec());
    }

    /// Queue an interrupt status; INT_N asserts until it is read.
    pub fn push_status(&self, status: Status) {
        self.inner.lock().unwrap().statuses.push_back(status);
    }

    /// Deliver a message from the simulated source: frame plus I_GCRCSENT.
    pub fn deliver(&self, message: &Message) {
        self.inject_frame(message);
        self.push_status(Status {
            interrupt_b: InterruptB(0).with_i_gcrcsent(true),
            ..Default::default()
        });
    }

    /// Acknowledge a transmitted message: GoodCRC frame plus I_TXSENT.
    pub fn acknowledge(&self, transmitted: &Message) {
        self.inject_frame(&Message::new(
            Header::new_control(source_header_template(), ControlMessageType::GoodCRC)
                .with_message_id(transmitted.header.message_id()),
        ));
        self.push_status(Status {
            interrupt_a: InterruptA(0).with_i_txsent(true),
            ..Default::default()
        });
    }

    /// Report exhausted hardware retries for the outstanding transmission.
    pub fn fail_transmission(&self) {
        self.push_status(Status {
            interrupt_a: InterruptA(0).with_i_retryfail(true),
            ..Default::default()
        });
    }

    /// Signal a hard reset ordered set received from the wire.
    pub fn receive_hard_reset(&self) {
        self.push_status(Status {
            interrupt_a: InterruptA(0).with_i_hardrst(true),
            ..Default::default()
        });
    }

    /// Confirm that a requested hard reset went out.
    pub fn confirm_hard_reset_sent(&self) {
        self.push_status(Status {
            interrupt_a: InterruptA(0).with_i_hardsent(true),
            ..Default::default()
        });
    }

    /// Signal over-temperature.
    pub fn report_over_temperature(&self) {
        self.push_status(Status {
            interrupt_a: InterruptA(0).with_i_ocp_temp(true),
            status1: Status1(0).with_ovrtemp(true),
            ..Default::default()
        });
    }

    /// Probe the oldest transmitted frame, parsed back into a message.
    pub fn take_transmitted(&self) -> Option<Message> {
        let frame = self.inner.lock().unwrap().transmitted.pop_front()?;
        Some(Message::from_bytes(&frame).expect("transmitted frame must parse"))
    }

    /// Wait until the stack transmits a frame.
    pub async fn wait_transmitted(&self) -> Message {
        loop {
            if let Some(message) = self.take_transmitted() {
                return message;
            }

            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// How often the PHY was reset.
    pub fn reset_count(&self) -> usize {
        self.inner.lock().unwrap().reset_count
    }

    /// How many hard reset ordered sets were requested.
    pub fn hard_reset_count(&self) -> usize {
        self.inner.lock().unwrap().hard_reset_count
    }

    /// Override the advertised Type-C current.
    pub fn set_typec_current(&self, advertised: TypeCCurrent) {
        self.inner.lock().unwrap().typec_current = Some(advertised);
    }
}

impl Driver for DummyPhy {
    fn reset(&mut self) {
        self.inner.lock().unwrap().reset_count += 1;
    }

    fn send_message(&mut self, data: &[u8]) {
        self.inner.lock().unwrap().transmitted.push_back(data.to_vec());
    }

    fn send_hard_reset(&mut self) {
        self.inner.lock().unwrap().hard_reset_count += 1;
    }

    fn read_message(&mut self, buffer: &mut [u8]) -> usize {
        let Some(frame) = self.inner.lock().unwrap().rx_frames.pop_front() else {
            return 0;
        };

        buffer[..frame.len()].copy_from_slice(&frame);
        frame.len()
    }

    fn get_status(&mut self) -> Status {
        self.inner.lock().unwrap().statuses.pop_front().unwrap_or_default()
    }

    fn get_typec_current(&mut self) -> TypeCCurrent {
        self.inner
            .lock()
            .unwrap()
            .typec_current
            .unwrap_or(TypeCCurrent::Current3_0A)
    }

    fn intn_asserted(&mut self) -> bool {
        !self.inner.lock().unwrap().statuses.is_empty()
    }
}

/// What the test device asks for.
enum RequestPolicy {
    /// A specific fixed voltage, in volts.
    FixedVoltage(u32),
    /// A PPS voltage, in volts.
    PpsVoltage(u32),
}

struct TestDeviceInner {
    policy: RequestPolicy,
    capabilities: Option<SourceCapabilities>,
    transitions: Vec<&'static str>,
    giveback: bool,
    typec_current_acceptable: Option<bool>,
}

/// A device policy manager that records every callback.
#[derive(Clone)]
pub struct TestDevice {
    inner: Arc<Mutex<TestDeviceInner>>,
}

impl TestDevice {
    /// A device that requests the given fixed voltage.
    pub fn fixed_voltage(volts: u32) -> Self {
        Self::new(RequestPolicy::FixedVoltage(volts))
    }

    /// A device that requests the given PPS voltage.
    pub fn pps_voltage(volts: u32) -> Self {
        Self::new(RequestPolicy::PpsVoltage(volts))
    }

    fn new(policy: RequestPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TestDeviceInner {
                policy,
                capabilities: None,
                transitions: Vec::new(),
                giveback: false,
                typec_current_acceptable: None,
            })),
        }
    }

    /// Let the device honor GotoMin.
    pub fn with_giveback(self) -> Self {
        self.inner.lock().unwrap().giveback = true;
        self
    }

    /// Let the device judge Type-C current fallback.
    pub fn with_typec_current_acceptable(self, acceptable: bool) -> Self {
        self.inner.lock().unwrap().typec_current_acceptable = Some(acceptable);
        self
    }

    /// All recorded callbacks, in order.
    pub fn transitions(&self) -> Vec<&'static str> {
        self.inner.lock().unwrap().transitions.clone()
    }

    fn record(&self, transition: &'static str) {
        self.inner.lock().unwrap().transitions.push(transition);
    }

    /// Wait until the given callback has been recorded.
    pub async fn wait_for(&self, transition: &'static str) {
        loop {
            if self.transitions().iter().any(|t| *t == transition) {
                return;
            }

            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl DevicePolicyManager for TestDevice {
    async fn pd_start(&mut self) {
        self.record("pd_start");
    }

    async fn evaluate_capability(
        &mut self,
        source_capabilities: Option<&SourceCapabilities>,
    ) -> PowerSource {
        let mut inner = self.inner.lock().unwrap();

        if let Some(capabilities) = source_capabilities {
            inner.capabilities = Some(capabilities.clone());
        }
        let capabilities = inner
            .capabilities
            .as_ref()
            .expect("no capabilities have been seen");

        match &inner.policy {
            RequestPolicy::FixedVoltage(volts) => PowerSource::new_fixed(
                CurrentRequest::Highest,
                VoltageRequest::Specific(ElectricPotential::new::<volt>(*volts)),
                capabilities,
            )
            .expect("no matching fixed PDO"),
            RequestPolicy::PpsVoltage(volts) => PowerSource::new_pps(
                CurrentRequest::Highest,
                ElectricPotential::new::<volt>(*volts),
                capabilities,
            )
            .expect("no matching PPS APDO"),
        }
    }

    async fn get_sink_capability(&mut self) -> SinkCapabilities {
        let mut pdos = heapless::Vec::new();
        pdos.push(PowerDataObject::FixedSupply(
            FixedSupply::default()
                .with_raw_voltage(100)
                .with_raw_max_current(300),
        ))
        .unwrap();

        SinkCapabilities(pdos)
    }

    async fn transition_default(&mut self) {
        self.record("transition_default");
    }

    async fn transition_standby(&mut self) {
        self.record("transition_standby");
    }

    async fn transition_requested(&mut self) {
        self.record("transition_requested");
    }

    async fn transition_min(&mut self) {
        self.record("transition_min");
    }

    async fn transition_typec(&mut self) {
        self.record("transition_typec");
    }

    fn giveback_enabled(&mut self) -> bool {
        self.inner.lock().unwrap().giveback
    }

    fn evaluate_typec_current(&mut self, _advertised: TypeCCurrent) -> Option<bool> {
        self.inner.lock().unwrap().typec_current_acceptable
    }

    async fn not_supported_received(&mut self) {
        self.record("not_supported_received");
    }
}
