//! The device policy manager (DPM): the application-side authority over what
//! power to request and how to apply power changes.
//!
//! The policy engine calls into this trait at well-defined points of the
//! negotiation. Most methods have no-op defaults; a minimal sink only chooses
//! requests and reports its own capabilities.
use core::future::Future;

use pdsink_traits::TypeCCurrent;

use crate::protocol_layer::message::pdo::{SinkCapabilities, SourceCapabilities};
use crate::protocol_layer::message::request;

/// Trait for the device policy manager.
pub trait DevicePolicyManager {
    /// Called when Power Delivery negotiations start.
    fn pd_start(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Choose the power request to send for the given source capabilities.
    ///
    /// `source_capabilities` is `None` when the request is re-evaluated after
    /// [`crate::port::Port::request_new_power`]; the device then decides
    /// against the capabilities it has already seen.
    fn evaluate_capability(
        &mut self,
        source_capabilities: Option<&SourceCapabilities>,
    ) -> impl Future<Output = request::PowerSource>;

    /// Report the sink's own capabilities, for the reply to Get_Sink_Cap.
    fn get_sink_capability(&mut self) -> impl Future<Output = SinkCapabilities>;

    /// Transition the power output to the default level for USB.
    ///
    /// Called on hard reset, before renegotiation starts over.
    fn transition_default(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Transition to Sink Standby before the source changes the voltage.
    fn transition_standby(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Transition to the power level the source just accepted.
    fn transition_requested(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Transition to the minimum operating current, after GotoMin.
    ///
    /// Only reachable when [`Self::giveback_enabled`] returns true.
    fn transition_min(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Transition to the power available from the Type-C current
    /// advertisement, after Power Delivery turned out unresponsive.
    fn transition_typec(&mut self) -> impl Future<Output = ()> {
        async {}
    }

    /// Whether the sink honors GotoMin messages.
    fn giveback_enabled(&mut self) -> bool {
        false
    }

    /// Judge whether the advertised Type-C current satisfies the device.
    ///
    /// Return `None` if the device cannot run from Type-C current at all
    /// (for example because it needs more than 5 V); the fallback is then
    /// skipped entirely.
    fn evaluate_typec_current(&mut self, _advertised: TypeCCurrent) -> Option<bool> {
        None
    }

    /// The port partner answered one of our messages with Not_Supported.
    fn not_supported_received(&mut self) -> impl Future<Output = ()> {
        async {}
    }
}
