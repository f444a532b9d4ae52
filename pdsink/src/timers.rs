//! Timers used by the protocol layer and policy engine.
use core::future::Future;

/// Provider of time delays, supplied by the integrator.
///
/// Firmware typically backs this with `embassy_time`; tests use a tokio
/// timer under virtual time.
pub trait Timer {
    /// Resolve after the given number of milliseconds.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;
}

/// Deadlines the sink runs against, from the PD specification.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    /// tChunkingNotSupported: pause before answering a chunked message.
    ChunkingNotSupported,
    /// tHardResetComplete: PHY confirmation of a sent hard reset.
    HardResetComplete,
    /// tPDDebounce: settling time between Type-C current samples.
    PDDebounce,
    /// tPSTransition: source power transition after Accept.
    PSTransition,
    /// tSenderResponse: reply to a transmitted request.
    SenderResponse,
    /// tPPSRequest: keep-alive period for a PPS contract.
    SinkPPSPeriodic,
    /// tSinkRequest: back-off before repeating a request after Wait.
    SinkRequest,
    /// tTypeCSinkWaitCap: wait for Source_Capabilities.
    SinkWaitCap,
    /// Period of the INT_N line poll.
    IntNPoll,
}

impl TimerType {
    /// Get a future that resolves when this deadline expires.
    pub fn get_timer<TIMER: Timer>(timer_type: TimerType) -> impl Future<Output = ()> {
        match timer_type {
            TimerType::ChunkingNotSupported => TIMER::after_millis(45),
            TimerType::HardResetComplete => TIMER::after_millis(5),
            TimerType::PDDebounce => TIMER::after_millis(15),
            TimerType::PSTransition => TIMER::after_millis(500),
            TimerType::SenderResponse => TIMER::after_millis(30),
            TimerType::SinkPPSPeriodic => TIMER::after_millis(10_000),
            TimerType::SinkRequest => TIMER::after_millis(100),
            TimerType::SinkWaitCap => TIMER::after_millis(310),
            TimerType::IntNPoll => TIMER::after_millis(1),
        }
    }
}
