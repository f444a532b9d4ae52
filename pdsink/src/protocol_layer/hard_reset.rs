//! The hard reset machine.
//!
//! Drives the PHY hard-reset sequence in both directions, and is the only
//! entity allowed to restart PRL-RX and PRL-TX synchronously. Whether a hard
//! reset is initiated locally by the policy engine or observed on the wire,
//! the protocol layer counters are cleared before the policy engine is told.
use core::marker::PhantomData;

use embassy_futures::yield_now;
use pdsink_traits::Driver;

use crate::port::Port;
use crate::protocol_layer::{rx, tx};
use crate::sink::policy_engine;
use crate::timers::{Timer, TimerType};

/// The policy engine requests a hard reset.
pub const EVT_RESET: u32 = 1 << 0;
/// The PHY observed a hard reset ordered set on the wire.
pub const EVT_I_HARDRST: u32 = 1 << 1;
/// The PHY finished sending a hard reset ordered set.
pub const EVT_I_HARDSENT: u32 = 1 << 2;
/// The policy engine finished its transition to default.
pub const EVT_DONE: u32 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ResetLayer,
    IndicateHardReset,
    RequestHardReset,
    WaitPhy,
    HardResetRequested,
    WaitPe,
    Complete,
}

/// The hard reset state machine of one port.
pub struct HardReset<'a, DRIVER: Driver, TIMER: Timer> {
    port: &'a Port<DRIVER>,
    state: State,
    _timer: PhantomData<TIMER>,
}

impl<'a, DRIVER: Driver, TIMER: Timer> HardReset<'a, DRIVER, TIMER> {
    /// Create the machine in its waiting state.
    pub fn new(port: &'a Port<DRIVER>) -> Self {
        Self {
            port,
            state: State::ResetLayer,
            _timer: PhantomData,
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
            State::ResetLayer => {
                let evt = self
                    .port
                    .hard_reset_events
                    .wait_any(EVT_RESET | EVT_I_HARDRST)
                    .await;

                self.port.clear_rx_message_id();
                self.port.clear_tx_message_id();

                self.port.prl_rx_events.set(rx::EVT_RESET);
                yield_now().await;

                self.port.prl_tx_events.set(tx::EVT_RESET);
                yield_now().await;

                if evt & EVT_RESET != 0 {
                    // The policy engine started the reset.
                    State::RequestHardReset
                } else {
                    // The PHY observed one on the wire.
                    State::IndicateHardReset
                }
            }
            State::IndicateHardReset => {
                self.port.pe_events.set(policy_engine::EVT_RESET);

                State::WaitPe
            }
            State::RequestHardReset => {
                self.port.with_phy(|phy| phy.send_hard_reset());

                State::WaitPhy
            }
            State::WaitPhy => {
                // Move on no matter what ends the wait; the ordered set
                // either went out or the PHY is beyond caring.
                let _ = self
                    .port
                    .hard_reset_events
                    .wait_any_timeout::<TIMER>(EVT_I_HARDSENT, TimerType::HardResetComplete)
                    .await;
                self.port.pe_events.set(policy_engine::EVT_RESET);

                State::HardResetRequested
            }
            State::HardResetRequested => {
                self.port.pe_events.set(policy_engine::EVT_HARD_SENT);

                State::WaitPe
            }
            State::WaitPe => {
                self.port.hard_reset_events.wait_any(EVT_DONE).await;

                State::Complete
            }
            State::Complete => State::ResetLayer,
        };
    }
}
