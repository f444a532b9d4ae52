//! The INT_N poller: translates PHY interrupt status into task events.
use pdsink_traits::{Driver, Status};

use crate::port::Port;
use crate::protocol_layer::{hard_reset, rx, tx};
use crate::sink::policy_engine;
use crate::timers::{Timer, TimerType};

/// Poll the INT_N line and fan interrupt flags out as events.
///
/// The poller is stateless across iterations; it is the sole translator
/// between PHY hardware events and task events.
pub async fn poll<DRIVER: Driver, TIMER: Timer>(port: &Port<DRIVER>) {
    loop {
        if port.with_phy(|phy| phy.intn_asserted()) {
            let status = port.with_phy(|phy| phy.get_status());
            fan_out(port, status);
        }

        TimerType::get_timer::<TIMER>(TimerType::IntNPoll).await;
    }
}

fn fan_out<DRIVER: Driver>(port: &Port<DRIVER>, status: Status) {
    if status.interrupt_b.i_gcrcsent() {
        port.prl_rx_events.set(rx::EVT_I_GCRCSENT);
    }

    let mut events = 0;
    if status.interrupt_a.i_retryfail() {
        events |= tx::EVT_I_RETRYFAIL;
    }
    if status.interrupt_a.i_txsent() {
        events |= tx::EVT_I_TXSENT;
    }
    if events != 0 {
        port.prl_tx_events.set(events);
    }

    let mut events = 0;
    if status.interrupt_a.i_hardrst() {
        events |= hard_reset::EVT_I_HARDRST;
    }
    if status.interrupt_a.i_hardsent() {
        events |= hard_reset::EVT_I_HARDSENT;
    }
    if events != 0 {
        port.hard_reset_events.set(events);
    }

    // Over-temperature only counts while the condition persists.
    if status.interrupt_a.i_ocp_temp() && status.status1.ovrtemp() {
        port.pe_events.set(policy_engine::EVT_I_OVRTEMP);
    }
}
