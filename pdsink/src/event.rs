//! Per-task event words.
//!
//! Every task owns one 32-bit word. Peers OR bits into it; the owner consumes
//! them with a masked read-and-clear. Bits are level-triggered: they stay set
//! until the owner consumes them, and setting an already-set bit is
//! idempotent.
use core::future::poll_fn;
use core::sync::atomic::{AtomicU32, Ordering};
use core::task::Poll;

use embassy_futures::select::{Either, select};
use embassy_sync::waitqueue::AtomicWaker;

use crate::timers::{Timer, TimerType};

/// A level-triggered event bitmask with a single waiter.
pub struct EventWord {
    bits: AtomicU32,
    waker: AtomicWaker,
}

impl EventWord {
    /// Create an empty event word.
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            waker: AtomicWaker::new(),
        }
    }

    /// OR `mask` into the word and wake the owning task.
    pub fn set(&self, mask: u32) {
        self.bits.fetch_or(mask, Ordering::SeqCst);
        self.waker.wake();
    }

    /// Consume and return the pending bits selected by `mask`.
    pub fn get_and_clear(&self, mask: u32) -> u32 {
        self.bits.fetch_and(!mask, Ordering::SeqCst) & mask
    }

    /// Bits currently pending, without consuming them.
    pub fn peek(&self) -> u32 {
        self.bits.load(Ordering::SeqCst)
    }

    /// Wait until at least one bit in `mask` is set, then consume and return
    /// the masked bits. Bits outside `mask` are left pending.
    pub async fn wait_any(&self, mask: u32) -> u32 {
        poll_fn(|cx| {
            let pending = self.get_and_clear(mask);
            if pending != 0 {
                return Poll::Ready(pending);
            }

            self.waker.register(cx.waker());

            // A peer may have set bits between the first check and waker
            // registration; check again so the wake is not lost.
            let pending = self.get_and_clear(mask);
            if pending != 0 {
                Poll::Ready(pending)
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Like [`Self::wait_any`], bounded by a deadline.
    ///
    /// A timeout is reported as a zero mask, leaving all bits pending.
    pub async fn wait_any_timeout<TIMER: Timer>(&self, mask: u32, timer_type: TimerType) -> u32 {
        match select(self.wait_any(mask), TimerType::get_timer::<TIMER>(timer_type)).await {
            Either::First(pending) => pending,
            Either::Second(()) => 0,
        }
    }
}
