// SPDX-License-Identifier: GPL-3.0-only

//! Single-slot frame hand-off between the driver callback thread and the tick thread
//!
//! The driver pushes frames faster than (or out of step with) the consumer.
//! Only the newest frame matters, so the queue holds at most one item and a
//! push evicts whatever the consumer has not taken yet.
//!
//! The consumer blocks in [`FrameQueue::pop_block`] only while a signal is
//! locked and no frame is pending; signal loss, shutdown and interrupts all
//! wake it up empty-handed.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Slot<T> {
    pending: Option<T>,
    signaled: bool,
    quit: bool,
    interrupted: bool,
}

/// Latest-frame queue with blocking consumer
#[derive(Debug)]
pub struct FrameQueue<T> {
    slot: Mutex<Slot<T>>,
    has_data: Condvar,
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameQueue<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                signaled: false,
                quit: false,
                interrupted: false,
            }),
            has_data: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // A panicking holder cannot leave the slot half-written
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `item` as the pending frame
    ///
    /// A frame that is still pending is evicted first and handed to `on_drop`.
    /// After [`quit`](Self::quit) nothing is stored: `item` itself goes to
    /// `on_drop`. Returns `true` when a frame was dropped.
    pub fn push_and_drop<F>(&self, item: T, on_drop: F) -> bool
    where
        F: FnOnce(T),
    {
        let mut slot = self.lock();
        if slot.quit {
            drop(slot);
            on_drop(item);
            return true;
        }

        let evicted = slot.pending.take();
        let dropped = evicted.is_some();
        if let Some(old) = evicted {
            on_drop(old);
        }
        slot.pending = Some(item);
        drop(slot);

        self.has_data.notify_one();
        dropped
    }

    /// Take the pending frame, waiting for one while the signal is locked
    ///
    /// Returns `None` without waiting when the signal is down, and returns
    /// `None` after [`quit`](Self::quit) regardless of pending data.
    pub fn pop_block(&self) -> Option<T> {
        let mut slot = self.lock();
        loop {
            if slot.quit {
                return None;
            }
            if let Some(item) = slot.pending.take() {
                return Some(item);
            }
            if slot.interrupted {
                slot.interrupted = false;
                return None;
            }
            if !slot.signaled {
                return None;
            }
            slot = self
                .has_data
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take the pending frame without waiting
    pub fn try_pop(&self) -> Option<T> {
        let mut slot = self.lock();
        if slot.quit {
            return None;
        }
        slot.pending.take()
    }

    /// Set the signal-locked flag and wake any waiter
    pub fn signal(&self, locked: bool) {
        self.lock().signaled = locked;
        self.has_data.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        self.lock().signaled
    }

    /// Wake a blocked consumer once without a frame
    ///
    /// Used when the consumer has other work to do (an input reconfiguration)
    /// while no frames will arrive.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.has_data.notify_all();
    }

    /// Shut the queue down: release any pending frame and wake all waiters
    pub fn quit(&self) {
        let pending = {
            let mut slot = self.lock();
            slot.quit = true;
            slot.signaled = false;
            slot.pending.take()
        };
        drop(pending);
        self.has_data.notify_all();
    }

    pub fn is_quit(&self) -> bool {
        self.lock().quit
    }

    /// Drop the pending frame, if any
    pub fn clear(&self) {
        let pending = self.lock().pending.take();
        drop(pending);
    }

    /// Re-arm the queue after [`quit`](Self::quit) for another start
    pub fn reset(&self) {
        let pending = {
            let mut slot = self.lock();
            slot.quit = false;
            slot.signaled = false;
            slot.interrupted = false;
            slot.pending.take()
        };
        drop(pending);
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }
}
