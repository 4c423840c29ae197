//! Timer pool
//!
//! Many logical timeouts share one external "fire in N ms" primitive. Slots
//! hold a timeout relative to `last_update_time`; whenever the pool is
//! touched, every slot is re-based to the current clock reading, so the
//! smallest remaining timeout is always what the primitive should be armed
//! with.
//!
//! The external clock is a wrapping millisecond counter. Elapsed time is
//! always a forward distance modulo the clock's wrap point, never a signed
//! difference.

use tracing::trace;

use crate::error::{PttError, PttResult};
use crate::event::EventId;

/// Forward distance from `from` to `to` on a clock that wraps at `modulus`
///
/// Clock readings lie in `0..modulus`. When `to < from` the clock is
/// assumed to have wrapped exactly once.
pub fn forward_distance(from: u32, to: u32, modulus: u32) -> u32 {
    if to >= from {
        to - from
    } else {
        modulus.saturating_sub(from).saturating_add(to)
    }
}

#[derive(Debug, Clone, Copy)]
struct TimerSlot<C> {
    timeout: u32,
    callback: C,
    owner: EventId,
}

/// A timer that reached zero
#[derive(Debug, Clone, Copy)]
pub struct Fired<C> {
    pub callback: C,
    pub owner: EventId,
}

/// Fixed-capacity pool of relative timers
#[derive(Debug)]
pub struct TimerPool<C> {
    slots: Vec<Option<TimerSlot<C>>>,
    last_update_time: u32,
    last_timeout: u32,
    max_clock: u32,
    max_timeout: u32,
    owner_limit: usize,
}

impl<C: Copy> TimerPool<C> {
    /// Create a pool of `size` slots
    ///
    /// `max_clock` is the clock's wrap point, `max_timeout` the longest timer
    /// accepted, and `owner_limit` the number of valid event handles.
    pub fn new(size: usize, max_clock: u32, max_timeout: u32, owner_limit: usize) -> Self {
        Self {
            slots: vec![None; size],
            last_update_time: 0,
            last_timeout: max_timeout,
            max_clock,
            max_timeout,
            owner_limit,
        }
    }

    /// Drop every timer
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.last_update_time = 0;
        self.last_timeout = self.max_timeout;
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Number of armed timers
    pub fn active(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// True if any timer is owned by `owner`
    pub fn has_owner(&self, owner: EventId) -> bool {
        self.slots.iter().flatten().any(|s| s.owner == owner)
    }

    /// Timeout the external primitive was last armed with
    pub fn armed_timeout(&self) -> u32 {
        self.last_timeout
    }

    /// Milliseconds from `now` until the armed timeout elapses, if any timer is armed
    pub fn time_until_next(&self, now: u32) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let elapsed = forward_distance(self.last_update_time, now, self.max_clock);
        Some(self.last_timeout.saturating_sub(elapsed))
    }

    /// Arm a timer
    ///
    /// Returns `Some(timeout)` when the external primitive has to be re-armed
    /// with a shorter timeout, `None` when its current arm is still correct.
    pub fn add(
        &mut self,
        now: u32,
        timeout: u32,
        callback: C,
        owner: EventId,
    ) -> PttResult<Option<u32>> {
        if timeout > self.max_timeout || owner.index() >= self.owner_limit {
            return Err(PttError::InvalidValue);
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PttError::NoFreeSlot)?;

        let slot = TimerSlot {
            timeout,
            callback,
            owner,
        };

        if self.is_empty() {
            self.last_update_time = now;
            self.slots[index] = Some(slot);
            self.last_timeout = timeout;
            trace!("timer {} armed {}ms (first)", owner, timeout);
            return Ok(Some(timeout));
        }

        self.rebase(now);
        self.slots[index] = Some(slot);
        if timeout < self.last_timeout {
            self.last_timeout = timeout;
            trace!("timer {} armed {}ms (re-arm)", owner, timeout);
            Ok(Some(timeout))
        } else {
            trace!("timer {} armed {}ms", owner, timeout);
            Ok(None)
        }
    }

    /// Cancel every timer owned by `owner`
    pub fn remove(&mut self, owner: EventId) {
        for slot in &mut self.slots {
            if slot.is_some_and(|s| s.owner == owner) {
                *slot = None;
            }
        }
    }

    /// Subtract the time elapsed since the last update from every slot
    pub fn rebase(&mut self, now: u32) {
        let elapsed = forward_distance(self.last_update_time, now, self.max_clock);
        for slot in self.slots.iter_mut().flatten() {
            slot.timeout = slot.timeout.saturating_sub(elapsed);
        }
        self.last_timeout = self.last_timeout.saturating_sub(elapsed);
        self.last_update_time = now;
    }

    /// Free and return the first slot that reached zero
    pub fn pop_expired(&mut self) -> Option<Fired<C>> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_some_and(|t| t.timeout == 0))?;
        let timer = slot.take()?;
        Some(Fired {
            callback: timer.callback,
            owner: timer.owner,
        })
    }

    /// Smallest remaining timeout, or the maximum when nothing is armed
    ///
    /// The result is what the external primitive should be armed with.
    pub fn rearm(&mut self) -> u32 {
        self.last_timeout = self
            .slots
            .iter()
            .flatten()
            .map(|s| s.timeout)
            .min()
            .unwrap_or(self.max_timeout);
        self.last_timeout
    }

    /// Re-base, take every expired timer and compute the next arm value
    ///
    /// The engine uses the finer-grained [`rebase`](Self::rebase),
    /// [`pop_expired`](Self::pop_expired) and [`rearm`](Self::rearm) so a
    /// callback can cancel timers that expired in the same tick.
    pub fn process(&mut self, now: u32) -> (Vec<Fired<C>>, u32) {
        self.rebase(now);
        let fired: Vec<_> = std::iter::from_fn(|| self.pop_expired()).collect();
        (fired, self.rearm())
    }
}
