//! Millisecond clocks for simulated devices

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Wrapping millisecond counter shared by the simulated devices
///
/// A manual clock only moves when told to, which makes timer behaviour in
/// tests exact. A wall clock follows real time and suits the async actors.
#[derive(Debug, Clone)]
pub enum SimClock {
    Manual(Arc<AtomicU32>),
    Wall(Instant),
}

impl SimClock {
    /// Manual clock starting at `start_ms`
    pub fn manual(start_ms: u32) -> Self {
        SimClock::Manual(Arc::new(AtomicU32::new(start_ms)))
    }

    pub fn wall() -> Self {
        SimClock::Wall(Instant::now())
    }

    pub fn now_ms(&self) -> u32 {
        match self {
            SimClock::Manual(ms) => ms.load(Ordering::SeqCst),
            SimClock::Wall(start) => start.elapsed().as_millis() as u32,
        }
    }

    /// Move a manual clock forward; returns the new reading
    ///
    /// Readings stay below `u32::MAX` and wrap to zero there, matching the
    /// engine's default clock range. A wall clock ignores the request.
    pub fn advance(&self, ms: u32) -> u32 {
        let step = |t: u32| ((t as u64 + ms as u64) % u32::MAX as u64) as u32;
        match self {
            SimClock::Manual(now) => {
                let prev = now
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(step(t)))
                    .unwrap_or_else(|t| t);
                step(prev)
            }
            SimClock::Wall(_) => self.now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_wraps_at_max() {
        let clock = SimClock::manual(u32::MAX - 2);
        assert_eq!(clock.advance(1), u32::MAX - 1);
        assert_eq!(clock.advance(1), 0);
        assert_eq!(clock.advance(5), 5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn clones_share_time() {
        let clock = SimClock::manual(0);
        let other = clock.clone();
        clock.advance(40);
        assert_eq!(other.now_ms(), 40);
    }
}
