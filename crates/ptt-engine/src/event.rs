//! Event pool
//!
//! Events are the unit of in-flight work: an inbound packet, a host line, or
//! a token that owns a shared resource. They live in a fixed arena and are
//! referenced everywhere else by [`EventId`], never by pointer. A handle is
//! only meaningful while its slot is in use; the checked accessors return
//! `None` for stale handles instead of handing out a recycled slot.

use std::fmt;

use ptt_protocol::{HostCommand, WireCommand};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cmd::ota::OtaStage;
use crate::cmd::uart::UartStage;
use crate::dut::DutStage;
use crate::error::{PttError, PttResult};

/// Handle to an event slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u8);

impl EventId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt#{}", self.0)
    }
}

/// What an event represents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventCmd {
    /// Not yet classified
    #[default]
    None,
    /// An over-the-air command, inbound or outbound
    Wire(WireCommand),
    /// A host text command
    Host(HostCommand),
    /// Inbound frame whose command byte is not a known wire command
    Unknown(u8),
}

/// Processing state of an event, owned by whichever state machine holds it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventState {
    #[default]
    Idle,
    Ota(OtaStage),
    Uart(UartStage),
    Dut(DutStage),
}

/// Link metrics attached to a received packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxMeta {
    pub rssi: i8,
    pub lqi: u8,
}

/// One unit of in-flight work
#[derive(Debug, Clone)]
pub struct Event {
    pub cmd: EventCmd,
    pub state: EventState,
    /// Set for events created from a received packet
    pub rx: Option<RxMeta>,
    data: Vec<u8>,
    ctx: Vec<u8>,
    data_cap: usize,
    ctx_cap: usize,
}

impl Event {
    fn new(data_cap: usize, ctx_cap: usize) -> Self {
        Self {
            cmd: EventCmd::None,
            state: EventState::Idle,
            rx: None,
            data: Vec::with_capacity(data_cap),
            ctx: Vec::with_capacity(ctx_cap),
            data_cap,
            ctx_cap,
        }
    }

    fn clear(&mut self) {
        self.cmd = EventCmd::None;
        self.state = EventState::Idle;
        self.rx = None;
        self.data.clear();
        self.ctx.clear();
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Scratch bytes
    pub fn ctx(&self) -> &[u8] {
        &self.ctx
    }

    /// Replace the payload; rejects anything over capacity
    pub fn set_data(&mut self, bytes: &[u8]) -> PttResult<()> {
        if bytes.len() > self.data_cap {
            return Err(PttError::InvalidValue);
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Replace the scratch bytes; rejects anything over capacity
    pub fn set_ctx(&mut self, bytes: &[u8]) -> PttResult<()> {
        if bytes.len() > self.ctx_cap {
            return Err(PttError::InvalidValue);
        }
        self.ctx.clear();
        self.ctx.extend_from_slice(bytes);
        Ok(())
    }
}

#[derive(Debug)]
struct Slot {
    in_use: bool,
    event: Event,
}

/// Fixed-capacity arena of events
#[derive(Debug)]
pub struct EventPool {
    slots: Vec<Slot>,
    data_cap: usize,
    ctx_cap: usize,
}

impl EventPool {
    /// Largest pool an [`EventId`] can address
    pub const MAX_SIZE: usize = u8::MAX as usize + 1;

    /// Create a pool; `size` is clamped to [`EventPool::MAX_SIZE`]
    pub fn new(size: usize, data_cap: usize, ctx_cap: usize) -> Self {
        let slots = (0..size.min(Self::MAX_SIZE))
            .map(|_| Slot {
                in_use: false,
                event: Event::new(data_cap, ctx_cap),
            })
            .collect();
        Self {
            slots,
            data_cap,
            ctx_cap,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently allocated
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }

    /// Capacity of each event's data buffer
    pub fn data_capacity(&self) -> usize {
        self.data_cap
    }

    /// Capacity of each event's context buffer
    pub fn ctx_capacity(&self) -> usize {
        self.ctx_cap
    }

    /// True if `id` addresses a slot, in use or not
    pub fn in_range(&self, id: EventId) -> bool {
        id.index() < self.slots.len()
    }

    /// Free every slot
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.in_use = false;
            slot.event.clear();
        }
    }

    /// Take a free slot
    pub fn alloc(&mut self) -> PttResult<EventId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.in_use)
            .ok_or(PttError::NoFreeSlot)?;
        slot.in_use = true;
        slot.event.clear();
        let id = EventId(index as u8);
        trace!("event alloc {}", id);
        Ok(id)
    }

    /// Take a free slot and copy `bytes` into its data buffer
    pub fn alloc_and_fill(&mut self, bytes: &[u8]) -> PttResult<EventId> {
        if bytes.is_empty() || bytes.len() > self.data_cap {
            return Err(PttError::InvalidValue);
        }
        let id = self.alloc()?;
        if let Some(evt) = self.get_mut(id) {
            evt.set_data(bytes)?;
        }
        Ok(id)
    }

    /// Return a slot to the pool; freeing a free or out-of-range handle is a no-op
    pub fn free(&mut self, id: EventId) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.in_use {
                trace!("event free {}", id);
            }
            slot.in_use = false;
            slot.event.clear();
        }
    }

    /// True if `id` addresses an allocated slot
    pub fn is_in_use(&self, id: EventId) -> bool {
        self.slots.get(id.index()).is_some_and(|s| s.in_use)
    }

    /// Borrow an allocated event
    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.slots
            .get(id.index())
            .filter(|s| s.in_use)
            .map(|s| &s.event)
    }

    /// Mutably borrow an allocated event
    pub fn get_mut(&mut self, id: EventId) -> Option<&mut Event> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.in_use)
            .map(|s| &mut s.event)
    }

    // ------------------------------------------------------------------------
    // Field accessors. Callers pass handles they know to be live; a stale
    // handle reads as an empty event and writes are dropped.
    // ------------------------------------------------------------------------

    pub fn cmd(&self, id: EventId) -> EventCmd {
        self.get(id).map(|e| e.cmd).unwrap_or_default()
    }

    pub fn set_cmd(&mut self, id: EventId, cmd: EventCmd) {
        if let Some(evt) = self.get_mut(id) {
            evt.cmd = cmd;
        }
    }

    pub fn state(&self, id: EventId) -> EventState {
        self.get(id).map(|e| e.state).unwrap_or_default()
    }

    pub fn set_state(&mut self, id: EventId, state: EventState) {
        if let Some(evt) = self.get_mut(id) {
            evt.state = state;
        }
    }

    pub fn data(&self, id: EventId) -> &[u8] {
        self.get(id).map(Event::data).unwrap_or(&[])
    }

    pub fn ctx(&self, id: EventId) -> &[u8] {
        self.get(id).map(Event::ctx).unwrap_or(&[])
    }

    /// Replace an event's context bytes
    pub fn set_ctx(&mut self, id: EventId, bytes: &[u8]) -> PttResult<()> {
        self.get_mut(id)
            .ok_or(PttError::NullPointer)?
            .set_ctx(bytes)
    }

    /// Copy command and context from one live event to another
    pub fn copy_cmd_and_ctx(&mut self, from: EventId, to: EventId) -> PttResult<()> {
        let src = self.get(from).ok_or(PttError::NullPointer)?;
        let cmd = src.cmd;
        let ctx = src.ctx.clone();
        let dst = self.get_mut(to).ok_or(PttError::NullPointer)?;
        dst.cmd = cmd;
        dst.set_ctx(&ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_until_full() {
        let mut pool = EventPool::new(3, 8, 4);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(pool.alloc(), Err(PttError::NoFreeSlot));

        pool.free(b);
        assert_eq!(pool.alloc().unwrap(), b);
    }

    #[test]
    fn free_is_idempotent() {
        let mut pool = EventPool::new(2, 8, 4);
        let a = pool.alloc().unwrap();
        pool.free(a);
        pool.free(a);
        pool.free(EventId(200));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut pool = EventPool::new(2, 8, 4);
        let a = pool.alloc().unwrap();
        pool.free(a);
        assert!(pool.get(a).is_none());
        assert!(pool.get_mut(a).is_none());
        assert!(pool.get(EventId(7)).is_none());
        assert_eq!(pool.set_ctx(a, &[1]), Err(PttError::NullPointer));
    }

    #[test]
    fn alloc_and_fill_checks_length() {
        let mut pool = EventPool::new(2, 4, 4);
        assert_eq!(pool.alloc_and_fill(&[]), Err(PttError::InvalidValue));
        assert_eq!(
            pool.alloc_and_fill(&[0; 5]),
            Err(PttError::InvalidValue)
        );
        assert_eq!(pool.in_use(), 0);

        let id = pool.alloc_and_fill(&[1, 2, 3]).unwrap();
        assert_eq!(pool.data(id), &[1, 2, 3]);
    }

    #[test]
    fn realloc_clears_previous_contents() {
        let mut pool = EventPool::new(1, 4, 4);
        let id = pool.alloc_and_fill(&[9, 9]).unwrap();
        pool.set_ctx(id, &[7]).unwrap();
        pool.set_cmd(id, EventCmd::Wire(WireCommand::Ping));
        pool.free(id);

        let id = pool.alloc().unwrap();
        assert!(pool.data(id).is_empty());
        assert!(pool.ctx(id).is_empty());
        assert_eq!(pool.cmd(id), EventCmd::None);
        assert_eq!(pool.state(id), EventState::Idle);
    }

    #[test]
    fn ctx_capacity_enforced() {
        let mut pool = EventPool::new(1, 4, 2);
        let id = pool.alloc().unwrap();
        assert_eq!(pool.set_ctx(id, &[1, 2, 3]), Err(PttError::InvalidValue));
        assert!(pool.set_ctx(id, &[1, 2]).is_ok());
    }

    #[test]
    fn copy_cmd_and_ctx_between_events() {
        let mut pool = EventPool::new(2, 4, 4);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.set_cmd(a, EventCmd::Host(HostCommand::RPing));
        pool.set_ctx(a, &[1, 2]).unwrap();
        pool.copy_cmd_and_ctx(a, b).unwrap();
        assert_eq!(pool.cmd(b), EventCmd::Host(HostCommand::RPing));
        assert_eq!(pool.ctx(b), &[1, 2]);
    }
}
