//! PHY test tool engine
//!
//! The engine owns every shared resource (event pool, timer pool, RF
//! context, dispatch table) plus the state of the active mode. It is driven
//! entirely through the inbound methods below and reaches the outside world
//! only through its [`Platform`]. Nothing here blocks or spawns; the actor
//! module serializes calls from concurrent producers.

use ptt_protocol::{check_header, frame_command, HostResponse, WireCommand};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::dispatch::{ExtEvent, Handlers};
use crate::error::{PttError, PttResult};
use crate::event::{EventCmd, EventId, EventPool, RxMeta};
use crate::mode::{DeviceMode, ModeState};
use crate::platform::Platform;
use crate::rf::RfContext;
use crate::timer::TimerPool;

/// Callback run when a timer expires, with the timer's owning event
pub type TimerCallback = fn(&mut Engine, EventId);

/// The test tool engine
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) platform: Box<dyn Platform>,
    pub(crate) events: EventPool,
    pub(crate) timers: TimerPool<TimerCallback>,
    pub(crate) rf: RfContext,
    pub(crate) handlers: Handlers,
    pub(crate) mode: ModeState,
}

impl Engine {
    /// Create an engine and start it in the default mode
    pub fn new(config: EngineConfig, platform: Box<dyn Platform>) -> Self {
        let events = EventPool::new(
            config.event_pool_size,
            config.event_data_size,
            config.event_ctx_size,
        );
        let timers = TimerPool::new(
            config.timer_pool_size,
            config.max_clock_ms,
            config.max_timeout_ms,
            events.capacity(),
        );
        let rf = RfContext::new(&config);

        let mut engine = Self {
            config,
            platform,
            events,
            timers,
            rf,
            handlers: Handlers::default(),
            mode: ModeState::Uninitialized,
        };
        engine.init_default_mode();
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Active mode, `None` after [`uninit`](Self::uninit)
    pub fn mode(&self) -> Option<DeviceMode> {
        self.mode.mode()
    }

    pub fn events(&self) -> &EventPool {
        &self.events
    }

    pub fn timers(&self) -> &TimerPool<TimerCallback> {
        &self.timers
    }

    pub fn rf(&self) -> &RfContext {
        &self.rf
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    /// Current reading of the platform clock
    pub fn now_ms(&self) -> u32 {
        self.platform.now_ms()
    }

    /// Milliseconds until the next timer is due, if any is armed
    pub fn time_until_next_timer(&self) -> Option<u32> {
        self.timers.time_until_next(self.platform.now_ms())
    }

    /// Reset pools and radio state shared by all modes
    pub(crate) fn reset_shared(&mut self) {
        self.handlers = Handlers::default();
        self.events.reset();
        self.timers.reset();
        self.rf.reset();
        let channel = self.config.default_channel;
        if let Err(e) = self.rf.set_channel(&mut *self.platform, channel) {
            warn!("restoring channel {} failed: {}", channel, e);
        }
        let power = self.config.default_power;
        if let Err(e) = self.rf.set_power(&mut *self.platform, power) {
            warn!("restoring power {} failed: {}", power, e);
        }
        if let Err(e) = self.rf.receive(&mut *self.platform) {
            warn!("radio did not enter receive: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Route an external event to the active mode
    ///
    /// Returns `None` if the mode has no handler for it.
    fn dispatch(&mut self, event: ExtEvent, evt: EventId) -> Option<PttResult<()>> {
        let Some(handler) = self.handlers.get(event) else {
            debug!("{} not supported in {:?} mode", event, self.mode());
            return None;
        };
        trace!("dispatch {} {}", event, evt);
        let result = handler(self, evt);
        if let Err(e) = result {
            debug!("{} {} handled with error: {}", event, evt, e);
        }
        Some(result)
    }

    /// Completion of an RF operation: release the lock and hand its owner to the mode
    fn rf_complete(&mut self, event: ExtEvent, result: Option<u8>) {
        let Some(owner) = self.rf.release() else {
            return;
        };
        if let Some(value) = result {
            if let Err(e) = self.events.set_ctx(owner, &[value]) {
                warn!("cannot store {} result in {}: {}", event, owner, e);
            }
        }
        if self.dispatch(event, owner).is_none() {
            self.events.free(owner);
        }
    }

    // ------------------------------------------------------------------------
    // Inbound: radio
    // ------------------------------------------------------------------------

    /// A frame was received
    pub fn push_rf_packet(&mut self, psdu: &[u8], rssi: i8, lqi: u8) -> PttResult<()> {
        self.rf.stat_inc(lqi, rssi);
        let evt = self.events.alloc_and_fill(psdu)?;
        if let Some(event) = self.events.get_mut(evt) {
            event.rx = Some(RxMeta { rssi, lqi });
            event.cmd = match frame_command(psdu) {
                Some(code) => WireCommand::try_from(code)
                    .map(EventCmd::Wire)
                    .unwrap_or(EventCmd::Unknown(code)),
                None => EventCmd::None,
            };
        }
        trace!(
            "rx {} bytes rssi {} lqi {} protocol {}",
            psdu.len(),
            rssi,
            lqi,
            check_header(psdu)
        );
        if self.dispatch(ExtEvent::RfRxDone, evt).is_none() {
            trace!("rx {} dropped", evt);
        }
        self.events.free(evt);
        Ok(())
    }

    /// Reception failed
    pub fn rf_rx_failed(&mut self, error: u8) -> PttResult<()> {
        let evt = self.events.alloc()?;
        self.events.set_ctx(evt, &[error])?;
        if self.dispatch(ExtEvent::RfRxFailed, evt).is_none() {
            debug!("rx failure {} ignored", error);
        }
        self.events.free(evt);
        Ok(())
    }

    pub fn rf_tx_started(&mut self) {
        trace!("tx started");
    }

    pub fn rf_tx_finished(&mut self) {
        self.rf_complete(ExtEvent::RfTxFinished, None);
    }

    pub fn rf_tx_failed(&mut self, error: u8) {
        self.rf_complete(ExtEvent::RfTxFailed, Some(error));
    }

    /// CCA finished; `channel_free` is the assessment result
    pub fn rf_cca_done(&mut self, channel_free: bool) {
        self.rf_complete(ExtEvent::RfCcaDone, Some(channel_free as u8));
    }

    pub fn rf_cca_failed(&mut self, error: u8) {
        self.rf_complete(ExtEvent::RfCcaFailed, Some(error));
    }

    pub fn rf_ed_done(&mut self, value: u8) {
        self.rf_complete(ExtEvent::RfEdDetected, Some(value));
    }

    pub fn rf_ed_failed(&mut self, error: u8) {
        self.rf_complete(ExtEvent::RfEdFailed, Some(error));
    }

    // ------------------------------------------------------------------------
    // Inbound: host
    // ------------------------------------------------------------------------

    /// A complete line arrived from the host
    ///
    /// Unknown and malformed lines are dropped with a re-prompt. A mode
    /// change is handled here, ahead of any command lock.
    pub fn push_host_line(&mut self, line: &[u8]) -> PttResult<()> {
        let text = String::from_utf8_lossy(line);
        let parsed = match ptt_protocol::parse_line(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("host line rejected: {}", e);
                self.prompt();
                return Err(e.into());
            }
        };

        if parsed.command == ptt_protocol::HostCommand::ChangeMode {
            let result = self.switch_mode_raw(parsed.args.first().copied().unwrap_or(0) as u32);
            self.prompt();
            return result;
        }

        let evt = self.events.alloc()?;
        let stored = self.events.get_mut(evt).map(|event| {
            event.cmd = EventCmd::Host(parsed.command);
            event
                .set_ctx(&parsed.args)
                .and_then(|_| event.set_data(parsed.raw.as_bytes()))
        });
        if let Some(Err(e)) = stored {
            self.events.free(evt);
            self.prompt();
            return Err(e);
        }

        match self.dispatch(ExtEvent::UartPacketReceived, evt) {
            Some(result) => result,
            None => {
                self.events.free(evt);
                self.prompt();
                Err(PttError::InvalidCommand)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inbound: clock
    // ------------------------------------------------------------------------

    /// External timer tick; fires every expired timer and re-arms the primitive
    pub fn process(&mut self, now: u32) {
        self.timers.rebase(now);
        while let Some(fired) = self.timers.pop_expired() {
            (fired.callback)(self, fired.owner);
        }
        let arm = self.timers.rearm();
        self.platform.arm(arm);
    }

    // ------------------------------------------------------------------------
    // Helpers for the mode state machines
    // ------------------------------------------------------------------------

    pub(crate) fn timer_add(
        &mut self,
        timeout_ms: u32,
        callback: TimerCallback,
        owner: EventId,
    ) -> PttResult<()> {
        let now = self.platform.now_ms();
        if let Some(arm) = self.timers.add(now, timeout_ms, callback, owner)? {
            self.platform.arm(arm);
        }
        Ok(())
    }

    pub(crate) fn timer_remove(&mut self, owner: EventId) {
        self.timers.remove(owner);
    }

    pub(crate) fn send_host(&mut self, rsp: HostResponse) {
        debug!("host <- {}", rsp);
        self.platform.send(rsp.to_string().as_bytes(), true);
    }

    pub(crate) fn prompt(&mut self) {
        self.platform.prompt();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mode", &self.mode())
            .field("events_in_use", &self.events.in_use())
            .field("timers_active", &self.timers.active())
            .field("rf_locked_by", &self.rf.locked_by())
            .finish()
    }
}
