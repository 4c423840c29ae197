//! CMD mode
//!
//! The controller side: host lines drive the UART state machine, which
//! issues OTA transactions to the DUT through the OTA state machine and
//! runs local radio tests directly. This module owns the shared CMD state
//! and routes radio completions to whichever state machine is waiting.

pub mod ota;
pub mod uart;

use tracing::{debug, warn};

use crate::dispatch::Handlers;
use crate::engine::Engine;
use crate::error::{PttError, PttResult};
use crate::event::{EventId, EventState};
use crate::mode::ModeState;

use self::ota::OtaContext;
use self::uart::{UartContext, UartStage};

/// LED reception indicator
#[derive(Debug, Default)]
pub(crate) struct Indication {
    /// Token owning the blink timer, allocated while indication is on
    evt: Option<EventId>,
    blinking: bool,
}

/// CMD mode state
#[derive(Debug)]
pub struct CmdContext {
    pub(crate) ota: OtaContext,
    pub(crate) uart: UartContext,
    pub(crate) rsp_timeout_ms: u16,
    pub(crate) indication: Indication,
}

impl CmdContext {
    pub fn new(rsp_timeout_ms: u16) -> Self {
        Self {
            ota: OtaContext::default(),
            uart: UartContext::default(),
            rsp_timeout_ms,
            indication: Indication::default(),
        }
    }

    /// Event of the OTA transaction in flight
    pub fn ota_current(&self) -> Option<EventId> {
        self.ota.current
    }

    /// Event of the host command being processed
    pub fn uart_current(&self) -> Option<EventId> {
        self.uart.current
    }

    /// How long to wait for a DUT response
    pub fn rsp_timeout_ms(&self) -> u16 {
        self.rsp_timeout_ms
    }
}

pub(crate) fn handlers() -> Handlers {
    Handlers {
        rf_tx_finished: Some(Engine::cmd_rf_tx_finished),
        rf_tx_failed: Some(Engine::cmd_rf_tx_failed),
        rf_rx_done: Some(Engine::cmd_rf_rx_done),
        rf_rx_failed: Some(Engine::cmd_rf_rx_failed),
        rf_cca_done: Some(Engine::uart_cca_done),
        rf_cca_failed: Some(Engine::uart_cca_failed),
        rf_ed_detected: Some(Engine::uart_ed_detected),
        rf_ed_failed: Some(Engine::uart_ed_failed),
        uart_pkt_received: Some(Engine::uart_pkt_received),
    }
}

impl Engine {
    pub(crate) fn cmd(&mut self) -> Option<&mut CmdContext> {
        match &mut self.mode {
            ModeState::Cmd(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub(crate) fn cmd_ref(&self) -> Option<&CmdContext> {
        match &self.mode {
            ModeState::Cmd(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// State of the CMD mode, if active
    pub fn cmd_context(&self) -> Option<&CmdContext> {
        self.cmd_ref()
    }

    pub(crate) fn rsp_timeout_ms(&self) -> u32 {
        self.cmd_ref()
            .map(|ctx| ctx.rsp_timeout_ms)
            .unwrap_or(self.config.rsp_timeout_ms) as u32
    }

    pub(crate) fn cmd_uninit(&mut self) {
        self.uart_uninit();
        let Some(ctx) = self.cmd() else { return };
        let indication = std::mem::take(&mut ctx.indication);
        ctx.ota.current = None;
        if indication.evt.is_some() {
            self.platform.led_off();
        }
    }

    // ------------------------------------------------------------------------
    // Completion routing
    // ------------------------------------------------------------------------

    fn uart_waiting_for_ltx(&self) -> bool {
        self.uart_stage() == Some(UartStage::LtxWaitingForAck)
    }

    fn cmd_rf_tx_finished(&mut self, evt: EventId) -> PttResult<()> {
        match self.events.state(evt) {
            EventState::Uart(_) if self.uart_waiting_for_ltx() => self.uart_ltx_finished(evt),
            EventState::Ota(_) => self.ota_tx_finished(evt),
            state => {
                warn!("tx finished for {} in unexpected state {:?}", evt, state);
                self.events.free(evt);
                Err(PttError::InvalidState)
            }
        }
    }

    fn cmd_rf_tx_failed(&mut self, evt: EventId) -> PttResult<()> {
        match self.events.state(evt) {
            EventState::Uart(_) if self.uart_waiting_for_ltx() => self.uart_ltx_failed(evt),
            EventState::Ota(_) => self.ota_tx_failed(evt),
            state => {
                warn!("tx failed for {} in unexpected state {:?}", evt, state);
                self.events.free(evt);
                Err(PttError::InvalidState)
            }
        }
    }

    fn cmd_rf_rx_done(&mut self, pkt: EventId) -> PttResult<()> {
        let result = match self.uart_stage() {
            Some(UartStage::LtxWaitingForAck) => self.uart_ltx_ack(pkt),
            Some(UartStage::WaitingForLend) => self.uart_lstart_packet(pkt),
            Some(UartStage::WaitingForRfPacket) => self.uart_lqi_packet(pkt),
            _ => self.ota_rx(pkt),
        };
        self.indication_on_rx();
        result
    }

    fn cmd_rf_rx_failed(&mut self, pkt: EventId) -> PttResult<()> {
        match self.uart_stage() {
            Some(UartStage::WaitingForLend) => self.uart_lstart_rx_failed(pkt),
            stage => {
                debug!("rx failure ignored in {:?}", stage);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // LED indication
    // ------------------------------------------------------------------------

    pub(crate) fn indication_set(&mut self, enable: bool) -> PttResult<()> {
        let current = self
            .cmd_ref()
            .ok_or(PttError::InvalidMode)?
            .indication
            .evt;
        match (enable, current) {
            (true, None) => {
                let evt = self.events.alloc()?;
                if let Some(ctx) = self.cmd() {
                    ctx.indication = Indication {
                        evt: Some(evt),
                        blinking: false,
                    };
                }
            }
            (false, Some(evt)) => {
                self.timer_remove(evt);
                self.events.free(evt);
                if let Some(ctx) = self.cmd() {
                    ctx.indication = Indication::default();
                }
                self.platform.led_off();
            }
            _ => {}
        }
        Ok(())
    }

    fn indication_on_rx(&mut self) {
        let Some(ctx) = self.cmd() else { return };
        let Some(evt) = ctx.indication.evt else { return };
        if ctx.indication.blinking {
            return;
        }
        let blink = self.config.led_blink_ms;
        match self.timer_add(blink, Engine::indication_off, evt) {
            Ok(()) => {
                if let Some(ctx) = self.cmd() {
                    ctx.indication.blinking = true;
                }
                self.platform.led_on();
            }
            Err(e) => debug!("led blink timer not armed: {}", e),
        }
    }

    fn indication_off(&mut self, _evt: EventId) {
        if let Some(ctx) = self.cmd() {
            ctx.indication.blinking = false;
        }
        self.platform.led_off();
    }
}
