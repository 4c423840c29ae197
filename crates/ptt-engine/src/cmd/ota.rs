//! OTA transactions issued by the CMD device
//!
//! One transaction at a time. A transaction sends a single frame; commands
//! that expect an answer then wait up to the response timeout for a frame
//! with the matching code and exact length. Every transaction ends in
//! exactly one of two upcalls to the UART state machine, finished or timed
//! out, and the slot is cleared before the upcall runs.

use ptt_protocol::{build_frame, frame_payload, WireCommand};
use tracing::{debug, trace, warn};

use crate::engine::Engine;
use crate::error::{PttError, PttResult};
use crate::event::{EventCmd, EventId, EventState};

/// Processing stage of an OTA transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaStage {
    /// Frame handed to the radio
    Sending,
    /// Frame sent, response timer armed
    WaitingForResponse,
}

#[derive(Debug, Default)]
pub(crate) struct OtaContext {
    pub(crate) current: Option<EventId>,
}

/// Response a command waits for, `None` for fire-and-forget commands
pub fn expected_response(cmd: WireCommand) -> Option<WireCommand> {
    match cmd {
        WireCommand::Ping => Some(WireCommand::Ack),
        WireCommand::GetPower => Some(WireCommand::GetPowerResponse),
        WireCommand::EndRxTest => Some(WireCommand::Report),
        WireCommand::GetHardwareVersion => Some(WireCommand::GetHardwareVersionResponse),
        WireCommand::GetSoftwareVersion => Some(WireCommand::GetSoftwareVersionResponse),
        WireCommand::GetTxAntenna
        | WireCommand::GetRxAntenna
        | WireCommand::GetLastBestRxAntenna => Some(WireCommand::GetAntennaResponse),
        _ => None,
    }
}

impl Engine {
    fn ota_current(&self) -> Option<EventId> {
        self.cmd_ref().and_then(|ctx| ctx.ota.current)
    }

    fn ota_set_current(&mut self, evt: Option<EventId>) {
        if let Some(ctx) = self.cmd() {
            ctx.ota.current = evt;
        }
    }

    /// Allocate an event for `cmd` with `payload` and start the transaction
    ///
    /// On error the event is freed again.
    pub(crate) fn call_ota_cmd(&mut self, cmd: WireCommand, payload: &[u8]) -> PttResult<EventId> {
        let evt = self.events.alloc()?;
        self.events.set_cmd(evt, EventCmd::Wire(cmd));
        let result = self
            .events
            .set_ctx(evt, payload)
            .and_then(|_| self.ota_process(evt));
        match result {
            Ok(()) => Ok(evt),
            Err(e) => {
                self.events.free(evt);
                Err(e)
            }
        }
    }

    /// Start the transaction held by `evt`; `Busy` while another is in flight
    pub(crate) fn ota_process(&mut self, evt: EventId) -> PttResult<()> {
        let ctx = self.cmd().ok_or(PttError::InvalidMode)?;
        if let Some(current) = ctx.ota.current {
            debug!("ota busy with {}, {} rejected", current, evt);
            return Err(PttError::Busy);
        }
        ctx.ota.current = Some(evt);

        if let Err(e) = self.ota_send(evt) {
            self.ota_set_current(None);
            return Err(e);
        }
        Ok(())
    }

    fn ota_send(&mut self, evt: EventId) -> PttResult<()> {
        let EventCmd::Wire(cmd) = self.events.cmd(evt) else {
            return Err(PttError::InvalidCommand);
        };
        let frame = build_frame(cmd, self.events.ctx(evt));
        self.events
            .get_mut(evt)
            .ok_or(PttError::NullPointer)?
            .set_data(&frame)?;
        self.events.set_state(evt, EventState::Ota(OtaStage::Sending));
        self.rf.send_packet(&mut *self.platform, evt, &frame)?;
        debug!("ota -> {} ({} bytes)", cmd, frame.len());
        Ok(())
    }

    pub(crate) fn ota_tx_finished(&mut self, evt: EventId) -> PttResult<()> {
        if self.ota_current() != Some(evt) {
            warn!("ota tx finished for {} which is not in flight", evt);
            self.events.free(evt);
            return Err(PttError::InvalidState);
        }
        let EventCmd::Wire(cmd) = self.events.cmd(evt) else {
            self.ota_timed_out(evt);
            return Err(PttError::InvalidCommand);
        };

        match expected_response(cmd) {
            None => self.ota_finished(evt),
            Some(rsp) => {
                self.events
                    .set_state(evt, EventState::Ota(OtaStage::WaitingForResponse));
                let timeout = self.rsp_timeout_ms();
                if let Err(e) = self.timer_add(timeout, Engine::ota_rsp_timeout, evt) {
                    warn!("ota response timer for {} not armed: {}", evt, e);
                    self.ota_timed_out(evt);
                    return Err(e);
                }
                trace!("ota waiting {}ms for {}", timeout, rsp);
            }
        }
        Ok(())
    }

    pub(crate) fn ota_tx_failed(&mut self, evt: EventId) -> PttResult<()> {
        if self.ota_current() != Some(evt) {
            warn!("ota tx failed for {} which is not in flight", evt);
            self.events.free(evt);
            return Err(PttError::InvalidState);
        }
        debug!("ota {} send failed", evt);
        self.ota_timed_out(evt);
        Ok(())
    }

    fn ota_rsp_timeout(&mut self, evt: EventId) {
        if self.ota_current() != Some(evt) {
            return;
        }
        debug!("ota {} response timeout", evt);
        self.ota_timed_out(evt);
    }

    /// Inbound frame while no host command claims it
    pub(crate) fn ota_rx(&mut self, pkt: EventId) -> PttResult<()> {
        let Some(current) = self.ota_current() else {
            trace!("ota idle, {} ignored", pkt);
            return Ok(());
        };
        if self.events.state(current) != EventState::Ota(OtaStage::WaitingForResponse) {
            return Ok(());
        }
        let EventCmd::Wire(sent) = self.events.cmd(current) else {
            return Ok(());
        };
        let Some(expected) = expected_response(sent) else {
            return Ok(());
        };
        let data = self.events.data(pkt);
        if self.events.cmd(pkt) != EventCmd::Wire(expected) || data.len() != expected.frame_len() {
            trace!("ota {} does not answer {}", pkt, sent);
            return Ok(());
        }

        let result = if expected == WireCommand::Ack {
            vec![1]
        } else {
            frame_payload(data).to_vec()
        };
        self.timer_remove(current);
        self.events.set_ctx(current, &result)?;
        debug!("ota <- {}", expected);
        self.ota_finished(current);
        Ok(())
    }

    fn ota_finished(&mut self, evt: EventId) {
        self.ota_set_current(None);
        self.uart_ota_result(evt, true);
    }

    fn ota_timed_out(&mut self, evt: EventId) {
        self.ota_set_current(None);
        self.timer_remove(evt);
        self.uart_ota_result(evt, false);
    }
}
