//! DUT mode
//!
//! The device under test answers OTA commands from a CMD device. It runs one
//! transaction at a time: a reply in flight or a modulated stream blocks
//! further commands until it completes. An RX test holds the RF lock on a
//! separate token so the DUT keeps listening for the end-of-test command.

use ptt_protocol::{
    build_frame, check_header, frame_payload, read_be16, read_be32, RxReport, WireCommand,
};
use tracing::{debug, info, warn};

use crate::dispatch::Handlers;
use crate::engine::Engine;
use crate::error::{PttError, PttResult};
use crate::event::{EventCmd, EventId, EventState};
use crate::mode::ModeState;

/// Processing stage of a DUT transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutStage {
    /// A reply frame is being sent
    Replying,
    /// A modulated stream is running until its timer fires
    Streaming,
    /// Receive statistics are being collected
    RxTest,
}

/// DUT mode state
#[derive(Debug, Default)]
pub struct DutContext {
    current: Option<EventId>,
    rx_test: Option<EventId>,
    proto_pkts: u32,
}

pub(crate) fn handlers() -> Handlers {
    Handlers {
        rf_tx_finished: Some(Engine::dut_rf_tx_done),
        rf_tx_failed: Some(Engine::dut_rf_tx_done),
        rf_rx_done: Some(Engine::dut_rf_rx_done),
        ..Handlers::default()
    }
}

impl Engine {
    fn dut(&mut self) -> Option<&mut DutContext> {
        match &mut self.mode {
            ModeState::Dut(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub(crate) fn dut_uninit(&mut self) {
        let Some(ctx) = self.dut() else { return };
        let rx_test = ctx.rx_test.take();
        ctx.current = None;
        if let Some(evt) = rx_test {
            if let Err(e) = self.rf.end_statistic(evt) {
                debug!("dut: ending rx test {}: {}", evt, e);
            }
        }
    }

    fn dut_rf_rx_done(&mut self, pkt: EventId) -> PttResult<()> {
        let protocol = check_header(self.events.data(pkt));
        let ctx = self.dut().ok_or(PttError::InvalidMode)?;
        if protocol && ctx.rx_test.is_some() {
            ctx.proto_pkts = ctx.proto_pkts.wrapping_add(1);
        }

        let EventCmd::Wire(cmd) = self.events.cmd(pkt) else {
            return Ok(());
        };
        let payload = frame_payload(self.events.data(pkt)).to_vec();

        let ctx = self.dut().ok_or(PttError::InvalidMode)?;
        if let Some(current) = ctx.current {
            debug!("dut busy with {}, {} dropped", current, cmd);
            return Err(PttError::Busy);
        }
        if payload.len() != cmd.payload_len() {
            debug!("dut: {} with {} payload bytes dropped", cmd, payload.len());
            return Err(PttError::InvalidValue);
        }

        self.dut_handle(cmd, &payload)
    }

    fn dut_handle(&mut self, cmd: WireCommand, payload: &[u8]) -> PttResult<()> {
        debug!("dut <- {}", cmd);
        match cmd {
            WireCommand::Ping => self.dut_reply(WireCommand::Ack, &[]),
            WireCommand::SetChannel => {
                let mask = read_be32(payload).ok_or(PttError::InvalidValue)?;
                let channel = self.rf.set_channel_mask(&mut *self.platform, mask)?;
                info!("dut channel {}", channel);
                Ok(())
            }
            WireCommand::SetPower => self.rf.set_power(&mut *self.platform, payload[0] as i8),
            WireCommand::GetPower => {
                let power = self.rf.power();
                self.dut_reply(WireCommand::GetPowerResponse, &[power as u8])
            }
            WireCommand::Stream => {
                let duration = read_be16(payload).ok_or(PttError::InvalidValue)?;
                self.dut_stream(duration)
            }
            WireCommand::StartRxTest => self.dut_start_rx_test(),
            WireCommand::EndRxTest => self.dut_end_rx_test(),
            WireCommand::GetHardwareVersion => {
                let hw = self.config.hw_version;
                self.dut_reply(WireCommand::GetHardwareVersionResponse, &[hw])
            }
            WireCommand::GetSoftwareVersion => {
                let sw = self.config.sw_version;
                self.dut_reply(WireCommand::GetSoftwareVersionResponse, &[sw])
            }
            WireCommand::SetAntenna => self.rf.set_antenna(&mut *self.platform, payload[0]),
            WireCommand::SetTxAntenna => self.rf.set_tx_antenna(&mut *self.platform, payload[0]),
            WireCommand::SetRxAntenna => self.rf.set_rx_antenna(&mut *self.platform, payload[0]),
            WireCommand::GetTxAntenna => {
                let antenna = self.rf.tx_antenna();
                self.dut_reply(WireCommand::GetAntennaResponse, &[antenna])
            }
            WireCommand::GetRxAntenna => {
                let antenna = self.rf.rx_antenna();
                self.dut_reply(WireCommand::GetAntennaResponse, &[antenna])
            }
            WireCommand::GetLastBestRxAntenna => {
                let antenna = self.rf.last_best_rx_antenna(&mut *self.platform);
                self.dut_reply(WireCommand::GetAntennaResponse, &[antenna])
            }
            WireCommand::ChangeMode => {
                let mode = read_be32(payload).ok_or(PttError::InvalidValue)?;
                self.switch_mode_raw(mode)
            }
            WireCommand::Ack
            | WireCommand::GetPowerResponse
            | WireCommand::Report
            | WireCommand::GetHardwareVersionResponse
            | WireCommand::GetSoftwareVersionResponse
            | WireCommand::GetAntennaResponse => Err(PttError::InvalidCommand),
        }
    }

    /// Allocate a transaction event and make it current
    fn dut_begin(&mut self, stage: DutStage) -> PttResult<EventId> {
        let evt = self.events.alloc()?;
        self.events.set_state(evt, EventState::Dut(stage));
        if let Some(ctx) = self.dut() {
            ctx.current = Some(evt);
        }
        Ok(evt)
    }

    fn dut_finish(&mut self, evt: EventId) {
        if let Some(ctx) = self.dut() {
            if ctx.current == Some(evt) {
                ctx.current = None;
            }
        }
        self.events.free(evt);
    }

    fn dut_reply(&mut self, cmd: WireCommand, payload: &[u8]) -> PttResult<()> {
        let evt = self.dut_begin(DutStage::Replying)?;
        self.events.set_cmd(evt, EventCmd::Wire(cmd));
        let frame = build_frame(cmd, payload);
        let sent = match self.events.get_mut(evt) {
            Some(event) => event.set_data(&frame),
            None => Err(PttError::NullPointer),
        }
        .and_then(|_| self.rf.send_packet(&mut *self.platform, evt, &frame));

        if let Err(e) = sent {
            self.dut_finish(evt);
            return Err(e);
        }
        debug!("dut -> {}", cmd);
        Ok(())
    }

    fn dut_rf_tx_done(&mut self, evt: EventId) -> PttResult<()> {
        self.dut_finish(evt);
        Ok(())
    }

    fn dut_stream(&mut self, duration_ms: u16) -> PttResult<()> {
        if duration_ms == 0 {
            return Err(PttError::InvalidValue);
        }
        let evt = self.dut_begin(DutStage::Streaming)?;
        let mut payload = vec![0u8; self.config.custom_payload_max];
        self.platform.random_fill(&mut payload);

        let started = self
            .rf
            .start_modulated_stream(&mut *self.platform, evt, &payload)
            .and_then(|_| self.timer_add(duration_ms as u32, Engine::dut_stream_end, evt));
        if let Err(e) = started {
            if let Err(e) = self.rf.stop_modulated_stream(&mut *self.platform, evt) {
                debug!("dut: stopping stream {}: {}", evt, e);
            }
            self.dut_finish(evt);
            return Err(e);
        }
        info!("dut streaming for {}ms", duration_ms);
        Ok(())
    }

    fn dut_stream_end(&mut self, evt: EventId) {
        if let Err(e) = self.rf.stop_modulated_stream(&mut *self.platform, evt) {
            warn!("dut: stopping stream failed: {}", e);
        }
        self.dut_finish(evt);
    }

    fn dut_start_rx_test(&mut self) -> PttResult<()> {
        if self.dut().is_some_and(|ctx| ctx.rx_test.is_some()) {
            return Err(PttError::InvalidState);
        }
        let evt = self.events.alloc()?;
        self.events.set_state(evt, EventState::Dut(DutStage::RxTest));
        if let Err(e) = self.rf.start_statistic(evt) {
            self.events.free(evt);
            return Err(e);
        }
        if let Some(ctx) = self.dut() {
            ctx.rx_test = Some(evt);
            ctx.proto_pkts = 0;
        }
        info!("dut rx test started");
        Ok(())
    }

    fn dut_end_rx_test(&mut self) -> PttResult<()> {
        let Some(ctx) = self.dut() else {
            return Err(PttError::InvalidMode);
        };
        let evt = ctx.rx_test.take().ok_or(PttError::InvalidState)?;
        let proto_pkts = ctx.proto_pkts;

        let stat = self.rf.end_statistic(evt);
        self.events.free(evt);
        let stat = stat?;

        let report = RxReport {
            total_pkts: stat.total_pkts,
            proto_pkts,
            total_lqi: stat.total_lqi,
            total_rssi: stat.total_rssi,
        };
        info!("dut rx test ended: {:?}", report);
        self.dut_reply(WireCommand::Report, &report.to_payload())
    }
}
