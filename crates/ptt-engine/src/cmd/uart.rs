//! Host command state machine
//!
//! One host command is processed at a time. Commands that complete
//! immediately never take the slot; everything that waits on the radio, a
//! timer or an OTA transaction locks it with the host line's event and
//! advances through [`UartStage`]s until it unlocks. Unlocking always frees
//! the event and re-prompts the host.
//!
//! While locked, only the command that ends the running operation is
//! accepted (`lend`, `ltxend`, `lclk <pin> 0`); anything else is answered
//! with `BUSY`.

use ptt_protocol::host::{
    parse_address16, parse_extended_address, parse_ltx, parse_payload, parse_power,
    parse_waveform,
};
use ptt_protocol::{
    channel_to_mask, check_header, htobe32, read_be16, read_be32, HostCommand, HostResponse,
    LtxArgs, RxReport, WireCommand, CHANNEL_MAX, CHANNEL_MIN,
};
use tracing::{debug, info, trace, warn};

use crate::engine::Engine;
use crate::error::{PttError, PttResult};
use crate::event::{EventCmd, EventId, EventState};
use crate::rf::channel_from_mask;

/// Processing stage of a locked host command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartStage {
    /// Single OTA transaction in flight
    Remote,
    /// `setchannel`/`find`: set-channel frame in flight
    ChannelSet,
    /// `setchannel`/`find`: giving the DUT time to retune
    ChannelSettle,
    /// `setchannel`/`find`: ping in flight
    ChannelPing,
    WaitingForCca,
    WaitingForEd,
    WaitingForRssi,
    /// `lstart` running until `lend`
    WaitingForLend,
    /// `lgetlqi` waiting for a packet
    WaitingForRfPacket,
    /// `ltx` between frames
    Ltx,
    /// `ltx` frame in flight
    LtxWaitingForAck,
    /// `lclk` running until stopped
    LClkOut,
    /// `lcarrier`/`lstream` emitting
    Pulse,
    /// `lcarrier`/`lstream` idle between pulses
    Interval,
}

#[derive(Debug, Clone, Copy, Default)]
struct LtxRun {
    /// 0 runs until `ltxend`
    repeats: u8,
    timeout_ms: u16,
    sent: u32,
    acks: u32,
    stop_requested: bool,
}

impl LtxRun {
    fn is_infinite(&self) -> bool {
        self.repeats == 0
    }

    fn is_done(&self) -> bool {
        self.stop_requested || (!self.is_infinite() && self.sent >= self.repeats as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emission {
    Carrier,
    Stream,
}

#[derive(Debug, Clone, Copy)]
struct Waveform {
    emission: Emission,
    pulse_ms: u32,
    interval_ms: u32,
}

#[derive(Debug, Default)]
pub(crate) struct UartContext {
    pub(crate) current: Option<EventId>,
    proto_pkts: u32,
    ltx: LtxRun,
    waveform: Option<Waveform>,
    clk_pin: Option<u8>,
}

fn arg(args: &[u8], index: usize) -> PttResult<u8> {
    args.get(index).copied().ok_or(PttError::InvalidValue)
}

fn flag(value: u8) -> PttResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(PttError::InvalidValue),
    }
}

/// Channel mask with exactly one bit set, within the channel range
fn single_channel_mask(args: &[u8]) -> PttResult<u32> {
    let mask = read_be32(args).ok_or(PttError::InvalidValue)?;
    if mask < channel_to_mask(CHANNEL_MIN)
        || mask > channel_to_mask(CHANNEL_MAX)
        || !mask.is_power_of_two()
    {
        return Err(PttError::InvalidValue);
    }
    Ok(mask)
}

/// Host response for a single-transaction remote command
fn remote_response(cmd: HostCommand, finished: bool, payload: &[u8]) -> Option<HostResponse> {
    let value = payload.first().copied().filter(|_| finished);
    let rsp = match cmd {
        HostCommand::RPing if finished => HostResponse::Ack,
        HostCommand::RPing => HostResponse::NoAck,
        HostCommand::RGetPower => value
            .map(|p| HostResponse::Power(p as i8))
            .unwrap_or(HostResponse::PowerError),
        HostCommand::REnd => finished
            .then(|| RxReport::from_payload(payload).ok())
            .flatten()
            .map(HostResponse::RxTest)
            .unwrap_or(HostResponse::RxTestError),
        HostCommand::RHardware => value
            .map(HostResponse::HardwareVersion)
            .unwrap_or(HostResponse::HardwareVersionError),
        HostCommand::RSoftware => value
            .map(HostResponse::SoftwareVersion)
            .unwrap_or(HostResponse::SoftwareVersionError),
        HostCommand::RGetTxAntenna
        | HostCommand::RGetRxAntenna
        | HostCommand::RGetBestRxAntenna => value
            .map(HostResponse::Antenna)
            .unwrap_or(HostResponse::AntennaError),
        _ => return None,
    };
    Some(rsp)
}

impl Engine {
    fn uart(&mut self) -> Option<&mut UartContext> {
        self.cmd().map(|ctx| &mut ctx.uart)
    }

    fn uart_current(&self) -> Option<EventId> {
        self.cmd_ref().and_then(|ctx| ctx.uart.current)
    }

    /// Stage of the locked host command, `None` while idle
    pub(crate) fn uart_stage(&self) -> Option<UartStage> {
        match self.events.state(self.uart_current()?) {
            EventState::Uart(stage) => Some(stage),
            _ => None,
        }
    }

    fn uart_lock(&mut self, evt: EventId, stage: UartStage) {
        if let Some(uart) = self.uart() {
            uart.current = Some(evt);
        }
        self.events.set_state(evt, EventState::Uart(stage));
        trace!("uart locked by {} in {:?}", evt, stage);
    }

    fn uart_set_stage(&mut self, stage: UartStage) {
        if let Some(evt) = self.uart_current() {
            self.events.set_state(evt, EventState::Uart(stage));
        }
    }

    fn uart_unlock(&mut self) {
        if let Some(evt) = self.uart().and_then(|uart| uart.current.take()) {
            self.timer_remove(evt);
            if self.rf.locked_by() == Some(evt) {
                warn!("{} released with the radio still locked", evt);
                let released = if self.rf.is_stat_enabled() {
                    self.rf.end_statistic(evt).map(|_| ())
                } else {
                    self.rf
                        .unlock(evt)
                        .and_then(|_| self.rf.receive(&mut *self.platform))
                };
                if let Err(e) = released {
                    debug!("releasing radio from {}: {}", evt, e);
                }
            }
            self.events.free(evt);
            trace!("uart unlocked");
        }
        if let Some(uart) = self.uart() {
            uart.waveform = None;
        }
        self.prompt();
    }

    pub(crate) fn uart_uninit(&mut self) {
        let Some(uart) = self.uart() else { return };
        let clk_pin = std::mem::take(uart).clk_pin;
        if let Some(pin) = clk_pin {
            self.platform.clk_out(pin, false);
        }
    }

    // ------------------------------------------------------------------------
    // Entry
    // ------------------------------------------------------------------------

    pub(crate) fn uart_pkt_received(&mut self, evt: EventId) -> PttResult<()> {
        let EventCmd::Host(cmd) = self.events.cmd(evt) else {
            self.events.free(evt);
            self.prompt();
            return Err(PttError::InvalidCommand);
        };
        if let Some(current) = self.uart_current() {
            return self.uart_interrupt(current, evt, cmd);
        }

        debug!("uart <- {}", cmd);
        let result = self.uart_idle(evt, cmd);
        let locked = self.uart_current() == Some(evt);
        if let Err(e) = result {
            debug!("{} failed: {}", cmd, e);
        }
        match (result.is_ok(), locked) {
            (true, true) => {}
            (false, true) => self.uart_unlock(),
            (_, false) => {
                self.events.free(evt);
                self.prompt();
            }
        }
        result
    }

    /// A host line arriving while another command holds the slot
    fn uart_interrupt(&mut self, current: EventId, evt: EventId, cmd: HostCommand) -> PttResult<()> {
        let args = self.events.ctx(evt).to_vec();
        self.events.free(evt);

        match (self.uart_stage(), cmd) {
            (Some(UartStage::WaitingForLend), HostCommand::LEnd) => {
                self.uart_lend(current);
                Ok(())
            }
            (Some(UartStage::LClkOut), HostCommand::LClk)
                if self.cmd_ref().and_then(|ctx| ctx.uart.clk_pin) == args.first().copied()
                    && args.get(1) == Some(&0) =>
            {
                if let Some(pin) = self.uart().and_then(|uart| uart.clk_pin.take()) {
                    if !self.platform.clk_out(pin, false) {
                        warn!("clock output on pin {} did not stop", pin);
                    }
                }
                self.uart_unlock();
                Ok(())
            }
            (Some(UartStage::Ltx | UartStage::LtxWaitingForAck), HostCommand::LTxEnd) => {
                if let Some(uart) = self.uart() {
                    if uart.ltx.is_infinite() {
                        uart.ltx.stop_requested = true;
                    }
                }
                Ok(())
            }
            (stage, _) => {
                debug!("uart busy with {} in {:?}, {} rejected", current, stage, cmd);
                self.send_host(HostResponse::Busy);
                self.prompt();
                Err(PttError::Busy)
            }
        }
    }

    fn uart_idle(&mut self, evt: EventId, cmd: HostCommand) -> PttResult<()> {
        let args = self.events.ctx(evt).to_vec();
        let raw = String::from_utf8_lossy(self.events.data(evt)).into_owned();

        match cmd {
            // Remote
            HostCommand::SetChannel => {
                let mask = single_channel_mask(&args)?;
                self.uart_lock(evt, UartStage::ChannelSet);
                self.call_ota_cmd(WireCommand::SetChannel, &htobe32(mask))?;
            }
            HostCommand::RSetChannel => {
                let channel = arg(&args, 0)?;
                if !(CHANNEL_MIN..=CHANNEL_MAX).contains(&channel) {
                    return Err(PttError::InvalidValue);
                }
                self.uart_remote(evt, WireCommand::SetChannel, &htobe32(channel_to_mask(channel)))?;
            }
            HostCommand::RSetPower => {
                let power = parse_power(&raw)?.power;
                self.uart_remote(evt, WireCommand::SetPower, &[power as u8])?;
            }
            HostCommand::RGetPower => self.uart_remote(evt, WireCommand::GetPower, &[])?,
            HostCommand::RStream => {
                let duration = read_be16(&args).ok_or(PttError::InvalidValue)?;
                self.uart_remote(evt, WireCommand::Stream, &duration.to_be_bytes())?;
            }
            HostCommand::RStart => self.uart_remote(evt, WireCommand::StartRxTest, &[])?,
            HostCommand::REnd => self.uart_remote(evt, WireCommand::EndRxTest, &[])?,
            HostCommand::RHardware => self.uart_remote(evt, WireCommand::GetHardwareVersion, &[])?,
            HostCommand::RSoftware => self.uart_remote(evt, WireCommand::GetSoftwareVersion, &[])?,
            HostCommand::RPing => self.uart_remote(evt, WireCommand::Ping, &[])?,
            HostCommand::Find => self.uart_find_start(evt)?,
            HostCommand::RSetAntenna => {
                self.uart_remote(evt, WireCommand::SetAntenna, &[arg(&args, 0)?])?
            }
            HostCommand::RSetTxAntenna => {
                self.uart_remote(evt, WireCommand::SetTxAntenna, &[arg(&args, 0)?])?
            }
            HostCommand::RSetRxAntenna => {
                self.uart_remote(evt, WireCommand::SetRxAntenna, &[arg(&args, 0)?])?
            }
            HostCommand::RGetTxAntenna => self.uart_remote(evt, WireCommand::GetTxAntenna, &[])?,
            HostCommand::RGetRxAntenna => self.uart_remote(evt, WireCommand::GetRxAntenna, &[])?,
            HostCommand::RGetBestRxAntenna => {
                self.uart_remote(evt, WireCommand::GetLastBestRxAntenna, &[])?
            }

            // Local radio configuration
            HostCommand::LSetChannel => {
                let mask = single_channel_mask(&args)?;
                self.rf.set_channel_mask(&mut *self.platform, mask)?;
            }
            HostCommand::LGetChannel => self.send_host(HostResponse::Channel(self.rf.channel())),
            HostCommand::LSetPower => {
                let power = parse_power(&raw)?.power;
                self.rf.set_power(&mut *self.platform, power)?;
            }
            HostCommand::LGetPower => self.send_host(HostResponse::Power(self.rf.power())),
            HostCommand::LPingTimeout => {
                let timeout = read_be16(&args).ok_or(PttError::InvalidValue)?;
                self.cmd().ok_or(PttError::InvalidMode)?.rsp_timeout_ms = timeout;
                info!("response timeout {}ms", timeout);
            }
            HostCommand::LSetCca => self.rf.set_cca_on_tx(flag(arg(&args, 0)?)?),
            HostCommand::LSetPanId => {
                let pan_id = parse_address16(&raw)?;
                self.rf.set_pan_id(&mut *self.platform, pan_id);
            }
            HostCommand::LSetShort => {
                let addr = parse_address16(&raw)?;
                self.rf.set_short_address(&mut *self.platform, addr);
            }
            HostCommand::LSetExtended => {
                let addr = parse_extended_address(&raw)?;
                self.rf.set_extended_address(&mut *self.platform, addr);
            }
            HostCommand::LSetPayload => {
                let payload = parse_payload(&raw, self.config.custom_payload_max)?;
                self.rf.set_custom_payload(&payload)?;
            }
            HostCommand::LSetAntenna => self.rf.set_antenna(&mut *self.platform, arg(&args, 0)?)?,
            HostCommand::LSetTxAntenna => {
                self.rf.set_tx_antenna(&mut *self.platform, arg(&args, 0)?)?
            }
            HostCommand::LSetRxAntenna => {
                self.rf.set_rx_antenna(&mut *self.platform, arg(&args, 0)?)?
            }
            HostCommand::LGetTxAntenna => self.send_host(HostResponse::Antenna(self.rf.tx_antenna())),
            HostCommand::LGetRxAntenna => self.send_host(HostResponse::Antenna(self.rf.rx_antenna())),
            HostCommand::LGetBestRxAntenna => {
                let antenna = self.rf.last_best_rx_antenna(&mut *self.platform);
                self.send_host(HostResponse::Antenna(antenna));
            }
            HostCommand::LSleep => self.rf.sleep(&mut *self.platform)?,
            HostCommand::LReceive => self.rf.receive(&mut *self.platform)?,

            // Local measurements
            HostCommand::LGetCca => {
                let mode = arg(&args, 0)?;
                self.uart_lock(evt, UartStage::WaitingForCca);
                self.rf.cca(&mut *self.platform, evt, mode)?;
            }
            HostCommand::LGetEd => {
                self.uart_lock(evt, UartStage::WaitingForEd);
                let time_us = self.config.ed_time_us;
                self.rf.ed(&mut *self.platform, evt, time_us)?;
            }
            HostCommand::LGetRssi => {
                self.uart_lock(evt, UartStage::WaitingForRssi);
                self.rf.rssi_measure_begin(&mut *self.platform, evt)?;
                self.timer_add(self.config.rssi_time_ms, Engine::uart_rssi_readout, evt)?;
            }
            HostCommand::LStart => {
                self.uart_lock(evt, UartStage::WaitingForLend);
                self.rf.start_statistic(evt)?;
                if let Some(uart) = self.uart() {
                    uart.proto_pkts = 0;
                }
            }
            HostCommand::LGetLqi => {
                self.uart_lock(evt, UartStage::WaitingForRfPacket);
                self.timer_add(self.config.lqi_delay_ms, Engine::uart_lqi_timeout, evt)?;
            }

            // Local transmission
            HostCommand::LTx => self.uart_ltx_start(evt, &raw)?,
            HostCommand::LCarrier => self.uart_waveform_start(evt, &raw, Emission::Carrier)?,
            HostCommand::LStream => self.uart_waveform_start(evt, &raw, Emission::Stream)?,

            // Board
            HostCommand::LReboot => self.platform.reset(),
            HostCommand::LClk => {
                let pin = arg(&args, 0)?;
                if arg(&args, 1)? != 1 {
                    return Err(PttError::InvalidValue);
                }
                if !self.platform.clk_out(pin, true) {
                    return Err(PttError::InvalidState);
                }
                self.uart_lock(evt, UartStage::LClkOut);
                if let Some(uart) = self.uart() {
                    uart.clk_pin = Some(pin);
                }
            }
            HostCommand::LSetGpio => {
                let pin = arg(&args, 0)?;
                let value = flag(arg(&args, 1)?)?;
                if !self.platform.set_gpio(pin, value as u8) {
                    return Err(PttError::InvalidState);
                }
            }
            HostCommand::LGetGpio => {
                let rsp = match self.platform.get_gpio(arg(&args, 0)?) {
                    Some(value) => HostResponse::Gpio(value),
                    None => HostResponse::GpioError,
                };
                self.send_host(rsp);
            }
            HostCommand::LSetDcdc => self.platform.set_dcdc(flag(arg(&args, 0)?)?),
            HostCommand::LGetDcdc => {
                let on = self.platform.dcdc();
                self.send_host(HostResponse::Dcdc(on));
            }
            HostCommand::LSetIcache => self.platform.set_icache(flag(arg(&args, 0)?)?),
            HostCommand::LGetIcache => {
                let on = self.platform.icache();
                self.send_host(HostResponse::Icache(on));
            }
            HostCommand::LGetTemp => {
                let temp = self.platform.temperature().ok_or(PttError::InvalidState)?;
                self.send_host(HostResponse::Temperature(temp));
            }
            HostCommand::LIndication => self.indication_set(flag(arg(&args, 0)?)?)?,

            // Stop commands with nothing to stop; mode changes never get here
            HostCommand::LEnd | HostCommand::LTxEnd => return Err(PttError::InvalidState),
            HostCommand::ChangeMode => return Err(PttError::InvalidCommand),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Remote commands
    // ------------------------------------------------------------------------

    fn uart_remote(&mut self, evt: EventId, cmd: WireCommand, payload: &[u8]) -> PttResult<()> {
        self.uart_lock(evt, UartStage::Remote);
        self.call_ota_cmd(cmd, payload)?;
        Ok(())
    }

    /// Upcall from the OTA state machine; `finished` is false on timeout
    ///
    /// The OTA event ends here.
    pub(crate) fn uart_ota_result(&mut self, ota: EventId, finished: bool) {
        let payload = self.events.ctx(ota).to_vec();
        self.events.free(ota);

        let Some(current) = self.uart_current() else {
            warn!("ota result with no host command waiting");
            return;
        };
        let EventCmd::Host(cmd) = self.events.cmd(current) else {
            self.uart_unlock();
            return;
        };
        trace!("{} ota result finished={} in {:?}", cmd, finished, self.uart_stage());

        let result = match self.uart_stage() {
            Some(UartStage::Remote) => {
                if let Some(rsp) = remote_response(cmd, finished, &payload) {
                    self.send_host(rsp);
                }
                self.uart_unlock();
                Ok(())
            }
            Some(UartStage::ChannelSet) if finished => self.uart_channel_was_set(current, cmd),
            Some(UartStage::ChannelPing) => self.uart_channel_pinged(current, cmd, finished),
            stage => {
                debug!("{} ota result in {:?} ends the command", cmd, stage);
                self.uart_unlock();
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("{} aborted: {}", cmd, e);
            self.uart_unlock();
        }
    }

    // ------------------------------------------------------------------------
    // setchannel / find
    // ------------------------------------------------------------------------

    fn uart_channel_was_set(&mut self, current: EventId, cmd: HostCommand) -> PttResult<()> {
        if cmd == HostCommand::SetChannel {
            let mask = read_be32(self.events.ctx(current)).ok_or(PttError::InvalidValue)?;
            self.rf.set_channel_mask(&mut *self.platform, mask)?;
        }
        self.uart_set_stage(UartStage::ChannelSettle);
        self.timer_add(self.rsp_timeout_ms(), Engine::uart_channel_settled, current)
    }

    fn uart_channel_settled(&mut self, evt: EventId) {
        if self.uart_current() != Some(evt) {
            return;
        }
        self.uart_set_stage(UartStage::ChannelPing);
        if let Err(e) = self.call_ota_cmd(WireCommand::Ping, &[]) {
            debug!("ping after channel change not sent: {}", e);
            self.uart_unlock();
        }
    }

    fn uart_channel_pinged(
        &mut self,
        current: EventId,
        cmd: HostCommand,
        acked: bool,
    ) -> PttResult<()> {
        match (cmd, acked) {
            (HostCommand::Find, true) => {
                let mask = read_be32(self.events.ctx(current)).unwrap_or(0);
                match channel_from_mask(mask) {
                    Some(channel) => {
                        info!("DUT found on channel {}", channel);
                        self.send_host(HostResponse::Find(channel));
                    }
                    None => warn!("find ended with invalid mask {:#010x}", mask),
                }
            }
            (HostCommand::Find, false) => return self.uart_find_next(current),
            (_, true) => self.send_host(HostResponse::Ack),
            (_, false) => self.send_host(HostResponse::NoAck),
        }
        self.uart_unlock();
        Ok(())
    }

    fn uart_find_start(&mut self, evt: EventId) -> PttResult<()> {
        self.uart_lock(evt, UartStage::ChannelSet);
        self.uart_find_step(evt, channel_to_mask(CHANNEL_MIN))
    }

    fn uart_find_step(&mut self, current: EventId, mask: u32) -> PttResult<()> {
        let channel = self.rf.set_channel_mask(&mut *self.platform, mask)?;
        self.events.set_ctx(current, &htobe32(mask))?;
        self.uart_set_stage(UartStage::ChannelSet);
        debug!("find: trying channel {}", channel);
        self.call_ota_cmd(WireCommand::SetChannel, &htobe32(mask))?;
        Ok(())
    }

    fn uart_find_next(&mut self, current: EventId) -> PttResult<()> {
        let mask = read_be32(self.events.ctx(current)).ok_or(PttError::InvalidValue)?;
        if mask >= channel_to_mask(CHANNEL_MAX) {
            self.send_host(HostResponse::FindTimeout);
            self.uart_unlock();
            return Ok(());
        }
        self.uart_find_step(current, mask << 1)
    }

    // ------------------------------------------------------------------------
    // Measurements
    // ------------------------------------------------------------------------

    /// Completion of a CCA or ED request owned by the host command
    fn uart_rf_result(
        &mut self,
        evt: EventId,
        stage: UartStage,
        rsp: impl FnOnce(u8) -> HostResponse,
    ) -> PttResult<()> {
        if self.uart_current() != Some(evt) || self.uart_stage() != Some(stage) {
            warn!("{:?} result for {} which is not waiting for it", stage, evt);
            self.events.free(evt);
            return Err(PttError::InvalidState);
        }
        let value = self.events.ctx(evt).first().copied().unwrap_or(0);
        self.send_host(rsp(value));
        self.uart_unlock();
        Ok(())
    }

    pub(crate) fn uart_cca_done(&mut self, evt: EventId) -> PttResult<()> {
        self.uart_rf_result(evt, UartStage::WaitingForCca, |free| {
            HostResponse::CcaDone(free != 0)
        })
    }

    pub(crate) fn uart_cca_failed(&mut self, evt: EventId) -> PttResult<()> {
        self.uart_rf_result(evt, UartStage::WaitingForCca, |_| HostResponse::CcaFailed)
    }

    pub(crate) fn uart_ed_detected(&mut self, evt: EventId) -> PttResult<()> {
        self.uart_rf_result(evt, UartStage::WaitingForEd, HostResponse::EdDetected)
    }

    pub(crate) fn uart_ed_failed(&mut self, evt: EventId) -> PttResult<()> {
        self.uart_rf_result(evt, UartStage::WaitingForEd, |_| HostResponse::EdFailed)
    }

    fn uart_rssi_readout(&mut self, evt: EventId) {
        if self.uart_current() != Some(evt) {
            return;
        }
        let rsp = match self.rf.rssi_last_get(&mut *self.platform, evt) {
            Ok(Some(rssi)) => HostResponse::RssiDone(rssi),
            Ok(None) | Err(_) => HostResponse::RssiFailed,
        };
        self.send_host(rsp);
        self.uart_unlock();
    }

    pub(crate) fn uart_lstart_packet(&mut self, pkt: EventId) -> PttResult<()> {
        let event = self.events.get(pkt).ok_or(PttError::NullPointer)?;
        let psdu = event.data().to_vec();
        let meta = event.rx.unwrap_or_default();
        if check_header(&psdu) {
            if let Some(uart) = self.uart() {
                uart.proto_pkts = uart.proto_pkts.wrapping_add(1);
            }
        }
        self.send_host(HostResponse::NewPacket {
            psdu,
            rssi: meta.rssi,
            lqi: meta.lqi,
        });
        Ok(())
    }

    pub(crate) fn uart_lstart_rx_failed(&mut self, pkt: EventId) -> PttResult<()> {
        let error = self.events.ctx(pkt).first().copied().unwrap_or(0);
        self.send_host(HostResponse::RxFailed(error));
        Ok(())
    }

    fn uart_lend(&mut self, current: EventId) {
        let proto_pkts = self.cmd_ref().map(|ctx| ctx.uart.proto_pkts).unwrap_or(0);
        match self.rf.end_statistic(current) {
            Ok(stat) => self.send_host(HostResponse::LocalStats(RxReport {
                total_pkts: stat.total_pkts,
                proto_pkts,
                total_lqi: stat.total_lqi,
                total_rssi: stat.total_rssi,
            })),
            Err(e) => warn!("lend: statistics not ended: {}", e),
        }
        self.uart_unlock();
    }

    pub(crate) fn uart_lqi_packet(&mut self, pkt: EventId) -> PttResult<()> {
        let current = self.uart_current().ok_or(PttError::InvalidState)?;
        let lqi = self.events.get(pkt).and_then(|e| e.rx).unwrap_or_default().lqi;
        self.timer_remove(current);
        self.send_host(HostResponse::LqiDone(lqi));
        self.uart_unlock();
        Ok(())
    }

    fn uart_lqi_timeout(&mut self, evt: EventId) {
        if self.uart_current() != Some(evt) {
            return;
        }
        self.send_host(HostResponse::LqiFailed);
        self.uart_unlock();
    }

    // ------------------------------------------------------------------------
    // ltx
    // ------------------------------------------------------------------------

    /// The custom payload, or a fresh random one of random length if none is set
    fn custom_or_random_payload(&mut self) -> Vec<u8> {
        let custom = self.rf.custom_payload();
        if !custom.is_empty() {
            return custom.to_vec();
        }
        let max = self.config.custom_payload_max;
        let mut len = [0u8; 1];
        self.platform.random_fill(&mut len);
        let len = match len[0] as usize % (max + 1) {
            0 => max / 2,
            n => n,
        };
        let mut payload = vec![0u8; len];
        self.platform.random_fill(&mut payload);
        payload
    }

    fn uart_ltx_start(&mut self, evt: EventId, raw: &str) -> PttResult<()> {
        let defaults = LtxArgs {
            repeats: self.config.ltx_default_repeats,
            timeout_ms: self.config.ltx_default_timeout_ms,
        };
        let args = parse_ltx(raw, defaults)?;
        if args.timeout_ms > self.config.ltx_max_timeout_ms {
            return Err(PttError::InvalidValue);
        }
        let uart = self.uart().ok_or(PttError::InvalidMode)?;
        uart.ltx = LtxRun {
            repeats: args.repeats,
            timeout_ms: args.timeout_ms,
            ..LtxRun::default()
        };
        info!("ltx: {} frames every {}ms", args.repeats, args.timeout_ms);
        self.uart_lock(evt, UartStage::Ltx);
        self.uart_ltx_next()
    }

    /// Schedule the next frame or finish the run
    fn uart_ltx_next(&mut self) -> PttResult<()> {
        let current = self.uart_current().ok_or(PttError::InvalidState)?;
        let uart = self.uart().ok_or(PttError::InvalidMode)?;
        if uart.ltx.is_done() {
            debug!("ltx: {} sent, {} acked", uart.ltx.sent, uart.ltx.acks);
            self.uart_unlock();
            return Ok(());
        }
        uart.ltx.sent = uart.ltx.sent.wrapping_add(1);
        let timeout = uart.ltx.timeout_ms as u32;
        self.timer_add(timeout, Engine::uart_ltx_send, current)
    }

    fn uart_ltx_send(&mut self, evt: EventId) {
        if self.uart_current() != Some(evt) {
            return;
        }
        if let Err(e) = self.uart_ltx_transmit() {
            debug!("ltx aborted: {}", e);
            self.uart_unlock();
        }
    }

    fn uart_ltx_transmit(&mut self) -> PttResult<()> {
        let payload = self.custom_or_random_payload();
        let sender = self.events.alloc()?;
        self.events.set_state(sender, EventState::Uart(UartStage::Ltx));
        self.uart_set_stage(UartStage::LtxWaitingForAck);
        if let Err(e) = self.rf.send_packet(&mut *self.platform, sender, &payload) {
            self.events.free(sender);
            return Err(e);
        }
        trace!("ltx frame of {} bytes via {}", payload.len(), sender);
        Ok(())
    }

    pub(crate) fn uart_ltx_ack(&mut self, pkt: EventId) -> PttResult<()> {
        if self.events.data(pkt).is_empty() {
            return Ok(());
        }
        let uart = self.uart().ok_or(PttError::InvalidMode)?;
        let acks = uart.ltx.acks;
        uart.ltx.acks = acks.wrapping_add(1);
        self.send_host(HostResponse::LtxAck(acks));
        Ok(())
    }

    fn uart_ltx_frame_done(&mut self, sender: EventId, error: Option<u8>) -> PttResult<()> {
        self.events.free(sender);
        if let Some(error) = error {
            self.send_host(HostResponse::LtxFailed(error));
        }
        self.uart_set_stage(UartStage::Ltx);
        let result = self.uart_ltx_next();
        if result.is_err() {
            self.uart_unlock();
        }
        result
    }

    pub(crate) fn uart_ltx_finished(&mut self, sender: EventId) -> PttResult<()> {
        self.uart_ltx_frame_done(sender, None)
    }

    pub(crate) fn uart_ltx_failed(&mut self, sender: EventId) -> PttResult<()> {
        let error = self.events.ctx(sender).first().copied().unwrap_or(0);
        self.uart_ltx_frame_done(sender, Some(error))
    }

    // ------------------------------------------------------------------------
    // lcarrier / lstream
    // ------------------------------------------------------------------------

    fn uart_waveform_start(&mut self, evt: EventId, raw: &str, emission: Emission) -> PttResult<()> {
        let args = parse_waveform(raw)?;
        let limits = match emission {
            Emission::Carrier => &self.config.carrier,
            Emission::Stream => &self.config.stream,
        };
        let duration_ok = args.duration_ms == 0 || limits.duration_ms.contains(args.duration_ms);
        if !limits.pulse_ms.contains(args.pulse_ms)
            || !limits.interval_ms.contains(args.interval_ms)
            || !duration_ok
        {
            return Err(PttError::InvalidValue);
        }
        let to_ms = |v: i32| u32::try_from(v).map_err(|_| PttError::InvalidValue);
        let wave = Waveform {
            emission,
            pulse_ms: to_ms(args.pulse_ms)?,
            interval_ms: to_ms(args.interval_ms)?,
        };
        let duration = to_ms(args.duration_ms)?;

        self.uart().ok_or(PttError::InvalidMode)?.waveform = Some(wave);
        self.uart_lock(evt, UartStage::Pulse);
        if duration != 0 {
            self.timer_add(duration, Engine::uart_waveform_duration, evt)?;
        }
        self.timer_add(wave.pulse_ms, Engine::uart_waveform_pulse_end, evt)?;
        self.uart_emission_start(evt, emission)?;
        info!("{:?} started: {:?}, duration {}ms", emission, args, duration);
        Ok(())
    }

    fn uart_waveform(&self, evt: EventId) -> Option<Waveform> {
        if self.uart_current() != Some(evt) {
            return None;
        }
        self.cmd_ref()?.uart.waveform
    }

    fn uart_emission_start(&mut self, evt: EventId, emission: Emission) -> PttResult<()> {
        match emission {
            Emission::Carrier => self.rf.start_continuous_carrier(&mut *self.platform, evt),
            Emission::Stream => {
                let payload = self.custom_or_random_payload();
                self.rf
                    .start_modulated_stream(&mut *self.platform, evt, &payload)
            }
        }
    }

    fn uart_emission_stop(&mut self, evt: EventId, emission: Emission) -> PttResult<()> {
        match emission {
            Emission::Carrier => self.rf.stop_continuous_carrier(&mut *self.platform, evt),
            Emission::Stream => self.rf.stop_modulated_stream(&mut *self.platform, evt),
        }
    }

    /// Pulse over: go quiet for the interval
    fn uart_waveform_pulse_end(&mut self, evt: EventId) {
        let Some(wave) = self.uart_waveform(evt) else { return };
        let result = self
            .timer_add(wave.interval_ms, Engine::uart_waveform_interval_end, evt)
            .and_then(|_| self.uart_emission_stop(evt, wave.emission));
        match result {
            Ok(()) => self.uart_set_stage(UartStage::Interval),
            Err(e) => {
                debug!("{:?} aborted: {}", wave.emission, e);
                self.uart_unlock();
            }
        }
    }

    /// Interval over: emit for the next pulse
    fn uart_waveform_interval_end(&mut self, evt: EventId) {
        let Some(wave) = self.uart_waveform(evt) else { return };
        let result = self
            .timer_add(wave.pulse_ms, Engine::uart_waveform_pulse_end, evt)
            .and_then(|_| self.uart_emission_start(evt, wave.emission));
        match result {
            Ok(()) => self.uart_set_stage(UartStage::Pulse),
            Err(e) => {
                debug!("{:?} aborted: {}", wave.emission, e);
                self.uart_unlock();
            }
        }
    }

    fn uart_waveform_duration(&mut self, evt: EventId) {
        let Some(wave) = self.uart_waveform(evt) else { return };
        if self.rf.locked_by() == Some(evt) {
            if let Err(e) = self.uart_emission_stop(evt, wave.emission) {
                warn!("{:?} did not stop cleanly: {}", wave.emission, e);
            }
        }
        info!("{:?} finished", wave.emission);
        self.timer_remove(evt);
        self.uart_unlock();
    }
}
