//! RF arbitration
//!
//! Owns the radio configuration and a single-owner lock keyed by event
//! handle. Every asynchronous radio operation (send, CCA, ED, RSSI, carrier,
//! stream, statistics) takes the lock before touching the driver and keeps
//! it until the matching completion or stop; a second request fails fast
//! with [`PttError::Busy`] rather than queuing.
//!
//! The lock is released by [`RfContext::release`] on completion callbacks,
//! which hands the owning handle back so the engine can route the result.

use ptt_protocol::{htole16, CHANNEL_MAX, CHANNEL_MIN};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{PttError, PttResult};
use crate::event::EventId;
use crate::platform::RadioDriver;

/// Receive statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfStat {
    pub total_pkts: u32,
    pub total_lqi: u32,
    pub total_rssi: u32,
}

/// Lowest channel in 11..=26 whose bit is set in `mask`
pub fn channel_from_mask(mask: u32) -> Option<u8> {
    (CHANNEL_MIN..=CHANNEL_MAX).find(|ch| mask & (1 << ch) != 0)
}

/// Radio state and lock
#[derive(Debug)]
pub struct RfContext {
    locked_by: Option<EventId>,
    channel: u8,
    power: i8,
    tx_antenna: u8,
    rx_antenna: u8,
    cca_on_tx: bool,
    stat_enabled: bool,
    stat: RfStat,
    custom_payload: Vec<u8>,
    custom_payload_max: usize,
    default_channel: u8,
    default_power: i8,
}

impl RfContext {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            locked_by: None,
            channel: config.default_channel,
            power: config.default_power,
            tx_antenna: 0,
            rx_antenna: 0,
            cca_on_tx: false,
            stat_enabled: false,
            stat: RfStat::default(),
            custom_payload: Vec::with_capacity(config.custom_payload_max),
            custom_payload_max: config.custom_payload_max,
            default_channel: config.default_channel,
            default_power: config.default_power,
        }
    }

    /// Back to power-on state
    pub fn reset(&mut self) {
        self.locked_by = None;
        self.channel = self.default_channel;
        self.power = self.default_power;
        self.tx_antenna = 0;
        self.rx_antenna = 0;
        self.cca_on_tx = false;
        self.stat_enabled = false;
        self.stat = RfStat::default();
        self.custom_payload.clear();
    }

    // ------------------------------------------------------------------------
    // Lock
    // ------------------------------------------------------------------------

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }

    pub fn locked_by(&self) -> Option<EventId> {
        self.locked_by
    }

    pub fn try_lock(&mut self, evt: EventId) -> PttResult<()> {
        if let Some(owner) = self.locked_by {
            debug!("rf lock for {} refused, held by {}", evt, owner);
            return Err(PttError::Busy);
        }
        self.locked_by = Some(evt);
        Ok(())
    }

    /// Release the lock; only the owner may
    pub fn unlock(&mut self, evt: EventId) -> PttResult<()> {
        if self.locked_by != Some(evt) {
            return Err(PttError::Busy);
        }
        self.locked_by = None;
        Ok(())
    }

    /// Completion path: release the lock and return its owner
    pub fn release(&mut self) -> Option<EventId> {
        let owner = self.locked_by.take();
        if owner.is_none() {
            warn!("rf completion while unlocked, ignored");
        }
        owner
    }

    fn start(&mut self, evt: EventId, started: impl FnOnce() -> bool) -> PttResult<()> {
        self.try_lock(evt)?;
        if started() {
            Ok(())
        } else {
            self.locked_by = None;
            Err(PttError::Busy)
        }
    }

    fn stop(&mut self, evt: EventId, stopped: impl FnOnce() -> bool) -> PttResult<()> {
        if self.locked_by != Some(evt) {
            return Err(PttError::Busy);
        }
        self.locked_by = None;
        if stopped() {
            Ok(())
        } else {
            Err(PttError::InvalidState)
        }
    }

    // ------------------------------------------------------------------------
    // Asynchronous operations
    // ------------------------------------------------------------------------

    pub fn send_packet<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
        psdu: &[u8],
    ) -> PttResult<()> {
        if psdu.is_empty() {
            return Err(PttError::InvalidValue);
        }
        let cca = self.cca_on_tx;
        self.start(evt, || radio.transmit(psdu, cca))
    }

    pub fn cca<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
        mode: u8,
    ) -> PttResult<()> {
        self.start(evt, || radio.cca(mode))
    }

    pub fn ed<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
        time_us: u32,
    ) -> PttResult<()> {
        self.start(evt, || radio.energy_detection(time_us))
    }

    pub fn rssi_measure_begin<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
    ) -> PttResult<()> {
        self.start(evt, || radio.rssi_measure_begin())
    }

    /// Read the measurement started by [`rssi_measure_begin`](Self::rssi_measure_begin) and release the lock
    pub fn rssi_last_get<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
    ) -> PttResult<Option<i8>> {
        if self.locked_by != Some(evt) {
            return Err(PttError::Busy);
        }
        self.locked_by = None;
        Ok(radio.rssi_last_get())
    }

    pub fn start_continuous_carrier<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
    ) -> PttResult<()> {
        self.start(evt, || radio.continuous_carrier())
    }

    pub fn stop_continuous_carrier<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
    ) -> PttResult<()> {
        self.stop(evt, || radio.receive())
    }

    pub fn start_modulated_stream<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
        payload: &[u8],
    ) -> PttResult<()> {
        self.start(evt, || radio.modulated_stream(payload))
    }

    pub fn stop_modulated_stream<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        evt: EventId,
    ) -> PttResult<()> {
        self.stop(evt, || radio.receive())
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    /// Lock the radio for `evt` and start counting received packets from zero
    pub fn start_statistic(&mut self, evt: EventId) -> PttResult<()> {
        self.try_lock(evt)?;
        self.stat = RfStat::default();
        self.stat_enabled = true;
        Ok(())
    }

    /// Stop counting, release the lock and return the totals
    pub fn end_statistic(&mut self, evt: EventId) -> PttResult<RfStat> {
        self.unlock(evt)?;
        self.stat_enabled = false;
        Ok(self.stat)
    }

    pub fn stat_inc(&mut self, lqi: u8, rssi: i8) {
        if !self.stat_enabled {
            return;
        }
        self.stat.total_pkts = self.stat.total_pkts.wrapping_add(1);
        self.stat.total_lqi = self.stat.total_lqi.wrapping_add(lqi as u32);
        let magnitude = if rssi <= 0 { rssi.unsigned_abs() } else { 0 };
        self.stat.total_rssi = self.stat.total_rssi.wrapping_add(magnitude as u32);
    }

    pub fn stat(&self) -> RfStat {
        self.stat
    }

    pub fn clear_stat(&mut self) {
        self.stat = RfStat::default();
    }

    pub fn is_stat_enabled(&self) -> bool {
        self.stat_enabled
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        channel: u8,
    ) -> PttResult<()> {
        if !(CHANNEL_MIN..=CHANNEL_MAX).contains(&channel) {
            return Err(PttError::InvalidValue);
        }
        if !radio.set_channel(channel) {
            return Err(PttError::Busy);
        }
        debug!("rf channel {}", channel);
        self.channel = channel;
        Ok(())
    }

    /// Set the channel from a bitmask; the lowest set channel wins
    pub fn set_channel_mask<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        mask: u32,
    ) -> PttResult<u8> {
        let channel = channel_from_mask(mask).ok_or(PttError::InvalidValue)?;
        self.set_channel(radio, channel)?;
        Ok(channel)
    }

    pub fn power(&self) -> i8 {
        self.power
    }

    pub fn set_power<R: RadioDriver + ?Sized>(&mut self, radio: &mut R, dbm: i8) -> PttResult<()> {
        if !radio.set_power(dbm) {
            return Err(PttError::InvalidValue);
        }
        self.power = dbm;
        Ok(())
    }

    /// Set both TX and RX antenna
    pub fn set_antenna<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        antenna: u8,
    ) -> PttResult<()> {
        self.set_tx_antenna(radio, antenna)?;
        self.set_rx_antenna(radio, antenna)
    }

    pub fn set_tx_antenna<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        antenna: u8,
    ) -> PttResult<()> {
        if !radio.set_tx_antenna(antenna) {
            return Err(PttError::InvalidValue);
        }
        self.tx_antenna = antenna;
        Ok(())
    }

    pub fn set_rx_antenna<R: RadioDriver + ?Sized>(
        &mut self,
        radio: &mut R,
        antenna: u8,
    ) -> PttResult<()> {
        if !radio.set_rx_antenna(antenna) {
            return Err(PttError::InvalidValue);
        }
        self.rx_antenna = antenna;
        Ok(())
    }

    pub fn tx_antenna(&self) -> u8 {
        self.tx_antenna
    }

    pub fn rx_antenna(&self) -> u8 {
        self.rx_antenna
    }

    pub fn last_best_rx_antenna<R: RadioDriver + ?Sized>(&self, radio: &mut R) -> u8 {
        radio.last_best_rx_antenna()
    }

    pub fn cca_on_tx(&self) -> bool {
        self.cca_on_tx
    }

    pub fn set_cca_on_tx(&mut self, enable: bool) {
        self.cca_on_tx = enable;
    }

    pub fn set_pan_id<R: RadioDriver + ?Sized>(&mut self, radio: &mut R, pan_id: u16) {
        radio.set_pan_id(htole16(pan_id));
    }

    pub fn set_short_address<R: RadioDriver + ?Sized>(&mut self, radio: &mut R, addr: u16) {
        radio.set_short_address(htole16(addr));
    }

    pub fn set_extended_address<R: RadioDriver + ?Sized>(&mut self, radio: &mut R, addr: [u8; 8]) {
        radio.set_extended_address(addr);
    }

    pub fn receive<R: RadioDriver + ?Sized>(&mut self, radio: &mut R) -> PttResult<()> {
        radio.receive().then_some(()).ok_or(PttError::InvalidState)
    }

    pub fn sleep<R: RadioDriver + ?Sized>(&mut self, radio: &mut R) -> PttResult<()> {
        radio.sleep().then_some(()).ok_or(PttError::InvalidState)
    }

    pub fn custom_payload(&self) -> &[u8] {
        &self.custom_payload
    }

    pub fn set_custom_payload(&mut self, payload: &[u8]) -> PttResult<()> {
        if payload.len() > self.custom_payload_max {
            return Err(PttError::InvalidValue);
        }
        self.custom_payload.clear();
        self.custom_payload.extend_from_slice(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Driver that accepts everything unless told otherwise
    #[derive(Default)]
    struct StubRadio {
        refuse: bool,
        channel: u8,
        sent: Vec<Vec<u8>>,
        pan_id: [u8; 2],
    }

    impl RadioDriver for StubRadio {
        fn set_channel(&mut self, channel: u8) -> bool {
            self.channel = channel;
            !self.refuse
        }
        fn set_power(&mut self, _dbm: i8) -> bool {
            !self.refuse
        }
        fn set_tx_antenna(&mut self, _antenna: u8) -> bool {
            true
        }
        fn set_rx_antenna(&mut self, _antenna: u8) -> bool {
            true
        }
        fn last_best_rx_antenna(&mut self) -> u8 {
            0
        }
        fn set_pan_id(&mut self, pan_id: [u8; 2]) {
            self.pan_id = pan_id;
        }
        fn set_short_address(&mut self, _addr: [u8; 2]) {}
        fn set_extended_address(&mut self, _addr: [u8; 8]) {}
        fn transmit(&mut self, psdu: &[u8], _cca: bool) -> bool {
            self.sent.push(psdu.to_vec());
            !self.refuse
        }
        fn receive(&mut self) -> bool {
            true
        }
        fn sleep(&mut self) -> bool {
            true
        }
        fn cca(&mut self, _mode: u8) -> bool {
            !self.refuse
        }
        fn energy_detection(&mut self, _time_us: u32) -> bool {
            !self.refuse
        }
        fn rssi_measure_begin(&mut self) -> bool {
            true
        }
        fn rssi_last_get(&mut self) -> Option<i8> {
            Some(-60)
        }
        fn continuous_carrier(&mut self) -> bool {
            true
        }
        fn modulated_stream(&mut self, _payload: &[u8]) -> bool {
            true
        }
    }

    fn rf() -> RfContext {
        RfContext::new(&EngineConfig::default())
    }

    #[test]
    fn channel_mask_lowest_bit_wins() {
        let mut radio = StubRadio::default();
        let mut rf = rf();
        assert_eq!(rf.set_channel_mask(&mut radio, 0x0000_0800), Ok(11));
        assert_eq!(rf.set_channel_mask(&mut radio, 0x0000_1800), Ok(11));
        assert_eq!(rf.set_channel_mask(&mut radio, 0x0400_0000), Ok(26));
        assert_eq!(rf.channel(), 26);
        assert_eq!(
            rf.set_channel_mask(&mut radio, 0x0000_0400),
            Err(PttError::InvalidValue)
        );
        assert_eq!(
            rf.set_channel_mask(&mut radio, 0x0800_0000),
            Err(PttError::InvalidValue)
        );
    }

    #[test]
    fn channel_range_checked() {
        let mut radio = StubRadio::default();
        let mut rf = rf();
        assert_eq!(rf.set_channel(&mut radio, 10), Err(PttError::InvalidValue));
        assert_eq!(rf.set_channel(&mut radio, 27), Err(PttError::InvalidValue));
        assert!(rf.set_channel(&mut radio, 15).is_ok());
        assert_eq!(radio.channel, 15);
    }

    #[test]
    fn second_send_is_busy() {
        let mut radio = StubRadio::default();
        let mut rf = rf();
        rf.send_packet(&mut radio, EventId(1), &[1]).unwrap();
        assert_eq!(
            rf.send_packet(&mut radio, EventId(2), &[2]),
            Err(PttError::Busy)
        );
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(rf.release(), Some(EventId(1)));
        assert_eq!(rf.release(), None);
    }

    #[test]
    fn failed_start_releases_lock() {
        let mut radio = StubRadio {
            refuse: true,
            ..Default::default()
        };
        let mut rf = rf();
        assert_eq!(rf.cca(&mut radio, EventId(1), 0), Err(PttError::Busy));
        assert!(!rf.is_locked());
    }

    #[test]
    fn stop_requires_owner() {
        let mut radio = StubRadio::default();
        let mut rf = rf();
        rf.start_continuous_carrier(&mut radio, EventId(3)).unwrap();
        assert_eq!(
            rf.stop_continuous_carrier(&mut radio, EventId(4)),
            Err(PttError::Busy)
        );
        assert!(rf.stop_continuous_carrier(&mut radio, EventId(3)).is_ok());
        assert!(!rf.is_locked());
    }

    #[test]
    fn statistics_are_gated() {
        let mut rf = rf();
        rf.stat_inc(100, -40);
        assert_eq!(rf.stat(), RfStat::default());

        rf.start_statistic(EventId(0)).unwrap();
        rf.stat_inc(100, -40);
        rf.stat_inc(50, 5);
        assert_eq!(rf.end_statistic(EventId(1)), Err(PttError::Busy));
        let stat = rf.end_statistic(EventId(0)).unwrap();
        assert_eq!(
            stat,
            RfStat {
                total_pkts: 2,
                total_lqi: 150,
                total_rssi: 40,
            }
        );
        rf.stat_inc(1, -1);
        assert_eq!(rf.stat().total_pkts, 2);
    }

    #[test]
    fn rssi_readout_releases_lock() {
        let mut radio = StubRadio::default();
        let mut rf = rf();
        rf.rssi_measure_begin(&mut radio, EventId(2)).unwrap();
        assert_eq!(rf.rssi_last_get(&mut radio, EventId(5)), Err(PttError::Busy));
        assert_eq!(rf.rssi_last_get(&mut radio, EventId(2)), Ok(Some(-60)));
        assert!(!rf.is_locked());
    }

    #[test]
    fn pan_id_is_little_endian() {
        let mut radio = StubRadio::default();
        let mut rf = rf();
        rf.set_pan_id(&mut radio, 0xABCD);
        assert_eq!(radio.pan_id, [0xCD, 0xAB]);
    }

    #[test]
    fn custom_payload_capacity() {
        let mut rf = rf();
        assert!(rf.set_custom_payload(&[0; 125]).is_ok());
        assert_eq!(rf.set_custom_payload(&[0; 126]), Err(PttError::InvalidValue));
    }
}
