//! Integration tests for the PHY test tool engine
//!
//! These tests drive a single engine through its public inbound API against
//! a recording platform and a manual clock:
//! - Host commands in CMD mode, local and remote
//! - DUT responses to over-the-air commands
//! - Mode switching
//! - Pool, timer and lock invariants under random input

use ptt_engine::{DeviceMode, Engine, EngineConfig, PttError};
use ptt_protocol::{build_frame, RxReport, WireCommand};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use ptt_engine::{Board, Clock, DeviceMode, Engine, EngineConfig, HostLink, RadioDriver};

    /// Everything the engine did to the outside world
    #[derive(Debug, Default)]
    pub struct Record {
        pub host: Vec<String>,
        pub prompts: usize,
        pub sent: Vec<Vec<u8>>,
        pub channel: u8,
        pub power: i8,
        pub pan_id: [u8; 2],
        pub extended: [u8; 8],
        pub cca_requests: Vec<u8>,
        pub ed_requests: Vec<u32>,
        pub carrier_starts: usize,
        pub streams: Vec<Vec<u8>>,
        pub emitting: bool,
        pub clk: Vec<(u8, bool)>,
        pub gpio: HashMap<u8, u8>,
        pub led: bool,
        pub resets: usize,
    }

    pub struct FakePlatform {
        record: Arc<Mutex<Record>>,
        clock: Arc<AtomicU32>,
    }

    impl FakePlatform {
        fn record(&self) -> std::sync::MutexGuard<'_, Record> {
            self.record.lock().unwrap()
        }
    }

    impl RadioDriver for FakePlatform {
        fn set_channel(&mut self, channel: u8) -> bool {
            self.record().channel = channel;
            true
        }
        fn set_power(&mut self, dbm: i8) -> bool {
            self.record().power = dbm;
            true
        }
        fn set_tx_antenna(&mut self, _antenna: u8) -> bool {
            true
        }
        fn set_rx_antenna(&mut self, _antenna: u8) -> bool {
            true
        }
        fn last_best_rx_antenna(&mut self) -> u8 {
            1
        }
        fn set_pan_id(&mut self, pan_id: [u8; 2]) {
            self.record().pan_id = pan_id;
        }
        fn set_short_address(&mut self, _addr: [u8; 2]) {}
        fn set_extended_address(&mut self, addr: [u8; 8]) {
            self.record().extended = addr;
        }
        fn transmit(&mut self, psdu: &[u8], _cca: bool) -> bool {
            self.record().sent.push(psdu.to_vec());
            true
        }
        fn receive(&mut self) -> bool {
            self.record().emitting = false;
            true
        }
        fn sleep(&mut self) -> bool {
            true
        }
        fn cca(&mut self, mode: u8) -> bool {
            self.record().cca_requests.push(mode);
            true
        }
        fn energy_detection(&mut self, time_us: u32) -> bool {
            self.record().ed_requests.push(time_us);
            true
        }
        fn rssi_measure_begin(&mut self) -> bool {
            true
        }
        fn rssi_last_get(&mut self) -> Option<i8> {
            Some(-72)
        }
        fn continuous_carrier(&mut self) -> bool {
            let mut record = self.record();
            record.carrier_starts += 1;
            record.emitting = true;
            true
        }
        fn modulated_stream(&mut self, payload: &[u8]) -> bool {
            let mut record = self.record();
            record.streams.push(payload.to_vec());
            record.emitting = true;
            true
        }
    }

    impl Board for FakePlatform {
        fn reset(&mut self) {
            self.record().resets += 1;
        }
        fn set_gpio(&mut self, pin: u8, value: u8) -> bool {
            self.record().gpio.insert(pin, value);
            true
        }
        fn get_gpio(&mut self, pin: u8) -> Option<u8> {
            self.record().gpio.get(&pin).copied()
        }
        fn clk_out(&mut self, pin: u8, enable: bool) -> bool {
            self.record().clk.push((pin, enable));
            true
        }
        fn set_dcdc(&mut self, _enable: bool) {}
        fn dcdc(&mut self) -> bool {
            true
        }
        fn set_icache(&mut self, _enable: bool) {}
        fn icache(&mut self) -> bool {
            false
        }
        fn temperature(&mut self) -> Option<i32> {
            Some(31)
        }
        fn led_on(&mut self) {
            self.record().led = true;
        }
        fn led_off(&mut self) {
            self.record().led = false;
        }
        fn random_fill(&mut self, buf: &mut [u8]) {
            buf.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        }
    }

    impl HostLink for FakePlatform {
        fn send(&mut self, bytes: &[u8], _add_terminator: bool) {
            let line = String::from_utf8_lossy(bytes).into_owned();
            self.record().host.push(line);
        }
        fn prompt(&mut self) {
            self.record().prompts += 1;
        }
    }

    impl Clock for FakePlatform {
        fn now_ms(&self) -> u32 {
            self.clock.load(Ordering::SeqCst)
        }
        fn arm(&mut self, _timeout_ms: u32) {}
    }

    /// Engine plus handles on its recording and clock
    pub struct Harness {
        pub engine: Engine,
        pub record: Arc<Mutex<Record>>,
        clock: Arc<AtomicU32>,
    }

    impl Harness {
        pub fn new(config: EngineConfig, mode: DeviceMode) -> Self {
            let record = Arc::new(Mutex::new(Record::default()));
            let clock = Arc::new(AtomicU32::new(0));
            let platform = FakePlatform {
                record: record.clone(),
                clock: clock.clone(),
            };
            let mut engine = Engine::new(config, Box::new(platform));
            engine.switch_mode(mode).unwrap();
            let harness = Self {
                engine,
                record,
                clock,
            };
            harness.clear();
            harness
        }

        pub fn cmd() -> Self {
            Self::new(EngineConfig::default(), DeviceMode::Cmd)
        }

        pub fn dut() -> Self {
            Self::new(EngineConfig::default(), DeviceMode::Dut)
        }

        pub fn record(&self) -> std::sync::MutexGuard<'_, Record> {
            self.record.lock().unwrap()
        }

        pub fn clear(&self) {
            let mut record = self.record();
            record.host.clear();
            record.sent.clear();
            record.prompts = 0;
        }

        pub fn host(&self) -> Vec<String> {
            self.record().host.clone()
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.record().sent.clone()
        }

        pub fn line(&mut self, line: &str) -> Result<(), ptt_engine::PttError> {
            self.engine.push_host_line(line.as_bytes())
        }

        /// Move the clock forward in 1 ms steps, running timers on the way
        pub fn advance(&mut self, ms: u32) {
            for _ in 0..ms {
                let now = self.clock.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
                self.engine.process(now);
            }
        }

        /// Run timers due right now
        pub fn tick(&mut self) {
            let now = self.clock.load(Ordering::SeqCst);
            self.engine.process(now);
        }

        pub fn is_idle(&self) -> bool {
            self.engine.events().in_use() == 0
                && self.engine.timers().active() == 0
                && self.engine.rf().locked_by().is_none()
        }
    }
}

use helpers::Harness;

// ============================================================================
// Remote Command Tests
// ============================================================================

mod remote_command_tests {
    use super::*;

    #[test]
    fn test_rping_without_dut_reports_no_ack() {
        let mut h = Harness::cmd();
        h.line("custom rping").unwrap();
        assert_eq!(h.sent(), vec![build_frame(WireCommand::Ping, &[])]);

        h.engine.rf_tx_finished();
        h.advance(499);
        assert!(h.host().is_empty());
        assert_eq!(h.record().prompts, 0);

        h.advance(1);
        assert_eq!(h.host(), vec!["NO ACK"]);
        assert_eq!(h.record().prompts, 1);
        assert!(h.is_idle());
    }

    #[test]
    fn test_rping_answered_reports_ack() {
        let mut h = Harness::cmd();
        h.line("custom rping").unwrap();
        h.engine.rf_tx_finished();
        h.advance(20);

        h.engine
            .push_rf_packet(&build_frame(WireCommand::Ack, &[]), -40, 220)
            .unwrap();
        assert_eq!(h.host(), vec!["ACK"]);
        assert!(h.is_idle());

        // the cancelled timer must not produce a second answer
        h.advance(1_000);
        assert_eq!(h.host(), vec!["ACK"]);
    }

    #[test]
    fn test_response_must_match_length_and_code() {
        let mut h = Harness::cmd();
        h.line("custom rgetpower").unwrap();
        h.engine.rf_tx_finished();

        // wrong code, then right code with a trailing byte
        h.engine
            .push_rf_packet(&build_frame(WireCommand::Ack, &[]), -40, 220)
            .unwrap();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::GetPowerResponse, &[4, 0]), -40, 220)
            .unwrap();
        assert!(h.host().is_empty());

        h.engine
            .push_rf_packet(&build_frame(WireCommand::GetPowerResponse, &[0xFC]), -40, 220)
            .unwrap();
        assert_eq!(h.host(), vec!["power: -4 dBm"]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_fire_and_forget_unlocks_on_tx_finished() {
        let mut h = Harness::cmd();
        h.line("custom rsetchannel 15").unwrap();
        assert_eq!(
            h.sent(),
            vec![build_frame(WireCommand::SetChannel, &0x0000_8000u32.to_be_bytes())]
        );
        h.engine.rf_tx_finished();
        assert!(h.host().is_empty());
        assert_eq!(h.record().prompts, 1);
        assert!(h.is_idle());
    }

    #[test]
    fn test_rsetchannel_out_of_range_sends_nothing() {
        let mut h = Harness::cmd();
        assert_eq!(h.line("custom rsetchannel 27"), Err(PttError::InvalidValue));
        assert!(h.sent().is_empty());
        assert_eq!(h.record().prompts, 1);
        assert!(h.is_idle());
    }

    #[test]
    fn test_setchannel_rejects_multi_bit_mask() {
        let mut h = Harness::cmd();
        assert_eq!(
            h.line("custom setchannel 0x00001800"),
            Err(PttError::InvalidValue)
        );
        assert!(h.sent().is_empty());
        assert!(h.is_idle());
    }

    #[test]
    fn test_setchannel_moves_both_ends_then_pings() {
        let mut h = Harness::cmd();
        h.line("custom setchannel 0x00100000").unwrap();
        h.engine.rf_tx_finished();
        assert_eq!(h.engine.rf().channel(), 20);

        // settle time, then the ping goes out on the new channel
        h.advance(500);
        assert_eq!(
            h.sent(),
            vec![
                build_frame(WireCommand::SetChannel, &0x0010_0000u32.to_be_bytes()),
                build_frame(WireCommand::Ping, &[]),
            ]
        );
        h.engine.rf_tx_finished();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::Ack, &[]), -30, 255)
            .unwrap();
        assert_eq!(h.host(), vec!["ACK"]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_rend_reports_dut_statistics() {
        let mut h = Harness::cmd();
        h.line("custom rend").unwrap();
        h.engine.rf_tx_finished();
        let report = RxReport {
            total_pkts: 10,
            proto_pkts: 9,
            total_lqi: 2_000,
            total_rssi: 500,
        };
        h.engine
            .push_rf_packet(&build_frame(WireCommand::Report, &report.to_payload()), -40, 200)
            .unwrap();
        assert_eq!(
            h.host(),
            vec!["packets: 10 protocol packets: 9 lqi: 2000 rssi: 500"]
        );
    }

    #[test]
    fn test_lpingtimeout_changes_response_wait() {
        let mut h = Harness::cmd();
        h.line("custom lpingtimeout 100").unwrap();
        assert_eq!(h.engine.cmd_context().unwrap().rsp_timeout_ms(), 100);

        h.line("custom rhardware").unwrap();
        h.engine.rf_tx_finished();
        h.advance(100);
        assert_eq!(h.host(), vec!["hardware version: no response"]);
    }
}

// ============================================================================
// Lock Tests
// ============================================================================

mod lock_tests {
    use super::*;

    #[test]
    fn test_second_command_is_busy() {
        let mut h = Harness::cmd();
        h.line("custom rping").unwrap();
        assert_eq!(h.line("custom lgetchannel"), Err(PttError::Busy));
        assert_eq!(h.host(), vec!["BUSY"]);

        // the first command still completes normally
        h.engine.rf_tx_finished();
        h.advance(500);
        assert_eq!(h.host(), vec!["BUSY", "NO ACK"]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_unknown_command_is_reprompted() {
        let mut h = Harness::cmd();
        assert!(h.line("custom frobnicate").is_err());
        assert!(h.line("hello").is_err());
        assert_eq!(h.record().prompts, 2);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_stop_commands_without_run_are_rejected() {
        let mut h = Harness::cmd();
        assert_eq!(h.line("custom lend"), Err(PttError::InvalidState));
        assert_eq!(h.line("custom ltxend"), Err(PttError::InvalidState));
        assert!(h.is_idle());
    }

    #[test]
    fn test_tx_completion_while_unlocked_is_dropped() {
        let mut h = Harness::cmd();
        h.engine.rf_tx_finished();
        h.engine.rf_cca_done(true);
        assert!(h.host().is_empty());
        assert!(h.is_idle());
    }
}

// ============================================================================
// Local Command Tests
// ============================================================================

mod local_command_tests {
    use super::*;

    #[test]
    fn test_lsetpayload_then_ltx_sends_custom_frame() {
        let mut h = Harness::cmd();
        h.line("custom lsetpayload 3 0x010203").unwrap();
        h.line("custom ltx").unwrap();
        h.tick();
        assert_eq!(h.sent(), vec![vec![1, 2, 3]]);

        h.engine.rf_tx_finished();
        assert!(h.is_idle());
    }

    #[test]
    fn test_ltx_repeats_with_delay() {
        let mut h = Harness::cmd();
        h.line("custom lsetpayload 2 0xAABB").unwrap();
        h.line("custom ltx 3 10").unwrap();
        for _ in 0..3 {
            h.advance(10);
            h.engine.rf_tx_finished();
        }
        assert_eq!(h.sent().len(), 3);
        assert!(h.is_idle());
    }

    #[test]
    fn test_ltx_reports_acks_and_failures() {
        let mut h = Harness::cmd();
        h.line("custom lsetpayload 1 0x55").unwrap();
        h.line("custom ltx 2 0").unwrap();
        h.tick();
        h.engine.push_rf_packet(&[0x02, 0x00, 0x01], -20, 255).unwrap();
        h.engine.rf_tx_finished();
        h.tick();
        h.engine.rf_tx_failed(3);
        assert_eq!(h.host(), vec!["ack: 0", "tx: failed 3"]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_infinite_ltx_stops_on_ltxend() {
        let mut h = Harness::cmd();
        h.line("custom lsetpayload 1 0x55").unwrap();
        h.line("custom ltx 0 5").unwrap();
        for _ in 0..4 {
            h.advance(5);
            h.engine.rf_tx_finished();
        }
        h.line("custom ltxend").unwrap();
        h.advance(5);
        h.engine.rf_tx_finished();
        assert_eq!(h.sent().len(), 5);
        assert!(h.is_idle());
    }

    #[test]
    fn test_ltx_random_payload_when_none_set() {
        let mut h = Harness::cmd();
        h.line("custom ltx").unwrap();
        h.tick();
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].is_empty());
        assert!(sent[0].len() <= 125);
    }

    #[test]
    fn test_ltx_timeout_above_maximum_rejected() {
        let mut h = Harness::cmd();
        assert_eq!(h.line("custom ltx 1 30001"), Err(PttError::InvalidValue));
        assert!(h.is_idle());
    }

    #[test]
    fn test_lsetpayload_length_must_match() {
        let mut h = Harness::cmd();
        assert_eq!(
            h.line("custom lsetpayload 4 0x010203"),
            Err(PttError::InvalidValue)
        );
        assert!(h.engine.rf().custom_payload().is_empty());
    }

    #[test]
    fn test_channel_and_power_round_trip() {
        let mut h = Harness::cmd();
        h.line("custom lsetchannel 0x04000000").unwrap();
        h.line("custom lgetchannel").unwrap();
        h.line("custom lsetpower 0 0 -8").unwrap();
        h.line("custom lgetpower").unwrap();
        assert_eq!(h.host(), vec!["channel: 26", "power: -8 dBm"]);
        assert_eq!(h.record().channel, 26);
        assert_eq!(h.record().power, -8);
    }

    #[test]
    fn test_addresses_are_little_endian() {
        let mut h = Harness::cmd();
        h.line("custom lsetpanid 0xABCD").unwrap();
        h.line("custom lsetextended 0x0102030405060708").unwrap();
        assert_eq!(h.record().pan_id, [0xCD, 0xAB]);
        assert_eq!(h.record().extended, [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(h.line("custom lsetpanid 0xABC"), Err(PttError::InvalidValue));
    }

    #[test]
    fn test_cca_and_ed_results() {
        let mut h = Harness::cmd();
        h.line("custom lgetcca 2").unwrap();
        assert_eq!(h.record().cca_requests, vec![2]);
        h.engine.rf_cca_done(true);

        h.line("custom lgeted").unwrap();
        assert_eq!(h.record().ed_requests, vec![128]);
        h.engine.rf_ed_done(42);

        h.line("custom lgetcca 1").unwrap();
        h.engine.rf_cca_failed(1);

        assert_eq!(h.host(), vec!["cca: 1", "ed: 42", "cca: failed"]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_lgetrssi_reads_after_measurement_time() {
        let mut h = Harness::cmd();
        h.line("custom lgetrssi").unwrap();
        assert!(h.engine.rf().is_locked());
        h.advance(1);
        assert_eq!(h.host(), vec!["rssi: -72"]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_statistics_count_frames_dropped_for_lack_of_events() {
        let config = EngineConfig {
            event_pool_size: 1,
            ..EngineConfig::default()
        };
        let mut h = Harness::new(config, DeviceMode::Cmd);
        h.line("custom lstart").unwrap();
        assert_eq!(h.engine.events().in_use(), 1);

        assert_eq!(
            h.engine.push_rf_packet(&[0xDE, 0xAD], -40, 100),
            Err(PttError::NoFreeSlot)
        );
        let stat = h.engine.rf().stat();
        assert_eq!(stat.total_pkts, 1);
        assert_eq!(stat.total_lqi, 100);
        assert_eq!(stat.total_rssi, 40);
    }

    #[test]
    fn test_lstart_reports_packets_until_lend() {
        let mut h = Harness::cmd();
        h.line("custom lstart").unwrap();
        h.engine.push_rf_packet(&[0xDE, 0xAD], -40, 100).unwrap();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::Ping, &[]), -60, 200)
            .unwrap();
        h.engine.rf_rx_failed(7).unwrap();
        h.line("custom lend").unwrap();

        assert_eq!(
            h.host(),
            vec![
                "rx: rssi -40 lqi 100 len 2 data DEAD",
                "rx: rssi -60 lqi 200 len 4 data DEDE0000",
                "rx: failed 7",
                "packets: 2 protocol packets: 1 lqi: 300 rssi: 100",
            ]
        );
        assert!(h.is_idle());
    }

    #[test]
    fn test_lgetlqi_takes_next_packet_or_times_out() {
        let mut h = Harness::cmd();
        h.line("custom lgetlqi").unwrap();
        h.engine.push_rf_packet(&[1, 2, 3], -50, 180).unwrap();
        assert_eq!(h.host(), vec!["lqi: 180"]);
        assert!(h.is_idle());

        h.line("custom lgetlqi").unwrap();
        h.advance(1_000);
        assert_eq!(h.host(), vec!["lqi: 180", "lqi: failed"]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_lclk_runs_until_stopped_on_same_pin() {
        let mut h = Harness::cmd();
        assert_eq!(h.line("custom lclk 4 0"), Err(PttError::InvalidValue));
        h.line("custom lclk 4 1").unwrap();
        assert_eq!(h.line("custom lclk 5 0"), Err(PttError::Busy));
        h.line("custom lclk 4 0").unwrap();
        assert_eq!(h.record().clk, vec![(4, true), (4, false)]);
        assert!(h.is_idle());
    }

    #[test]
    fn test_lcarrier_pulses_until_duration() {
        let mut h = Harness::cmd();
        h.line("custom lcarrier 10 20 100").unwrap();
        assert!(h.record().emitting);

        h.advance(10);
        assert!(!h.record().emitting);
        h.advance(20);
        assert!(h.record().emitting);

        h.advance(70);
        assert!(!h.record().emitting);
        assert_eq!(h.record().carrier_starts, 4);
        assert!(h.is_idle());
    }

    #[test]
    fn test_lstream_rejects_out_of_range_timing() {
        let mut h = Harness::cmd();
        assert_eq!(
            h.line("custom lstream 5 20 100"),
            Err(PttError::InvalidValue)
        );
        assert!(h.record().streams.is_empty());
        assert!(h.is_idle());
    }

    #[test]
    fn test_board_commands() {
        let mut h = Harness::cmd();
        h.line("custom lsetgpio 3 1").unwrap();
        h.line("custom lgetgpio 3").unwrap();
        h.line("custom lgetgpio 9").unwrap();
        h.line("custom lgetdcdc").unwrap();
        h.line("custom lgettemp").unwrap();
        h.line("custom lreboot").unwrap();
        assert_eq!(h.line("custom lsetgpio 3 2"), Err(PttError::InvalidValue));

        assert_eq!(
            h.host(),
            vec!["gpio: 1", "gpio: error", "dcdc: 1", "temperature: 31"]
        );
        assert_eq!(h.record().resets, 1);
    }

    #[test]
    fn test_indication_blinks_on_rx() {
        let mut h = Harness::cmd();
        h.line("custom lindication 1").unwrap();
        h.engine.push_rf_packet(&[1], -50, 100).unwrap();
        assert!(h.record().led);
        h.advance(50);
        assert!(!h.record().led);

        h.line("custom lindication 0").unwrap();
        h.engine.push_rf_packet(&[1], -50, 100).unwrap();
        assert!(!h.record().led);
        assert!(h.is_idle());
    }
}

// ============================================================================
// DUT Tests
// ============================================================================

mod dut_tests {
    use super::*;

    #[test]
    fn test_ping_is_acked() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::Ping, &[]), -40, 200)
            .unwrap();
        assert_eq!(h.sent(), vec![build_frame(WireCommand::Ack, &[])]);
        h.engine.rf_tx_finished();
        assert!(h.is_idle());
    }

    #[test]
    fn test_commands_dropped_while_replying() {
        let mut h = Harness::dut();
        let ping = build_frame(WireCommand::Ping, &[]);
        h.engine.push_rf_packet(&ping, -40, 200).unwrap();
        h.engine.push_rf_packet(&ping, -40, 200).unwrap();
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn test_wrong_payload_length_dropped() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::SetPower, &[1, 2]), -40, 200)
            .unwrap();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::GetPower, &[]), -40, 200)
            .unwrap();
        assert_eq!(
            h.sent(),
            vec![build_frame(WireCommand::GetPowerResponse, &[0])]
        );
    }

    #[test]
    fn test_set_channel_uses_lowest_bit() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(
                &build_frame(WireCommand::SetChannel, &0x0001_8000u32.to_be_bytes()),
                -40,
                200,
            )
            .unwrap();
        assert_eq!(h.engine.rf().channel(), 15);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_rx_test_report() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::StartRxTest, &[]), -40, 100)
            .unwrap();
        for _ in 0..3 {
            h.engine.push_rf_packet(&[1, 2, 3], -40, 100).unwrap();
        }
        h.engine
            .push_rf_packet(&build_frame(WireCommand::EndRxTest, &[]), -40, 100)
            .unwrap();

        let report = RxReport {
            total_pkts: 4,
            proto_pkts: 1,
            total_lqi: 400,
            total_rssi: 160,
        };
        assert_eq!(
            h.sent(),
            vec![build_frame(WireCommand::Report, &report.to_payload())]
        );
        h.engine.rf_tx_finished();
        assert!(h.is_idle());
    }

    #[test]
    fn test_rx_test_counts_unknown_protocol_commands() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::StartRxTest, &[]), -40, 100)
            .unwrap();
        h.engine.push_rf_packet(&[0xDE, 0xDE, 0x00, 0x7F], -40, 100).unwrap();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::EndRxTest, &[]), -40, 100)
            .unwrap();

        let report = RxReport {
            total_pkts: 2,
            proto_pkts: 2,
            total_lqi: 200,
            total_rssi: 80,
        };
        assert_eq!(
            h.sent(),
            vec![build_frame(WireCommand::Report, &report.to_payload())]
        );
        h.engine.rf_tx_finished();
        assert!(h.is_idle());
    }

    #[test]
    fn test_stream_runs_for_requested_duration() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::Stream, &[0, 50]), -40, 100)
            .unwrap();
        assert!(h.record().emitting);
        assert_eq!(h.record().streams[0].len(), 125);

        h.advance(49);
        assert!(h.record().emitting);
        h.advance(1);
        assert!(!h.record().emitting);
        assert!(h.is_idle());
    }

    #[test]
    fn test_versions_and_antenna() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::GetHardwareVersion, &[]), -40, 100)
            .unwrap();
        h.engine.rf_tx_finished();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::SetTxAntenna, &[2]), -40, 100)
            .unwrap();
        h.engine
            .push_rf_packet(&build_frame(WireCommand::GetTxAntenna, &[]), -40, 100)
            .unwrap();
        assert_eq!(
            h.sent(),
            vec![
                build_frame(WireCommand::GetHardwareVersionResponse, &[1]),
                build_frame(WireCommand::GetAntennaResponse, &[2]),
            ]
        );
    }

    #[test]
    fn test_change_mode_over_the_air() {
        let mut h = Harness::dut();
        h.engine
            .push_rf_packet(
                &build_frame(WireCommand::ChangeMode, &1u32.to_be_bytes()),
                -40,
                100,
            )
            .unwrap();
        assert_eq!(h.engine.mode(), Some(DeviceMode::Cmd));
    }
}

// ============================================================================
// Mode Tests
// ============================================================================

mod mode_tests {
    use super::*;

    #[test]
    fn test_default_mode_is_lowest_enabled() {
        let h = Harness::new(
            EngineConfig {
                enabled_modes: DeviceMode::Cmd.bit(),
                ..Default::default()
            },
            DeviceMode::Cmd,
        );
        assert_eq!(h.engine.default_mode(), DeviceMode::Cmd);
    }

    #[test]
    fn test_changemode_line_switches_and_prompts() {
        let mut h = Harness::dut();
        h.line("custom changemode 1").unwrap();
        assert_eq!(h.engine.mode(), Some(DeviceMode::Cmd));
        assert_eq!(h.record().prompts, 1);

        assert_eq!(h.line("custom changemode 7"), Err(PttError::InvalidMode));
        assert_eq!(h.engine.mode(), Some(DeviceMode::Cmd));
    }

    #[test]
    fn test_changemode_preempts_running_command() {
        let mut h = Harness::cmd();
        h.line("custom lstart").unwrap();
        h.line("custom changemode 1").unwrap();
        assert!(h.is_idle());
        assert!(h.engine.cmd_context().unwrap().uart_current().is_none());
    }

    #[test]
    fn test_dut_rejects_host_commands() {
        let mut h = Harness::dut();
        assert_eq!(h.line("custom rping"), Err(PttError::InvalidCommand));
        assert_eq!(h.record().prompts, 1);
        assert!(h.is_idle());
    }

    #[test]
    fn test_disabled_mode_refused() {
        let mut h = Harness::new(
            EngineConfig {
                enabled_modes: DeviceMode::Dut.bit(),
                ..Default::default()
            },
            DeviceMode::Dut,
        );
        assert_eq!(
            h.engine.switch_mode(DeviceMode::Cmd),
            Err(PttError::InvalidMode)
        );
    }

    #[test]
    fn test_uninit_leaves_no_mode() {
        let mut h = Harness::cmd();
        h.engine.uninit();
        assert_eq!(h.engine.mode(), None);
        assert!(h.line("custom rping").is_err());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use proptest::prelude::*;
    use ptt_engine::{EventId, EventPool, RfContext, TimerPool};

    use super::*;

    proptest! {
        /// Allocated handles are unique and the pool never over-allocates
        #[test]
        fn pool_handles_are_exclusive(ops in prop::collection::vec(any::<Option<u8>>(), 1..200)) {
            let mut pool = EventPool::new(10, 16, 4);
            let mut live: Vec<EventId> = Vec::new();
            for op in ops {
                match op {
                    None => match pool.alloc() {
                        Ok(id) => {
                            prop_assert!(!live.contains(&id));
                            live.push(id);
                        }
                        Err(e) => {
                            prop_assert_eq!(e, PttError::NoFreeSlot);
                            prop_assert_eq!(live.len(), 10);
                        }
                    },
                    Some(i) if !live.is_empty() => {
                        let id = live.remove(i as usize % live.len());
                        pool.free(id);
                        pool.free(id);
                    }
                    Some(_) => {}
                }
                prop_assert_eq!(pool.in_use(), live.len());
            }
        }

        /// A timer fires exactly after its timeout, across clock wraparound
        #[test]
        fn timer_fires_across_wrap(start in 0u32..1_000, timeout in 1u32..500, modulus in 1_000u32..2_000) {
            let start = modulus - 1 - start % modulus.min(1_000);
            let mut pool: TimerPool<u8> = TimerPool::new(4, modulus, 10_000, 8);
            pool.add(start, timeout, 7, EventId(1)).unwrap();

            let before = (start + timeout - 1) % modulus;
            pool.rebase(before);
            prop_assert!(pool.pop_expired().is_none());

            let due = (start + timeout) % modulus;
            pool.rebase(due);
            let fired = pool.pop_expired().unwrap();
            prop_assert_eq!(fired.callback, 7);
            prop_assert_eq!(fired.owner, EventId(1));
            prop_assert!(pool.is_empty());
        }

        /// Only one owner holds the radio and only the owner releases it
        #[test]
        fn rf_lock_is_exclusive(ops in prop::collection::vec((any::<bool>(), 0u8..4), 1..100)) {
            let mut rf = RfContext::new(&EngineConfig::default());
            let mut owner: Option<EventId> = None;
            for (lock, raw) in ops {
                let id = EventId(raw);
                if lock {
                    let result = rf.try_lock(id);
                    prop_assert_eq!(result.is_ok(), owner.is_none());
                    if result.is_ok() {
                        owner = Some(id);
                    }
                } else {
                    let result = rf.unlock(id);
                    prop_assert_eq!(result.is_ok(), owner == Some(id));
                    if result.is_ok() {
                        owner = None;
                    }
                }
                prop_assert_eq!(rf.locked_by(), owner);
            }
        }
    }
}
