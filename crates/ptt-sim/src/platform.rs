//! Simulated radio, board and host link
//!
//! [`SimPlatform`] implements every engine platform trait against a shared
//! [`SimState`]. Radio work the engine starts (transmit, CCA, energy
//! detection) is not completed here: it becomes a [`RadioOp`] that the
//! bench or the air task resolves and reports back through the engine's
//! inbound API, the way a radio interrupt would.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ptt_engine::{Board, Clock, HostLink, RadioDriver};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::clock::SimClock;
use crate::link::LinkConfig;

/// Radio work waiting for a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioOp {
    Transmit { channel: u8, psdu: Vec<u8> },
    Cca { channel_free: bool },
    Ed { level: u8 },
}

/// Something the device wrote to its host link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutput {
    Line(String),
    Prompt,
}

/// Output of a device running under the async air task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOutput {
    Radio(RadioOp),
    Host(HostOutput),
}

/// Observable state of one simulated device
#[derive(Debug, Clone)]
pub struct SimState {
    pub channel: u8,
    pub power: i8,
    pub tx_antenna: u8,
    pub rx_antenna: u8,
    pub pan_id: [u8; 2],
    pub short_address: [u8; 2],
    pub extended_address: [u8; 8],
    pub receiving: bool,
    /// Continuous carrier or modulated stream in progress
    pub emitting: bool,
    pub stream: Option<Vec<u8>>,
    pub pending: VecDeque<RadioOp>,
    pub host_out: Vec<String>,
    pub prompts: usize,
    pub gpio: HashMap<u8, u8>,
    pub clk_pins: HashMap<u8, bool>,
    pub dcdc: bool,
    pub icache: bool,
    pub temperature: i32,
    pub led: bool,
    pub resets: usize,
    /// Last "call me back in N ms" request
    pub armed: Option<u32>,
    pub channel_free: bool,
    pub ed_level: u8,
    pub noise_rssi: i8,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            channel: 11,
            power: 0,
            tx_antenna: 0,
            rx_antenna: 0,
            pan_id: [0; 2],
            short_address: [0; 2],
            extended_address: [0; 8],
            receiving: false,
            emitting: false,
            stream: None,
            pending: VecDeque::new(),
            host_out: Vec::new(),
            prompts: 0,
            gpio: HashMap::new(),
            clk_pins: HashMap::new(),
            dcdc: false,
            icache: true,
            temperature: 25,
            led: false,
            resets: 0,
            armed: None,
            channel_free: true,
            ed_level: 0,
            noise_rssi: -95,
        }
    }
}

/// Lock a device state, recovering it if a panicking holder poisoned it
pub fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Platform implementation backed by [`SimState`]
pub struct SimPlatform {
    name: String,
    state: Arc<Mutex<SimState>>,
    clock: SimClock,
    rng: StdRng,
    out: Option<mpsc::UnboundedSender<SimOutput>>,
}

impl SimPlatform {
    /// New device; `seed` drives its random payloads
    pub fn new(name: impl Into<String>, clock: SimClock, link: &LinkConfig, seed: u64) -> Self {
        let state = SimState {
            channel_free: link.channel_free,
            ed_level: link.ed_level,
            noise_rssi: link.noise_rssi,
            ..SimState::default()
        };
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(state)),
            clock,
            rng: StdRng::seed_from_u64(seed),
            out: None,
        }
    }

    /// Stream radio work and host output to `out` instead of queueing it in the state
    pub fn with_output(mut self, out: mpsc::UnboundedSender<SimOutput>) -> Self {
        self.out = Some(out);
        self
    }

    /// Shared handle on this device's state
    pub fn state(&self) -> Arc<Mutex<SimState>> {
        self.state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }

    fn start(&mut self, op: RadioOp) -> bool {
        trace!("{}: radio {:?}", self.name, op);
        match &self.out {
            Some(out) => out.send(SimOutput::Radio(op)).is_ok(),
            None => {
                self.lock().pending.push_back(op);
                true
            }
        }
    }

    fn host(&mut self, output: HostOutput) {
        if let Some(out) = &self.out {
            if out.send(SimOutput::Host(output.clone())).is_ok() {
                return;
            }
            debug!("{}: host output channel closed", self.name);
        }
        let mut state = self.lock();
        match output {
            HostOutput::Line(line) => state.host_out.push(line),
            HostOutput::Prompt => state.prompts += 1,
        }
    }
}

impl std::fmt::Debug for SimPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPlatform")
            .field("name", &self.name)
            .field("clock", &self.clock)
            .field("streaming", &self.out.is_some())
            .finish()
    }
}

impl RadioDriver for SimPlatform {
    fn set_channel(&mut self, channel: u8) -> bool {
        if !(11..=26).contains(&channel) {
            return false;
        }
        self.lock().channel = channel;
        true
    }

    fn set_power(&mut self, dbm: i8) -> bool {
        self.lock().power = dbm;
        true
    }

    fn set_tx_antenna(&mut self, antenna: u8) -> bool {
        self.lock().tx_antenna = antenna;
        true
    }

    fn set_rx_antenna(&mut self, antenna: u8) -> bool {
        self.lock().rx_antenna = antenna;
        true
    }

    fn last_best_rx_antenna(&mut self) -> u8 {
        self.lock().rx_antenna
    }

    fn set_pan_id(&mut self, pan_id: [u8; 2]) {
        self.lock().pan_id = pan_id;
    }

    fn set_short_address(&mut self, addr: [u8; 2]) {
        self.lock().short_address = addr;
    }

    fn set_extended_address(&mut self, addr: [u8; 8]) {
        self.lock().extended_address = addr;
    }

    fn transmit(&mut self, psdu: &[u8], _cca: bool) -> bool {
        let channel = {
            let state = self.lock();
            if state.emitting {
                return false;
            }
            state.channel
        };
        self.start(RadioOp::Transmit {
            channel,
            psdu: psdu.to_vec(),
        })
    }

    fn receive(&mut self) -> bool {
        let mut state = self.lock();
        state.receiving = true;
        state.emitting = false;
        state.stream = None;
        true
    }

    fn sleep(&mut self) -> bool {
        let mut state = self.lock();
        state.receiving = false;
        state.emitting = false;
        state.stream = None;
        true
    }

    fn cca(&mut self, _mode: u8) -> bool {
        let channel_free = self.lock().channel_free;
        self.start(RadioOp::Cca { channel_free })
    }

    fn energy_detection(&mut self, _time_us: u32) -> bool {
        let level = self.lock().ed_level;
        self.start(RadioOp::Ed { level })
    }

    fn rssi_measure_begin(&mut self) -> bool {
        self.lock().receiving
    }

    fn rssi_last_get(&mut self) -> Option<i8> {
        let state = self.lock();
        state.receiving.then_some(state.noise_rssi)
    }

    fn continuous_carrier(&mut self) -> bool {
        let mut state = self.lock();
        state.emitting = true;
        state.stream = None;
        true
    }

    fn modulated_stream(&mut self, payload: &[u8]) -> bool {
        let mut state = self.lock();
        state.emitting = true;
        state.stream = Some(payload.to_vec());
        true
    }
}

impl Board for SimPlatform {
    fn reset(&mut self) {
        debug!("{}: board reset", self.name);
        self.lock().resets += 1;
    }

    fn set_gpio(&mut self, pin: u8, value: u8) -> bool {
        if value > 1 {
            return false;
        }
        self.lock().gpio.insert(pin, value);
        true
    }

    fn get_gpio(&mut self, pin: u8) -> Option<u8> {
        Some(self.lock().gpio.get(&pin).copied().unwrap_or(0))
    }

    fn clk_out(&mut self, pin: u8, enable: bool) -> bool {
        self.lock().clk_pins.insert(pin, enable);
        true
    }

    fn set_dcdc(&mut self, enable: bool) {
        self.lock().dcdc = enable;
    }

    fn dcdc(&mut self) -> bool {
        self.lock().dcdc
    }

    fn set_icache(&mut self, enable: bool) {
        self.lock().icache = enable;
    }

    fn icache(&mut self) -> bool {
        self.lock().icache
    }

    fn temperature(&mut self) -> Option<i32> {
        Some(self.lock().temperature)
    }

    fn led_on(&mut self) {
        self.lock().led = true;
    }

    fn led_off(&mut self) {
        self.lock().led = false;
    }

    fn random_fill(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }
}

impl HostLink for SimPlatform {
    fn send(&mut self, bytes: &[u8], _add_terminator: bool) {
        let line = String::from_utf8_lossy(bytes).into_owned();
        debug!("{}: host <- {}", self.name, line);
        self.host(HostOutput::Line(line));
    }

    fn prompt(&mut self) {
        self.host(HostOutput::Prompt);
    }
}

impl Clock for SimPlatform {
    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    fn arm(&mut self, timeout_ms: u32) {
        self.lock().armed = Some(timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> SimPlatform {
        SimPlatform::new("test", SimClock::manual(0), &LinkConfig::default(), 1)
    }

    #[test]
    fn transmit_is_queued_with_its_channel() {
        let mut p = platform();
        assert!(p.set_channel(20));
        assert!(p.transmit(&[1, 2, 3], false));
        let op = lock_state(&p.state()).pending.pop_front();
        assert_eq!(
            op,
            Some(RadioOp::Transmit {
                channel: 20,
                psdu: vec![1, 2, 3]
            })
        );
    }

    #[test]
    fn invalid_channel_is_refused() {
        let mut p = platform();
        assert!(!p.set_channel(10));
        assert!(!p.set_channel(27));
        assert_eq!(lock_state(&p.state()).channel, 11);
    }

    #[test]
    fn receive_stops_emission() {
        let mut p = platform();
        assert!(p.modulated_stream(&[0xAA; 4]));
        assert!(!p.transmit(&[1], false));
        assert!(p.receive());
        let state = p.state();
        let state = lock_state(&state);
        assert!(state.receiving);
        assert!(!state.emitting);
        assert!(state.stream.is_none());
    }

    #[test]
    fn cca_and_ed_carry_link_results() {
        let link = LinkConfig {
            channel_free: false,
            ed_level: 77,
            ..LinkConfig::default()
        };
        let mut p = SimPlatform::new("test", SimClock::manual(0), &link, 1);
        p.cca(1);
        p.energy_detection(128);
        let state = p.state();
        let state = lock_state(&state);
        assert_eq!(state.pending[0], RadioOp::Cca { channel_free: false });
        assert_eq!(state.pending[1], RadioOp::Ed { level: 77 });
    }

    #[test]
    fn output_channel_takes_host_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut p = platform().with_output(tx);
        p.send(b"ACK", true);
        p.prompt();
        assert_eq!(
            rx.try_recv().unwrap(),
            SimOutput::Host(HostOutput::Line("ACK".into()))
        );
        assert_eq!(rx.try_recv().unwrap(), SimOutput::Host(HostOutput::Prompt));
        assert!(lock_state(&p.state()).host_out.is_empty());
    }

    #[test]
    fn seeded_payloads_repeat() {
        let mut a = platform();
        let mut b = platform();
        let mut x = [0u8; 16];
        let mut y = [0u8; 16];
        a.random_fill(&mut x);
        b.random_fill(&mut y);
        assert_eq!(x, y);
    }
}
