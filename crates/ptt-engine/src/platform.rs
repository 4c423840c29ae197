//! Outbound collaborators
//!
//! The engine never touches hardware. Radio primitives, board controls, the
//! host link and the external clock are reached through these traits; the
//! simulation crate and device glue implement them.
//!
//! Radio and board primitives report whether they started; completion of
//! asynchronous radio work comes back through the engine's inbound API
//! (`rf_tx_finished`, `rf_cca_done`, ...).

/// 802.15.4 radio driver
pub trait RadioDriver {
    fn set_channel(&mut self, channel: u8) -> bool;
    fn set_power(&mut self, dbm: i8) -> bool;
    fn set_tx_antenna(&mut self, antenna: u8) -> bool;
    fn set_rx_antenna(&mut self, antenna: u8) -> bool;
    /// Antenna that received the last frame best, when diversity is enabled
    fn last_best_rx_antenna(&mut self) -> u8;
    fn set_pan_id(&mut self, pan_id: [u8; 2]);
    fn set_short_address(&mut self, addr: [u8; 2]);
    fn set_extended_address(&mut self, addr: [u8; 8]);

    /// Start transmitting a PSDU, optionally gated by CCA
    fn transmit(&mut self, psdu: &[u8], cca: bool) -> bool;
    fn receive(&mut self) -> bool;
    fn sleep(&mut self) -> bool;
    fn cca(&mut self, mode: u8) -> bool;
    fn energy_detection(&mut self, time_us: u32) -> bool;
    fn rssi_measure_begin(&mut self) -> bool;
    /// Last measured RSSI, `None` if no valid measurement exists
    fn rssi_last_get(&mut self) -> Option<i8>;
    fn continuous_carrier(&mut self) -> bool;
    fn modulated_stream(&mut self, payload: &[u8]) -> bool;
}

/// Board-level controls
pub trait Board {
    fn reset(&mut self);
    fn set_gpio(&mut self, pin: u8, value: u8) -> bool;
    fn get_gpio(&mut self, pin: u8) -> Option<u8>;
    fn clk_out(&mut self, pin: u8, enable: bool) -> bool;
    fn set_dcdc(&mut self, enable: bool);
    fn dcdc(&mut self) -> bool;
    fn set_icache(&mut self, enable: bool);
    fn icache(&mut self) -> bool;
    fn temperature(&mut self) -> Option<i32>;
    fn led_on(&mut self);
    fn led_off(&mut self);
    fn random_fill(&mut self, buf: &mut [u8]);
}

/// Serial link to the host
pub trait HostLink {
    fn send(&mut self, bytes: &[u8], add_terminator: bool);
    fn prompt(&mut self);
}

/// External millisecond clock and its single "call me back" primitive
pub trait Clock {
    fn now_ms(&self) -> u32;
    /// Request a `process` call after `timeout_ms`
    fn arm(&mut self, timeout_ms: u32);
}

/// Everything the engine needs from its environment
pub trait Platform: RadioDriver + Board + HostLink + Clock + Send {}

impl<T: RadioDriver + Board + HostLink + Clock + Send> Platform for T {}
