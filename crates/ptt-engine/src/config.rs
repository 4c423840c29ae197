//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::mode::DeviceMode;

/// Bounds for one `lcarrier`/`lstream` timing argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
}

impl Bounds {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Timing limits for waveform commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformLimits {
    pub pulse_ms: Bounds,
    pub interval_ms: Bounds,
    /// Applies to non-zero durations; zero always means run until stopped
    pub duration_ms: Bounds,
}

impl Default for WaveformLimits {
    fn default() -> Self {
        Self {
            pulse_ms: Bounds::new(10, 5_000),
            interval_ms: Bounds::new(10, 5_000),
            duration_ms: Bounds::new(10, 1_000_000),
        }
    }
}

/// Engine configuration
///
/// Every field has a default, so a partial JSON document is enough to
/// override a single knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of event slots
    pub event_pool_size: usize,
    /// Capacity of an event's data buffer
    pub event_data_size: usize,
    /// Capacity of an event's context buffer
    pub event_ctx_size: usize,
    /// Number of timer slots
    pub timer_pool_size: usize,
    /// Largest value the external millisecond clock reports before wrapping
    pub max_clock_ms: u32,
    /// Longest timeout a timer may be armed with
    pub max_timeout_ms: u32,
    /// Time to wait for a DUT response
    pub rsp_timeout_ms: u16,
    /// Bitmask of enabled device modes, bit n enables mode n
    pub enabled_modes: u32,
    /// Mode to start in if no enabled mode is configured
    pub fallback_mode: DeviceMode,
    /// Channel the radio starts on
    pub default_channel: u8,
    /// Transmit power the radio starts with
    pub default_power: i8,
    /// Time between RSSI measurement start and readout
    pub rssi_time_ms: u32,
    /// Energy detection duration
    pub ed_time_us: u32,
    /// Time to wait for a packet on `lgetlqi`
    pub lqi_delay_ms: u32,
    /// LED on-time per received packet
    pub led_blink_ms: u32,
    /// Frames sent by `ltx` without arguments
    pub ltx_default_repeats: u8,
    /// Delay between frames for `ltx` without arguments
    pub ltx_default_timeout_ms: u16,
    /// Longest delay `ltx` accepts
    pub ltx_max_timeout_ms: u16,
    /// Longest custom payload
    pub custom_payload_max: usize,
    /// Limits for `lcarrier`
    pub carrier: WaveformLimits,
    /// Limits for `lstream`
    pub stream: WaveformLimits,
    /// Hardware version reported by a DUT
    pub hw_version: u8,
    /// Software version reported by a DUT
    pub sw_version: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_pool_size: 10,
            event_data_size: 320,
            event_ctx_size: 16,
            timer_pool_size: 10,
            max_clock_ms: u32::MAX,
            max_timeout_ms: 0x7FFF_FFFF,
            rsp_timeout_ms: 500,
            enabled_modes: DeviceMode::Dut.bit() | DeviceMode::Cmd.bit(),
            fallback_mode: DeviceMode::Dut,
            default_channel: ptt_protocol::CHANNEL_MIN,
            default_power: 0,
            rssi_time_ms: 1,
            ed_time_us: 128,
            lqi_delay_ms: 1_000,
            led_blink_ms: 50,
            ltx_default_repeats: 1,
            ltx_default_timeout_ms: 0,
            ltx_max_timeout_ms: 30_000,
            custom_payload_max: 125,
            carrier: WaveformLimits::default(),
            stream: WaveformLimits::default(),
            hw_version: 1,
            sw_version: 1,
        }
    }
}
