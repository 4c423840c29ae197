//! Simulated air between two devices

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::platform::SimState;

/// Radio conditions between the simulated devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// RSSI reported for every delivered frame, in dBm
    pub rssi: i8,
    /// Random spread applied to `rssi`, in dB either way
    pub rssi_jitter: u8,
    /// LQI reported for every delivered frame
    pub lqi: u8,
    /// Probability in `0.0..=1.0` that a frame is lost in the air
    pub drop_rate: f64,
    /// Seed for jitter, loss and the devices' random payloads
    pub seed: u64,
    /// CCA verdict returned by both devices
    pub channel_free: bool,
    /// Energy detection level returned by both devices
    pub ed_level: u8,
    /// RSSI returned by a measurement with no frame in the air
    pub noise_rssi: i8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            rssi: -45,
            rssi_jitter: 0,
            lqi: 200,
            drop_rate: 0.0,
            seed: 0x802154,
            channel_free: true,
            ed_level: 12,
            noise_rssi: -95,
        }
    }
}

impl LinkConfig {
    /// Decide the fate of one frame: `None` if it is lost, else its `(rssi, lqi)`
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<(i8, u8)> {
        if self.drop_rate > 0.0 && rng.gen_bool(self.drop_rate.clamp(0.0, 1.0)) {
            return None;
        }
        let jitter = self.rssi_jitter as i16;
        let offset = if jitter > 0 {
            rng.gen_range(-jitter..=jitter)
        } else {
            0
        };
        let rssi = (self.rssi as i16 + offset).clamp(i8::MIN as i16, 0) as i8;
        Some((rssi, self.lqi))
    }
}

/// Whether a device in `receiver` state hears a frame sent on `channel`
pub fn hears(receiver: &SimState, channel: u8) -> bool {
    receiver.receiving && !receiver.emitting && receiver.channel == channel
}
