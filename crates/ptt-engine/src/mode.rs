//! Device modes and mode switching

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cmd::CmdContext;
use crate::dispatch::Handlers;
use crate::dut::DutContext;
use crate::engine::Engine;
use crate::error::{PttError, PttResult};

/// Device personality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Device under test, answers OTA commands
    Dut = 0,
    /// Controller, takes host commands and drives a DUT
    Cmd = 1,
}

impl DeviceMode {
    pub const ALL: [DeviceMode; 2] = [DeviceMode::Dut, DeviceMode::Cmd];

    /// Bit of this mode in an enabled-modes mask
    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    /// Lowest-numbered mode enabled in `mask`
    pub fn lowest_enabled(mask: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| mask & m.bit() != 0)
    }
}

impl TryFrom<u32> for DeviceMode {
    type Error = PttError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeviceMode::Dut),
            1 => Ok(DeviceMode::Cmd),
            _ => Err(PttError::InvalidMode),
        }
    }
}

/// Mode-specific state, selected by the active mode
#[derive(Debug)]
pub enum ModeState {
    Uninitialized,
    Dut(DutContext),
    Cmd(CmdContext),
}

impl ModeState {
    pub fn mode(&self) -> Option<DeviceMode> {
        match self {
            ModeState::Uninitialized => None,
            ModeState::Dut(_) => Some(DeviceMode::Dut),
            ModeState::Cmd(_) => Some(DeviceMode::Cmd),
        }
    }
}

impl Engine {
    /// Mode picked at start-up: lowest enabled, or the configured fallback
    pub fn default_mode(&self) -> DeviceMode {
        DeviceMode::lowest_enabled(self.config().enabled_modes)
            .unwrap_or(self.config().fallback_mode)
    }

    pub(crate) fn init_default_mode(&mut self) {
        let mode = self.default_mode();
        info!("starting in {:?} mode", mode);
        self.reset_shared();
        self.init_mode(mode);
    }

    /// Switch to `mode`, tearing down the current one
    ///
    /// Switching to the active mode resets it to its post-init state.
    pub fn switch_mode(&mut self, mode: DeviceMode) -> PttResult<()> {
        if self.config().enabled_modes & mode.bit() == 0 {
            warn!("mode {:?} not enabled", mode);
            return Err(PttError::InvalidMode);
        }
        info!("switching mode {:?} -> {:?}", self.mode(), mode);
        self.uninit_mode();
        self.reset_shared();
        self.init_mode(mode);
        Ok(())
    }

    /// Switch by raw mode number, as carried by host and OTA commands
    pub fn switch_mode_raw(&mut self, mode: u32) -> PttResult<()> {
        let mode = DeviceMode::try_from(mode)?;
        self.switch_mode(mode)
    }

    /// Tear down the active mode and leave the engine uninitialized
    pub fn uninit(&mut self) {
        self.uninit_mode();
        self.reset_shared();
        self.mode = ModeState::Uninitialized;
    }

    fn init_mode(&mut self, mode: DeviceMode) {
        let (state, handlers) = match mode {
            DeviceMode::Dut => (ModeState::Dut(DutContext::default()), crate::dut::handlers()),
            DeviceMode::Cmd => (
                ModeState::Cmd(CmdContext::new(self.config().rsp_timeout_ms)),
                crate::cmd::handlers(),
            ),
        };
        self.mode = state;
        self.handlers = handlers;
    }

    fn uninit_mode(&mut self) {
        match self.mode() {
            Some(DeviceMode::Cmd) => self.cmd_uninit(),
            Some(DeviceMode::Dut) => self.dut_uninit(),
            None => {}
        }
        self.handlers = Handlers::default();
    }
}
