//! Two-device test bench on a manual clock
//!
//! A [`Bench`] owns a CMD device and a DUT device sharing one simulated
//! channel. Everything runs on the caller's thread: [`Bench::host`] feeds a
//! line to the CMD device and settles the air, [`Bench::advance`] moves
//! the clock one millisecond at a time and fires due timers.

use std::sync::{Arc, Mutex};

use ptt_engine::{DeviceMode, Engine, EngineConfig, PttResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use crate::clock::SimClock;
use crate::link::{hears, LinkConfig};
use crate::platform::{lock_state, RadioOp, SimPlatform, SimState};

/// Which device of the bench
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Cmd,
    Dut,
}

impl Role {
    fn peer(self) -> Self {
        match self {
            Role::Cmd => Role::Dut,
            Role::Dut => Role::Cmd,
        }
    }
}

/// One simulated device
pub struct Node {
    pub engine: Engine,
    pub state: Arc<Mutex<SimState>>,
}

impl Node {
    fn new(
        name: &str,
        config: EngineConfig,
        mode: DeviceMode,
        clock: SimClock,
        link: &LinkConfig,
        seed: u64,
    ) -> PttResult<Self> {
        let platform = SimPlatform::new(name, clock, link, seed);
        let state = platform.state();
        let mut engine = Engine::new(config, Box::new(platform));
        engine.switch_mode(mode)?;
        Ok(Self { engine, state })
    }

    fn next_op(&self) -> Option<RadioOp> {
        lock_state(&self.state).pending.pop_front()
    }
}

/// CMD and DUT devices with the air between them
pub struct Bench {
    cmd: Node,
    dut: Node,
    clock: SimClock,
    link: LinkConfig,
    rng: StdRng,
}

impl Bench {
    /// Bench with default engine settings and a perfect link
    pub fn new() -> PttResult<Self> {
        Self::with_config(EngineConfig::default(), LinkConfig::default())
    }

    pub fn with_config(config: EngineConfig, link: LinkConfig) -> PttResult<Self> {
        let clock = SimClock::manual(0);
        let cmd = Node::new(
            "cmd",
            config.clone(),
            DeviceMode::Cmd,
            clock.clone(),
            &link,
            link.seed,
        )?;
        let dut = Node::new(
            "dut",
            config,
            DeviceMode::Dut,
            clock.clone(),
            &link,
            link.seed.wrapping_add(1),
        )?;
        let rng = StdRng::seed_from_u64(link.seed);
        let mut bench = Self {
            cmd,
            dut,
            clock,
            link,
            rng,
        };
        bench.pump();
        Ok(bench)
    }

    pub fn node(&self, role: Role) -> &Node {
        match role {
            Role::Cmd => &self.cmd,
            Role::Dut => &self.dut,
        }
    }

    pub fn node_mut(&mut self, role: Role) -> &mut Node {
        match role {
            Role::Cmd => &mut self.cmd,
            Role::Dut => &mut self.dut,
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Send one host line to the CMD device and settle the air
    pub fn host(&mut self, line: &str) -> PttResult<()> {
        let result = self.cmd.engine.push_host_line(line.as_bytes());
        self.pump();
        result
    }

    /// Complete pending radio work on both devices until none is left
    pub fn pump(&mut self) {
        loop {
            let mut idle = true;
            for role in [Role::Cmd, Role::Dut] {
                let op = self.node(role).next_op();
                if let Some(op) = op {
                    idle = false;
                    self.complete(role, op);
                }
            }
            if idle {
                break;
            }
        }
    }

    fn complete(&mut self, role: Role, op: RadioOp) {
        match op {
            RadioOp::Transmit { channel, psdu } => {
                let delivery = self.link.sample(&mut self.rng);
                let peer = self.node_mut(role.peer());
                let listening = hears(&lock_state(&peer.state), channel);
                match delivery {
                    Some((rssi, lqi)) if listening => {
                        trace!("{:?} -> {:?}: {} bytes", role, role.peer(), psdu.len());
                        let _ = peer.engine.push_rf_packet(&psdu, rssi, lqi);
                    }
                    _ => trace!("{:?}: frame on channel {} not heard", role, channel),
                }
                let node = self.node_mut(role);
                node.engine.rf_tx_started();
                node.engine.rf_tx_finished();
            }
            RadioOp::Cca { channel_free } => self.node_mut(role).engine.rf_cca_done(channel_free),
            RadioOp::Ed { level } => self.node_mut(role).engine.rf_ed_done(level),
        }
    }

    /// Move time forward, firing due timers on both devices every millisecond
    pub fn advance(&mut self, ms: u32) {
        for _ in 0..ms {
            let now = self.clock.advance(1);
            for role in [Role::Cmd, Role::Dut] {
                let engine = &mut self.node_mut(role).engine;
                if engine.time_until_next_timer() == Some(0) {
                    engine.process(now);
                }
            }
            self.pump();
        }
    }

    /// Drain the lines the CMD device wrote to its host
    pub fn take_host_output(&mut self) -> Vec<String> {
        std::mem::take(&mut lock_state(&self.cmd.state).host_out)
    }

    /// Prompts the CMD device has written so far
    pub fn prompts(&self) -> usize {
        lock_state(&self.cmd.state).prompts
    }

    /// Snapshot of a device's simulated hardware
    pub fn state(&self, role: Role) -> SimState {
        lock_state(&self.node(role).state).clone()
    }

    /// Run a closure against a device's simulated hardware
    pub fn with_state<T>(&self, role: Role, f: impl FnOnce(&mut SimState) -> T) -> T {
        f(&mut lock_state(&self.node(role).state))
    }
}

impl std::fmt::Debug for Bench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bench")
            .field("now_ms", &self.clock.now_ms())
            .field("cmd", &self.cmd.engine)
            .field("dut", &self.dut.engine)
            .finish()
    }
}
