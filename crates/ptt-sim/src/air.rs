//! Air task connecting two engine actors
//!
//! Each device runs inside its own engine actor with a streaming
//! [`SimPlatform`](crate::SimPlatform). The air task consumes what both
//! platforms emit, delivers frames to the peer that can hear them and
//! reports radio completions back to the originator as engine tasks.

use std::sync::{Arc, Mutex};

use ptt_engine::{
    spawn_engine_actor, DeviceMode, Engine, EngineConfig, EngineHandle, EngineTask, PttResult,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::clock::SimClock;
use crate::link::{hears, LinkConfig};
use crate::platform::{lock_state, HostOutput, RadioOp, SimOutput, SimPlatform, SimState};

/// Task queue depth of each engine actor
const ACTOR_CAPACITY: usize = 64;

/// One device as seen by the air
pub struct AirNode {
    pub name: String,
    pub handle: EngineHandle,
    pub state: Arc<Mutex<SimState>>,
    pub output: mpsc::UnboundedReceiver<SimOutput>,
}

/// A running CMD/DUT pair on a wall clock
pub struct AirPair {
    pub cmd: EngineHandle,
    pub dut: EngineHandle,
    /// Host output of the CMD device
    pub host_rx: mpsc::UnboundedReceiver<HostOutput>,
    pub cmd_task: JoinHandle<Engine>,
    pub dut_task: JoinHandle<Engine>,
    pub air_task: JoinHandle<()>,
}

impl AirPair {
    /// Stop both actors and wait for the air to drain
    pub async fn shutdown(self) {
        for handle in [&self.cmd, &self.dut] {
            if let Err(e) = handle.shutdown().await {
                debug!("actor already gone: {}", e);
            }
        }
        // engines own the output senders; dropping them closes the air
        for task in [self.cmd_task, self.dut_task] {
            if let Err(e) = task.await {
                warn!("engine actor failed: {}", e);
            }
        }
        if let Err(e) = self.air_task.await {
            warn!("air task failed: {}", e);
        }
    }
}

fn spawn_node(
    name: &str,
    config: EngineConfig,
    mode: DeviceMode,
    clock: SimClock,
    link: &LinkConfig,
    seed: u64,
) -> PttResult<(AirNode, JoinHandle<Engine>)> {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let platform = SimPlatform::new(name, clock, link, seed).with_output(out_tx);
    let state = platform.state();
    let mut engine = Engine::new(config, Box::new(platform));
    engine.switch_mode(mode)?;
    let (handle, task) = spawn_engine_actor(engine, ACTOR_CAPACITY);
    let node = AirNode {
        name: name.to_string(),
        handle,
        state,
        output: out_rx,
    };
    Ok((node, task))
}

/// Start a CMD and a DUT actor and the air between them
///
/// Must be called from within a tokio runtime.
pub fn spawn_pair(config: EngineConfig, link: LinkConfig) -> PttResult<AirPair> {
    let clock = SimClock::wall();
    let (cmd, cmd_task) = spawn_node(
        "cmd",
        config.clone(),
        DeviceMode::Cmd,
        clock.clone(),
        &link,
        link.seed,
    )?;
    let (dut, dut_task) = spawn_node(
        "dut",
        config,
        DeviceMode::Dut,
        clock,
        &link,
        link.seed.wrapping_add(1),
    )?;
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let cmd_handle = cmd.handle.clone();
    let dut_handle = dut.handle.clone();
    let air_task = tokio::spawn(run_air(cmd, dut, link, host_tx));
    Ok(AirPair {
        cmd: cmd_handle,
        dut: dut_handle,
        host_rx,
        cmd_task,
        dut_task,
        air_task,
    })
}

/// Route device output until both devices stop
///
/// Host output of `cmd` is forwarded to `host_tx`; the DUT has no host and
/// its output is only logged.
pub async fn run_air(
    mut cmd: AirNode,
    mut dut: AirNode,
    link: LinkConfig,
    host_tx: mpsc::UnboundedSender<HostOutput>,
) {
    let mut rng = StdRng::seed_from_u64(link.seed);
    let mut cmd_open = true;
    let mut dut_open = true;

    info!("air between {} and {} is up", cmd.name, dut.name);

    while cmd_open || dut_open {
        tokio::select! {
            out = cmd.output.recv(), if cmd_open => match out {
                Some(SimOutput::Host(line)) => {
                    if host_tx.send(line).is_err() {
                        debug!("host output receiver dropped");
                    }
                }
                Some(SimOutput::Radio(op)) => {
                    complete(&cmd, &dut, op, &link, &mut rng).await;
                }
                None => cmd_open = false,
            },
            out = dut.output.recv(), if dut_open => match out {
                Some(SimOutput::Host(line)) => trace!("{} host: {:?}", dut.name, line),
                Some(SimOutput::Radio(op)) => {
                    complete(&dut, &cmd, op, &link, &mut rng).await;
                }
                None => dut_open = false,
            },
        }
    }

    info!("air closed");
}

async fn complete(from: &AirNode, to: &AirNode, op: RadioOp, link: &LinkConfig, rng: &mut StdRng) {
    let task = match op {
        RadioOp::Transmit { channel, psdu } => {
            let listening = hears(&lock_state(&to.state), channel);
            match link.sample(rng) {
                Some((rssi, lqi)) if listening => {
                    trace!("{} -> {}: {} bytes", from.name, to.name, psdu.len());
                    if let Err(e) = to.handle.rf_packet(psdu, rssi, lqi).await {
                        warn!("{} cannot take a frame: {}", to.name, e);
                    }
                }
                _ => trace!("{}: frame on channel {} not heard", from.name, channel),
            }
            EngineTask::TxFinished
        }
        RadioOp::Cca { channel_free } => EngineTask::CcaDone { channel_free },
        RadioOp::Ed { level } => EngineTask::EdDone { value: level },
    };
    if let Err(e) = from.handle.send(task).await {
        warn!("{} cannot take a radio completion: {}", from.name, e);
    }
}
