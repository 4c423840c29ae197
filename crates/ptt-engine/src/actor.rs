//! Engine Actor
//!
//! The engine is single-threaded: pools, the dispatch table and every state
//! machine field must only be touched from one place. This module owns the
//! engine inside a tokio task and serializes everything that reaches it
//! through one task queue. Radio drivers, the host link and the CLI only
//! ever enqueue [`EngineTask`]s; tasks run in the order they were sent.
//!
//! Between tasks the actor sleeps until the next armed engine timer and
//! then runs [`Engine::process`] with the platform clock's reading.
//!
//! # Example
//!
//! ```rust,ignore
//! use ptt_engine::actor::spawn_engine_actor;
//!
//! let (handle, join) = spawn_engine_actor(engine, 64);
//! handle.host_line(b"custom rping").await?;
//! handle.shutdown().await?;
//! let engine = join.await?;
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::engine::Engine;
use crate::error::{PttError, PttResult};
use crate::mode::DeviceMode;

/// Work items consumed by the engine actor
#[derive(Debug)]
pub enum EngineTask {
    /// A frame was received
    RfPacket {
        psdu: Vec<u8>,
        rssi: i8,
        lqi: u8,
    },
    TxStarted,
    TxFinished,
    TxFailed {
        error: u8,
    },
    RxFailed {
        error: u8,
    },
    CcaDone {
        channel_free: bool,
    },
    CcaFailed {
        error: u8,
    },
    EdDone {
        value: u8,
    },
    EdFailed {
        error: u8,
    },

    /// A complete line from the host
    HostLine {
        line: Vec<u8>,
    },

    /// Run expired timers now, regardless of the actor's own schedule
    Tick,

    /// Switch the device mode
    SwitchMode {
        mode: DeviceMode,
        /// Channel to send back the result
        response: oneshot::Sender<PttResult<()>>,
    },

    /// Query the active mode
    QueryMode {
        response: oneshot::Sender<Option<DeviceMode>>,
    },

    /// Stop the actor; the engine is handed back through the join handle
    Shutdown,
}

/// Errors seen by producers talking to the actor
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ActorError {
    #[error("engine actor stopped")]
    Stopped,

    #[error(transparent)]
    Engine(#[from] PttError),
}

async fn sleep_for(wait: Option<u32>) {
    match wait {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms as u64)).await,
        None => std::future::pending().await,
    }
}

/// Apply one task; returns false once the actor should stop
fn handle_task(engine: &mut Engine, task: EngineTask) -> bool {
    trace!("task {:?}", task);
    let result = match task {
        EngineTask::RfPacket { psdu, rssi, lqi } => engine.push_rf_packet(&psdu, rssi, lqi),
        EngineTask::TxStarted => {
            engine.rf_tx_started();
            Ok(())
        }
        EngineTask::TxFinished => {
            engine.rf_tx_finished();
            Ok(())
        }
        EngineTask::TxFailed { error } => {
            engine.rf_tx_failed(error);
            Ok(())
        }
        EngineTask::RxFailed { error } => engine.rf_rx_failed(error),
        EngineTask::CcaDone { channel_free } => {
            engine.rf_cca_done(channel_free);
            Ok(())
        }
        EngineTask::CcaFailed { error } => {
            engine.rf_cca_failed(error);
            Ok(())
        }
        EngineTask::EdDone { value } => {
            engine.rf_ed_done(value);
            Ok(())
        }
        EngineTask::EdFailed { error } => {
            engine.rf_ed_failed(error);
            Ok(())
        }
        EngineTask::HostLine { line } => engine.push_host_line(&line),
        EngineTask::Tick => {
            let now = engine.now_ms();
            engine.process(now);
            Ok(())
        }
        EngineTask::SwitchMode { mode, response } => {
            let _ = response.send(engine.switch_mode(mode));
            Ok(())
        }
        EngineTask::QueryMode { response } => {
            let _ = response.send(engine.mode());
            Ok(())
        }
        EngineTask::Shutdown => return false,
    };
    if let Err(e) = result {
        debug!("task failed: {}", e);
    }
    true
}

/// Run the engine actor until [`EngineTask::Shutdown`] or until every sender is dropped
///
/// Returns the engine so callers can inspect its final state.
pub async fn run_engine_actor(mut engine: Engine, mut task_rx: mpsc::Receiver<EngineTask>) -> Engine {
    info!("engine actor started in {:?} mode", engine.mode());

    loop {
        let wait = engine.time_until_next_timer();
        tokio::select! {
            task = task_rx.recv() => {
                let Some(task) = task else { break; };
                if !handle_task(&mut engine, task) {
                    break;
                }
            }
            _ = sleep_for(wait) => {
                let now = engine.now_ms();
                engine.process(now);
            }
        }
    }

    info!("engine actor stopped");
    engine
}

/// Spawn the actor on the current runtime
pub fn spawn_engine_actor(engine: Engine, capacity: usize) -> (EngineHandle, JoinHandle<Engine>) {
    let (task_tx, task_rx) = mpsc::channel(capacity);
    let join = tokio::spawn(run_engine_actor(engine, task_rx));
    (EngineHandle::new(task_tx), join)
}

/// Cloneable producer side of the actor's task queue
#[derive(Debug, Clone)]
pub struct EngineHandle {
    task_tx: mpsc::Sender<EngineTask>,
}

impl EngineHandle {
    pub fn new(task_tx: mpsc::Sender<EngineTask>) -> Self {
        Self { task_tx }
    }

    /// Enqueue a task
    pub async fn send(&self, task: EngineTask) -> Result<(), ActorError> {
        self.task_tx
            .send(task)
            .await
            .map_err(|_| ActorError::Stopped)
    }

    pub async fn host_line(&self, line: impl Into<Vec<u8>>) -> Result<(), ActorError> {
        self.send(EngineTask::HostLine { line: line.into() }).await
    }

    pub async fn rf_packet(&self, psdu: Vec<u8>, rssi: i8, lqi: u8) -> Result<(), ActorError> {
        self.send(EngineTask::RfPacket { psdu, rssi, lqi }).await
    }

    pub async fn switch_mode(&self, mode: DeviceMode) -> Result<(), ActorError> {
        let (response, rx) = oneshot::channel();
        self.send(EngineTask::SwitchMode { mode, response }).await?;
        rx.await.map_err(|_| ActorError::Stopped)??;
        Ok(())
    }

    pub async fn mode(&self) -> Result<Option<DeviceMode>, ActorError> {
        let (response, rx) = oneshot::channel();
        self.send(EngineTask::QueryMode { response }).await?;
        rx.await.map_err(|_| ActorError::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), ActorError> {
        self.send(EngineTask::Shutdown).await
    }
}
