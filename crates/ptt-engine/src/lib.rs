//! PHY Test Tool Engine
//!
//! This crate provides the core of the 802.15.4 PHY test tool: the shared
//! pools, radio arbitration and the per-mode state machines.
//!
//! # Architecture
//!
//! A device runs in one of two modes:
//!
//! - **DUT**: answers over-the-air commands from a CMD device
//! - **CMD**: takes text commands from a host, runs local radio tests and
//!   drives a DUT over the air
//!
//! Every mode shares a fixed event pool, a timer pool multiplexed onto one
//! external "fire in N ms" primitive and a single-owner lock on the radio.
//! Radio, board, host link and clock are reached through the [`Platform`]
//! traits; completions come back in through the [`Engine`] inbound methods,
//! usually serialized by the [`actor`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ptt_engine::{DeviceMode, Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default(), Box::new(platform));
//! engine.switch_mode(DeviceMode::Cmd)?;
//! engine.push_host_line(b"custom rping")?;
//! // the radio reports the frame as sent
//! engine.rf_tx_finished();
//! ```

pub mod actor;
pub mod cmd;
pub mod config;
pub mod dispatch;
pub mod dut;
pub mod engine;
pub mod error;
pub mod event;
pub mod mode;
pub mod platform;
pub mod rf;
pub mod timer;

pub use actor::{run_engine_actor, spawn_engine_actor, ActorError, EngineHandle, EngineTask};
pub use cmd::ota::{expected_response, OtaStage};
pub use cmd::uart::UartStage;
pub use cmd::CmdContext;
pub use config::{Bounds, EngineConfig, WaveformLimits};
pub use dispatch::{EventHandler, ExtEvent, Handlers};
pub use dut::{DutContext, DutStage};
pub use engine::{Engine, TimerCallback};
pub use error::{PttError, PttResult};
pub use event::{Event, EventCmd, EventId, EventPool, EventState, RxMeta};
pub use mode::{DeviceMode, ModeState};
pub use platform::{Board, Clock, HostLink, Platform, RadioDriver};
pub use rf::{channel_from_mask, RfContext, RfStat};
pub use timer::{forward_distance, Fired, TimerPool};
