//! PHY Test Tool Simulation Library
//!
//! This crate runs the test tool engine without radio hardware. It includes:
//!
//! - **SimPlatform**: radio, board, host link and clock backed by shared state
//! - **Bench**: a CMD and a DUT device on one manual clock, driven synchronously
//! - **run_air**: the async counterpart connecting two engine actors
//!
//! # Example
//!
//! ```rust,ignore
//! use ptt_sim::Bench;
//!
//! let mut bench = Bench::new()?;
//! bench.host("custom rping")?;
//! assert_eq!(bench.take_host_output(), vec!["ACK"]);
//! ```

pub mod air;
pub mod bench;
pub mod clock;
pub mod link;
pub mod platform;

pub use air::{run_air, spawn_pair, AirNode, AirPair};
pub use bench::{Bench, Node, Role};
pub use clock::SimClock;
pub use link::{hears, LinkConfig};
pub use platform::{lock_state, HostOutput, RadioOp, SimOutput, SimPlatform, SimState};
