//! PHY Test Tool Protocol Library
//!
//! This crate provides the two protocols spoken by the 802.15.4 PHY test
//! tool:
//!
//! - **Over-the-air frames**: a fixed preamble, a one-byte command code and a
//!   fixed-layout payload exchanged between a CMD device and a DUT
//! - **Host text commands**: `custom <name> <args>` lines sent to the CMD
//!   device over a serial link, and the replies it prints back
//!
//! Neither side performs I/O; the engine crate feeds bytes in and takes
//! bytes out.
//!
//! # Example
//!
//! ```rust
//! use ptt_protocol::{build_frame, check_header, parse_line, HostCommand, WireCommand};
//!
//! let frame = build_frame(WireCommand::SetChannel, &0x0000_0800u32.to_be_bytes());
//! assert!(check_header(&frame));
//!
//! let line = parse_line("custom rsetchannel 11").unwrap();
//! assert_eq!(line.command, HostCommand::RSetChannel);
//! assert_eq!(line.args, vec![11]);
//! ```

pub mod error;
pub mod host;
pub mod proto;
pub mod response;

pub use error::ParseError;
pub use host::{
    parse_line, ArgSpec, HostCommand, HostLine, LtxArgs, PowerArgs, WaveformArgs, LINE_PREFIX,
};
pub use proto::{
    betoh16, betoh32, build_frame, check_header, construct_header, frame_command, frame_payload,
    htobe16, htobe32, htole16, read_be16, read_be32, RxReport, WireCommand, HEADER_LEN,
    PAYLOAD_START, PREAMBLE, PREAMBLE_LEN, REPORT_PAYLOAD_LEN,
};
pub use response::HostResponse;

/// Lowest 802.15.4 channel in the 2.4 GHz band
pub const CHANNEL_MIN: u8 = 11;

/// Highest 802.15.4 channel in the 2.4 GHz band
pub const CHANNEL_MAX: u8 = 26;

/// Single-bit mask for a channel
pub fn channel_to_mask(channel: u8) -> u32 {
    1u32.checked_shl(channel as u32).unwrap_or(0)
}
