//! Over-the-air frame format
//!
//! Every protocol frame starts with a three byte preamble followed by a
//! single command byte; the rest of the PSDU is a command-specific payload:
//!
//! ```text
//! [0xDE][0xDE][0x00][cmd][payload...]
//! ```
//!
//! Multi-byte payload fields are big-endian on the wire.

use std::fmt;

use crate::error::ParseError;

/// Fixed frame preamble
pub const PREAMBLE: [u8; 3] = [0xDE, 0xDE, 0x00];

/// Length of the preamble in bytes
pub const PREAMBLE_LEN: usize = PREAMBLE.len();

/// Length of the command code field
pub const CMD_CODE_LEN: usize = 1;

/// Offset of the command code inside a frame
pub const CMD_CODE_START: usize = PREAMBLE_LEN;

/// Offset of the payload inside a frame
pub const PAYLOAD_START: usize = PREAMBLE_LEN + CMD_CODE_LEN;

/// Preamble plus command code
pub const HEADER_LEN: usize = PAYLOAD_START;

/// Length of a report payload
pub const REPORT_PAYLOAD_LEN: usize = 16;

/// Returns true if `bytes` carries a protocol preamble and at least a command byte
pub fn check_header(bytes: &[u8]) -> bool {
    bytes.len() > PREAMBLE_LEN && bytes[..PREAMBLE_LEN] == PREAMBLE
}

/// Write preamble and command code into `buf`, returning the header length
///
/// # Panics
///
/// Panics if `buf` is shorter than [`HEADER_LEN`]. Callers size their
/// buffers from the event capacity, so a short buffer is a programming error.
pub fn construct_header(buf: &mut [u8], cmd: WireCommand) -> usize {
    assert!(
        buf.len() >= HEADER_LEN,
        "header needs {HEADER_LEN} bytes, buffer has {}",
        buf.len()
    );
    buf[..PREAMBLE_LEN].copy_from_slice(&PREAMBLE);
    buf[CMD_CODE_START] = cmd.code();
    HEADER_LEN
}

/// Build a complete frame from a command and its payload
pub fn build_frame(cmd: WireCommand, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; HEADER_LEN];
    construct_header(&mut frame, cmd);
    frame.extend_from_slice(payload);
    frame
}

/// Command byte of a frame that passed [`check_header`]
pub fn frame_command(bytes: &[u8]) -> Option<u8> {
    check_header(bytes).then(|| bytes[CMD_CODE_START])
}

/// Payload slice of a frame that passed [`check_header`]
pub fn frame_payload(bytes: &[u8]) -> &[u8] {
    bytes.get(PAYLOAD_START..).unwrap_or(&[])
}

// ----------------------------------------------------------------------------
// Byte order helpers
// ----------------------------------------------------------------------------

/// Host u16 to wire (big-endian) bytes
pub fn htobe16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Wire (big-endian) bytes to host u16
pub fn betoh16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// Host u32 to wire (big-endian) bytes
pub fn htobe32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Wire (big-endian) bytes to host u32
pub fn betoh32(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Host u16 to little-endian bytes, used for radio address fields
pub fn htole16(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

/// Read a big-endian u16 from the start of a slice
pub fn read_be16(bytes: &[u8]) -> Option<u16> {
    let head: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
    Some(betoh16(head))
}

/// Read a big-endian u32 from the start of a slice
pub fn read_be32(bytes: &[u8]) -> Option<u32> {
    let head: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(betoh32(head))
}

// ----------------------------------------------------------------------------
// Wire commands
// ----------------------------------------------------------------------------

/// Over-the-air command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum WireCommand {
    Ping = 0x00,
    Ack = 0x01,
    SetChannel = 0x02,
    SetPower = 0x03,
    GetPower = 0x04,
    GetPowerResponse = 0x05,
    Stream = 0x06,
    StartRxTest = 0x07,
    EndRxTest = 0x08,
    Report = 0x09,
    GetHardwareVersion = 0x0A,
    GetHardwareVersionResponse = 0x0B,
    GetSoftwareVersion = 0x0C,
    GetSoftwareVersionResponse = 0x0D,
    ChangeMode = 0x0E,
    SetAntenna = 0x0F,
    SetTxAntenna = 0x10,
    SetRxAntenna = 0x11,
    GetTxAntenna = 0x12,
    GetRxAntenna = 0x13,
    GetLastBestRxAntenna = 0x14,
    GetAntennaResponse = 0x15,
}

impl WireCommand {
    /// Every wire command, in code order
    pub const ALL: [WireCommand; 22] = [
        WireCommand::Ping,
        WireCommand::Ack,
        WireCommand::SetChannel,
        WireCommand::SetPower,
        WireCommand::GetPower,
        WireCommand::GetPowerResponse,
        WireCommand::Stream,
        WireCommand::StartRxTest,
        WireCommand::EndRxTest,
        WireCommand::Report,
        WireCommand::GetHardwareVersion,
        WireCommand::GetHardwareVersionResponse,
        WireCommand::GetSoftwareVersion,
        WireCommand::GetSoftwareVersionResponse,
        WireCommand::ChangeMode,
        WireCommand::SetAntenna,
        WireCommand::SetTxAntenna,
        WireCommand::SetRxAntenna,
        WireCommand::GetTxAntenna,
        WireCommand::GetRxAntenna,
        WireCommand::GetLastBestRxAntenna,
        WireCommand::GetAntennaResponse,
    ];

    /// The command byte
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Payload length this command carries on the wire
    pub fn payload_len(self) -> usize {
        match self {
            WireCommand::SetChannel | WireCommand::ChangeMode => 4,
            WireCommand::Stream => 2,
            WireCommand::Report => REPORT_PAYLOAD_LEN,
            WireCommand::SetPower
            | WireCommand::GetPowerResponse
            | WireCommand::GetHardwareVersionResponse
            | WireCommand::GetSoftwareVersionResponse
            | WireCommand::SetAntenna
            | WireCommand::SetTxAntenna
            | WireCommand::SetRxAntenna
            | WireCommand::GetAntennaResponse => 1,
            WireCommand::Ping
            | WireCommand::Ack
            | WireCommand::GetPower
            | WireCommand::StartRxTest
            | WireCommand::EndRxTest
            | WireCommand::GetHardwareVersion
            | WireCommand::GetSoftwareVersion
            | WireCommand::GetTxAntenna
            | WireCommand::GetRxAntenna
            | WireCommand::GetLastBestRxAntenna => 0,
        }
    }

    /// Total frame length for this command
    pub fn frame_len(self) -> usize {
        HEADER_LEN + self.payload_len()
    }
}

impl TryFrom<u8> for WireCommand {
    type Error = ParseError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        WireCommand::ALL
            .get(code as usize)
            .copied()
            .ok_or(ParseError::UnknownWireCommand(code))
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}(0x{:02X})", self.code())
    }
}

// ----------------------------------------------------------------------------
// RX test report
// ----------------------------------------------------------------------------

/// Result of an RX statistics test, as carried by a report frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RxReport {
    /// Packets received
    pub total_pkts: u32,
    /// Packets received that carried a protocol preamble
    pub proto_pkts: u32,
    /// Sum of LQI over received packets
    pub total_lqi: u32,
    /// Sum of RSSI magnitudes over received packets
    pub total_rssi: u32,
}

impl RxReport {
    /// Encode as the 16-byte wire payload
    pub fn to_payload(&self) -> [u8; REPORT_PAYLOAD_LEN] {
        let mut out = [0u8; REPORT_PAYLOAD_LEN];
        out[0..4].copy_from_slice(&htobe32(self.total_pkts));
        out[4..8].copy_from_slice(&htobe32(self.proto_pkts));
        out[8..12].copy_from_slice(&htobe32(self.total_lqi));
        out[12..16].copy_from_slice(&htobe32(self.total_rssi));
        out
    }

    /// Decode a 16-byte wire payload
    pub fn from_payload(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < REPORT_PAYLOAD_LEN {
            return Err(ParseError::Truncated {
                needed: REPORT_PAYLOAD_LEN,
                actual: bytes.len(),
            });
        }
        let field = |offset: usize| read_be32(&bytes[offset..]).unwrap_or_default();
        Ok(Self {
            total_pkts: field(0),
            proto_pkts: field(4),
            total_lqi: field(8),
            total_rssi: field(12),
        })
    }
}
