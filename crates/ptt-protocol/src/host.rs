//! Host text command protocol
//!
//! The host drives the CMD device with ASCII lines of the form
//! `custom <name> <args...>`. Each command declares how its arguments are
//! treated: a fixed number of single-byte fields, one 16 or 32-bit field
//! (stored big-endian), or raw text that the command handler parses itself.

use std::fmt;

use tracing::trace;

use crate::error::ParseError;
use crate::proto::{htobe16, htobe32};

/// Keyword every host line starts with
pub const LINE_PREFIX: &str = "custom";

/// How a command's arguments are parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    /// No arguments
    None,
    /// A fixed number of single-byte fields
    Bytes(usize),
    /// One 16-bit field, stored big-endian
    Word16,
    /// One 32-bit field, stored big-endian
    Word32,
    /// Passed through as text for command-specific parsing
    Raw,
}

macro_rules! host_commands {
    ($($variant:ident => $name:literal, $spec:expr;)*) => {
        /// Host commands understood by the CMD device
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum HostCommand {
            $($variant,)*
        }

        impl HostCommand {
            /// Every host command, in table order
            pub const ALL: &'static [HostCommand] = &[$(HostCommand::$variant,)*];

            /// Command name as typed by the host
            pub fn name(self) -> &'static str {
                match self {
                    $(HostCommand::$variant => $name,)*
                }
            }

            /// Argument layout
            pub fn args(self) -> ArgSpec {
                match self {
                    $(HostCommand::$variant => $spec,)*
                }
            }

            /// Look up a command by name
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(HostCommand::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

host_commands! {
    SetChannel => "setchannel", ArgSpec::Word32;
    RSetChannel => "rsetchannel", ArgSpec::Bytes(1);
    LSetChannel => "lsetchannel", ArgSpec::Word32;
    LGetChannel => "lgetchannel", ArgSpec::None;
    LSetPower => "lsetpower", ArgSpec::Raw;
    RSetPower => "rsetpower", ArgSpec::Raw;
    LGetPower => "lgetpower", ArgSpec::None;
    RGetPower => "rgetpower", ArgSpec::None;
    RStream => "rstream", ArgSpec::Word16;
    RStart => "rstart", ArgSpec::None;
    REnd => "rend", ArgSpec::None;
    LReboot => "lreboot", ArgSpec::None;
    Find => "find", ArgSpec::None;
    RHardware => "rhardware", ArgSpec::None;
    RSoftware => "rsoftware", ArgSpec::None;
    RPing => "rping", ArgSpec::None;
    LPingTimeout => "lpingtimeout", ArgSpec::Word16;
    LGetCca => "lgetcca", ArgSpec::Bytes(1);
    LSetCca => "lsetcca", ArgSpec::Bytes(1);
    LGetEd => "lgeted", ArgSpec::None;
    LGetRssi => "lgetrssi", ArgSpec::None;
    LSetPanId => "lsetpanid", ArgSpec::Raw;
    LSetExtended => "lsetextended", ArgSpec::Raw;
    LSetShort => "lsetshort", ArgSpec::Raw;
    LSetPayload => "lsetpayload", ArgSpec::Raw;
    LStart => "lstart", ArgSpec::None;
    LEnd => "lend", ArgSpec::None;
    LGetLqi => "lgetlqi", ArgSpec::None;
    LSetAntenna => "lsetantenna", ArgSpec::Bytes(1);
    LSetTxAntenna => "lsettxantenna", ArgSpec::Bytes(1);
    LSetRxAntenna => "lsetrxantenna", ArgSpec::Bytes(1);
    LGetTxAntenna => "lgettxantenna", ArgSpec::None;
    LGetRxAntenna => "lgetrxantenna", ArgSpec::None;
    LGetBestRxAntenna => "lgetbestrxantenna", ArgSpec::None;
    RSetAntenna => "rsetantenna", ArgSpec::Bytes(1);
    RSetTxAntenna => "rsettxantenna", ArgSpec::Bytes(1);
    RSetRxAntenna => "rsetrxantenna", ArgSpec::Bytes(1);
    RGetTxAntenna => "rgettxantenna", ArgSpec::None;
    RGetRxAntenna => "rgetrxantenna", ArgSpec::None;
    RGetBestRxAntenna => "rgetbestrxantenna", ArgSpec::None;
    LTx => "ltx", ArgSpec::Raw;
    LTxEnd => "ltxend", ArgSpec::None;
    LClk => "lclk", ArgSpec::Bytes(2);
    LSetGpio => "lsetgpio", ArgSpec::Bytes(2);
    LGetGpio => "lgetgpio", ArgSpec::Bytes(1);
    LCarrier => "lcarrier", ArgSpec::Raw;
    LStream => "lstream", ArgSpec::Raw;
    LSetDcdc => "lsetdcdc", ArgSpec::Bytes(1);
    LGetDcdc => "lgetdcdc", ArgSpec::None;
    LSetIcache => "lseticache", ArgSpec::Bytes(1);
    LGetIcache => "lgeticache", ArgSpec::None;
    LGetTemp => "lgettemp", ArgSpec::None;
    LIndication => "lindication", ArgSpec::Bytes(1);
    LSleep => "lsleep", ArgSpec::None;
    LReceive => "lreceive", ArgSpec::None;
    ChangeMode => "changemode", ArgSpec::Bytes(1);
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A host line after tokenizing and fixed-argument parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLine {
    /// Which command
    pub command: HostCommand,
    /// Fixed arguments as bytes (empty for raw commands)
    pub args: Vec<u8>,
    /// Raw argument text (empty unless the command takes raw arguments)
    pub raw: String,
}

/// Parse a host line into a command and its arguments
pub fn parse_line(line: &str) -> Result<HostLine, ParseError> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some(LINE_PREFIX) {
        return Err(ParseError::MissingPrefix);
    }
    let name = tokens.next().ok_or(ParseError::MissingPrefix)?;
    let command =
        HostCommand::from_name(name).ok_or_else(|| ParseError::UnknownCommand(name.into()))?;
    let rest: Vec<&str> = tokens.collect();

    let mut parsed = HostLine {
        command,
        args: Vec::new(),
        raw: String::new(),
    };

    match command.args() {
        ArgSpec::None => expect_count(&rest, 0)?,
        ArgSpec::Bytes(n) => {
            expect_count(&rest, n)?;
            parsed.args = rest
                .iter()
                .map(|t| parse_byte(t))
                .collect::<Result<_, _>>()?;
        }
        ArgSpec::Word16 => {
            expect_count(&rest, 1)?;
            parsed.args = htobe16(parse_u16(rest[0])?).to_vec();
        }
        ArgSpec::Word32 => {
            expect_count(&rest, 1)?;
            parsed.args = htobe32(parse_u32(rest[0])?).to_vec();
        }
        ArgSpec::Raw => parsed.raw = rest.join(" "),
    }

    trace!("host line {} args {:02X?} raw {:?}", command, parsed.args, parsed.raw);
    Ok(parsed)
}

fn expect_count(tokens: &[&str], expected: usize) -> Result<(), ParseError> {
    if tokens.len() != expected {
        return Err(ParseError::ArgumentCount {
            expected,
            actual: tokens.len(),
        });
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Numbers
// ----------------------------------------------------------------------------

/// Digits after a `0x` prefix; `None` unless they are all hex digits
fn hex_body(token: &str) -> Option<&str> {
    token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .filter(|body| !body.is_empty() && body.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Parse a decimal or 0x-prefixed hex integer
pub fn parse_number(token: &str) -> Result<i64, ParseError> {
    let invalid = || ParseError::InvalidNumber(token.into());
    match hex_body(token) {
        Some(body) => i64::from_str_radix(body, 16).map_err(|_| invalid()),
        None => token.parse::<i64>().map_err(|_| invalid()),
    }
}

fn parse_ranged(token: &str, min: i64, max: i64) -> Result<i64, ParseError> {
    let value = parse_number(token)?;
    if value < min || value > max {
        return Err(ParseError::OutOfRange(token.into()));
    }
    Ok(value)
}

/// Single-byte field; accepts -128..=255 and stores negatives as two's complement
pub fn parse_byte(token: &str) -> Result<u8, ParseError> {
    let value = parse_ranged(token, i8::MIN as i64, u8::MAX as i64)?;
    Ok(if value < 0 { value as i8 as u8 } else { value as u8 })
}

/// Parse a u8
pub fn parse_u8(token: &str) -> Result<u8, ParseError> {
    Ok(parse_ranged(token, 0, u8::MAX as i64)? as u8)
}

/// Parse an i8
pub fn parse_i8(token: &str) -> Result<i8, ParseError> {
    Ok(parse_ranged(token, i8::MIN as i64, i8::MAX as i64)? as i8)
}

/// Parse a u16
pub fn parse_u16(token: &str) -> Result<u16, ParseError> {
    Ok(parse_ranged(token, 0, u16::MAX as i64)? as u16)
}

/// Parse a u32
pub fn parse_u32(token: &str) -> Result<u32, ParseError> {
    Ok(parse_ranged(token, 0, u32::MAX as i64)? as u32)
}

/// Parse an i32
pub fn parse_i32(token: &str) -> Result<i32, ParseError> {
    Ok(parse_ranged(token, i32::MIN as i64, i32::MAX as i64)? as i32)
}

/// Decode a `0x`-prefixed hex string into bytes
pub fn parse_hex_string(token: &str) -> Result<Vec<u8>, ParseError> {
    let invalid = || ParseError::InvalidHex(token.into());
    let body = hex_body(token).ok_or_else(invalid)?;
    if body.len() % 2 != 0 {
        return Err(invalid());
    }
    (0..body.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&body[i..i + 2], 16).map_err(|_| invalid()))
        .collect()
}

// ----------------------------------------------------------------------------
// Raw argument formats
// ----------------------------------------------------------------------------

fn split_exact<'a>(raw: &'a str, expected: usize) -> Result<Vec<&'a str>, ParseError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    expect_count(&tokens, expected)?;
    Ok(tokens)
}

/// Parse a 16-bit address written as exactly `0xHHHH`
///
/// Used for both PAN id and short address.
pub fn parse_address16(raw: &str) -> Result<u16, ParseError> {
    let tokens = split_exact(raw, 1)?;
    let token = tokens[0];
    match hex_body(token) {
        Some(body) if body.len() == 4 => {
            u16::from_str_radix(body, 16).map_err(|_| ParseError::InvalidHex(token.into()))
        }
        _ => Err(ParseError::InvalidHex(token.into())),
    }
}

/// Parse an extended address written as `0x` plus 16 hex digits
///
/// The result is in over-the-air (little-endian) byte order.
pub fn parse_extended_address(raw: &str) -> Result<[u8; 8], ParseError> {
    let tokens = split_exact(raw, 1)?;
    let bytes = parse_hex_string(tokens[0])?;
    let mut addr: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ParseError::InvalidHex(tokens[0].into()))?;
    addr.reverse();
    Ok(addr)
}

/// Arguments of `lsetpower`/`rsetpower`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerArgs {
    /// Mode field, two bytes on the command line
    pub mode: u16,
    /// Transmit power in dBm
    pub power: i8,
}

/// Parse `<mode-hi> <mode-lo> <power>`
pub fn parse_power(raw: &str) -> Result<PowerArgs, ParseError> {
    let tokens = split_exact(raw, 3)?;
    let hi = parse_byte(tokens[0])?;
    let lo = parse_byte(tokens[1])?;
    Ok(PowerArgs {
        mode: u16::from_be_bytes([hi, lo]),
        power: parse_i8(tokens[2])?,
    })
}

/// Parse `<len> <hex>` into a custom payload of at most `max_len` bytes
pub fn parse_payload(raw: &str, max_len: usize) -> Result<Vec<u8>, ParseError> {
    let tokens = split_exact(raw, 2)?;
    let declared = parse_u8(tokens[0])? as usize;
    if declared > max_len {
        return Err(ParseError::OutOfRange(tokens[0].into()));
    }
    let payload = parse_hex_string(tokens[1])?;
    if payload.len() != declared {
        return Err(ParseError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

/// Arguments of `ltx`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtxArgs {
    /// Number of frames to send, 0 for no limit
    pub repeats: u8,
    /// Delay between frames in milliseconds
    pub timeout_ms: u16,
}

/// Parse `[repeats timeout]`, falling back to `defaults` when empty
pub fn parse_ltx(raw: &str, defaults: LtxArgs) -> Result<LtxArgs, ParseError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    match tokens.as_slice() {
        [] => Ok(defaults),
        [repeats, timeout] => Ok(LtxArgs {
            repeats: parse_u8(repeats)?,
            timeout_ms: parse_u16(timeout)?,
        }),
        _ => Err(ParseError::ArgumentCount {
            expected: 2,
            actual: tokens.len(),
        }),
    }
}

/// Arguments of `lcarrier`/`lstream`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformArgs {
    /// Emission time per cycle in milliseconds
    pub pulse_ms: i32,
    /// Idle time per cycle in milliseconds
    pub interval_ms: i32,
    /// Total run time in milliseconds, 0 for no limit
    pub duration_ms: i32,
}

/// Parse `<pulse> <interval> <duration>`
pub fn parse_waveform(raw: &str) -> Result<WaveformArgs, ParseError> {
    let tokens = split_exact(raw, 3)?;
    Ok(WaveformArgs {
        pulse_ms: parse_i32(tokens[0])?,
        interval_ms: parse_i32(tokens[1])?,
        duration_ms: parse_i32(tokens[2])?,
    })
}
