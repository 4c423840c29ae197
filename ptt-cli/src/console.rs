//! Host console helpers

use ptt_protocol::{ArgSpec, HostCommand, LINE_PREFIX};

/// Turn a typed line into the host line sent to the CMD device
///
/// Blank lines and `#` comments yield `None`. The `custom` keyword may be
/// left out.
pub fn normalize_line(input: &str) -> Option<String> {
    let line = input.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.split_whitespace().next() {
        Some(LINE_PREFIX) => Some(line.to_string()),
        _ => Some(format!("{} {}", LINE_PREFIX, line)),
    }
}

fn usage(cmd: HostCommand) -> String {
    let args = match cmd.args() {
        ArgSpec::None => String::new(),
        ArgSpec::Bytes(1) => " <byte>".to_string(),
        ArgSpec::Bytes(n) => format!(" <byte> x{}", n),
        ArgSpec::Word16 => " <u16>".to_string(),
        ArgSpec::Word32 => " <u32>".to_string(),
        ArgSpec::Raw => " <args...>".to_string(),
    };
    format!("{}{}", cmd.name(), args)
}

/// One usage line per host command, in table order
pub fn command_list() -> Vec<String> {
    HostCommand::ALL.iter().map(|&cmd| usage(cmd)).collect()
}
