//! Replies sent from the CMD device to the host

use std::fmt;

use crate::proto::RxReport;

/// A reply line for the host
///
/// Replies are rendered with [`fmt::Display`] and sent with a line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HostResponse {
    /// DUT answered a ping or channel switch
    Ack,
    /// DUT did not answer in time
    NoAck,
    /// Host command slot is busy with a long-running command
    Busy,
    /// Current local channel
    Channel(u8),
    /// Power read back locally or from the DUT
    Power(i8),
    /// DUT did not answer a power query
    PowerError,
    /// DUT RX test report
    RxTest(RxReport),
    /// DUT did not answer the end of an RX test
    RxTestError,
    /// DUT found on a channel
    Find(u8),
    /// Sweep finished without an answer
    FindTimeout,
    /// DUT hardware version
    HardwareVersion(u8),
    /// DUT did not answer a hardware version query
    HardwareVersionError,
    /// DUT software version
    SoftwareVersion(u8),
    /// DUT did not answer a software version query
    SoftwareVersionError,
    /// Antenna read back locally or from the DUT
    Antenna(u8),
    /// DUT did not answer an antenna query
    AntennaError,
    /// CCA result, true when the channel is free
    CcaDone(bool),
    /// CCA could not be performed
    CcaFailed,
    /// Energy detection result
    EdDetected(u8),
    /// Energy detection could not be performed
    EdFailed,
    /// RSSI measurement result
    RssiDone(i8),
    /// RSSI measurement could not be performed
    RssiFailed,
    /// LQI of the first packet received
    LqiDone(u8),
    /// No packet received while waiting for LQI
    LqiFailed,
    /// Packet received during `lstart`
    NewPacket {
        /// PSDU bytes
        psdu: Vec<u8>,
        /// RSSI of the packet
        rssi: i8,
        /// LQI of the packet
        lqi: u8,
    },
    /// Receive error during `lstart`
    RxFailed(u8),
    /// Statistics collected between `lstart` and `lend`
    LocalStats(RxReport),
    /// Number of acknowledged frames during `ltx`
    LtxAck(u32),
    /// Frame send error during `ltx`
    LtxFailed(u8),
    /// GPIO value
    Gpio(u8),
    /// GPIO could not be read
    GpioError,
    /// DC/DC converter state
    Dcdc(bool),
    /// Instruction cache state
    Icache(bool),
    /// Die temperature in degrees Celsius
    Temperature(i32),
}

impl fmt::Display for HostResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostResponse::Ack => f.write_str("ACK"),
            HostResponse::NoAck => f.write_str("NO ACK"),
            HostResponse::Busy => f.write_str("BUSY"),
            HostResponse::Channel(ch) => write!(f, "channel: {ch}"),
            HostResponse::Power(dbm) => write!(f, "power: {dbm} dBm"),
            HostResponse::PowerError => f.write_str("power: no response"),
            HostResponse::RxTest(r) | HostResponse::LocalStats(r) => write!(
                f,
                "packets: {} protocol packets: {} lqi: {} rssi: {}",
                r.total_pkts, r.proto_pkts, r.total_lqi, r.total_rssi
            ),
            HostResponse::RxTestError => f.write_str("rx test: no response"),
            HostResponse::Find(ch) => write!(f, "DUT found on channel {ch}"),
            HostResponse::FindTimeout => f.write_str("DUT not found"),
            HostResponse::HardwareVersion(v) => write!(f, "hardware version: {v}"),
            HostResponse::HardwareVersionError => f.write_str("hardware version: no response"),
            HostResponse::SoftwareVersion(v) => write!(f, "software version: {v}"),
            HostResponse::SoftwareVersionError => f.write_str("software version: no response"),
            HostResponse::Antenna(a) => write!(f, "antenna: {a}"),
            HostResponse::AntennaError => f.write_str("antenna: no response"),
            HostResponse::CcaDone(free) => write!(f, "cca: {}", u8::from(*free)),
            HostResponse::CcaFailed => f.write_str("cca: failed"),
            HostResponse::EdDetected(v) => write!(f, "ed: {v}"),
            HostResponse::EdFailed => f.write_str("ed: failed"),
            HostResponse::RssiDone(v) => write!(f, "rssi: {v}"),
            HostResponse::RssiFailed => f.write_str("rssi: failed"),
            HostResponse::LqiDone(v) => write!(f, "lqi: {v}"),
            HostResponse::LqiFailed => f.write_str("lqi: failed"),
            HostResponse::NewPacket { psdu, rssi, lqi } => {
                write!(f, "rx: rssi {rssi} lqi {lqi} len {} data ", psdu.len())?;
                for b in psdu {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            HostResponse::RxFailed(err) => write!(f, "rx: failed {err}"),
            HostResponse::LtxAck(n) => write!(f, "ack: {n}"),
            HostResponse::LtxFailed(err) => write!(f, "tx: failed {err}"),
            HostResponse::Gpio(v) => write!(f, "gpio: {v}"),
            HostResponse::GpioError => f.write_str("gpio: error"),
            HostResponse::Dcdc(on) => write!(f, "dcdc: {}", u8::from(*on)),
            HostResponse::Icache(on) => write!(f, "icache: {}", u8::from(*on)),
            HostResponse::Temperature(t) => write!(f, "temperature: {t}"),
        }
    }
}
