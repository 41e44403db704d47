//! JSON message protocol for reporting tracked beacons.
//!
//! All messages are newline-delimited JSON (NDJSON).
//! Uses `heapless` types so message building never allocates.

use heapless::{String, Vec};
use serde::Serialize;

use crate::observation::MAX_IDENTIFIERS;

/// Maximum length for MAC address strings ("AA:BB:CC:DD:EE:FF")
pub type MacString = String<18>;

/// Maximum length for device name strings
pub type NameString = String<33>;

/// Maximum length for UUID strings
pub type UuidString = String<37>;

/// Lowercase hex rendering of one identifier (up to 16 bytes)
pub type IdString = String<33>;

/// Messages sent to the consumer of tracked beacons
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// A beacon record ready to report, with merged supplementary fields
    #[serde(rename = "beacon")]
    Beacon {
        mac: &'a MacString,
        name: &'a NameString,
        rssi: i8,
        /// Calibrated transmit power
        tx: i8,
        /// Service UUID of a multi-frame beacon
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<&'a UuidString>,
        /// Beacon identifiers, hex encoded
        ids: &'a Vec<IdString, MAX_IDENTIFIERS>,
        data: &'a [u64],
        /// Supplementary fields merged from data-only frames
        extra: &'a [u64],
        /// Milliseconds since the relay started
        ts: u32,
    },
    /// Tracker status report
    #[serde(rename = "status")]
    Status {
        /// Distinct identities tracked
        tracked: u32,
        /// Multi-frame groups seen
        groups: u32,
        /// Uptime in seconds
        uptime: u32,
        version: &'static str,
    },
}

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 768;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;
