//! Serialization helpers shared by everything that emits NDJSON.
//!
//! Tracked beacons are streamed as newline-delimited JSON; these helpers
//! turn a [`DeviceMessage`] into a ready-to-send line and format the
//! string fields that go into one.

use core::fmt::Write;

use crate::observation::{Identifier, Observation, MAX_IDENTIFIERS};
use crate::protocol::{
    DeviceMessage, IdString, MacString, MsgBuffer, UuidString, MAX_MSG_LEN,
};

/// Bluetooth base UUID suffix for 16-bit service UUIDs
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written including the NDJSON newline, or None
/// if the message plus newline does not fit.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    let len = serde_json_core::to_slice(msg, buf).ok()?;
    // Append newline for NDJSON
    let newline = buf.get_mut(len)?;
    *newline = b'\n';
    Some(len + 1)
}

/// Serialize a DeviceMessage into an owned, right-sized message buffer.
pub fn encode_message(msg: &DeviceMessage) -> Option<MsgBuffer> {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok()?;
    let len = serialize_message(msg, &mut buf)?;
    buf.truncate(len);
    Some(buf)
}

/// Encode a tracked observation as a `beacon` message line.
pub fn encode_observation(obs: &Observation, ts: u32) -> Option<MsgBuffer> {
    let uuid = obs.service_uuid().map(format_service_uuid);

    let mut ids = heapless::Vec::<IdString, MAX_IDENTIFIERS>::new();
    for id in obs.identifiers() {
        let _ = ids.push(format_identifier(id));
    }

    let msg = DeviceMessage::Beacon {
        mac: obs.address(),
        name: obs.name(),
        rssi: obs.rssi(),
        tx: obs.tx_power(),
        uuid: uuid.as_ref(),
        ids: &ids,
        data: obs.data_fields(),
        extra: obs.extra_data_fields(),
        ts,
    };
    encode_message(&msg)
}

/// Format a 6-byte MAC address into "AA:BB:CC:DD:EE:FF" string
pub fn format_mac(mac: &[u8; 6]) -> MacString {
    let mut buf = MacString::new();
    let _ = write!(
        buf,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    buf
}

/// Lowercase hex, no separators.
pub fn format_identifier(id: &Identifier) -> IdString {
    let mut s = IdString::new();
    for b in id.iter() {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Expand a 16-bit service UUID against the Bluetooth base UUID.
pub fn format_service_uuid(uuid: u16) -> UuidString {
    let mut s = UuidString::new();
    let _ = write!(s, "0000{:04x}{}", uuid, BASE_UUID_SUFFIX);
    s
}
