//! Parsed beacon frames as handed to the tracker.
//!
//! An [`Observation`] is one advertisement frame after upstream parsing. Frames
//! from service-UUID based beacons (Eddystone and friends) are spread over
//! several advertisements: identity frames carry the beacon identifiers, and
//! "data-only" frames (telemetry) carry supplementary fields that belong to
//! whichever identity frames share the same MAC and service UUID.
//!
//! Observations are built through [`ObservationBuilder`], which is where
//! malformed input is rejected. Nothing past the builder can fail.

use core::fmt;

use thiserror::Error;

use crate::comm::format_mac;
use crate::protocol::{MacString, NameString};

/// Maximum number of identifiers on a single frame
pub const MAX_IDENTIFIERS: usize = 3;

/// Maximum byte length of a single identifier (a 128-bit UUID)
pub const MAX_IDENTIFIER_LEN: usize = 16;

/// Maximum number of primary or supplementary data fields
pub const MAX_DATA_FIELDS: usize = 8;

/// Raw identifier bytes, big-endian as broadcast.
pub type Identifier = heapless::Vec<u8, MAX_IDENTIFIER_LEN>;

/// Numeric data fields decoded from a frame (battery, temperature, counters...)
pub type DataFields = heapless::Vec<u64, MAX_DATA_FIELDS>;

/// Stable hash identifying "the same logical beacon".
///
/// Derived from the beacon type code and identifiers (and optionally the
/// MAC). Deterministic across runs, so replaying a capture reproduces the
/// same tracked set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityHash(pub u32);

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Correlates the frames of one multi-frame transmission: same transmitter,
/// same service UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub address: MacString,
    pub service_uuid: u16,
}

impl GroupKey {
    pub fn new(address: &MacString, service_uuid: u16) -> Self {
        Self {
            address: address.clone(),
            service_uuid,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:04x}", self.address, self.service_uuid)
    }
}

/// Why an [`ObservationBuilder`] refused to build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("observation has no transmitter address")]
    MissingAddress,

    #[error("invalid MAC address: {0:?}")]
    InvalidAddress(String),

    #[error("too many identifiers (max {max})", max = MAX_IDENTIFIERS)]
    TooManyIdentifiers,

    /// Index of the offending identifier
    #[error("identifier {0} exceeds {max} bytes", max = MAX_IDENTIFIER_LEN)]
    IdentifierTooLong(usize),

    #[error("too many data fields (max {max})", max = MAX_DATA_FIELDS)]
    TooManyDataFields,

    #[error("device name exceeds 32 bytes")]
    NameTooLong,
}

/// One parsed advertisement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    identity: IdentityHash,
    address: MacString,
    service_uuid: Option<u16>,
    beacon_type: u16,
    identifiers: heapless::Vec<Identifier, MAX_IDENTIFIERS>,
    rssi: i8,
    tx_power: i8,
    name: NameString,
    data_fields: DataFields,
    extra_data_fields: DataFields,
    data_only: bool,
}

impl Observation {
    pub fn builder() -> ObservationBuilder {
        ObservationBuilder::new()
    }

    pub fn identity(&self) -> IdentityHash {
        self.identity
    }

    /// Transmitter MAC, `AA:BB:CC:DD:EE:FF`.
    pub fn address(&self) -> &MacString {
        &self.address
    }

    /// Service UUID of a multi-frame beacon, `None` for single-frame beacons.
    pub fn service_uuid(&self) -> Option<u16> {
        self.service_uuid
    }

    pub fn beacon_type(&self) -> u16 {
        self.beacon_type
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    pub fn tx_power(&self) -> i8 {
        self.tx_power
    }

    pub fn name(&self) -> &NameString {
        &self.name
    }

    pub fn data_fields(&self) -> &DataFields {
        &self.data_fields
    }

    /// Supplementary fields merged in from data-only frames.
    pub fn extra_data_fields(&self) -> &DataFields {
        &self.extra_data_fields
    }

    /// True when this frame carries only supplementary data (e.g. telemetry)
    pub fn is_data_only(&self) -> bool {
        self.data_only
    }

    /// The group this frame belongs to, if it is part of a multi-frame beacon.
    pub fn group_key(&self) -> Option<GroupKey> {
        self.service_uuid
            .map(|uuid| GroupKey::new(&self.address, uuid))
    }

    pub(crate) fn set_rssi(&mut self, rssi: i8) {
        self.rssi = rssi;
    }

    pub(crate) fn set_extra_data_fields(&mut self, fields: DataFields) {
        self.extra_data_fields = fields;
    }
}

/// Builds and validates an [`Observation`].
///
/// Setters never fail; all validation happens in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct ObservationBuilder {
    address: Option<String>,
    service_uuid: Option<u16>,
    beacon_type: u16,
    identifiers: Vec<Vec<u8>>,
    rssi: i8,
    tx_power: i8,
    name: String,
    data_fields: Vec<u64>,
    extra_data_fields: Vec<u64>,
    data_only: bool,
    distinguish_by_address: bool,
}

impl ObservationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmitter address as text, `aa:bb:cc:dd:ee:ff` in either case.
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Transmitter address as raw bytes.
    pub fn address_bytes(mut self, mac: [u8; 6]) -> Self {
        self.address = Some(format_mac(&mac).as_str().into());
        self
    }

    pub fn service_uuid(mut self, uuid: u16) -> Self {
        self.service_uuid = Some(uuid);
        self
    }

    pub fn beacon_type(mut self, code: u16) -> Self {
        self.beacon_type = code;
        self
    }

    pub fn identifier(mut self, bytes: &[u8]) -> Self {
        self.identifiers.push(bytes.to_vec());
        self
    }

    pub fn rssi(mut self, rssi: i8) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn tx_power(mut self, tx_power: i8) -> Self {
        self.tx_power = tx_power;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    pub fn data_fields(mut self, fields: &[u64]) -> Self {
        self.data_fields = fields.to_vec();
        self
    }

    pub fn extra_data_fields(mut self, fields: &[u64]) -> Self {
        self.extra_data_fields = fields.to_vec();
        self
    }

    pub fn data_only(mut self, data_only: bool) -> Self {
        self.data_only = data_only;
        self
    }

    /// Include the MAC in the identity hash, so two transmitters sharing
    /// identifiers are tracked separately.
    pub fn distinguish_by_address(mut self, enabled: bool) -> Self {
        self.distinguish_by_address = enabled;
        self
    }

    pub fn build(self) -> Result<Observation, ObservationError> {
        let raw = self.address.ok_or(ObservationError::MissingAddress)?;
        let mac = parse_mac(&raw).ok_or_else(|| ObservationError::InvalidAddress(raw.clone()))?;
        let address = format_mac(&mac);

        if self.identifiers.len() > MAX_IDENTIFIERS {
            return Err(ObservationError::TooManyIdentifiers);
        }
        let mut identifiers: heapless::Vec<Identifier, MAX_IDENTIFIERS> = heapless::Vec::new();
        for (i, bytes) in self.identifiers.iter().enumerate() {
            let id = Identifier::from_slice(bytes)
                .map_err(|_| ObservationError::IdentifierTooLong(i))?;
            let _ = identifiers.push(id);
        }

        let mut name = NameString::new();
        name.push_str(&self.name)
            .map_err(|_| ObservationError::NameTooLong)?;

        let data_fields = to_data_fields(&self.data_fields)?;
        let extra_data_fields = to_data_fields(&self.extra_data_fields)?;

        let identity = identity_hash(
            self.beacon_type,
            &identifiers,
            self.distinguish_by_address.then_some(&address),
        );

        Ok(Observation {
            identity,
            address,
            service_uuid: self.service_uuid,
            beacon_type: self.beacon_type,
            identifiers,
            rssi: self.rssi,
            tx_power: self.tx_power,
            name,
            data_fields,
            extra_data_fields,
            data_only: self.data_only,
        })
    }
}

fn to_data_fields(fields: &[u64]) -> Result<DataFields, ObservationError> {
    DataFields::from_slice(fields).map_err(|_| ObservationError::TooManyDataFields)
}

/// Parse "AA:BB:CC:DD:EE:FF" (either case) into raw bytes.
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

// ── Identity hash (FNV-1a, 32-bit) ─────────────────────────────────────

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

struct Fnv1a(u32);

impl Fnv1a {
    const fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u32;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Hash the beacon type and identifiers (length-prefixed, so `[1,2],[3]`
/// and `[1],[2,3]` differ), plus the MAC when given.
fn identity_hash(beacon_type: u16, identifiers: &[Identifier], address: Option<&MacString>) -> IdentityHash {
    let mut h = Fnv1a::new();
    h.write(&beacon_type.to_le_bytes());
    for id in identifiers {
        h.write(&[id.len() as u8]);
        h.write(id);
    }
    if let Some(addr) = address {
        h.write(addr.as_bytes());
    }
    IdentityHash(h.0)
}
