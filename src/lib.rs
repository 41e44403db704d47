//! beacontrack — tracking and field merging for multi-frame BLE beacons.
//!
//! Beacons that use a service UUID (Eddystone and similar) spread one
//! device's state over several advertisements: identity frames carry the
//! identifiers, data-only frames carry telemetry. This crate keeps track of
//! every beacon it has seen and merges those frames into one record that can
//! be reported onward.
//!
//! Radio access and advertisement parsing live upstream; this crate starts at
//! a parsed [`Observation`] and ends at an NDJSON line.
//!
//! - `observation`: the parsed frame, its builder and identity hash
//! - `tracker`: the thread-safe tracked set and the merge rules
//! - `protocol`, `comm`: NDJSON messages and serialization helpers
//! - `relay`: thread loop tying a scan channel to an output channel

pub mod comm;
pub mod observation;
pub mod protocol;
pub mod relay;
pub mod tracker;

pub use observation::{GroupKey, IdentityHash, Observation, ObservationBuilder, ObservationError};
pub use relay::Relay;
pub use tracker::{Tracker, TrackerConfig, TrackerStats};
