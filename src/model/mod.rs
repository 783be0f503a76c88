//! Data Model
//!
//! Types shared by every component of the synchronization layer:
//!
//! - **Domain** / **Section**: the closed set of monitored subsystems and the
//!   dashboard views that display them
//! - **Entity**: one monitored object with opaque attributes
//! - **Snapshot**: the full current state of one domain at one fetch
//! - **Sample**: one (timestamp, value) observation for a chart series

pub mod domain;
pub mod entity;

pub use domain::{Domain, Section, UnknownName};
pub use entity::{
    unix_seconds_to_millis, Entity, FieldProblem, GeoPoint, MalformedEntityError, Sample,
    Snapshot,
};
