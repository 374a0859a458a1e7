//! # Agent Types Library
//!
//! Unified type system for the agent: polymorphic entities with factory
//! validation, the declared device model, typed observations with condition
//! chains, and trackable assets.
//!
//! ## Layering
//!
//! ```text
//! entity   — generic named records with tagged values and validators
//! device   — Device/Component trees declaring DataItem channels
//! observation — immutable, sequence-numbered values of a DataItem
//! asset    — removable workpiece records keyed by asset id
//! ```
//!
//! Everything downstream (codec, buffer, pipeline, service) speaks these
//! types; nothing here performs I/O.

pub mod asset;
pub mod entity;
pub mod device;
pub mod error;
pub mod observation;

pub use asset::{Asset, AssetCommand};
pub use entity::{
    DataSet, DataSetEntry, DataSetValue, Entity, Factory, Properties, Requirement, Value,
    ValueType,
};
pub use device::{
    Component, DataItem, DataItemBuilder, DataItemCategory, DataItemFilter, Device,
    Representation, UnitConversion,
};
pub use error::{EntityError, ErrorList, PropertyError, Result};
pub use observation::{
    condition, ConditionLevel, ConditionState, Observation, ObservationPtr, ObservationValue,
};

/// Sequence number of a committed observation. Zero means "not committed".
pub type SequenceNumber = u64;

/// The canonical unavailable value string.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// The canonical available value string.
pub const AVAILABLE: &str = "AVAILABLE";
