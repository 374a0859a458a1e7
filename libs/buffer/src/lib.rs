//! # Agent Buffer
//!
//! Ephemeral in-memory storage for the agent:
//!
//! - [`CircularBuffer`] — a power-of-two ring of committed observations
//!   with strictly monotonic sequence numbers, incremental checkpoints and
//!   per-data-item change signalling
//! - [`Checkpoint`] — the latest observation per data item as of a
//!   sequence, with condition-chain and data-set merge rules
//! - [`AssetStorage`] — a bounded LRU of assets keyed by asset id
//!
//! All circular-buffer operations take a single internal lock; readers may
//! hold a [`BufferGuard`] across several reads to form a consistent
//! snapshot.

mod assets;
mod checkpoint;
mod circular;
mod observer;

pub use assets::{AssetQuery, AssetStorage};
pub use checkpoint::{Checkpoint, FilterSet};
pub use circular::{BufferGuard, CircularBuffer, ObservationRange};
pub use observer::ChangeObserver;
