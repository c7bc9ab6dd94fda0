#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Concurrent assembly of large symmetric matrices from localized rank-one updates.
//!
//! [`SymmetricUpdater`] is the core: it splits the index range into ordered segments,
//! guards each pair of segments with one lock of a bounded bank, and writes every
//! contribution into the lower triangle only. The [`assembly`] module drives it from a
//! `rayon` pool over a generated workload.

pub mod assembly;
pub mod backend;
pub mod config;
pub mod error;
pub mod locks;
pub mod progress;
pub mod segments;
pub mod updater;
pub mod workload;

pub use backend::MatrixBackend;
pub use error::InvalidArgument;
pub use locks::{DefaultBank, LockBank, LockLayout, MutexBank, NoopBank};
pub use segments::SegmentPartition;
pub use updater::SymmetricUpdater;
