//! Log tailing for weblogview
//!
//! This crate provides the two log sources (local files and Kubernetes pod
//! streams), the emitter that separates the snapshot from the live feed, and
//! the factory the server opens sources through.

mod buffer;
mod error;
mod factory;
mod file;
mod pod;
mod source;

pub use buffer::SnapshotRing;
pub use error::{TailError, is_auth_failure};
pub use factory::DefaultSourceFactory;
pub use file::{FileTailer, FileTailerConfig};
pub use pod::{PodLogTailer, PodTailerConfig};
pub use source::{Emitter, LiveEmitter, LogSource, SourceFactory, Stopper};

// Re-export types used in our public API
pub use weblogview_types::{LineBatch, Phase, PodTarget, SourceSpec};
