//! framecache - time-indexed frame cache between a producer and a consumer
//!
//! Re-exports all modules for use by the demo binary.

// Core engine (store, eviction, segments, cache, workers)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod paths;
pub mod sim;

// Re-export commonly used types from core
pub use config::CacheConfig;
pub use crate::core::clock::ClockTime;
pub use crate::core::error::{CacheError, FlowError};
pub use crate::core::event::{Caps, Event, SeekEvent, SeekFlags};
pub use crate::core::frame_cache::{CacheSink, FrameCache};
pub use crate::core::pad::{Downstream, Upstream};
pub use crate::core::store::Entry;
