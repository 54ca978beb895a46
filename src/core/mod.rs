//! Core engine modules - store, eviction, segments, cache, workers
//!
//! Independent of any concrete producer or consumer; see `sim` for the
//! synthetic ones used by the demo binary.

pub mod bus;
pub mod clock;
pub mod error;
pub mod event;
pub mod eviction;
pub mod frame_cache;
pub mod pad;
pub mod segment;
pub mod stats;
pub mod store;
pub mod workers;

// Re-exports for convenience
pub use bus::{CacheMessage, MessageBus, MessageKind};
pub use clock::ClockTime;
pub use error::{CacheError, FlowError};
pub use event::{Caps, Event, Format, QosEvent, SeekEvent, SeekFlags, SeekType};
pub use eviction::{EvictionPolicy, RoomReport};
pub use frame_cache::{CacheSink, FlushState, FrameCache};
pub use pad::{Downstream, Upstream};
pub use segment::{Segment, SegmentTracker};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{Entry, TimeOrderedStore};
pub use workers::Workers;
