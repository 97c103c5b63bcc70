//! Ordered, non-overlapping playback of synthesized utterances.

pub mod channel;
pub mod queue;
pub mod scheduler;

pub use channel::{AudioChannel, ChannelState};
pub use queue::{PrefetchQueue, QueueItem};
pub use scheduler::{PlaybackScheduler, SchedulerPhase};
