//! Chunk scheduling and playback timing

pub mod clock;
pub mod driver;
pub mod queue;
pub mod scheduler;
pub mod sink;

pub use clock::{PlaybackClock, SystemClock};
pub use driver::SchedulerDriver;
pub use queue::ChunkQueue;
pub use scheduler::{DrainReport, EnqueueOutcome, Scheduler, SchedulerConfig, SchedulerStatus};
pub use sink::{AudioSink, NullSink, ScheduledEntry, SinkLease};
