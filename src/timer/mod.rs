//! Durable timer service: scheduled and repeating cast delivery that
//! survives restarts through a pluggable storage adapter.

pub mod entry;
pub mod service;

pub use entry::{storage_key, TimerEntry, TIMER_KEY_PREFIX};
pub use service::{TimerError, TimerService, TimerServiceOptions, DEFAULT_TICK_INTERVAL};
