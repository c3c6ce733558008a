//! hourlock - time-windowed write protection
//!
//! Keeps a configured set of files immutable while a schedule's enforcement
//! window is open and writable outside it.

pub mod clock;
pub mod constants;
pub mod daemon;
pub mod exclusions;
pub mod fileutil;
pub mod lock;
pub mod notifier;
pub mod schedule;
pub mod watcher;
