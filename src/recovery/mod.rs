//! Crash recovery: finding interrupted work and re-admitting it.
//!
//! See [`RestartSchedule`] for the scan-and-reclaim algorithm and
//! [`RestartReport`] for what a pass observed.

mod restart;

pub use restart::{RestartHandle, RestartReport, RestartSchedule};
