//! Which synchronization path a session is currently on.

use std::fmt;

/// The active sync path for a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// No path established yet (session just started, or stopped).
    Uninitialized,
    /// Live updates arrive over the realtime channel.
    Realtime,
    /// Updates arrive from the periodic HTTP poller.
    Polling,
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackingMode::Uninitialized => "uninitialized",
            TrackingMode::Realtime => "realtime",
            TrackingMode::Polling => "polling",
        };
        f.write_str(s)
    }
}
