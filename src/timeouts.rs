//! Timeout and cadence configuration for tracking operations.
//!
//! All timers the SDK arms come from one struct, so tests can compress
//! every deadline at once and deployments can tune individual knobs.

use std::time::Duration;

/// Timeout configuration for the realtime channel, the fallback
/// poller, and the session guard timers.
#[derive(Debug, Clone)]
pub struct CourierLinkTimeouts {
    /// TCP + TLS + WebSocket upgrade deadline.
    pub connect_timeout: Duration,
    /// Deadline for the authenticated handshake ack after the socket
    /// opens.
    pub handshake_timeout: Duration,
    /// Idle interval after which the channel sends a ping. Zero
    /// disables heartbeats.
    pub heartbeat_interval: Duration,
    /// How long to wait for the pong before declaring the connection
    /// dead. Zero disables the check.
    pub heartbeat_timeout: Duration,
    /// How long a session waits for the channel to come up before
    /// activating the polling fallback.
    pub realtime_guard: Duration,
    /// Hard upper bound: if neither path is live this long after
    /// tracking starts, polling is forced on.
    pub fallback_deadline: Duration,
    /// Cadence of the polling fallback.
    pub poll_interval: Duration,
    /// Per-request deadline for HTTP order fetches.
    pub fetch_timeout: Duration,
}

impl Default for CourierLinkTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            realtime_guard: Duration::from_secs(3),
            fallback_deadline: Duration::from_secs(10),
            poll_interval: Duration::from_secs(20),
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

impl CourierLinkTimeouts {
    /// Standard production timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tighter timeouts for latency-sensitive deployments: fail over
    /// to polling sooner and poll more often.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(5),
            realtime_guard: Duration::from_secs(2),
            fallback_deadline: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(8),
        }
    }

    /// Generous timeouts for slow or congested networks.
    pub fn relaxed() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(20),
            realtime_guard: Duration::from_secs(10),
            fallback_deadline: Duration::from_secs(30),
            poll_interval: Duration::from_secs(45),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Millisecond-scale deadlines so integration tests complete
    /// quickly. Heartbeats are left long so they never fire mid-test.
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            realtime_guard: Duration::from_millis(150),
            fallback_deadline: Duration::from_millis(400),
            poll_interval: Duration::from_millis(100),
            fetch_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_realtime_guard(mut self, guard: Duration) -> Self {
        self.realtime_guard = guard;
        self
    }

    pub fn with_fallback_deadline(mut self, deadline: Duration) -> Self {
        self.fallback_deadline = deadline;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}
