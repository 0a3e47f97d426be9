//! Connection state machine for [`super::ResilientChannel`].
//!
//! ```text
//!  Idle ──connect──> Connecting ──opened──> Open
//!                        │                   │
//!                        └──────closed───────┤ (failure: maybe schedule retry)
//!                                            v
//!  Closed <──closed── Closing <──begin_close─┘ (caller: never retries)
//!    │
//!    └──connect / scheduled retry──> Connecting
//! ```
//!
//! The transitions are plain methods with no I/O so the reconnect rules can be
//! checked without a socket. Whether a close leads to a retry depends only on
//! the status the close arrived in: a close observed in `Closing` was asked
//! for and never schedules one.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Idle => write!(f, "idle"),
            ChannelStatus::Connecting => write!(f, "connecting"),
            ChannelStatus::Open => write!(f, "open"),
            ChannelStatus::Closing => write!(f, "closing"),
            ChannelStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Who asked for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOrigin {
    /// An explicit `connect()`; starts a fresh attempt count.
    Caller,
    /// A retry scheduled after a failure.
    Scheduled,
}

/// What a close transition asks the owner to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The close was requested; stay closed.
    Stopped,
    /// Schedule reconnect number `attempt` after the fixed delay.
    Retry { attempt: u32 },
    /// The attempt cap is reached; stay closed with nothing scheduled.
    Exhausted,
}

/// Attempt bookkeeping owned by one channel.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    status: ChannelStatus,
    reconnect_count: u32,
    max_reconnect_attempts: u32,
    last_error: Option<String>,
    exhausted: bool,
}

impl ConnectionState {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            status: ChannelStatus::Idle,
            reconnect_count: 0,
            max_reconnect_attempts,
            last_error: None,
            exhausted: false,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Idle/Closed → Connecting. Returns `false` (and changes nothing) from
    /// any other status.
    pub fn begin_connect(&mut self, origin: ConnectOrigin) -> bool {
        match self.status {
            ChannelStatus::Idle | ChannelStatus::Closed => {
                if origin == ConnectOrigin::Caller {
                    self.reconnect_count = 0;
                }
                self.exhausted = false;
                self.status = ChannelStatus::Connecting;
                true
            }
            _ => false,
        }
    }

    /// Connecting → Open. Resets the attempt count.
    pub fn opened(&mut self) -> bool {
        if self.status != ChannelStatus::Connecting {
            return false;
        }
        self.status = ChannelStatus::Open;
        self.reconnect_count = 0;
        self.last_error = None;
        true
    }

    /// Connecting/Open → Closing. Returns `false` when there is nothing to
    /// close (Idle, Closing, Closed).
    pub fn begin_close(&mut self) -> bool {
        match self.status {
            ChannelStatus::Connecting | ChannelStatus::Open => {
                self.status = ChannelStatus::Closing;
                true
            }
            _ => false,
        }
    }

    /// Any active status → Closed, deciding whether to retry.
    pub fn closed(&mut self, error: Option<String>) -> CloseOutcome {
        let requested = match self.status {
            ChannelStatus::Closing => true,
            ChannelStatus::Connecting | ChannelStatus::Open => false,
            ChannelStatus::Idle | ChannelStatus::Closed => return CloseOutcome::Stopped,
        };

        self.status = ChannelStatus::Closed;
        if error.is_some() {
            self.last_error = error;
        }

        if requested {
            CloseOutcome::Stopped
        } else if self.reconnect_count < self.max_reconnect_attempts {
            self.reconnect_count += 1;
            CloseOutcome::Retry {
                attempt: self.reconnect_count,
            }
        } else {
            self.exhausted = true;
            CloseOutcome::Exhausted
        }
    }

    pub fn snapshot(&self, retry_pending: bool) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.status,
            reconnect_count: self.reconnect_count,
            max_reconnect_attempts: self.max_reconnect_attempts,
            last_error: self.last_error.clone(),
            retry_pending,
            exhausted: self.exhausted,
        }
    }
}

/// Point-in-time view of a channel, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ChannelStatus,
    pub reconnect_count: u32,
    pub max_reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub retry_pending: bool,
    /// Closed after the attempt cap with no retry scheduled. Callers may treat
    /// this as degraded and offer a manual reconnect.
    pub exhausted: bool,
}

impl ConnectionSnapshot {
    pub fn idle(max_reconnect_attempts: u32) -> Self {
        ConnectionState::new(max_reconnect_attempts).snapshot(false)
    }

    pub fn is_connected(&self) -> bool {
        self.status == ChannelStatus::Open
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.status == ChannelStatus::Closed && !self.retry_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(state: &mut ConnectionState) -> CloseOutcome {
        state.closed(Some("refused".to_string()))
    }

    #[test]
    fn test_starts_idle() {
        let state = ConnectionState::new(10);
        assert_eq!(state.status(), ChannelStatus::Idle);
        assert_eq!(state.reconnect_count(), 0);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_open_resets_count() {
        let mut state = ConnectionState::new(5);
        state.begin_connect(ConnectOrigin::Caller);
        assert_eq!(fail(&mut state), CloseOutcome::Retry { attempt: 1 });
        state.begin_connect(ConnectOrigin::Scheduled);
        assert_eq!(fail(&mut state), CloseOutcome::Retry { attempt: 2 });
        state.begin_connect(ConnectOrigin::Scheduled);
        assert!(state.opened());
        assert_eq!(state.reconnect_count(), 0);
        assert!(state.last_error().is_none());

        // A new failure streak counts from 1 again
        assert_eq!(fail(&mut state), CloseOutcome::Retry { attempt: 1 });
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut state = ConnectionState::new(3);
        state.begin_connect(ConnectOrigin::Caller);

        let mut scheduled = 0;
        loop {
            match fail(&mut state) {
                CloseOutcome::Retry { attempt } => {
                    scheduled += 1;
                    assert!(attempt <= 3);
                    assert!(state.begin_connect(ConnectOrigin::Scheduled));
                }
                CloseOutcome::Exhausted => break,
                CloseOutcome::Stopped => panic!("unexpected stop"),
            }
        }

        assert_eq!(scheduled, 3);
        assert_eq!(state.reconnect_count(), 3);
        assert_eq!(state.status(), ChannelStatus::Closed);
        assert!(state.snapshot(false).is_exhausted());
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut state = ConnectionState::new(0);
        state.begin_connect(ConnectOrigin::Caller);
        assert_eq!(fail(&mut state), CloseOutcome::Exhausted);
    }

    #[test]
    fn test_requested_close_never_retries() {
        let mut state = ConnectionState::new(10);
        state.begin_connect(ConnectOrigin::Caller);
        state.opened();

        assert!(state.begin_close());
        assert_eq!(state.status(), ChannelStatus::Closing);
        assert_eq!(state.closed(None), CloseOutcome::Stopped);
        assert_eq!(state.status(), ChannelStatus::Closed);
        assert_eq!(state.reconnect_count(), 0);
    }

    #[test]
    fn test_begin_close_is_idempotent() {
        let mut state = ConnectionState::new(10);
        assert!(!state.begin_close());
        assert_eq!(state.status(), ChannelStatus::Idle);

        state.begin_connect(ConnectOrigin::Caller);
        assert!(state.begin_close());
        assert!(!state.begin_close());
        state.closed(None);
        assert!(!state.begin_close());
        assert_eq!(state.status(), ChannelStatus::Closed);
    }

    #[test]
    fn test_connect_is_refused_while_active() {
        let mut state = ConnectionState::new(10);
        assert!(state.begin_connect(ConnectOrigin::Caller));
        assert!(!state.begin_connect(ConnectOrigin::Caller));
        state.opened();
        assert!(!state.begin_connect(ConnectOrigin::Caller));
        assert!(!state.opened());
    }

    #[test]
    fn test_caller_connect_resets_exhausted_count() {
        let mut state = ConnectionState::new(1);
        state.begin_connect(ConnectOrigin::Caller);
        fail(&mut state);
        state.begin_connect(ConnectOrigin::Scheduled);
        assert_eq!(fail(&mut state), CloseOutcome::Exhausted);

        assert!(state.begin_connect(ConnectOrigin::Caller));
        assert_eq!(state.reconnect_count(), 0);
        assert!(!state.is_exhausted());
        assert_eq!(fail(&mut state), CloseOutcome::Retry { attempt: 1 });
    }

    #[test]
    fn test_close_in_closed_state_is_ignored() {
        let mut state = ConnectionState::new(3);
        assert_eq!(state.closed(None), CloseOutcome::Stopped);
        assert_eq!(state.status(), ChannelStatus::Idle);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut state = ConnectionState::new(4);
        state.begin_connect(ConnectOrigin::Caller);
        fail(&mut state);

        let snap = state.snapshot(true);
        assert_eq!(snap.status, ChannelStatus::Closed);
        assert_eq!(snap.reconnect_count, 1);
        assert_eq!(snap.last_error.as_deref(), Some("refused"));
        assert!(snap.retry_pending);
        assert!(!snap.is_connected());
        assert!(!snap.is_exhausted());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChannelStatus::Connecting).unwrap(),
            r#""connecting""#
        );
    }
}
