use std::fmt;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum SyncState {
    /// No session; waiting for peers or the next heartbeat.
    #[default]
    Idle,
    /// `getblocks` sent to the sync peer, no inventory back yet.
    AwaitingLocatorResponse,
    /// Request window outstanding against the sync peer.
    AwaitingBlocks,
    /// Caught up; following new block announcements.
    SteadyState,
}

impl SyncState {
    pub const ALL: [SyncState; 4] = [
        SyncState::Idle,
        SyncState::AwaitingLocatorResponse,
        SyncState::AwaitingBlocks,
        SyncState::SteadyState,
    ];

    pub fn is_syncing(self) -> bool {
        matches!(
            self,
            SyncState::AwaitingLocatorResponse | SyncState::AwaitingBlocks
        )
    }

    /// The complete transition table. Restart (`AwaitingLocatorResponse`)
    /// and backoff (`Idle`) are reachable from anywhere; blocks are only
    /// awaited once a locator was answered, and a session only reaches
    /// steady state through a commit (`Idle`) or an empty locator response.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        match (self, next) {
            (_, Idle) | (_, AwaitingLocatorResponse) => true,
            (AwaitingLocatorResponse, AwaitingBlocks) => true,
            (AwaitingBlocks, AwaitingBlocks) => true,
            (Idle, SteadyState) => true,
            (AwaitingLocatorResponse, SteadyState) => true,
            (SteadyState, SteadyState) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::AwaitingLocatorResponse => "awaiting_locator_response",
            SyncState::AwaitingBlocks => "awaiting_blocks",
            SyncState::SteadyState => "steady_state",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
