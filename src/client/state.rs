use core::fmt;

/// Connection lifecycle state
///
/// ```text
/// Idle ─► Discovering ─► Describing ─► Connecting ─► Connected ─► Disconnecting ─► Closed
///   └──────────────────────►┘
/// any ─► Closed (fatal error or close)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Created, `connect` not called yet
    Idle,
    /// Searching for a gateway on the multicast group
    Discovering,
    /// Asking the gateway for its description
    Describing,
    /// Waiting for the tunnel to be granted
    Connecting,
    /// Tunnel established; data path and heartbeat active
    Connected,
    /// Tearing the tunnel down
    Disconnecting,
    /// Terminal; every core operation reports "not connected"
    Closed,
}

impl ClientState {
    /// Check if the tunnel is usable
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the client reached its terminal state
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub(crate) const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Discovering | Self::Describing)
                | (Self::Discovering, Self::Describing)
                | (Self::Describing, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connected, Self::Disconnecting)
                | (
                    Self::Idle
                        | Self::Discovering
                        | Self::Describing
                        | Self::Connecting
                        | Self::Connected
                        | Self::Disconnecting,
                    Self::Closed
                )
        )
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Describing => "describing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Closed => "closed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        use ClientState::*;
        let path = [Idle, Discovering, Describing, Connecting, Connected, Disconnecting, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_become(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Idle.can_become(Describing));
    }

    #[test]
    fn test_closed_is_terminal() {
        use ClientState::*;
        for next in [Idle, Discovering, Describing, Connecting, Connected, Disconnecting, Closed] {
            assert!(!Closed.can_become(next));
        }
        assert!(Connecting.can_become(Closed));
        assert!(!Connected.can_become(Connecting));
        assert!(!Idle.can_become(Connected));
    }
}
