//! Session finite-state machine (FSM) types.
//!
//! Only the active-close path has distinct states; the passive side stays
//! `Established` and learns about the peer's FIN through
//! [`crate::session::Session::peer_closed`] and an end-of-stream from
//! `receive`.

/// States of the session FSM.
///
/// ```text
//  ESTABLISHED ──close()──▶ FIN_WAIT ──ACK of FIN──▶ TIME_WAIT
//                                                       │
//                                         grace elapsed │
//                                                       ▼
//                                                     CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Receive loop running; `send` and `receive` are valid.
    #[default]
    Established,
    /// Local side sent FIN; waiting for its ACK.
    FinWait,
    /// FIN acknowledged; lingering so late peer retransmissions still get
    /// answered.
    TimeWait,
    /// Receive loop stopped; the session is unusable.
    Closed,
}

impl SessionState {
    /// `true` once `close` has started.
    pub fn is_closing(self) -> bool {
        !matches!(self, Self::Established)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Established => "ESTABLISHED",
            Self::FinWait => "FIN_WAIT",
            Self::TimeWait => "TIME_WAIT",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_established() {
        assert_eq!(SessionState::default(), SessionState::Established);
        assert!(!SessionState::default().is_closing());
    }

    #[test]
    fn display_uses_fsm_names() {
        assert_eq!(SessionState::FinWait.to_string(), "FIN_WAIT");
        assert_eq!(SessionState::Closed.to_string(), "CLOSED");
    }
}
