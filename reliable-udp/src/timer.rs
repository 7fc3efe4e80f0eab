//! Retransmission and teardown timing.
//!
//! The protocol runs on fixed timers only: no RTT estimation and no
//! back-off.  A lost frame is retransmitted every
//! [`TimerConfig::retransmit_timeout`] until acknowledged, indefinitely.
//!
//! The active closer additionally lingers for [`TimerConfig::close_grace`]
//! after its FIN is acknowledged so the receive loop keeps answering any
//! retransmissions still in flight from the peer.

use std::time::Duration;

/// Default wait for an ACK before retransmitting.
pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(250);

/// Default linger time after the FIN has been acknowledged.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Default bound on joining the receive loop during close.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// How long the sender waits for a matching ACK before sending the
    /// identical frame again.
    pub retransmit_timeout: Duration,
    /// Linger time after the FIN's ACK before the receive loop is stopped.
    pub close_grace: Duration,
    /// How long `close` waits for the receive loop to exit before giving up
    /// on it.
    pub shutdown_timeout: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: RETRANSMIT_TIMEOUT,
            close_grace: CLOSE_GRACE,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

impl TimerConfig {
    /// Reject values the protocol cannot run with.
    ///
    /// A zero retransmit timeout would flood the channel; the other two may
    /// legitimately be zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.retransmit_timeout.is_zero() {
            return Err("retransmit_timeout must be greater than zero".into());
        }
        Ok(())
    }
}
