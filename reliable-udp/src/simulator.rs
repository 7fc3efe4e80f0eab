//! Optional network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides a [`LossyChannel`] that wraps any
//! [`crate::socket::Channel`] and intercepts *outbound* datagrams, applying a
//! configurable fault model:
//!
//! | Fault               | Description                                         |
//! |---------------------|-----------------------------------------------------|
//! | Packet loss         | Drop a datagram with probability `loss_rate`.       |
//! | Reordering          | Delay a datagram by `reorder_delay`, letting later  |
//! |                     | datagrams overtake it.                              |
//! | Duplication         | Deliver a datagram twice.                           |
//! | First-send drop     | Drop the first transmission of every distinct       |
//! |                     | datagram; retransmissions go through.               |
//!
//! Decisions come from a seeded RNG so a failing test can be replayed.
//! Wrapping both peers' channels covers both directions.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::{Channel, ChannelError};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delayed and so reordered.
    pub reorder_rate: f64,
    /// Fixed delay applied to reordered datagrams.
    pub reorder_delay: Duration,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Drop the first transmission of every distinct datagram.
    pub drop_first_transmission: bool,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            duplicate_rate: 0.0,
            drop_first_transmission: false,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// `true` when every fault is switched off.
    pub fn is_transparent(&self) -> bool {
        self.loss_rate <= 0.0
            && self.reorder_rate <= 0.0
            && self.duplicate_rate <= 0.0
            && !self.drop_first_transmission
    }
}

/// Counters of what the simulator did, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Datagrams handed to [`Channel::send_to`].
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub delayed: u64,
}

/// What happens to one outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Drop,
    Deliver { copies: u8, delayed: bool },
}

#[derive(Debug)]
struct FaultState {
    rng: StdRng,
    seen: HashSet<Vec<u8>>,
    stats: SimulatorStats,
}

impl FaultState {
    fn decide(&mut self, config: &SimulatorConfig, bytes: &[u8]) -> Fate {
        self.stats.sent += 1;

        // Only tracked when needed; the set grows with every distinct frame.
        if config.drop_first_transmission && self.seen.insert(bytes.to_vec()) {
            self.stats.dropped += 1;
            return Fate::Drop;
        }
        if self.rng.random_bool(config.loss_rate.clamp(0.0, 1.0)) {
            self.stats.dropped += 1;
            return Fate::Drop;
        }

        let copies = if self.rng.random_bool(config.duplicate_rate.clamp(0.0, 1.0)) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };
        let delayed = self.rng.random_bool(config.reorder_rate.clamp(0.0, 1.0));
        if delayed {
            self.stats.delayed += 1;
        }
        Fate::Deliver { copies, delayed }
    }
}

/// Cloneable view of a [`LossyChannel`]'s counters that stays usable after
/// the channel has been moved into a session.
#[derive(Debug, Clone)]
pub struct StatsHandle(Arc<Mutex<FaultState>>);

impl StatsHandle {
    pub fn get(&self) -> SimulatorStats {
        lock(&self.0).stats
    }
}

/// A fault-injecting wrapper around another channel.
pub struct LossyChannel<C> {
    inner: Arc<C>,
    config: SimulatorConfig,
    state: Arc<Mutex<FaultState>>,
}

impl<C: Channel> LossyChannel<C> {
    pub fn new(inner: C, config: SimulatorConfig) -> Self {
        let state = FaultState {
            rng: StdRng::seed_from_u64(config.seed),
            seen: HashSet::new(),
            stats: SimulatorStats::default(),
        };
        Self {
            inner: Arc::new(inner),
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle(Arc::clone(&self.state))
    }
}

fn lock(state: &Mutex<FaultState>) -> MutexGuard<'_, FaultState> {
    // Counters stay meaningful even if a holder panicked.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<C: Channel> Channel for LossyChannel<C> {
    fn send_to(
        &self,
        bytes: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send {
        let fate = lock(&self.state).decide(&self.config, bytes);
        async move {
            let (copies, delayed) = match fate {
                Fate::Drop => {
                    log::debug!("[sim] dropped {} bytes to {dest}", bytes.len());
                    return Ok(());
                }
                Fate::Deliver { copies, delayed } => (copies, delayed),
            };

            if delayed {
                let inner = Arc::clone(&self.inner);
                let owned = bytes.to_vec();
                let delay = self.config.reorder_delay;
                log::debug!("[sim] delaying {} bytes by {delay:?}", owned.len());
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for _ in 0..copies {
                        if let Err(e) = inner.send_to(&owned, dest).await {
                            log::debug!("[sim] delayed send failed: {e}");
                        }
                    }
                });
                return Ok(());
            }

            for _ in 0..copies {
                self.inner.send_to(bytes, dest).await?;
            }
            Ok(())
        }
    }

    fn recv_from(
        &self,
    ) -> impl Future<Output = Result<(Vec<u8>, SocketAddr), ChannelError>> + Send {
        self.inner.recv_from()
    }

    fn stop_receiving(&self) {
        self.inner.stop_receiving();
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(seed: u64) -> FaultState {
        FaultState {
            rng: StdRng::seed_from_u64(seed),
            seen: HashSet::new(),
            stats: SimulatorStats::default(),
        }
    }

    #[test]
    fn transparent_by_default() {
        let config = SimulatorConfig::default();
        assert!(config.is_transparent());

        let mut s = state(1);
        for i in 0..100u8 {
            assert_eq!(
                s.decide(&config, &[i]),
                Fate::Deliver {
                    copies: 1,
                    delayed: false
                }
            );
        }
        assert_eq!(s.stats.sent, 100);
        assert_eq!(s.stats.dropped, 0);
    }

    #[test]
    fn first_transmission_of_each_datagram_dropped() {
        let config = SimulatorConfig {
            drop_first_transmission: true,
            ..SimulatorConfig::default()
        };
        let mut s = state(1);

        assert_eq!(s.decide(&config, b"frame-a"), Fate::Drop);
        assert_ne!(s.decide(&config, b"frame-a"), Fate::Drop);
        assert_eq!(s.decide(&config, b"frame-b"), Fate::Drop);
        assert_ne!(s.decide(&config, b"frame-b"), Fate::Drop);
        assert_ne!(s.decide(&config, b"frame-a"), Fate::Drop);

        assert_eq!(s.stats.sent, 5);
        assert_eq!(s.stats.dropped, 2);
    }

    #[test]
    fn datagrams_remembered_only_for_first_send_drops() {
        let lossy = SimulatorConfig {
            loss_rate: 0.5,
            duplicate_rate: 0.5,
            ..SimulatorConfig::default()
        };
        let mut s = state(11);
        for i in 0..50u8 {
            s.decide(&lossy, &[i]);
        }
        assert!(s.seen.is_empty());

        let drop_first = SimulatorConfig {
            drop_first_transmission: true,
            ..SimulatorConfig::default()
        };
        s.decide(&drop_first, b"frame");
        s.decide(&drop_first, b"frame");
        assert_eq!(s.seen.len(), 1);
    }

    #[test]
    fn total_loss_drops_everything() {
        let config = SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let mut s = state(7);
        for i in 0..20u8 {
            assert_eq!(s.decide(&config, &[i]), Fate::Drop);
        }
        assert_eq!(s.stats.dropped, 20);
    }

    #[test]
    fn same_seed_same_decisions() {
        let config = SimulatorConfig {
            loss_rate: 0.3,
            duplicate_rate: 0.3,
            reorder_rate: 0.3,
            ..SimulatorConfig::default()
        };
        let mut a = state(42);
        let mut b = state(42);
        for i in 0..200u8 {
            assert_eq!(a.decide(&config, &[i]), b.decide(&config, &[i]));
        }
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn duplication_counted() {
        let config = SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let mut s = state(3);
        assert_eq!(
            s.decide(&config, b"x"),
            Fate::Deliver {
                copies: 2,
                delayed: false
            }
        );
        assert_eq!(s.stats.duplicated, 1);
    }
}
