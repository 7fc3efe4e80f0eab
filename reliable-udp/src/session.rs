//! Per-destination session lifecycle.
//!
//! A [`Session`] owns the complete state for one logical peer-to-peer
//! stream.  Its responsibilities are:
//! - Starting the background receive loop ([`crate::event_loop`]) on open.
//! - Fragmenting outbound payloads and pushing each fragment through the
//!   stop-and-wait controller ([`crate::sender`]).
//! - Handing in-order fragments to the application.
//! - Running the active-close handshake and shutting the loop down.
//!
//! Usage is single-writer / single-reader: every operation takes
//! `&mut self`.
//!
//! ```ignore
//! let mut session = Session::open(peer).await?;
//! session.send(b"hello").await?;
//! let reply = session.receive().await?;
//! session.close().await?;
//! ```

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event_loop::{EventLoop, Shared};
use crate::packet::{self, DEFAULT_MTU, HEADER_LEN};
use crate::receiver::{Receiver, DEFAULT_REORDER_WINDOW, MAX_REORDER_WINDOW};
use crate::sender::Sender;
use crate::socket::{Channel, ChannelError, UdpChannel};
use crate::state::SessionState;
use crate::timer::TimerConfig;

/// Default depth of the ACK-event queue between the receive loop and the
/// sender.
pub const DEFAULT_ACK_QUEUE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by [`Session`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The underlying channel failed to send.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// `send` / `receive` after `close` has started.
    #[error("operation not valid in state {0}")]
    BadState(SessionState),
    /// The peer closed its side and every fragment it sent has been read.
    #[error("end of stream")]
    Eof,
    /// The receive loop exited while the session still needed it.
    #[error("receive loop terminated unexpectedly")]
    LoopTerminated,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for one session.  Defaults reproduce the fixed constants of the
/// wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest datagram handed to the channel, header included.
    pub mtu: usize,
    /// How many sequence numbers ahead of the next expected one the reorder
    /// buffer will store.
    pub reorder_window: u32,
    /// Capacity of the ACK-event queue.
    pub ack_queue_depth: usize,
    pub timers: TimerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            reorder_window: DEFAULT_REORDER_WINDOW,
            ack_queue_depth: DEFAULT_ACK_QUEUE_DEPTH,
            timers: TimerConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Largest fragment [`Session::send`] will put into one DATA frame.
    pub fn max_payload(&self) -> usize {
        packet::max_payload(self.mtu)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.mtu <= HEADER_LEN {
            return Err(SessionError::InvalidConfig(format!(
                "mtu {} leaves no room for payload after the {HEADER_LEN}-byte header",
                self.mtu
            )));
        }
        if self.reorder_window == 0 {
            return Err(SessionError::InvalidConfig(
                "reorder_window must be at least 1".into(),
            ));
        }
        if self.reorder_window > MAX_REORDER_WINDOW {
            return Err(SessionError::InvalidConfig(format!(
                "reorder_window {} exceeds half the sequence space ({MAX_REORDER_WINDOW})",
                self.reorder_window
            )));
        }
        if self.ack_queue_depth == 0 {
            return Err(SessionError::InvalidConfig(
                "ack_queue_depth must be at least 1".into(),
            ));
        }
        self.timers.validate().map_err(SessionError::InvalidConfig)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A reliable, ordered, message-oriented stream to one peer.
pub struct Session<C: Channel = UdpChannel> {
    channel: Arc<C>,
    peer: SocketAddr,
    config: SessionConfig,
    state: SessionState,
    /// Outbound sequence numbers and the in-flight frame.
    sender: Sender,
    acks: mpsc::Receiver<u32>,
    deliveries: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Fragments handed to the application so far (`expectedSequence`).
    delivered: u32,
    shared: Arc<Shared>,
    event_loop: Option<JoinHandle<()>>,
}

impl Session<UdpChannel> {
    /// Open a session to `peer` from an OS-chosen port with default settings.
    pub async fn open(peer: SocketAddr) -> Result<Self, SessionError> {
        let local = match peer {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        Self::open_with(peer, local, SessionConfig::default()).await
    }

    /// Bind a UDP channel on `local` and open a session to `peer`.
    pub async fn open_with(
        peer: SocketAddr,
        local: SocketAddr,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let channel = UdpChannel::bind(local).await?;
        Self::with_channel(channel, peer, config)
    }
}

impl<C: Channel> Session<C> {
    /// Open a session over an already-bound channel.
    ///
    /// Spawns the receive loop, so this must be called from within a Tokio
    /// runtime.
    pub fn with_channel(
        channel: C,
        peer: SocketAddr,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let channel = Arc::new(channel);
        let shared = Arc::new(Shared::default());
        let (ack_tx, acks) = mpsc::channel(config.ack_queue_depth);
        let (deliver_tx, deliveries) = mpsc::unbounded_channel();

        let event_loop = EventLoop {
            channel: Arc::clone(&channel),
            peer,
            receiver: Receiver::new(config.reorder_window),
            ack_tx,
            deliver_tx: Some(deliver_tx),
            shared: Arc::clone(&shared),
        };
        let handle = tokio::spawn(event_loop.run());

        log::info!(
            "[session] open {} → {peer} (max payload {})",
            channel.local_addr(),
            config.max_payload()
        );

        Ok(Self {
            channel,
            peer,
            config,
            state: SessionState::Established,
            sender: Sender::new(),
            acks,
            deliveries,
            delivered: 0,
            shared,
            event_loop: Some(handle),
        })
    }

    /// Reliably send `data`, split into as many fragments as needed.
    ///
    /// Fragments go out one at a time; each must be acknowledged before the
    /// next is sent.  Returns once the last fragment has been acknowledged.
    /// An empty `data` sends nothing.
    ///
    /// If an earlier `send` was dropped part way, its in-flight fragment is
    /// delivered first; fragments it never started are not sent.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.state.is_closing() {
            return Err(SessionError::BadState(self.state));
        }

        let rto = self.config.timers.retransmit_timeout;
        self.sender
            .settle(&*self.channel, self.peer, &mut self.acks, rto)
            .await?;
        for chunk in data.chunks(self.config.max_payload()) {
            let pkt = self.sender.build_data_packet(chunk.to_vec());
            self.sender
                .transmit(pkt, &*self.channel, self.peer, &mut self.acks, rto)
                .await?;
        }
        Ok(())
    }

    /// Wait for the next fragment from the peer, in sequence order.
    ///
    /// Returns [`SessionError::Eof`] once the peer has closed and every
    /// fragment it sent has been returned.
    pub async fn receive(&mut self) -> Result<Vec<u8>, SessionError> {
        if self.state.is_closing() {
            return Err(SessionError::BadState(self.state));
        }

        match self.deliveries.recv().await {
            Some(payload) => {
                self.delivered = self.delivered.wrapping_add(1);
                Ok(payload)
            }
            None if self.shared.fin_received.load(Ordering::Acquire) => Err(SessionError::Eof),
            None => Err(SessionError::LoopTerminated),
        }
    }

    /// Active close: FIN, wait for its ACK, linger, then stop the loop.
    ///
    /// Calling `close` on a closed session is a no-op.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let rto = self.config.timers.retransmit_timeout;
        self.sender
            .settle(&*self.channel, self.peer, &mut self.acks, rto)
            .await?;

        self.state = SessionState::FinWait;
        let fin = self.sender.build_fin_packet();
        self.sender
            .transmit(fin, &*self.channel, self.peer, &mut self.acks, rto)
            .await?;

        self.state = SessionState::TimeWait;
        log::debug!(
            "[session] FIN acknowledged; lingering {:?}",
            self.config.timers.close_grace
        );
        tokio::time::sleep(self.config.timers.close_grace).await;

        self.shutdown_loop().await;
        self.state = SessionState::Closed;
        log::info!("[session] closed {} → {}", self.channel.local_addr(), self.peer);
        Ok(())
    }

    /// Mark the session closed, unblock the loop and join it (bounded).
    async fn shutdown_loop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.channel.stop_receiving();

        let Some(mut handle) = self.event_loop.take() else {
            return;
        };
        let limit = self.config.timers.shutdown_timeout;
        if tokio::time::timeout(limit, &mut handle).await.is_err() {
            log::warn!("[session] receive loop did not stop within {limit:?}; aborting it");
            handle.abort();
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `true` once the peer's FIN has arrived.
    pub fn peer_closed(&self) -> bool {
        self.shared.fin_received.load(Ordering::Acquire)
    }

    /// Sequence number the next outbound DATA frame will carry.
    pub fn send_sequence(&self) -> u32 {
        self.sender.next_seq
    }

    /// Fragments returned by [`receive`](Self::receive) so far.
    pub fn received_fragments(&self) -> u32 {
        self.delivered
    }

    /// Timeout-driven retransmissions over the session's lifetime.
    pub fn retransmissions(&self) -> u64 {
        self.sender.retransmissions
    }
}

impl<C: Channel> Drop for Session<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            log::debug!("[session] dropped without close; stopping receive loop");
            self.shared.closed.store(true, Ordering::Release);
            self.channel.stop_receiving();
            handle.abort();
        }
    }
}
