//! Datagram channel abstraction.
//!
//! [`Channel`] is the lossy send/receive primitive the session is built on.
//! [`UdpChannel`] is a thin wrapper around `tokio::net::UdpSocket` that adds
//! the one thing plain UDP lacks: a way to unblock a pending receive from
//! another task ([`Channel::stop_receiving`]).  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// [`Channel::stop_receiving`] was called; no further datagrams will be
    /// returned.
    #[error("channel stopped receiving")]
    Stopped,
}

// ---------------------------------------------------------------------------
// Channel trait
// ---------------------------------------------------------------------------

/// An unreliable datagram channel.
///
/// Implementations may drop, duplicate, delay and reorder datagrams; the
/// session layer assumes nothing beyond "a datagram that arrives, arrives
/// intact and whole".
pub trait Channel: Send + Sync + 'static {
    /// Send `bytes` as a single datagram to `dest`.
    fn send_to(
        &self,
        bytes: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Wait for the next datagram.
    ///
    /// Returns [`ChannelError::Stopped`] once [`stop_receiving`] has been
    /// called, including for a receive that was already pending.
    ///
    /// [`stop_receiving`]: Channel::stop_receiving
    fn recv_from(
        &self,
    ) -> impl Future<Output = Result<(Vec<u8>, SocketAddr), ChannelError>> + Send;

    /// Make every pending and future [`recv_from`](Channel::recv_from)
    /// return [`ChannelError::Stopped`].
    fn stop_receiving(&self);

    /// Address this channel is bound to.
    fn local_addr(&self) -> SocketAddr;
}

// ---------------------------------------------------------------------------
// UdpChannel
// ---------------------------------------------------------------------------

/// A [`Channel`] backed by a real UDP socket.
///
/// All methods are `&self` so the channel can be shared across tasks.
#[derive(Debug)]
pub struct UdpChannel {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    local_addr: SocketAddr,
    inner: UdpSocket,
    stop_tx: watch::Sender<bool>,
    // Kept so `stop_tx` always has a receiver to clone from.
    stop_rx: watch::Receiver<bool>,
}

impl UdpChannel {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, ChannelError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        log::debug!("[socket] bound {local_addr}");
        Ok(Self {
            local_addr,
            inner,
            stop_tx,
            stop_rx,
        })
    }
}

impl Channel for UdpChannel {
    fn send_to(
        &self,
        bytes: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send {
        async move {
            self.inner.send_to(bytes, dest).await?;
            Ok(())
        }
    }

    fn recv_from(
        &self,
    ) -> impl Future<Output = Result<(Vec<u8>, SocketAddr), ChannelError>> + Send {
        let stop = self.stop_rx.clone();
        async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            tokio::select! {
                biased;
                _ = stopped(stop) => Err(ChannelError::Stopped),
                result = self.inner.recv_from(&mut buf) => {
                    let (n, addr) = result?;
                    buf.truncate(n);
                    Ok((buf, addr))
                }
            }
        }
    }

    fn stop_receiving(&self) {
        self.stop_tx.send_replace(true);
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Resolves once the stop flag is raised.
async fn stopped(mut stop: watch::Receiver<bool>) {
    loop {
        let raised = *stop.borrow_and_update();
        if raised {
            return;
        }
        if stop.changed().await.is_err() {
            // Sender gone: the channel itself is being dropped.
            return;
        }
    }
}
