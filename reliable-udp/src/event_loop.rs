//! Background receive loop.
//!
//! One task per session owns every read from the channel.  It is the only
//! writer of the reorder buffer and the only producer of ACK events, so the
//! application side never touches shared mutable state:
//!
//! ```text
//!   channel ──datagram──▶ event_loop ──"ack for seq N"──▶ Sender::transmit
//!                            │    │
//!                            │    └──in-order payloads──▶ Session::receive
//!                            └──ACK frames──▶ channel
//! ```
//!
//! A fault while handling one datagram is logged and the loop moves on; the
//! loop only exits once the channel reports [`ChannelError::Stopped`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::packet::{FrameType, Packet};
use crate::receiver::{Receiver, Segment};
use crate::socket::{Channel, ChannelError};

/// Flags the loop shares with its session.
#[derive(Debug, Default)]
pub struct Shared {
    /// Set by `close` just before the channel is stopped.
    pub closed: AtomicBool,
    /// Set once the peer's first FIN has been seen.
    pub fin_received: AtomicBool,
}

/// Everything the loop owns for the lifetime of the session.
pub(crate) struct EventLoop<C> {
    pub channel: Arc<C>,
    pub peer: SocketAddr,
    pub receiver: Receiver,
    /// ACK events for the retransmission controller.
    pub ack_tx: mpsc::Sender<u32>,
    /// In-order payloads for the application.  Dropped at end of stream.
    pub deliver_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pub shared: Arc<Shared>,
}

impl<C: Channel> EventLoop<C> {
    /// Drain the channel until it is stopped.
    pub async fn run(mut self) {
        log::debug!("[rx-loop] started for peer {}", self.peer);
        loop {
            let (bytes, from) = match self.channel.recv_from().await {
                Ok(datagram) => datagram,
                Err(ChannelError::Stopped) => break,
                Err(e) => {
                    log::warn!("[rx-loop] receive failed: {e}");
                    continue;
                }
            };

            if from != self.peer {
                log::debug!("[rx-loop] ignoring datagram from stranger {from}");
                continue;
            }

            if let Err(e) = self.handle_datagram(&bytes).await {
                log::warn!("[rx-loop] dropping frame: {e}");
            }
        }

        if self.shared.closed.load(Ordering::Acquire) {
            log::debug!("[rx-loop] stopped after close");
        } else {
            log::warn!("[rx-loop] channel stopped while session still open");
        }
    }

    /// Classify one datagram and react to it.
    async fn handle_datagram(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let pkt = match Packet::decode(bytes) {
            Ok(pkt) => pkt,
            Err(e) => {
                log::debug!("[rx-loop] malformed datagram ({} bytes): {e}", bytes.len());
                return Ok(());
            }
        };

        match pkt.kind {
            FrameType::Ack => {
                log::debug!("[rx-loop] ← ACK seq={}", pkt.seq);
                // A full queue means the controller is far behind; it will
                // retransmit and get another ACK.
                if let Err(e) = self.ack_tx.try_send(pkt.seq) {
                    log::debug!("[rx-loop] ACK seq={} not queued: {e}", pkt.seq);
                }
                Ok(())
            }
            FrameType::Data => {
                // Acknowledge first, unconditionally: a duplicate means our
                // earlier ACK was lost.
                self.send_ack(pkt.seq).await?;
                let outcome = self.receiver.on_segment(pkt.seq, &pkt.payload);
                log::debug!(
                    "[rx-loop] ← DATA seq={} len={} {outcome:?}; → ACK",
                    pkt.seq,
                    pkt.payload.len()
                );
                if outcome == Segment::OutOfWindow {
                    log::warn!(
                        "[rx-loop] DATA seq={} too far ahead of {}; not buffered",
                        pkt.seq,
                        self.receiver.rcv_nxt
                    );
                }
                self.deliver_ready();
                Ok(())
            }
            FrameType::Fin => {
                self.send_ack(pkt.seq).await?;
                if !self.shared.fin_received.swap(true, Ordering::AcqRel) {
                    log::info!("[rx-loop] peer closed at seq={}", pkt.seq);
                }
                log::debug!("[rx-loop] ← FIN seq={}; → ACK", pkt.seq);
                self.receiver.on_fin(pkt.seq);
                self.deliver_ready();
                Ok(())
            }
        }
    }

    async fn send_ack(&self, seq: u32) -> Result<(), ChannelError> {
        self.channel
            .send_to(&Packet::ack(seq).encode(), self.peer)
            .await
    }

    /// Hand every contiguous fragment to the application; close the delivery
    /// channel once the peer's stream is complete.
    fn deliver_ready(&mut self) {
        while let Some(payload) = self.receiver.pop_ready() {
            match self.deliver_tx {
                Some(ref tx) => {
                    // The session may already have been dropped; keep ACKing.
                    let _ = tx.send(payload);
                }
                None => break,
            }
        }
        if self.receiver.is_finished() && self.deliver_tx.take().is_some() {
            log::debug!("[rx-loop] end of stream at seq={}", self.receiver.rcv_nxt);
        }
    }
}
