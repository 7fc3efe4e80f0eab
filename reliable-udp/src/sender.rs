//! Outbound frame state and the stop-and-wait retransmission controller.
//!
//! [`Sender`] tracks the next sequence number and the single in-flight
//! frame.  [`Sender::transmit`] drives one frame to acknowledgement over a
//! [`Channel`], fed by ACK events from the receive loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** frame is in flight at any moment (`unacked`).
//! - A new frame may only be sent once `unacked` is `None`.
//! - On matching ACK: clear `unacked`; advance `next_seq` if it was DATA.
//! - On timeout: increment `tx_count`; resend the same bytes unchanged.
//! - Retries are unbounded and the timeout never backs off.
//! - A frame left in flight by an interrupted call is finished by
//!   [`Sender::settle`] before any new sequence number is used.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::packet::{FrameType, Packet};
use crate::session::SessionError;
use crate::socket::Channel;

// ---------------------------------------------------------------------------
// RetransmitEntry
// ---------------------------------------------------------------------------

/// A frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// The frame on the wire.
    pub packet: Packet,
    /// Encoded bytes, kept so every retransmission is byte-identical.
    pub bytes: Vec<u8>,
    /// How many times this frame has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Wall-clock time of the first transmission.
    pub first_sent_at: Instant,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one session.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence number of the **next** DATA frame to send.
    ///
    /// Advances by one each time a DATA frame is acknowledged.
    /// Remains unchanged while a frame is in flight.
    pub next_seq: u32,

    /// The in-flight frame, or `None` when the sender is idle.
    pub unacked: Option<RetransmitEntry>,

    /// Retransmissions over the lifetime of the session.
    pub retransmissions: u64,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a DATA frame for `payload` at the current sequence number.
    pub fn build_data_packet(&self, payload: Vec<u8>) -> Packet {
        Packet::data(self.next_seq, payload)
    }

    /// Build the FIN marker: it carries `next_seq` but never consumes it.
    pub fn build_fin_packet(&self) -> Packet {
        Packet::fin(self.next_seq)
    }

    /// Move `packet` into the in-flight slot (first transmission).
    ///
    /// Panics in debug mode if a frame is already in flight.
    pub fn record_sent(&mut self, packet: Packet) -> &[u8] {
        debug_assert!(
            self.unacked.is_none(),
            "record_sent called while a frame is already in flight"
        );
        let bytes = packet.encode();
        let entry = self.unacked.insert(RetransmitEntry {
            packet,
            bytes,
            tx_count: 1,
            first_sent_at: Instant::now(),
        });
        &entry.bytes
    }

    /// Process an inbound ACK number.
    ///
    /// Returns `true` if this ACK covers the in-flight frame.  Returns
    /// `false` for a stale or unexpected ACK, which leaves all state alone.
    pub fn on_ack(&mut self, ack_seq: u32) -> bool {
        match self.unacked {
            Some(ref entry) if entry.packet.seq == ack_seq => {
                if entry.packet.kind == FrameType::Data {
                    self.next_seq = self.next_seq.wrapping_add(1);
                }
                self.unacked = None;
                true
            }
            _ => false,
        }
    }

    /// Increment the retransmit count for the in-flight frame.
    pub fn on_retransmit(&mut self) {
        if let Some(ref mut e) = self.unacked {
            e.tx_count += 1;
            self.retransmissions += 1;
        }
    }

    /// Returns the number of times the in-flight frame has been sent,
    /// or `0` if the sender is idle.
    pub fn retransmit_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }

    /// `true` when a frame is waiting for an ACK.
    pub fn has_unacked(&self) -> bool {
        self.unacked.is_some()
    }

    /// Reliably deliver `packet` to `peer`.
    ///
    /// Sends the frame, then waits up to `rto` for an ACK event with the
    /// frame's exact sequence number, retransmitting the identical bytes
    /// after every silent interval.  Stale ACK events are skipped.  Returns
    /// the number of transmissions it took.
    ///
    /// The caller must [`settle`](Self::settle) first; `packet` has to carry
    /// the current `next_seq`.  Fails only if the channel reports an I/O
    /// error or the receive loop has gone away (its ACK sender dropped).  On
    /// failure the frame stays in flight.
    pub async fn transmit<C: Channel>(
        &mut self,
        packet: Packet,
        channel: &C,
        peer: SocketAddr,
        acks: &mut mpsc::Receiver<u32>,
        rto: Duration,
    ) -> Result<u32, SessionError> {
        // Anything still queued answers an earlier exchange.
        while let Ok(stale) = acks.try_recv() {
            log::debug!("[sender] discarding stale ACK seq={stale}");
        }

        self.record_sent(packet);
        self.drive(channel, peer, acks, rto).await
    }

    /// Finish a frame left in flight by an interrupted [`transmit`].
    ///
    /// The peer may already hold it, so it is retransmitted unchanged until
    /// acknowledged rather than dropped; its sequence number is never reused
    /// for different bytes.  A no-op when nothing is in flight.
    ///
    /// [`transmit`]: Self::transmit
    pub async fn settle<C: Channel>(
        &mut self,
        channel: &C,
        peer: SocketAddr,
        acks: &mut mpsc::Receiver<u32>,
        rto: Duration,
    ) -> Result<(), SessionError> {
        if !self.has_unacked() {
            return Ok(());
        }
        log::debug!("[sender] resuming frame left in flight by an interrupted send");
        self.on_retransmit();
        self.drive(channel, peer, acks, rto).await.map(|_| ())
    }

    /// Send the in-flight frame until its ACK arrives.
    async fn drive<C: Channel>(
        &mut self,
        channel: &C,
        peer: SocketAddr,
        acks: &mut mpsc::Receiver<u32>,
        rto: Duration,
    ) -> Result<u32, SessionError> {
        let Some(entry) = self.unacked.as_ref() else {
            return Ok(0);
        };
        let seq = entry.packet.seq;
        let kind = entry.packet.kind;
        let len = entry.packet.payload.len();
        let bytes = entry.bytes.clone();

        loop {
            channel.send_to(&bytes, peer).await?;
            log::debug!(
                "[sender] → {kind} seq={seq} len={len} attempt={}",
                self.retransmit_count()
            );

            let deadline = tokio::time::Instant::now() + rto;
            loop {
                match tokio::time::timeout_at(deadline, acks.recv()).await {
                    Ok(Some(ack)) => {
                        let attempts = self.retransmit_count();
                        let elapsed = self.unacked.as_ref().map(|e| e.first_sent_at.elapsed());
                        if self.on_ack(ack) {
                            log::debug!(
                                "[sender] ← ACK seq={ack} after {attempts} attempt(s), {elapsed:?}"
                            );
                            return Ok(attempts);
                        }
                        log::debug!("[sender] ignoring stale ACK seq={ack} (want {seq})");
                    }
                    Ok(None) => return Err(SessionError::LoopTerminated),
                    Err(_elapsed) => break,
                }
            }

            self.on_retransmit();
            log::debug!("[sender] timeout; retransmitting {kind} seq={seq}");
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
