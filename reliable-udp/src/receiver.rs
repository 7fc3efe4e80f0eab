//! Inbound fragment reordering.
//!
//! The [`Receiver`] is responsible for everything that happens *after* a raw
//! datagram is decoded into a DATA [`crate::packet::Packet`] and *before* the
//! application sees the payload:
//! - Buffering out-of-order fragments until the gap before them is filled.
//! - Releasing fragments strictly in sequence order, each exactly once.
//! - Detecting and discarding duplicates.
//! - Remembering where the peer's stream ends once its FIN has been seen.
//!
//! The [`Receiver`] does **not** send ACKs itself; the receive loop in
//! [`crate::event_loop`] acknowledges every DATA frame regardless of what
//! [`Receiver::on_segment`] decides.

use std::collections::BTreeMap;

/// Default number of sequence numbers ahead of `rcv_nxt` that will be buffered.
pub const DEFAULT_REORDER_WINDOW: u32 = 1024;

/// Largest usable window: half the sequence space, so a frame behind
/// `rcv_nxt` can always be told apart from one ahead of it.
pub const MAX_REORDER_WINDOW: u32 = u32::MAX / 2;

/// What [`Receiver::on_segment`] did with a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// Stored; it may or may not be deliverable yet.
    Buffered,
    /// Already buffered, or already delivered to the application.
    Duplicate,
    /// Too far ahead of `rcv_nxt`; not stored.
    OutOfWindow,
}

/// Receive-side reorder buffer for a single session.
#[derive(Debug)]
pub struct Receiver {
    /// Next sequence number owed to the application (`RCV.NXT`).
    ///
    /// Advances by one each time [`pop_ready`](Self::pop_ready) releases a
    /// fragment; never moves backwards.
    pub rcv_nxt: u32,

    /// Fragments with `seq >= rcv_nxt` that have arrived but not yet been
    /// released.
    out_of_order: BTreeMap<u32, Vec<u8>>,

    /// How far ahead of `rcv_nxt` a fragment may be and still be stored.
    window: u32,

    /// Sequence number carried by the peer's FIN, once seen.
    fin_seq: Option<u32>,
}

impl Receiver {
    /// Create a new [`Receiver`] expecting sequence number `0` first.
    pub fn new(window: u32) -> Self {
        Self {
            rcv_nxt: 0,
            out_of_order: BTreeMap::new(),
            window: window.clamp(1, MAX_REORDER_WINDOW),
            fin_seq: None,
        }
    }

    /// Process an inbound DATA fragment.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> Segment {
        let ahead = seq.wrapping_sub(self.rcv_nxt);
        if ahead > MAX_REORDER_WINDOW {
            // Behind `rcv_nxt`: already delivered.
            return Segment::Duplicate;
        }
        if ahead >= self.window {
            return Segment::OutOfWindow;
        }
        if self.out_of_order.contains_key(&seq) {
            return Segment::Duplicate;
        }
        self.out_of_order.insert(seq, payload.to_vec());
        Segment::Buffered
    }

    /// Release the fragment for `rcv_nxt`, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<Vec<u8>> {
        let payload = self.out_of_order.remove(&self.rcv_nxt)?;
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        Some(payload)
    }

    /// Record the peer's FIN.  Only the first one counts; retransmitted FINs
    /// carry the same sequence number anyway.
    pub fn on_fin(&mut self, fin_seq: u32) {
        if self.fin_seq.is_none() {
            self.fin_seq = Some(fin_seq);
        }
    }

    /// `true` once a FIN has been seen and every fragment before it released.
    pub fn is_finished(&self) -> bool {
        self.fin_seq == Some(self.rcv_nxt)
    }

    /// `true` once a FIN has been seen.
    pub fn fin_received(&self) -> bool {
        self.fin_seq.is_some()
    }

    /// Number of fragments held back waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.out_of_order.len()
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new(DEFAULT_REORDER_WINDOW)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
