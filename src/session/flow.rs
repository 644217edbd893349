//! Sequence-number accounting and k/w flow control.

use crate::error::{DatacollError, Result};
use crate::types::SEQ_MODULO;

/// Per-session sequence and flow counters.
///
/// `ssn`/`rsn` are the 15-bit send/receive sequence numbers. `k` counts
/// I-frames sent but not yet acknowledged by the peer; `w` counts I-frames
/// received since we last acknowledged (S-frame or piggyback).
#[derive(Debug, Clone)]
pub struct FlowControl {
    ssn: u16,
    rsn: u16,
    k: u16,
    w: u16,
    k_limit: u16,
    w_limit: u16,
}

impl FlowControl {
    pub fn new(k_limit: u16, w_limit: u16) -> Self {
        Self {
            ssn: 0,
            rsn: 0,
            k: 0,
            w: 0,
            k_limit,
            w_limit,
        }
    }

    /// Clear all counters (entering Connecting).
    pub fn reset(&mut self) {
        self.ssn = 0;
        self.rsn = 0;
        self.k = 0;
        self.w = 0;
    }

    pub fn ssn(&self) -> u16 {
        self.ssn
    }

    pub fn rsn(&self) -> u16 {
        self.rsn
    }

    pub fn k(&self) -> u16 {
        self.k
    }

    pub fn w(&self) -> u16 {
        self.w
    }

    /// Account for a transmitted I-frame: advance `ssn`, one more frame in
    /// flight, and the piggybacked `rsn` acknowledges everything received.
    pub fn on_i_sent(&mut self) {
        self.ssn = (self.ssn + 1) % SEQ_MODULO;
        self.k += 1;
        self.w = 0;
    }

    /// Account for a transmitted S-frame.
    pub fn on_s_sent(&mut self) {
        self.w = 0;
    }

    /// Validate the send sequence number of a received I-frame and advance
    /// `rsn`. A mismatch is fatal for the session.
    pub fn accept_peer_ssn(&mut self, peer_ssn: u16) -> Result<()> {
        if peer_ssn != self.rsn {
            return Err(DatacollError::SequenceMismatch {
                expected: self.rsn,
                actual: peer_ssn,
            });
        }
        self.rsn = (self.rsn + 1) % SEQ_MODULO;
        self.w += 1;
        Ok(())
    }

    /// Recompute `k` from a received acknowledgment.
    ///
    /// `peer_rsn` must lie inside the outstanding window `[ssn - k, ssn]`
    /// (modulo 32768); anything else acknowledges frames never sent and is
    /// fatal for the session.
    pub fn acknowledge(&mut self, peer_rsn: u16) -> Result<()> {
        let outstanding = (self.ssn.wrapping_sub(peer_rsn)) % SEQ_MODULO;
        if outstanding > self.k {
            return Err(DatacollError::AckOutOfWindow {
                ssn: self.ssn,
                peer_rsn,
            });
        }
        self.k = outstanding;
        Ok(())
    }

    /// W receive threshold reached: an S-frame is owed now.
    pub fn w_reached(&self) -> bool {
        self.w >= self.w_limit
    }

    /// K send window exhausted.
    pub fn at_k_limit(&self) -> bool {
        self.k >= self.k_limit
    }
}
