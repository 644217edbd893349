//! Outstanding-command queue.
//!
//! FIFO of act frames awaiting confirmation. The head is the oldest
//! unconfirmed frame; pairing with incoming confirmations is strictly
//! head-of-line. Entries past the head wait their turn on the wire: a frame
//! is transmitted when pushed onto an empty queue, otherwise when it
//! becomes head after a pop.

use std::collections::VecDeque;

use crate::codec::Frame;
use crate::error::{DatacollError, Result};
use crate::types::{Apci, Cause, Typ, UFrame};

/// A queued act frame and whether it has hit the wire yet.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub frame: Frame,
    pub sent: bool,
}

/// Bounded FIFO of unconfirmed act frames.
#[derive(Debug)]
pub struct SendQueue {
    items: VecDeque<PendingFrame>,
    cap: usize,
}

impl SendQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::new(),
            cap,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Append an act frame; refused when the queue is full.
    pub fn push(&mut self, frame: Frame, sent: bool) -> Result<()> {
        if self.items.len() >= self.cap {
            return Err(DatacollError::QueueFull(self.items.len()));
        }
        self.items.push_back(PendingFrame { frame, sent });
        Ok(())
    }

    pub fn head(&self) -> Option<&PendingFrame> {
        self.items.front()
    }

    pub fn pop(&mut self) -> Option<PendingFrame> {
        self.items.pop_front()
    }

    pub fn mark_head_sent(&mut self) {
        if let Some(head) = self.items.front_mut() {
            head.sent = true;
        }
    }

    /// True when the head is the given U act (cross-start / cross-test
    /// detection).
    pub fn head_is_u(&self, action: UFrame) -> bool {
        matches!(self.head(), Some(pending) if pending.frame.apci == Apci::U(action))
    }

    /// Head-of-line pairing: does this incoming frame confirm the head?
    ///
    /// A U confirmation matches the head act of the same kind. An I-frame
    /// matches a head I act when the TYPs agree, or when it is a read
    /// response (`cause=req`) answering a pending `C_RD_NA_1`.
    pub fn confirms_head(&self, incoming: &Frame) -> bool {
        let Some(head) = self.head() else {
            return false;
        };
        match (&head.frame.apci, &incoming.apci) {
            (Apci::U(act), Apci::U(con)) => act.confirmation() == Some(*con),
            (Apci::I { .. }, Apci::I { .. }) => {
                let (Some(head_asdu), Some(in_asdu)) = (&head.frame.asdu, &incoming.asdu) else {
                    return false;
                };
                head_asdu.header.typ == in_asdu.header.typ
                    || (in_asdu.header.cause == Cause::Req
                        && head_asdu.header.typ == Typ::C_RD_NA_1)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asdu, Ioa};

    fn i_frame(asdu: Asdu) -> Frame {
        Frame::i(asdu)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = SendQueue::new(8);
        queue.push(Frame::u(UFrame::StartDtAct), true).unwrap();
        queue
            .push(i_frame(Asdu::interrogation_command(1)), false)
            .unwrap();

        assert_eq!(queue.len(), 2);
        let first = queue.pop().unwrap();
        assert_eq!(first.frame.apci, Apci::U(UFrame::StartDtAct));
        let second = queue.pop().unwrap();
        assert!(second.frame.asdu.is_some());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_capacity() {
        let mut queue = SendQueue::new(2);
        queue.push(Frame::u(UFrame::StartDtAct), true).unwrap();
        queue.push(Frame::u(UFrame::TestFrAct), false).unwrap();
        let err = queue
            .push(Frame::u(UFrame::TestFrAct), false)
            .unwrap_err();
        assert!(matches!(err, DatacollError::QueueFull(2)));
    }

    #[test]
    fn test_u_confirmation_pairing() {
        let mut queue = SendQueue::new(8);
        queue.push(Frame::u(UFrame::StartDtAct), true).unwrap();

        assert!(queue.confirms_head(&Frame::u(UFrame::StartDtCon)));
        assert!(!queue.confirms_head(&Frame::u(UFrame::TestFrCon)));
        assert!(!queue.confirms_head(&Frame::u(UFrame::StartDtAct)));
    }

    #[test]
    fn test_i_confirmation_by_typ() {
        let mut queue = SendQueue::new(8);
        queue
            .push(i_frame(Asdu::interrogation_command(1)), true)
            .unwrap();

        // actcon echo of C_IC_NA_1
        let mut con = Asdu::interrogation_command(1);
        con.header.cause = Cause::ActCon;
        assert!(queue.confirms_head(&i_frame(con)));

        // unrelated type does not confirm
        let other = Asdu::counter_interrogation(1);
        assert!(!queue.confirms_head(&i_frame(other)));
    }

    #[test]
    fn test_read_response_pairing() {
        let mut queue = SendQueue::new(8);
        queue
            .push(i_frame(Asdu::read_command(1, Ioa::new(200))), true)
            .unwrap();

        // measurement with cause=req answers a pending read
        let mut response = Asdu::with_object(
            crate::types::AsduHeader::new(Typ::M_ME_NA_1, 1, Cause::Req, 1),
            Ioa::new(200),
            &[0x00, 0x40, 0x00],
        );
        response.header.cause = Cause::Req;
        assert!(queue.confirms_head(&i_frame(response.clone())));

        // same frame does not confirm a non-read head
        let mut queue = SendQueue::new(8);
        queue
            .push(i_frame(Asdu::interrogation_command(1)), true)
            .unwrap();
        assert!(!queue.confirms_head(&i_frame(response)));
    }

    #[test]
    fn test_head_is_u() {
        let mut queue = SendQueue::new(8);
        assert!(!queue.head_is_u(UFrame::StartDtAct));
        queue.push(Frame::u(UFrame::StartDtAct), true).unwrap();
        assert!(queue.head_is_u(UFrame::StartDtAct));
        assert!(!queue.head_is_u(UFrame::TestFrAct));
    }

    #[test]
    fn test_mark_head_sent() {
        let mut queue = SendQueue::new(8);
        queue.push(Frame::u(UFrame::TestFrAct), false).unwrap();
        assert!(!queue.head().unwrap().sent);
        queue.mark_head_sent();
        assert!(queue.head().unwrap().sent);
    }
}
