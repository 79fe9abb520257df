//! The outbound request queue: a FIFO of [`RequestRecord`]s stored in a
//! generational arena.
//!
//! The original firmware threaded this as a manually-linked list of
//! malloc'd records. Here each record lives in a [`slotmap::SlotMap`] and is
//! referenced by a [`RequestToken`] — a generational `(index, generation)`
//! pair — so a caller holding a stale token after a record is freed gets a
//! clean `None` on lookup instead of touching freed memory.

use slotmap::{new_key_type, SlotMap};

use crate::address::Address;

new_key_type! {
    /// Opaque handle to a queued [`RequestRecord`]. Cancellation and
    /// completion callbacks carry this, never a raw index.
    pub struct RequestToken;
}

/// Which collaborator a request is destined for. The outbound manager keeps
/// separate retry/timeout policy per kind (design §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    RadioConfig,
    Shade,
}

/// Lifecycle state of a queued record. Records only ever advance forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    WaitingToSend,
    WaitingForSerialAck,
    WaitingToSendNext,
}

/// An entry in the outbound queue.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub destination_kind: DestinationKind,
    pub destination: Address,
    pub retry_count: u32,
    pub retry_cap: u32,
    /// Ticks remaining in the post-ack settle window (design §4.3).
    pub ack_wait_ticks: u32,
    /// Discriminator the head-of-queue matcher uses to recognize its own
    /// confirmation frame among inbound traffic.
    pub expected_reply: u8,
    pub framed_bytes: Vec<u8>,
    pub state: RecordState,
}

impl RequestRecord {
    pub fn new(
        destination_kind: DestinationKind,
        destination: Address,
        retry_cap: u32,
        expected_reply: u8,
        framed_bytes: Vec<u8>,
    ) -> Self {
        RequestRecord {
            destination_kind,
            destination,
            retry_count: 0,
            retry_cap,
            ack_wait_ticks: 0,
            expected_reply,
            framed_bytes,
            state: RecordState::WaitingToSend,
        }
    }
}

/// FIFO of outbound records, head-to-tail enqueue order preserved by the
/// arena's insertion order plus an explicit ordered key list (slotmap does
/// not guarantee iteration order).
#[derive(Debug, Default)]
pub struct RequestQueue {
    records: SlotMap<RequestToken, RequestRecord>,
    order: Vec<RequestToken>,
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue::default()
    }

    pub fn push(&mut self, record: RequestRecord) -> RequestToken {
        let token = self.records.insert(record);
        self.order.push(token);
        token
    }

    pub fn get(&self, token: RequestToken) -> Option<&RequestRecord> {
        self.records.get(token)
    }

    pub fn get_mut(&mut self, token: RequestToken) -> Option<&mut RequestRecord> {
        self.records.get_mut(token)
    }

    pub fn head(&self) -> Option<RequestToken> {
        self.order.first().copied()
    }

    /// Remove a record. A record is only ever removed once, after its
    /// ack-wait has expired and its callback (if any) has fired — enforced
    /// by callers, not by this type, since the arena can't see callback
    /// state.
    pub fn remove(&mut self, token: RequestToken) -> Option<RequestRecord> {
        self.order.retain(|&t| t != token);
        self.records.remove(token)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if no record before `token` in enqueue order is still
    /// outstanding, i.e. `token` is eligible for promotion to
    /// `WaitingForSerialAck` (design §4.3's `get_next_message_to_send`).
    pub fn is_head(&self, token: RequestToken) -> bool {
        self.head() == Some(token)
    }

    /// The exactly-one-in-flight invariant: true if no record is currently
    /// `WaitingForSerialAck`.
    pub fn none_in_flight(&self) -> bool {
        !self
            .order
            .iter()
            .filter_map(|t| self.records.get(*t))
            .any(|r| r.state == RecordState::WaitingForSerialAck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(expected_reply: u8) -> RequestRecord {
        RequestRecord::new(DestinationKind::Shade, Address::None, 1, expected_reply, vec![])
    }

    #[test]
    fn fifo_order_preserved_across_removals() {
        let mut queue = RequestQueue::new();
        let a = queue.push(dummy(1));
        let b = queue.push(dummy(2));
        let c = queue.push(dummy(3));
        assert_eq!(queue.head(), Some(a));
        queue.remove(a);
        assert_eq!(queue.head(), Some(b));
        queue.remove(b);
        assert_eq!(queue.head(), Some(c));
    }

    #[test]
    fn stale_token_after_removal_returns_none() {
        let mut queue = RequestQueue::new();
        let a = queue.push(dummy(1));
        queue.remove(a);
        assert!(queue.get(a).is_none());
    }

    #[test]
    fn at_most_one_in_flight_is_observable() {
        let mut queue = RequestQueue::new();
        let a = queue.push(dummy(1));
        let b = queue.push(dummy(2));
        assert!(queue.none_in_flight());
        queue.get_mut(a).unwrap().state = RecordState::WaitingForSerialAck;
        assert!(!queue.none_in_flight());
        let _ = b;
    }
}
