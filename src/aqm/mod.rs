//! CoDel-style controlled-delay active queue management (C1).
//!
//! One [`Aqm`] instance guards a single FIFO of packets. It is driven
//! entirely by its owner (typically one [`crate::fq`] flow slot): the
//! owner serializes every `enqueue`/`dequeue`/`commit`/`purge` call, so
//! no internal locking is needed (see §5 of the design notes).
//!
//! The queueing delay ("sojourn") of the head packet is compared against
//! `target`; once the queue has been above target for a full `interval`,
//! the engine starts dropping packets at a rate that increases as
//! `1/sqrt(k)` for the `k`-th drop of the episode. The precomputed table
//! backing that control law lives in [`params`].

pub mod params;

use alloc::vec::Vec;

pub use params::CodelParams;
use smoltcp::time::Instant;

/// A queueable unit the AQM engine reads the byte length of.
///
/// The arrival timestamp that CoDel needs is *not* part of this trait:
/// per the redesign notes, the AQM keeps that bookkeeping itself in an
/// internal `Entry<P>` rather than reaching into caller-owned storage.
pub trait Packet {
    /// Length in bytes, used for `backlog` accounting and the
    /// `backlog <= quantum` escape hatch.
    fn byte_len(&self) -> u32;
}

struct Entry<P> {
    packet: P,
    timestamp: Instant,
}

/// Outcome of a single [`Aqm::dequeue`] call.
///
/// `packet` borrows the current head of the queue (if any survived the
/// drop loop); the caller must call [`Aqm::commit`] to actually remove
/// it once it has decided to transmit it. `dropped` holds every packet
/// this call evicted, in drop order, already removed from the queue.
pub struct DequeueOutcome<'a, P> {
    pub packet: Option<&'a P>,
    pub dropped: Vec<P>,
    pub drop_pkts: u32,
    pub drop_bytes: u32,
}

/// Per-queue CoDel state. See `SPEC_FULL.md` §3 for the field-level
/// invariants this type upholds.
pub struct Aqm<P> {
    q: alloc::collections::VecDeque<Entry<P>>,
    backlog: u32,
    dropping: bool,
    start: Option<Instant>,
    next: Instant,
    drops: u16,
    ldrops: u16,
}

impl<P> Default for Aqm<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Aqm<P> {
    pub fn new() -> Self {
        Aqm {
            q: alloc::collections::VecDeque::new(),
            backlog: 0,
            dropping: false,
            start: None,
            next: Instant::from_micros(0),
            drops: 0,
            ldrops: 0,
        }
    }

    /// Byte sum of the packets currently queued.
    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    /// Number of packets currently queued.
    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Whether this instance is currently in a dropping episode.
    pub fn is_dropping(&self) -> bool {
        self.dropping
    }
}

impl<P: Packet> Aqm<P> {
    /// Borrow the head packet without removing it.
    pub fn peek(&self) -> Option<&P> {
        self.q.front().map(|e| &e.packet)
    }
}

impl<P: Packet> Aqm<P> {
    /// Stamp `packet` with `now` and append it to the queue. Never fails.
    pub fn enqueue(&mut self, now: Instant, packet: P) {
        self.backlog += packet.byte_len();
        self.q.push_back(Entry {
            packet,
            timestamp: now,
        });
    }

    /// Pop the head packet, decrement `backlog`, and return it.
    ///
    /// Callers only invoke this for a packet previously surfaced by
    /// [`Self::dequeue`]'s `packet` field; calling it on an empty queue
    /// is a caller contract violation (§7), checked in debug builds.
    pub fn commit(&mut self) -> Option<P> {
        let entry = self.q.pop_front();
        debug_assert!(entry.is_some(), "commit() called on an empty AQM queue");
        entry.map(|e| {
            debug_assert!(self.backlog >= e.packet.byte_len());
            self.backlog -= e.packet.byte_len();
            if self.q.is_empty() {
                self.start = None;
            }
            e.packet
        })
    }

    /// Drain every queued packet into `sink`, clearing `backlog`. The
    /// cooperative-cancellation operation: no drops are counted.
    pub fn purge(&mut self, sink: &mut Vec<P>) {
        sink.reserve(self.q.len());
        for entry in self.q.drain(..) {
            sink.push(entry.packet);
        }
        self.backlog = 0;
        self.start = None;
        self.dropping = false;
        log::trace!("aqm: purge drained queue, backlog reset to 0");
    }

    /// Inspect the head packet and decide whether it's a candidate for
    /// dropping, updating `start` along the way. Returns
    /// `(has_head, drop_candidate)`.
    fn next_eligible(&mut self, params: &CodelParams, quantum: u32, now: Instant) -> (bool, bool) {
        let sojourn = match self.q.front() {
            Some(head) => now - head.timestamp,
            None => {
                self.start = None;
                return (false, false);
            }
        };

        if sojourn < params.target || self.backlog <= quantum {
            // Went (or stayed) below target: reset the above-target timer.
            self.start = None;
            return (true, false);
        }

        match self.start {
            None => {
                // Just went above target; require a full interval of
                // sustained overage before the first drop.
                self.start = Some(now + params.interval);
                (true, false)
            }
            Some(start) => (true, now > start),
        }
    }

    /// Drop packets that have overstayed `target`, if any, and surface
    /// the (still-queued) packet the caller should transmit next.
    ///
    /// `quantum` is the FQ scheduler's current deficit-round-robin
    /// quantum; a backlog at or below it disables dropping even while
    /// above `target` (small queues aren't the problem CoDel targets).
    pub fn dequeue(&mut self, params: &CodelParams, quantum: u32, now: Instant) -> DequeueOutcome<'_, P> {
        let mut dropped = Vec::new();
        let mut drop_pkts = 0u32;
        let mut drop_bytes = 0u32;

        let (has_head, mut drop) = self.next_eligible(params, quantum, now);
        if !has_head {
            self.dropping = false;
            return DequeueOutcome {
                packet: None,
                dropped,
                drop_pkts,
                drop_bytes,
            };
        }

        if self.dropping && !drop {
            // Sojourn fell back below target: leave dropping state.
            log::debug!("aqm: leaving dropping state, sojourn back under target");
            self.dropping = false;
        } else if self.dropping {
            while now >= self.next && self.dropping {
                if let Some(p) = self.commit() {
                    drop_bytes += p.byte_len();
                    drop_pkts += 1;
                    dropped.push(p);
                }
                self.drops = self.drops.saturating_add(1);

                let (has_next, drop_next) = self.next_eligible(params, quantum, now);
                if !drop_next {
                    self.dropping = false;
                } else {
                    self.next += params.interval_for(self.drops);
                }
                drop = drop_next;
                if !has_next {
                    break;
                }
            }
            let _ = drop;
        } else if drop {
            if let Some(p) = self.commit() {
                drop_bytes += p.byte_len();
                drop_pkts += 1;
                dropped.push(p);
            }
            // Peek ahead; codel_next's side effect (clearing `start`) still
            // matters even though its drop verdict is discarded here.
            let _ = self.next_eligible(params, quantum, now);

            self.dropping = true;
            log::debug!("aqm: entering dropping state");

            let delta = self.drops.wrapping_sub(self.ldrops);
            if delta > 1 && (now < self.next || (now - self.next) < params.grace) {
                self.drops = delta;
            } else {
                self.drops = 1;
            }
            self.next = now + params.interval_for(self.drops);
            self.ldrops = self.drops;
        }

        DequeueOutcome {
            packet: self.q.front().map(|e| &e.packet),
            dropped,
            drop_pkts,
            drop_bytes,
        }
    }
}
