//! Pending event ordering for engage-sync.
//!
//! This module provides the in-memory view of the outbound event queue with:
//! - Monotonic sequence assignment at enqueue time
//! - Contiguous prefix batch selection bounded by count and bytes
//! - Prefix removal on acknowledgement (never out-of-order removal)
//! - Oldest-first eviction once the capacity is exceeded
//!
//! The durable log lives in engage-client; this structure mirrors it and
//! decides what to persist. Events are only ever removed from the front.

use std::collections::VecDeque;

use engage_types::{Attributes, EventRecord, SequenceNumber, Timestamp};

/// Upper bounds for one delivery batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum number of events per batch.
    pub max_events: usize,
    /// Maximum summed JSON size of the events per batch.
    ///
    /// The first event is always included, even when it alone exceeds this.
    pub max_bytes: usize,
}

impl BatchLimits {
    /// Create new limits.
    pub fn new(max_events: usize, max_bytes: usize) -> Self {
        Self {
            max_events,
            max_bytes,
        }
    }
}

/// A contiguous run of the oldest pending events.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Events in ascending sequence order.
    pub events: Vec<EventRecord>,
    /// Summed JSON size of the events.
    pub encoded_bytes: usize,
}

impl Batch {
    /// Sequence number of the first event.
    pub fn first(&self) -> Option<SequenceNumber> {
        self.events.first().map(|e| e.sequence)
    }

    /// Sequence number of the last event. Acknowledging a batch removes
    /// everything up to and including this.
    pub fn last(&self) -> Option<SequenceNumber> {
        self.events.last().map(|e| e.sequence)
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Ordered sequence of events that have not been acknowledged.
///
/// Events flow through in this order:
/// 1. `prepare()` - build a record with the next sequence number
/// 2. `commit()` - append it once it is durable
/// 3. `select_batch()` - copy the oldest prefix for delivery
/// 4. `ack_through()` - drop the delivered prefix
///
/// A failed delivery needs no call: the prefix simply stays in place.
#[derive(Debug)]
pub struct PendingEvents {
    /// Maximum number of pending events before eviction.
    capacity: usize,
    /// Pending events, oldest first.
    events: VecDeque<EventRecord>,
    /// Highest sequence number ever handed out.
    last_assigned: SequenceNumber,
    /// Everything at or below this has been acknowledged or evicted.
    acked_through: SequenceNumber,
}

impl PendingEvents {
    /// Create an empty queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::new(),
            last_assigned: SequenceNumber::zero(),
            acked_through: SequenceNumber::zero(),
        }
    }

    /// Rebuild the queue from persisted state.
    ///
    /// Records at or below `acked_through` are skipped, as are records that
    /// would break ascending order. Sequence numbering resumes after the
    /// highest number seen, so numbers are never reused across restarts.
    pub fn restore(
        capacity: usize,
        records: impl IntoIterator<Item = EventRecord>,
        acked_through: SequenceNumber,
    ) -> Self {
        let mut pending = Self::new(capacity);
        pending.acked_through = acked_through;
        pending.last_assigned = acked_through;

        for record in records {
            if record.sequence <= pending.last_assigned {
                continue;
            }
            pending.last_assigned = record.sequence;
            pending.events.push_back(record);
        }
        pending
    }

    /// Build the next record without adding it.
    ///
    /// The caller persists the record and then calls [`commit`](Self::commit).
    /// Preparing twice without committing yields the same sequence number.
    pub fn prepare(
        &self,
        event_type: impl Into<String>,
        timestamp: Timestamp,
        parameters: Attributes,
        payload: Attributes,
    ) -> EventRecord {
        EventRecord {
            event_type: event_type.into(),
            timestamp,
            parameters,
            payload,
            sequence: self.last_assigned.next(),
        }
    }

    /// Append a prepared record.
    ///
    /// Returns the events evicted to stay within capacity, oldest first.
    /// Records that do not extend the sequence are ignored.
    pub fn commit(&mut self, record: EventRecord) -> Vec<EventRecord> {
        if record.sequence <= self.last_assigned {
            return Vec::new();
        }
        self.last_assigned = record.sequence;
        self.events.push_back(record);

        let mut evicted = Vec::new();
        while self.events.len() > self.capacity {
            if let Some(oldest) = self.events.pop_front() {
                self.acked_through = oldest.sequence;
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Copy the oldest contiguous prefix that fits within `limits`.
    ///
    /// Returns `None` when nothing is pending.
    pub fn select_batch(&self, limits: BatchLimits) -> Option<Batch> {
        let mut events = Vec::new();
        let mut encoded_bytes = 0usize;

        for event in self.events.iter().take(limits.max_events.max(1)) {
            let size = event.encoded_len();
            if !events.is_empty() && encoded_bytes + size > limits.max_bytes {
                break;
            }
            encoded_bytes += size;
            events.push(event.clone());
        }

        if events.is_empty() {
            None
        } else {
            Some(Batch {
                events,
                encoded_bytes,
            })
        }
    }

    /// Remove every pending event with a sequence number up to and including
    /// `last`. Returns the number removed.
    pub fn ack_through(&mut self, last: SequenceNumber) -> usize {
        let mut removed = 0;
        while self.events.front().is_some_and(|e| e.sequence <= last) {
            self.events.pop_front();
            removed += 1;
        }
        if last > self.acked_through {
            self.acked_through = last.min(self.last_assigned);
        }
        removed
    }

    /// Everything at or below this has been acknowledged or evicted.
    pub fn acked_through(&self) -> SequenceNumber {
        self.acked_through
    }

    /// The sequence number the next enqueued event will receive.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.last_assigned.next()
    }

    /// Pending events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
