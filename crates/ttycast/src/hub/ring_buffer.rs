//! Bounded backlog of recent events for viewer catch-up.
//!
//! Slots are reused in place as the write position wraps. The generation
//! counter is the total number of events ever pushed, which doubles as the
//! sequence number of the next event, so a snapshot can report exactly how
//! many events were evicted before it was taken.

use ttycast_core::Event;

/// A fixed-capacity circular buffer of sequenced events.
#[derive(Debug)]
pub struct EventRing {
    slots: Vec<Option<Event>>,
    capacity: usize,
    /// Write position (wraps around).
    write_pos: usize,
    /// Total events ever pushed; the next event's sequence number.
    generation: u64,
}

/// Contents of the ring at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct RingSnapshot {
    /// `(seq, event)` pairs, oldest first.
    pub events: Vec<(u64, Event)>,
    /// Events evicted before the snapshot.
    pub omitted: u64,
    /// Events ever pushed.
    pub total: u64,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            capacity,
            write_pos: 0,
            generation: 0,
        }
    }

    /// Store `event`, evicting the oldest one if full. Returns its sequence number.
    pub fn push(&mut self, event: Event) -> u64 {
        let seq = self.generation;
        self.generation += 1;
        if self.capacity == 0 {
            return seq;
        }
        self.slots[self.write_pos] = Some(event);
        self.write_pos = (self.write_pos + 1) % self.capacity;
        seq
    }

    /// Copy out the buffered events in order.
    pub fn snapshot(&self) -> RingSnapshot {
        let len = self.len();
        let first_seq = self.generation - len as u64;
        // Oldest slot is at write_pos once wrapped, at 0 before.
        let start = if self.generation > self.capacity as u64 {
            self.write_pos
        } else {
            0
        };

        let events = (0..len)
            .filter_map(|i| {
                let slot = &self.slots[(start + i) % self.capacity];
                slot.clone().map(|ev| (first_seq + i as u64, ev))
            })
            .collect();

        RingSnapshot {
            events,
            omitted: first_seq,
            total: self.generation,
        }
    }

    /// Number of events currently stored.
    pub fn len(&self) -> usize {
        self.generation.min(self.capacity as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number the next pushed event will get.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
