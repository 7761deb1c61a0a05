//! Seat accounting and waitlist ordering for one session.
//!
//! The ledger never creates or transitions bookings; it only answers "is
//! there a seat" and "who is next". Callers hold the session's write lock,
//! which makes every method here atomic with respect to all other callers
//! for the same session.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Ms, WaitlistEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatOutcome {
    Granted,
    CapacityFull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// The freed seat is now held for this entry until it is promoted or lapses.
    Next(WaitlistEntry),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Withdrawal {
    /// The entry was still queued; nothing else moves.
    Dequeued,
    /// The entry was holding an offered seat, which passes on.
    OfferPassed(Release),
    NotWaiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLedger {
    capacity: u32,
    booked: u32,
    /// Waiting members in strict `seq` order.
    queue: VecDeque<WaitlistEntry>,
    /// Entries popped off the queue for a freed seat but not yet promoted.
    /// Each one holds a seat.
    offers: VecDeque<WaitlistEntry>,
    next_seq: u64,
}

impl CapacityLedger {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            booked: 0,
            queue: VecDeque::new(),
            offers: VecDeque::new(),
            next_seq: 1,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn booked(&self) -> u32 {
        self.booked
    }

    /// Seats neither booked nor held for an offered waitlist entry.
    pub fn open_seats(&self) -> u32 {
        self.capacity
            .saturating_sub(self.booked)
            .saturating_sub(self.offers.len() as u32)
    }

    /// Queued plus offered entries.
    pub fn waiting_len(&self) -> usize {
        self.queue.len() + self.offers.len()
    }

    /// Offered entries first (they are ahead of everyone still queued), then the queue.
    pub fn waitlist(&self) -> impl Iterator<Item = &WaitlistEntry> {
        self.offers.iter().chain(self.queue.iter())
    }

    pub fn front_offer(&self) -> Option<&WaitlistEntry> {
        self.offers.front()
    }

    pub fn has_pending_offers(&self) -> bool {
        !self.offers.is_empty()
    }

    /// Bounded increment: grants only while an unheld seat remains.
    pub fn try_reserve_seat(&mut self) -> SeatOutcome {
        if self.open_seats() == 0 {
            return SeatOutcome::CapacityFull;
        }
        self.booked += 1;
        SeatOutcome::Granted
    }

    /// Append to the tail of the waitlist with the next sequence number.
    pub fn enqueue(&mut self, session_id: Ulid, member_id: Ulid, booking_id: Ulid, at: Ms) -> WaitlistEntry {
        let entry = WaitlistEntry {
            session_id,
            member_id,
            booking_id,
            seq: self.next_seq,
            enqueued_at: at,
        };
        self.next_seq += 1;
        self.queue.push_back(entry.clone());
        entry
    }

    /// Free one booked seat and, if anyone is waiting, hold it for the head.
    pub fn release_seat(&mut self) -> Release {
        self.booked = self.booked.saturating_sub(1);
        self.offer_next()
    }

    /// Free one booked seat without offering it to the waitlist.
    pub fn release_seat_without_offer(&mut self) {
        self.booked = self.booked.saturating_sub(1);
    }

    /// Turn the offer held for `booking_id` into a booked seat. Offers are
    /// claimed front-first; anything else is refused.
    pub fn claim_offer(&mut self, booking_id: Ulid) -> bool {
        match self.offers.front() {
            Some(entry) if entry.booking_id == booking_id && self.booked < self.capacity => {
                self.offers.pop_front();
                self.booked += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop the offer held for `booking_id`; the seat goes to the next head.
    pub fn discard_offer(&mut self, booking_id: Ulid) -> Release {
        let Some(pos) = self.offers.iter().position(|e| e.booking_id == booking_id) else {
            return Release::Empty;
        };
        self.offers.remove(pos);
        self.offer_next()
    }

    /// A waitlisted member leaves of their own accord.
    pub fn withdraw(&mut self, booking_id: Ulid) -> Withdrawal {
        if let Some(pos) = self.queue.iter().position(|e| e.booking_id == booking_id) {
            self.queue.remove(pos);
            return Withdrawal::Dequeued;
        }
        if self.offers.iter().any(|e| e.booking_id == booking_id) {
            return Withdrawal::OfferPassed(self.discard_offer(booking_id));
        }
        Withdrawal::NotWaiting
    }

    /// Change capacity. Refuses to shrink below the booked count. With
    /// `offer`, growth offers each newly opened seat to the next waiting entry.
    pub fn resize(&mut self, capacity: u32, offer: bool) -> Result<Vec<WaitlistEntry>, u32> {
        if capacity < self.booked {
            return Err(self.booked);
        }
        self.capacity = capacity;
        // Shrinking below booked + offers withdraws the excess offers back to the queue head.
        while self.booked + self.offers.len() as u32 > self.capacity {
            if let Some(entry) = self.offers.pop_back() {
                self.queue.push_front(entry);
            }
        }
        let mut offered = Vec::new();
        while offer && self.open_seats() > 0 {
            match self.offer_next() {
                Release::Next(entry) => offered.push(entry),
                Release::Empty => break,
            }
        }
        Ok(offered)
    }

    /// Empty the waitlist entirely, returning everything that was waiting.
    pub fn clear_waitlist(&mut self) -> Vec<WaitlistEntry> {
        let mut drained: Vec<WaitlistEntry> = self.offers.drain(..).collect();
        drained.extend(self.queue.drain(..));
        drained
    }

    /// Hold an open seat for the queue head, if there is both.
    fn offer_next(&mut self) -> Release {
        if self.open_seats() == 0 {
            return Release::Empty;
        }
        match self.queue.pop_front() {
            Some(entry) => {
                self.offers.push_back(entry.clone());
                Release::Next(entry)
            }
            None => Release::Empty,
        }
    }
}
