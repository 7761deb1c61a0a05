use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ledger::CapacityLedger;

/// Unix milliseconds.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Lifecycles ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn can_transition_to(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Scheduled, InProgress | Completed | Cancelled) | (InProgress, Completed | Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Some(SessionStatus::Scheduled),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" | "canceled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingState {
    Booked,
    Waitlisted,
    CheckedIn,
    Cancelled,
    NoShow,
}

impl BookingState {
    /// Active bookings count against the one-per-(member, session) rule.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BookingState::Booked | BookingState::Waitlisted | BookingState::CheckedIn
        )
    }

    /// States that occupy one of the session's seats.
    pub fn holds_seat(self) -> bool {
        matches!(self, BookingState::Booked | BookingState::CheckedIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingState::Booked => "booked",
            BookingState::Waitlisted => "waitlisted",
            BookingState::CheckedIn => "checked_in",
            BookingState::Cancelled => "cancelled",
            BookingState::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "booked" => Some(BookingState::Booked),
            "waitlisted" => Some(BookingState::Waitlisted),
            "checked_in" => Some(BookingState::CheckedIn),
            "cancelled" | "canceled" => Some(BookingState::Cancelled),
            "no_show" => Some(BookingState::NoShow),
            _ => None,
        }
    }
}

/// Every state change a booking can undergo after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingTransition {
    Promote,
    CheckIn,
    Cancel,
    MarkNoShow,
}

impl BookingTransition {
    /// The transition table. `None` means the transition is illegal from `from`.
    pub fn target(self, from: BookingState) -> Option<BookingState> {
        use BookingState::*;
        match (self, from) {
            (BookingTransition::Promote, Waitlisted) => Some(Booked),
            (BookingTransition::CheckIn, Booked) => Some(CheckedIn),
            (BookingTransition::Cancel, Booked | Waitlisted) => Some(Cancelled),
            (BookingTransition::MarkNoShow, Booked) => Some(NoShow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckInMethod {
    None,
    Manual,
    Qr,
}

impl CheckInMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckInMethod::None => "none",
            CheckInMethod::Manual => "manual",
            CheckInMethod::Qr => "qr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    Member,
    Staff,
    /// Dropped from the waitlist because the entitlement lapsed before promotion.
    EntitlementLapsed,
    SessionCancelled,
    /// Still waiting when the session closed.
    SessionCompleted,
}

impl CancelReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelReason::Member => "member",
            CancelReason::Staff => "staff",
            CancelReason::EntitlementLapsed => "entitlement_lapsed",
            CancelReason::SessionCancelled => "session_cancelled",
            CancelReason::SessionCompleted => "session_completed",
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

/// One member's reservation against one session. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub member_id: Ulid,
    pub session_id: Ulid,
    pub state: BookingState,
    pub check_in_method: CheckInMethod,
    pub waitlist_seq: Option<u64>,
    pub cancel_reason: Option<CancelReason>,
    pub requested_at: Ms,
    pub booked_at: Option<Ms>,
    pub waitlisted_at: Option<Ms>,
    pub checked_in_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub no_show_at: Option<Ms>,
}

impl Booking {
    pub fn requested(id: Ulid, member_id: Ulid, session_id: Ulid, at: Ms) -> Self {
        Self {
            id,
            member_id,
            session_id,
            state: BookingState::Waitlisted,
            check_in_method: CheckInMethod::None,
            waitlist_seq: None,
            cancel_reason: None,
            requested_at: at,
            booked_at: None,
            waitlisted_at: None,
            checked_in_at: None,
            cancelled_at: None,
            no_show_at: None,
        }
    }

    /// Run `transition` through the table and stamp the matching timestamp.
    /// Returns the previous state.
    pub fn transition(&mut self, transition: BookingTransition, at: Ms) -> Option<BookingState> {
        let from = self.state;
        let to = transition.target(from)?;
        self.state = to;
        match to {
            BookingState::Booked => self.booked_at = Some(at),
            BookingState::CheckedIn => self.checked_in_at = Some(at),
            BookingState::Cancelled => self.cancelled_at = Some(at),
            BookingState::NoShow => self.no_show_at = Some(at),
            BookingState::Waitlisted => self.waitlisted_at = Some(at),
        }
        Some(from)
    }

    /// Last time anything happened to this booking.
    pub fn updated_at(&self) -> Ms {
        [
            self.booked_at,
            self.waitlisted_at,
            self.checked_in_at,
            self.cancelled_at,
            self.no_show_at,
        ]
        .into_iter()
        .flatten()
        .fold(self.requested_at, Ms::max)
    }
}

/// Position record in a session's waitlist. `seq` is assigned at enqueue and
/// is strictly increasing without gaps per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub session_id: Ulid,
    pub member_id: Ulid,
    pub booking_id: Ulid,
    pub seq: u64,
    pub enqueued_at: Ms,
}

/// Live state of one class session. Guarded by the session's own lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: Ulid,
    pub span: Span,
    pub status: SessionStatus,
    pub ledger: CapacityLedger,
    /// Every booking ever made against this session, including cancelled ones.
    pub bookings: HashMap<Ulid, Booking>,
    /// member_id → active booking id.
    pub active: HashMap<Ulid, Ulid>,
    /// Seat holders in the order their seats were granted.
    pub seated: Vec<Ulid>,
    /// Check-in code nonce → booking it checked in.
    pub consumed_codes: HashMap<Ulid, Ulid>,
}

impl SessionState {
    pub fn new(id: Ulid, capacity: u32, span: Span) -> Self {
        Self {
            id,
            span,
            status: SessionStatus::Scheduled,
            ledger: CapacityLedger::new(capacity),
            bookings: HashMap::new(),
            active: HashMap::new(),
            seated: Vec::new(),
            consumed_codes: HashMap::new(),
        }
    }

    pub fn active_booking_for(&self, member_id: &Ulid) -> Option<&Booking> {
        self.active.get(member_id).and_then(|id| self.bookings.get(id))
    }

    /// Seat holders in grant order.
    pub fn roster(&self) -> impl Iterator<Item = &Booking> {
        self.seated.iter().filter_map(|id| self.bookings.get(id))
    }

    /// Checks the structural invariants. Used by tests and after replay.
    pub fn check_invariants(&self) -> Result<(), String> {
        let holding = self
            .bookings
            .values()
            .filter(|b| b.state.holds_seat())
            .count();
        if holding != self.ledger.booked() as usize {
            return Err(format!(
                "booked count {} != seat-holding bookings {holding}",
                self.ledger.booked()
            ));
        }
        if self.ledger.booked() > self.ledger.capacity() {
            return Err(format!(
                "booked {} exceeds capacity {}",
                self.ledger.booked(),
                self.ledger.capacity()
            ));
        }
        if self.seated.len() != holding {
            return Err(format!("roster has {} entries, expected {holding}", self.seated.len()));
        }
        let active = self.bookings.values().filter(|b| b.state.is_active()).count();
        if active != self.active.len() {
            return Err(format!("{active} active bookings but {} indexed", self.active.len()));
        }
        let waiting = self
            .bookings
            .values()
            .filter(|b| b.state == BookingState::Waitlisted)
            .count();
        if waiting != self.ledger.waiting_len() {
            return Err(format!(
                "{waiting} waitlisted bookings but {} ledger entries",
                self.ledger.waiting_len()
            ));
        }
        Ok(())
    }
}

/// WAL record format. Flat, no nesting.
///
/// Replaying the same events in order always reproduces the same session
/// state: seat grants and waitlist positions are decided by `apply`, not
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SessionScheduled {
        id: Ulid,
        capacity: u32,
        span: Span,
    },
    SessionResized {
        id: Ulid,
        capacity: u32,
        reoffer: bool,
    },
    SessionStatusChanged {
        id: Ulid,
        status: SessionStatus,
        at: Ms,
    },
    BookingRequested {
        id: Ulid,
        session_id: Ulid,
        member_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        session_id: Ulid,
        reason: CancelReason,
        reoffer: bool,
        at: Ms,
    },
    WaitlistPromoted {
        id: Ulid,
        session_id: Ulid,
        at: Ms,
    },
    WaitlistLapsed {
        id: Ulid,
        session_id: Ulid,
        at: Ms,
    },
    CheckedIn {
        id: Ulid,
        session_id: Ulid,
        method: CheckInMethod,
        code: Option<Ulid>,
        at: Ms,
    },
    MarkedNoShow {
        id: Ulid,
        session_id: Ulid,
        reoffer: bool,
        at: Ms,
    },
    /// Compaction snapshot.
    SessionRestored(Box<SessionState>),
}

impl Event {
    pub fn session_id(&self) -> Ulid {
        match self {
            Event::SessionScheduled { id, .. }
            | Event::SessionResized { id, .. }
            | Event::SessionStatusChanged { id, .. } => *id,
            Event::BookingRequested { session_id, .. }
            | Event::BookingCancelled { session_id, .. }
            | Event::WaitlistPromoted { session_id, .. }
            | Event::WaitlistLapsed { session_id, .. }
            | Event::CheckedIn { session_id, .. }
            | Event::MarkedNoShow { session_id, .. } => *session_id,
            Event::SessionRestored(state) => state.id,
        }
    }
}

// ── Notices for the notification collaborator ───────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    BookingConfirmed,
    BookingCancelled,
    WaitlistJoined,
    WaitlistPromoted,
    WaitlistLapsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub booking_id: Ulid,
    pub member_id: Ulid,
    pub session_id: Ulid,
    pub at: Ms,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Ulid,
    pub capacity: u32,
    pub booked: u32,
    pub waitlisted: u32,
    pub start: Ms,
    pub end: Ms,
    pub status: SessionStatus,
}

impl From<&SessionState> for SessionInfo {
    fn from(ss: &SessionState) -> Self {
        Self {
            id: ss.id,
            capacity: ss.ledger.capacity(),
            booked: ss.ledger.booked(),
            waitlisted: ss.ledger.waiting_len() as u32,
            start: ss.span.start,
            end: ss.span.end,
            status: ss.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn transition_table_allows_only_documented_edges() {
        use BookingState::*;
        use BookingTransition::*;
        let all = [Booked, Waitlisted, CheckedIn, Cancelled, NoShow];
        let mut allowed = Vec::new();
        for t in [Promote, CheckIn, Cancel, MarkNoShow] {
            for from in all {
                if let Some(to) = t.target(from) {
                    allowed.push((from, to));
                }
            }
        }
        assert_eq!(
            allowed,
            vec![
                (Waitlisted, Booked),
                (Booked, CheckedIn),
                (Booked, Cancelled),
                (Waitlisted, Cancelled),
                (Booked, NoShow),
            ]
        );
    }

    #[test]
    fn waitlisted_cannot_check_in() {
        assert_eq!(BookingTransition::CheckIn.target(BookingState::Waitlisted), None);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for t in [
            BookingTransition::Promote,
            BookingTransition::CheckIn,
            BookingTransition::Cancel,
            BookingTransition::MarkNoShow,
        ] {
            assert_eq!(t.target(BookingState::Cancelled), None);
            assert_eq!(t.target(BookingState::NoShow), None);
        }
    }

    #[test]
    fn booking_transition_stamps_time() {
        let mut b = Booking::requested(Ulid::new(), Ulid::new(), Ulid::new(), 10);
        b.state = BookingState::Booked;
        assert_eq!(b.transition(BookingTransition::CheckIn, 50), Some(BookingState::Booked));
        assert_eq!(b.state, BookingState::CheckedIn);
        assert_eq!(b.checked_in_at, Some(50));
        assert_eq!(b.updated_at(), 50);
        // Illegal transition leaves the booking untouched
        assert_eq!(b.transition(BookingTransition::Cancel, 60), None);
        assert_eq!(b.state, BookingState::CheckedIn);
        assert_eq!(b.cancelled_at, None);
    }

    #[test]
    fn session_status_table() {
        use SessionStatus::*;
        assert!(Scheduled.can_transition_to(InProgress));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Scheduled));
        assert!(!Cancelled.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Scheduled));
    }

    #[test]
    fn state_names_roundtrip() {
        for s in [
            BookingState::Booked,
            BookingState::Waitlisted,
            BookingState::CheckedIn,
            BookingState::Cancelled,
            BookingState::NoShow,
        ] {
            assert_eq!(BookingState::parse(s.as_str()), Some(s));
        }
        assert_eq!(SessionStatus::parse("IN_PROGRESS"), Some(SessionStatus::InProgress));
        assert_eq!(SessionStatus::parse("later"), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingRequested {
            id: Ulid::new(),
            session_id: Ulid::new(),
            member_id: Ulid::new(),
            at: 1_700_000_000_000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn snapshot_event_roundtrips_through_bincode() {
        let mut ss = SessionState::new(Ulid::new(), 3, Span::new(1000, 2000));
        let b = Booking::requested(Ulid::new(), Ulid::new(), ss.id, 5);
        ss.active.insert(b.member_id, b.id);
        ss.bookings.insert(b.id, b);
        let event = Event::SessionRestored(Box::new(ss.clone()));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.session_id(), ss.id);
        assert_eq!(decoded, event);
    }
}
