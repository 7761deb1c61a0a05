use ulid::Ulid;

use crate::model::{BookingState, BookingTransition, Ms, SessionStatus};
use crate::qr::CodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed request, rejected before any session is touched.
    Invalid(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The member already holds an active booking on this session.
    AlreadyBooked {
        member_id: Ulid,
        booking_id: Ulid,
    },
    Ineligible(Ulid),
    SessionNotBookable {
        session_id: Ulid,
        status: SessionStatus,
    },
    InvalidStateTransition {
        booking_id: Ulid,
        from: BookingState,
        transition: BookingTransition,
    },
    InvalidSessionTransition {
        session_id: Ulid,
        from: SessionStatus,
        to: SessionStatus,
    },
    OutsideCheckInWindow {
        booking_id: Ulid,
        opens_at: Ms,
        closes_at: Ms,
    },
    SessionNotEnded {
        session_id: Ulid,
        ends_at: Ms,
    },
    CapacityBelowBooked {
        requested: u32,
        booked: u32,
    },
    InvalidCode(CodeError),
    CodeReplayed(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Invalid(_) => "INVALID_REQUEST",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::AlreadyBooked { .. } => "ALREADY_BOOKED",
            EngineError::Ineligible(_) => "INELIGIBLE",
            EngineError::SessionNotBookable { .. } => "SESSION_NOT_BOOKABLE",
            EngineError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            EngineError::InvalidSessionTransition { .. } => "INVALID_SESSION_TRANSITION",
            EngineError::OutsideCheckInWindow { .. } => "OUTSIDE_CHECKIN_WINDOW",
            EngineError::SessionNotEnded { .. } => "SESSION_NOT_ENDED",
            EngineError::CapacityBelowBooked { .. } => "CAPACITY_BELOW_BOOKED",
            EngineError::InvalidCode(_) => "INVALID_CODE",
            EngineError::CodeReplayed(_) => "CODE_REPLAYED",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::WalError(_) => "WAL_ERROR",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::AlreadyBooked { member_id, booking_id } => {
                write!(f, "member {member_id} already holds booking {booking_id}")
            }
            EngineError::Ineligible(member_id) => {
                write!(f, "member {member_id} has no valid entitlement")
            }
            EngineError::SessionNotBookable { session_id, status } => {
                write!(f, "session {session_id} is not bookable ({})", status.as_str())
            }
            EngineError::InvalidStateTransition { booking_id, from, transition } => write!(
                f,
                "booking {booking_id}: cannot {transition:?} from {}",
                from.as_str()
            ),
            EngineError::InvalidSessionTransition { session_id, from, to } => write!(
                f,
                "session {session_id}: cannot go from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            EngineError::OutsideCheckInWindow { booking_id, opens_at, closes_at } => write!(
                f,
                "booking {booking_id}: check-in is open from {opens_at} to {closes_at}"
            ),
            EngineError::SessionNotEnded { session_id, ends_at } => {
                write!(f, "session {session_id} has not ended (ends at {ends_at})")
            }
            EngineError::CapacityBelowBooked { requested, booked } => {
                write!(f, "capacity {requested} is below {booked} booked seats")
            }
            EngineError::InvalidCode(e) => write!(f, "{e}"),
            EngineError::CodeReplayed(nonce) => {
                write!(f, "check-in code {nonce} was already used for another booking")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<CodeError> for EngineError {
    fn from(e: CodeError) -> Self {
        EngineError::InvalidCode(e)
    }
}
