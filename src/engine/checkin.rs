use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Result of a self-service check-in. Scanning again after a successful
/// check-in is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInOutcome {
    CheckedIn(Booking),
    AlreadyCheckedIn(Booking),
}

impl CheckInOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            CheckInOutcome::CheckedIn(b) | CheckInOutcome::AlreadyCheckedIn(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            CheckInOutcome::CheckedIn(b) | CheckInOutcome::AlreadyCheckedIn(b) => b,
        }
    }
}

impl Engine {
    /// Staff check-in by booking id.
    pub async fn check_in(&self, id: Ulid, method: CheckInMethod) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        self.check_in_locked(&mut guard, id, method, None).await
    }

    /// Self-service check-in: resolves the member's active booking on the session.
    pub async fn check_in_by_code(
        &self,
        member_id: Ulid,
        session_id: Ulid,
    ) -> Result<CheckInOutcome, EngineError> {
        let rs = self
            .get_session_state(&session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        let mut guard = rs.write().await;
        let booking = guard
            .active_booking_for(&member_id)
            .ok_or(EngineError::NotFound(member_id))?;
        if booking.state == BookingState::CheckedIn {
            tracing::debug!("booking {}: already checked in", booking.id);
            return Ok(CheckInOutcome::AlreadyCheckedIn(booking.clone()));
        }
        let id = booking.id;
        self.check_in_locked(&mut guard, id, CheckInMethod::Qr, None)
            .await
            .map(CheckInOutcome::CheckedIn)
    }

    /// Check in with a signed code. A consumed code replayed against the
    /// booking it already checked in is harmless; against anything else it
    /// is refused.
    pub async fn check_in_with_code(&self, code: &str) -> Result<CheckInOutcome, EngineError> {
        let claims = self.codes.verify(code, self.now())?;
        let rs = self
            .get_session_state(&claims.session_id)
            .ok_or(EngineError::NotFound(claims.session_id))?;
        let mut guard = rs.write().await;

        if let Some(&used_by) = guard.consumed_codes.get(&claims.nonce) {
            let still_active = guard.active.get(&claims.member_id) == Some(&used_by);
            return match guard.bookings.get(&used_by) {
                Some(b) if still_active && b.state == BookingState::CheckedIn => {
                    Ok(CheckInOutcome::AlreadyCheckedIn(b.clone()))
                }
                _ => Err(EngineError::CodeReplayed(claims.nonce)),
            };
        }

        let booking = guard
            .active_booking_for(&claims.member_id)
            .ok_or(EngineError::NotFound(claims.member_id))?;
        if booking.state == BookingState::CheckedIn {
            return Ok(CheckInOutcome::AlreadyCheckedIn(booking.clone()));
        }
        let id = booking.id;
        self.check_in_locked(&mut guard, id, CheckInMethod::Qr, Some(claims.nonce))
            .await
            .map(CheckInOutcome::CheckedIn)
    }

    /// Sign a check-in code for a member holding an active booking.
    pub async fn issue_code(&self, member_id: Ulid, session_id: Ulid) -> Result<String, EngineError> {
        let rs = self
            .get_session_state(&session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        let guard = rs.read().await;
        if guard.active_booking_for(&member_id).is_none() {
            return Err(EngineError::NotFound(member_id));
        }
        Ok(self.codes.issue(member_id, session_id, self.now()))
    }

    async fn check_in_locked(
        &self,
        ss: &mut SessionState,
        id: Ulid,
        method: CheckInMethod,
        code: Option<Ulid>,
    ) -> Result<Booking, EngineError> {
        let booking = ss.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        if BookingTransition::CheckIn.target(booking.state).is_none() {
            return Err(EngineError::InvalidStateTransition {
                booking_id: id,
                from: booking.state,
                transition: BookingTransition::CheckIn,
            });
        }
        let now = self.now();
        let opens_at = ss.span.start - self.config.checkin_grace_ms;
        let closes_at = ss.span.end;
        if now < opens_at || now > closes_at {
            return Err(EngineError::OutsideCheckInWindow {
                booking_id: id,
                opens_at,
                closes_at,
            });
        }

        let event = Event::CheckedIn {
            id,
            session_id: ss.id,
            method,
            code,
            at: now,
        };
        self.persist_and_apply(ss, &event).await?;
        metrics::counter!(crate::observability::CHECKINS_TOTAL, "method" => method.as_str())
            .increment(1);
        tracing::info!("booking {id}: checked in ({})", method.as_str());
        ss.bookings.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }
}
