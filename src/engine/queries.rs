use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedSessionState};

impl Engine {
    fn session_or_not_found(&self, session_id: Ulid) -> Result<SharedSessionState, EngineError> {
        self.get_session_state(&session_id)
            .ok_or(EngineError::NotFound(session_id))
    }

    pub async fn get_session(&self, id: Ulid) -> Option<SessionInfo> {
        let rs = self.get_session_state(&id)?;
        let guard = rs.read().await;
        Some(SessionInfo::from(&*guard))
    }

    /// All sessions, ordered by start time.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<SharedSessionState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for rs in sessions {
            infos.push(SessionInfo::from(&*rs.read().await));
        }
        infos.sort_by_key(|s| (s.start, s.id));
        infos
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let session_id = self.session_for_booking(&id)?;
        let rs = self.get_session_state(&session_id)?;
        let guard = rs.read().await;
        guard.bookings.get(&id).cloned()
    }

    /// Every booking ever made on the session, cancelled ones included, in
    /// request order.
    pub async fn bookings_for_session(&self, session_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self.session_or_not_found(session_id)?;
        let guard = rs.read().await;
        let mut bookings: Vec<Booking> = guard.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.requested_at, b.id));
        Ok(bookings)
    }

    /// BOOKED and CHECKED_IN bookings in the order their seats were granted.
    pub async fn roster(&self, session_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self.session_or_not_found(session_id)?;
        let guard = rs.read().await;
        Ok(guard.roster().cloned().collect())
    }

    /// Waiting entries in promotion order.
    pub async fn waitlist(&self, session_id: Ulid) -> Result<Vec<WaitlistEntry>, EngineError> {
        let rs = self.session_or_not_found(session_id)?;
        let guard = rs.read().await;
        Ok(guard.ledger.waitlist().cloned().collect())
    }
}
