use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Effect, Engine, EngineError};

pub(super) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Invalid("session must end after it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SESSION_DURATION_MS {
        return Err(EngineError::LimitExceeded("session too long"));
    }
    Ok(())
}

fn validate_capacity(capacity: u32) -> Result<(), EngineError> {
    if capacity == 0 {
        return Err(EngineError::Invalid("capacity must be positive"));
    }
    if capacity > MAX_SESSION_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_session(&self, id: Ulid, capacity: u32, span: Span) -> Result<(), EngineError> {
        validate_capacity(capacity)?;
        validate_span(&span)?;
        let _gate = self.create_gate.lock().await;
        if self.state.len() >= MAX_SESSIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many sessions"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SessionScheduled { id, capacity, span };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(SessionState::new(id, capacity, span))));
        self.notify.send(id, &event);
        tracing::info!("session {id}: scheduled, capacity {capacity}");
        Ok(())
    }

    /// Staff resize. Growth offers the new seats to the waitlist, subject to
    /// the same re-offer rule as seats freed by cancellation.
    pub async fn resize_session(&self, id: Ulid, capacity: u32) -> Result<SessionInfo, EngineError> {
        validate_capacity(capacity)?;
        let rs = self.get_session_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if guard.status.is_terminal() {
            return Err(EngineError::SessionNotBookable {
                session_id: id,
                status: guard.status,
            });
        }
        if capacity < guard.ledger.booked() {
            return Err(EngineError::CapacityBelowBooked {
                requested: capacity,
                booked: guard.ledger.booked(),
            });
        }

        let reoffer = self.reoffer_allowed(&guard, self.now());
        let event = Event::SessionResized {
            id,
            capacity,
            reoffer,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let mut effects = Vec::new();
        if let Err(e) = self.run_promotions(&mut guard, &mut effects).await {
            tracing::error!("session {id}: promotion after resize failed: {e}");
        }
        let info = SessionInfo::from(&*guard);
        drop(guard);
        self.run_effects(effects).await;
        tracing::info!("session {id}: resized to {capacity}");
        Ok(info)
    }

    /// Move a session along its lifecycle. Cancelling cancels every BOOKED
    /// and WAITLISTED booking, refunding the booked ones. Completing cancels
    /// whoever is still on the waitlist.
    pub async fn set_session_status(
        &self,
        id: Ulid,
        status: SessionStatus,
    ) -> Result<SessionInfo, EngineError> {
        let rs = self.get_session_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !guard.status.can_transition_to(status) {
            return Err(EngineError::InvalidSessionTransition {
                session_id: id,
                from: guard.status,
                to: status,
            });
        }

        let now = self.now();
        let mut effects = Vec::new();
        for booking in guard.bookings.values() {
            match (status, booking.state) {
                (SessionStatus::Cancelled, BookingState::Booked) => {
                    effects.push(Effect::refund(booking, guard.span.start, now));
                    effects.push(Effect::notice(NoticeKind::BookingCancelled, booking, now));
                }
                (SessionStatus::Cancelled | SessionStatus::Completed, BookingState::Waitlisted) => {
                    effects.push(Effect::notice(NoticeKind::BookingCancelled, booking, now));
                }
                _ => {}
            }
        }

        let event = Event::SessionStatusChanged { id, status, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        let info = SessionInfo::from(&*guard);
        drop(guard);
        self.run_effects(effects).await;
        tracing::info!("session {id}: now {}", status.as_str());
        Ok(info)
    }

    /// One scheduler pass: start sessions whose start has passed, and close
    /// sessions past `end + no_show_after`, marking remaining BOOKED
    /// bookings as no-shows. Returns the number of transitions made.
    pub async fn sweep(&self) -> usize {
        let now = self.now();
        let sessions: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut transitions = 0;

        for rs in sessions {
            let (id, mut status, span, unattended) = {
                let guard = rs.read().await;
                let unattended: Vec<Ulid> = guard
                    .roster()
                    .filter(|b| b.state == BookingState::Booked)
                    .map(|b| b.id)
                    .collect();
                (guard.id, guard.status, guard.span, unattended)
            };

            if status == SessionStatus::Scheduled && now >= span.start {
                match self.set_session_status(id, SessionStatus::InProgress).await {
                    Ok(_) => {
                        transitions += 1;
                        status = SessionStatus::InProgress;
                    }
                    Err(e) => tracing::debug!("sweeper skip start of {id}: {e}"),
                }
            }

            if status == SessionStatus::InProgress && now >= span.end + self.config.no_show_after_ms {
                for booking_id in unattended {
                    match self.mark_no_show(booking_id).await {
                        Ok(_) => transitions += 1,
                        // Checked in or cancelled since the snapshot.
                        Err(e) => tracing::debug!("sweeper skip no-show {booking_id}: {e}"),
                    }
                }
                match self.set_session_status(id, SessionStatus::Completed).await {
                    Ok(_) => transitions += 1,
                    Err(e) => tracing::debug!("sweeper skip completion of {id}: {e}"),
                }
            }
        }
        transitions
    }
}
