use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Effect, Engine, EngineError};

impl Engine {
    /// Sessions accept bookings while SCHEDULED and before the booking cutoff.
    pub(super) fn check_bookable(&self, ss: &SessionState, now: Ms) -> Result<(), EngineError> {
        if ss.status != SessionStatus::Scheduled
            || now >= ss.span.start - self.config.booking_cutoff_ms
        {
            return Err(EngineError::SessionNotBookable {
                session_id: ss.id,
                status: ss.status,
            });
        }
        Ok(())
    }

    /// Freed seats go back to the waitlist only before the session starts,
    /// unless re-offering after start is enabled.
    pub(super) fn reoffer_allowed(&self, ss: &SessionState, now: Ms) -> bool {
        !ss.status.is_terminal() && (now < ss.span.start || self.config.reoffer_after_start)
    }

    fn check_not_booked(ss: &SessionState, member_id: Ulid) -> Result<(), EngineError> {
        match ss.active_booking_for(&member_id) {
            Some(existing) => Err(EngineError::AlreadyBooked {
                member_id,
                booking_id: existing.id,
            }),
            None => Ok(()),
        }
    }

    /// Request a seat. Returns the new booking, BOOKED if a seat was free and
    /// WAITLISTED otherwise. A full session is never an error.
    pub async fn book(
        &self,
        id: Ulid,
        member_id: Ulid,
        session_id: Ulid,
    ) -> Result<Booking, EngineError> {
        if self.booking_to_session.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_session_state(&session_id)
            .ok_or(EngineError::NotFound(session_id))?;

        // Cheap rejections first; the entitlement check may be a network call.
        {
            let guard = rs.read().await;
            self.check_bookable(&guard, self.now())?;
            Self::check_not_booked(&guard, member_id)?;
        }
        if !self
            .collab
            .entitlements
            .has_valid_entitlement(member_id, session_id)
            .await
        {
            metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "ineligible")
                .increment(1);
            return Err(EngineError::Ineligible(member_id));
        }

        let mut guard = rs.write().await;
        let now = self.now();
        self.check_bookable(&guard, now)?;
        Self::check_not_booked(&guard, member_id)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SESSION {
            return Err(EngineError::LimitExceeded("too many bookings on session"));
        }
        // Booking ids are unique across sessions; the session lock does not cover that.
        match self.booking_to_session.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(session_id);
            }
        }

        let event = Event::BookingRequested {
            id,
            session_id,
            member_id,
            at: now,
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.booking_to_session.remove(&id);
            return Err(e);
        }
        let booking = guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(guard);

        let mut effects = Vec::new();
        if booking.state == BookingState::Booked {
            effects.push(Effect::ConsumeCredit {
                member_id,
                session_id,
                booking_id: id,
            });
            effects.push(Effect::notice(NoticeKind::BookingConfirmed, &booking, now));
        } else {
            effects.push(Effect::notice(NoticeKind::WaitlistJoined, &booking, now));
        }
        self.run_effects(effects).await;

        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => booking.state.as_str())
            .increment(1);
        tracing::info!(
            "booking {id}: member {member_id} {} on session {session_id}",
            booking.state.as_str()
        );
        Ok(booking)
    }

    /// Cancel a BOOKED or WAITLISTED booking. A freed seat is offered to the
    /// waitlist and resolved before this returns.
    pub async fn cancel(&self, id: Ulid, reason: CancelReason) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        let from = booking.state;
        if BookingTransition::Cancel.target(from).is_none() {
            return Err(EngineError::InvalidStateTransition {
                booking_id: id,
                from,
                transition: BookingTransition::Cancel,
            });
        }

        let now = self.now();
        let reoffer = self.reoffer_allowed(&guard, now);
        let event = Event::BookingCancelled {
            id,
            session_id: guard.id,
            reason,
            reoffer,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let mut effects = Vec::new();
        if from == BookingState::Booked {
            effects.push(Effect::refund(&booking, guard.span.start, now));
        }
        effects.push(Effect::notice(NoticeKind::BookingCancelled, &booking, now));
        // The cancellation is committed; an offer left unresolved here is
        // picked up again by `resume_promotions`.
        if let Err(e) = self.run_promotions(&mut guard, &mut effects).await {
            tracing::error!("session {}: promotion after cancel of {id} failed: {e}", guard.id);
        }
        drop(guard);
        self.run_effects(effects).await;

        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL, "reason" => reason.as_str())
            .increment(1);
        tracing::info!("booking {id}: cancelled from {} ({})", from.as_str(), reason.as_str());
        Ok(booking)
    }

    /// Mark a BOOKED booking as NO_SHOW once its session has ended.
    pub async fn mark_no_show(&self, id: Ulid) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        let from = booking.state;
        if BookingTransition::MarkNoShow.target(from).is_none() {
            return Err(EngineError::InvalidStateTransition {
                booking_id: id,
                from,
                transition: BookingTransition::MarkNoShow,
            });
        }
        let now = self.now();
        if now < guard.span.end {
            return Err(EngineError::SessionNotEnded {
                session_id: guard.id,
                ends_at: guard.span.end,
            });
        }

        let reoffer = self.reoffer_allowed(&guard, now);
        let event = Event::MarkedNoShow {
            id,
            session_id: guard.id,
            reoffer,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let mut effects = Vec::new();
        if reoffer && let Err(e) = self.run_promotions(&mut guard, &mut effects).await {
            tracing::error!("session {}: promotion after no-show of {id} failed: {e}", guard.id);
        }
        drop(guard);
        self.run_effects(effects).await;

        tracing::info!("booking {id}: marked no-show");
        Ok(booking)
    }
}
