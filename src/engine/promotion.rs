use ulid::Ulid;

use crate::model::*;

use super::{Effect, Engine, EngineError};

impl Engine {
    /// Entry point for a freed seat on `session_id`: resolves every pending
    /// offer on that session. Returns the number of members promoted.
    pub async fn on_seat_freed(&self, session_id: Ulid) -> Result<usize, EngineError> {
        let rs = self
            .get_session_state(&session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        let mut guard = rs.write().await;
        let mut effects = Vec::new();
        let promoted = self.run_promotions(&mut guard, &mut effects).await;
        drop(guard);
        self.run_effects(effects).await;
        promoted
    }

    /// Resolve pending offers head-first. Each offered member's entitlement is
    /// re-checked: entitled members are promoted, lapsed ones dropped from the
    /// waitlist and the seat passes to the next head. Each step consumes one
    /// waitlist entry, so the loop is bounded by the waitlist length at entry.
    ///
    /// Caller holds the session's write lock.
    pub(super) async fn run_promotions(
        &self,
        ss: &mut SessionState,
        effects: &mut Vec<Effect>,
    ) -> Result<usize, EngineError> {
        let mut budget = ss.ledger.waiting_len();
        let mut promoted = 0;
        while budget > 0 {
            let Some(entry) = ss.ledger.front_offer().cloned() else { break };
            budget -= 1;

            let entitled = self
                .collab
                .entitlements
                .has_valid_entitlement(entry.member_id, ss.id)
                .await;
            let at = self.now();
            if entitled {
                let event = Event::WaitlistPromoted {
                    id: entry.booking_id,
                    session_id: ss.id,
                    at,
                };
                self.persist_and_apply(ss, &event).await?;
                effects.push(Effect::ConsumeCredit {
                    member_id: entry.member_id,
                    session_id: ss.id,
                    booking_id: entry.booking_id,
                });
                if let Some(booking) = ss.bookings.get(&entry.booking_id) {
                    effects.push(Effect::notice(NoticeKind::WaitlistPromoted, booking, at));
                }
                promoted += 1;
                metrics::counter!(crate::observability::PROMOTIONS_TOTAL, "outcome" => "promoted")
                    .increment(1);
                tracing::info!(
                    "session {}: promoted booking {} (waitlist seq {})",
                    ss.id,
                    entry.booking_id,
                    entry.seq
                );
            } else {
                let event = Event::WaitlistLapsed {
                    id: entry.booking_id,
                    session_id: ss.id,
                    at,
                };
                self.persist_and_apply(ss, &event).await?;
                if let Some(booking) = ss.bookings.get(&entry.booking_id) {
                    effects.push(Effect::notice(NoticeKind::WaitlistLapsed, booking, at));
                }
                metrics::counter!(crate::observability::PROMOTIONS_TOTAL, "outcome" => "lapsed")
                    .increment(1);
                tracing::info!(
                    "session {}: dropped booking {} from waitlist, entitlement lapsed",
                    ss.id,
                    entry.booking_id
                );
            }
        }
        Ok(promoted)
    }
}
