//! In-process membership ledger. Stands in for the external billing
//! collaborator when the daemon runs on its own, and backs the tests.
//!
//! A member is entitled while they hold either an unexpired unlimited plan
//! or at least one credit. Credits are only spent by `consume_credit`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::collab::{Clock, CollaboratorError, CreditLedger, EntitlementChecker, RefundRequest};
use crate::model::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Membership {
    pub credits: u32,
    /// Unlimited plan valid until this instant (exclusive).
    pub unlimited_until: Option<Ms>,
}

pub struct MembershipLedger {
    members: DashMap<Ulid, Membership>,
    clock: Arc<dyn Clock>,
    /// Cancellations this long or more before start get their credit back.
    refund_cutoff_ms: Ms,
}

impl MembershipLedger {
    pub fn new(clock: Arc<dyn Clock>, refund_cutoff_ms: Ms) -> Self {
        Self {
            members: DashMap::new(),
            clock,
            refund_cutoff_ms,
        }
    }

    pub fn grant_credits(&self, member_id: Ulid, credits: u32) {
        let mut m = self.members.entry(member_id).or_default();
        m.credits = m.credits.saturating_add(credits);
    }

    pub fn grant_unlimited(&self, member_id: Ulid, until: Ms) {
        self.members.entry(member_id).or_default().unlimited_until = Some(until);
    }

    pub fn revoke(&self, member_id: &Ulid) -> bool {
        self.members.remove(member_id).is_some()
    }

    pub fn get(&self, member_id: &Ulid) -> Option<Membership> {
        self.members.get(member_id).map(|m| *m.value())
    }

    fn unlimited_at(m: &Membership, now: Ms) -> bool {
        m.unlimited_until.is_some_and(|until| now < until)
    }
}

#[async_trait]
impl EntitlementChecker for MembershipLedger {
    async fn has_valid_entitlement(&self, member_id: Ulid, _session_id: Ulid) -> bool {
        let now = self.clock.now_ms();
        self.members
            .get(&member_id)
            .is_some_and(|m| Self::unlimited_at(&m, now) || m.credits > 0)
    }
}

#[async_trait]
impl CreditLedger for MembershipLedger {
    async fn consume_credit(
        &self,
        member_id: Ulid,
        _session_id: Ulid,
        booking_id: Ulid,
    ) -> Result<(), CollaboratorError> {
        let now = self.clock.now_ms();
        let mut m = self
            .members
            .get_mut(&member_id)
            .ok_or_else(|| CollaboratorError(format!("no membership for {member_id}")))?;
        if Self::unlimited_at(&m, now) {
            return Ok(());
        }
        if m.credits == 0 {
            return Err(CollaboratorError(format!(
                "member {member_id} has no credit left for booking {booking_id}"
            )));
        }
        m.credits -= 1;
        Ok(())
    }

    async fn refund_credit(&self, refund: &RefundRequest) -> Result<(), CollaboratorError> {
        if refund.session_start - refund.cancelled_at < self.refund_cutoff_ms {
            tracing::debug!(
                "no refund for booking {}: cancelled inside cutoff",
                refund.booking_id
            );
            return Ok(());
        }
        let now = self.clock.now_ms();
        let mut m = self.members.entry(refund.member_id).or_default();
        if !Self::unlimited_at(&m, now) {
            m.credits = m.credits.saturating_add(1);
        }
        Ok(())
    }
}
