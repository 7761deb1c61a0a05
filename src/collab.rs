//! Seams to the systems this engine does not own: membership/billing,
//! notification delivery, and time.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Ms, Notice};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError(pub String);

impl std::fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collaborator error: {}", self.0)
    }
}

impl std::error::Error for CollaboratorError {}

/// Does this member currently hold a bookable credit or plan for this session?
/// Must not have side effects; credits are consumed separately.
#[async_trait]
pub trait EntitlementChecker: Send + Sync {
    async fn has_valid_entitlement(&self, member_id: Ulid, session_id: Ulid) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub member_id: Ulid,
    pub session_id: Ulid,
    pub booking_id: Ulid,
    pub session_start: Ms,
    pub cancelled_at: Ms,
}

/// Billing side. The refund cutoff policy lives behind this trait.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn consume_credit(
        &self,
        member_id: Ulid,
        session_id: Ulid,
        booking_id: Ulid,
    ) -> Result<(), CollaboratorError>;

    async fn refund_credit(&self, refund: &RefundRequest) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice) -> Result<(), CollaboratorError>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// Notifier that writes notices to the log. Default when no delivery
/// collaborator is wired in.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &Notice) -> Result<(), CollaboratorError> {
        let payload =
            serde_json::to_string(notice).map_err(|e| CollaboratorError(e.to_string()))?;
        tracing::info!(target: "rollcall::notice", "{payload}");
        Ok(())
    }
}

/// Everything an engine needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub entitlements: Arc<dyn EntitlementChecker>,
    pub credits: Arc<dyn CreditLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}
