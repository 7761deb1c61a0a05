mod booking;
mod checkin;
mod error;
mod promotion;
mod queries;
mod sessions;

pub use checkin::CheckInOutcome;
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::collab::{Collaborators, RefundRequest};
use crate::config::EngineConfig;
use crate::ledger::{SeatOutcome, Withdrawal};
use crate::model::*;
use crate::notify::{Dispatcher, NotifyHub};
use crate::qr::CodeSigner;
use crate::wal::Wal;

pub type SharedSessionState = Arc<RwLock<SessionState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Blocks for one append, drains whatever else is already
/// queued, and fsyncs the whole batch once.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush of {} events failed: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[Pending]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so the partial frame is not carried
    // into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed past the batcher")));
        }
    }
}

// ── Effects run after the session lock is released ───────

pub(super) enum Effect {
    ConsumeCredit {
        member_id: Ulid,
        session_id: Ulid,
        booking_id: Ulid,
    },
    RefundCredit(RefundRequest),
    Notify(Notice),
}

impl Effect {
    fn notice(kind: NoticeKind, booking: &Booking, at: Ms) -> Self {
        Effect::Notify(Notice {
            kind,
            booking_id: booking.id,
            member_id: booking.member_id,
            session_id: booking.session_id,
            at,
        })
    }

    fn refund(booking: &Booking, session_start: Ms, at: Ms) -> Self {
        Effect::RefundCredit(RefundRequest {
            member_id: booking.member_id,
            session_id: booking.session_id,
            booking_id: booking.id,
            session_start,
            cancelled_at: at,
        })
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedSessionState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → session id. Bookings are never deleted.
    pub(super) booking_to_session: DashMap<Ulid, Ulid>,
    /// Serializes session creation against compaction.
    pub(super) create_gate: Mutex<()>,
    pub(super) collab: Collaborators,
    pub(super) dispatcher: Dispatcher,
    pub(super) config: EngineConfig,
    pub(super) codes: CodeSigner,
}

/// Apply one committed event to its session (caller holds the lock, or owns
/// the state outright during replay). Seat grants and waitlist positions are
/// decided here, so replay reproduces them exactly.
fn apply_to_session(ss: &mut SessionState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SessionResized {
            capacity, reoffer, ..
        } => {
            if let Err(booked) = ss.ledger.resize(*capacity, *reoffer) {
                tracing::warn!("session {}: resize to {capacity} below {booked} booked", ss.id);
            }
        }
        Event::SessionStatusChanged { status, at, .. } => {
            ss.status = *status;
            match status {
                SessionStatus::Cancelled => cancel_all_open(ss, *at),
                SessionStatus::Completed => close_waitlist(ss, *at),
                _ => {}
            }
        }
        Event::BookingRequested {
            id,
            session_id,
            member_id,
            at,
        } => {
            let mut booking = Booking::requested(*id, *member_id, *session_id, *at);
            match ss.ledger.try_reserve_seat() {
                SeatOutcome::Granted => {
                    booking.state = BookingState::Booked;
                    booking.booked_at = Some(*at);
                    ss.seated.push(*id);
                }
                SeatOutcome::CapacityFull => {
                    let entry = ss.ledger.enqueue(*session_id, *member_id, *id, *at);
                    booking.state = BookingState::Waitlisted;
                    booking.waitlisted_at = Some(*at);
                    booking.waitlist_seq = Some(entry.seq);
                }
            }
            ss.active.insert(*member_id, *id);
            ss.bookings.insert(*id, booking);
            index.insert(*id, *session_id);
        }
        Event::BookingCancelled {
            id,
            reason,
            reoffer,
            at,
            ..
        } => {
            let Some(booking) = ss.bookings.get_mut(id) else { return };
            let Some(from) = booking.transition(BookingTransition::Cancel, *at) else { return };
            booking.cancel_reason = Some(*reason);
            let member_id = booking.member_id;
            ss.active.remove(&member_id);
            match from {
                BookingState::Booked => vacate_seat(ss, *id, *reoffer),
                BookingState::Waitlisted => {
                    if let Withdrawal::NotWaiting = ss.ledger.withdraw(*id) {
                        tracing::warn!("session {}: booking {id} was not on the waitlist", ss.id);
                    }
                }
                _ => {}
            }
        }
        Event::WaitlistPromoted { id, at, .. } => {
            if !ss.ledger.claim_offer(*id) {
                tracing::warn!("session {}: no offer held for booking {id}", ss.id);
                return;
            }
            if let Some(booking) = ss.bookings.get_mut(id)
                && booking.transition(BookingTransition::Promote, *at).is_some()
            {
                ss.seated.push(*id);
            }
        }
        Event::WaitlistLapsed { id, at, .. } => {
            ss.ledger.discard_offer(*id);
            if let Some(booking) = ss.bookings.get_mut(id)
                && booking.transition(BookingTransition::Cancel, *at).is_some()
            {
                booking.cancel_reason = Some(CancelReason::EntitlementLapsed);
                let member_id = booking.member_id;
                ss.active.remove(&member_id);
            }
        }
        Event::CheckedIn {
            id,
            method,
            code,
            at,
            ..
        } => {
            let Some(booking) = ss.bookings.get_mut(id) else { return };
            if booking.transition(BookingTransition::CheckIn, *at).is_some() {
                booking.check_in_method = *method;
                if let Some(nonce) = code {
                    ss.consumed_codes.insert(*nonce, *id);
                }
            }
        }
        Event::MarkedNoShow { id, reoffer, at, .. } => {
            let Some(booking) = ss.bookings.get_mut(id) else { return };
            if booking.transition(BookingTransition::MarkNoShow, *at).is_some() {
                let member_id = booking.member_id;
                ss.active.remove(&member_id);
                vacate_seat(ss, *id, *reoffer);
            }
        }
        // Created and restored at the map level.
        Event::SessionScheduled { .. } | Event::SessionRestored(_) => {}
    }
}

fn vacate_seat(ss: &mut SessionState, booking_id: Ulid, reoffer: bool) {
    ss.seated.retain(|id| *id != booking_id);
    if reoffer {
        ss.ledger.release_seat();
    } else {
        ss.ledger.release_seat_without_offer();
    }
}

/// Session cancelled: every BOOKED or WAITLISTED booking is cancelled and
/// the waitlist emptied. Attendance already recorded stands.
fn cancel_all_open(ss: &mut SessionState, at: Ms) {
    ss.ledger.clear_waitlist();
    let mut freed = Vec::new();
    for booking in ss.bookings.values_mut() {
        let Some(from) = booking.transition(BookingTransition::Cancel, at) else { continue };
        booking.cancel_reason = Some(CancelReason::SessionCancelled);
        ss.active.remove(&booking.member_id);
        if from == BookingState::Booked {
            freed.push(booking.id);
        }
    }
    for id in freed {
        vacate_seat(ss, id, false);
    }
}

/// Session completed: whoever is still waiting will never get a seat.
fn close_waitlist(ss: &mut SessionState, at: Ms) {
    for entry in ss.ledger.clear_waitlist() {
        let Some(booking) = ss.bookings.get_mut(&entry.booking_id) else { continue };
        if booking.state != BookingState::Waitlisted {
            continue;
        }
        if booking.transition(BookingTransition::Cancel, at).is_some() {
            booking.cancel_reason = Some(CancelReason::SessionCompleted);
            ss.active.remove(&entry.member_id);
        }
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        collab: Collaborators,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::<Event>::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let booking_to_session = DashMap::new();
        let mut sessions: HashMap<Ulid, SessionState> = HashMap::new();
        for event in events {
            match event {
                Event::SessionScheduled { id, capacity, span } => {
                    sessions.insert(id, SessionState::new(id, capacity, span));
                }
                Event::SessionRestored(ss) => {
                    for booking_id in ss.bookings.keys() {
                        booking_to_session.insert(*booking_id, ss.id);
                    }
                    sessions.insert(ss.id, *ss);
                }
                other => {
                    if let Some(ss) = sessions.get_mut(&other.session_id()) {
                        apply_to_session(ss, &other, &booking_to_session);
                    }
                }
            }
        }

        let state = DashMap::new();
        for (id, ss) in sessions {
            if let Err(e) = ss.check_invariants() {
                tracing::error!("session {id} failed invariant check after replay: {e}");
            }
            state.insert(id, Arc::new(RwLock::new(ss)));
        }
        tracing::info!("{}: replayed {} sessions", wal_path.display(), state.len());

        let dispatcher = Dispatcher::spawn(collab.notifier.clone());
        let codes = CodeSigner::new(config.qr_secret.clone(), config.qr_ttl_ms);
        Ok(Self {
            state,
            wal_tx,
            notify,
            booking_to_session,
            create_gate: Mutex::new(()),
            collab,
            dispatcher,
            config,
            codes,
        })
    }

    pub(super) fn now(&self) -> Ms {
        self.collab.clock.now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    pub fn get_session_state(&self, id: &Ulid) -> Option<SharedSessionState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn session_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_session.get(booking_id).map(|e| *e.value())
    }

    /// WAL append, then apply, then broadcast.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SessionState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_session(ss, event, &self.booking_to_session);
        self.notify.send(ss.id, event);
        Ok(())
    }

    /// Lookup booking → session, acquire that session's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SessionState>, EngineError> {
        let session_id = self
            .session_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ss = self
            .get_session_state(&session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        Ok(ss.write_owned().await)
    }

    /// Run collected side effects. Failures are logged, never propagated:
    /// the transitions that produced them are already committed.
    pub(super) async fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ConsumeCredit {
                    member_id,
                    session_id,
                    booking_id,
                } => {
                    if let Err(e) = self
                        .collab
                        .credits
                        .consume_credit(member_id, session_id, booking_id)
                        .await
                    {
                        metrics::counter!(crate::observability::CREDIT_FAILURES_TOTAL, "op" => "consume")
                            .increment(1);
                        tracing::warn!("credit not consumed for booking {booking_id}: {e}");
                    }
                }
                Effect::RefundCredit(refund) => {
                    if let Err(e) = self.collab.credits.refund_credit(&refund).await {
                        metrics::counter!(crate::observability::CREDIT_FAILURES_TOTAL, "op" => "refund")
                            .increment(1);
                        tracing::warn!("credit not refunded for booking {}: {e}", refund.booking_id);
                    }
                }
                Effect::Notify(notice) => self.dispatcher.dispatch(notice),
            }
        }
    }

    /// Resolve offers left pending by a crash between a seat release and
    /// its promotion. Run once after startup.
    pub async fn resume_promotions(&self) -> usize {
        let pending: Vec<SharedSessionState> = self
            .state
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let mut resumed = 0;
        for rs in pending {
            let mut guard = rs.write().await;
            if !guard.ledger.has_pending_offers() {
                continue;
            }
            let mut effects = Vec::new();
            match self.run_promotions(&mut guard, &mut effects).await {
                Ok(n) => resumed += n,
                Err(e) => tracing::error!("session {}: resuming promotions failed: {e}", guard.id),
            }
            drop(guard);
            self.run_effects(effects).await;
        }
        if resumed > 0 {
            tracing::info!("resumed {resumed} pending promotions");
        }
        resumed
    }

    /// Rewrite the WAL as one snapshot per session.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.create_gate.lock().await;
        let sessions: Vec<SharedSessionState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        // Read guards stay held until the swap so no append can land between
        // a snapshot and the rewrite.
        let mut guards = Vec::with_capacity(sessions.len());
        for rs in sessions {
            guards.push(rs.read_owned().await);
        }
        let events: Vec<Event> = guards
            .iter()
            .map(|g| Event::SessionRestored(Box::new((**g).clone())))
            .collect();

        let (tx, rx) = oneshot::channel();
        let result = self
            .wal_request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}
