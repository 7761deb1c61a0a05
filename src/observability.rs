use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rollcall_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rollcall_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking requests. Labels: outcome (booked, waitlisted, ineligible).
pub const BOOKINGS_TOTAL: &str = "rollcall_bookings_total";

/// Counter: waitlist offers resolved. Labels: outcome (promoted, lapsed).
pub const PROMOTIONS_TOTAL: &str = "rollcall_promotions_total";

/// Counter: cancellations. Labels: reason.
pub const CANCELLATIONS_TOTAL: &str = "rollcall_cancellations_total";

/// Counter: check-ins. Labels: method.
pub const CHECKINS_TOTAL: &str = "rollcall_checkins_total";

/// Counter: credit ledger calls that failed after commit. Labels: op.
pub const CREDIT_FAILURES_TOTAL: &str = "rollcall_credit_failures_total";

/// Counter: notices the notifier could not deliver.
pub const NOTICES_FAILED_TOTAL: &str = "rollcall_notices_failed_total";

/// Counter: sessions moved along their lifecycle by the sweeper.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "rollcall_sweep_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rollcall_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rollcall_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rollcall_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "rollcall_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "rollcall_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rollcall_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rollcall_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {port}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSession { .. } => "insert_session",
        Command::UpdateSessionCapacity { .. } => "resize_session",
        Command::UpdateSessionStatus { .. } => "set_session_status",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::UpdateBookingState { .. } => "update_booking_state",
        Command::CheckInWithCode { .. } => "checkin_code",
        Command::CheckInMember { .. } => "checkin_member",
        Command::InsertEntitlement { .. } => "insert_entitlement",
        Command::DeleteEntitlement { .. } => "delete_entitlement",
        Command::SelectSessions { .. } => "select_sessions",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectRoster { .. } => "select_roster",
        Command::SelectWaitlist { .. } => "select_waitlist",
        Command::SelectCheckinCode { .. } => "select_checkin_code",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            QUERIES_TOTAL,
            BOOKINGS_TOTAL,
            PROMOTIONS_TOTAL,
            CHECKINS_TOTAL,
            WAL_FLUSH_BATCH_SIZE,
        ] {
            assert!(name.starts_with("rollcall_"), "{name}");
        }
    }

    #[test]
    fn labels_distinguish_checkin_paths() {
        let by_code = Command::CheckInWithCode { code: "x".into() };
        let by_member = Command::CheckInMember {
            member_id: Ulid::new(),
            session_id: Ulid::new(),
        };
        assert_ne!(command_label(&by_code), command_label(&by_member));
    }
}
