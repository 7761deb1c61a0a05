use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{Sink, SinkExt, stream};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use ulid::Ulid;

use crate::auth::RollcallAuthSource;
use crate::engine::{CheckInOutcome, EngineError};
use crate::limits::MAX_CREDITS_GRANT;
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command};
use crate::tenant::{Tenant, TenantManager};

const CHANNEL_PREFIX: &str = "session_";

/// One handler per connection: LISTEN subscriptions live here.
pub struct RollcallHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RollcallQueryParser>,
    listeners: Mutex<HashMap<String, broadcast::Receiver<Event>>>,
}

impl RollcallHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RollcallQueryParser),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_tenant<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Tenant>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute, and record metrics for one statement.
    async fn run_sql(&self, tenant: &Tenant, sql: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(tenant, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        tenant: &Tenant,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let engine = &tenant.engine;
        match cmd {
            Command::InsertSession {
                id,
                capacity,
                start,
                end,
            } => {
                engine
                    .create_session(id, capacity, Span::new(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateSessionCapacity { id, capacity } => {
                engine.resize_session(id, capacity).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateSessionStatus { id, status } => {
                engine
                    .set_session_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertBooking {
                id,
                member_id,
                session_id,
            } => {
                engine
                    .book(id, member_id, session_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine
                    .cancel(id, CancelReason::Member)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::UpdateBookingState { id, transition } => {
                let result = match transition {
                    BookingTransition::Cancel => engine.cancel(id, CancelReason::Staff).await,
                    BookingTransition::CheckIn => engine.check_in(id, CheckInMethod::Manual).await,
                    BookingTransition::MarkNoShow => engine.mark_no_show(id).await,
                    BookingTransition::Promote => {
                        Err(EngineError::Invalid("promotion is not a staff action"))
                    }
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CheckInWithCode { code } => {
                let outcome = engine.check_in_with_code(&code).await.map_err(engine_err)?;
                Ok(checkin_tag(&outcome))
            }
            Command::CheckInMember {
                member_id,
                session_id,
            } => {
                let outcome = engine
                    .check_in_by_code(member_id, session_id)
                    .await
                    .map_err(engine_err)?;
                Ok(checkin_tag(&outcome))
            }
            Command::InsertEntitlement {
                member_id,
                credits,
                unlimited_until,
            } => {
                if credits > MAX_CREDITS_GRANT {
                    return Err(engine_err(EngineError::LimitExceeded("credit grant too large")));
                }
                tenant.memberships.grant_credits(member_id, credits);
                if let Some(until) = unlimited_until {
                    tenant.memberships.grant_unlimited(member_id, until);
                }
                tracing::info!("member {member_id}: granted {credits} credits");
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteEntitlement { member_id } => {
                if !tenant.memberships.revoke(&member_id) {
                    return Err(engine_err(EngineError::NotFound(member_id)));
                }
                tracing::info!("member {member_id}: membership revoked");
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSessions { id } => {
                let sessions: Vec<SessionInfo> = match id {
                    Some(id) => engine.get_session(id).await.into_iter().collect(),
                    None => engine.list_sessions().await,
                };
                let schema = Arc::new(session_schema(format));
                let rows: Vec<PgWireResult<_>> = sessions
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&(s.capacity as i32))?;
                        encoder.encode_field(&(s.booked as i32))?;
                        encoder.encode_field(&(s.waitlisted as i32))?;
                        encoder.encode_field(&s.start)?;
                        encoder.encode_field(&s.end)?;
                        encoder.encode_field(&s.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectBookings { filter } => {
                let bookings: Vec<Booking> = match filter {
                    BookingFilter::Id(id) => engine.get_booking(id).await.into_iter().collect(),
                    BookingFilter::Session(session_id) => engine
                        .bookings_for_session(session_id)
                        .await
                        .map_err(engine_err)?,
                };
                Ok(booking_rows(&bookings, format))
            }
            Command::SelectRoster { session_id } => {
                let roster = engine.roster(session_id).await.map_err(engine_err)?;
                Ok(booking_rows(&roster, format))
            }
            Command::SelectWaitlist { session_id } => {
                let waitlist = engine.waitlist(session_id).await.map_err(engine_err)?;
                let schema = Arc::new(waitlist_schema(format));
                let rows: Vec<PgWireResult<_>> = waitlist
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(i as i32 + 1))?;
                        encoder.encode_field(&entry.booking_id.to_string())?;
                        encoder.encode_field(&entry.member_id.to_string())?;
                        encoder.encode_field(&(entry.seq as i64))?;
                        encoder.encode_field(&entry.enqueued_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectCheckinCode {
                member_id,
                session_id,
            } => {
                let code = engine
                    .issue_code(member_id, session_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(checkin_code_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&member_id.to_string())?;
                encoder.encode_field(&session_id.to_string())?;
                encoder.encode_field(&code)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::Listen { channel } => {
                let session_id = parse_channel(&channel)?;
                let rx = engine.notify.subscribe(session_id);
                self.lock_listeners().insert(channel, rx);
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.lock_listeners().remove(&channel);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.lock_listeners().clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Receiver<Event>>> {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Events committed since the last statement, as NOTIFY messages.
    fn pending_notifications(&self) -> Vec<NotificationResponse> {
        let pid = std::process::id() as i32;
        let mut out = Vec::new();
        for (channel, rx) in self.lock_listeners().iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(payload) => {
                            out.push(NotificationResponse::new(pid, channel.clone(), payload))
                        }
                        Err(e) => tracing::warn!("dropping notification on {channel}: {e}"),
                    },
                    Err(TryRecvError::Lagged(n)) => {
                        tracing::warn!("listener on {channel} lagged, {n} events dropped");
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        out
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        for notification in self.pending_notifications() {
            client
                .feed(PgWireBackendMessage::NotificationResponse(notification))
                .await?;
        }
        Ok(())
    }
}

fn checkin_tag(outcome: &CheckInOutcome) -> Response {
    let rows = match outcome {
        CheckInOutcome::CheckedIn(_) => 1,
        CheckInOutcome::AlreadyCheckedIn(_) => 0,
    };
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn parse_channel(channel: &str) -> PgWireResult<Ulid> {
    let session_id_str = channel.strip_prefix(CHANNEL_PREFIX).ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected {CHANNEL_PREFIX}{{id}})"),
        )))
    })?;
    Ulid::from_string(session_id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

// ── Row encoding ─────────────────────────────────────────────────

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn session_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("capacity", Type::INT4),
            ("booked", Type::INT4),
            ("waitlisted", Type::INT4),
            ("start", Type::INT8),
            ("end", Type::INT8),
            ("status", Type::VARCHAR),
        ],
        format,
    )
}

fn booking_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("member_id", Type::VARCHAR),
            ("session_id", Type::VARCHAR),
            ("state", Type::VARCHAR),
            ("check_in_method", Type::VARCHAR),
            ("waitlist_seq", Type::INT8),
            ("cancel_reason", Type::VARCHAR),
            ("requested_at", Type::INT8),
            ("booked_at", Type::INT8),
            ("waitlisted_at", Type::INT8),
            ("checked_in_at", Type::INT8),
            ("cancelled_at", Type::INT8),
            ("no_show_at", Type::INT8),
        ],
        format,
    )
}

fn waitlist_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("position", Type::INT4),
            ("booking_id", Type::VARCHAR),
            ("member_id", Type::VARCHAR),
            ("seq", Type::INT8),
            ("enqueued_at", Type::INT8),
        ],
        format,
    )
}

fn checkin_code_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("member_id", Type::VARCHAR),
            ("session_id", Type::VARCHAR),
            ("code", Type::VARCHAR),
        ],
        format,
    )
}

fn booking_rows(bookings: &[Booking], format: &Format) -> Response {
    let schema = Arc::new(booking_schema(format));
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.member_id.to_string())?;
            encoder.encode_field(&b.session_id.to_string())?;
            encoder.encode_field(&b.state.as_str())?;
            encoder.encode_field(&b.check_in_method.as_str())?;
            encoder.encode_field(&b.waitlist_seq.map(|s| s as i64))?;
            encoder.encode_field(&b.cancel_reason.map(|r| r.as_str()))?;
            encoder.encode_field(&b.requested_at)?;
            encoder.encode_field(&b.booked_at)?;
            encoder.encode_field(&b.waitlisted_at)?;
            encoder.encode_field(&b.checked_in_at)?;
            encoder.encode_field(&b.cancelled_at)?;
            encoder.encode_field(&b.no_show_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result columns of a statement, judged from the table after FROM.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let mut words = sql.split_whitespace();
    if !words
        .next()
        .is_some_and(|w| w.eq_ignore_ascii_case("SELECT"))
    {
        return vec![];
    }
    let table = words
        .skip_while(|w| !w.eq_ignore_ascii_case("FROM"))
        .nth(1)
        .map(|t| t.trim_matches(|c| c == '"' || c == ';').to_lowercase());
    match table.as_deref() {
        Some("sessions") => session_schema(format),
        Some("bookings") | Some("roster") => booking_schema(format),
        Some("waitlist") => waitlist_schema(format),
        Some("checkin_codes") => checkin_code_schema(format),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RollcallHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let result = self.run_sql(&tenant, query, &Format::UnifiedText).await;
        self.deliver_notifications(client).await?;
        Ok(vec![result?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RollcallQueryParser;

#[async_trait]
impl QueryParser for RollcallQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RollcallHandler {
    type Statement = String;
    type QueryParser = RollcallQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let sql = substitute_params(portal);
        let result = self
            .run_sql(&tenant, &sql, &portal.result_column_format)
            .await;
        self.deliver_notifications(client).await?;
        result
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, &Format::UnifiedText),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();

    // Highest index first so $1 never clobbers the prefix of $10.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RollcallFactory {
    handler: Arc<RollcallHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RollcallAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RollcallFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = RollcallAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RollcallHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RollcallFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RollcallFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        format!("{}: {e}", e.code()),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(schema: &[FieldInfo]) -> Vec<String> {
        schema.iter().map(|f| f.name().to_string()).collect()
    }

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM sessions"), 0);
        assert_eq!(
            count_params("INSERT INTO bookings VALUES ($1, $2, $3)"),
            3
        );
        assert_eq!(count_params("SELECT * FROM roster WHERE session_id = $12"), 12);
    }

    #[test]
    fn result_schema_follows_from_table() {
        let text = Format::UnifiedText;
        assert_eq!(
            names(&result_schema("SELECT * FROM waitlist WHERE session_id = $1", &text))[0],
            "position"
        );
        assert_eq!(
            names(&result_schema("select * from \"roster\";", &text))[0],
            "id"
        );
        assert_eq!(
            names(&result_schema("SELECT * FROM checkin_codes WHERE member_id = $1", &text))[2],
            "code"
        );
        assert!(result_schema("INSERT INTO sessions VALUES ($1, $2, $3, $4)", &text).is_empty());
    }

    #[test]
    fn channels_name_sessions() {
        let sid = Ulid::new();
        assert_eq!(parse_channel(&format!("session_{sid}")).unwrap(), sid);
        assert!(parse_channel("resource_x").is_err());
        assert!(parse_channel("session_nope").is_err());
    }
}
