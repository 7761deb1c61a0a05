use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSession {
        id: Ulid,
        capacity: u32,
        start: Ms,
        end: Ms,
    },
    UpdateSessionCapacity {
        id: Ulid,
        capacity: u32,
    },
    UpdateSessionStatus {
        id: Ulid,
        status: SessionStatus,
    },
    InsertBooking {
        id: Ulid,
        member_id: Ulid,
        session_id: Ulid,
    },
    /// Member cancellation.
    DeleteBooking {
        id: Ulid,
    },
    /// Staff action on a booking: cancel, manual check-in, or no-show.
    UpdateBookingState {
        id: Ulid,
        transition: BookingTransition,
    },
    CheckInWithCode {
        code: String,
    },
    CheckInMember {
        member_id: Ulid,
        session_id: Ulid,
    },
    InsertEntitlement {
        member_id: Ulid,
        credits: u32,
        unlimited_until: Option<Ms>,
    },
    DeleteEntitlement {
        member_id: Ulid,
    },
    SelectSessions {
        id: Option<Ulid>,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectRoster {
        session_id: Ulid,
    },
    SelectWaitlist {
        session_id: Ulid,
    },
    SelectCheckinCode {
        member_id: Ulid,
        session_id: Ulid,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    Id(Ulid),
    Session(Ulid),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN") {
        return Ok(Command::Listen {
            channel: unquote(rest),
        });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN") {
        return Ok(match rest {
            "*" => Command::UnlistenAll,
            channel => Command::Unlisten {
                channel: unquote(channel),
            },
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    let rest = &sql[keyword.len()..];
    if head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn unquote(channel: &str) -> String {
    channel.trim_matches('"').to_string()
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressable by column name when the statement lists
/// columns and by position otherwise.
struct InsertRow {
    table: &'static str,
    columns: Vec<String>,
    values: Vec<Expr>,
}

impl InsertRow {
    fn get(&self, column: &str, position: usize) -> Option<&Expr> {
        if self.columns.is_empty() {
            return self.values.get(position);
        }
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn require(&self, column: &'static str, position: usize) -> Result<&Expr, SqlError> {
        self.get(column, position).ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn has(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    if rows.len() > 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    let values = rows.into_iter().next().unwrap_or_default();
    if !columns.is_empty() && columns.len() != values.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    match table.as_str() {
        "sessions" => {
            let row = InsertRow { table: "sessions", columns, values };
            Ok(Command::InsertSession {
                id: parse_ulid_expr(row.require("id", 0)?)?,
                capacity: parse_u32(row.require("capacity", 1)?)?,
                start: parse_i64_expr(row.require("start", 2)?)?,
                end: parse_i64_expr(row.require("end", 3)?)?,
            })
        }
        "bookings" => {
            let row = InsertRow { table: "bookings", columns, values };
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(row.require("id", 0)?)?,
                member_id: parse_ulid_expr(row.require("member_id", 1)?)?,
                session_id: parse_ulid_expr(row.require("session_id", 2)?)?,
            })
        }
        "checkins" => {
            let row = InsertRow { table: "checkins", columns, values };
            // A lone positional value is a code; two are (member_id, session_id).
            let by_code = row.has("code") || (row.columns.is_empty() && row.values.len() == 1);
            if by_code {
                Ok(Command::CheckInWithCode {
                    code: parse_string_expr(row.require("code", 0)?)?,
                })
            } else {
                Ok(Command::CheckInMember {
                    member_id: parse_ulid_expr(row.require("member_id", 0)?)?,
                    session_id: parse_ulid_expr(row.require("session_id", 1)?)?,
                })
            }
        }
        "entitlements" => {
            let row = InsertRow { table: "entitlements", columns, values };
            let unlimited_until = match row.get("expires_at", 2) {
                Some(expr) => parse_i64_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertEntitlement {
                member_id: parse_ulid_expr(row.require("member_id", 0)?)?,
                credits: parse_u32(row.require("credits", 1)?)?,
                unlimited_until,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE must set exactly one column".into()));
    };
    let column = match &assignment.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
        }
        AssignmentTarget::Tuple(_) => {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        }
    };
    let value = &assignment.value;

    match (table.as_str(), column.as_str()) {
        ("sessions", "capacity") => Ok(Command::UpdateSessionCapacity {
            id,
            capacity: parse_u32(value)?,
        }),
        ("sessions", "status") => {
            let raw = parse_string_expr(value)?;
            let status = SessionStatus::parse(&raw)
                .ok_or_else(|| SqlError::Parse(format!("unknown session status: {raw}")))?;
            Ok(Command::UpdateSessionStatus { id, status })
        }
        ("bookings", "state") => {
            let raw = parse_string_expr(value)?;
            let transition = match BookingState::parse(&raw) {
                Some(BookingState::Cancelled) => BookingTransition::Cancel,
                Some(BookingState::CheckedIn) => BookingTransition::CheckIn,
                Some(BookingState::NoShow) => BookingTransition::MarkNoShow,
                Some(other) => {
                    return Err(SqlError::Unsupported(format!(
                        "bookings cannot be set to {}",
                        other.as_str()
                    )));
                }
                None => return Err(SqlError::Parse(format!("unknown booking state: {raw}"))),
            };
            Ok(Command::UpdateBookingState { id, transition })
        }
        ("sessions" | "bookings", _) => {
            Err(SqlError::Unsupported(format!("UPDATE {table} SET {column}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking {
            id: extract_where_id(&delete.selection)?,
        }),
        "entitlements" => {
            let filters = eq_filters(delete.selection.as_ref())?;
            Ok(Command::DeleteEntitlement {
                member_id: filters.require_ulid("member_id")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = eq_filters(select.selection.as_ref())?;

    let cmd = match table.as_str() {
        "sessions" => {
            filters.only(&["id"])?;
            Command::SelectSessions {
                id: filters.ulid("id")?,
            }
        }
        "bookings" => {
            filters.only(&["id", "session_id"])?;
            let filter = match (filters.ulid("id")?, filters.ulid("session_id")?) {
                (Some(id), _) => BookingFilter::Id(id),
                (None, Some(session_id)) => BookingFilter::Session(session_id),
                (None, None) => return Err(SqlError::MissingFilter("id or session_id")),
            };
            Command::SelectBookings { filter }
        }
        "roster" => {
            filters.only(&["session_id"])?;
            Command::SelectRoster {
                session_id: filters.require_ulid("session_id")?,
            }
        }
        "waitlist" => {
            filters.only(&["session_id"])?;
            Command::SelectWaitlist {
                session_id: filters.require_ulid("session_id")?,
            }
        }
        "checkin_codes" => {
            filters.only(&["member_id", "session_id"])?;
            Command::SelectCheckinCode {
                member_id: filters.require_ulid("member_id")?,
                session_id: filters.require_ulid("session_id")?,
            }
        }
        _ => return Err(SqlError::UnknownTable(table)),
    };
    Ok(cmd)
}

/// `col = value` terms of a WHERE clause joined by AND.
struct EqFilters<'a> {
    terms: Vec<(String, &'a Expr)>,
}

impl EqFilters<'_> {
    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.terms.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            Some((col, _)) => Err(SqlError::Unsupported(format!("filter on {col}"))),
            None => Ok(()),
        }
    }

    fn ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.terms
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, expr)| parse_ulid_expr(expr))
            .transpose()
    }

    fn require_ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        self.ulid(column)?.ok_or(SqlError::MissingFilter(column))
    }
}

fn eq_filters(selection: Option<&Expr>) -> Result<EqFilters<'_>, SqlError> {
    let mut terms = Vec::new();
    if let Some(expr) = selection {
        collect_eq_terms(expr, &mut terms)?;
    }
    Ok(EqFilters { terms })
}

fn collect_eq_terms<'a>(expr: &'a Expr, terms: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_terms(left, terms)?;
            collect_eq_terms(right, terms)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            terms.push((col, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_terms(inner, terms),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_i64_expr(expr)?)),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
