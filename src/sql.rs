use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: String,
        /// Editor grid, e.g. `NNENN/AAEDD`.
        layout: String,
    },
    UpdateRoomLayout {
        id: Ulid,
        layout: String,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    InsertShowing {
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        price: i64,
    },
    DeleteShowing {
        id: Ulid,
    },
    SelectShowing {
        id: Ulid,
    },
    SelectSeats {
        showing_id: Ulid,
    },
    UpdateSeat {
        showing_id: Ulid,
        seat: SeatRef,
        blocked: bool,
    },
    InsertHold {
        showing_id: Ulid,
        seats: Vec<SeatRef>,
        idempotency_key: String,
    },
    UpdateReservation {
        id: Ulid,
        action: ReservationAction,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectAvailability {
        room_id: Ulid,
        start: Ms,
        end: Ms,
    },
    SelectSlots {
        room_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    },
    InsertEvent {
        room_id: Ulid,
        start: Ms,
        end: Ms,
        party_size: u32,
        notes: Option<String>,
    },
    UpdateEvent {
        id: Ulid,
        status: EventStatus,
    },
    SelectEvents {
        room_id: Ulid,
    },
    InsertEventRequest {
        room_id: Option<Ulid>,
        start: Ms,
        duration_minutes: u32,
        party_size: u32,
        contact: Contact,
        notes: Option<String>,
    },
    ApproveRequest {
        id: Ulid,
        room_id: Option<Ulid>,
    },
    RejectRequest {
        id: Ulid,
        reason: String,
    },
    SelectEventRequests {
        id: Option<Ulid>,
        status: Option<RequestStatus>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

/// What `UPDATE reservations SET status = …` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationAction {
    Confirm,
    Cancel { force: bool },
    /// `status = 'active'` renews the hold.
    Extend,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches('"').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches('"').to_string();
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name. Without an explicit column list the
/// table's default column order applies.
struct Row<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(insert: &'a ast::Insert, defaults: &[&str]) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        let columns: Vec<String> = if insert.columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() > columns.len() {
            return Err(SqlError::Parse(format!(
                "{} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Missing column and explicit NULL both read as absent.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        let idx = self.columns.iter().position(|c| c == column)?;
        let expr = self.values.get(idx)?;
        match extract_value(expr) {
            Some(Value::Null) => None,
            _ => Some(expr),
        }
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingValue(column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "rooms" => {
            let row = Row::new(insert, &["id", "name", "layout"])?;
            Ok(Command::InsertRoom {
                id: parse_ulid_expr(row.require("id")?)?,
                name: parse_string_expr(row.require("name")?)?,
                layout: parse_string_expr(row.require("layout")?)?,
            })
        }
        "showings" => {
            let row = Row::new(insert, &["id", "room_id", "start", "end", "price"])?;
            Ok(Command::InsertShowing {
                id: parse_ulid_expr(row.require("id")?)?,
                room_id: parse_ulid_expr(row.require("room_id")?)?,
                start: parse_i64_expr(row.require("start")?)?,
                end: parse_i64_expr(row.require("end")?)?,
                price: row.get("price").map(parse_i64_expr).transpose()?.unwrap_or(0),
            })
        }
        "holds" => {
            let row = Row::new(insert, &["showing_id", "seats", "idempotency_key"])?;
            Ok(Command::InsertHold {
                showing_id: parse_ulid_expr(row.require("showing_id")?)?,
                seats: parse_seat_list(&parse_string_expr(row.require("seats")?)?)?,
                idempotency_key: parse_string_expr(row.require("idempotency_key")?)?,
            })
        }
        "events" => {
            let row = Row::new(insert, &["room_id", "start", "end", "party_size", "notes"])?;
            Ok(Command::InsertEvent {
                room_id: parse_ulid_expr(row.require("room_id")?)?,
                start: parse_i64_expr(row.require("start")?)?,
                end: parse_i64_expr(row.require("end")?)?,
                party_size: parse_u32(row.require("party_size")?)?,
                notes: row.get("notes").map(parse_string_expr).transpose()?,
            })
        }
        "event_requests" => {
            let row = Row::new(
                insert,
                &[
                    "room_id",
                    "start",
                    "duration",
                    "party_size",
                    "contact_name",
                    "contact_email",
                    "contact_phone",
                    "notes",
                ],
            )?;
            Ok(Command::InsertEventRequest {
                room_id: row.get("room_id").map(parse_ulid_expr).transpose()?,
                start: parse_i64_expr(row.require("start")?)?,
                duration_minutes: parse_u32(row.require("duration")?)?,
                party_size: parse_u32(row.require("party_size")?)?,
                contact: Contact {
                    name: parse_string_expr(row.require("contact_name")?)?,
                    email: row.get("contact_email").map(parse_string_expr).transpose()?,
                    phone: row.get("contact_phone").map(parse_string_expr).transpose()?,
                },
                notes: row.get("notes").map(parse_string_expr).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let set = collect_assignments(assignments)?;
    let filters = collect_filters(selection.as_ref())?;
    let set_value = |col: &'static str| -> Result<&Expr, SqlError> {
        lookup(&set, col).ok_or(SqlError::MissingAssignment(col))
    };

    match table.as_str() {
        "rooms" => Ok(Command::UpdateRoomLayout {
            id: require_filter_ulid(&filters, "id")?,
            layout: parse_string_expr(set_value("layout")?)?,
        }),
        "seats" => {
            let blocked = match parse_string_expr(set_value("state")?)?.to_lowercase().as_str() {
                "blocked" => true,
                "available" => false,
                other => return Err(SqlError::Parse(format!("seat state must be blocked or available, got {other}"))),
            };
            let seat_expr = lookup(&filters, "seat").ok_or(SqlError::MissingFilter("seat"))?;
            Ok(Command::UpdateSeat {
                showing_id: require_filter_ulid(&filters, "showing_id")?,
                seat: parse_seat(&parse_string_expr(seat_expr)?)?,
                blocked,
            })
        }
        "reservations" => {
            let id = require_filter_ulid(&filters, "id")?;
            let force = lookup(&set, "force").map(parse_bool).transpose()?.unwrap_or(false);
            let action = match parse_string_expr(set_value("status")?)?.to_lowercase().as_str() {
                "confirmed" => ReservationAction::Confirm,
                "cancelled" => ReservationAction::Cancel { force },
                "active" => ReservationAction::Extend,
                other => return Err(SqlError::Parse(format!("unsupported reservation status: {other}"))),
            };
            Ok(Command::UpdateReservation { id, action })
        }
        "events" => {
            let status = match parse_string_expr(set_value("status")?)?.to_lowercase().as_str() {
                "cancelled" => EventStatus::Cancelled,
                "finalized" => EventStatus::Finalized,
                other => return Err(SqlError::Parse(format!("unsupported event status: {other}"))),
            };
            Ok(Command::UpdateEvent { id: require_filter_ulid(&filters, "id")?, status })
        }
        "event_requests" => {
            let id = require_filter_ulid(&filters, "id")?;
            let status: RequestStatus = parse_string_expr(set_value("status")?)?
                .parse()
                .map_err(SqlError::Parse)?;
            match status {
                RequestStatus::Accepted => Ok(Command::ApproveRequest {
                    id,
                    room_id: lookup(&set, "room_id").map(parse_ulid_or_null).transpose()?.flatten(),
                }),
                RequestStatus::Rejected => Ok(Command::RejectRequest {
                    id,
                    reason: lookup(&set, "reason")
                        .map(parse_string_expr)
                        .transpose()?
                        .unwrap_or_default(),
                }),
                RequestStatus::Pending => Err(SqlError::Parse("a request cannot be set back to pending".into())),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_assignments(assignments: &[ast::Assignment]) -> Result<Vec<(String, &Expr)>, SqlError> {
    assignments
        .iter()
        .map(|a| match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .map(|col| (col, &a.value))
                .ok_or_else(|| SqlError::Parse("empty column name".into())),
            AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
        })
        .collect()
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "showings" => Ok(Command::DeleteShowing { id: require_filter_ulid(&filters, "id")? }),
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
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms { id: optional_filter_ulid(&filters, "id")? }),
        "showings" => Ok(Command::SelectShowing { id: require_filter_ulid(&filters, "id")? }),
        "seats" => Ok(Command::SelectSeats { showing_id: require_filter_ulid(&filters, "showing_id")? }),
        "reservations" => Ok(Command::SelectReservation { id: require_filter_ulid(&filters, "id")? }),
        "availability" => Ok(Command::SelectAvailability {
            room_id: require_filter_ulid(&filters, "room_id")?,
            start: parse_i64_expr(lookup(&filters, "start").ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_i64_expr(lookup(&filters, "end").ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        "slots" => {
            let date = parse_string_expr(lookup(&filters, "date").ok_or(SqlError::MissingFilter("date"))?)?;
            Ok(Command::SelectSlots {
                room_id: require_filter_ulid(&filters, "room_id")?,
                date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| SqlError::Parse(format!("bad date {date:?}: {e}")))?,
                duration_minutes: parse_u32(lookup(&filters, "duration").ok_or(SqlError::MissingFilter("duration"))?)?,
            })
        }
        "events" => Ok(Command::SelectEvents { room_id: require_filter_ulid(&filters, "room_id")? }),
        "event_requests" => Ok(Command::SelectEventRequests {
            id: optional_filter_ulid(&filters, "id")?,
            status: lookup(&filters, "status")
                .map(|e| parse_string_expr(e).and_then(|s| s.parse().map_err(SqlError::Parse)))
                .transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Filters ───────────────────────────────────────────────────

/// Flatten `a = 1 AND b >= 2 AND c <= 3` into `(column, value)` pairs.
/// Range operators are read as bounds on the named column.
fn collect_filters(selection: Option<&Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_filters_into(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_filters_into<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters_into(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters_into(left, out)?;
                collect_filters_into(right, out)
            }
            ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn lookup<'a>(pairs: &[(String, &'a Expr)], column: &str) -> Option<&'a Expr> {
    pairs.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
}

fn require_filter_ulid(filters: &[(String, &Expr)], column: &'static str) -> Result<Ulid, SqlError> {
    parse_ulid_expr(lookup(filters, column).ok_or(SqlError::MissingFilter(column))?)
}

fn optional_filter_ulid(filters: &[(String, &Expr)], column: &'static str) -> Result<Option<Ulid>, SqlError> {
    lookup(filters, column).map(parse_ulid_expr).transpose()
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::DoubleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_seat(label: &str) -> Result<SeatRef, SqlError> {
    label.parse().map_err(SqlError::Parse)
}

/// `'A1,A2, B7'` → seats in the given order.
fn parse_seat_list(list: &str) -> Result<Vec<SeatRef>, SqlError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_seat)
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing assignment: {0}")]
    MissingAssignment(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ID2: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_room() {
        let sql = format!("INSERT INTO rooms (id, name, layout) VALUES ('{ID}', 'Sala 1', 'NNENN/AAEDD')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRoom { id: ulid(ID), name: "Sala 1".into(), layout: "NNENN/AAEDD".into() }
        );
    }

    #[test]
    fn parse_insert_showing_without_price() {
        let sql = format!(r#"INSERT INTO showings (id, room_id, start, "end") VALUES ('{ID}', '{ID2}', 1000, 2000)"#);
        match parse_sql(&sql).unwrap() {
            Command::InsertShowing { id, room_id, start, end, price } => {
                assert_eq!((id, room_id), (ulid(ID), ulid(ID2)));
                assert_eq!((start, end, price), (1000, 2000, 0));
            }
            cmd => panic!("expected InsertShowing, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_hold_seat_list() {
        let sql = format!("INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ('{ID}', 'a1, A2', 'key1')");
        match parse_sql(&sql).unwrap() {
            Command::InsertHold { showing_id, seats, idempotency_key } => {
                assert_eq!(showing_id, ulid(ID));
                assert_eq!(seats, vec![SeatRef::new('A', 1), SeatRef::new('A', 2)]);
                assert_eq!(idempotency_key, "key1");
            }
            cmd => panic!("expected InsertHold, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_hold_bad_seat() {
        let sql = format!("INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ('{ID}', 'A0', 'k')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_hold_positional() {
        let sql = format!("INSERT INTO holds VALUES ('{ID}', 'B3', 'k')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertHold { .. }));
    }

    #[test]
    fn parse_insert_event_request_with_nulls() {
        let sql = "INSERT INTO event_requests (room_id, start, duration, party_size, contact_name, contact_email, contact_phone, notes) \
                   VALUES (NULL, 1790000000000, 120, 40, 'Ana', 'ana@example.com', NULL, 'birthday')";
        match parse_sql(sql).unwrap() {
            Command::InsertEventRequest { room_id, start, duration_minutes, party_size, contact, notes } => {
                assert_eq!(room_id, None);
                assert_eq!(start, 1_790_000_000_000);
                assert_eq!((duration_minutes, party_size), (120, 40));
                assert_eq!(contact.name, "Ana");
                assert_eq!(contact.email.as_deref(), Some("ana@example.com"));
                assert_eq!(contact.phone, None);
                assert_eq!(notes.as_deref(), Some("birthday"));
            }
            cmd => panic!("expected InsertEventRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_missing_required_value() {
        let sql = "INSERT INTO events (start, \"end\", party_size) VALUES (1, 2, 3)";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingValue("room_id"))));
    }

    #[test]
    fn parse_update_reservation_actions() {
        let confirm = format!("UPDATE reservations SET status = 'confirmed' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&confirm).unwrap(),
            Command::UpdateReservation { id: ulid(ID), action: ReservationAction::Confirm }
        );
        let cancel = format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&cancel).unwrap(),
            Command::UpdateReservation { id: ulid(ID), action: ReservationAction::Cancel { force: false } }
        );
        let force = format!("UPDATE reservations SET status = 'cancelled', force = true WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&force).unwrap(),
            Command::UpdateReservation { id: ulid(ID), action: ReservationAction::Cancel { force: true } }
        );
        let extend = format!("UPDATE reservations SET status = 'active' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&extend).unwrap(),
            Command::UpdateReservation { id: ulid(ID), action: ReservationAction::Extend }
        );
    }

    #[test]
    fn parse_update_seat() {
        let sql = format!("UPDATE seats SET state = 'blocked' WHERE showing_id = '{ID}' AND seat = 'c12'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateSeat { showing_id: ulid(ID), seat: SeatRef::new('C', 12), blocked: true }
        );
    }

    #[test]
    fn parse_approve_and_reject() {
        let approve = format!("UPDATE event_requests SET status = 'accepted', room_id = '{ID2}' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&approve).unwrap(),
            Command::ApproveRequest { id: ulid(ID), room_id: Some(ulid(ID2)) }
        );
        let reject = format!("UPDATE event_requests SET status = 'rejected', reason = 'Room closed' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&reject).unwrap(),
            Command::RejectRequest { id: ulid(ID), reason: "Room closed".into() }
        );
        let reject_no_reason = format!("UPDATE event_requests SET status = 'rejected' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&reject_no_reason).unwrap(),
            Command::RejectRequest { id: ulid(ID), reason: String::new() }
        );
    }

    #[test]
    fn parse_update_without_where_fails() {
        assert!(matches!(
            parse_sql("UPDATE events SET status = 'cancelled'"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_delete_showing() {
        let sql = format!("DELETE FROM showings WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteShowing { id: ulid(ID) });
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!("SELECT * FROM availability WHERE room_id = '{ID}' AND start >= 1000 AND \"end\" <= 2000");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability { room_id: ulid(ID), start: 1000, end: 2000 }
        );
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!("SELECT * FROM slots WHERE room_id = '{ID}' AND date = '2026-10-04' AND duration = 120");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                room_id: ulid(ID),
                date: NaiveDate::from_ymd_opt(2026, 10, 4).unwrap(),
                duration_minutes: 120,
            }
        );
    }

    #[test]
    fn parse_select_requests_by_status() {
        let sql = "SELECT * FROM event_requests WHERE status = 'pending'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectEventRequests { id: None, status: Some(RequestStatus::Pending) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM event_requests").unwrap(),
            Command::SelectEventRequests { id: None, status: None }
        );
    }

    #[test]
    fn parse_listen_and_unlisten() {
        let sql = format!("LISTEN showing_{ID};");
        assert_eq!(parse_sql(&sql).unwrap(), Command::Listen { channel: format!("showing_{ID}") });
        assert_eq!(parse_sql("UNLISTEN *").unwrap(), Command::UnlistenAll);
        assert_eq!(
            parse_sql(&format!("UNLISTEN room_{ID}")).unwrap(),
            Command::Unlisten { channel: format!("room_{ID}") }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
