use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Mutex};
use ulid::Ulid;

use crate::auth::{MarqueeAuthSource, Roles};
use crate::engine::{
    BookEvent, Engine, EngineError, ErrorKind, HoldRequest, SubmitRequest, parse_grid, render_grid,
};
use crate::model::*;
use crate::observability::{self, COMMANDS_TOTAL, COMMAND_DURATION_SECONDS};
use crate::sql::{self, Command, ReservationAction};

/// Per-connection query handler. LISTEN subscriptions live here and are
/// delivered as NotificationResponse around the connection's next command.
pub struct MarqueeHandler {
    engine: Arc<Engine>,
    roles: Arc<Roles>,
    query_parser: Arc<MarqueeQueryParser>,
    listeners: Mutex<HashMap<String, broadcast::Receiver<AuditRecord>>>,
}

impl MarqueeHandler {
    pub fn new(engine: Arc<Engine>, roles: Arc<Roles>) -> Self {
        Self {
            engine,
            roles,
            query_parser: Arc::new(MarqueeQueryParser),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> Actor {
        let user = client
            .metadata()
            .get("user")
            .map(String::as_str)
            .unwrap_or("anonymous");
        self.roles.actor_for(user)
    }

    async fn run<C>(&self, client: &mut C, query: &str, format: &Format) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.flush_notifications(client).await?;
        let actor = self.resolve_actor(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let started = Instant::now();
        let result = self.execute_command(&actor, cmd, format).await;
        metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);

        self.flush_notifications(client).await?;
        result
    }

    /// Push every queued audit record for the channels this connection listens on.
    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pending = {
            let mut listeners = self.listeners.lock().await;
            let mut pending = Vec::new();
            for (channel, rx) in listeners.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(record) => match serde_json::to_string(&record) {
                            Ok(payload) => pending.push((channel.clone(), payload)),
                            Err(e) => tracing::warn!(channel, "unserializable audit record: {e}"),
                        },
                        Err(TryRecvError::Lagged(skipped)) => {
                            tracing::warn!(channel, skipped, "listener lagged, notifications dropped");
                        }
                        Err(_) => break,
                    }
                }
            }
            pending
        };

        if pending.is_empty() {
            return Ok(());
        }
        for (channel, payload) in pending {
            client
                .feed(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    0, channel, payload,
                )))
                .await?;
        }
        client.flush().await?;
        Ok(())
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom { id, name, layout } => {
                let layout = parse_grid(&layout).map_err(|e| engine_err(e.into()))?;
                engine.create_room(id, name, layout, actor).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoomLayout { id, layout } => {
                let layout = parse_grid(&layout).map_err(|e| engine_err(e.into()))?;
                engine.update_room_layout(id, layout, actor).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectRooms { id } => {
                let rooms = match id {
                    Some(id) => vec![engine.room_info(id).await.map_err(engine_err)?],
                    None => engine.list_rooms().await,
                };
                let schema = row_schema(ROOM_COLUMNS, format);
                let mut rows = Vec::with_capacity(rooms.len());
                for room in rooms {
                    let layout = engine.room_layout(room.id).await.map_err(engine_err)?;
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&room.id.to_string())?;
                    encoder.encode_field(&room.name)?;
                    encoder.encode_field(&(room.capacity as i64))?;
                    encoder.encode_field(&room.has_active_bookings)?;
                    encoder.encode_field(&render_grid(&layout))?;
                    rows.push(Ok(encoder.take_row()));
                }
                Ok(query_response(schema, rows))
            }
            Command::InsertShowing { id, room_id, start, end, price } => {
                engine
                    .create_showing(id, room_id, start, end, price, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteShowing { id } => {
                engine.cancel_showing(id, actor).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectShowing { id } => {
                let info = engine.showing_info(id).await.map_err(engine_err)?;
                let schema = row_schema(SHOWING_COLUMNS, format);
                let row = encode_showing(&schema, &info);
                Ok(query_response(schema, vec![row]))
            }
            Command::SelectSeats { showing_id } => {
                let seats = engine.seat_map(showing_id).await.map_err(engine_err)?;
                let schema = row_schema(SEAT_COLUMNS, format);
                let rows = seats
                    .iter()
                    .map(|seat| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&SeatRef::new(seat.row, seat.column).to_string())?;
                        encoder.encode_field(&seat.row.to_string())?;
                        encoder.encode_field(&(seat.column as i64))?;
                        encoder.encode_field(&seat.kind.as_str().to_string())?;
                        encoder.encode_field(&seat.state.as_str().to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::UpdateSeat { showing_id, seat, blocked } => {
                let result = if blocked {
                    engine.block_seat(showing_id, seat, actor).await
                } else {
                    engine.unblock_seat(showing_id, seat, actor).await
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertHold { showing_id, seats, idempotency_key } => {
                let outcome = engine
                    .hold_seats(HoldRequest { showing_id, seats, idempotency_key }, actor)
                    .await
                    .map_err(engine_err)?;
                let schema = row_schema(RESERVATION_COLUMNS, format);
                let row = encode_reservation(&schema, outcome.reservation());
                Ok(query_response(schema, vec![row]))
            }
            Command::UpdateReservation { id, action } => {
                let result = match action {
                    ReservationAction::Confirm => engine.confirm_reservation(id, actor).await.map(drop),
                    ReservationAction::Cancel { force: false } => engine.cancel_reservation(id, actor).await,
                    ReservationAction::Cancel { force: true } => engine.force_cancel_reservation(id, actor).await,
                    ReservationAction::Extend => engine.extend_hold(id, actor).await.map(drop),
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectReservation { id } => {
                let reservation = engine.get_reservation(id, actor).await.map_err(engine_err)?;
                let schema = row_schema(RESERVATION_COLUMNS, format);
                let row = encode_reservation(&schema, &reservation);
                Ok(query_response(schema, vec![row]))
            }
            Command::SelectAvailability { room_id, start, end } => {
                let available = engine
                    .check_availability(room_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let schema = row_schema(AVAILABILITY_COLUMNS, format);
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id.to_string())?;
                encoder.encode_field(&start)?;
                encoder.encode_field(&end)?;
                encoder.encode_field(&available)?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectSlots { room_id, date, duration_minutes } => {
                let view = engine
                    .room_slots(room_id, date, duration_minutes)
                    .await
                    .map_err(engine_err)?;
                let duration = duration_minutes as Ms * MINUTE;
                let entries = std::iter::once(("open", view.open, view.close))
                    .chain(view.busy.iter().map(|s| ("busy", s.start, s.end)))
                    .chain(view.free.iter().map(|&t| ("free", t, t + duration)));

                let schema = row_schema(SLOT_COLUMNS, format);
                let rows = entries
                    .map(|(kind, start, end)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&kind.to_string())?;
                        encoder.encode_field(&start)?;
                        encoder.encode_field(&end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::InsertEvent { room_id, start, end, party_size, notes } => {
                let event = engine
                    .book_event(BookEvent { room_id, start, end, party_size, notes }, actor)
                    .await
                    .map_err(engine_err)?;
                let schema = row_schema(EVENT_COLUMNS, format);
                let row = encode_event(&schema, &event);
                Ok(query_response(schema, vec![row]))
            }
            Command::UpdateEvent { id, status } => {
                let result = match status {
                    EventStatus::Cancelled => engine.cancel_event(id, actor).await,
                    EventStatus::Finalized => engine.finalize_event(id, actor).await,
                    EventStatus::Reserved => Err(EngineError::Invalid("events cannot be set back to reserved".into())),
                };
                result.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectEvents { room_id } => {
                let events = engine.list_events(room_id).await.map_err(engine_err)?;
                let schema = row_schema(EVENT_COLUMNS, format);
                let rows = events.iter().map(|e| encode_event(&schema, e)).collect();
                Ok(query_response(schema, rows))
            }
            Command::InsertEventRequest { room_id, start, duration_minutes, party_size, contact, notes } => {
                let request = engine
                    .submit_request(
                        SubmitRequest { room_id, start, duration_minutes, party_size, contact, notes },
                        actor,
                    )
                    .await
                    .map_err(engine_err)?;
                let schema = row_schema(REQUEST_COLUMNS, format);
                let row = encode_request(&schema, &request);
                Ok(query_response(schema, vec![row]))
            }
            Command::ApproveRequest { id, room_id } => {
                let event = engine.approve_request(id, room_id, actor).await.map_err(engine_err)?;
                let schema = row_schema(EVENT_COLUMNS, format);
                let row = encode_event(&schema, &event);
                Ok(query_response(schema, vec![row]))
            }
            Command::RejectRequest { id, reason } => {
                engine.reject_request(id, &reason, actor).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectEventRequests { id, status } => {
                let requests = match id {
                    Some(id) => {
                        let request = engine.get_request(id).await.map_err(engine_err)?;
                        if status.is_none_or(|s| s == request.status) { vec![request] } else { vec![] }
                    }
                    None => engine.list_requests(status).await,
                };
                let schema = row_schema(REQUEST_COLUMNS, format);
                let rows = requests.iter().map(|r| encode_request(&schema, r)).collect();
                Ok(query_response(schema, rows))
            }
            Command::Listen { channel } => {
                let resource_id = channel_resource(&channel)?;
                let rx = engine.notify.subscribe(resource_id);
                self.listeners.lock().await.insert(channel, rx);
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                if self.listeners.lock().await.remove(&channel).is_some() {
                    self.release_channel(&channel);
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                let channels: Vec<String> = self.listeners.lock().await.drain().map(|(channel, _)| channel).collect();
                for channel in &channels {
                    self.release_channel(channel);
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

impl MarqueeHandler {
    /// Only channels that passed LISTEN are stored, so they always parse.
    fn release_channel(&self, channel: &str) {
        if let Ok(resource_id) = channel_resource(channel) {
            self.engine.notify.prune(&resource_id);
        }
    }
}

/// `showing_{id}`, `room_{id}` or `request_{id}`.
fn channel_resource(channel: &str) -> PgWireResult<Ulid> {
    let (kind, id) = channel.split_once('_').ok_or_else(|| bad_channel(channel))?;
    if !matches!(kind, "showing" | "room" | "request") {
        return Err(bad_channel(channel));
    }
    Ulid::from_string(id).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

fn bad_channel(channel: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42000".into(),
        format!("invalid channel: {channel} (expected showing_{{id}}, room_{{id}} or request_{{id}})"),
    )))
}

// ── Result encoding ──────────────────────────────────────────────

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_showing(schema: &Arc<Vec<FieldInfo>>, info: &ShowingInfo) -> PgWireResult<DataRow> {
    let s = &info.showing;
    let snap = &info.snapshot;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.room_id.to_string())?;
    encoder.encode_field(&s.span.start)?;
    encoder.encode_field(&s.span.end)?;
    encoder.encode_field(&s.price)?;
    encoder.encode_field(&s.cancelled)?;
    encoder.encode_field(&info.retired)?;
    encoder.encode_field(&(snap.total as i64))?;
    encoder.encode_field(&(snap.available as i64))?;
    encoder.encode_field(&(snap.held as i64))?;
    encoder.encode_field(&(snap.sold as i64))?;
    encoder.encode_field(&(snap.blocked as i64))?;
    Ok(encoder.take_row())
}

fn encode_reservation(schema: &Arc<Vec<FieldInfo>>, r: &Reservation) -> PgWireResult<DataRow> {
    let seats: Vec<String> = r.seats.iter().map(ToString::to_string).collect();
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.showing_id.to_string())?;
    encoder.encode_field(&seats.join(","))?;
    encoder.encode_field(&r.status.as_str().to_string())?;
    encoder.encode_field(&r.holder)?;
    encoder.encode_field(&r.idempotency_key)?;
    encoder.encode_field(&r.created_at)?;
    encoder.encode_field(&r.expires_at)?;
    Ok(encoder.take_row())
}

fn encode_event(schema: &Arc<Vec<FieldInfo>>, e: &Event) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&e.id.to_string())?;
    encoder.encode_field(&e.room_id.to_string())?;
    encoder.encode_field(&e.span.start)?;
    encoder.encode_field(&e.span.end)?;
    encoder.encode_field(&(e.party_size as i64))?;
    encoder.encode_field(&e.status.as_str().to_string())?;
    encoder.encode_field(&e.notes)?;
    encoder.encode_field(&e.request_id.map(|id| id.to_string()))?;
    Ok(encoder.take_row())
}

fn encode_request(schema: &Arc<Vec<FieldInfo>>, r: &EventRequest) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.room_id.map(|id| id.to_string()))?;
    encoder.encode_field(&r.start)?;
    encoder.encode_field(&(r.duration / MINUTE))?;
    encoder.encode_field(&(r.party_size as i64))?;
    encoder.encode_field(&r.requester)?;
    encoder.encode_field(&r.contact.name)?;
    encoder.encode_field(&r.contact.email)?;
    encoder.encode_field(&r.contact.phone)?;
    encoder.encode_field(&r.notes)?;
    encoder.encode_field(&r.status.as_str().to_string())?;
    encoder.encode_field(&r.submitted_at)?;
    encoder.encode_field(&r.rejection_reason)?;
    encoder.encode_field(&r.event_id.map(|id| id.to_string()))?;
    Ok(encoder.take_row())
}

// ── Schemas ──────────────────────────────────────────────────────

type Columns = &'static [(&'static str, Type)];

const ROOM_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("name", Type::VARCHAR),
    ("capacity", Type::INT8),
    ("has_active_bookings", Type::BOOL),
    ("layout", Type::VARCHAR),
];

const SHOWING_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("room_id", Type::VARCHAR),
    ("start", Type::INT8),
    ("end", Type::INT8),
    ("price", Type::INT8),
    ("cancelled", Type::BOOL),
    ("retired", Type::BOOL),
    ("total", Type::INT8),
    ("available", Type::INT8),
    ("held", Type::INT8),
    ("sold", Type::INT8),
    ("blocked", Type::INT8),
];

const SEAT_COLUMNS: Columns = &[
    ("seat", Type::VARCHAR),
    ("row", Type::VARCHAR),
    ("column", Type::INT8),
    ("kind", Type::VARCHAR),
    ("state", Type::VARCHAR),
];

const RESERVATION_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("showing_id", Type::VARCHAR),
    ("seats", Type::VARCHAR),
    ("status", Type::VARCHAR),
    ("holder", Type::VARCHAR),
    ("idempotency_key", Type::VARCHAR),
    ("created_at", Type::INT8),
    ("expires_at", Type::INT8),
];

const AVAILABILITY_COLUMNS: Columns = &[
    ("room_id", Type::VARCHAR),
    ("start", Type::INT8),
    ("end", Type::INT8),
    ("available", Type::BOOL),
];

const SLOT_COLUMNS: Columns = &[("kind", Type::VARCHAR), ("start", Type::INT8), ("end", Type::INT8)];

const EVENT_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("room_id", Type::VARCHAR),
    ("start", Type::INT8),
    ("end", Type::INT8),
    ("party_size", Type::INT8),
    ("status", Type::VARCHAR),
    ("notes", Type::VARCHAR),
    ("request_id", Type::VARCHAR),
];

const REQUEST_COLUMNS: Columns = &[
    ("id", Type::VARCHAR),
    ("room_id", Type::VARCHAR),
    ("start", Type::INT8),
    ("duration", Type::INT8),
    ("party_size", Type::INT8),
    ("requester", Type::VARCHAR),
    ("contact_name", Type::VARCHAR),
    ("contact_email", Type::VARCHAR),
    ("contact_phone", Type::VARCHAR),
    ("notes", Type::VARCHAR),
    ("status", Type::VARCHAR),
    ("submitted_at", Type::INT8),
    ("rejection_reason", Type::VARCHAR),
    ("event_id", Type::VARCHAR),
];

/// Field descriptions in the result format the client asked for.
fn row_schema(columns: Columns, format: &Format) -> Arc<Vec<FieldInfo>> {
    Arc::new(
        columns
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| {
                FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
            })
            .collect(),
    )
}

/// Result columns a statement will produce, judged from its verb and target
/// table without binding parameters.
fn result_columns(sql: &str) -> Columns {
    let upper = sql.to_uppercase();
    let mut words = upper
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty());
    let Some(verb) = words.next() else {
        return &[];
    };
    let table = match verb {
        "SELECT" => words.skip_while(|w| *w != "FROM").nth(1),
        "INSERT" => words.skip_while(|w| *w != "INTO").nth(1),
        "UPDATE" => words.next(),
        _ => None,
    };
    let Some(table) = table.map(|t| t.trim_matches('"').to_lowercase()) else {
        return &[];
    };

    match (verb, table.as_str()) {
        ("SELECT", "rooms") => ROOM_COLUMNS,
        ("SELECT", "showings") => SHOWING_COLUMNS,
        ("SELECT", "seats") => SEAT_COLUMNS,
        ("SELECT", "reservations") | ("INSERT", "holds") => RESERVATION_COLUMNS,
        ("SELECT", "availability") => AVAILABILITY_COLUMNS,
        ("SELECT", "slots") => SLOT_COLUMNS,
        ("SELECT", "events") | ("INSERT", "events") => EVENT_COLUMNS,
        ("SELECT", "event_requests") | ("INSERT", "event_requests") => REQUEST_COLUMNS,
        ("UPDATE", "event_requests") if upper.contains("'ACCEPTED'") => EVENT_COLUMNS,
        _ => &[],
    }
}

#[async_trait]
impl SimpleQueryHandler for MarqueeHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MarqueeQueryParser;

#[async_trait]
impl QueryParser for MarqueeQueryParser {
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
        let format = column_format.unwrap_or(&Format::UnifiedText);
        Ok(row_schema(result_columns(stmt), format).to_vec())
    }
}

#[async_trait]
impl ExtendedQueryHandler for MarqueeHandler {
    type Statement = String;
    type QueryParser = MarqueeQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql, &portal.result_column_format).await
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
        let fields = row_schema(result_columns(&target.statement), &Format::UnifiedText);
        Ok(DescribeStatementResponse::new(param_types, fields.to_vec()))
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
        let fields = row_schema(result_columns(&target.statement.statement), &target.result_column_format);
        Ok(DescribePortalResponse::new(fields.to_vec()))
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Replace `$N` placeholders with bound text-format values in one
/// left-to-right pass.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => {
                out.push('$');
                out.push_str(&after[..digits]);
            }
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MarqueeFactory {
    handler: Arc<MarqueeHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MarqueeAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MarqueeFactory {
    pub fn new(engine: Arc<Engine>, roles: Arc<Roles>, password: String) -> Self {
        let auth_source = MarqueeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MarqueeHandler::new(engine, roles)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MarqueeFactory {
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

/// Serve one client connection. Each connection gets its own handler so
/// LISTEN state is never shared.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    roles: Arc<Roles>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(MarqueeFactory::new(engine, roles, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "22023",
        ErrorKind::Conflict => "55000",
        ErrorKind::Integrity => "23505",
        ErrorKind::NotFound => "P0002",
        ErrorKind::Forbidden => "42501",
    }
}

/// SQLSTATE and a message starting with the reason code, e.g.
/// `SEAT_UNAVAILABLE: seat A1 is not available`.
fn error_parts(e: &EngineError) -> (&'static str, String) {
    (sqlstate(e.kind()), format!("{}: {e}", e.reason()))
}

fn engine_err(e: EngineError) -> PgWireError {
    tracing::debug!(reason = %e.reason(), "command failed: {e}");
    let (code, message) = error_parts(&e);
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
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
    use crate::config::Policy;
    use crate::notify::NotifyHub;

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = [Some("costs $1"), None, Some("O'Brien")];
        assert_eq!(
            bind_params("INSERT INTO t VALUES ($1, $2, $3, $4, $)", &params),
            "INSERT INTO t VALUES ('costs $1', NULL, 'O''Brien', $4, $)"
        );

        let ten: Vec<Option<&str>> = (1..=10).map(|_| Some("x")).collect();
        assert_eq!(bind_params("$10 $1", &ten), "'x' 'x'");
    }

    #[tokio::test]
    async fn unlisten_releases_the_broadcast_channel() {
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::with_system_clock(Policy::default(), notify.clone()));
        let handler = MarqueeHandler::new(engine, Arc::new(Roles::new(["box-office"])));
        let actor = Actor::customer("ana");
        let text = Format::UnifiedText;
        let first = format!("request_{}", Ulid::new());
        let second = format!("room_{}", Ulid::new());

        for channel in [&first, &second] {
            let listen = Command::Listen { channel: channel.clone() };
            assert!(handler.execute_command(&actor, listen, &text).await.is_ok());
        }
        assert_eq!(notify.channel_count(), 2);

        let unlisten = Command::Unlisten { channel: first };
        assert!(handler.execute_command(&actor, unlisten, &text).await.is_ok());
        assert_eq!(notify.channel_count(), 1);

        assert!(handler.execute_command(&actor, Command::UnlistenAll, &text).await.is_ok());
        assert_eq!(notify.channel_count(), 0);
    }

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM seats WHERE showing_id = $1"), 1);
        assert_eq!(count_params("INSERT INTO holds VALUES ($2, $1, $10)"), 10);
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
    }

    #[test]
    fn columns_follow_verb_and_table() {
        assert_eq!(result_columns("SELECT * FROM seats WHERE showing_id = $1"), SEAT_COLUMNS);
        assert_eq!(
            result_columns("INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ($1, $2, $3)"),
            RESERVATION_COLUMNS
        );
        assert_eq!(result_columns(r#"SELECT * FROM "slots""#), SLOT_COLUMNS);
        assert!(result_columns("INSERT INTO rooms (id, name, layout) VALUES ($1, $2, $3)").is_empty());
        assert!(result_columns("UPDATE reservations SET status = 'confirmed' WHERE id = $1").is_empty());
        assert_eq!(
            result_columns("UPDATE event_requests SET status = 'accepted' WHERE id = $1"),
            EVENT_COLUMNS
        );
    }

    #[test]
    fn schema_uses_requested_format() {
        let text = row_schema(SLOT_COLUMNS, &Format::UnifiedText);
        assert!(text.iter().all(|f| matches!(f.format(), FieldFormat::Text)));
        let binary = row_schema(SLOT_COLUMNS, &Format::UnifiedBinary);
        assert!(binary.iter().all(|f| matches!(f.format(), FieldFormat::Binary)));
    }

    #[test]
    fn channels_name_a_resource() {
        let id = Ulid::new();
        assert_eq!(channel_resource(&format!("showing_{id}")).unwrap(), id);
        assert_eq!(channel_resource(&format!("room_{id}")).unwrap(), id);
        assert!(channel_resource(&format!("resource_{id}")).is_err());
        assert!(channel_resource("showing_nope").is_err());
    }

    #[test]
    fn engine_errors_carry_reason_and_sqlstate() {
        let (code, message) = error_parts(&EngineError::SeatUnavailable(SeatRef::new('A', 1)));
        assert_eq!(code, "55000");
        assert!(message.starts_with("SEAT_UNAVAILABLE: "));

        let (code, _) = error_parts(&EngineError::DuplicateRequest("k".into()));
        assert_eq!(code, "23505");
        let (code, message) = error_parts(&EngineError::Forbidden("only staff can create rooms"));
        assert_eq!(code, "42501");
        assert!(message.starts_with("FORBIDDEN: "));
    }
}
