use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{self, GatewayAuthSource};
use crate::engine::{Engine, EngineError};
use crate::identity::{AuthError, Identity, JwtIdentity};
use crate::model::*;
use crate::observability;
use crate::policy::Operation;
use crate::sql::{self, Command, ResultShape, SqlError};
use crate::tenant::TenantManager;

pub struct ShiftdHandler {
    tenants: Arc<TenantManager>,
    identities: Arc<JwtIdentity>,
    token_ttl: Duration,
    query_parser: Arc<ShiftdQueryParser>,
}

impl ShiftdHandler {
    pub fn new(
        tenants: Arc<TenantManager>,
        identities: Arc<JwtIdentity>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            tenants,
            identities,
            token_ttl,
            query_parser: Arc::new(ShiftdQueryParser),
        }
    }

    /// Caller and tenant engine for a statement, from the session token.
    fn scope(&self, metadata: &HashMap<String, String>) -> PgWireResult<(Identity, Arc<Engine>)> {
        let resolve = || -> Result<(Identity, Arc<Engine>), EngineError> {
            let actor = auth::session_identity(metadata, self.identities.as_ref())?;
            let engine = self.tenants.resolve(&actor)?;
            Ok((actor, engine))
        };
        resolve().map_err(engine_err)
    }

    async fn run_statement(
        &self,
        metadata: &mut HashMap<String, String>,
        sql: &str,
    ) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(metadata, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::STATEMENTS_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::STATEMENT_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        metadata: &mut HashMap<String, String>,
        cmd: Command,
    ) -> PgWireResult<Response> {
        let shape = cmd.shape();
        match cmd {
            Command::SetSession { token } => {
                let who = auth::store_session_token(metadata, self.identities.as_ref(), token)
                    .map_err(auth_err)?;
                tracing::debug!(
                    "session authorized: user {} as {} in business {}",
                    who.user_id,
                    who.role,
                    who.business_id
                );
                Ok(Response::Execution(Tag::new("SET")))
            }
            Command::ResetSession => {
                auth::clear_session_token(metadata);
                Ok(Response::Execution(Tag::new("RESET")))
            }
            Command::RegisterBusiness { name, email } => {
                let business = self
                    .tenants
                    .register_business(&name, &email)
                    .await
                    .map_err(engine_err)?;
                let admin = Identity {
                    user_id: Ulid::new(),
                    business_id: business.id,
                    role: Role::Admin,
                };
                let token = self
                    .identities
                    .mint(&admin, self.token_ttl)
                    .map_err(auth_err)?;
                rows(shape, [(business, token)], |enc, (b, token)| {
                    encode_business(enc, &b)?;
                    enc.encode_field(&token)
                })
            }
            Command::SelectSessionUser => {
                let (who, engine) = self.scope(metadata)?;
                engine
                    .admit(&who, Operation::ReadTenant)
                    .map_err(engine_err)?;
                let business_name = self
                    .tenants
                    .find_business(&who.business_id)
                    .await
                    .map(|b| b.name)
                    .unwrap_or_default();
                rows(shape, [(who, business_name)], |enc, (who, name)| {
                    enc.encode_field(&who.user_id.to_string())?;
                    enc.encode_field(&who.business_id.to_string())?;
                    enc.encode_field(&name)?;
                    enc.encode_field(&who.role.to_string())
                })
            }
            Command::SelectBusiness => {
                let (who, engine) = self.scope(metadata)?;
                let business = engine.get_business(&who).await.map_err(engine_err)?;
                rows(shape, [business], |enc, b| encode_business(enc, &b))
            }
            Command::UpdateBusiness { patch } => {
                let (who, _) = self.scope(metadata)?;
                let business = self
                    .tenants
                    .update_business(&who, patch)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [business], |enc, b| encode_business(enc, &b))
            }
            Command::SelectBusinessStats => {
                let (who, engine) = self.scope(metadata)?;
                let stats = engine.business_stats(&who).await.map_err(engine_err)?;
                rows(shape, [stats], |enc, s| {
                    enc.encode_field(&(s.employee_count as i64))?;
                    enc.encode_field(&(s.shift_count as i64))?;
                    enc.encode_field(&(s.pending_requests as i64))
                })
            }
            Command::SelectEmployees { id } => {
                let (who, engine) = self.scope(metadata)?;
                let employees = match id {
                    Some(id) => vec![engine.get_employee(&who, id).map_err(engine_err)?],
                    None => engine.list_employees(&who).map_err(engine_err)?,
                };
                rows(shape, employees, |enc, e| encode_employee(enc, &e))
            }
            Command::InsertEmployee(input) => {
                let (who, engine) = self.scope(metadata)?;
                let employee = engine
                    .create_employee(&who, input)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [employee], |enc, e| encode_employee(enc, &e))
            }
            Command::UpdateEmployee { id, patch } => {
                let (who, engine) = self.scope(metadata)?;
                let employee = engine
                    .update_employee(&who, id, patch)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [employee], |enc, e| encode_employee(enc, &e))
            }
            Command::DeleteEmployee { id } => {
                let (who, engine) = self.scope(metadata)?;
                engine.delete_employee(&who, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectShifts(filter) => {
                let (who, engine) = self.scope(metadata)?;
                let page = engine.list_shifts(&who, filter).await.map_err(engine_err)?;
                let total = page.total as i64;
                rows(shape, page.shifts, |enc, s| {
                    encode_shift(enc, &s)?;
                    enc.encode_field(&total)
                })
            }
            Command::CountShifts(filter) => {
                let (who, engine) = self.scope(metadata)?;
                let page = engine.list_shifts(&who, filter).await.map_err(engine_err)?;
                rows(shape, [page], |enc, p| {
                    enc.encode_field(&(p.total as i64))?;
                    enc.encode_field(&(p.page as i64))?;
                    enc.encode_field(&(p.per_page as i64))?;
                    enc.encode_field(&(p.total.div_ceil(p.per_page) as i64))
                })
            }
            Command::SelectShiftConflicts {
                employee_id,
                start_time,
                end_time,
                exclude_id,
            } => {
                let (who, engine) = self.scope(metadata)?;
                let span = engine
                    .check_shift(&who, employee_id, &start_time, &end_time, exclude_id)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [span], |enc, span| {
                    enc.encode_field(&employee_id.to_string())?;
                    enc.encode_field(&format_timestamp(span.start))?;
                    enc.encode_field(&format_timestamp(span.end))
                })
            }
            Command::InsertShift(input) => {
                let (who, engine) = self.scope(metadata)?;
                let shift = engine.create_shift(&who, input).await.map_err(engine_err)?;
                rows(shape, [shift], |enc, s| encode_shift(enc, &s))
            }
            Command::UpdateShift { id, patch } => {
                let (who, engine) = self.scope(metadata)?;
                let shift = engine
                    .update_shift(&who, id, patch)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [shift], |enc, s| encode_shift(enc, &s))
            }
            Command::DeleteShift { id } => {
                let (who, engine) = self.scope(metadata)?;
                engine.delete_shift(&who, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectTemplates => {
                let (who, engine) = self.scope(metadata)?;
                let templates = engine.list_templates(&who).await.map_err(engine_err)?;
                rows(shape, templates, |enc, t| encode_template(enc, &t))
            }
            Command::InsertTemplate(input) => {
                let (who, engine) = self.scope(metadata)?;
                let template = engine
                    .create_template(&who, input)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [template], |enc, t| encode_template(enc, &t))
            }
            Command::ApplyTemplate(input) => {
                let (who, engine) = self.scope(metadata)?;
                let shifts = engine
                    .apply_template(&who, input)
                    .await
                    .map_err(engine_err)?;
                rows(shape, shifts, |enc, s| encode_shift(enc, &s))
            }
            Command::SelectTimeOff { status } => {
                let (who, engine) = self.scope(metadata)?;
                let requests = engine
                    .list_time_off(&who, status.as_deref())
                    .map_err(engine_err)?;
                rows(shape, requests, |enc, r| encode_time_off(enc, &r))
            }
            Command::InsertTimeOff(input) => {
                let (who, engine) = self.scope(metadata)?;
                let request = engine
                    .request_time_off(&who, input)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [request], |enc, r| encode_time_off(enc, &r))
            }
            Command::DecideTimeOff { id, status } => {
                let (who, engine) = self.scope(metadata)?;
                let request = engine
                    .decide_time_off(&who, id, &status)
                    .await
                    .map_err(engine_err)?;
                rows(shape, [request], |enc, r| encode_time_off(enc, &r))
            }
            Command::SelectNotifications => {
                let (who, engine) = self.scope(metadata)?;
                let inbox = engine.list_notifications(&who).map_err(engine_err)?;
                rows(shape, inbox, |enc, n| encode_notification(enc, &n))
            }
            Command::MarkNotificationRead { id } => {
                let (who, engine) = self.scope(metadata)?;
                engine
                    .mark_notification_read(&who, id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
        }
    }
}

// ── Row layouts ──────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn business_fields() -> Vec<FieldInfo> {
    vec![text("id"), text("name"), text("email"), text("created_at")]
}

fn shift_fields() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("business_id"),
        text("employee_id"),
        text("employee_name"),
        text("start_time"),
        text("end_time"),
        text("role"),
        text("notes"),
    ]
}

pub fn schema_for(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::SessionUser => vec![
            text("user_id"),
            text("business_id"),
            text("business_name"),
            text("role"),
        ],
        ResultShape::Business => business_fields(),
        ResultShape::RegisteredBusiness => {
            let mut fields = business_fields();
            fields.push(text("token"));
            fields
        }
        ResultShape::BusinessStats => vec![
            int8("employee_count"),
            int8("shift_count"),
            int8("pending_requests"),
        ],
        ResultShape::Employees => vec![
            text("id"),
            text("name"),
            text("email"),
            text("phone"),
            text("role"),
            text("created_at"),
        ],
        ResultShape::Shifts => shift_fields(),
        ResultShape::ShiftPage => {
            let mut fields = shift_fields();
            fields.push(int8("total"));
            fields
        }
        ResultShape::ShiftCount => {
            vec![int8("total"), int8("page"), int8("per_page"), int8("pages")]
        }
        ResultShape::ShiftCheck => vec![text("employee_id"), text("start_time"), text("end_time")],
        ResultShape::Templates => vec![
            text("id"),
            text("name"),
            text("start_time"),
            text("end_time"),
            text("days_of_week"),
            text("role"),
            text("created_at"),
        ],
        ResultShape::TimeOff => vec![
            text("id"),
            text("employee_id"),
            text("requested_by"),
            text("start_date"),
            text("end_date"),
            text("reason"),
            text("status"),
            text("decided_by"),
            text("created_at"),
            text("updated_at"),
        ],
        ResultShape::Notifications => vec![
            text("id"),
            text("user_id"),
            text("title"),
            text("message"),
            text("type"),
            boolean("read"),
            text("created_at"),
        ],
        ResultShape::Tag => vec![],
    }
}

/// Encode every item as one row of `shape`.
fn rows<T>(
    shape: ResultShape,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema_for(shape));
    let rows: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    )))
}

fn encode_business(enc: &mut DataRowEncoder, b: &Business) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.name)?;
    enc.encode_field(&b.email)?;
    enc.encode_field(&format_timestamp(b.created_at))
}

fn encode_employee(enc: &mut DataRowEncoder, e: &Employee) -> PgWireResult<()> {
    enc.encode_field(&e.id.to_string())?;
    enc.encode_field(&e.name)?;
    enc.encode_field(&e.email)?;
    enc.encode_field(&e.phone)?;
    enc.encode_field(&e.role)?;
    enc.encode_field(&format_timestamp(e.created_at))
}

fn encode_shift(enc: &mut DataRowEncoder, s: &ShiftView) -> PgWireResult<()> {
    enc.encode_field(&s.id.to_string())?;
    enc.encode_field(&s.business_id.to_string())?;
    enc.encode_field(&s.employee_id.to_string())?;
    enc.encode_field(&s.employee_name)?;
    enc.encode_field(&format_timestamp(s.start_time))?;
    enc.encode_field(&format_timestamp(s.end_time))?;
    enc.encode_field(&s.role)?;
    enc.encode_field(&s.notes)
}

fn encode_template(enc: &mut DataRowEncoder, t: &ShiftTemplate) -> PgWireResult<()> {
    enc.encode_field(&t.id.to_string())?;
    enc.encode_field(&t.name)?;
    enc.encode_field(&t.start_time.format())?;
    enc.encode_field(&t.end_time.format())?;
    enc.encode_field(&t.days_of_week.format())?;
    enc.encode_field(&t.role)?;
    enc.encode_field(&format_timestamp(t.created_at))
}

fn encode_time_off(enc: &mut DataRowEncoder, r: &TimeOffRequest) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.employee_id.to_string())?;
    enc.encode_field(&r.requested_by.to_string())?;
    enc.encode_field(&format_date(r.start_date))?;
    enc.encode_field(&format_date(r.end_date))?;
    enc.encode_field(&r.reason)?;
    enc.encode_field(&r.status.to_string())?;
    enc.encode_field(&r.decided_by.map(|id| id.to_string()))?;
    enc.encode_field(&format_timestamp(r.created_at))?;
    enc.encode_field(&format_timestamp(r.updated_at))
}

fn encode_notification(enc: &mut DataRowEncoder, n: &Notification) -> PgWireResult<()> {
    enc.encode_field(&n.id.to_string())?;
    enc.encode_field(&n.user_id.to_string())?;
    enc.encode_field(&n.title)?;
    enc.encode_field(&n.message)?;
    enc.encode_field(&n.kind)?;
    enc.encode_field(&n.read)?;
    enc.encode_field(&format_timestamp(n.created_at))
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for ShiftdHandler {
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
        let response = self.run_statement(client.metadata_mut(), query).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ShiftdQueryParser;

#[async_trait]
impl QueryParser for ShiftdQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        sql::describe(stmt).map(schema_for).map_err(sql_err)
    }
}

#[async_trait]
impl ExtendedQueryHandler for ShiftdHandler {
    type Statement = String;
    type QueryParser = ShiftdQueryParser;

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
        self.run_statement(client.metadata_mut(), &sql).await
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
        let shape = sql::describe(&target.statement).map_err(sql_err)?;
        Ok(DescribeStatementResponse::new(param_types, schema_for(shape)))
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
        let shape = sql::describe(&target.statement.statement).map_err(sql_err)?;
        Ok(DescribePortalResponse::new(schema_for(shape)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
/// `$N` placeholders outside quoted literals and identifiers, as
/// (byte range, N) in source order.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start + 1..end].parse::<usize>() {
                    found.push((start..end, n));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace each placeholder once, left to right. Bound text is never
/// rescanned, so a `$1` inside a value stays literal.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(text) => out.push_str(&quote_literal(text)),
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

/// Bound parameter values are text format.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ShiftdFactory {
    handler: Arc<ShiftdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<GatewayAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ShiftdFactory {
    pub fn new(
        tenants: Arc<TenantManager>,
        identities: Arc<JwtIdentity>,
        password: String,
        token_ttl: Duration,
    ) -> Self {
        let auth_source = GatewayAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ShiftdHandler::new(tenants, identities, token_ttl)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ShiftdFactory {
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

/// Serve one client connection until it closes. Factories are cheap to
/// clone; every clone shares the same handler.
pub async fn process_connection(
    socket: TcpStream,
    factory: ShiftdFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidFormat(_) => "22P02",
        EngineError::InvalidRange => "22023",
        EngineError::NotFound(..) => "P0002",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::PermissionDenied(_) => "42501",
        EngineError::Auth(_) => "28000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58030",
    }
}

pub fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::InvalidId(..) => "22P02",
        SqlError::MissingColumn(_) => "23502",
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn { .. } => "42703",
        SqlError::Parse(_)
        | SqlError::Empty
        | SqlError::Unsupported(_)
        | SqlError::WrongArity(..)
        | SqlError::MissingFilter(_) => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    match &e {
        EngineError::Storage(msg) => tracing::error!("storage failure: {msg}"),
        EngineError::Auth(a) => return auth_err(a.clone()),
        _ => tracing::debug!("statement rejected: {e}"),
    }
    user_error(engine_sqlstate(&e), e.to_string())
}

fn auth_err(e: AuthError) -> PgWireError {
    let reason = match &e {
        AuthError::MissingCredential => "missing",
        AuthError::Expired => "expired",
        AuthError::InvalidToken(_) | AuthError::InvalidClaims(_) => "invalid",
    };
    metrics::counter!(observability::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
    tracing::debug!("session token rejected: {e}");
    user_error("28000", e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
