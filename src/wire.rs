use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::copy::CopyHandler;
use pgwire::api::auth::StartupHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct ConveneHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ConveneQueryParser>,
}

impl ConveneHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ConveneQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .filter(|db| !db.is_empty())
            .cloned()
            .unwrap_or_else(|| self.tenant_manager.default_tenant().to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse and run one statement, recording the RED metrics for it.
    async fn run_statement(
        &self,
        engine: &Engine,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Vec<Response>> {
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertMeetings {
                mut meetings,
                returning,
            } => {
                let doc_ids = if meetings.len() == 1 {
                    let meeting = meetings.remove(0);
                    vec![engine.create_meeting(meeting).await.map_err(engine_err)?]
                } else {
                    engine.create_meetings(meetings).await.map_err(engine_err)?
                };

                if returning {
                    Ok(vec![Response::Query(doc_id_response(&doc_ids, format))])
                } else {
                    Ok(vec![Response::Execution(
                        Tag::new("INSERT").with_oid(0).with_rows(doc_ids.len()),
                    )])
                }
            }
            Command::SelectById { id, limit } => {
                let found = engine.find_by_id(id, limit).await.map_err(engine_err)?;
                Ok(vec![Response::Query(meeting_response(found, format))])
            }
            Command::SelectByParticipant { email, limit } => {
                let found = engine
                    .find_by_participant(&email, limit)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Query(meeting_response(found, format))])
            }
            Command::SelectByTimeRange { start, end, limit } => {
                let found = engine
                    .find_by_time_range(start, end, limit)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Query(meeting_response(found, format))])
            }
        }
    }
}

const MEETING_COLUMNS: [(&str, Type); 7] = [
    ("_id", Type::VARCHAR),
    ("id", Type::INT8),
    ("title", Type::VARCHAR),
    ("participants", Type::VARCHAR),
    ("start_time", Type::INT8),
    ("end_time", Type::INT8),
    ("creation_timestamp", Type::INT8),
];

fn meeting_schema(format: &Format) -> Vec<FieldInfo> {
    MEETING_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new(name.to_string(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn doc_id_schema(format: &Format) -> Vec<FieldInfo> {
    vec![FieldInfo::new(
        "_id".into(),
        None,
        None,
        Type::VARCHAR,
        format.format_for(0),
    )]
}

fn meeting_response(found: Vec<StoredMeeting>, format: &Format) -> QueryResponse {
    let schema = Arc::new(meeting_schema(format));
    let rows: Vec<PgWireResult<_>> = found
        .into_iter()
        .map(|stored| {
            let m = &stored.meeting;
            let participants = serde_json::to_string(&m.participants)
                .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&stored.doc_id.to_string())?;
            encoder.encode_field(&m.id)?;
            encoder.encode_field(&m.title)?;
            encoder.encode_field(&participants)?;
            encoder.encode_field(&m.start_time)?;
            encoder.encode_field(&m.end_time)?;
            encoder.encode_field(&m.creation_timestamp)?;
            Ok(encoder.take_row())
        })
        .collect();
    QueryResponse::new(schema, stream::iter(rows))
}

fn doc_id_response(doc_ids: &[Ulid], format: &Format) -> QueryResponse {
    let schema = Arc::new(doc_id_schema(format));
    let rows: Vec<PgWireResult<_>> = doc_ids
        .iter()
        .map(|doc_id| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&doc_id.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    QueryResponse::new(schema, stream::iter(rows))
}

/// Result columns a statement will produce, for Describe.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("SELECT") {
        meeting_schema(format)
    } else if upper.starts_with("INSERT") && upper.contains("RETURNING") {
        doc_id_schema(format)
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for ConveneHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run_statement(&engine, query, &Format::UnifiedText).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ConveneQueryParser;

#[async_trait]
impl QueryParser for ConveneQueryParser {
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
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ConveneHandler {
    type Statement = String;
    type QueryParser = ConveneQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let responses = self
            .run_statement(&engine, &sql, &portal.result_column_format)
            .await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| PgWireError::ApiError("statement produced no response".into()))
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
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
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

pub struct ConveneFactory {
    handler: Arc<ConveneHandler>,
    noop: Arc<NoopHandler>,
}

impl ConveneFactory {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            handler: Arc::new(ConveneHandler::new(tenant_manager)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ConveneFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    // No authentication: every startup is accepted.
    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ConveneFactory::new(tenant_manager));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) | EngineError::LimitExceeded(_) | EngineError::InvalidLimit(_) => {
            "22023"
        }
        EngineError::Conflict(_) => "23P01",
        EngineError::Store(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
