use sqlparser::ast::{
    self, Expr, LimitClause, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::model::*;

pub const MEETINGS_TABLE: &str = "meetings";

/// Column order used when an INSERT names no columns.
const DEFAULT_INSERT_COLUMNS: [Column; 5] = [
    Column::Id,
    Column::Title,
    Column::Participants,
    Column::StartTime,
    Column::EndTime,
];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertMeetings {
        meetings: Vec<Meeting>,
        /// `RETURNING ...` was given: answer with the new document ids.
        returning: bool,
    },
    SelectById {
        id: i64,
        limit: Option<i64>,
    },
    SelectByParticipant {
        email: String,
        limit: Option<i64>,
    },
    SelectByTimeRange {
        start: Ms,
        end: Ms,
        limit: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Id,
    Title,
    Participants,
    StartTime,
    EndTime,
}

impl Column {
    fn from_name(name: &str) -> Result<Self, SqlError> {
        match name {
            "id" => Ok(Column::Id),
            "title" => Ok(Column::Title),
            "participants" => Ok(Column::Participants),
            "start_time" => Ok(Column::StartTime),
            "end_time" => Ok(Column::EndTime),
            "creation_timestamp" | "_id" => Err(SqlError::Unsupported(format!(
                "{name} is assigned by the server"
            ))),
            other => Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != MEETINGS_TABLE {
        return Err(SqlError::UnknownTable(table));
    }

    let columns = if insert.columns.is_empty() {
        DEFAULT_INSERT_COLUMNS.to_vec()
    } else {
        insert
            .columns
            .iter()
            .map(|ident| Column::from_name(&ident.value.to_lowercase()))
            .collect::<Result<Vec<_>, _>>()?
    };
    for (i, col) in columns.iter().enumerate() {
        if columns[..i].contains(col) {
            return Err(SqlError::Unsupported(format!(
                "column {} specified more than once",
                insert.columns[i].value
            )));
        }
    }
    for required in [Column::Id, Column::StartTime, Column::EndTime] {
        if !columns.contains(&required) {
            return Err(SqlError::MissingColumn(match required {
                Column::Id => "id",
                Column::StartTime => "start_time",
                _ => "end_time",
            }));
        }
    }

    let rows = extract_all_insert_rows(insert)?;
    let mut meetings = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(SqlError::WrongArity("meetings row", columns.len(), row.len()));
        }
        let meeting = parse_meeting_row(&columns, row)
            .map_err(|e| if rows.len() > 1 { SqlError::Parse(format!("row {i}: {e}")) } else { e })?;
        meetings.push(meeting);
    }

    Ok(Command::InsertMeetings {
        meetings,
        returning: insert.returning.is_some(),
    })
}

fn parse_meeting_row(columns: &[Column], row: &[Expr]) -> Result<Meeting, SqlError> {
    let mut meeting = Meeting::new(0, String::new(), Vec::new(), 0, 0);
    for (column, expr) in columns.iter().zip(row) {
        match column {
            Column::Id => meeting.id = parse_i64_expr(expr)?,
            Column::Title => meeting.title = parse_string_or_null(expr)?.unwrap_or_default(),
            Column::Participants => meeting.participants = parse_participants(expr)?,
            Column::StartTime => meeting.start_time = parse_timestamp_expr(expr)?,
            Column::EndTime => meeting.end_time = parse_timestamp_expr(expr)?,
        }
    }
    Ok(meeting)
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    if table != MEETINGS_TABLE {
        return Err(SqlError::UnknownTable(table));
    }

    let mut filters = MeetingFilters::default();
    if let Some(selection) = &select.selection {
        extract_meeting_filters(selection, &mut filters)?;
    }
    let limit = extract_limit(query)?;

    match filters {
        MeetingFilters { id: Some(id), participant: None, start: None, end: None } => {
            Ok(Command::SelectById { id, limit })
        }
        MeetingFilters { id: None, participant: Some(email), start: None, end: None } => {
            Ok(Command::SelectByParticipant { email, limit })
        }
        MeetingFilters { id: None, participant: None, start: Some(start), end: Some(end) } => {
            Ok(Command::SelectByTimeRange { start, end, limit })
        }
        MeetingFilters { id: None, participant: None, start: Some(_), end: None } => {
            Err(SqlError::MissingFilter("end_time"))
        }
        MeetingFilters { id: None, participant: None, start: None, end: Some(_) } => {
            Err(SqlError::MissingFilter("start_time"))
        }
        MeetingFilters { id: None, participant: None, start: None, end: None } => {
            Err(SqlError::MissingFilter("id, participant or start_time/end_time"))
        }
        _ => Err(SqlError::Unsupported(
            "filter on exactly one of id, participant, or start_time/end_time".into(),
        )),
    }
}

#[derive(Debug, Default)]
struct MeetingFilters {
    id: Option<i64>,
    participant: Option<String>,
    start: Option<Ms>,
    end: Option<Ms>,
}

fn extract_meeting_filters(expr: &Expr, filters: &mut MeetingFilters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_meeting_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => {
            if *op == ast::BinaryOperator::And {
                extract_meeting_filters(left, filters)?;
                return extract_meeting_filters(right, filters);
            }
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            match (col.as_str(), op) {
                ("id", ast::BinaryOperator::Eq) => {
                    set_once(&mut filters.id, &col, parse_i64_expr(right)?)?
                }
                ("participant", ast::BinaryOperator::Eq) => {
                    set_once(&mut filters.participant, &col, parse_string_expr(right)?)?
                }
                ("start_time", ast::BinaryOperator::GtEq) => {
                    set_once(&mut filters.start, &col, parse_timestamp_expr(right)?)?
                }
                ("end_time", ast::BinaryOperator::LtEq) => {
                    set_once(&mut filters.end, &col, parse_timestamp_expr(right)?)?
                }
                ("id" | "participant" | "start_time" | "end_time", _) => {
                    return Err(SqlError::Unsupported(format!("filter {expr}")));
                }
                (other, _) => return Err(SqlError::UnknownColumn(other.to_string())),
            }
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn set_once<T>(slot: &mut Option<T>, col: &str, value: T) -> Result<(), SqlError> {
    if slot.is_some() {
        return Err(SqlError::Unsupported(format!("repeated filter on {col}")));
    }
    *slot = Some(value);
    Ok(())
}

/// `LIMIT n` → `Some(n)`; no LIMIT (or `LIMIT ALL`) → `None`.
fn extract_limit(query: &ast::Query) -> Result<Option<i64>, SqlError> {
    match &query.limit_clause {
        None => Ok(None),
        Some(LimitClause::LimitOffset { limit, offset, .. }) => {
            if offset.is_some() {
                return Err(SqlError::Unsupported("OFFSET".into()));
            }
            limit.as_ref().map(parse_i64_expr).transpose()
        }
        Some(LimitClause::OffsetCommaLimit { .. }) => {
            Err(SqlError::Unsupported("OFFSET".into()))
        }
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
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

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

/// Integer milliseconds, or an RFC 3339 string such as `'2024-06-03T10:00:00Z'`.
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        if let Ok(ms) = s.trim().parse::<i64>() {
            return Ok(ms);
        }
        return chrono::DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")));
    }
    parse_i64_expr(expr)
}

/// JSON array of `{name, email, rsvp}` objects. NULL means no participants.
fn parse_participants(expr: &Expr) -> Result<Vec<Participant>, SqlError> {
    match parse_string_or_null(expr)? {
        None => Ok(Vec::new()),
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| SqlError::Parse(format!("bad participants JSON: {e}"))),
    }
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
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
