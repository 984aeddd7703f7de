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
    SetSession { token: String },
    ResetSession,
    /// Identity behind the current session.
    SelectSessionUser,
    RegisterBusiness { name: String, email: String },
    SelectBusiness,
    UpdateBusiness { patch: BusinessPatch },
    SelectBusinessStats,
    SelectEmployees { id: Option<Ulid> },
    InsertEmployee(NewEmployee),
    UpdateEmployee { id: Ulid, patch: EmployeePatch },
    DeleteEmployee { id: Ulid },
    SelectShifts(ShiftFilter),
    /// Match count of a shift listing; answers even when the page is empty.
    CountShifts(ShiftFilter),
    SelectShiftConflicts {
        employee_id: Ulid,
        start_time: String,
        end_time: String,
        exclude_id: Option<Ulid>,
    },
    InsertShift(NewShift),
    UpdateShift { id: Ulid, patch: ShiftPatch },
    DeleteShift { id: Ulid },
    SelectTemplates,
    InsertTemplate(NewTemplate),
    ApplyTemplate(TemplateApplication),
    SelectTimeOff { status: Option<String> },
    InsertTimeOff(NewTimeOff),
    DecideTimeOff { id: Ulid, status: String },
    SelectNotifications,
    MarkNotificationRead { id: Ulid },
}

/// Row layout a statement answers with. Known before execution so the
/// extended protocol can describe a portal without running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    SessionUser,
    Business,
    RegisteredBusiness,
    BusinessStats,
    Employees,
    ShiftPage,
    ShiftCount,
    Shifts,
    ShiftCheck,
    Templates,
    TimeOff,
    Notifications,
    /// Command tag only.
    Tag,
}

impl Command {
    pub fn shape(&self) -> ResultShape {
        match self {
            Command::SetSession { .. }
            | Command::ResetSession
            | Command::DeleteEmployee { .. }
            | Command::DeleteShift { .. }
            | Command::MarkNotificationRead { .. } => ResultShape::Tag,
            Command::SelectSessionUser => ResultShape::SessionUser,
            Command::RegisterBusiness { .. } => ResultShape::RegisteredBusiness,
            Command::SelectBusiness | Command::UpdateBusiness { .. } => ResultShape::Business,
            Command::SelectBusinessStats => ResultShape::BusinessStats,
            Command::SelectEmployees { .. }
            | Command::InsertEmployee(_)
            | Command::UpdateEmployee { .. } => ResultShape::Employees,
            Command::SelectShifts(_) => ResultShape::ShiftPage,
            Command::CountShifts(_) => ResultShape::ShiftCount,
            Command::SelectShiftConflicts { .. } => ResultShape::ShiftCheck,
            Command::InsertShift(_) | Command::UpdateShift { .. } | Command::ApplyTemplate(_) => {
                ResultShape::Shifts
            }
            Command::SelectTemplates | Command::InsertTemplate(_) => ResultShape::Templates,
            Command::SelectTimeOff { .. }
            | Command::InsertTimeOff(_)
            | Command::DecideTimeOff { .. } => ResultShape::TimeOff,
            Command::SelectNotifications => ResultShape::Notifications,
        }
    }
}

// Positional column order of each insertable table.
const BUSINESS_COLUMNS: &[&str] = &["name", "email"];
const EMPLOYEE_COLUMNS: &[&str] = &["name", "email", "role", "phone"];
const SHIFT_COLUMNS: &[&str] = &["employee_id", "start_time", "end_time", "role", "notes"];
const TEMPLATE_COLUMNS: &[&str] = &["name", "start_time", "end_time", "days_of_week", "role"];
const APPLICATION_COLUMNS: &[&str] = &["template_id", "employee_id", "from_date", "to_date"];
const TIME_OFF_COLUMNS: &[&str] = &["employee_id", "start_date", "end_date", "reason"];

const SHIFT_FILTERS: &[&str] = &["start_date", "end_date", "employee_id", "page", "per_page"];
const CONFLICT_FILTERS: &[&str] = &["employee_id", "start_time", "end_time", "exclude_id"];

const SESSION_AUTHORIZATION: &str = "SET SESSION AUTHORIZATION";
const RESET_AUTHORIZATION: &str = "RESET SESSION AUTHORIZATION";

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if let Some(cmd) = parse_session(sql)? {
        return Ok(cmd);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result layout of `sql` without evaluating any of its values, so
/// statements with `$n` placeholders can be described.
pub fn describe(sql: &str) -> Result<ResultShape, SqlError> {
    if starts_with_ignore_case(sql.trim(), SESSION_AUTHORIZATION)
        || starts_with_ignore_case(sql.trim(), RESET_AUTHORIZATION)
    {
        return Ok(ResultShape::Tag);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    let shape = match stmt {
        Statement::Insert(insert) => match insert_table_name(insert)?.as_str() {
            "businesses" => ResultShape::RegisteredBusiness,
            "employees" => ResultShape::Employees,
            "shifts" | "template_shifts" => ResultShape::Shifts,
            "shift_templates" => ResultShape::Templates,
            "time_off_requests" => ResultShape::TimeOff,
            other => return Err(SqlError::UnknownTable(other.into())),
        },
        Statement::Query(query) => match select_table_name(query)?.as_str() {
            "me" => ResultShape::SessionUser,
            "business" => ResultShape::Business,
            "business_stats" => ResultShape::BusinessStats,
            "employees" => ResultShape::Employees,
            "shifts" => ResultShape::ShiftPage,
            "shift_count" => ResultShape::ShiftCount,
            "shift_conflicts" => ResultShape::ShiftCheck,
            "shift_templates" => ResultShape::Templates,
            "time_off_requests" => ResultShape::TimeOff,
            "notifications" => ResultShape::Notifications,
            other => return Err(SqlError::UnknownTable(other.into())),
        },
        Statement::Update { table, .. } => match table_factor_name(&table.relation)?.as_str() {
            "business" => ResultShape::Business,
            "employees" => ResultShape::Employees,
            "shifts" => ResultShape::Shifts,
            "time_off_requests" => ResultShape::TimeOff,
            "notifications" => ResultShape::Tag,
            other => return Err(SqlError::UnknownTable(other.into())),
        },
        Statement::Delete(_) => ResultShape::Tag,
        other => return Err(SqlError::Unsupported(format!("{other}"))),
    };
    Ok(shape)
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// `SET SESSION AUTHORIZATION '<token>'` is handled before sqlparser, which
/// only accepts an identifier there and would mangle a JWT.
fn parse_session(sql: &str) -> Result<Option<Command>, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if starts_with_ignore_case(trimmed, RESET_AUTHORIZATION) {
        if trimmed.len() != RESET_AUTHORIZATION.len() {
            return Err(SqlError::Parse("unexpected input after RESET SESSION AUTHORIZATION".into()));
        }
        return Ok(Some(Command::ResetSession));
    }
    if !starts_with_ignore_case(trimmed, SESSION_AUTHORIZATION) {
        return Ok(None);
    }

    let rest = trimmed[SESSION_AUTHORIZATION.len()..].trim();
    if rest.eq_ignore_ascii_case("DEFAULT") {
        return Ok(Some(Command::ResetSession));
    }
    let token = if let Some(quoted) = rest.strip_prefix('\'') {
        quoted
            .strip_suffix('\'')
            .ok_or_else(|| SqlError::Parse("unterminated quoted token".into()))?
            .replace("''", "'")
    } else {
        rest.to_string()
    };
    if token.is_empty() {
        return Err(SqlError::Parse("SET SESSION AUTHORIZATION needs a token".into()));
    }
    Ok(Some(Command::SetSession { token }))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let canonical = match table.as_str() {
        "businesses" => BUSINESS_COLUMNS,
        "employees" => EMPLOYEE_COLUMNS,
        "shifts" => SHIFT_COLUMNS,
        "shift_templates" => TEMPLATE_COLUMNS,
        "template_shifts" => APPLICATION_COLUMNS,
        "time_off_requests" => TIME_OFF_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = extract_insert_values(insert)?;
    let fields = Fields::from_insert(&table, insert, row, canonical)?;

    match table.as_str() {
        "businesses" => Ok(Command::RegisterBusiness {
            name: fields.required("name")?,
            email: fields.required("email")?,
        }),
        "employees" => Ok(Command::InsertEmployee(NewEmployee {
            name: fields.required("name")?,
            email: fields.required("email")?,
            role: fields.required("role")?,
            phone: fields.text("phone")?,
        })),
        "shifts" => Ok(Command::InsertShift(NewShift {
            employee_id: fields.id("employee_id")?,
            start_time: fields.required("start_time")?,
            end_time: fields.required("end_time")?,
            role: fields.text("role")?,
            notes: fields.text("notes")?,
        })),
        "shift_templates" => Ok(Command::InsertTemplate(NewTemplate {
            name: fields.required("name")?,
            start_time: fields.required("start_time")?,
            end_time: fields.required("end_time")?,
            days_of_week: fields.text("days_of_week")?,
            role: fields.text("role")?,
        })),
        "template_shifts" => Ok(Command::ApplyTemplate(TemplateApplication {
            template_id: fields.id("template_id")?,
            employee_id: fields.id("employee_id")?,
            from_date: fields.required("from_date")?,
            to_date: fields.required("to_date")?,
        })),
        _ => Ok(Command::InsertTimeOff(NewTimeOff {
            employee_id: fields.id("employee_id")?,
            start_date: fields.required("start_date")?,
            end_date: fields.required("end_date")?,
            reason: fields.text("reason")?,
        })),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let allowed: &[&str] = match table.as_str() {
        "business" => BUSINESS_COLUMNS,
        "employees" => &["name", "email", "phone", "role"],
        "shifts" => SHIFT_COLUMNS,
        "time_off_requests" => &["status"],
        "notifications" => &["read"],
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let mut pairs = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        pairs.push((column, assignment.value.clone()));
    }
    let set = Fields::new(&table, pairs, allowed)?;

    if table == "business" {
        if selection.is_some() {
            return Err(SqlError::Unsupported("UPDATE business takes no WHERE clause".into()));
        }
        return Ok(Command::UpdateBusiness {
            patch: BusinessPatch {
                name: set.patch("name")?,
                email: set.patch("email")?,
            },
        });
    }

    let id = extract_where_id(selection)?;
    match table.as_str() {
        "employees" => Ok(Command::UpdateEmployee {
            id,
            patch: EmployeePatch {
                name: set.patch("name")?,
                email: set.patch("email")?,
                phone: set.patch("phone")?,
                role: set.patch("role")?,
            },
        }),
        "shifts" => Ok(Command::UpdateShift {
            id,
            patch: ShiftPatch {
                employee_id: set.patch_id("employee_id")?,
                start_time: set.patch("start_time")?,
                end_time: set.patch("end_time")?,
                role: set.patch("role")?,
                notes: set.patch("notes")?,
            },
        }),
        "time_off_requests" => Ok(Command::DecideTimeOff {
            id,
            status: set.required("status")?,
        }),
        _ => {
            let read = set
                .get("read")
                .ok_or(SqlError::MissingColumn("read"))
                .and_then(parse_bool)?;
            if !read {
                return Err(SqlError::Unsupported(
                    "notifications can only be marked read".into(),
                ));
            }
            Ok(Command::MarkNotificationRead { id })
        }
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "employees" => Ok(Command::DeleteEmployee { id }),
        "shifts" => Ok(Command::DeleteShift { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let table = select_table_name(query)?;
    let allowed: &[&str] = match table.as_str() {
        "me" | "business" | "business_stats" | "shift_templates" | "notifications" => &[],
        "employees" => &["id"],
        "shifts" | "shift_count" => SHIFT_FILTERS,
        "shift_conflicts" => CONFLICT_FILTERS,
        "time_off_requests" => &["status"],
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let mut pairs = Vec::new();
    if let SetExpr::Select(select) = query.body.as_ref()
        && let Some(selection) = &select.selection
    {
        collect_filters(selection, &mut pairs)?;
    }
    let filters = Fields::new(&table, pairs, allowed)?;

    let shift_filter = |filters: &Fields| -> Result<ShiftFilter, SqlError> {
        Ok(ShiftFilter {
            start_date: filters.text("start_date")?,
            end_date: filters.text("end_date")?,
            employee_id: filters.text("employee_id")?,
            page: filters.text("page")?,
            per_page: filters.text("per_page")?,
        })
    };

    match table.as_str() {
        "me" => Ok(Command::SelectSessionUser),
        "business" => Ok(Command::SelectBusiness),
        "business_stats" => Ok(Command::SelectBusinessStats),
        "shift_templates" => Ok(Command::SelectTemplates),
        "notifications" => Ok(Command::SelectNotifications),
        "employees" => Ok(Command::SelectEmployees {
            id: filters.optional_id("id")?,
        }),
        "shifts" => Ok(Command::SelectShifts(shift_filter(&filters)?)),
        "shift_count" => Ok(Command::CountShifts(shift_filter(&filters)?)),
        "shift_conflicts" => Ok(Command::SelectShiftConflicts {
            employee_id: filters
                .optional_id("employee_id")?
                .ok_or(SqlError::MissingFilter("employee_id"))?,
            start_time: filters
                .text("start_time")?
                .ok_or(SqlError::MissingFilter("start_time"))?,
            end_time: filters
                .text("end_time")?
                .ok_or(SqlError::MissingFilter("end_time"))?,
            exclude_id: filters.optional_id("exclude_id")?,
        }),
        _ => Ok(Command::SelectTimeOff {
            status: filters.text("status")?,
        }),
    }
}

/// `col = value` pairs joined by AND. Anything else is rejected rather
/// than silently ignored.
fn collect_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!(
            "WHERE {other}: only column = value joined by AND"
        ))),
    }
}

// ── Named values ──────────────────────────────────────────────

/// Column/value pairs of one statement, checked against the columns its
/// table accepts.
struct Fields {
    pairs: Vec<(String, Expr)>,
}

impl Fields {
    fn new(table: &str, pairs: Vec<(String, Expr)>, allowed: &[&str]) -> Result<Self, SqlError> {
        for (i, (column, _)) in pairs.iter().enumerate() {
            if !allowed.contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
            if pairs[..i].iter().any(|(c, _)| c == column) {
                return Err(SqlError::Parse(format!("column {column} given twice")));
            }
        }
        Ok(Self { pairs })
    }

    /// Named columns in any order, or positional in `canonical` order.
    fn from_insert(
        table: &str,
        insert: &ast::Insert,
        row: Vec<Expr>,
        canonical: &[&'static str],
    ) -> Result<Self, SqlError> {
        let columns: Vec<String> = if insert.columns.is_empty() {
            if row.len() > canonical.len() {
                return Err(SqlError::WrongArity(
                    table.to_string(),
                    canonical.len(),
                    row.len(),
                ));
            }
            canonical.iter().map(|c| c.to_string()).collect()
        } else {
            if insert.columns.len() != row.len() {
                return Err(SqlError::WrongArity(
                    table.to_string(),
                    insert.columns.len(),
                    row.len(),
                ));
            }
            insert
                .columns
                .iter()
                .map(|ident| ident.value.to_lowercase())
                .collect()
        };
        Self::new(table, columns.into_iter().zip(row).collect(), canonical)
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.pairs
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, expr)| expr)
    }

    /// Absent and NULL both read as `None`.
    fn text(&self, column: &str) -> Result<Option<String>, SqlError> {
        match self.get(column) {
            None => Ok(None),
            Some(expr) => parse_text_or_null(expr),
        }
    }

    fn required(&self, column: &'static str) -> Result<String, SqlError> {
        self.text(column)?.ok_or(SqlError::MissingColumn(column))
    }

    fn optional_id(&self, column: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.text(column)?
            .map(|raw| parse_id(column, &raw))
            .transpose()
    }

    fn id(&self, column: &'static str) -> Result<Ulid, SqlError> {
        self.optional_id(column)?
            .ok_or(SqlError::MissingColumn(column))
    }

    fn patch(&self, column: &str) -> Result<Patch<String>, SqlError> {
        Ok(match self.get(column) {
            None => Patch::Unset,
            Some(expr) => match parse_text_or_null(expr)? {
                None => Patch::Null,
                Some(v) => Patch::Value(v),
            },
        })
    }

    fn patch_id(&self, column: &'static str) -> Result<Patch<Ulid>, SqlError> {
        Ok(match self.patch(column)? {
            Patch::Unset => Patch::Unset,
            Patch::Null => Patch::Null,
            Patch::Value(raw) => Patch::Value(parse_id(column, &raw)?),
        })
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

fn select_table_name(query: &ast::Query) -> Result<String, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    table_factor_name(&from.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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
        } if expr_column_name(left).as_deref() == Some("id") => {
            let raw = parse_text_or_null(right)?.ok_or(SqlError::MissingFilter("id"))?;
            parse_id("id", &raw)
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

fn parse_id(column: &'static str, raw: &str) -> Result<Ulid, SqlError> {
    Ulid::from_string(raw.trim()).map_err(|_| SqlError::InvalidId(column, raw.to_string()))
}

/// Literal as text; numbers and booleans keep their SQL spelling.
fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s)
            | Value::DoubleQuotedString(s)
            | Value::EscapedStringLiteral(s) => Ok(Some(s.clone())),
            Value::Number(n, _) => Ok(Some(n.to_string())),
            Value::Boolean(b) => Ok(Some(b.to_string())),
            _ => Err(SqlError::Parse(format!("expected text, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        Ok(parse_text_or_null(inner)?.map(|v| format!("-{v}")))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn { table: String, column: String },
    WrongArity(String, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    InvalidId(&'static str, String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn { table, column } => {
                write!(f, "unknown column {column} for {table}")
            }
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing value: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidId(col, raw) => write!(f, "invalid id for {col}: {raw:?}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    #[test]
    fn set_session_keeps_token_verbatim() {
        let cmd = parse_sql("SET SESSION AUTHORIZATION 'eyJhbGc.eyJ1c2Vy.c2ln';").unwrap();
        assert_eq!(
            cmd,
            Command::SetSession {
                token: "eyJhbGc.eyJ1c2Vy.c2ln".into()
            }
        );
        let cmd = parse_sql("set session authorization abc.def.ghi").unwrap();
        assert_eq!(cmd, Command::SetSession { token: "abc.def.ghi".into() });
    }

    #[test]
    fn reset_session_forms() {
        assert_eq!(parse_sql("RESET SESSION AUTHORIZATION").unwrap(), Command::ResetSession);
        assert_eq!(
            parse_sql("SET SESSION AUTHORIZATION DEFAULT").unwrap(),
            Command::ResetSession
        );
        assert!(parse_sql("SET SESSION AUTHORIZATION ''").is_err());
        assert!(parse_sql("SET SESSION AUTHORIZATION 'abc").is_err());
    }

    #[test]
    fn parse_register_business() {
        let cmd =
            parse_sql("INSERT INTO businesses (name, email) VALUES ('Cafe', 'a@cafe.test')")
                .unwrap();
        assert_eq!(
            cmd,
            Command::RegisterBusiness {
                name: "Cafe".into(),
                email: "a@cafe.test".into()
            }
        );
    }

    #[test]
    fn parse_insert_employee_named_any_order() {
        let sql = "INSERT INTO employees (role, name, email) VALUES ('barista', 'Ana', 'ana@x.test')";
        let Command::InsertEmployee(e) = parse_sql(sql).unwrap() else {
            panic!("expected InsertEmployee");
        };
        assert_eq!(e.name, "Ana");
        assert_eq!(e.role, "barista");
        assert_eq!(e.phone, None);
    }

    #[test]
    fn parse_insert_shift_positional() {
        let sql = format!(
            "INSERT INTO shifts VALUES ('{ID}', '2024-03-04 09:00:00', '2024-03-04 17:00:00')"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertShift(NewShift {
                employee_id: id(),
                start_time: "2024-03-04 09:00:00".into(),
                end_time: "2024-03-04 17:00:00".into(),
                role: None,
                notes: None,
            })
        );
    }

    #[test]
    fn parse_insert_shift_with_null_role() {
        let sql = format!(
            "INSERT INTO shifts (employee_id, start_time, end_time, role, notes) \
             VALUES ('{ID}', '2024-03-04 09:00:00', '2024-03-04 17:00:00', NULL, 'bring keys')"
        );
        let Command::InsertShift(shift) = parse_sql(&sql).unwrap() else {
            panic!("expected InsertShift");
        };
        assert_eq!(shift.role, None);
        assert_eq!(shift.notes.as_deref(), Some("bring keys"));
    }

    #[test]
    fn insert_missing_required_column() {
        let sql = format!("INSERT INTO shifts (employee_id, start_time) VALUES ('{ID}', 'x')");
        assert_eq!(parse_sql(&sql).unwrap_err(), SqlError::MissingColumn("end_time"));
    }

    #[test]
    fn insert_unknown_column() {
        let sql = "INSERT INTO employees (name, email, role, salary) VALUES ('a', 'b', 'c', 1)";
        assert!(matches!(
            parse_sql(sql).unwrap_err(),
            SqlError::UnknownColumn { column, .. } if column == "salary"
        ));
    }

    #[test]
    fn insert_too_many_positional_values() {
        let sql = "INSERT INTO businesses VALUES ('a', 'b', 'c')";
        assert_eq!(
            parse_sql(sql).unwrap_err(),
            SqlError::WrongArity("businesses".into(), 2, 3)
        );
    }

    #[test]
    fn insert_bad_id_is_invalid_id() {
        let sql = "INSERT INTO shifts VALUES ('nope', '2024-03-04 09:00:00', '2024-03-04 17:00:00')";
        assert_eq!(
            parse_sql(sql).unwrap_err(),
            SqlError::InvalidId("employee_id", "nope".into())
        );
    }

    #[test]
    fn parse_update_shift_patch() {
        let sql = format!(
            "UPDATE shifts SET end_time = '2024-03-04 18:00:00', notes = NULL WHERE id = '{ID}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpdateShift {
                id: id(),
                patch: ShiftPatch {
                    end_time: Patch::Value("2024-03-04 18:00:00".into()),
                    notes: Patch::Null,
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn parse_update_shift_reassign() {
        let sql = format!("UPDATE shifts SET employee_id = '{ID}' WHERE id = '{ID}'");
        let Command::UpdateShift { patch, .. } = parse_sql(&sql).unwrap() else {
            panic!("expected UpdateShift");
        };
        assert_eq!(patch.employee_id, Patch::Value(id()));
        assert_eq!(patch.start_time, Patch::Unset);
    }

    #[test]
    fn update_needs_id_filter() {
        let sql = "UPDATE shifts SET notes = 'x'";
        assert_eq!(parse_sql(sql).unwrap_err(), SqlError::MissingFilter("id"));
    }

    #[test]
    fn parse_update_business_without_where() {
        let cmd = parse_sql("UPDATE business SET email = 'new@x.test'").unwrap();
        assert_eq!(
            cmd,
            Command::UpdateBusiness {
                patch: BusinessPatch {
                    name: Patch::Unset,
                    email: Patch::Value("new@x.test".into()),
                }
            }
        );
    }

    #[test]
    fn parse_decide_time_off() {
        let sql = format!("UPDATE time_off_requests SET status = 'approved' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DecideTimeOff {
                id: id(),
                status: "approved".into()
            }
        );
    }

    #[test]
    fn parse_mark_notification_read() {
        let sql = format!("UPDATE notifications SET read = true WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::MarkNotificationRead { id: id() }
        );
        let sql = format!("UPDATE notifications SET read = false WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_delete_shift() {
        let sql = format!("DELETE FROM shifts WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteShift { id: id() });
    }

    #[test]
    fn parse_select_shifts_filters() {
        let sql = "SELECT * FROM shifts WHERE start_date = '2024-03-01' AND page = 2 AND per_page = 10";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectShifts(ShiftFilter {
                start_date: Some("2024-03-01".into()),
                page: Some("2".into()),
                per_page: Some("10".into()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn shift_count_takes_listing_filters() {
        let sql = "SELECT * FROM shift_count WHERE employee_id = 'x' AND page = 3";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::CountShifts(ShiftFilter {
                employee_id: Some("x".into()),
                page: Some("3".into()),
                ..Default::default()
            })
        );
        assert_eq!(describe(sql).unwrap(), ResultShape::ShiftCount);
    }

    #[test]
    fn select_me_reads_session_user() {
        assert_eq!(parse_sql("SELECT * FROM me").unwrap(), Command::SelectSessionUser);
        assert_eq!(describe("SELECT * FROM me").unwrap(), ResultShape::SessionUser);
        assert!(matches!(
            parse_sql("SELECT * FROM me WHERE role = 'admin'"),
            Err(SqlError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn select_shifts_without_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM shifts").unwrap(),
            Command::SelectShifts(ShiftFilter::default())
        );
    }

    #[test]
    fn select_rejects_range_filters() {
        let sql = "SELECT * FROM shifts WHERE start_date >= '2024-03-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn select_rejects_unknown_filter() {
        let sql = "SELECT * FROM shifts WHERE color = 'red'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn { .. })));
    }

    #[test]
    fn parse_shift_conflict_check() {
        let sql = format!(
            "SELECT * FROM shift_conflicts WHERE employee_id = '{ID}' \
             AND start_time = '2024-03-04 09:00:00' AND end_time = '2024-03-04 17:00:00'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectShiftConflicts {
                employee_id: id(),
                start_time: "2024-03-04 09:00:00".into(),
                end_time: "2024-03-04 17:00:00".into(),
                exclude_id: None,
            }
        );

        let missing = format!("SELECT * FROM shift_conflicts WHERE employee_id = '{ID}'");
        assert_eq!(
            parse_sql(&missing).unwrap_err(),
            SqlError::MissingFilter("start_time")
        );
    }

    #[test]
    fn parse_select_employee_by_id() {
        let sql = format!("SELECT * FROM employees WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectEmployees { id: Some(id()) }
        );
    }

    #[test]
    fn parse_apply_template() {
        let sql = format!(
            "INSERT INTO template_shifts VALUES ('{ID}', '{ID}', '2024-03-04', '2024-03-10')"
        );
        let Command::ApplyTemplate(app) = parse_sql(&sql).unwrap() else {
            panic!("expected ApplyTemplate");
        };
        assert_eq!(app.from_date, "2024-03-04");
        assert_eq!(app.to_date, "2024-03-10");
    }

    #[test]
    fn describe_matches_command_shape() {
        let statements = [
            format!("INSERT INTO shifts VALUES ('{ID}', 'a', 'b')"),
            "SELECT * FROM shifts".to_string(),
            "SELECT * FROM business_stats".to_string(),
            format!("UPDATE notifications SET read = true WHERE id = '{ID}'"),
            format!("DELETE FROM employees WHERE id = '{ID}'"),
            "INSERT INTO businesses VALUES ('a', 'b')".to_string(),
            "SET SESSION AUTHORIZATION 'x'".to_string(),
        ];
        for sql in statements {
            assert_eq!(describe(&sql).unwrap(), parse_sql(&sql).unwrap().shape(), "{sql}");
        }
    }

    #[test]
    fn describe_accepts_placeholders() {
        let sql = "INSERT INTO shifts (employee_id, start_time, end_time) VALUES ($1, $2, $3)";
        assert_eq!(describe(sql).unwrap(), ResultShape::Shifts);
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM payroll"),
            Err(SqlError::UnknownTable(t)) if t == "payroll"
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
