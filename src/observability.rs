use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const STATEMENTS_TOTAL: &str = "shiftd_statements_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const STATEMENT_DURATION_SECONDS: &str = "shiftd_statement_duration_seconds";

/// Counter: shift writes refused because the employee was already booked.
pub const SHIFT_CONFLICTS_TOTAL: &str = "shiftd_shift_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "shiftd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "shiftd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "shiftd_connections_rejected_total";

/// Gauge: number of loaded businesses.
pub const TENANTS_ACTIVE: &str = "shiftd_tenants_active";

/// Counter: rejected session tokens. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "shiftd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shiftd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shiftd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SetSession { .. } => "set_session",
        Command::ResetSession => "reset_session",
        Command::SelectSessionUser => "select_session_user",
        Command::RegisterBusiness { .. } => "register_business",
        Command::SelectBusiness => "select_business",
        Command::UpdateBusiness { .. } => "update_business",
        Command::SelectBusinessStats => "select_business_stats",
        Command::SelectEmployees { .. } => "select_employees",
        Command::InsertEmployee(_) => "insert_employee",
        Command::UpdateEmployee { .. } => "update_employee",
        Command::DeleteEmployee { .. } => "delete_employee",
        Command::SelectShifts(_) => "select_shifts",
        Command::CountShifts(_) => "count_shifts",
        Command::SelectShiftConflicts { .. } => "select_shift_conflicts",
        Command::InsertShift(_) => "insert_shift",
        Command::UpdateShift { .. } => "update_shift",
        Command::DeleteShift { .. } => "delete_shift",
        Command::SelectTemplates => "select_templates",
        Command::InsertTemplate(_) => "insert_template",
        Command::ApplyTemplate(_) => "apply_template",
        Command::SelectTimeOff { .. } => "select_time_off",
        Command::InsertTimeOff(_) => "insert_time_off",
        Command::DecideTimeOff { .. } => "decide_time_off",
        Command::SelectNotifications => "select_notifications",
        Command::MarkNotificationRead { .. } => "mark_notification_read",
    }
}
