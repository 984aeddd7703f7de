pub const MAX_TENANTS: usize = 10_000;
pub const MAX_EMPLOYEES_PER_BUSINESS: usize = 10_000;
pub const MAX_SHIFTS_PER_EMPLOYEE: usize = 100_000;
pub const MAX_TEMPLATES_PER_BUSINESS: usize = 1_000;
pub const MAX_TIME_OFF_REQUESTS: usize = 100_000;
pub const MAX_NOTIFICATIONS: usize = 100_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_ROLE_LEN: usize = 50;
pub const MAX_TEXT_LEN: usize = 10_000;

pub const DEFAULT_PER_PAGE: usize = 50;
pub const MAX_PER_PAGE: usize = 500;

/// Longest date range a template may be applied over in one statement.
pub const MAX_TEMPLATE_RANGE_DAYS: i64 = 366;
