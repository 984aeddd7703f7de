use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only instant type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Wire format of a shift bound.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Wire format of a calendar date filter.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Wire format of a template time of day.
pub const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S";

/// Label used when a shift points at an employee that no longer exists.
pub const UNKNOWN_EMPLOYEE: &str = "Unknown";

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Time parsing ─────────────────────────────────────────────────

pub fn parse_timestamp(s: &str) -> Option<Ms> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

pub fn format_timestamp(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn format_date(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Midnight UTC of `date`.
pub fn date_start_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Seconds since midnight; templates carry no date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay(u32);

impl TimeOfDay {
    pub fn parse(s: &str) -> Option<Self> {
        NaiveTime::parse_from_str(s.trim(), TIME_OF_DAY_FORMAT)
            .ok()
            .map(|t| Self(t.num_seconds_from_midnight()))
    }

    #[cfg(test)]
    pub fn from_hms(h: u32, m: u32, s: u32) -> Self {
        Self(h * 3600 + m * 60 + s)
    }

    pub fn offset_ms(self) -> Ms {
        self.0 as Ms * 1000
    }

    pub fn format(self) -> String {
        NaiveTime::from_num_seconds_from_midnight_opt(self.0, 0)
            .map(|t| t.format(TIME_OF_DAY_FORMAT).to_string())
            .unwrap_or_default()
    }
}

/// Weekday set, bit `i` = day `i` with 0 = Sunday. Text form is `"0,1,3"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weekdays(u8);

impl Weekdays {
    pub fn parse(s: &str) -> Option<Self> {
        let mut bits = 0u8;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let day: u8 = part.parse().ok()?;
            if day > 6 {
                return None;
            }
            bits |= 1 << day;
        }
        Some(Self(bits))
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        self.0 & (1 << date.weekday().num_days_from_sunday()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn format(self) -> String {
        (0..7u8)
            .filter(|d| self.0 & (1 << d) != 0)
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ── Roles ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Manager,
    Employee,
}

impl Role {
    /// Unknown labels collapse to the least privileged role.
    pub fn from_claim(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            _ => Role::Employee,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Employee => "employee",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    /// Job label, copied onto new shifts when they carry none.
    pub role: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub span: Span,
    pub role: Option<String>,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// All shifts of one employee. The unit of write locking for conflict checks.
#[derive(Debug, Clone)]
pub struct EmployeeSchedule {
    pub employee_id: Ulid,
    /// Sorted by `span.start`.
    pub shifts: Vec<Shift>,
}

impl EmployeeSchedule {
    pub fn new(employee_id: Ulid) -> Self {
        Self {
            employee_id,
            shifts: Vec::new(),
        }
    }

    /// Insert shift maintaining sort order by span.start.
    pub fn insert_shift(&mut self, shift: Shift) {
        let pos = self
            .shifts
            .binary_search_by_key(&shift.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.shifts.insert(pos, shift);
    }

    pub fn remove_shift(&mut self, id: Ulid) -> Option<Shift> {
        let pos = self.shifts.iter().position(|s| s.id == id)?;
        Some(self.shifts.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.id == id)
    }

    /// Return only shifts whose span overlaps the query window.
    /// Uses binary search to skip shifts starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Shift> {
        let right_bound = self.shifts.partition_point(|s| s.span.start < query.end);
        self.shifts[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTemplate {
    pub id: Ulid,
    pub name: String,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub days_of_week: Weekdays,
    pub role: String,
    pub created_at: Ms,
}

impl ShiftTemplate {
    /// End before start wraps past midnight.
    pub fn is_overnight(&self) -> bool {
        self.end_time < self.start_time
    }

    /// The concrete interval this template occupies when started on `date`.
    pub fn span_on(&self, date: NaiveDate) -> Span {
        let day = date_start_ms(date);
        let start = day + self.start_time.offset_ms();
        let end_day = if self.is_overnight() { day + DAY_MS } else { day };
        Span::new(start, end_day + self.end_time.offset_ms())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOffStatus {
    Pending,
    Approved,
    Rejected,
}

impl TimeOffStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(TimeOffStatus::Pending),
            "approved" => Some(TimeOffStatus::Approved),
            "rejected" => Some(TimeOffStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeOffStatus::Pending => "pending",
            TimeOffStatus::Approved => "approved",
            TimeOffStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for TimeOffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffRequest {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub requested_by: Ulid,
    /// Midnight of the first day off.
    pub start_date: Ms,
    /// Midnight of the last day off (inclusive).
    pub end_date: Ms,
    pub reason: String,
    pub status: TimeOffStatus,
    pub decided_by: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub user_id: Ulid,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub read: bool,
    pub created_at: Ms,
}

// ── Partial updates ──────────────────────────────────────────────

/// A field of an update: not mentioned, explicitly NULL, or a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Unset,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    /// Apply to an optional field: Unset keeps, Null clears.
    pub fn apply_to(self, current: Option<T>) -> Option<T> {
        match self {
            Patch::Unset => current,
            Patch::Null => None,
            Patch::Value(v) => Some(v),
        }
    }

    /// Resolve a field that cannot be cleared. `Null` yields `None`.
    pub fn required(self, current: T) -> Option<T> {
        match self {
            Patch::Unset => Some(current),
            Patch::Null => None,
            Patch::Value(v) => Some(v),
        }
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessRegistered {
        id: Ulid,
        name: String,
        email: String,
        at: Ms,
    },
    BusinessUpdated {
        name: String,
        email: String,
    },
    EmployeeCreated {
        id: Ulid,
        name: String,
        email: String,
        phone: String,
        role: String,
        at: Ms,
    },
    EmployeeUpdated {
        id: Ulid,
        name: String,
        email: String,
        phone: String,
        role: String,
    },
    EmployeeDeleted {
        id: Ulid,
    },
    ShiftCreated {
        id: Ulid,
        employee_id: Ulid,
        span: Span,
        role: Option<String>,
        notes: Option<String>,
        at: Ms,
    },
    /// Full replacement; `employee_id` may differ from the previous owner.
    ShiftUpdated {
        id: Ulid,
        employee_id: Ulid,
        span: Span,
        role: Option<String>,
        notes: Option<String>,
        at: Ms,
    },
    ShiftDeleted {
        id: Ulid,
        employee_id: Ulid,
    },
    TemplateCreated {
        template: ShiftTemplate,
    },
    TimeOffRequested {
        request: TimeOffRequest,
    },
    TimeOffDecided {
        id: Ulid,
        status: TimeOffStatus,
        decided_by: Ulid,
        at: Ms,
    },
    NotificationCreated {
        notification: Notification,
    },
    NotificationRead {
        id: Ulid,
    },
}

// ── Statement inputs ─────────────────────────────────────────────
//
// Timestamps, dates and times of day arrive as text and are validated by the
// engine so every caller gets the same error for the same mistake.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEmployee {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeePatch {
    pub name: Patch<String>,
    pub email: Patch<String>,
    pub phone: Patch<String>,
    pub role: Patch<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusinessPatch {
    pub name: Patch<String>,
    pub email: Patch<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShift {
    pub employee_id: Ulid,
    pub start_time: String,
    pub end_time: String,
    pub role: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftPatch {
    pub employee_id: Patch<Ulid>,
    pub start_time: Patch<String>,
    pub end_time: Patch<String>,
    pub role: Patch<String>,
    pub notes: Patch<String>,
}

/// Filters of a shift listing, all optional and all raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub employee_id: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTemplate {
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub days_of_week: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateApplication {
    pub template_id: Ulid,
    pub employee_id: Ulid,
    pub from_date: String,
    pub to_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTimeOff {
    pub employee_id: Ulid,
    pub start_date: String,
    pub end_date: String,
    pub reason: Option<String>,
}

// ── Query result types ───────────────────────────────────────────

/// A shift as returned to callers, with the owner's name joined in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftView {
    pub id: Ulid,
    pub business_id: Ulid,
    pub employee_id: Ulid,
    pub employee_name: String,
    pub start_time: Ms,
    pub end_time: Ms,
    pub role: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftPage {
    pub shifts: Vec<ShiftView>,
    /// Matches before pagination.
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessStats {
    pub employee_count: usize,
    pub shift_count: usize,
    pub pending_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(start: Ms, end: Ms) -> Shift {
        Shift {
            id: Ulid::new(),
            employee_id: Ulid::nil(),
            span: Span::new(start, end),
            role: None,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn timestamp_parse_and_format() {
        let ms = parse_timestamp("2024-03-01 09:30:00").unwrap();
        assert_eq!(ms % 1000, 0);
        assert_eq!(format_timestamp(ms), "2024-03-01 09:30:00");
        assert!(parse_timestamp("2024-03-01T09:30:00").is_none());
        assert!(parse_timestamp("2024-13-01 09:30:00").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn date_start_is_midnight_utc() {
        let d = parse_date("1970-01-02").unwrap();
        assert_eq!(date_start_ms(d), DAY_MS);
        assert_eq!(format_date(DAY_MS), "1970-01-02");
        assert!(parse_date("01/02/1970").is_none());
    }

    #[test]
    fn time_of_day_roundtrip() {
        let t = TimeOfDay::parse("17:05:09").unwrap();
        assert_eq!(t, TimeOfDay::from_hms(17, 5, 9));
        assert_eq!(t.format(), "17:05:09");
        assert!(TimeOfDay::parse("25:00:00").is_none());
        assert!(TimeOfDay::parse("9am").is_none());
    }

    #[test]
    fn weekdays_parse_and_format() {
        let w = Weekdays::parse("3, 0,1").unwrap();
        assert_eq!(w.format(), "0,1,3");
        assert!(Weekdays::parse("").unwrap().is_empty());
        assert!(Weekdays::parse("7").is_none());
        assert!(Weekdays::parse("mon").is_none());

        // 2024-03-03 is a Sunday.
        let sunday = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
        assert!(w.contains(sunday));
        assert!(!w.contains(sunday.succ_opt().unwrap().succ_opt().unwrap())); // Tuesday
    }

    #[test]
    fn overnight_template_ends_next_day() {
        let t = ShiftTemplate {
            id: Ulid::new(),
            name: "Night".into(),
            start_time: TimeOfDay::from_hms(22, 0, 0),
            end_time: TimeOfDay::from_hms(6, 0, 0),
            days_of_week: Weekdays::parse("1").unwrap(),
            role: String::new(),
            created_at: 0,
        };
        assert!(t.is_overnight());
        let span = t.span_on(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        assert_eq!(span, Span::new(22 * 3_600_000, DAY_MS + 6 * 3_600_000));
    }

    #[test]
    fn schedule_keeps_start_order() {
        let mut s = EmployeeSchedule::new(Ulid::new());
        s.insert_shift(shift(300, 400));
        s.insert_shift(shift(100, 200));
        s.insert_shift(shift(200, 300));
        let starts: Vec<Ms> = s.shifts.iter().map(|x| x.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_far() {
        let mut s = EmployeeSchedule::new(Ulid::new());
        s.insert_shift(shift(100, 200));
        s.insert_shift(shift(450, 600));
        s.insert_shift(shift(1000, 1100));
        let hits: Vec<_> = s.overlapping(&Span::new(200, 500)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_long_shift_spanning_query() {
        let mut s = EmployeeSchedule::new(Ulid::new());
        s.insert_shift(shift(0, 10_000));
        assert_eq!(s.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn remove_missing_shift_returns_none() {
        let mut s = EmployeeSchedule::new(Ulid::new());
        s.insert_shift(shift(100, 200));
        assert!(s.remove_shift(Ulid::new()).is_none());
        assert_eq!(s.shifts.len(), 1);
    }

    #[test]
    fn patch_semantics() {
        assert_eq!(Patch::Unset.apply_to(Some(1)), Some(1));
        assert_eq!(Patch::<i32>::Null.apply_to(Some(1)), None);
        assert_eq!(Patch::Value(2).apply_to(Some(1)), Some(2));
        assert_eq!(Patch::<i32>::Null.required(1), None);
        assert_eq!(Patch::Unset.required(1), Some(1));
    }

    #[test]
    fn role_from_claim_defaults_to_least_privilege() {
        assert_eq!(Role::from_claim("ADMIN"), Role::Admin);
        assert_eq!(Role::from_claim("manager"), Role::Manager);
        assert_eq!(Role::from_claim("barista"), Role::Employee);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ShiftCreated {
            id: Ulid::new(),
            employee_id: Ulid::new(),
            span: Span::new(1000, 2000),
            role: Some("cook".into()),
            notes: None,
            at: 5,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
