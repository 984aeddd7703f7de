use chrono::{DateTime, Datelike, Duration};
use ulid::Ulid;

use crate::identity::Identity;
use crate::limits::{DEFAULT_PER_PAGE, MAX_PER_PAGE};
use crate::model::*;
use crate::policy::Operation;

use super::conflict::now_ms;
use super::{Engine, EngineError, SharedSchedule};

/// Parse a positive page number or size. Absent means `default`.
fn parse_positive(
    field: &'static str,
    raw: Option<&str>,
    default: usize,
) -> Result<usize, EngineError> {
    match raw {
        None => Ok(default),
        Some(s) => match s.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(EngineError::InvalidFormat(field)),
        },
    }
}

fn parse_filter_date(field: &'static str, raw: Option<&str>) -> Result<Option<Ms>, EngineError> {
    raw.map(|s| {
        parse_date(s)
            .map(date_start_ms)
            .ok_or(EngineError::InvalidFormat(field))
    })
    .transpose()
}

/// `[Monday 00:00, next Monday 00:00)` of the UTC week containing `now`.
pub(crate) fn week_containing(now: Ms) -> Span {
    let date = DateTime::from_timestamp_millis(now)
        .map(|dt| dt.date_naive())
        .unwrap_or_default();
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    let start = date_start_ms(monday);
    Span::new(start, start + 7 * DAY_MS)
}

impl Engine {
    /// Shifts of this business, filtered and paginated.
    ///
    /// - `start_date` keeps shifts starting at or after that midnight.
    /// - `end_date` keeps shifts ending at or before the following midnight,
    ///   so a shift that ends any time on that date is included.
    /// - Ordered by start, ties by id.
    pub async fn list_shifts(
        &self,
        actor: &Identity,
        filter: ShiftFilter,
    ) -> Result<ShiftPage, EngineError> {
        self.admit(actor, Operation::ReadTenant)?;
        let lower = parse_filter_date("start_date", filter.start_date.as_deref())?;
        let upper =
            parse_filter_date("end_date", filter.end_date.as_deref())?.map(|d| d + DAY_MS);
        let employee = filter
            .employee_id
            .as_deref()
            .map(|s| Ulid::from_string(s.trim()).map_err(|_| EngineError::InvalidFormat("employee_id")))
            .transpose()?;
        let page = parse_positive("page", filter.page.as_deref(), 1)?;
        let per_page =
            parse_positive("per_page", filter.per_page.as_deref(), DEFAULT_PER_PAGE)?
                .min(MAX_PER_PAGE);

        let schedules: Vec<SharedSchedule> = match employee {
            Some(eid) => self.get_schedule(&eid).into_iter().collect(),
            None => self.schedules.iter().map(|e| e.value().clone()).collect(),
        };

        let mut matched: Vec<Shift> = Vec::new();
        for schedule in schedules {
            let guard = schedule.read().await;
            // Sorted by start: skip what starts too early, stop once a shift
            // starts past the upper bound (it can't end before it).
            let from = lower.map_or(0, |l| guard.shifts.partition_point(|s| s.span.start < l));
            let to = upper.map_or(guard.shifts.len(), |u| {
                guard.shifts.partition_point(|s| s.span.start < u)
            });
            if from >= to {
                continue;
            }
            matched.extend(
                guard.shifts[from..to]
                    .iter()
                    .filter(|s| upper.is_none_or(|u| s.span.end <= u))
                    .cloned(),
            );
        }
        matched.sort_by_key(|s| (s.span.start, s.id));

        let total = matched.len();
        let shifts = matched
            .iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .map(|s| self.view(s))
            .collect();

        Ok(ShiftPage {
            shifts,
            total,
            page,
            per_page,
        })
    }

    pub async fn business_stats(&self, actor: &Identity) -> Result<BusinessStats, EngineError> {
        self.business_stats_at(actor, now_ms()).await
    }

    /// Head-count, shifts lying wholly inside the current week, and pending
    /// time-off requests.
    pub async fn business_stats_at(
        &self,
        actor: &Identity,
        now: Ms,
    ) -> Result<BusinessStats, EngineError> {
        self.admit(actor, Operation::ReadTenant)?;
        let week = week_containing(now);

        let schedules: Vec<SharedSchedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        let mut shift_count = 0;
        for schedule in schedules {
            let guard = schedule.read().await;
            shift_count += guard
                .overlapping(&week)
                .filter(|s| week.contains_span(&s.span))
                .count();
        }

        let pending_requests = self
            .time_off
            .iter()
            .filter(|r| r.status == TimeOffStatus::Pending)
            .count();

        Ok(BusinessStats {
            employee_count: self.employees.len(),
            shift_count,
            pending_requests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn week_starts_monday() {
        // 2024-03-06 is a Wednesday.
        let wed = date_start_ms(NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()) + 15 * 3_600_000;
        let week = week_containing(wed);
        assert_eq!(
            week.start,
            date_start_ms(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
        );
        assert_eq!(week.duration_ms(), 7 * DAY_MS);
    }

    #[test]
    fn monday_midnight_is_its_own_week() {
        let monday = date_start_ms(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(week_containing(monday).start, monday);
        assert_eq!(week_containing(monday - 1).start, monday - 7 * DAY_MS);
    }

    #[test]
    fn page_numbers_must_be_positive() {
        assert_eq!(parse_positive("page", None, 1).unwrap(), 1);
        assert_eq!(parse_positive("page", Some(" 3 "), 1).unwrap(), 3);
        assert!(matches!(
            parse_positive("page", Some("0"), 1),
            Err(EngineError::InvalidFormat("page"))
        ));
        assert!(matches!(
            parse_positive("per_page", Some("-2"), 50),
            Err(EngineError::InvalidFormat("per_page"))
        ));
    }
}
