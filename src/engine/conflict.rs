use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Parse one shift bound, naming the field on failure.
pub(crate) fn parse_bound(field: &'static str, raw: &str) -> Result<Ms, EngineError> {
    parse_timestamp(raw).ok_or(EngineError::InvalidFormat(field))
}

/// Any parseable pair of bounds is a valid span once `end > start`.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidRange);
    }
    Ok(Span::new(start, end))
}

/// Fail with the first shift in `schedule` that overlaps `span`.
/// `exclude` skips the shift being edited so it never conflicts with itself.
pub fn check_no_conflict(
    schedule: &EmployeeSchedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for shift in schedule.overlapping(span) {
        if Some(shift.id) == exclude {
            continue;
        }
        metrics::counter!(crate::observability::SHIFT_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict(shift.id));
    }
    Ok(())
}

/// Range and overlap checks for already-parsed bounds.
pub fn stage_span(
    schedule: &EmployeeSchedule,
    start: Ms,
    end: Ms,
    exclude: Option<Ulid>,
) -> Result<Span, EngineError> {
    let span = validate_span(start, end)?;
    check_no_conflict(schedule, &span, exclude)?;
    Ok(span)
}

/// Planned shifts of one batch must not overlap each other. Sorted by
/// start, any overlap shows up between neighbours; the earlier shift is
/// reported as the conflicting one.
pub(crate) fn check_batch_disjoint(planned: &mut [(Ulid, Span)]) -> Result<(), EngineError> {
    planned.sort_by_key(|(_, span)| span.start);
    match planned.windows(2).find(|w| w[0].1.overlaps(&w[1].1)) {
        Some(pair) => Err(EngineError::Conflict(pair[0].0)),
        None => Ok(()),
    }
}

impl Engine {
    /// Parse and check a proposed shift for `employee_id` without writing it.
    /// Order of checks: employee exists, bounds parse, end after start, no overlap.
    pub async fn validate_and_stage_shift(
        &self,
        employee_id: Ulid,
        start_time: &str,
        end_time: &str,
        exclude: Option<Ulid>,
    ) -> Result<Span, EngineError> {
        self.require_employee(employee_id)?;
        let start = parse_bound("start_time", start_time)?;
        let end = parse_bound("end_time", end_time)?;
        let schedule = self.schedule_for(employee_id);
        let guard = schedule.read().await;
        stage_span(&guard, start, end, exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_with(spans: &[(Ms, Ms)]) -> (EmployeeSchedule, Vec<Ulid>) {
        let mut s = EmployeeSchedule::new(Ulid::new());
        let mut ids = Vec::new();
        for &(start, end) in spans {
            let id = Ulid::new();
            ids.push(id);
            s.insert_shift(Shift {
                id,
                employee_id: s.employee_id,
                span: Span::new(start, end),
                role: None,
                notes: None,
                created_at: 0,
                updated_at: 0,
            });
        }
        (s, ids)
    }

    #[test]
    fn touching_shifts_do_not_conflict() {
        let (s, _) = schedule_with(&[(1000, 2000)]);
        assert!(stage_span(&s, 2000, 3000, None).is_ok());
        assert!(stage_span(&s, 0, 1000, None).is_ok());
    }

    #[test]
    fn overlap_names_existing_shift() {
        let (s, ids) = schedule_with(&[(1000, 2000), (5000, 6000)]);
        match stage_span(&s, 1500, 2500, None) {
            Err(EngineError::Conflict(id)) => assert_eq!(id, ids[0]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn excluded_shift_is_ignored() {
        let (s, ids) = schedule_with(&[(1000, 2000)]);
        assert!(stage_span(&s, 1200, 2200, Some(ids[0])).is_ok());
    }

    #[test]
    fn range_checked_before_overlap() {
        let (s, _) = schedule_with(&[(1000, 2000)]);
        assert!(matches!(
            stage_span(&s, 1500, 1500, None),
            Err(EngineError::InvalidRange)
        ));
        assert!(matches!(
            stage_span(&s, 1800, 1200, None),
            Err(EngineError::InvalidRange)
        ));
    }

    #[test]
    fn overlong_shift_rejected() {
        let (s, _) = schedule_with(&[]);
        assert!(matches!(
            stage_span(&s, 0, 8 * DAY_MS, None),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn bad_bound_names_field() {
        assert!(matches!(
            parse_bound("end_time", "tomorrow"),
            Err(EngineError::InvalidFormat("end_time"))
        ));
    }

    #[test]
    fn batch_overlap_is_a_conflict() {
        let planned = |spans: &[(Ms, Ms)]| -> Vec<(Ulid, Span)> {
            spans.iter().map(|&(s, e)| (Ulid::new(), Span::new(s, e))).collect()
        };
        let mut ok = planned(&[(300, 400), (100, 200), (200, 300)]);
        assert!(check_batch_disjoint(&mut ok).is_ok());

        let mut bad = planned(&[(600, 700), (100, 1000), (200, 250)]);
        let long = bad[1].0;
        assert!(matches!(
            check_batch_disjoint(&mut bad),
            Err(EngineError::Conflict(id)) if id == long
        ));
    }
}
