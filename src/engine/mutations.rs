use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::identity::Identity;
use crate::limits::*;
use crate::model::*;
use crate::policy::Operation;

use super::conflict::{now_ms, parse_bound, stage_span};
use super::{apply_to_schedules, Engine, EngineError};

/// A shift id can move between schedules while we wait for a lock; retry
/// the owner lookup this many times before giving up.
const OWNER_RETRIES: usize = 3;

fn check_text(field: &'static str, value: Option<&str>, max: usize) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(field)),
        _ => Ok(()),
    }
}

fn patch_bound(field: &'static str, patch: Patch<String>) -> Result<Option<Ms>, EngineError> {
    match patch {
        Patch::Unset => Ok(None),
        Patch::Null => Err(EngineError::InvalidFormat(field)),
        Patch::Value(raw) => parse_bound(field, &raw).map(Some),
    }
}

fn guard_of(
    guards: &[(Ulid, OwnedRwLockWriteGuard<EmployeeSchedule>)],
    employee_id: Ulid,
) -> Option<usize> {
    guards.iter().position(|(id, _)| *id == employee_id)
}

impl Engine {
    pub async fn create_shift(
        &self,
        actor: &Identity,
        input: NewShift,
    ) -> Result<ShiftView, EngineError> {
        self.admit(actor, Operation::ScheduleWrite)?;
        let employee = self.require_employee(input.employee_id)?;
        let start = parse_bound("start_time", &input.start_time)?;
        let end = parse_bound("end_time", &input.end_time)?;
        check_text("shift role too long", input.role.as_deref(), MAX_ROLE_LEN)?;
        check_text("notes too long", input.notes.as_deref(), MAX_TEXT_LEN)?;

        let _gate = self.commit_gate.read().await;
        let schedule = self.schedule_for(employee.id);
        let mut guard = schedule.write().await;
        if guard.shifts.len() >= MAX_SHIFTS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many shifts for employee"));
        }
        let span = stage_span(&guard, start, end, None)?;

        let id = Ulid::new();
        let event = Event::ShiftCreated {
            id,
            employee_id: employee.id,
            span,
            role: Some(input.role.unwrap_or(employee.role)),
            notes: Some(input.notes.unwrap_or_default()),
            at: now_ms(),
        };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_schedules(&mut guard, None, &event, &self.shift_owner);

        let shift = guard
            .get(id)
            .ok_or(EngineError::NotFound("shift", id))?;
        Ok(self.view(shift))
    }

    /// Partial update. Any change to the bounds or owner is re-checked
    /// against the target employee's schedule, excluding this shift.
    pub async fn update_shift(
        &self,
        actor: &Identity,
        id: Ulid,
        patch: ShiftPatch,
    ) -> Result<ShiftView, EngineError> {
        self.admit(actor, Operation::ScheduleWrite)?;
        if self.owner_of(&id).is_none() {
            return Err(EngineError::NotFound("shift", id));
        }
        let target = match patch.employee_id {
            Patch::Unset => None,
            Patch::Null => return Err(EngineError::InvalidFormat("employee_id")),
            Patch::Value(eid) => Some(self.require_employee(eid)?.id),
        };
        let new_start = patch_bound("start_time", patch.start_time)?;
        let new_end = patch_bound("end_time", patch.end_time)?;
        if let Patch::Value(r) = &patch.role {
            check_text("shift role too long", Some(r), MAX_ROLE_LEN)?;
        }
        if let Patch::Value(n) = &patch.notes {
            check_text("notes too long", Some(n), MAX_TEXT_LEN)?;
        }

        let _gate = self.commit_gate.read().await;
        for _ in 0..OWNER_RETRIES {
            let from = self.owner_of(&id).ok_or(EngineError::NotFound("shift", id))?;
            let to = target.unwrap_or(from);
            let mut guards = self.lock_schedules(&[from, to]).await;
            let Some(fi) = guard_of(&guards, from) else {
                continue;
            };
            let Some(existing) = guards[fi].1.get(id).cloned() else {
                // Moved by a concurrent update between lookup and lock.
                continue;
            };
            let Some(ti) = guard_of(&guards, to) else {
                continue;
            };
            if from != to && guards[ti].1.shifts.len() >= MAX_SHIFTS_PER_EMPLOYEE {
                return Err(EngineError::LimitExceeded("too many shifts for employee"));
            }

            let span = stage_span(
                &guards[ti].1,
                new_start.unwrap_or(existing.span.start),
                new_end.unwrap_or(existing.span.end),
                Some(id),
            )?;
            let event = Event::ShiftUpdated {
                id,
                employee_id: to,
                span,
                role: patch.role.clone().apply_to(existing.role.clone()),
                notes: patch.notes.clone().apply_to(existing.notes.clone()),
                at: now_ms(),
            };
            self.wal_append(vec![event.clone()]).await?;

            if fi == ti {
                apply_to_schedules(&mut guards[fi].1, None, &event, &self.shift_owner);
            } else {
                let (left, right) = guards.split_at_mut(1);
                let (from_guard, to_guard) = if fi == 0 {
                    (&mut left[0].1, &mut right[0].1)
                } else {
                    (&mut right[0].1, &mut left[0].1)
                };
                apply_to_schedules(
                    &mut **from_guard,
                    Some(&mut **to_guard),
                    &event,
                    &self.shift_owner,
                );
            }

            let shift = guards[ti]
                .1
                .get(id)
                .ok_or(EngineError::NotFound("shift", id))?;
            return Ok(self.view(shift));
        }
        Err(EngineError::NotFound("shift", id))
    }

    pub async fn delete_shift(&self, actor: &Identity, id: Ulid) -> Result<(), EngineError> {
        self.admit(actor, Operation::ScheduleWrite)?;
        let _gate = self.commit_gate.read().await;
        for _ in 0..OWNER_RETRIES {
            let owner = self.owner_of(&id).ok_or(EngineError::NotFound("shift", id))?;
            let schedule = self.schedule_for(owner);
            let mut guard = schedule.write().await;
            if guard.get(id).is_none() {
                continue;
            }
            let event = Event::ShiftDeleted {
                id,
                employee_id: owner,
            };
            self.wal_append(vec![event.clone()]).await?;
            apply_to_schedules(&mut guard, None, &event, &self.shift_owner);
            return Ok(());
        }
        Err(EngineError::NotFound("shift", id))
    }

    /// Dry-run of `create_shift`/`update_shift`: reports the first conflict
    /// without writing anything.
    pub async fn check_shift(
        &self,
        actor: &Identity,
        employee_id: Ulid,
        start_time: &str,
        end_time: &str,
        exclude: Option<Ulid>,
    ) -> Result<Span, EngineError> {
        self.admit(actor, Operation::ScheduleWrite)?;
        self.validate_and_stage_shift(employee_id, start_time, end_time, exclude)
            .await
    }
}
