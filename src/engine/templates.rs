use chrono::{Duration, NaiveDate};
use ulid::Ulid;

use crate::identity::Identity;
use crate::limits::*;
use crate::model::*;
use crate::policy::Operation;

use super::conflict::{check_batch_disjoint, check_no_conflict, now_ms};
use super::{apply_to_schedules, Engine, EngineError};

fn parse_time_of_day(raw: &str) -> Result<TimeOfDay, EngineError> {
    TimeOfDay::parse(raw).ok_or(EngineError::InvalidFormat("time"))
}

fn parse_day(field: &'static str, raw: &str) -> Result<NaiveDate, EngineError> {
    parse_date(raw).ok_or(EngineError::InvalidFormat(field))
}

impl Engine {
    /// Templates may overlap one another; `end < start` is an overnight
    /// template and `end == start` is rejected.
    pub async fn create_template(
        &self,
        actor: &Identity,
        input: NewTemplate,
    ) -> Result<ShiftTemplate, EngineError> {
        self.admit(actor, Operation::TemplateCreate)?;
        let start_time = parse_time_of_day(&input.start_time)?;
        let end_time = parse_time_of_day(&input.end_time)?;
        let days_of_week = match input.days_of_week.as_deref() {
            None => Weekdays::default(),
            Some(raw) => {
                Weekdays::parse(raw).ok_or(EngineError::InvalidFormat("days_of_week"))?
            }
        };
        if start_time == end_time {
            return Err(EngineError::InvalidRange);
        }
        if input.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("template name too long"));
        }
        let role = input.role.unwrap_or_default();
        if role.len() > MAX_ROLE_LEN {
            return Err(EngineError::LimitExceeded("template role too long"));
        }

        let _gate = self.commit_gate.read().await;
        let mut templates = self.templates.write().await;
        if templates.len() >= MAX_TEMPLATES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many templates"));
        }
        let template = ShiftTemplate {
            id: Ulid::new(),
            name: input.name,
            start_time,
            end_time,
            days_of_week,
            role,
            created_at: now_ms(),
        };
        self.wal_append(vec![Event::TemplateCreated {
            template: template.clone(),
        }])
        .await?;
        templates.push(template.clone());
        Ok(template)
    }

    /// Templates in creation order.
    pub async fn list_templates(&self, actor: &Identity) -> Result<Vec<ShiftTemplate>, EngineError> {
        self.admit(actor, Operation::ReadTenant)?;
        Ok(self.templates.read().await.clone())
    }

    /// Materialize a template as shifts for one employee on every matching
    /// weekday in `[from_date, to_date]`. All-or-nothing: one conflict, and
    /// no shift is written.
    pub async fn apply_template(
        &self,
        actor: &Identity,
        input: TemplateApplication,
    ) -> Result<Vec<ShiftView>, EngineError> {
        self.admit(actor, Operation::ScheduleWrite)?;
        let template = self
            .templates
            .read()
            .await
            .iter()
            .find(|t| t.id == input.template_id)
            .cloned()
            .ok_or(EngineError::NotFound("template", input.template_id))?;
        let employee = self.require_employee(input.employee_id)?;
        let from = parse_day("from_date", &input.from_date)?;
        let to = parse_day("to_date", &input.to_date)?;
        if to < from {
            return Err(EngineError::InvalidRange);
        }
        if (to - from).num_days() >= MAX_TEMPLATE_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("template range too long"));
        }

        let mut planned = Vec::new();
        let mut day = from;
        while day <= to {
            if template.days_of_week.contains(day) {
                planned.push((Ulid::new(), template.span_on(day)));
            }
            day += Duration::days(1);
        }
        if planned.is_empty() {
            return Ok(Vec::new());
        }
        check_batch_disjoint(&mut planned)?;

        let role = if template.role.is_empty() {
            employee.role.clone()
        } else {
            template.role.clone()
        };

        let _gate = self.commit_gate.read().await;
        let schedule = self.schedule_for(employee.id);
        let mut guard = schedule.write().await;
        if guard.shifts.len() + planned.len() > MAX_SHIFTS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many shifts for employee"));
        }
        for (_, span) in &planned {
            check_no_conflict(&guard, span, None)?;
        }

        let at = now_ms();
        let events: Vec<Event> = planned
            .iter()
            .map(|(id, span)| Event::ShiftCreated {
                id: *id,
                employee_id: employee.id,
                span: *span,
                role: Some(role.clone()),
                notes: Some(format!("From template: {}", template.name)),
                at,
            })
            .collect();
        self.wal_append(events.clone()).await?;

        let mut created = Vec::with_capacity(events.len());
        for event in &events {
            apply_to_schedules(&mut guard, None, event, &self.shift_owner);
            if let Event::ShiftCreated { id, .. } = event
                && let Some(shift) = guard.get(*id)
            {
                created.push(self.view(shift));
            }
        }
        tracing::debug!(
            "business {}: template {} applied to {} ({} shifts)",
            self.business_id,
            template.id,
            employee.id,
            created.len()
        );
        Ok(created)
    }
}
