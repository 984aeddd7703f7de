use ulid::Ulid;

use crate::identity::Identity;
use crate::limits::*;
use crate::model::*;
use crate::policy::Operation;

use super::conflict::now_ms;
use super::{Engine, EngineError};

const DECISION_KIND: &str = "time_off";

impl Engine {
    /// Dates are whole days, both ends inclusive.
    pub async fn request_time_off(
        &self,
        actor: &Identity,
        input: NewTimeOff,
    ) -> Result<TimeOffRequest, EngineError> {
        self.admit(actor, Operation::TimeOffRequest)?;
        self.require_employee(input.employee_id)?;
        let start = parse_date(&input.start_date).ok_or(EngineError::InvalidFormat("start_date"))?;
        let end = parse_date(&input.end_date).ok_or(EngineError::InvalidFormat("end_date"))?;
        if end < start {
            return Err(EngineError::InvalidRange);
        }
        let reason = input.reason.unwrap_or_default();
        if reason.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        if self.time_off.len() >= MAX_TIME_OFF_REQUESTS {
            return Err(EngineError::LimitExceeded("too many time-off requests"));
        }

        let at = now_ms();
        let request = TimeOffRequest {
            id: Ulid::new(),
            employee_id: input.employee_id,
            requested_by: actor.user_id,
            start_date: date_start_ms(start),
            end_date: date_start_ms(end),
            reason,
            status: TimeOffStatus::Pending,
            decided_by: None,
            created_at: at,
            updated_at: at,
        };
        let event = Event::TimeOffRequested {
            request: request.clone(),
        };
        let _gate = self.commit_gate.read().await;
        self.wal_append(vec![event.clone()]).await?;
        self.apply_record(&event);
        Ok(request)
    }

    /// Requests of this business, oldest first, optionally by status.
    pub fn list_time_off(
        &self,
        actor: &Identity,
        status: Option<&str>,
    ) -> Result<Vec<TimeOffRequest>, EngineError> {
        self.admit(actor, Operation::ReadTenant)?;
        let status = status
            .map(|s| TimeOffStatus::parse(s).ok_or(EngineError::InvalidFormat("status")))
            .transpose()?;
        let mut out: Vec<TimeOffRequest> = self
            .time_off
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    /// Approve or reject a pending request and notify whoever filed it.
    /// Shifts overlapping the leave are left alone.
    pub async fn decide_time_off(
        &self,
        actor: &Identity,
        id: Ulid,
        status: &str,
    ) -> Result<TimeOffRequest, EngineError> {
        self.admit(actor, Operation::TimeOffDecide)?;
        let target = TimeOffStatus::parse(status).ok_or(EngineError::InvalidFormat("status"))?;

        let _gate = self.commit_gate.read().await;
        let _decision = self.decisions.lock().await;
        let current = self
            .time_off
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::NotFound("time-off request", id))?;
        if current.status != TimeOffStatus::Pending || target == TimeOffStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let at = now_ms();
        let decided = Event::TimeOffDecided {
            id,
            status: target,
            decided_by: actor.user_id,
            at,
        };
        let notice = Event::NotificationCreated {
            notification: Notification {
                id: Ulid::new(),
                user_id: current.requested_by,
                title: format!("Time off {target}"),
                message: format!(
                    "Your time off request for {} to {} was {target}",
                    format_date(current.start_date),
                    format_date(current.end_date)
                ),
                kind: DECISION_KIND.to_string(),
                read: false,
                created_at: at,
            },
        };
        let events = if self.notifications.len() < MAX_NOTIFICATIONS {
            vec![decided, notice]
        } else {
            tracing::warn!("business {}: notification store full", self.business_id);
            vec![decided]
        };
        self.wal_append(events.clone()).await?;
        for event in &events {
            self.apply_record(event);
        }

        self.time_off
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::NotFound("time-off request", id))
    }

    /// The caller's own notifications, newest first.
    pub fn list_notifications(&self, actor: &Identity) -> Result<Vec<Notification>, EngineError> {
        self.admit(actor, Operation::ReadOwnInbox)?;
        let mut out: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.user_id == actor.user_id)
            .map(|n| n.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    /// Idempotent. Someone else's notification reads as missing.
    pub async fn mark_notification_read(
        &self,
        actor: &Identity,
        id: Ulid,
    ) -> Result<(), EngineError> {
        self.admit(actor, Operation::ReadOwnInbox)?;
        let (owner, read) = self
            .notifications
            .get(&id)
            .map(|n| (n.user_id, n.read))
            .ok_or(EngineError::NotFound("notification", id))?;
        if owner != actor.user_id {
            return Err(EngineError::NotFound("notification", id));
        }
        if read {
            return Ok(());
        }
        let event = Event::NotificationRead { id };
        let _gate = self.commit_gate.read().await;
        self.wal_append(vec![event.clone()]).await?;
        self.apply_record(&event);
        Ok(())
    }
}
