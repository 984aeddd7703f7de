mod conflict;
mod directory;
mod error;
mod mutations;
mod queries;
mod templates;
mod time_off;

pub use conflict::{check_no_conflict, stage_span};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::identity::Identity;
use crate::model::*;
use crate::policy::{self, Operation};
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<EmployeeSchedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events of one statement; durable together or not at all.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Write and fsync a whole batch. On any failure the batch is rolled back
/// so no caller's events reach the log, matching the `Err` each one gets.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        tracing::error!("wal batch of {} failed, rolling back: {e}", batch.len());
        if let Err(rollback) = wal.rollback() {
            tracing::error!("wal rollback failed: {rollback}");
        }
    }
    result
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Scheduling state of one business (tenant), backed by its own WAL.
pub struct Engine {
    pub business_id: Ulid,
    pub(super) business: RwLock<Option<Business>>,
    pub(super) employees: DashMap<Ulid, Employee>,
    /// Employee id → schedule. Outlives the employee record so orphaned
    /// shifts stay listable.
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    /// Reverse lookup: shift id → owning employee id.
    pub(super) shift_owner: DashMap<Ulid, Ulid>,
    pub(super) templates: RwLock<Vec<ShiftTemplate>>,
    pub(super) time_off: DashMap<Ulid, TimeOffRequest>,
    pub(super) notifications: DashMap<Ulid, Notification>,
    /// Serializes time-off decisions (pending check + write).
    pub(super) decisions: Mutex<()>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss a concurrent append.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a shift event to the schedule(s) it touches. Caller holds the locks;
/// `to` is the new owner's schedule when a shift changes hands.
fn apply_to_schedules(
    from: &mut EmployeeSchedule,
    to: Option<&mut EmployeeSchedule>,
    event: &Event,
    owners: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::ShiftCreated {
            id,
            employee_id,
            span,
            role,
            notes,
            at,
        } => {
            from.insert_shift(Shift {
                id: *id,
                employee_id: *employee_id,
                span: *span,
                role: role.clone(),
                notes: notes.clone(),
                created_at: *at,
                updated_at: *at,
            });
            owners.insert(*id, *employee_id);
        }
        Event::ShiftUpdated {
            id,
            employee_id,
            span,
            role,
            notes,
            at,
        } => {
            let created_at = from.remove_shift(*id).map_or(*at, |s| s.created_at);
            let target = match to {
                Some(to) => to,
                None => from,
            };
            target.insert_shift(Shift {
                id: *id,
                employee_id: *employee_id,
                span: *span,
                role: role.clone(),
                notes: notes.clone(),
                created_at,
                updated_at: *at,
            });
            owners.insert(*id, *employee_id);
        }
        Event::ShiftDeleted { id, .. } => {
            from.remove_shift(*id);
            owners.remove(id);
        }
        _ => {}
    }
}

fn apply_to_business(slot: &mut Option<Business>, event: &Event) {
    match event {
        Event::BusinessRegistered { id, name, email, at } => {
            *slot = Some(Business {
                id: *id,
                name: name.clone(),
                email: email.clone(),
                created_at: *at,
            });
        }
        Event::BusinessUpdated { name, email } => {
            if let Some(b) = slot.as_mut() {
                b.name = name.clone();
                b.email = email.clone();
            }
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(business_id: Ulid, wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            business_id,
            business: RwLock::new(None),
            employees: DashMap::new(),
            schedules: DashMap::new(),
            shift_owner: DashMap::new(),
            templates: RwLock::new(Vec::new()),
            time_off: DashMap::new(),
            notifications: DashMap::new(),
            decisions: Mutex::new(()),
            commit_gate: RwLock::new(()),
            wal_tx,
        };

        // Replay: we are the sole owner of every lock here, so try_read/try_write
        // always succeed. Never block_on here, this may run inside the runtime.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!(
            "business {business_id}: replayed {} events ({} employees, {} shifts)",
            events.len(),
            engine.employees.len(),
            engine.shift_owner.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::BusinessRegistered { .. } | Event::BusinessUpdated { .. } => {
                let mut slot = self.business.try_write().expect("replay: uncontended write");
                apply_to_business(&mut slot, event);
            }
            Event::TemplateCreated { template } => {
                let mut list = self.templates.try_write().expect("replay: uncontended write");
                list.push(template.clone());
            }
            Event::ShiftCreated { employee_id, .. } | Event::ShiftDeleted { employee_id, .. } => {
                let schedule = self.schedule_for(*employee_id);
                let mut guard = schedule.try_write().expect("replay: uncontended write");
                apply_to_schedules(&mut guard, None, event, &self.shift_owner);
            }
            Event::ShiftUpdated { id, employee_id, .. } => {
                let previous = self.owner_of(id).unwrap_or(*employee_id);
                let from = self.schedule_for(previous);
                let mut from_guard = from.try_write().expect("replay: uncontended write");
                if previous == *employee_id {
                    apply_to_schedules(&mut from_guard, None, event, &self.shift_owner);
                } else {
                    let to = self.schedule_for(*employee_id);
                    let mut to_guard = to.try_write().expect("replay: uncontended write");
                    apply_to_schedules(
                        &mut from_guard,
                        Some(&mut to_guard),
                        event,
                        &self.shift_owner,
                    );
                }
            }
            other => self.apply_record(other),
        }
    }

    /// Apply events for records that live directly in the DashMaps.
    pub(super) fn apply_record(&self, event: &Event) {
        match event {
            Event::EmployeeCreated {
                id,
                name,
                email,
                phone,
                role,
                at,
            } => {
                self.employees.insert(
                    *id,
                    Employee {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                        phone: phone.clone(),
                        role: role.clone(),
                        created_at: *at,
                    },
                );
                self.schedule_for(*id);
            }
            Event::EmployeeUpdated {
                id,
                name,
                email,
                phone,
                role,
            } => {
                if let Some(mut e) = self.employees.get_mut(id) {
                    e.name = name.clone();
                    e.email = email.clone();
                    e.phone = phone.clone();
                    e.role = role.clone();
                }
            }
            Event::EmployeeDeleted { id } => {
                self.employees.remove(id);
            }
            Event::TimeOffRequested { request } => {
                self.time_off.insert(request.id, request.clone());
            }
            Event::TimeOffDecided {
                id,
                status,
                decided_by,
                at,
            } => {
                if let Some(mut r) = self.time_off.get_mut(id) {
                    r.status = *status;
                    r.decided_by = Some(*decided_by);
                    r.updated_at = *at;
                }
            }
            Event::NotificationCreated { notification } => {
                self.notifications
                    .insert(notification.id, notification.clone());
            }
            Event::NotificationRead { id } => {
                if let Some(mut n) = self.notifications.get_mut(id) {
                    n.read = true;
                }
            }
            _ => {}
        }
    }

    /// Write events to the WAL via the background group-commit writer.
    /// Nothing is applied in memory until this returns Ok.
    pub(super) async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| {
                tracing::error!("business {}: WAL append failed: {e}", self.business_id);
                EngineError::Storage(e.to_string())
            })
    }

    /// Check tenant scope and role for one operation.
    pub fn admit(&self, actor: &Identity, op: Operation) -> Result<(), EngineError> {
        if actor.business_id != self.business_id {
            return Err(EngineError::NotFound("business", actor.business_id));
        }
        if !policy::authorize(actor.role, op) {
            tracing::debug!("user {} ({}) denied {op}", actor.user_id, actor.role);
            return Err(EngineError::PermissionDenied(op));
        }
        Ok(())
    }

    pub fn find_employee(&self, employee_id: Ulid) -> Option<Employee> {
        self.employees.get(&employee_id).map(|e| e.value().clone())
    }

    pub(super) fn require_employee(&self, employee_id: Ulid) -> Result<Employee, EngineError> {
        self.find_employee(employee_id)
            .ok_or(EngineError::NotFound("employee", employee_id))
    }

    pub fn get_schedule(&self, employee_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(employee_id).map(|e| e.value().clone())
    }

    pub(super) fn schedule_for(&self, employee_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(employee_id)
            .or_insert_with(|| Arc::new(RwLock::new(EmployeeSchedule::new(employee_id))))
            .value()
            .clone()
    }

    pub(super) fn owner_of(&self, shift_id: &Ulid) -> Option<Ulid> {
        self.shift_owner.get(shift_id).map(|e| *e.value())
    }

    /// Write-lock schedules in id order so concurrent multi-lock callers
    /// can't deadlock. Duplicate ids are locked once.
    pub(super) async fn lock_schedules(
        &self,
        employee_ids: &[Ulid],
    ) -> Vec<(Ulid, OwnedRwLockWriteGuard<EmployeeSchedule>)> {
        let mut ids = employee_ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push((id, self.schedule_for(id).write_owned().await));
        }
        guards
    }

    pub(super) fn view(&self, shift: &Shift) -> ShiftView {
        let employee_name = self
            .employees
            .get(&shift.employee_id)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| UNKNOWN_EMPLOYEE.to_string());
        ShiftView {
            id: shift.id,
            business_id: self.business_id,
            employee_id: shift.employee_id,
            employee_name,
            start_time: shift.span.start,
            end_time: shift.span.end,
            role: shift.role.clone(),
            notes: shift.notes.clone(),
        }
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        if let Some(b) = self.business.read().await.as_ref() {
            events.push(Event::BusinessRegistered {
                id: b.id,
                name: b.name.clone(),
                email: b.email.clone(),
                at: b.created_at,
            });
        }
        for e in self.employees.iter() {
            events.push(Event::EmployeeCreated {
                id: e.id,
                name: e.name.clone(),
                email: e.email.clone(),
                phone: e.phone.clone(),
                role: e.role.clone(),
                at: e.created_at,
            });
        }
        for template in self.templates.read().await.iter() {
            events.push(Event::TemplateCreated {
                template: template.clone(),
            });
        }

        let schedules: Vec<SharedSchedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        for schedule in schedules {
            let guard = schedule.read().await;
            for shift in &guard.shifts {
                events.push(Event::ShiftCreated {
                    id: shift.id,
                    employee_id: shift.employee_id,
                    span: shift.span,
                    role: shift.role.clone(),
                    notes: shift.notes.clone(),
                    at: shift.created_at,
                });
                if shift.updated_at != shift.created_at {
                    events.push(Event::ShiftUpdated {
                        id: shift.id,
                        employee_id: shift.employee_id,
                        span: shift.span,
                        role: shift.role.clone(),
                        notes: shift.notes.clone(),
                        at: shift.updated_at,
                    });
                }
            }
        }

        for r in self.time_off.iter() {
            events.push(Event::TimeOffRequested {
                request: r.value().clone(),
            });
        }
        for n in self.notifications.iter() {
            events.push(Event::NotificationCreated {
                notification: n.value().clone(),
            });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        tracing::info!("business {}: compacted WAL to {count} events", self.business_id);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
