//! Role capability table. Every engine operation names one `Operation` and is
//! admitted through `authorize` exactly once.

use crate::model::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Business profile, employees, shifts, templates, time-off, stats.
    ReadTenant,
    ScheduleWrite,
    TemplateCreate,
    EmployeeWrite,
    EmployeeDelete,
    BusinessUpdate,
    TimeOffRequest,
    TimeOffDecide,
    /// The caller's own notification inbox.
    ReadOwnInbox,
}

const ANY: &[Role] = &[Role::Admin, Role::Manager, Role::Employee];
const SCHEDULERS: &[Role] = &[Role::Admin, Role::Manager];
const ADMIN: &[Role] = &[Role::Admin];

const CAPABILITIES: &[(Operation, &[Role])] = &[
    (Operation::ReadTenant, ANY),
    (Operation::ScheduleWrite, SCHEDULERS),
    (Operation::TemplateCreate, SCHEDULERS),
    (Operation::EmployeeWrite, SCHEDULERS),
    (Operation::EmployeeDelete, ADMIN),
    (Operation::BusinessUpdate, ADMIN),
    (Operation::TimeOffRequest, ANY),
    (Operation::TimeOffDecide, SCHEDULERS),
    (Operation::ReadOwnInbox, ANY),
];

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ReadTenant => "tenant.read",
            Operation::ScheduleWrite => "schedule.write",
            Operation::TemplateCreate => "template.create",
            Operation::EmployeeWrite => "employee.write",
            Operation::EmployeeDelete => "employee.delete",
            Operation::BusinessUpdate => "business.update",
            Operation::TimeOffRequest => "time_off.request",
            Operation::TimeOffDecide => "time_off.decide",
            Operation::ReadOwnInbox => "inbox.read",
        }
    }

    pub fn allowed_roles(self) -> &'static [Role] {
        CAPABILITIES
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, roles)| *roles)
            .unwrap_or(&[])
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `role` may perform `op`. Operations missing from the table are denied.
pub fn authorize(role: Role, op: Operation) -> bool {
    op.allowed_roles().contains(&role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_writes_need_admin_or_manager() {
        assert!(authorize(Role::Admin, Operation::ScheduleWrite));
        assert!(authorize(Role::Manager, Operation::ScheduleWrite));
        assert!(!authorize(Role::Employee, Operation::ScheduleWrite));
        assert!(!authorize(Role::Employee, Operation::TemplateCreate));
    }

    #[test]
    fn admin_only_operations() {
        for op in [Operation::EmployeeDelete, Operation::BusinessUpdate] {
            assert!(authorize(Role::Admin, op));
            assert!(!authorize(Role::Manager, op), "{op}");
            assert!(!authorize(Role::Employee, op), "{op}");
        }
    }

    #[test]
    fn everyone_reads_and_requests_leave() {
        for role in [Role::Admin, Role::Manager, Role::Employee] {
            assert!(authorize(role, Operation::ReadTenant));
            assert!(authorize(role, Operation::TimeOffRequest));
            assert!(authorize(role, Operation::ReadOwnInbox));
        }
        assert!(!authorize(Role::Employee, Operation::TimeOffDecide));
    }

    #[test]
    fn every_operation_has_a_row() {
        let all = [
            Operation::ReadTenant,
            Operation::ScheduleWrite,
            Operation::TemplateCreate,
            Operation::EmployeeWrite,
            Operation::EmployeeDelete,
            Operation::BusinessUpdate,
            Operation::TimeOffRequest,
            Operation::TimeOffDecide,
            Operation::ReadOwnInbox,
        ];
        for op in all {
            assert!(!op.allowed_roles().is_empty(), "{op} missing from table");
        }
    }
}
