use ulid::Ulid;

use crate::identity::Identity;
use crate::limits::*;
use crate::model::*;
use crate::policy::Operation;

use super::conflict::now_ms;
use super::{apply_to_business, Engine, EngineError};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_required(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidFormat(field));
    }
    Ok(())
}

impl Engine {
    /// First event of every business log. Fails if already registered.
    pub async fn register_business(&self, name: &str, email: &str) -> Result<Business, EngineError> {
        check_required("name", name)?;
        check_required("email", email)?;
        check_len(name, MAX_NAME_LEN, "business name too long")?;
        check_len(email, MAX_EMAIL_LEN, "business email too long")?;

        let _gate = self.commit_gate.read().await;
        let mut slot = self.business.write().await;
        if slot.is_some() {
            return Err(EngineError::AlreadyExists("business"));
        }
        let event = Event::BusinessRegistered {
            id: self.business_id,
            name: name.to_string(),
            email: email.to_string(),
            at: now_ms(),
        };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_business(&mut slot, &event);
        slot.clone().ok_or(EngineError::NotFound("business", self.business_id))
    }

    pub async fn get_business(&self, actor: &Identity) -> Result<Business, EngineError> {
        self.admit(actor, Operation::ReadTenant)?;
        self.business
            .read()
            .await
            .clone()
            .ok_or(EngineError::NotFound("business", self.business_id))
    }

    /// Contact email, for the tenant manager's uniqueness index.
    pub async fn business_email(&self) -> Option<String> {
        self.business.read().await.as_ref().map(|b| b.email.clone())
    }

    /// Email uniqueness across businesses is the tenant manager's job;
    /// this only applies the change.
    pub async fn update_business(
        &self,
        actor: &Identity,
        patch: BusinessPatch,
    ) -> Result<Business, EngineError> {
        self.admit(actor, Operation::BusinessUpdate)?;
        let _gate = self.commit_gate.read().await;
        let mut slot = self.business.write().await;
        let current = slot
            .clone()
            .ok_or(EngineError::NotFound("business", self.business_id))?;
        let name = patch
            .name
            .required(current.name)
            .ok_or(EngineError::InvalidFormat("name"))?;
        let email = patch
            .email
            .required(current.email)
            .ok_or(EngineError::InvalidFormat("email"))?;
        check_required("name", &name)?;
        check_required("email", &email)?;
        check_len(&name, MAX_NAME_LEN, "business name too long")?;
        check_len(&email, MAX_EMAIL_LEN, "business email too long")?;

        let event = Event::BusinessUpdated { name, email };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_business(&mut slot, &event);
        slot.clone().ok_or(EngineError::NotFound("business", self.business_id))
    }

    /// Employees by name, ties by id.
    pub fn list_employees(&self, actor: &Identity) -> Result<Vec<Employee>, EngineError> {
        self.admit(actor, Operation::ReadTenant)?;
        let mut out: Vec<Employee> = self.employees.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    pub fn get_employee(&self, actor: &Identity, id: Ulid) -> Result<Employee, EngineError> {
        self.admit(actor, Operation::ReadTenant)?;
        self.require_employee(id)
    }

    pub async fn create_employee(
        &self,
        actor: &Identity,
        input: NewEmployee,
    ) -> Result<Employee, EngineError> {
        self.admit(actor, Operation::EmployeeWrite)?;
        check_required("name", &input.name)?;
        check_required("email", &input.email)?;
        check_required("role", &input.role)?;
        let phone = input.phone.unwrap_or_default();
        check_len(&input.name, MAX_NAME_LEN, "employee name too long")?;
        check_len(&input.email, MAX_EMAIL_LEN, "employee email too long")?;
        check_len(&input.role, MAX_ROLE_LEN, "employee role too long")?;
        check_len(&phone, MAX_NAME_LEN, "phone too long")?;
        if self.employees.len() >= MAX_EMPLOYEES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many employees"));
        }

        let id = Ulid::new();
        let event = Event::EmployeeCreated {
            id,
            name: input.name,
            email: input.email,
            phone,
            role: input.role,
            at: now_ms(),
        };
        let _gate = self.commit_gate.read().await;
        self.wal_append(vec![event.clone()]).await?;
        self.apply_record(&event);
        self.require_employee(id)
    }

    pub async fn update_employee(
        &self,
        actor: &Identity,
        id: Ulid,
        patch: EmployeePatch,
    ) -> Result<Employee, EngineError> {
        self.admit(actor, Operation::EmployeeWrite)?;
        let current = self.require_employee(id)?;
        let name = patch
            .name
            .required(current.name)
            .ok_or(EngineError::InvalidFormat("name"))?;
        let email = patch
            .email
            .required(current.email)
            .ok_or(EngineError::InvalidFormat("email"))?;
        let role = patch
            .role
            .required(current.role)
            .ok_or(EngineError::InvalidFormat("role"))?;
        let phone = patch.phone.apply_to(Some(current.phone)).unwrap_or_default();
        check_required("name", &name)?;
        check_required("email", &email)?;
        check_required("role", &role)?;
        check_len(&name, MAX_NAME_LEN, "employee name too long")?;
        check_len(&email, MAX_EMAIL_LEN, "employee email too long")?;
        check_len(&role, MAX_ROLE_LEN, "employee role too long")?;
        check_len(&phone, MAX_NAME_LEN, "phone too long")?;

        let event = Event::EmployeeUpdated {
            id,
            name,
            email,
            phone,
            role,
        };
        let _gate = self.commit_gate.read().await;
        self.wal_append(vec![event.clone()]).await?;
        self.apply_record(&event);
        self.require_employee(id)
    }

    /// Shifts of a deleted employee are kept and read back as "Unknown".
    pub async fn delete_employee(&self, actor: &Identity, id: Ulid) -> Result<(), EngineError> {
        self.admit(actor, Operation::EmployeeDelete)?;
        self.require_employee(id)?;
        let event = Event::EmployeeDeleted { id };
        let _gate = self.commit_gate.read().await;
        self.wal_append(vec![event.clone()]).await?;
        self.apply_record(&event);
        Ok(())
    }
}
