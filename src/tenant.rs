use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

use crate::compactor;
use crate::engine::{Engine, EngineError};
use crate::identity::Identity;
use crate::limits::*;
use crate::model::{Business, BusinessPatch, Patch};
use crate::policy::Operation;

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Manages per-business engines. Each business gets its own Engine + WAL +
/// compactor, stored as `<data_dir>/<business_id>.wal`.
pub struct TenantManager {
    engines: DashMap<Ulid, Arc<Engine>>,
    /// Normalized contact email → business. Registration emails are unique.
    emails: DashMap<String, Ulid>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            emails: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Load every business found in `data_dir`.
    pub async fn open(data_dir: PathBuf, compact_threshold: u64) -> io::Result<Self> {
        let tm = Self::new(data_dir, compact_threshold);
        for entry in std::fs::read_dir(&tm.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wal") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Ulid::from_string(s).ok())
            else {
                tracing::warn!("skipping unrecognized log {}", path.display());
                continue;
            };
            let engine = Arc::new(Engine::new(id, path)?);
            match engine.business_email().await {
                Some(email) => {
                    tm.emails.insert(email_key(&email), id);
                }
                None => tracing::warn!("business {id}: log has no registration record"),
            }
            tm.install(id, engine);
        }
        tracing::info!("loaded {} businesses", tm.engines.len());
        Ok(tm)
    }

    fn install(&self, id: Ulid, engine: Arc<Engine>) {
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });
        self.engines.insert(id, engine);
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
    }

    pub fn get(&self, business_id: &Ulid) -> Option<Arc<Engine>> {
        self.engines.get(business_id).map(|e| e.value().clone())
    }

    pub async fn find_business(&self, business_id: &Ulid) -> Option<Business> {
        let engine = self.get(business_id)?;
        engine.business.read().await.clone()
    }

    /// The engine an identity is scoped to.
    pub fn resolve(&self, identity: &Identity) -> Result<Arc<Engine>, EngineError> {
        self.get(&identity.business_id)
            .ok_or(EngineError::NotFound("business", identity.business_id))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Create a business with its own log. The contact email must be unused.
    pub async fn register_business(
        &self,
        name: &str,
        email: &str,
    ) -> Result<Business, EngineError> {
        if self.engines.len() >= MAX_TENANTS {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        let id = Ulid::new();
        let key = email_key(email);
        match self.emails.entry(key.clone()) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists("business email")),
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let path = self.data_dir.join(format!("{id}.wal"));
        let result = match Engine::new(id, path.clone()) {
            Ok(engine) => {
                let engine = Arc::new(engine);
                engine
                    .register_business(name.trim(), email.trim())
                    .await
                    .map(|b| (engine, b))
            }
            Err(e) => Err(EngineError::Storage(e.to_string())),
        };
        match result {
            Ok((engine, business)) => {
                self.install(id, engine);
                tracing::info!("registered business {id}");
                Ok(business)
            }
            Err(e) => {
                self.emails.remove(&key);
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Apply a business update, keeping the email index consistent.
    pub async fn update_business(
        &self,
        actor: &Identity,
        patch: BusinessPatch,
    ) -> Result<Business, EngineError> {
        let engine = self.resolve(actor)?;
        engine.admit(actor, Operation::BusinessUpdate)?;
        let id = engine.business_id;
        let old_key = engine.business_email().await.map(|e| email_key(&e));

        let mut reserved = None;
        if let Patch::Value(new_email) = &patch.email {
            let key = email_key(new_email);
            if old_key.as_deref() != Some(key.as_str()) {
                match self.emails.entry(key.clone()) {
                    Entry::Occupied(o) if *o.get() != id => {
                        return Err(EngineError::AlreadyExists("business email"));
                    }
                    Entry::Occupied(_) => {}
                    Entry::Vacant(v) => {
                        v.insert(id);
                        reserved = Some(key);
                    }
                }
            }
        }

        match engine.update_business(actor, patch).await {
            Ok(business) => {
                if reserved.is_some()
                    && let Some(old) = old_key
                {
                    self.emails.remove_if(&old, |_, owner| *owner == id);
                }
                Ok(business)
            }
            Err(e) => {
                if let Some(key) = reserved {
                    self.emails.remove(&key);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewEmployee, Role};
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shiftd_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn admin_of(business: &Business) -> Identity {
        Identity {
            user_id: Ulid::new(),
            business_id: business.id,
            role: Role::Admin,
        }
    }

    fn cook(name: &str) -> NewEmployee {
        NewEmployee {
            name: name.into(),
            email: format!("{name}@example.com"),
            phone: None,
            role: "cook".into(),
        }
    }

    #[tokio::test]
    async fn register_creates_log_named_by_id() {
        let dir = test_data_dir("register");
        let tm = TenantManager::new(dir.clone(), 1000);

        let b = tm.register_business("Deli", "deli@example.com").await.unwrap();
        assert!(dir.join(format!("{}.wal", b.id)).exists());
        assert!(tm.get(&b.id).is_some());
        assert_eq!(tm.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_rejected_case_insensitively() {
        let dir = test_data_dir("dup_email");
        let tm = TenantManager::new(dir, 1000);

        tm.register_business("Deli", "deli@example.com").await.unwrap();
        let err = tm
            .register_business("Other Deli", " DELI@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists("business email")));
        assert_eq!(tm.len(), 1);
    }

    #[tokio::test]
    async fn businesses_are_isolated() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let a = tm.register_business("A", "a@example.com").await.unwrap();
        let b = tm.register_business("B", "b@example.com").await.unwrap();
        let admin_a = admin_of(&a);
        let admin_b = admin_of(&b);

        let emp = tm
            .resolve(&admin_a)
            .unwrap()
            .create_employee(&admin_a, cook("ana"))
            .await
            .unwrap();

        let engine_b = tm.resolve(&admin_b).unwrap();
        assert!(engine_b.list_employees(&admin_b).unwrap().is_empty());
        assert!(matches!(
            engine_b.get_employee(&admin_a, emp.id),
            Err(EngineError::NotFound("business", _))
        ));
    }

    #[tokio::test]
    async fn reopen_restores_businesses_and_email_index() {
        let dir = test_data_dir("reopen");
        let id = {
            let tm = TenantManager::new(dir.clone(), 1000);
            let b = tm.register_business("Deli", "deli@example.com").await.unwrap();
            tm.resolve(&admin_of(&b))
                .unwrap()
                .create_employee(&admin_of(&b), cook("ana"))
                .await
                .unwrap();
            b.id
        };
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let tm = TenantManager::open(dir, 1000).await.unwrap();
        assert_eq!(tm.len(), 1);
        let engine = tm.get(&id).unwrap();
        let admin = Identity {
            user_id: Ulid::new(),
            business_id: id,
            role: Role::Admin,
        };
        assert_eq!(engine.list_employees(&admin).unwrap().len(), 1);
        assert!(matches!(
            tm.register_business("Copy", "deli@example.com").await,
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn update_email_keeps_index_consistent() {
        let dir = test_data_dir("update_email");
        let tm = TenantManager::new(dir, 1000);

        let a = tm.register_business("A", "a@example.com").await.unwrap();
        tm.register_business("B", "b@example.com").await.unwrap();
        let admin = admin_of(&a);

        let taken = tm
            .update_business(
                &admin,
                BusinessPatch {
                    email: Patch::Value("b@example.com".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(EngineError::AlreadyExists(_))));

        let updated = tm
            .update_business(
                &admin,
                BusinessPatch {
                    email: Patch::Value("new-a@example.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email, "new-a@example.com");

        // The old address is free again.
        tm.register_business("C", "a@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn manager_cannot_update_business() {
        let dir = test_data_dir("update_denied");
        let tm = TenantManager::new(dir, 1000);
        let a = tm.register_business("A", "a@example.com").await.unwrap();
        let manager = Identity {
            role: Role::Manager,
            ..admin_of(&a)
        };

        let err = tm
            .update_business(
                &manager,
                BusinessPatch {
                    name: Patch::Value("Hijacked".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PermissionDenied(Operation::BusinessUpdate)
        ));
    }
}
