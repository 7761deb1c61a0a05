use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::collab::{Collaborators, LogNotifier, SystemClock};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::limits::*;
use crate::membership::MembershipLedger;
use crate::model::Ms;
use crate::notify::NotifyHub;
use crate::sweeper;

/// One tenant's engine and the membership ledger standing in for its
/// billing collaborator.
pub struct Tenant {
    pub engine: Arc<Engine>,
    pub memberships: Arc<MembershipLedger>,
}

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// sweeper + compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    tenants: DashMap<String, Arc<Tenant>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    refund_cutoff_ms: Ms,
    engine_config: EngineConfig,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        refund_cutoff_ms: Ms,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            refund_cutoff_ms,
            engine_config,
        }
    }

    /// Get or lazily create the tenant. Must be called inside a tokio runtime.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Tenant>> {
        if let Some(t) = self.tenants.get(tenant) {
            return Ok(t.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections racing on a new tenant must not open the WAL twice.
        let slot = match self.tenants.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(v) => v,
        };
        let created = Arc::new(self.open_tenant(&safe_name)?);
        slot.insert(created.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        tracing::info!("tenant {safe_name}: opened");
        Ok(created)
    }

    fn open_tenant(&self, safe_name: &str) -> std::io::Result<Tenant> {
        let clock = Arc::new(SystemClock);
        let memberships = Arc::new(MembershipLedger::new(clock.clone(), self.refund_cutoff_ms));
        let collab = Collaborators {
            entitlements: memberships.clone(),
            credits: memberships.clone(),
            notifier: Arc::new(LogNotifier),
            clock,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(
            wal_path,
            notify,
            collab,
            self.engine_config.clone(),
        )?);

        let resume_engine = engine.clone();
        tokio::spawn(async move {
            resume_engine.resume_promotions().await;
        });
        tokio::spawn(sweeper::run_sweeper(engine.clone()));
        tokio::spawn(sweeper::run_compactor(
            engine.clone(),
            self.compact_threshold,
            sweeper::COMPACT_CHECK_INTERVAL,
        ));

        Ok(Tenant {
            engine,
            memberships,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::Clock;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rollcall_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, 0, EngineConfig::default())
    }

    fn far_future_span() -> Span {
        let start = SystemClock.now_ms() + 24 * 3_600_000;
        Span::new(start, start + 3_600_000)
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = manager(dir);

        let a = tm.get_or_create("tenant_a").unwrap();
        let b = tm.get_or_create("tenant_b").unwrap();

        let sid = Ulid::new();
        let member = Ulid::new();

        // Same session id in both tenants
        a.engine.create_session(sid, 1, far_future_span()).await.unwrap();
        b.engine.create_session(sid, 1, far_future_span()).await.unwrap();

        // Only tenant A knows the member
        a.memberships.grant_credits(member, 1);
        let booked = a.engine.book(Ulid::new(), member, sid).await.unwrap();
        assert_eq!(booked.state, BookingState::Booked);

        let err = b.engine.book(Ulid::new(), member, sid).await.unwrap_err();
        assert_eq!(err.code(), "INELIGIBLE");
        assert_eq!(b.engine.get_session(sid).await.unwrap().booked, 0);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _t = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = manager(dir);

        let t1 = tm.get_or_create("foo").unwrap();
        let t2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&t1, &t2));
        assert!(Arc::ptr_eq(&t1.engine, &t2.engine));
    }

    #[tokio::test]
    async fn tenant_survives_reopen() {
        let dir = test_data_dir("reopen");
        let sid = Ulid::new();
        {
            let tm = manager(dir.clone());
            let t = tm.get_or_create("gym").unwrap();
            t.engine.create_session(sid, 12, far_future_span()).await.unwrap();
        }
        let tm = manager(dir);
        let t = tm.get_or_create("gym").unwrap();
        assert_eq!(t.engine.get_session(sid).await.unwrap().capacity, 12);
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        // Path traversal attempt
        let _t = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
