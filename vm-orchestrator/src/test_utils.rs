use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use vm_config::HostConfig;
use vm_core::{Actor, Role};
use vm_provider::mock::MockExecutor;
use vm_provider::VirtualBox;

use crate::notify::RecordingNotifier;
use crate::orchestrator::{OrchestratorSettings, VmOrchestrator};
use crate::plan::RatePlan;
use crate::tenant::{self, Tenant};

/// Helper to create an in-memory test database with migrations applied.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn create_test_db() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory url")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create in-memory database");

    // The path is relative to the crate root: vm-orchestrator/migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Orchestrator wired to a scripted hypervisor and a recording notifier.
pub struct TestHarness {
    pub pool: SqlitePool,
    pub mock: Arc<MockExecutor>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: VmOrchestrator,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_settings(OrchestratorSettings::default()).await
    }

    pub async fn with_settings(settings: OrchestratorSettings) -> Self {
        let pool = create_test_db().await;
        let mock = Arc::new(MockExecutor::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let hypervisor = VirtualBox::new(mock.clone(), &HostConfig::default());
        let orchestrator =
            VmOrchestrator::new(pool.clone(), hypervisor, notifier.clone(), settings);
        orchestrator
            .seed_default_plans()
            .await
            .expect("Failed to seed plans");

        Self {
            pool,
            mock,
            notifier,
            orchestrator,
        }
    }

    /// Create a tenant with the given role; no subscription.
    pub async fn tenant(&self, username: &str, role: Role) -> Tenant {
        tenant::create_tenant(
            &self.pool,
            username,
            &format!("{}@example.com", username),
            role,
        )
        .await
        .expect("Failed to create tenant")
    }

    /// Create a standard tenant subscribed to `plan` and return its actor.
    pub async fn subscribed(&self, username: &str, plan: &str) -> Actor {
        let tenant = self.tenant(username, Role::Standard).await;
        let actor = tenant.actor();
        self.orchestrator
            .subscribe(&actor, plan)
            .await
            .expect("Failed to subscribe");
        actor
    }

    /// Insert a custom plan, for limits the default catalogue lacks.
    pub async fn plan(&self, name: &str, max_vms: i64, max_backups: i64) -> RatePlan {
        let plan = RatePlan {
            name: name.to_string(),
            max_vms,
            max_backups,
            price_cents: 0,
        };
        crate::plan::insert_plan(&self.pool, &plan)
            .await
            .expect("Failed to insert plan");
        plan
    }

    /// The administrator account, created on first use.
    pub async fn admin(&self) -> Actor {
        let existing = tenant::find_tenant_by_username(&self.pool, "root")
            .await
            .expect("Failed to look up admin");
        match existing {
            Some(admin) => admin.actor(),
            None => self.tenant("root", Role::Admin).await.actor(),
        }
    }
}
