use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use gatehouse_api::AccessGuard;
use gatehouse_auth::{AuthService, PasswordHasher, PermissionCatalog, PolicyAdapter, SessionManager};
use gatehouse_core::Environment;
use gatehouse_infra::{
    KvSessionProvider, PgPolicyAdapter, PgUserDirectory, PolicyRepository, RedisMemRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = Environment::from_env().context("load environment")?;
    gatehouse_observability::init(&env);

    if !env.is_release() {
        warn!(mode = %env.mode, "running in debug mode");
    }

    // A bad descriptor must stop the process before it serves anything.
    let catalog = PermissionCatalog::load(&env.permissions_file)
        .with_context(|| format!("load permission catalog {}", env.permissions_file))?;

    let database_url = env
        .database_url
        .as_deref()
        .context("DATABASE_URL is required")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connect to postgres")?;

    let adapter = PgPolicyAdapter::new(pool.clone(), env.policy_table.as_str())?;
    adapter.auto_migrate().await.context("migrate policy table")?;
    let policies = PolicyRepository::new(adapter)
        .await
        .context("load policies")?;

    let kv = Arc::new(
        RedisMemRepository::connect(&env.redis_url, env.lock.clone())
            .await
            .context("connect to redis")?,
    );
    let sessions = Arc::new(SessionManager::new(
        KvSessionProvider::new(kv, env.session.max_life_time),
        env.session.name.clone(),
        env.session.max_life_time,
    ));

    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let auth = Arc::new(AuthService::new(
        sessions.clone(),
        users,
        PasswordHasher::default(),
    ));
    let guard = AccessGuard::new(auth, policies, Arc::new(catalog));

    let gc = {
        let sessions = sessions.clone();
        let period = env.session.max_life_time;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                sessions.gc().await;
            }
        })
    };

    info!(
        mode = %env.mode,
        port = env.port,
        session_name = %env.session.name,
        resources = guard.catalog().resources().count(),
        "gatehouse ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;

    gc.abort();
    pool.close().await;
    info!("shutting down");
    Ok(())
}
