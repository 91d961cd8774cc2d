use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use portico_auth::{AccessAdmin, AuthStore, CredentialCodec, DeviceRegistry, SessionManager, SharedStore};
use portico_infra::seed::{self, SeedOptions};
use portico_infra::{AppConfig, InMemoryAuthStore, PostgresAuthStore, migrations};

/// Request-independent services shared by every handler.
#[derive(Clone, Debug)]
pub struct AppServices {
    pub sessions: SessionManager,
    pub devices: DeviceRegistry,
    pub admin: AccessAdmin,
}

impl AppServices {
    pub fn new(store: Arc<dyn AuthStore>, config: &AppConfig) -> Self {
        let shared = SharedStore::new(store, config.database.call_timeout);
        let codec = CredentialCodec::new(config.tokens.clone());
        Self {
            sessions: SessionManager::new(shared.clone(), codec),
            devices: DeviceRegistry::new(shared.clone()),
            admin: AccessAdmin::new(shared),
        }
    }
}

/// Open the configured store.
///
/// With `DATABASE_URL` set this connects to Postgres and applies the schema.
/// Without it an in-memory store is created and loaded with the reference data,
/// which is only suitable for development.
pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AuthStore>> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresAuthStore::connect(url, config.database.max_connections, config.database.call_timeout)
                .await
                .context("connecting to postgres")?;
            migrations::run(store.pool()).await.context("applying migrations")?;
            info!("using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL is not set; using a seeded in-memory store");
            let store = InMemoryAuthStore::new();
            seed::run(&store, &SeedOptions::default()).await?;
            Ok(Arc::new(store))
        }
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store = open_store(config).await?;
    Ok(AppServices::new(store, config))
}
