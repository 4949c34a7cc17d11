use std::sync::Arc;

use tracing::info;

use crate::auth::services::CredentialGate;
use crate::config::{AppConfig, StoreBackend};
use crate::db;
use crate::donors::{
    memory::MemoryDonorStore,
    repo::{DonorStore, PgDonorStore},
    services::DonorService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DonorStore>,
    pub gate: CredentialGate,
    pub donors: DonorService,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn DonorStore> = match config.store.backend {
            StoreBackend::Postgres => {
                let pool = db::connect(&config.store).await?;
                db::migrate(&pool).await?;
                info!("postgres donor store ready");
                Arc::new(PgDonorStore::new(pool))
            }
            StoreBackend::Memory => {
                info!("in-memory donor store ready; data is lost on exit");
                Arc::new(MemoryDonorStore::new())
            }
        };
        Ok(Self::from_parts(Arc::new(config), store))
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn DonorStore>) -> Self {
        let timeout = config.store.timeout();
        let gate = CredentialGate::new(store.clone(), timeout, config.initial_donation_count);
        let donors = DonorService::new(store.clone(), timeout);
        Self {
            config,
            store,
            gate,
            donors,
        }
    }

    /// Releases store connections. Call once the server has stopped.
    pub async fn teardown(&self) {
        self.store.close().await;
        info!("donor store closed");
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{JwtConfig, StoreConfig};

        let config = Arc::new(AppConfig {
            store: StoreConfig {
                backend: StoreBackend::Memory,
                database_url: None,
                max_connections: 1,
                timeout_ms: 5_000,
            },
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            initial_donation_count: 1,
            host: "127.0.0.1".into(),
            port: 0,
        });

        Self::from_parts(config, Arc::new(MemoryDonorStore::new()))
    }
}
