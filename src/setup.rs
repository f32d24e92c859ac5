use std::sync::Arc;

use color_eyre::eyre::{Context, eyre};

use crate::config::{Config, StoreBackend};
use crate::crl::{CrlRepository, DatabaseAdmin, MemoryCrlRepository, RedisCrlRepository};
use crate::pruning::{
    CertificateRepository, MemoryCertificateRepository, MemoryRequestRepository, PruningJob,
    RedisCertificateRepository, RedisRequestRepository, RequestRepository,
};

/// Everything the commands need, resolved once from the configuration.
pub struct AppContext {
    pub config: Config,
    pub crl_repository: Arc<dyn CrlRepository>,
    pub database: Arc<dyn DatabaseAdmin>,
    pub certificates: Arc<dyn CertificateRepository>,
    pub requests: Arc<dyn RequestRepository>,
}

impl AppContext {
    /// Whether the stores outlive the process.
    pub fn is_persistent(&self) -> bool {
        self.config.store.backend != StoreBackend::Memory
    }

    /// Fails unless the stores outlive the process; `action` names the refused command.
    pub fn require_persistent(&self, action: &str) -> color_eyre::Result<()> {
        if !self.is_persistent() {
            return Err(eyre!(
                "{action} needs a persistent store; the memory backend loses everything when the process exits, set store.backend = \"redis\""
            ));
        }
        Ok(())
    }

    pub fn pruning_job(&self) -> color_eyre::Result<PruningJob> {
        self.require_persistent("pruning")?;
        Ok(PruningJob::new(
            self.config.pruning.clone(),
            Arc::clone(&self.certificates),
            Arc::clone(&self.requests),
        ))
    }
}

pub async fn build_context(config: Config) -> color_eyre::Result<AppContext> {
    let context = match config.store.backend {
        StoreBackend::Redis => {
            let redis_config = config
                .store
                .redis
                .as_ref()
                .ok_or_else(|| eyre!("store.backend is redis but store.redis.uri is not set"))?;
            tracing::info!(prefix = %redis_config.prefix, "Using Redis for issuing point, certificate and request storage.");
            let redis_conn = redis_config
                .start()
                .await
                .wrap_err("Failed to start Redis")?;

            let store = Arc::new(
                RedisCrlRepository::new(redis_conn.clone())
                    .with_prefix(redis_config.prefix.clone())
                    .with_lock_timeout(redis_config.lock_timeout())
                    .with_lock_lease(redis_config.lock_lease()),
            );
            let certificates = Arc::new(
                RedisCertificateRepository::new(
                    redis_conn.clone(),
                    config.database.cert_id_generator,
                )
                .with_prefix(redis_config.prefix.clone()),
            );
            let requests = Arc::new(
                RedisRequestRepository::new(redis_conn, config.database.request_id_generator)
                    .with_prefix(redis_config.prefix.clone()),
            );
            AppContext {
                crl_repository: store.clone(),
                database: store,
                certificates,
                requests,
                config,
            }
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives the process.");
            let store = Arc::new(MemoryCrlRepository::new());
            let certificates = Arc::new(MemoryCertificateRepository::new(
                config.database.cert_id_generator,
            ));
            let requests = Arc::new(MemoryRequestRepository::new(
                config.database.request_id_generator,
            ));
            AppContext {
                crl_repository: store.clone(),
                database: store,
                certificates,
                requests,
                config,
            }
        }
    };
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::{CrlIssuingPointRecord, CrlNumber};
    use crate::pruning::IdGenerator;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Config::load_with_sources(Some(vars)).unwrap()
    }

    #[tokio::test]
    async fn test_memory_backend_shares_one_store() {
        let context = build_context(config(&[])).await.unwrap();
        context
            .crl_repository
            .add_issuing_point(CrlIssuingPointRecord::new(
                "MasterCRL",
                CrlNumber::from(1),
                0,
                None,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(context.database.rebuild_indexes().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redis_backend_requires_uri() {
        let result = build_context(config(&[("store.backend", "redis")])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_memory_backend_refuses_pruning() {
        let context = build_context(config(&[])).await.unwrap();
        assert!(!context.is_persistent());
        let err = context.pruning_job().err().unwrap();
        assert!(err.to_string().contains("persistent store"));
        assert!(context.require_persistent("issuing-point add").is_err());
    }

    #[tokio::test]
    async fn test_id_generators_reach_pruning_repositories() {
        let context = build_context(config(&[("database.request_id_generator", "legacy2")]))
            .await
            .unwrap();
        assert_eq!(context.certificates.id_generator(), IdGenerator::Random);
        assert_eq!(context.requests.id_generator(), IdGenerator::Legacy2);
    }
}
