//! Process-wide wiring of the cache, limiter, queue, and retriever.

use std::path::Path;
use std::sync::Arc;

use recall_core::{AppConfig, ContentCache, Error, QuotaLimiter};

use crate::endpoint::{AnswerEndpoint, EndpointConfig, HttpEndpoint};
use crate::queue::DeliveryQueue;
use crate::retriever::AnswerRetriever;

/// Database path that selects an in-memory cache.
pub const IN_MEMORY_DB: &str = ":memory:";

/// Every long-lived component, built once at startup and shared by reference.
#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
    pub cache: Arc<ContentCache>,
    pub limiter: Arc<QuotaLimiter>,
    pub endpoint: Arc<dyn AnswerEndpoint>,
    pub queue: DeliveryQueue,
    pub retriever: AnswerRetriever,
}

impl AppContext {
    /// Open the cache and start the queue worker around `endpoint`.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(config: AppConfig, endpoint: Arc<dyn AnswerEndpoint>) -> Result<Self, Error> {
        let cache = ContentCache::new(config.cache.clone());
        if config.db_path.as_os_str() == IN_MEMORY_DB {
            cache.init_in_memory().await?;
        } else {
            if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                ensure_dir(parent)?;
            }
            cache.init(&config.db_path).await?;
        }
        let cache = Arc::new(cache);

        let limiter = Arc::new(QuotaLimiter::new(config.quota.clone()));
        let queue =
            DeliveryQueue::start(config.queue.clone(), Arc::clone(&limiter), Arc::clone(&endpoint), config.timeout());

        let mut retriever =
            AnswerRetriever::new(Arc::clone(&cache), Arc::clone(&limiter), Arc::clone(&endpoint), config.timeout());
        if config.queue.use_queue {
            retriever = retriever.with_queue(queue.clone());
        }

        tracing::info!(
            db_path = %config.db_path.display(),
            use_queue = config.queue.use_queue,
            "recall context ready"
        );

        Ok(Self { config, cache, limiter, endpoint, queue, retriever })
    }

    /// Build with the HTTP endpoint described by `config`.
    pub async fn from_config(config: AppConfig) -> Result<Self, Error> {
        let endpoint = HttpEndpoint::new(EndpointConfig::from(&config))?;
        Self::build(config, Arc::new(endpoint)).await
    }
}

fn ensure_dir(dir: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::InvalidInput(format!("cannot create cache directory {}: {e}", dir.display())))
}
