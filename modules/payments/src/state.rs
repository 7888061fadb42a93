use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::response_cache::ResponseCache;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<Metrics>,
    pub pool: PgPool,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, metrics: Arc<Metrics>) -> Self {
        let cache = Arc::new(ResponseCache::new(config.response_cache_enabled));
        let orchestrator = Arc::new(Orchestrator::new(pool.clone(), config, cache));
        Self {
            orchestrator,
            metrics,
            pool,
        }
    }
}
