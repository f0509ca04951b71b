use std::sync::Arc;

use crate::bot::inbound::InboundPipeline;
use crate::config::Config;
use crate::funnel::executor::ReactivationExecutor;
use crate::funnel::scheduler::ReactivationScheduler;
use crate::funnel::scoring::ScoringEngine;
use crate::funnel::store::FunnelStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FunnelStore>,
    pub scoring: ScoringEngine,
    pub scheduler: ReactivationScheduler,
    pub executor: ReactivationExecutor,
    /// Chat ingestion; also serves the guarded action endpoint.
    pub inbound: InboundPipeline,
    pub config: Config,
}
