use scriba_application::queries::JobQueryService;
use scriba_infrastructure::messaging::ConsumerMetrics;
use std::sync::Arc;

/// Shared state behind the query API.
#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<JobQueryService>,
    pub metrics: Arc<ConsumerMetrics>,
}
